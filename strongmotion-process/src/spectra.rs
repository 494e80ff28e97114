//! Fourier amplitude spectra and the Brune source-spectrum fit.
use strongmotion_core::errors::SmError;

use crate::fft;

/// A one-sided amplitude spectrum on its frequency grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub freqs: Vec<f64>,
    pub amps: Vec<f64>,
}

/// Fourier amplitude spectrum of an acceleration window: `|rfft| * dt`, so
/// cm/s/s input yields cm/s amplitudes.
pub fn acceleration_fas(data: &[f64], dt: f64, nfft: usize) -> Spectrum {
    let spectrum = fft::rfft(data, nfft);
    Spectrum {
        freqs: fft::rfftfreq(nfft, dt),
        amps: spectrum.iter().map(|c| c.norm() * dt).collect(),
    }
}

/// Displacement spectrum from an acceleration spectrum: divide by
/// `(2*pi*f)^2`. The zero-frequency bin is dropped.
pub fn displacement_spectrum(fas: &Spectrum) -> Spectrum {
    let mut freqs = Vec::with_capacity(fas.freqs.len().saturating_sub(1));
    let mut amps = Vec::with_capacity(freqs.capacity());
    for (&f, &a) in fas.freqs.iter().zip(&fas.amps).skip(1) {
        let w = 2.0 * std::f64::consts::PI * f;
        freqs.push(f);
        amps.push(a / (w * w));
    }
    Spectrum { freqs, amps }
}

/// Outcome of the two-parameter Brune fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BruneFit {
    /// Low-frequency displacement plateau, cm·s.
    pub omega0: f64,
    /// Corner frequency, Hz.
    pub corner_frequency: f64,
    /// Seismic moment implied by the plateau, dyne·cm.
    pub moment: f64,
    /// Brune stress drop, bars.
    pub stress_drop: f64,
    /// RMS log10-amplitude residual over the fitted band.
    pub misfit: f64,
}

// Source constants for the moment conversion (CGS): crustal density,
// shear velocity, average radiation pattern, free surface factor and
// horizontal partition.
const DENSITY_G_CM3: f64 = 2.7;
const BETA_CM_S: f64 = 3.5e5;
const RADIATION: f64 = 0.55;
const FREE_SURFACE: f64 = 2.0;
const PARTITION: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Fit `omega(f) = omega0 / (1 + (f/fc)^2)` to a displacement spectrum over
/// `[f_lo, f_hi]`, minimizing the RMS log10 residual.
///
/// The corner frequency is searched on a log grid spanning the band and
/// refined once around the coarse minimum; for a fixed corner the optimal
/// plateau has a closed form in log space.
pub fn fit_brune(
    spectrum: &Spectrum,
    f_lo: f64,
    f_hi: f64,
    hypocentral_distance_km: f64,
) -> Result<BruneFit, SmError> {
    let band: Vec<(f64, f64)> = spectrum
        .freqs
        .iter()
        .zip(&spectrum.amps)
        .filter(|(&f, &a)| f >= f_lo && f <= f_hi && a > 0.0 && a.is_finite())
        .map(|(&f, &a)| (f, a))
        .collect();
    if band.len() < 8 {
        return Err(SmError::Validation {
            msg: format!(
                "Brune fit needs at least 8 usable spectral points in [{}, {}] Hz",
                f_lo, f_hi
            ),
        });
    }

    let evaluate = |fc: f64| -> (f64, f64) {
        // Closed-form optimal plateau for this corner, then the residual.
        let mut log_omega0 = 0.0;
        for &(f, a) in &band {
            log_omega0 += a.log10() + (1.0 + (f / fc).powi(2)).log10();
        }
        log_omega0 /= band.len() as f64;
        let mut sum_sq = 0.0;
        for &(f, a) in &band {
            let model = log_omega0 - (1.0 + (f / fc).powi(2)).log10();
            let r = a.log10() - model;
            sum_sq += r * r;
        }
        (log_omega0, (sum_sq / band.len() as f64).sqrt())
    };

    let grid = |lo: f64, hi: f64, n: usize| -> Vec<f64> {
        (0..n)
            .map(|i| {
                let frac = i as f64 / (n - 1) as f64;
                10f64.powf(lo.log10() + frac * (hi.log10() - lo.log10()))
            })
            .collect()
    };

    let coarse = grid(f_lo.max(1e-3), f_hi, 40);
    let mut best_fc = coarse[0];
    let mut best = evaluate(best_fc);
    for &fc in &coarse[1..] {
        let trial = evaluate(fc);
        if trial.1 < best.1 {
            best = trial;
            best_fc = fc;
        }
    }
    // One refinement pass around the coarse minimum.
    let fine = grid(best_fc / 1.5, (best_fc * 1.5).min(f_hi), 40);
    for &fc in &fine {
        let trial = evaluate(fc);
        if trial.1 < best.1 {
            best = trial;
            best_fc = fc;
        }
    }

    let omega0 = 10f64.powf(best.0);
    let distance_cm = hypocentral_distance_km * 1e5;
    let moment = 4.0 * std::f64::consts::PI * DENSITY_G_CM3 * BETA_CM_S.powi(3) * distance_cm
        * omega0
        / (RADIATION * FREE_SURFACE * PARTITION);
    let source_radius = 2.34 * BETA_CM_S / (2.0 * std::f64::consts::PI * best_fc);
    let stress_drop = 7.0 * moment / (16.0 * source_radius.powi(3)) / 1e6;

    Ok(BruneFit {
        omega0,
        corner_frequency: best_fc,
        moment,
        stress_drop,
        misfit: best.1,
    })
}
