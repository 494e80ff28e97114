//! Butterworth filtering as cascaded second-order sections.
//!
//! The design path is the classical one: analog prototype poles on the unit
//! circle, lowpass/highpass frequency transform with prewarped corner, then
//! the bilinear transform into the z-plane. Filtering runs each biquad in
//! direct form II transposed; one pass is causal, two passes run the cascade
//! forward and reversed for zero phase.
use num::Complex;

use strongmotion_core::errors::SmError;

/// One biquad, `a[0]` normalized to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sos {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Lowpass,
    Highpass,
}

/// Design a Butterworth highpass cascade.
pub fn butter_highpass(order: usize, corner_hz: f64, sampling_rate: f64) -> Result<Vec<Sos>, SmError> {
    design(order, corner_hz, sampling_rate, Kind::Highpass)
}

/// Design a Butterworth lowpass cascade.
pub fn butter_lowpass(order: usize, corner_hz: f64, sampling_rate: f64) -> Result<Vec<Sos>, SmError> {
    design(order, corner_hz, sampling_rate, Kind::Lowpass)
}

fn design(order: usize, corner_hz: f64, sampling_rate: f64, kind: Kind) -> Result<Vec<Sos>, SmError> {
    if order == 0 || order > 16 {
        return Err(SmError::Validation {
            msg: format!("filter order must be in 1..=16, got {}", order),
        });
    }
    let nyquist = sampling_rate / 2.0;
    if corner_hz <= 0.0 || corner_hz >= nyquist {
        return Err(SmError::Validation {
            msg: format!(
                "corner frequency {} Hz must lie inside (0, {}) Hz",
                corner_hz, nyquist
            ),
        });
    }

    // Prewarped analog corner for the bilinear transform (T = 2 convention).
    let warped = (std::f64::consts::PI * corner_hz / sampling_rate).tan();

    // Analog prototype poles on the left unit semicircle.
    let n = order;
    let mut digital_poles: Vec<Complex<f64>> = Vec::with_capacity(n);
    for k in 0..n {
        let theta = std::f64::consts::PI * (2.0 * k as f64 + n as f64 + 1.0) / (2.0 * n as f64);
        let prototype = Complex::from_polar(1.0, theta);
        let analog = match kind {
            Kind::Lowpass => prototype * warped,
            Kind::Highpass => warped / prototype,
        };
        let one = Complex::new(1.0, 0.0);
        digital_poles.push((one + analog) / (one - analog));
    }

    // All zeros sit at z = -1 (lowpass) or z = +1 (highpass).
    let (b_pair, b_single) = match kind {
        Kind::Lowpass => ([1.0, 2.0, 1.0], [1.0, 1.0, 0.0]),
        Kind::Highpass => ([1.0, -2.0, 1.0], [1.0, -1.0, 0.0]),
    };

    let mut sections = Vec::with_capacity((n + 1) / 2);
    let mut used = vec![false; n];
    for i in 0..n {
        if used[i] {
            continue;
        }
        used[i] = true;
        let p = digital_poles[i];
        if p.im.abs() > 1e-12 {
            // Its conjugate is in the set; consume it.
            if let Some(j) = (0..n).find(|&j| {
                !used[j] && (digital_poles[j] - p.conj()).norm() < 1e-9
            }) {
                used[j] = true;
            }
            sections.push(Sos {
                b: b_pair,
                a: [1.0, -2.0 * p.re, p.norm_sqr()],
            });
        } else {
            sections.push(Sos {
                b: b_single,
                a: [1.0, -p.re, 0.0],
            });
        }
    }

    // Normalize to unit gain at DC (lowpass) or Nyquist (highpass).
    let z_ref = match kind {
        Kind::Lowpass => Complex::new(1.0, 0.0),
        Kind::Highpass => Complex::new(-1.0, 0.0),
    };
    let gain = response_at(&sections, z_ref).norm();
    if gain == 0.0 || !gain.is_finite() {
        return Err(SmError::Validation {
            msg: "degenerate filter design".to_string(),
        });
    }
    for coef in sections[0].b.iter_mut() {
        *coef /= gain;
    }
    Ok(sections)
}

/// Complex cascade response at a point on (or off) the unit circle.
pub fn response_at(sections: &[Sos], z: Complex<f64>) -> Complex<f64> {
    let zi = 1.0 / z;
    sections.iter().fold(Complex::new(1.0, 0.0), |acc, s| {
        let num = Complex::new(s.b[0], 0.0) + zi * s.b[1] + zi * zi * s.b[2];
        let den = Complex::new(s.a[0], 0.0) + zi * s.a[1] + zi * zi * s.a[2];
        acc * num / den
    })
}

/// Magnitude response at a frequency in Hz.
pub fn magnitude_at(sections: &[Sos], freq_hz: f64, sampling_rate: f64) -> f64 {
    let omega = 2.0 * std::f64::consts::PI * freq_hz / sampling_rate;
    response_at(sections, Complex::from_polar(1.0, omega)).norm()
}

/// Run the cascade causally, in place (direct form II transposed).
pub fn sosfilt(sections: &[Sos], data: &mut [f64]) {
    for s in sections {
        let mut w1 = 0.0;
        let mut w2 = 0.0;
        for x in data.iter_mut() {
            let input = *x;
            let y = s.b[0] * input + w1;
            w1 = s.b[1] * input - s.a[1] * y + w2;
            w2 = s.b[2] * input - s.a[2] * y;
            *x = y;
        }
    }
}

/// Forward-reverse (zero-phase) application of the cascade, in place.
pub fn sosfiltfilt(sections: &[Sos], data: &mut [f64]) {
    sosfilt(sections, data);
    data.reverse();
    sosfilt(sections, data);
    data.reverse();
}

/// Apply a designed cascade with the configured number of passes: 1 causal,
/// 2 zero-phase.
pub fn apply(sections: &[Sos], data: &mut [f64], passes: usize) -> Result<(), SmError> {
    match passes {
        1 => sosfilt(sections, data),
        2 => sosfiltfilt(sections, data),
        other => {
            return Err(SmError::Config {
                msg: format!("number_of_passes must be 1 or 2, got {}", other),
            })
        }
    }
    Ok(())
}
