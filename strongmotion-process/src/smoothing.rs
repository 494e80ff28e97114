//! Konno-Ohmachi spectral smoothing.
//!
//! The window is `(sin(x)/x)^4` with `x = b * log10(f / fc)`, constant width
//! on a logarithmic frequency axis. Outside `[fc * 10^(-3/b), fc * 10^(3/b)]`
//! the window is identically zero, so each target frequency only sums a
//! bounded slice of the source grid.

/// Smooth `amps` (defined on `freqs`) onto the `centers` grid.
///
/// The output always has `centers.len()` values. A center with zero total
/// window weight (no positive source frequency inside its window) yields NaN
/// when `allow_nans` is set and `0.0` otherwise.
pub fn konno_ohmachi_smooth(
    freqs: &[f64],
    amps: &[f64],
    centers: &[f64],
    bandwidth: f64,
    allow_nans: bool,
) -> Vec<f64> {
    let exponent = 3.0 / bandwidth;
    centers
        .iter()
        .map(|&fc| {
            if fc <= 0.0 || !fc.is_finite() {
                return if allow_nans { f64::NAN } else { 0.0 };
            }
            let lo = fc * 10f64.powf(-exponent);
            let hi = fc * 10f64.powf(exponent);
            let mut num = 0.0;
            let mut den = 0.0;
            for (&f, &a) in freqs.iter().zip(amps) {
                if f <= 0.0 || f < lo || f > hi || !a.is_finite() {
                    continue;
                }
                let w = window(f, fc, bandwidth);
                num += w * a;
                den += w;
            }
            if den == 0.0 {
                if allow_nans {
                    f64::NAN
                } else {
                    0.0
                }
            } else {
                num / den
            }
        })
        .collect()
}

/// The smoothing window weight of source frequency `f` for center `fc`.
pub fn window(f: f64, fc: f64, bandwidth: f64) -> f64 {
    let x = bandwidth * (f / fc).log10();
    if x.abs() < 1e-10 {
        return 1.0;
    }
    if x.abs() > 3.0 {
        return 0.0;
    }
    (x.sin() / x).powi(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_is_one_at_center() {
        assert_eq!(window(2.0, 2.0, 20.0), 1.0);
    }

    #[test]
    fn weight_vanishes_outside_band() {
        let b = 20.0;
        let fc = 1.0;
        let beyond = fc * 10f64.powf(3.0 / b) * 1.001;
        assert_eq!(window(beyond, fc, b), 0.0);
        let below = fc * 10f64.powf(-3.0 / b) * 0.999;
        assert_eq!(window(below, fc, b), 0.0);
    }

    #[test]
    fn output_length_matches_centers() {
        let freqs: Vec<f64> = (1..100).map(|i| i as f64 * 0.25).collect();
        let amps = vec![1.0; freqs.len()];
        let centers = vec![0.5, 1.0, 2.0, 4.0, 8.0];
        let out = konno_ohmachi_smooth(&freqs, &amps, &centers, 20.0, true);
        assert_eq!(out.len(), centers.len());
    }

    #[test]
    fn constant_spectrum_stays_constant() {
        let freqs: Vec<f64> = (1..400).map(|i| i as f64 * 0.05).collect();
        let amps = vec![3.5; freqs.len()];
        let out = konno_ohmachi_smooth(&freqs, &amps, &[1.0, 2.0, 5.0], 20.0, true);
        for v in out {
            assert!((v - 3.5).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_weight_yields_nan_or_zero() {
        let freqs = vec![10.0, 11.0, 12.0];
        let amps = vec![1.0; 3];
        // 0.01 Hz is far below every source frequency's window.
        let nan = konno_ohmachi_smooth(&freqs, &amps, &[0.01], 40.0, true);
        assert!(nan[0].is_nan());
        let zero = konno_ohmachi_smooth(&freqs, &amps, &[0.01], 40.0, false);
        assert_eq!(zero[0], 0.0);
    }

    #[test]
    fn smoothing_is_an_average_of_neighbors() {
        // A single spike smooths to something between zero and the spike.
        let freqs: Vec<f64> = (1..200).map(|i| i as f64 * 0.1).collect();
        let mut amps = vec![1.0; freqs.len()];
        amps[49] = 100.0; // 5.0 Hz
        let out = konno_ohmachi_smooth(&freqs, &amps, &[5.0], 20.0, true);
        assert!(out[0] > 1.0 && out[0] < 100.0);
    }
}
