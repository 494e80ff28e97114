//! Thin real-FFT backend over `rustfft`.
//!
//! Everything upstream speaks the `rfft` convention: a real signal of `n`
//! samples transforms to `n/2 + 1` complex bins, `freq[0] = 0` and
//! `freq[n/2]` the Nyquist frequency. Keeping the backend behind these four
//! functions means the FFT library is replaceable without touching the
//! spectrum code.
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Forward real FFT, unnormalized, `nfft/2 + 1` bins.
///
/// The input is zero-padded (or truncated) to `nfft`.
pub fn rfft(data: &[f64], nfft: usize) -> Vec<Complex<f64>> {
    let mut buf: Vec<Complex<f64>> = data
        .iter()
        .take(nfft)
        .map(|&x| Complex::new(x, 0.0))
        .collect();
    buf.resize(nfft, Complex::new(0.0, 0.0));
    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(nfft).process(&mut buf);
    buf.truncate(nfft / 2 + 1);
    buf
}

/// Inverse of [`rfft`]: reconstruct `n` real samples from `n/2 + 1` bins.
pub fn irfft(spectrum: &[Complex<f64>], n: usize) -> Vec<f64> {
    let mut buf: Vec<Complex<f64>> = Vec::with_capacity(n);
    buf.extend_from_slice(spectrum);
    // Hermitian symmetry for the negative frequencies.
    for i in (1..(n + 1) / 2).rev() {
        let c = spectrum[i].conj();
        buf.push(c);
    }
    buf.truncate(n);
    let mut planner = FftPlanner::new();
    planner.plan_fft_inverse(n).process(&mut buf);
    buf.iter().map(|c| c.re / n as f64).collect()
}

/// The frequency grid of [`rfft`] output for sample spacing `dt`.
pub fn rfftfreq(n: usize, dt: f64) -> Vec<f64> {
    (0..=n / 2).map(|i| i as f64 / (n as f64 * dt)).collect()
}

/// Upsample a real signal by an integer factor with spectral zero-padding.
///
/// The result has `factor * n` samples over the same time span; band-limited
/// content is preserved exactly.
pub fn upsample(data: &[f64], factor: usize) -> Vec<f64> {
    if factor <= 1 || data.is_empty() {
        return data.to_vec();
    }
    let n = data.len();
    let m = n * factor;
    let mut spectrum = rfft(data, n);
    if n % 2 == 0 {
        // The old Nyquist bin gains a conjugate partner in the longer
        // transform; split its energy.
        let last = spectrum.len() - 1;
        spectrum[last] = spectrum[last] * 0.5;
    }
    let scale = factor as f64;
    for c in &mut spectrum {
        *c = *c * scale;
    }
    spectrum.resize(m / 2 + 1, Complex::new(0.0, 0.0));
    irfft(&spectrum, m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_layout_matches_rfft_convention() {
        let n = 64;
        let dt = 0.01;
        let freqs = rfftfreq(n, dt);
        assert_eq!(freqs.len(), n / 2 + 1);
        assert_eq!(freqs[0], 0.0);
        let nyquist = 1.0 / (2.0 * dt);
        assert!((freqs[n / 2] - nyquist).abs() < 1e-12);
        let spec = rfft(&vec![1.0; n], n);
        assert_eq!(spec.len(), n / 2 + 1);
    }

    #[test]
    fn dc_signal_transforms_to_first_bin() {
        let n = 32;
        let spec = rfft(&vec![2.0; n], n);
        assert!((spec[0].re - 2.0 * n as f64).abs() < 1e-9);
        for bin in &spec[1..] {
            assert!(bin.norm() < 1e-9);
        }
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let n = 128;
        let dt = 0.005;
        let k = 10;
        let f = k as f64 / (n as f64 * dt);
        let data: Vec<f64> = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * f * i as f64 * dt).sin())
            .collect();
        let spec = rfft(&data, n);
        // Unnormalized amplitude of a unit sine is n/2 at its bin.
        assert!((spec[k].norm() - n as f64 / 2.0).abs() < 1e-6);
    }

    #[test]
    fn irfft_round_trip() {
        let data: Vec<f64> = (0..50).map(|i| ((i * 7) % 13) as f64 - 6.0).collect();
        let spec = rfft(&data, data.len());
        let back = irfft(&spec, data.len());
        for (a, b) in data.iter().zip(&back) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn upsample_preserves_band_limited_signal() {
        let n = 64;
        let dt = 0.01;
        let f = 5.0;
        let data: Vec<f64> = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * f * i as f64 * dt).sin())
            .collect();
        let up = upsample(&data, 4);
        assert_eq!(up.len(), 4 * n);
        // Every fourth sample of the upsampled series is an original sample.
        for (i, &x) in data.iter().enumerate() {
            assert!((up[4 * i] - x).abs() < 1e-8);
        }
    }
}
