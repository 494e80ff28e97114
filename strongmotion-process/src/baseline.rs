//! Detrending and baseline correction.
//!
//! Everything here operates on raw sample buffers; the `detrend` processing
//! step owns the mapping from configuration to these functions and the
//! provenance entries.
use strongmotion_core::errors::SmError;

use crate::ops;

/// Remove a least-squares polynomial of the given order, in place. The
/// abscissa is scaled to `[0, 1]` so the normal equations stay conditioned
/// at order six and beyond.
pub fn remove_polynomial(data: &mut [f64], order: usize) -> Result<Vec<f64>, SmError> {
    let n = data.len();
    if n < order + 1 {
        return Err(SmError::Validation {
            msg: format!("{} samples cannot support an order-{} fit", n, order),
        });
    }
    let denom = (n - 1).max(1) as f64;
    let x: Vec<f64> = (0..n).map(|i| i as f64 / denom).collect();
    let coefs = ops::polyfit(&x, data, order)?;
    for (xi, value) in x.iter().zip(data.iter_mut()) {
        *value -= ops::polyval(&coefs, *xi);
    }
    Ok(coefs)
}

/// Fit a line to the pre-event window only and remove it from the whole
/// record, in place.
pub fn remove_pre_event_baseline(data: &mut [f64], noise_samples: usize) -> Result<(), SmError> {
    let m = noise_samples.min(data.len());
    if m < 2 {
        return Err(SmError::Validation {
            msg: "pre-event baseline needs at least two noise samples".to_string(),
        });
    }
    let denom = (data.len() - 1).max(1) as f64;
    let x: Vec<f64> = (0..m).map(|i| i as f64 / denom).collect();
    let coefs = ops::polyfit(&x, &data[..m], 1)?;
    for (i, value) in data.iter_mut().enumerate() {
        *value -= ops::polyval(&coefs, i as f64 / denom);
    }
    Ok(())
}

/// Remove a natural cubic spline through `knots` evenly spaced knots, each
/// anchored at the local mean of the record, in place.
pub fn remove_spline(data: &mut [f64], knots: usize) -> Result<(), SmError> {
    let n = data.len();
    if knots < 2 || n < 2 * knots {
        return Err(SmError::Validation {
            msg: format!("spline detrend needs 2+ knots and {} samples for {}", 2 * knots, knots),
        });
    }
    let spacing = (n - 1) as f64 / (knots - 1) as f64;
    let half = (spacing / 2.0).max(1.0) as usize;
    let xs: Vec<f64> = (0..knots).map(|j| j as f64 * spacing).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&xj| {
            let center = xj.round() as usize;
            let lo = center.saturating_sub(half);
            let hi = (center + half + 1).min(n);
            data[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect();

    let second = natural_spline_second_derivatives(&xs, &ys);
    for (i, value) in data.iter_mut().enumerate() {
        *value -= spline_eval(&xs, &ys, &second, i as f64);
    }
    Ok(())
}

/// Second derivatives of a natural cubic spline (tridiagonal solve).
fn natural_spline_second_derivatives(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let k = xs.len();
    let mut m = vec![0.0; k];
    if k < 3 {
        return m;
    }
    let mut diag = vec![0.0; k];
    let mut rhs = vec![0.0; k];
    let mut upper = vec![0.0; k];
    for j in 1..k - 1 {
        let h0 = xs[j] - xs[j - 1];
        let h1 = xs[j + 1] - xs[j];
        diag[j] = 2.0 * (h0 + h1);
        upper[j] = h1;
        rhs[j] = 6.0 * ((ys[j + 1] - ys[j]) / h1 - (ys[j] - ys[j - 1]) / h0);
    }
    // Thomas forward sweep over the interior unknowns.
    for j in 2..k - 1 {
        let h0 = xs[j] - xs[j - 1];
        let factor = h0 / diag[j - 1];
        diag[j] -= factor * upper[j - 1];
        rhs[j] -= factor * rhs[j - 1];
    }
    for j in (1..k - 1).rev() {
        m[j] = (rhs[j] - upper[j] * m[j + 1]) / diag[j];
    }
    m
}

fn spline_eval(xs: &[f64], ys: &[f64], second: &[f64], x: f64) -> f64 {
    let k = xs.len();
    let mut j = match xs
        .binary_search_by(|v| v.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal))
    {
        Ok(idx) => idx.min(k - 2),
        Err(idx) => idx.saturating_sub(1).min(k - 2),
    };
    if j >= k - 1 {
        j = k - 2;
    }
    let h = xs[j + 1] - xs[j];
    let a = (xs[j + 1] - x) / h;
    let b = (x - xs[j]) / h;
    a * ys[j]
        + b * ys[j + 1]
        + ((a.powi(3) - a) * second[j] + (b.powi(3) - b) * second[j + 1]) * h * h / 6.0
}

/// Sixth-order baseline correction.
///
/// The acceleration is integrated twice to displacement, a sixth-order
/// polynomial with its constant and linear terms pinned to zero is fit to
/// the displacement, and the polynomial's second derivative is subtracted
/// from the acceleration. Returns the displacement-domain coefficients in
/// rising powers of time (seconds), the two pinned terms first.
pub fn correct_sixth_order(acc: &mut [f64], dt: f64) -> Result<Vec<f64>, SmError> {
    let n = acc.len();
    if n < 8 {
        return Err(SmError::Validation {
            msg: "sixth-order baseline needs at least 8 samples".to_string(),
        });
    }
    let vel = ops::integrate(acc, dt);
    let disp = ops::integrate(&vel, dt);

    // Fit over s = t / T in [0, 1] for conditioning; basis s^2 .. s^6.
    let span = (n - 1) as f64 * dt;
    let mut ata = vec![vec![0.0; 5]; 5];
    let mut atb = vec![0.0; 5];
    for (i, &d) in disp.iter().enumerate() {
        let s = i as f64 * dt / span;
        let mut basis = [0.0; 5];
        let mut p = s * s;
        for slot in basis.iter_mut() {
            *slot = p;
            p *= s;
        }
        for r in 0..5 {
            for c in 0..5 {
                ata[r][c] += basis[r] * basis[c];
            }
            atb[r] += basis[r] * d;
        }
    }
    let c_scaled = ops::solve_dense(ata, atb)?;

    // Back to time-domain coefficients: c_t[j] = c_s[j] / T^j, j = 2..6.
    let mut coefs = vec![0.0; 7];
    for (j, &cs) in (2..=6).zip(&c_scaled) {
        coefs[j] = cs / span.powi(j as i32);
    }

    // Subtract the polynomial's second derivative from the acceleration.
    for (i, a) in acc.iter_mut().enumerate() {
        let t = i as f64 * dt;
        let mut dd = 0.0;
        for j in 2..=6 {
            dd += coefs[j] * (j * (j - 1)) as f64 * t.powi(j as i32 - 2);
        }
        *a -= dd;
    }
    Ok(coefs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polynomial_removal_flattens_its_own_shape() {
        let n = 200;
        let mut data: Vec<f64> = (0..n)
            .map(|i| {
                let s = i as f64 / (n - 1) as f64;
                0.4 - 1.2 * s + 3.0 * s * s
            })
            .collect();
        remove_polynomial(&mut data, 2).unwrap();
        for x in data {
            assert!(x.abs() < 1e-9);
        }
    }

    #[test]
    fn pre_event_baseline_uses_noise_window_only() {
        // Offset of 2.0 in the noise window, a transient later on.
        let mut data = vec![2.0; 500];
        for i in 200..300 {
            data[i] += 50.0;
        }
        remove_pre_event_baseline(&mut data, 150).unwrap();
        assert!(data[0].abs() < 1e-9);
        assert!(data[100].abs() < 1e-9);
        assert!((data[250] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn spline_removes_slow_wander() {
        let n = 1000;
        let mut data: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64 / n as f64;
                // One very slow cycle of wander.
                3.0 * (std::f64::consts::PI * t).sin()
            })
            .collect();
        let before = data.iter().fold(0.0f64, |m, &x| m.max(x.abs()));
        remove_spline(&mut data, 8).unwrap();
        let after = data.iter().fold(0.0f64, |m, &x| m.max(x.abs()));
        assert!(after < before / 10.0);
    }

    #[test]
    fn sixth_order_pins_constant_and_linear_terms() {
        let n = 2000;
        let dt = 0.01;
        let span = (n - 1) as f64 * dt;
        // An acceleration whose double integral is a pure polynomial drift.
        let mut acc: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64 * dt;
                6.0e-4 * t + 1.2e-5 * t * t
            })
            .collect();
        let coefs = correct_sixth_order(&mut acc, dt).unwrap();
        assert_eq!(coefs.len(), 7);
        assert_eq!(coefs[0], 0.0);
        assert_eq!(coefs[1], 0.0);
        // The correction removes most of the drift.
        let residual = acc.iter().fold(0.0f64, |m, &x| m.max(x.abs()));
        let original = 6.0e-4 * span + 1.2e-5 * span * span;
        assert!(residual < original / 20.0);
    }

    #[test]
    fn degenerate_inputs_rejected() {
        let mut tiny = vec![0.0; 4];
        assert!(correct_sixth_order(&mut tiny, 0.01).is_err());
        assert!(remove_spline(&mut tiny, 8).is_err());
        assert!(remove_polynomial(&mut tiny, 6).is_err());
    }
}
