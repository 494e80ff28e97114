//! Elementwise operations over contiguous sample buffers: integration,
//! differentiation, tapering, least-squares fits. These are the primitives
//! the detrending and metric code is built from.
use strongmotion_core::enums::TaperSide;
use strongmotion_core::errors::SmError;

/// Cumulative trapezoidal integration with an implicit zero start.
pub fn integrate(data: &[f64], dt: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(data.len());
    let mut acc = 0.0;
    let mut prev = 0.0;
    for (i, &x) in data.iter().enumerate() {
        if i > 0 {
            acc += 0.5 * (prev + x) * dt;
        }
        prev = x;
        out.push(acc);
    }
    out
}

/// Central-difference differentiation, one-sided at the ends.
pub fn differentiate(data: &[f64], dt: f64) -> Vec<f64> {
    let n = data.len();
    match n {
        0 => return Vec::new(),
        1 => return vec![0.0],
        _ => {}
    }
    let mut out = Vec::with_capacity(n);
    out.push((data[1] - data[0]) / dt);
    for i in 1..n - 1 {
        out.push((data[i + 1] - data[i - 1]) / (2.0 * dt));
    }
    out.push((data[n - 1] - data[n - 2]) / dt);
    out
}

/// Remove the mean in place.
pub fn demean(data: &mut [f64]) {
    if data.is_empty() {
        return;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    for x in data.iter_mut() {
        *x -= mean;
    }
}

/// Remove the least-squares line in place.
pub fn detrend_linear(data: &mut [f64]) {
    let n = data.len();
    if n < 2 {
        return;
    }
    // Fit y = a + b*i by the closed-form normal equations.
    let nf = n as f64;
    let sum_i = nf * (nf - 1.0) / 2.0;
    let sum_ii = (nf - 1.0) * nf * (2.0 * nf - 1.0) / 6.0;
    let sum_y: f64 = data.iter().sum();
    let sum_iy: f64 = data.iter().enumerate().map(|(i, &y)| i as f64 * y).sum();
    let det = nf * sum_ii - sum_i * sum_i;
    if det == 0.0 {
        return;
    }
    let a = (sum_ii * sum_y - sum_i * sum_iy) / det;
    let b = (nf * sum_iy - sum_i * sum_y) / det;
    for (i, x) in data.iter_mut().enumerate() {
        *x -= a + b * i as f64;
    }
}

/// Apply a Hann taper over a fraction `width` of the record on the chosen
/// side(s), in place.
pub fn taper_hann(data: &mut [f64], width: f64, side: TaperSide) {
    let n = data.len();
    if n == 0 || width <= 0.0 {
        return;
    }
    let m = ((n as f64 * width.min(0.5)).round() as usize).min(n / 2).max(1);
    let ramp = |k: usize| -> f64 {
        // Half of a Hann window rising over m samples.
        0.5 * (1.0 - (std::f64::consts::PI * k as f64 / m as f64).cos())
    };
    if side != TaperSide::Right {
        for k in 0..m {
            data[k] *= ramp(k);
        }
    }
    if side != TaperSide::Left {
        for k in 0..m {
            data[n - 1 - k] *= ramp(k);
        }
    }
}

/// Solve a small dense linear system by Gaussian elimination with partial
/// pivoting. The systems here are tiny normal-equation matrices.
pub fn solve_dense(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, SmError> {
    let n = b.len();
    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| {
                a[i][col]
                    .abs()
                    .partial_cmp(&a[j][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if a[pivot_row][col].abs() < 1e-300 {
            return Err(SmError::Validation {
                msg: "singular normal-equation matrix".to_string(),
            });
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in row + 1..n {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Ok(x)
}

/// Least-squares polynomial coefficients (rising powers) of `y` over the
/// abscissa `x`, by normal equations.
pub fn polyfit(x: &[f64], y: &[f64], order: usize) -> Result<Vec<f64>, SmError> {
    let m = order + 1;
    if x.len() != y.len() || x.len() < m {
        return Err(SmError::Validation {
            msg: format!(
                "polynomial fit of order {} needs at least {} points, got {}",
                order,
                m,
                x.len()
            ),
        });
    }
    let mut ata = vec![vec![0.0; m]; m];
    let mut atb = vec![0.0; m];
    for (&xi, &yi) in x.iter().zip(y) {
        let mut powers = Vec::with_capacity(2 * m - 1);
        let mut p = 1.0;
        for _ in 0..2 * m - 1 {
            powers.push(p);
            p *= xi;
        }
        for r in 0..m {
            for c in 0..m {
                ata[r][c] += powers[r + c];
            }
            atb[r] += powers[r] * yi;
        }
    }
    solve_dense(ata, atb)
}

/// Evaluate a rising-powers polynomial.
pub fn polyval(coefs: &[f64], x: f64) -> f64 {
    coefs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Nearest-rank percentile of an unsorted slice: the smallest value such
/// that at least `p` percent of the data is at or below it.
pub fn percentile_nearest_rank(values: &[f64], p: f64) -> f64 {
    debug_assert!(!values.is_empty());
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrate_constant_is_linear() {
        let v = integrate(&[2.0; 5], 0.5);
        assert_eq!(v, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn differentiate_inverts_integrate_inside() {
        let data: Vec<f64> = (0..100).map(|i| (i as f64 * 0.13).sin()).collect();
        let v = integrate(&data, 0.01);
        let back = differentiate(&v, 0.01);
        // Central differences reproduce the integrand away from the ends,
        // up to the second-order smoothing error of the two schemes.
        for i in 2..97 {
            assert!((back[i] - data[i]).abs() < 6e-3);
        }
    }

    #[test]
    fn demean_zeroes_the_mean() {
        let mut data = vec![1.0, 2.0, 3.0, 6.0];
        demean(&mut data);
        assert!(data.iter().sum::<f64>().abs() < 1e-12);
    }

    #[test]
    fn detrend_linear_removes_a_line() {
        let mut data: Vec<f64> = (0..50).map(|i| 3.0 + 0.25 * i as f64).collect();
        detrend_linear(&mut data);
        for x in data {
            assert!(x.abs() < 1e-9);
        }
    }

    #[test]
    fn taper_pins_edges() {
        let mut data = vec![1.0; 100];
        taper_hann(&mut data, 0.05, TaperSide::Both);
        assert_eq!(data[0], 0.0);
        assert_eq!(data[99], 0.0);
        assert_eq!(data[50], 1.0);
        let mut left = vec![1.0; 100];
        taper_hann(&mut left, 0.05, TaperSide::Left);
        assert_eq!(left[0], 0.0);
        assert_eq!(left[99], 1.0);
    }

    #[test]
    fn polyfit_recovers_cubic() {
        let x: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|&t| 1.0 - 2.0 * t + 0.5 * t.powi(3)).collect();
        let c = polyfit(&x, &y, 3).unwrap();
        assert!((c[0] - 1.0).abs() < 1e-8);
        assert!((c[1] + 2.0).abs() < 1e-8);
        assert!(c[2].abs() < 1e-8);
        assert!((c[3] - 0.5).abs() < 1e-8);
        assert!((polyval(&c, 2.0) - (1.0 - 4.0 + 4.0)).abs() < 1e-8);
    }

    #[test]
    fn nearest_rank_percentile() {
        let values: Vec<f64> = (1..=180).map(|i| i as f64).collect();
        // The 50th percentile of 180 ordered values is the 90th value.
        assert_eq!(percentile_nearest_rank(&values, 50.0), 90.0);
        assert_eq!(percentile_nearest_rank(&values, 100.0), 180.0);
    }
}
