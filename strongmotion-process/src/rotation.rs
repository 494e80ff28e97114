//! Horizontal rotation geometry: RotD and GMRotD percentiles, and the
//! radial/transverse transform.
use strongmotion_core::errors::SmError;

use crate::ops::percentile_nearest_rank;

/// The rotated horizontal `h1*cos(theta) + h2*sin(theta)`.
pub fn rotate(h1: &[f64], h2: &[f64], angle_deg: f64) -> Vec<f64> {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    h1.iter()
        .zip(h2)
        .map(|(&a, &b)| a * cos + b * sin)
        .collect()
}

/// RotD(p): the p-th percentile over rotation angles 0..=179 degrees of a
/// scalar metric of the rotated trace.
///
/// The percentile is nearest-rank, so RotD100 is the maximum over angles and
/// RotD50 of the 180 angle values is the 90th ordered value.
pub fn rotd<F>(h1: &[f64], h2: &[f64], percentile: f64, metric: F) -> f64
where
    F: Fn(&[f64]) -> f64,
{
    let values: Vec<f64> = (0..180)
        .map(|angle| metric(&rotate(h1, h2, angle as f64)))
        .collect();
    percentile_nearest_rank(&values, percentile)
}

/// GMRotD(p): as [`rotd`], but each angle contributes the geometric mean of
/// the metric over the two orthogonal rotated components.
pub fn gmrotd<F>(h1: &[f64], h2: &[f64], percentile: f64, metric: F) -> f64
where
    F: Fn(&[f64]) -> f64,
{
    let values: Vec<f64> = (0..180)
        .map(|angle| {
            let a = metric(&rotate(h1, h2, angle as f64));
            let b = metric(&rotate(h1, h2, angle as f64 + 90.0));
            (a * b).sqrt()
        })
        .collect();
    percentile_nearest_rank(&values, percentile)
}

/// Recover north/east series from two horizontals with known azimuths.
///
/// The pair must be orthogonal within `tolerance_deg`; silently projecting
/// skewed components would produce a component of undefined orientation, so
/// the mismatch is an error instead.
pub fn to_north_east(
    h1: &[f64],
    azimuth1_deg: f64,
    h2: &[f64],
    azimuth2_deg: f64,
    tolerance_deg: f64,
) -> Result<(Vec<f64>, Vec<f64>), SmError> {
    let span = (azimuth2_deg - azimuth1_deg).rem_euclid(180.0);
    if (span - 90.0).abs() > tolerance_deg {
        return Err(SmError::Validation {
            msg: format!(
                "horizontal azimuths {} and {} are not orthogonal within {} degrees",
                azimuth1_deg, azimuth2_deg, tolerance_deg
            ),
        });
    }
    let (s1, c1) = azimuth1_deg.to_radians().sin_cos();
    let (s2, c2) = azimuth2_deg.to_radians().sin_cos();
    let north = h1
        .iter()
        .zip(h2)
        .map(|(&a, &b)| a * c1 + b * c2)
        .collect();
    let east = h1
        .iter()
        .zip(h2)
        .map(|(&a, &b)| a * s1 + b * s2)
        .collect();
    Ok((north, east))
}

/// Rotate north/east series into radial and transverse components for a
/// given back-azimuth (station-to-event azimuth, degrees).
pub fn rotate_ne_to_rt(north: &[f64], east: &[f64], back_azimuth_deg: f64) -> (Vec<f64>, Vec<f64>) {
    let (sb, cb) = back_azimuth_deg.to_radians().sin_cos();
    let radial = north
        .iter()
        .zip(east)
        .map(|(&n, &e)| -n * cb - e * sb)
        .collect();
    let transverse = north
        .iter()
        .zip(east)
        .map(|(&n, &e)| n * sb - e * cb)
        .collect();
    (radial, transverse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(data: &[f64]) -> f64 {
        data.iter().fold(0.0f64, |m, &x| m.max(x.abs()))
    }

    #[test]
    fn rotation_identities() {
        let h1 = vec![1.0, 2.0, -3.0];
        let h2 = vec![0.5, -1.0, 4.0];
        assert_eq!(rotate(&h1, &h2, 0.0), h1);
        let at_90 = rotate(&h1, &h2, 90.0);
        for (a, b) in at_90.iter().zip(&h2) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn rotd100_is_the_maximum_over_angles() {
        let n = 400;
        let h1: Vec<f64> = (0..n).map(|i| (i as f64 * 0.11).sin()).collect();
        let h2: Vec<f64> = (0..n).map(|i| (i as f64 * 0.07).cos()).collect();
        let r100 = rotd(&h1, &h2, 100.0, peak);
        let max = (0..180)
            .map(|a| peak(&rotate(&h1, &h2, a as f64)))
            .fold(0.0f64, f64::max);
        assert!((r100 - max).abs() < 1e-12);
        let r50 = rotd(&h1, &h2, 50.0, peak);
        assert!(r50 <= r100);
    }

    #[test]
    fn rotd50_is_the_90th_ordered_value() {
        let n = 256;
        let h1: Vec<f64> = (0..n).map(|i| (i as f64 * 0.13).sin()).collect();
        let h2: Vec<f64> = (0..n).map(|i| (i as f64 * 0.05).sin()).collect();
        let mut values: Vec<f64> = (0..180)
            .map(|a| peak(&rotate(&h1, &h2, a as f64)))
            .collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(rotd(&h1, &h2, 50.0, peak), values[89]);
    }

    #[test]
    fn gmrotd_is_period_90_in_angle() {
        let n = 128;
        let h1: Vec<f64> = (0..n).map(|i| (i as f64 * 0.21).sin()).collect();
        let h2: Vec<f64> = (0..n).map(|i| (i as f64 * 0.09).cos()).collect();
        // The geometric mean of a pair is unchanged when the pair swaps.
        let a0 = {
            let a = peak(&rotate(&h1, &h2, 10.0));
            let b = peak(&rotate(&h1, &h2, 100.0));
            (a * b).sqrt()
        };
        let a90 = {
            let a = peak(&rotate(&h1, &h2, 100.0));
            let b = peak(&rotate(&h1, &h2, 190.0));
            (a * b).sqrt()
        };
        assert!((a0 - a90).abs() < 1e-9);
        let g = gmrotd(&h1, &h2, 100.0, peak);
        assert!(g > 0.0);
    }

    #[test]
    fn north_east_recovery() {
        // h1 points north, h2 east: recovery is the identity.
        let h1 = vec![1.0, 0.0, 2.0];
        let h2 = vec![0.0, 3.0, -1.0];
        let (n, e) = to_north_east(&h1, 0.0, &h2, 90.0, 1.0).unwrap();
        for (a, b) in n.iter().zip(&h1) {
            assert!((a - b).abs() < 1e-12);
        }
        for (a, b) in e.iter().zip(&h2) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn skewed_pair_rejected() {
        let h = vec![0.0; 8];
        let err = to_north_east(&h, 88.0, &h, 180.0, 1.0).unwrap_err();
        assert!(matches!(err, SmError::Validation { .. }));
        // An explicit tolerance admits the same pair.
        assert!(to_north_east(&h, 88.0, &h, 180.0, 3.0).is_ok());
    }

    #[test]
    fn radial_points_away_from_source() {
        // Pure northward motion with the event due north of the station
        // (back-azimuth 0): radial is the negated north, transverse zero.
        let north = vec![1.0, -2.0];
        let east = vec![0.0, 0.0];
        let (r, t) = rotate_ne_to_rt(&north, &east, 0.0);
        assert!((r[0] + 1.0).abs() < 1e-12);
        assert!((r[1] - 2.0).abs() < 1e-12);
        assert!(t[0].abs() < 1e-12);
    }
}
