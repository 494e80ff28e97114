//! Great-circle geometry helpers shared by duplicate resolution and the
//! station-metrics computations.

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometers (haversine).
pub fn great_circle_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

/// Azimuth from point 1 to point 2 in degrees clockwise from north,
/// normalized to `[0, 360)`.
pub fn azimuth_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    let az = y.atan2(x).to_degrees();
    (az + 360.0) % 360.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance() {
        assert!(great_circle_km(34.0, -118.0, 34.0, -118.0) < 1e-9);
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = great_circle_km(0.0, 0.0, 1.0, 0.0);
        // One degree of latitude is about 111.2 km on the sphere.
        assert!((d - 111.19).abs() < 0.1);
    }

    #[test]
    fn cardinal_azimuths() {
        assert!((azimuth_deg(0.0, 0.0, 1.0, 0.0) - 0.0).abs() < 1e-9);
        assert!((azimuth_deg(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-9);
        assert!((azimuth_deg(1.0, 0.0, 0.0, 0.0) - 180.0).abs() < 1e-9);
    }
}
