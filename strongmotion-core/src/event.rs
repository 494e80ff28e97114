//! The earthquake a set of records belongs to.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hypocenter and magnitude of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Catalog id, e.g. `ci3144585`.
    pub id: String,
    /// Origin time.
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub magnitude: f64,
    /// Magnitude type, e.g. `Mw`, when the catalog declares one.
    pub magnitude_type: Option<String>,
}

impl Event {
    /// Epicentral distance to a site in kilometers.
    pub fn epicentral_distance_km(&self, latitude: f64, longitude: f64) -> f64 {
        crate::geo::great_circle_km(self.latitude, self.longitude, latitude, longitude)
    }

    /// Hypocentral distance to a surface site in kilometers.
    pub fn hypocentral_distance_km(&self, latitude: f64, longitude: f64) -> f64 {
        let epi = self.epicentral_distance_km(latitude, longitude);
        (epi * epi + self.depth_km * self.depth_km).sqrt()
    }
}
