//! External StationXML metadata overrides.
//!
//! A configured metadata directory holds `NETWORK.STATION.xml` documents
//! whose site coordinates and channel orientations take precedence over
//! whatever the raw files declared.
use std::collections::HashMap;
use std::path::Path;

use log::warn;
use strongmotion_core::errors::SmError;
use strongmotion_core::stationxml::{self, Inventory};
use strongmotion_core::stream::StationStream;
use strongmotion_core::trace::Coordinates;

#[derive(Default)]
pub struct StationOverrides {
    by_station: HashMap<String, Inventory>,
}

impl StationOverrides {
    /// Load every `NETWORK.STATION.xml` in the directory. Files that do not
    /// parse are skipped with a warning; a bad override must not block
    /// assembly of the rest of the event.
    pub fn load(dir: &Path) -> Result<Self, SmError> {
        let mut by_station = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("xml") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read_to_string(&path)
                .map_err(SmError::from)
                .and_then(|text| stationxml::read_from_str(&text))
            {
                Ok(inventory) => {
                    by_station.insert(stem.to_string(), inventory);
                }
                Err(e) => warn!("skipping station metadata {}: {}", path.display(), e),
            }
        }
        Ok(Self { by_station })
    }

    pub fn len(&self) -> usize {
        self.by_station.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_station.is_empty()
    }

    /// Apply any matching override to the stream's traces.
    pub fn apply(&self, stream: &mut StationStream) {
        let key = {
            let header = stream.traces()[0].header();
            format!("{}.{}", header.network, header.station)
        };
        let Some(inventory) = self.by_station.get(&key) else {
            return;
        };
        for trace in stream.traces_mut() {
            let (channel, location) = {
                let h = trace.header();
                (h.channel.clone(), h.location.clone())
            };
            for net in &inventory.networks {
                for sta in &net.stations {
                    for cha in &sta.channels {
                        if cha.code == channel && cha.location_code == location {
                            trace.set_coordinates(Coordinates {
                                latitude: cha.latitude,
                                longitude: cha.longitude,
                                elevation: cha.elevation,
                            });
                            trace.set_orientation(cha.azimuth, cha.dip);
                        }
                    }
                }
            }
        }
    }
}
