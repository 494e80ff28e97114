//! Minimal station inventory model with FDSN StationXML read/write.
//!
//! The subset carried here is what the pipeline and the workspace container
//! actually consume: codes, site coordinates, channel orientation and sample
//! rate, and a sensor description. Full response metadata is the business of
//! external readers.
use serde::{Deserialize, Serialize};

use crate::errors::SmError;

const FDSN_NS: &str = "http://www.fdsn.org/xml/station/1";

/// Format-agnostic inventory: networks of stations of channels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Inventory {
    pub source: String,
    pub networks: Vec<Network>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub code: String,
    pub stations: Vec<Station>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub name: String,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub code: String,
    pub location_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub depth: f64,
    pub azimuth: Option<f64>,
    pub dip: Option<f64>,
    pub sample_rate: f64,
    pub sensor_description: String,
}

impl Inventory {
    /// Fold another inventory into this one, merging on network and station
    /// codes and appending unseen channels. Used to build one station-level
    /// document from per-trace inventories.
    pub fn merge(&mut self, other: Inventory) {
        if self.source.is_empty() {
            self.source = other.source;
        }
        for net in other.networks {
            match self.networks.iter_mut().find(|n| n.code == net.code) {
                None => self.networks.push(net),
                Some(existing) => {
                    for sta in net.stations {
                        match existing.stations.iter_mut().find(|s| s.code == sta.code) {
                            None => existing.stations.push(sta),
                            Some(es) => {
                                for cha in sta.channels {
                                    let seen = es.channels.iter().any(|c| {
                                        c.code == cha.code && c.location_code == cha.location_code
                                    });
                                    if !seen {
                                        es.channels.push(cha);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

// ── XML shape ───────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "FDSNStationXML")]
struct FdsnStationXml {
    #[serde(rename = "@xmlns")]
    xmlns: String,
    #[serde(rename = "@schemaVersion")]
    schema_version: String,
    #[serde(rename = "Source")]
    source: String,
    #[serde(rename = "Network", default)]
    networks: Vec<FdsnNetwork>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FdsnNetwork {
    #[serde(rename = "@code")]
    code: String,
    #[serde(rename = "Station", default)]
    stations: Vec<FdsnStation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FdsnStation {
    #[serde(rename = "@code")]
    code: String,
    #[serde(rename = "Latitude")]
    latitude: f64,
    #[serde(rename = "Longitude")]
    longitude: f64,
    #[serde(rename = "Elevation")]
    elevation: f64,
    #[serde(rename = "Site")]
    site: FdsnSite,
    #[serde(rename = "Channel", default)]
    channels: Vec<FdsnChannel>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct FdsnSite {
    #[serde(rename = "Name", default)]
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FdsnChannel {
    #[serde(rename = "@code")]
    code: String,
    #[serde(rename = "@locationCode")]
    location_code: String,
    #[serde(rename = "Latitude")]
    latitude: f64,
    #[serde(rename = "Longitude")]
    longitude: f64,
    #[serde(rename = "Elevation")]
    elevation: f64,
    #[serde(rename = "Depth")]
    depth: f64,
    #[serde(rename = "Azimuth", skip_serializing_if = "Option::is_none")]
    azimuth: Option<f64>,
    #[serde(rename = "Dip", skip_serializing_if = "Option::is_none")]
    dip: Option<f64>,
    #[serde(rename = "SampleRate")]
    sample_rate: f64,
    #[serde(rename = "Sensor", skip_serializing_if = "Option::is_none")]
    sensor: Option<FdsnSensor>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct FdsnSensor {
    #[serde(rename = "Description", default)]
    description: String,
}

/// Serialize an inventory to an FDSN StationXML string.
pub fn write_to_string(inventory: &Inventory) -> Result<String, SmError> {
    let fdsn = FdsnStationXml {
        xmlns: FDSN_NS.to_string(),
        schema_version: "1.1".to_string(),
        source: if inventory.source.is_empty() {
            "strongmotion".to_string()
        } else {
            inventory.source.clone()
        },
        networks: inventory
            .networks
            .iter()
            .map(|net| FdsnNetwork {
                code: net.code.clone(),
                stations: net
                    .stations
                    .iter()
                    .map(|sta| FdsnStation {
                        code: sta.code.clone(),
                        latitude: sta.latitude,
                        longitude: sta.longitude,
                        elevation: sta.elevation,
                        site: FdsnSite {
                            name: sta.name.clone(),
                        },
                        channels: sta
                            .channels
                            .iter()
                            .map(|cha| FdsnChannel {
                                code: cha.code.clone(),
                                location_code: cha.location_code.clone(),
                                latitude: cha.latitude,
                                longitude: cha.longitude,
                                elevation: cha.elevation,
                                depth: cha.depth,
                                azimuth: cha.azimuth,
                                dip: cha.dip,
                                sample_rate: cha.sample_rate,
                                sensor: if cha.sensor_description.is_empty() {
                                    None
                                } else {
                                    Some(FdsnSensor {
                                        description: cha.sensor_description.clone(),
                                    })
                                },
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
    };
    let body = quick_xml::se::to_string(&fdsn).map_err(|e| SmError::XmlError {
        msg: e.to_string(),
    })?;
    let mut xml = String::with_capacity(body.len() + 40);
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(&body);
    Ok(xml)
}

/// Parse an FDSN StationXML string into the inventory model.
pub fn read_from_str(xml: &str) -> Result<Inventory, SmError> {
    let fdsn: FdsnStationXml = quick_xml::de::from_str(xml).map_err(|e| SmError::XmlError {
        msg: e.to_string(),
    })?;
    Ok(Inventory {
        source: fdsn.source,
        networks: fdsn
            .networks
            .into_iter()
            .map(|net| Network {
                code: net.code,
                stations: net
                    .stations
                    .into_iter()
                    .map(|sta| Station {
                        code: sta.code,
                        latitude: sta.latitude,
                        longitude: sta.longitude,
                        elevation: sta.elevation,
                        name: sta.site.name,
                        channels: sta
                            .channels
                            .into_iter()
                            .map(|cha| Channel {
                                code: cha.code,
                                location_code: cha.location_code,
                                latitude: cha.latitude,
                                longitude: cha.longitude,
                                elevation: cha.elevation,
                                depth: cha.depth,
                                azimuth: cha.azimuth,
                                dip: cha.dip,
                                sample_rate: cha.sample_rate,
                                sensor_description: cha
                                    .sensor
                                    .map(|s| s.description)
                                    .unwrap_or_default(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory() -> Inventory {
        Inventory {
            source: "CESMD".to_string(),
            networks: vec![Network {
                code: "CI".to_string(),
                stations: vec![Station {
                    code: "TOP".to_string(),
                    latitude: 34.084,
                    longitude: -118.599,
                    elevation: 290.0,
                    name: "Topanga Fire Station".to_string(),
                    channels: vec![Channel {
                        code: "HN1".to_string(),
                        location_code: String::new(),
                        latitude: 34.084,
                        longitude: -118.599,
                        elevation: 290.0,
                        depth: 0.0,
                        azimuth: Some(90.0),
                        dip: Some(0.0),
                        sample_rate: 200.0,
                        sensor_description: "Episensor".to_string(),
                    }],
                }],
            }],
        }
    }

    #[test]
    fn xml_round_trip() {
        let inv = inventory();
        let xml = write_to_string(&inv).unwrap();
        assert!(xml.contains("FDSNStationXML"));
        assert!(xml.contains(r#"code="TOP""#));
        let back = read_from_str(&xml).unwrap();
        assert_eq!(inv, back);
    }

    #[test]
    fn merge_appends_channels() {
        let mut inv = inventory();
        let mut other = inventory();
        other.networks[0].stations[0].channels[0].code = "HN2".to_string();
        inv.merge(other);
        assert_eq!(inv.networks.len(), 1);
        assert_eq!(inv.networks[0].stations.len(), 1);
        assert_eq!(inv.networks[0].stations[0].channels.len(), 2);
    }

    #[test]
    fn merge_dedupes_identical_channel() {
        let mut inv = inventory();
        let other = inventory();
        inv.merge(other);
        assert_eq!(inv.networks[0].stations[0].channels.len(), 1);
    }
}
