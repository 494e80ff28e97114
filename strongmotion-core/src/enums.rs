//! This contains the enums shared by the trace containers and the processing
//! configuration.
//!
//! Strong-motion records move through a small set of well-known physical
//! units and processing levels, which lends itself well to being represented
//! by enums. As a general rule enums that come from numeric codes in source
//! files (such as the process level) have fixed numerical values and return
//! an error when an invalid value is found; enums that come from the
//! configuration parse from their lowercase string form.
use num::FromPrimitive;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::errors::*;

/// Physical units of a trace data vector.
///
/// The recognized set covers raw counts and the acceleration, velocity and
/// displacement units produced by instrument-response removal and
/// integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Units {
    /// Raw digitizer counts.
    #[serde(rename = "counts")]
    Counts,
    /// Acceleration in cm/s/s.
    #[serde(rename = "cm/s/s")]
    CmPerSecSquared,
    /// Velocity in cm/s.
    #[serde(rename = "cm/s")]
    CmPerSec,
    /// Displacement in cm.
    #[serde(rename = "cm")]
    Cm,
    /// Acceleration as a percentage of gravity.
    #[serde(rename = "%g")]
    PercentG,
    /// Acceleration in m/s/s.
    #[serde(rename = "m/s/s")]
    MPerSecSquared,
}

impl Units {
    /// Parse the string form used in file headers and configuration.
    /// ```
    /// use strongmotion_core::enums::Units;
    /// assert_eq!(Units::new("cm/s/s").unwrap(), Units::CmPerSecSquared);
    /// assert_eq!(Units::new("%g").unwrap(), Units::PercentG);
    /// assert!(Units::new("furlongs").is_err());
    /// ```
    pub fn new(s: &str) -> Result<Self, SmError> {
        match s {
            "counts" => Ok(Units::Counts),
            "cm/s/s" | "cm/s^2" => Ok(Units::CmPerSecSquared),
            "cm/s" => Ok(Units::CmPerSec),
            "cm" => Ok(Units::Cm),
            "%g" => Ok(Units::PercentG),
            "m/s/s" | "m/s^2" => Ok(Units::MPerSecSquared),
            _ => Err(SmError::ParseEnum {
                f: "Units".to_string(),
                code: s.to_string(),
            }),
        }
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Counts => "counts",
            Units::CmPerSecSquared => "cm/s/s",
            Units::CmPerSec => "cm/s",
            Units::Cm => "cm",
            Units::PercentG => "%g",
            Units::MPerSecSquared => "m/s/s",
        }
    }

    /// Is this one of the acceleration units?
    pub fn is_acceleration(&self) -> bool {
        matches!(
            self,
            Units::CmPerSecSquared | Units::PercentG | Units::MPerSecSquared
        )
    }
}

impl std::fmt::Display for Units {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "{}", self.as_str())
    }
}

/// Processing level of a record as declared by the producing data center.
///
/// `V0` is raw counts, `V1` is unprocessed physical units, `V2` is processed
/// (filtered and baseline-corrected) data.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize,
)]
pub enum ProcessLevel {
    V0 = 0,
    V1 = 1,
    V2 = 2,
}

impl ProcessLevel {
    /// Create a process level from its numeric code.
    /// ```
    /// use strongmotion_core::enums::ProcessLevel;
    /// assert_eq!(ProcessLevel::new(1).unwrap(), ProcessLevel::V1);
    /// assert!(ProcessLevel::new(7).is_err());
    /// ```
    pub fn new(code: u16) -> Result<Self, SmError> {
        Self::from_u16(code).ok_or(SmError::ParseEnum {
            f: "ProcessLevel".to_string(),
            code: code.to_string(),
        })
    }

    /// Parse the `"V0"`/`"V1"`/`"V2"` tag form.
    pub fn from_tag(tag: &str) -> Result<Self, SmError> {
        match tag {
            "V0" => Ok(ProcessLevel::V0),
            "V1" => Ok(ProcessLevel::V1),
            "V2" => Ok(ProcessLevel::V2),
            _ => Err(SmError::ParseEnum {
                f: "ProcessLevel".to_string(),
                code: tag.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessLevel::V0 => "V0",
            ProcessLevel::V1 => "V1",
            ProcessLevel::V2 => "V2",
        }
    }
}

/// Which side of the trace a taper is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaperSide {
    Both,
    Left,
    Right,
}

/// Spacing of a generated period or frequency grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spacing {
    Lin,
    Log,
}

/// How the end of the signal window is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalEndMethod {
    /// Duration-model mean plus `epsilon` standard deviations.
    Model,
    /// `origin_time + distance / vmin`.
    Velocity,
    /// Magnitude-scaled fixed durations.
    Magnitude,
    /// Keep everything to the end of the record.
    None,
}

/// Detrending baseline family understood by the `detrend` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetrendMethod {
    /// Remove the mean.
    Constant,
    /// Alias of `constant` kept for configuration compatibility.
    Demean,
    /// Remove a least-squares line.
    Linear,
    /// Remove a least-squares polynomial of configured order.
    Polynomial,
    /// Remove a natural cubic spline through evenly spaced knots.
    Spline,
    /// Remove a baseline fitted to the pre-event window only.
    Pre,
    /// Sixth-order displacement-domain polynomial correction.
    BaselineSixthOrder,
}

impl DetrendMethod {
    /// Parse the configuration tag form.
    pub fn new(tag: &str) -> Result<Self, SmError> {
        match tag {
            "constant" => Ok(DetrendMethod::Constant),
            "demean" => Ok(DetrendMethod::Demean),
            "linear" => Ok(DetrendMethod::Linear),
            "polynomial" => Ok(DetrendMethod::Polynomial),
            "spline" => Ok(DetrendMethod::Spline),
            "pre" => Ok(DetrendMethod::Pre),
            "baseline_sixth_order" => Ok(DetrendMethod::BaselineSixthOrder),
            _ => Err(SmError::ParseEnum {
                f: "DetrendMethod".to_string(),
                code: tag.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units_round_trip() {
        for tag in ["counts", "cm/s/s", "cm/s", "cm", "%g", "m/s/s"] {
            assert_eq!(Units::new(tag).unwrap().as_str(), tag);
        }
        assert!(Units::new("g").is_err());
    }

    #[test]
    fn units_acceleration() {
        assert!(Units::CmPerSecSquared.is_acceleration());
        assert!(Units::PercentG.is_acceleration());
        assert!(!Units::CmPerSec.is_acceleration());
        assert!(!Units::Counts.is_acceleration());
    }

    #[test]
    fn process_level_new() {
        assert_eq!(ProcessLevel::new(0).unwrap(), ProcessLevel::V0);
        assert_eq!(ProcessLevel::new(1).unwrap(), ProcessLevel::V1);
        assert_eq!(ProcessLevel::new(2).unwrap(), ProcessLevel::V2);
        assert!(ProcessLevel::new(3).is_err());
    }

    #[test]
    fn process_level_tags() {
        assert_eq!(ProcessLevel::from_tag("V2").unwrap(), ProcessLevel::V2);
        assert_eq!(ProcessLevel::from_tag("V2").unwrap().as_str(), "V2");
        assert!(ProcessLevel::from_tag("v2").is_err());
    }

    #[test]
    fn spacing_from_yaml() {
        let s: Spacing = serde_yaml::from_str("log").unwrap();
        assert_eq!(s, Spacing::Log);
        let s: SignalEndMethod = serde_yaml::from_str("velocity").unwrap();
        assert_eq!(s, SignalEndMethod::Velocity);
    }
}
