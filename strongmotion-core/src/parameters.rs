//! Typed parameter bags attached to traces and streams.
//!
//! Processing steps leave scratch results behind for later steps and for the
//! workspace container: the signal/noise split time, selected corner
//! frequencies, baseline polynomial coefficients and so on. Rather than a
//! stringly-typed map, each recorded kind is a tagged variant keyed by
//! [`ParamKey`], so a step asking for corner frequencies either gets corner
//! frequencies or a [`crate::errors::SmError::MissingParameter`].
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::errors::SmError;

/// Key of one recorded parameter kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKey {
    SignalSplit,
    SignalEnd,
    SnrConf,
    CornerFrequencies,
    BaselineCoefs,
    BruneFit,
    ReviewStatus,
}

impl ParamKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKey::SignalSplit => "signal_split",
            ParamKey::SignalEnd => "signal_end",
            ParamKey::SnrConf => "snr_conf",
            ParamKey::CornerFrequencies => "corner_frequencies",
            ParamKey::BaselineCoefs => "baseline_coefs",
            ParamKey::BruneFit => "brune_fit",
            ParamKey::ReviewStatus => "review_status",
        }
    }
}

/// One recorded parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Param {
    /// Where the record splits into noise and signal windows.
    SignalSplit {
        split_time: DateTime<Utc>,
        /// Name of the picker that produced the split.
        picker: String,
    },
    /// Where the signal window ends.
    SignalEnd {
        end_time: DateTime<Utc>,
        method: String,
    },
    /// The SNR acceptance band and threshold the record was checked against.
    SnrConf {
        threshold: f64,
        min_freq: f64,
        max_freq: f64,
    },
    /// Selected filter passband.
    CornerFrequencies {
        highpass: f64,
        lowpass: f64,
        method: String,
    },
    /// Displacement-domain baseline polynomial coefficients, constant and
    /// linear terms first (always zero) and rising powers after.
    BaselineCoefs { coefs: Vec<f64> },
    /// Brune source-spectrum fit of the displacement spectrum.
    BruneFit {
        /// Low-frequency plateau in cm·s.
        omega0: f64,
        /// Corner frequency in Hz.
        corner_frequency: f64,
        /// Seismic moment in dyne·cm implied by the plateau.
        moment: f64,
        /// Brune stress drop in bars.
        stress_drop: f64,
        /// RMS log-amplitude residual of the fit.
        misfit: f64,
    },
    /// Manual review marker.
    ReviewStatus { accepted: bool, comment: String },
}

impl Param {
    /// The key this variant is stored under.
    pub fn key(&self) -> ParamKey {
        match self {
            Param::SignalSplit { .. } => ParamKey::SignalSplit,
            Param::SignalEnd { .. } => ParamKey::SignalEnd,
            Param::SnrConf { .. } => ParamKey::SnrConf,
            Param::CornerFrequencies { .. } => ParamKey::CornerFrequencies,
            Param::BaselineCoefs { .. } => ParamKey::BaselineCoefs,
            Param::BruneFit { .. } => ParamKey::BruneFit,
            Param::ReviewStatus { .. } => ParamKey::ReviewStatus,
        }
    }
}

/// The parameter bag itself.
///
/// Insertion is keyed by the variant's own key, so a bag can never hold a
/// value filed under the wrong kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamMap {
    entries: FnvHashMap<ParamKey, Param>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a parameter, replacing any previous value of the same kind.
    pub fn set(&mut self, value: Param) {
        self.entries.insert(value.key(), value);
    }

    pub fn get(&self, key: ParamKey) -> Option<&Param> {
        self.entries.get(&key)
    }

    /// Like [`Self::get`] but a missing key is an error, for steps that
    /// cannot proceed without their precondition.
    pub fn require(&self, key: ParamKey) -> Result<&Param, SmError> {
        self.entries.get(&key).ok_or_else(|| SmError::MissingParameter {
            key: key.as_str().to_string(),
        })
    }

    pub fn contains(&self, key: ParamKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &Param)> {
        self.entries.iter()
    }

    /// The selected passband, if `get_corner_frequencies` has run.
    pub fn corner_frequencies(&self) -> Option<(f64, f64)> {
        match self.get(ParamKey::CornerFrequencies) {
            Some(Param::CornerFrequencies { highpass, lowpass, .. }) => {
                Some((*highpass, *lowpass))
            }
            _ => None,
        }
    }

    /// The noise/signal split time, if windowing has run.
    pub fn split_time(&self) -> Option<DateTime<Utc>> {
        match self.get(ParamKey::SignalSplit) {
            Some(Param::SignalSplit { split_time, .. }) => Some(*split_time),
            _ => None,
        }
    }

    /// The signal end time, if windowing has run.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        match self.get(ParamKey::SignalEnd) {
            Some(Param::SignalEnd { end_time, .. }) => Some(*end_time),
            _ => None,
        }
    }

    /// Serialize the whole bag as the JSON blob stored in the workspace.
    pub fn to_json(&self) -> Result<String, SmError> {
        Ok(serde_json::to_string(&self)?)
    }

    /// Rebuild a bag from its workspace JSON blob.
    pub fn from_json(json: &str) -> Result<Self, SmError> {
        Ok(serde_json::from_str(json)?)
    }
}
