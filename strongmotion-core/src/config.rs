//! The layered configuration.
//!
//! A built-in default document is embedded in the library; any `.yml` or
//! `.yaml` file found in a user configuration directory is deep-merged over
//! it in file-name order (mappings merge recursively, scalars and sequences
//! replace), and the merged document deserializes into the typed structures
//! here. Everything is read-only after load and passed down the pipeline
//! explicitly.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::Value;

use crate::enums::{SignalEndMethod, Spacing};
use crate::errors::SmError;

const DEFAULT_CONFIG: &str = include_str!("default_config.yml");

/// Identity recorded in the provenance of every artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConf {
    pub name: String,
    pub email: String,
}

/// Reader-facade behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConf {
    /// Directory of `network.station.xml` files overriding per-file station
    /// metadata.
    pub metadata_directory: Option<PathBuf>,
    /// Target rate for the `resample` step, when set.
    pub resample_rate: Option<f64>,
    pub sac_conversion_factor: Option<f64>,
    pub sac_source: Option<String>,
    pub use_streamcollection: bool,
    /// Channel-id globs excluded at assembly.
    pub exclude_patterns: Vec<String>,
}

impl Default for ReadConf {
    fn default() -> Self {
        Self {
            metadata_directory: None,
            resample_rate: None,
            sac_conversion_factor: None,
            sac_source: None,
            use_streamcollection: true,
            exclude_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConf {
    pub signal_end: SignalEndConf,
    pub window_checks: WindowChecksConf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalEndConf {
    pub method: SignalEndMethod,
    /// Assumed slowest wave speed, km/s, for the `velocity` method.
    pub vmin: f64,
    /// Hard floor on the signal window length in seconds.
    pub floor: f64,
    /// Duration model name for the `model` method.
    pub model: String,
    /// Number of standard deviations added to the model mean.
    pub epsilon: f64,
}

impl Default for SignalEndConf {
    fn default() -> Self {
        Self {
            method: SignalEndMethod::Model,
            vmin: 1.0,
            floor: 120.0,
            model: "default".to_string(),
            epsilon: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowChecksConf {
    pub enabled: bool,
    pub min_noise_duration: f64,
    pub min_signal_duration: f64,
}

impl Default for WindowChecksConf {
    fn default() -> Self {
        Self {
            enabled: true,
            min_noise_duration: 0.5,
            min_signal_duration: 5.0,
        }
    }
}

/// One entry of the ordered processing pipeline: a step name and its
/// free-form argument mapping.
///
/// In YAML each entry is either a single-key mapping or a bare step name:
/// ```yaml
/// processing:
///   - detrend:
///       detrending_method: linear
///   - fit_spectra
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StepConf {
    pub name: String,
    pub args: Value,
}

impl StepConf {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Value::Null,
        }
    }

    fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    pub fn arg_f64(&self, key: &str) -> Option<f64> {
        self.arg(key).and_then(Value::as_f64)
    }

    pub fn arg_usize(&self, key: &str) -> Option<usize> {
        self.arg(key).and_then(Value::as_u64).map(|v| v as usize)
    }

    pub fn arg_bool(&self, key: &str) -> Option<bool> {
        self.arg(key).and_then(Value::as_bool)
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arg(key).and_then(Value::as_str)
    }

    /// A nested argument mapping, e.g. the `snr:` block of
    /// `get_corner_frequencies`.
    pub fn arg_map(&self, key: &str) -> Option<&Value> {
        self.arg(key).filter(|v| v.is_mapping())
    }

    /// Missing required arguments are configuration errors.
    pub fn require_f64(&self, key: &str) -> Result<f64, SmError> {
        self.arg_f64(key).ok_or_else(|| SmError::Config {
            msg: format!("step {} requires numeric argument {:?}", self.name, key),
        })
    }

    pub fn require_str(&self, key: &str) -> Result<&str, SmError> {
        self.arg_str(key).ok_or_else(|| SmError::Config {
            msg: format!("step {} requires string argument {:?}", self.name, key),
        })
    }
}

impl Serialize for StepConf {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.args)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for StepConf {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawStep {
            Name(String),
            Map(BTreeMap<String, Value>),
        }
        match RawStep::deserialize(deserializer)? {
            RawStep::Name(name) => Ok(StepConf {
                name,
                args: Value::Null,
            }),
            RawStep::Map(map) => {
                if map.len() != 1 {
                    return Err(serde::de::Error::custom(
                        "each processing entry must name exactly one step",
                    ));
                }
                let (name, args) = map.into_iter().next().expect("len checked above");
                Ok(StepConf { name, args })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColocatedConf {
    /// Channel globs in preference order; of several instruments at one
    /// station only the first match is retained.
    pub preference: Vec<String>,
}

impl Default for ColocatedConf {
    fn default() -> Self {
        Self {
            preference: ["HN?", "BN?", "HH?", "BH?"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConf {
    /// Two same-named channels within this many meters are duplicates even
    /// across network codes.
    pub max_dist_tolerance: f64,
    /// Order in which the preference keys below are consulted.
    pub preference_order: Vec<String>,
    pub process_level_preference: Vec<String>,
    pub format_preference: Vec<String>,
}

impl Default for DuplicateConf {
    fn default() -> Self {
        Self {
            max_dist_tolerance: 500.0,
            preference_order: [
                "process_level",
                "source_format",
                "starttime",
                "npts",
                "sampling_rate",
                "location_code",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            process_level_preference: ["V1", "V0", "V2"].iter().map(|s| s.to_string()).collect(),
            format_preference: ["cosmos", "dmg"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodsConf {
    pub start: f64,
    pub stop: f64,
    pub num: usize,
    pub spacing: Spacing,
    /// When true, only `defined_periods` is used.
    pub use_array: bool,
    pub defined_periods: Vec<f64>,
}

impl Default for PeriodsConf {
    fn default() -> Self {
        Self {
            start: 0.1,
            stop: 10.0,
            num: 25,
            spacing: Spacing::Log,
            use_array: false,
            defined_periods: vec![0.3, 1.0, 3.0],
        }
    }
}

impl PeriodsConf {
    /// The period set this block describes: the explicit array, the
    /// generated grid, or their union.
    pub fn periods(&self) -> Vec<f64> {
        let mut out = Vec::new();
        if self.use_array {
            out.extend_from_slice(&self.defined_periods);
        } else {
            if self.num == 1 {
                out.push(self.start);
            } else {
                for i in 0..self.num {
                    let frac = i as f64 / (self.num as f64 - 1.0);
                    let value = match self.spacing {
                        Spacing::Lin => self.start + frac * (self.stop - self.start),
                        Spacing::Log => {
                            10f64.powf(
                                self.start.log10() + frac * (self.stop.log10() - self.start.log10()),
                            )
                        }
                    };
                    out.push(value);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaConf {
    /// Fraction of critical damping.
    pub damping: f64,
    pub periods: PeriodsConf,
}

impl Default for SaConf {
    fn default() -> Self {
        Self {
            damping: 0.05,
            periods: PeriodsConf::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FasConf {
    pub smoothing: String,
    /// Konno-Ohmachi bandwidth `b`.
    pub bandwidth: f64,
    /// When false, zero-weight target frequencies yield 0 instead of NaN.
    pub allow_nans: bool,
    pub periods: PeriodsConf,
}

impl Default for FasConf {
    fn default() -> Self {
        Self {
            smoothing: "konno_ohmachi".to_string(),
            bandwidth: 20.0,
            allow_nans: true,
            periods: PeriodsConf {
                use_array: true,
                ..PeriodsConf::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationConf {
    /// Cumulative-Arias percentile intervals, `"5-75"` form.
    pub intervals: Vec<String>,
}

impl Default for DurationConf {
    fn default() -> Self {
        Self {
            intervals: vec!["5-75".to_string(), "5-95".to_string()],
        }
    }
}

/// Parse a `"5-75"` interval into its percentile bounds.
pub fn parse_interval(text: &str) -> Result<(f64, f64), SmError> {
    let mut parts = text.splitn(2, '-');
    let parse = |part: Option<&str>| -> Result<f64, SmError> {
        part.and_then(|p| p.trim().parse::<f64>().ok())
            .ok_or_else(|| SmError::Config {
                msg: format!("bad duration interval {:?}; expected \"LO-HI\"", text),
            })
    };
    let lo = parse(parts.next())?;
    let hi = parse(parts.next())?;
    if !(0.0..=100.0).contains(&lo) || !(0.0..=100.0).contains(&hi) || lo >= hi {
        return Err(SmError::Config {
            msg: format!("bad duration interval {:?}; bounds must satisfy 0 <= LO < HI <= 100", text),
        });
    }
    Ok((lo, hi))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vs30Conf {
    pub file: PathBuf,
    pub column_header: String,
    pub readme_entry: String,
    pub units: String,
}

impl Default for Vs30Conf {
    fn default() -> Self {
        Self {
            file: PathBuf::new(),
            column_header: "vs30".to_string(),
            readme_entry: String::new(),
            units: "m/s".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConf {
    pub output_imcs: Vec<String>,
    pub output_imts: Vec<String>,
    pub sa: SaConf,
    pub fas: FasConf,
    pub duration: DurationConf,
    pub vs30: BTreeMap<String, Vs30Conf>,
    /// Degrees by which the two horizontals may deviate from orthogonality
    /// before the radial/transverse combination is refused. Unset means
    /// strictly orthogonal input is required.
    pub radial_transverse_tolerance: Option<f64>,
}

impl Default for MetricsConf {
    fn default() -> Self {
        Self {
            output_imcs: ["channels", "greater_of_two_horizontals", "rotd50"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            output_imts: ["pga", "pgv", "sa", "duration"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            sa: SaConf::default(),
            fas: FasConf::default(),
            duration: DurationConf::default(),
            vs30: BTreeMap::new(),
            radial_transverse_tolerance: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityLayer {
    pub max_depth_km: f64,
    pub vp_km_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelTimeConf {
    /// 1-D velocity model, shallowest layer first.
    pub layers: Vec<VelocityLayer>,
}

impl Default for TravelTimeConf {
    fn default() -> Self {
        Self {
            layers: vec![
                VelocityLayer {
                    max_depth_km: 20.0,
                    vp_km_s: 6.1,
                },
                VelocityLayer {
                    max_depth_km: 40.0,
                    vp_km_s: 7.0,
                },
                VelocityLayer {
                    max_depth_km: 6400.0,
                    vp_km_s: 8.1,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArConf {
    /// Autoregressive model order.
    pub order: usize,
    /// Seconds of leading record the model is trained on.
    pub learning_window: f64,
    /// Prediction-error ratio that declares an onset.
    pub threshold: f64,
}

impl Default for ArConf {
    fn default() -> Self {
        Self {
            order: 4,
            learning_window: 10.0,
            threshold: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaLtaConf {
    pub sta_length: f64,
    pub lta_length: f64,
    pub threshold: f64,
}

impl Default for StaLtaConf {
    fn default() -> Self {
        Self {
            sta_length: 1.0,
            lta_length: 20.0,
            threshold: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickersConf {
    /// Seconds added to the chosen pick; negative values guard against
    /// late-arrival bias.
    pub p_arrival_shift: f64,
    pub travel_time: TravelTimeConf,
    pub ar: ArConf,
    pub stalta: StaLtaConf,
}

impl Default for PickersConf {
    fn default() -> Self {
        Self {
            p_arrival_shift: -1.0,
            travel_time: TravelTimeConf::default(),
            ar: ArConf::default(),
            stalta: StaLtaConf::default(),
        }
    }
}

/// The merged configuration passed down the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub user: UserConf,
    /// Fetcher blocks are accepted so shared configuration files parse, but
    /// fetchers themselves live outside this system.
    pub fetchers: Value,
    pub read: ReadConf,
    pub windows: WindowsConf,
    pub processing: Vec<StepConf>,
    pub colocated: ColocatedConf,
    pub duplicate: DuplicateConf,
    pub metrics: MetricsConf,
    pub pickers: PickersConf,
}

impl Default for Config {
    fn default() -> Self {
        Self::builtin().expect("the built-in configuration document parses")
    }
}

fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

impl Config {
    /// The embedded default configuration, with no user layers applied.
    pub fn builtin() -> Result<Self, SmError> {
        let cfg: Config = serde_yaml::from_str(DEFAULT_CONFIG)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load the layered configuration: the built-in document with every
    /// `.yml`/`.yaml` file of `dir` (in file-name order) deep-merged over it.
    pub fn load(dir: Option<&Path>) -> Result<Self, SmError> {
        let mut merged: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        if let Some(dir) = dir {
            let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    matches!(
                        path.extension().and_then(|e| e.to_str()),
                        Some("yml") | Some("yaml")
                    )
                })
                .collect();
            paths.sort();
            for path in paths {
                let text = std::fs::read_to_string(&path)?;
                let overlay: Value = serde_yaml::from_str(&text)?;
                deep_merge(&mut merged, overlay);
            }
        }
        let cfg: Config = serde_yaml::from_value(merged)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Structural validation run before any processing begins. Step-name
    /// resolution happens where the step registry lives; everything checked
    /// here is independent of the registry.
    pub fn validate(&self) -> Result<(), SmError> {
        if !(0.0..1.0).contains(&self.metrics.sa.damping) || self.metrics.sa.damping <= 0.0 {
            return Err(SmError::Config {
                msg: format!(
                    "sa damping must be a fraction of critical in (0, 1), got {}",
                    self.metrics.sa.damping
                ),
            });
        }
        if self.metrics.fas.bandwidth <= 0.0 {
            return Err(SmError::Config {
                msg: format!(
                    "fas bandwidth must be positive, got {}",
                    self.metrics.fas.bandwidth
                ),
            });
        }
        for block in [&self.metrics.sa.periods, &self.metrics.fas.periods] {
            if block.use_array {
                if block.defined_periods.is_empty() {
                    return Err(SmError::Config {
                        msg: "periods.use_array is set but defined_periods is empty".to_string(),
                    });
                }
            } else if block.num == 0 || block.start <= 0.0 || block.stop <= block.start {
                return Err(SmError::Config {
                    msg: format!(
                        "bad period grid: start {}, stop {}, num {}",
                        block.start, block.stop, block.num
                    ),
                });
            }
        }
        for interval in &self.metrics.duration.intervals {
            parse_interval(interval)?;
        }
        if self.windows.signal_end.vmin <= 0.0 {
            return Err(SmError::Config {
                msg: format!(
                    "signal_end vmin must be positive, got {}",
                    self.windows.signal_end.vmin
                ),
            });
        }
        if self.pickers.travel_time.layers.is_empty() {
            return Err(SmError::Config {
                msg: "travel_time velocity model needs at least one layer".to_string(),
            });
        }
        for step in &self.processing {
            if step.name.is_empty() {
                return Err(SmError::Config {
                    msg: "processing entry with an empty step name".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_parses_and_validates() {
        let cfg = Config::builtin().unwrap();
        assert!(!cfg.processing.is_empty());
        assert_eq!(cfg.processing[0].name, "check_stream");
        assert_eq!(cfg.metrics.sa.damping, 0.05);
        assert_eq!(cfg.duplicate.process_level_preference, ["V1", "V0", "V2"]);
    }

    #[test]
    fn step_args_accessors() {
        let cfg = Config::builtin().unwrap();
        let snr_check = cfg
            .processing
            .iter()
            .find(|s| s.name == "snr_check")
            .unwrap();
        assert_eq!(snr_check.arg_f64("threshold"), Some(3.0));
        assert_eq!(snr_check.arg_f64("missing"), None);
        assert!(snr_check.require_f64("min_freq").is_ok());
        assert!(snr_check.require_f64("missing").is_err());
    }

    #[test]
    fn bare_step_name_parses() {
        let steps: Vec<StepConf> = serde_yaml::from_str("[fit_spectra]").unwrap();
        assert_eq!(steps[0].name, "fit_spectra");
        assert!(steps[0].args.is_null());
    }

    #[test]
    fn layered_merge_overrides_scalars() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("10_site.yml"),
            "metrics:\n  sa:\n    damping: 0.1\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("20_user.yaml"), "user:\n  name: Test\n").unwrap();
        let cfg = Config::load(Some(dir.path())).unwrap();
        assert_eq!(cfg.metrics.sa.damping, 0.1);
        assert_eq!(cfg.user.name, "Test");
        // Untouched keys keep their built-in values.
        assert_eq!(cfg.windows.signal_end.floor, 120.0);
    }

    #[test]
    fn sequences_replace_rather_than_merge() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pipeline.yml"),
            "processing:\n  - detrend:\n      detrending_method: linear\n",
        )
        .unwrap();
        let cfg = Config::load(Some(dir.path())).unwrap();
        assert_eq!(cfg.processing.len(), 1);
        assert_eq!(cfg.processing[0].name, "detrend");
    }

    #[test]
    fn invalid_damping_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.yml"), "metrics:\n  sa:\n    damping: 5.0\n").unwrap();
        let err = Config::load(Some(dir.path())).unwrap_err();
        assert!(matches!(err, SmError::Config { .. }));
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(parse_interval("5-75").unwrap(), (5.0, 75.0));
        assert_eq!(parse_interval("5-95").unwrap(), (5.0, 95.0));
        assert!(parse_interval("95-5").is_err());
        assert!(parse_interval("fivepct").is_err());
    }

    #[test]
    fn period_grids() {
        let lin = PeriodsConf {
            start: 1.0,
            stop: 3.0,
            num: 3,
            spacing: Spacing::Lin,
            use_array: false,
            defined_periods: vec![],
        };
        assert_eq!(lin.periods(), vec![1.0, 2.0, 3.0]);
        let log = PeriodsConf {
            start: 0.1,
            stop: 10.0,
            num: 3,
            spacing: Spacing::Log,
            use_array: false,
            defined_periods: vec![],
        };
        let grid = log.periods();
        assert!((grid[1] - 1.0).abs() < 1e-12);
        let arr = PeriodsConf {
            use_array: true,
            defined_periods: vec![0.3, 1.0],
            ..PeriodsConf::default()
        };
        assert_eq!(arr.periods(), vec![0.3, 1.0]);
    }
}
