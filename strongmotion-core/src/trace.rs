//! The single-channel waveform container and its metadata.
use chrono::{DateTime, Duration, Utc};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::{ProcessLevel, Units};
use crate::errors::SmError;
use crate::parameters::{Param, ParamKey, ParamMap};
use crate::provenance::ProvenanceRecord;
use crate::stationxml::{Channel, Inventory, Network, Station};

/// Geographic coordinates of the recording site.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation above sea level in meters.
    pub elevation: f64,
}

/// Enumerated source metadata carried by every trace.
///
/// These fields mirror what strong-motion file headers declare about the
/// instrument and the processing already applied by the data center. Readers
/// fill in what they know; everything has a neutral default so partial
/// headers do not block assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardMetadata {
    /// Producing network or agency, free text.
    pub source: String,
    /// Original file format the record was read from.
    pub source_format: String,
    /// Instrument model.
    pub instrument: String,
    /// Sensor serial number.
    pub sensor_serial_number: String,
    /// Azimuth of the horizontal component in degrees clockwise from north.
    pub horizontal_orientation: Option<f64>,
    /// Dip of the component in degrees down from horizontal.
    pub vertical_orientation: Option<f64>,
    /// Fraction of critical damping of the instrument.
    pub instrument_damping: Option<f64>,
    /// Overall gain converting counts to cm/s/s, when the record is still
    /// in counts.
    pub instrument_sensitivity: Option<f64>,
    /// Natural corner frequency of the instrument in Hz.
    pub corner_frequency: Option<f64>,
    /// Natural period of the instrument in seconds.
    pub instrument_period: Option<f64>,
    /// Declared processing level of the record.
    pub process_level: ProcessLevel,
    /// Units declared by the header, as free text.
    pub units_type: String,
    /// Free-standing structure housing the instrument, when declared.
    pub structure_type: String,
    /// Station name, free text.
    pub station_name: String,
    /// Header comments.
    pub comments: String,
}

impl Default for StandardMetadata {
    fn default() -> Self {
        Self {
            source: String::new(),
            source_format: String::new(),
            instrument: String::new(),
            sensor_serial_number: String::new(),
            horizontal_orientation: None,
            vertical_orientation: None,
            instrument_damping: None,
            instrument_sensitivity: None,
            corner_frequency: None,
            instrument_period: None,
            process_level: ProcessLevel::V0,
            units_type: String::new(),
            structure_type: String::new(),
            station_name: String::new(),
            comments: String::new(),
        }
    }
}

/// Identification, timing and site metadata of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceHeader {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub starttime: DateTime<Utc>,
    /// Sampling rate in Hz. Must be positive.
    pub sampling_rate: f64,
    /// Number of samples. Always equal to the data vector length.
    pub npts: usize,
    /// Physical units of the data vector.
    pub units: Units,
    pub coordinates: Coordinates,
    pub standard: StandardMetadata,
}

impl TraceHeader {
    /// Full SEED-style channel id, `NET.STA.LOC.CHA`.
    pub fn id(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }

    /// The instrument code: channel id with the component letter dropped.
    pub fn instrument(&self) -> String {
        let n = self.channel.len().saturating_sub(1);
        self.channel[..n].to_string()
    }

    /// Component letter of the channel code.
    pub fn component(&self) -> Option<char> {
        self.channel.chars().last()
    }

    /// A channel is vertical when its component letter is `Z` or its dip is
    /// within a degree of vertical.
    pub fn is_vertical(&self) -> bool {
        if self.component() == Some('Z') {
            return true;
        }
        matches!(self.standard.vertical_orientation, Some(dip) if (dip.abs() - 90.0).abs() < 1.0)
    }

    pub fn is_horizontal(&self) -> bool {
        !self.is_vertical()
    }

    /// Sample spacing in seconds.
    pub fn delta(&self) -> f64 {
        1.0 / self.sampling_rate
    }

    /// Time of the last sample.
    pub fn endtime(&self) -> DateTime<Utc> {
        if self.npts == 0 {
            return self.starttime;
        }
        let span_ns = (self.npts as f64 - 1.0) * self.delta() * 1e9;
        self.starttime + Duration::nanoseconds(span_ns.round() as i64)
    }
}

fn validate_code(kind: &str, code: &str, max_len: usize) -> Result<(), SmError> {
    if code.len() > max_len || !code.is_ascii() {
        return Err(SmError::Validation {
            msg: format!(
                "{} code {:?} must be ASCII and at most {} characters",
                kind, code, max_len
            ),
        });
    }
    Ok(())
}

/// One QA failure recorded on a trace or stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Name of the check that failed.
    pub step: String,
    pub reason: String,
}

/// A single-channel, contiguous time series with its QA state, provenance
/// ledger, typed parameter bag and cached scratch arrays.
///
/// The container composes a plain header and data vector with everything the
/// pipeline accumulates; nothing here is inherited from a generic
/// seismological trace type.
/// ```
/// use chrono::{TimeZone, Utc};
/// use strongmotion_core::enums::Units;
/// use strongmotion_core::trace::{StationTrace, TraceHeader};
///
/// let header = TraceHeader {
///     network: "CI".to_string(),
///     station: "TOP".to_string(),
///     location: "".to_string(),
///     channel: "HN1".to_string(),
///     starttime: Utc.with_ymd_and_hms(1994, 1, 17, 12, 30, 0).unwrap(),
///     sampling_rate: 200.0,
///     npts: 0,
///     units: Units::CmPerSecSquared,
///     coordinates: Default::default(),
///     standard: Default::default(),
/// };
/// let trace = StationTrace::new(vec![0.0; 1000], header).unwrap();
/// assert_eq!(trace.id(), "CI.TOP..HN1");
/// assert_eq!(trace.npts(), 1000);
/// assert!(trace.passed());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StationTrace {
    header: TraceHeader,
    data: Vec<f64>,
    passed: bool,
    failures: Vec<Failure>,
    provenance: Vec<ProvenanceRecord>,
    parameters: ParamMap,
    cached: FnvHashMap<String, Vec<f64>>,
}

impl StationTrace {
    /// Validate the header against the data vector and build the trace.
    ///
    /// A header `npts` of zero is treated as "unknown" and filled from the
    /// data; a nonzero `npts` must match the data length exactly.
    pub fn new(data: Vec<f64>, mut header: TraceHeader) -> Result<Self, SmError> {
        if header.sampling_rate <= 0.0 || !header.sampling_rate.is_finite() {
            return Err(SmError::Validation {
                msg: format!("sampling_rate must be positive, got {}", header.sampling_rate),
            });
        }
        if header.npts != 0 && header.npts != data.len() {
            return Err(SmError::Validation {
                msg: format!(
                    "header declares {} samples but the data vector has {}",
                    header.npts,
                    data.len()
                ),
            });
        }
        validate_code("network", &header.network, 8)?;
        validate_code("station", &header.station, 8)?;
        validate_code("location", &header.location, 8)?;
        validate_code("channel", &header.channel, 8)?;
        header.npts = data.len();
        Ok(Self {
            header,
            data,
            passed: true,
            failures: Vec::new(),
            provenance: Vec::new(),
            parameters: ParamMap::new(),
            cached: FnvHashMap::default(),
        })
    }

    pub fn header(&self) -> &TraceHeader {
        &self.header
    }

    pub fn id(&self) -> String {
        self.header.id()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn npts(&self) -> usize {
        self.header.npts
    }

    pub fn sampling_rate(&self) -> f64 {
        self.header.sampling_rate
    }

    pub fn delta(&self) -> f64 {
        self.header.delta()
    }

    pub fn starttime(&self) -> DateTime<Utc> {
        self.header.starttime
    }

    pub fn endtime(&self) -> DateTime<Utc> {
        self.header.endtime()
    }

    pub fn units(&self) -> Units {
        self.header.units
    }

    /// Replace the data vector. Refused once the trace has failed; keeps the
    /// `npts` invariant.
    pub fn set_data(&mut self, data: Vec<f64>) -> Result<(), SmError> {
        self.refuse_if_failed("set_data")?;
        self.header.npts = data.len();
        self.data = data;
        Ok(())
    }

    /// Replace data, start time and sampling rate together, for steps such
    /// as `cut` and `resample` that change timing and samples at once.
    pub fn set_timeseries(
        &mut self,
        data: Vec<f64>,
        starttime: DateTime<Utc>,
        sampling_rate: f64,
    ) -> Result<(), SmError> {
        self.refuse_if_failed("set_timeseries")?;
        if sampling_rate <= 0.0 || !sampling_rate.is_finite() {
            return Err(SmError::Validation {
                msg: format!("sampling_rate must be positive, got {}", sampling_rate),
            });
        }
        self.header.npts = data.len();
        self.data = data;
        self.header.starttime = starttime;
        self.header.sampling_rate = sampling_rate;
        Ok(())
    }

    pub fn set_units(&mut self, units: Units) -> Result<(), SmError> {
        self.refuse_if_failed("set_units")?;
        self.header.units = units;
        Ok(())
    }

    /// Normalize an absent location code to the empty string. Readers
    /// deliver `"--"` or whitespace when the source format has no location.
    pub fn normalize_location(&mut self) {
        let loc = self.header.location.trim();
        if loc == "--" || loc.chars().all(|c| c == '-' || c.is_whitespace()) {
            self.header.location = String::new();
        } else if loc.len() != self.header.location.len() {
            self.header.location = loc.to_string();
        }
    }

    /// Override the site coordinates, e.g. from an external StationXML file.
    pub fn set_coordinates(&mut self, coordinates: Coordinates) {
        self.header.coordinates = coordinates;
    }

    /// Override the component orientation, e.g. from an external StationXML
    /// file.
    pub fn set_orientation(&mut self, azimuth: Option<f64>, dip: Option<f64>) {
        if azimuth.is_some() {
            self.header.standard.horizontal_orientation = azimuth;
        }
        if dip.is_some() {
            self.header.standard.vertical_orientation = dip;
        }
    }

    fn refuse_if_failed(&self, op: &str) -> Result<(), SmError> {
        if self.passed {
            Ok(())
        } else {
            Err(SmError::Validation {
                msg: format!("{} on trace {} which has already failed", op, self.id()),
            })
        }
    }

    /// Mark the trace as failed. Subsequent steps must not mutate it; the
    /// data mutators enforce that.
    pub fn fail(&mut self, step: &str, reason: &str) {
        self.passed = false;
        self.failures.push(Failure {
            step: step.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// Append one provenance activity. The ledger only ever grows.
    pub fn set_provenance(&mut self, activity: &str, attributes: Vec<(String, Value)>) {
        self.provenance
            .push(ProvenanceRecord::new(activity, attributes));
    }

    pub fn append_provenance_record(&mut self, record: ProvenanceRecord) {
        self.provenance.push(record);
    }

    pub fn get_provenance(&self) -> &[ProvenanceRecord] {
        &self.provenance
    }

    pub fn set_parameter(&mut self, value: Param) {
        self.parameters.set(value);
    }

    pub fn get_parameter(&self, key: ParamKey) -> Option<&Param> {
        self.parameters.get(key)
    }

    pub fn require_parameter(&self, key: ParamKey) -> Result<&Param, SmError> {
        self.parameters.require(key)
    }

    pub fn parameters(&self) -> &ParamMap {
        &self.parameters
    }

    pub fn replace_parameters(&mut self, parameters: ParamMap) {
        self.parameters = parameters;
    }

    /// Stash a named scratch array (smoothed spectra, SNR curves, upsampled
    /// copies). Cached arrays are persisted to the workspace cache groups.
    pub fn set_cached(&mut self, name: &str, array: Vec<f64>) {
        self.cached.insert(name.to_string(), array);
    }

    pub fn get_cached(&self, name: &str) -> Option<&[f64]> {
        self.cached.get(name).map(|v| v.as_slice())
    }

    pub fn cached_names(&self) -> impl Iterator<Item = &String> {
        self.cached.keys()
    }

    /// Station inventory derived from the header, for StationXML export.
    pub fn get_inventory(&self) -> Inventory {
        let header = &self.header;
        Inventory {
            source: header.standard.source.clone(),
            networks: vec![Network {
                code: header.network.clone(),
                stations: vec![Station {
                    code: header.station.clone(),
                    latitude: header.coordinates.latitude,
                    longitude: header.coordinates.longitude,
                    elevation: header.coordinates.elevation,
                    name: header.standard.station_name.clone(),
                    channels: vec![Channel {
                        code: header.channel.clone(),
                        location_code: header.location.clone(),
                        latitude: header.coordinates.latitude,
                        longitude: header.coordinates.longitude,
                        elevation: header.coordinates.elevation,
                        depth: 0.0,
                        azimuth: header.standard.horizontal_orientation,
                        dip: header.standard.vertical_orientation,
                        sample_rate: header.sampling_rate,
                        sensor_description: header.standard.instrument.clone(),
                    }],
                }],
            }],
        }
    }
}
