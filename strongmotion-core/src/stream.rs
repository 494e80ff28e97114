//! Multi-channel station streams.
use fnv::FnvHashMap;
use serde_json::Value;

use crate::errors::SmError;
use crate::parameters::{Param, ParamKey, ParamMap};
use crate::stationxml::Inventory;
use crate::trace::{Failure, StationTrace};

/// The reason recorded when the constituent channels of a stream disagree on
/// identity or timing.
pub const CHECK_CHANNELS: &str = "__check_channels";

/// An ordered set of traces from one instrument at one station.
///
/// All member traces must share network, station, location, the two-letter
/// instrument code, start time, length and sampling rate. A stream whose
/// channels disagree is still constructed, so the failure can be reported and
/// persisted, but it is marked failed with reason [`CHECK_CHANNELS`] and the
/// pipeline will only ever append `skipped` provenance to it.
#[derive(Debug, Clone, PartialEq)]
pub struct StationStream {
    traces: Vec<StationTrace>,
    passed: bool,
    failures: Vec<Failure>,
    parameters: ParamMap,
    stream_parameters: FnvHashMap<String, Value>,
}

impl StationStream {
    /// Build a stream and run the channel-consistency check.
    pub fn new(traces: Vec<StationTrace>) -> Result<Self, SmError> {
        if traces.is_empty() {
            return Err(SmError::Validation {
                msg: "a stream must contain at least one trace".to_string(),
            });
        }
        let mut stream = Self {
            traces,
            passed: true,
            failures: Vec::new(),
            parameters: ParamMap::new(),
            stream_parameters: FnvHashMap::default(),
        };
        if let Some(mismatch) = stream.channel_mismatch() {
            stream.fail(CHECK_CHANNELS, &mismatch);
        }
        Ok(stream)
    }

    /// Describe the first identity/timing disagreement between channels, if
    /// any.
    fn channel_mismatch(&self) -> Option<String> {
        let first = self.traces[0].header();
        for trace in &self.traces[1..] {
            let header = trace.header();
            if header.network != first.network
                || header.station != first.station
                || header.location != first.location
                || header.instrument() != first.instrument()
            {
                return Some(format!(
                    "inconsistent channel ids: {} vs {}",
                    first.id(),
                    header.id()
                ));
            }
            if header.starttime != first.starttime {
                return Some(format!(
                    "inconsistent start times: {} vs {}",
                    first.starttime, header.starttime
                ));
            }
            if header.npts != first.npts {
                return Some(format!(
                    "inconsistent lengths: {} vs {}",
                    first.npts, header.npts
                ));
            }
            if header.sampling_rate != first.sampling_rate {
                return Some(format!(
                    "inconsistent sampling rates: {} vs {}",
                    first.sampling_rate, header.sampling_rate
                ));
            }
        }
        None
    }

    /// `NET.STA.LOC.IN`, the shared instrument id of the stream.
    pub fn id(&self) -> String {
        let header = self.traces[0].header();
        format!(
            "{}.{}.{}.{}",
            header.network,
            header.station,
            header.location,
            header.instrument()
        )
    }

    pub fn traces(&self) -> &[StationTrace] {
        &self.traces
    }

    pub fn traces_mut(&mut self) -> &mut [StationTrace] {
        &mut self.traces
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// The stream passes only while its own flag and every trace pass.
    pub fn passed(&self) -> bool {
        self.passed && self.traces.iter().all(|t| t.passed())
    }

    /// Mark the stream itself as failed.
    pub fn fail(&mut self, step: &str, reason: &str) {
        self.passed = false;
        self.failures.push(Failure {
            step: step.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// Every distinct failure on the stream and its traces, for the failure
    /// tables.
    pub fn all_failures(&self) -> Vec<(String, Failure)> {
        let mut out: Vec<(String, Failure)> = self
            .failures
            .iter()
            .map(|f| (self.id(), f.clone()))
            .collect();
        for trace in &self.traces {
            for f in trace.failures() {
                out.push((trace.id(), f.clone()));
            }
        }
        out
    }

    /// The horizontal traces, in channel order.
    pub fn horizontals(&self) -> Vec<&StationTrace> {
        self.traces
            .iter()
            .filter(|t| t.header().is_horizontal())
            .collect()
    }

    pub fn num_horizontals(&self) -> usize {
        self.horizontals().len()
    }

    /// The vertical trace, when the stream has exactly one.
    pub fn vertical(&self) -> Option<&StationTrace> {
        let mut verticals = self.traces.iter().filter(|t| t.header().is_vertical());
        let first = verticals.next();
        if verticals.next().is_some() {
            return None;
        }
        first
    }

    pub fn get_trace(&self, channel: &str) -> Option<&StationTrace> {
        self.traces.iter().find(|t| t.header().channel == channel)
    }

    pub fn sampling_rate(&self) -> f64 {
        self.traces[0].sampling_rate()
    }

    pub fn set_parameter(&mut self, value: Param) {
        self.parameters.set(value);
    }

    pub fn get_parameter(&self, key: ParamKey) -> Option<&Param> {
        self.parameters.get(key)
    }

    pub fn parameters(&self) -> &ParamMap {
        &self.parameters
    }

    pub fn replace_parameters(&mut self, parameters: ParamMap) {
        self.parameters = parameters;
    }

    /// Free-form stream-scoped values (e.g. precomputed rotation summaries).
    pub fn set_stream_parameter(&mut self, key: &str, value: Value) {
        self.stream_parameters.insert(key.to_string(), value);
    }

    pub fn get_stream_parameter(&self, key: &str) -> Option<&Value> {
        self.stream_parameters.get(key)
    }

    pub fn stream_parameters(&self) -> &FnvHashMap<String, Value> {
        &self.stream_parameters
    }

    /// Merged station inventory over all member traces.
    pub fn get_inventory(&self) -> Inventory {
        let mut inventory = Inventory::default();
        for trace in &self.traces {
            inventory.merge(trace.get_inventory());
        }
        inventory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::Units;
    use crate::trace::{Coordinates, StandardMetadata, TraceHeader};
    use chrono::{TimeZone, Utc};

    fn trace(channel: &str, npts: usize, rate: f64) -> StationTrace {
        let header = TraceHeader {
            network: "CI".to_string(),
            station: "TOP".to_string(),
            location: String::new(),
            channel: channel.to_string(),
            starttime: Utc.with_ymd_and_hms(1994, 1, 17, 12, 30, 0).unwrap(),
            sampling_rate: rate,
            npts: 0,
            units: Units::CmPerSecSquared,
            coordinates: Coordinates::default(),
            standard: StandardMetadata::default(),
        };
        StationTrace::new(vec![0.0; npts], header).unwrap()
    }

    #[test]
    fn consistent_stream_passes() {
        let stream = StationStream::new(vec![
            trace("HN1", 100, 100.0),
            trace("HN2", 100, 100.0),
            trace("HNZ", 100, 100.0),
        ])
        .unwrap();
        assert!(stream.passed());
        assert_eq!(stream.id(), "CI.TOP..HN");
        assert_eq!(stream.num_horizontals(), 2);
        assert!(stream.vertical().is_some());
    }

    #[test]
    fn timing_mismatch_fails_stream() {
        let stream = StationStream::new(vec![
            trace("HN1", 100, 100.0),
            trace("HN2", 101, 100.0),
        ])
        .unwrap();
        assert!(!stream.passed());
        assert_eq!(stream.failures()[0].step, CHECK_CHANNELS);
    }

    #[test]
    fn rate_mismatch_fails_stream() {
        let stream = StationStream::new(vec![
            trace("HN1", 100, 100.0),
            trace("HN2", 100, 200.0),
        ])
        .unwrap();
        assert!(!stream.passed());
    }

    #[test]
    fn empty_stream_rejected() {
        assert!(StationStream::new(vec![]).is_err());
    }

    #[test]
    fn failed_trace_fails_stream() {
        let mut stream =
            StationStream::new(vec![trace("HN1", 100, 100.0), trace("HN2", 100, 100.0)])
                .unwrap();
        stream.traces_mut()[0].fail("snr_check", "Failed SNR check; SNR less than threshold.");
        assert!(!stream.passed());
        assert_eq!(stream.all_failures().len(), 1);
    }
}
