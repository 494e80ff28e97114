//! The ordered pipeline executor.
//!
//! Step names resolve against an explicit registry at configuration time, so
//! an unknown name is a configuration error before any stream is touched.
//! Execution is task-parallel over streams (one stream is one unit of work,
//! owning all of its buffers) and strictly ordered within a stream. A failed
//! stream keeps accumulating `skipped` provenance entries; an error inside a
//! step fails only its own stream.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fnv::FnvHashMap;
use log::info;
use rayon::prelude::*;
use serde_json::json;

use strongmotion_core::collection::StreamCollection;
use strongmotion_core::config::{Config, StepConf};
use strongmotion_core::errors::SmError;
use strongmotion_core::event::Event;
use strongmotion_core::stream::StationStream;

use crate::steps::{self, StepFn};
use crate::windows;

/// Cooperative cancellation for one processing run. Cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The step-name table, populated once at startup.
pub struct StepRegistry {
    table: FnvHashMap<&'static str, StepFn>,
}

impl StepRegistry {
    /// All built-in steps under their configuration names.
    pub fn standard() -> Self {
        let mut registry = Self {
            table: FnvHashMap::default(),
        };
        registry.register("check_stream", steps::check_stream);
        // Historical alias kept so older pipelines keep loading.
        registry.register("max_traces", steps::check_stream);
        registry.register("min_sample_rate", steps::min_sample_rate);
        registry.register("detrend", steps::detrend);
        registry.register("remove_response", steps::remove_response);
        registry.register("compute_snr", steps::compute_snr);
        registry.register("snr_check", steps::snr_check);
        registry.register("get_corner_frequencies", steps::get_corner_frequencies);
        registry.register("lowpass_max_frequency", steps::lowpass_max_frequency);
        registry.register("adjust_highpass_ridder", steps::adjust_highpass_ridder);
        registry.register("cut", steps::cut);
        registry.register("taper", steps::taper);
        registry.register("highpass_filter", steps::highpass_filter);
        registry.register("lowpass_filter", steps::lowpass_filter);
        registry.register("resample", steps::resample);
        registry.register("fit_spectra", steps::fit_spectra);
        registry
    }

    pub fn register(&mut self, name: &'static str, step: StepFn) {
        self.table.insert(name, step);
    }

    pub fn resolve(&self, name: &str) -> Option<StepFn> {
        self.table.get(name).copied()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.table.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// A resolved, ordered pipeline ready to run.
#[derive(Debug)]
pub struct Pipeline {
    steps: Vec<(StepConf, StepFn)>,
}

impl Pipeline {
    /// Resolve the configured step list. Unknown names are configuration
    /// errors; duplicates are allowed and run independently.
    pub fn from_config(config: &Config, registry: &StepRegistry) -> Result<Self, SmError> {
        let mut resolved = Vec::with_capacity(config.processing.len());
        for step in &config.processing {
            let func = registry.resolve(&step.name).ok_or_else(|| SmError::Config {
                msg: format!("unknown processing step {:?}", step.name),
            })?;
            resolved.push((step.clone(), func));
        }
        Ok(Self { steps: resolved })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the windowing pass and every configured step on one stream.
    /// Returns false when cancellation interrupted the stream mid-flight.
    pub fn run_stream(
        &self,
        stream: &mut StationStream,
        event: Option<&Event>,
        config: &Config,
        cancel: &CancelToken,
    ) -> Result<bool, SmError> {
        if let Some(event) = event {
            if stream.passed() {
                windows::compute_windows(stream, event, config)?;
            }
        }
        for (conf, func) in &self.steps {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            if !stream.passed() {
                // Skip-on-failure, but the ledger still records the attempt.
                for trace in stream.traces_mut() {
                    trace.set_provenance(
                        &conf.name,
                        vec![("status".to_string(), json!("skipped"))],
                    );
                }
                continue;
            }
            let before: Vec<usize> = stream
                .traces()
                .iter()
                .map(|t| t.get_provenance().len())
                .collect();
            if let Err(e) = func(stream, event, conf, config) {
                let reason = SmError::StepInternal {
                    step: conf.name.clone(),
                    msg: e.to_string(),
                }
                .to_string();
                stream.fail(&conf.name, &reason);
            }
            // At most one activity per step-activation: the executor only
            // backfills traces the step left unrecorded.
            for (trace, &len_before) in stream.traces_mut().iter_mut().zip(&before) {
                if trace.get_provenance().len() == len_before {
                    trace.set_provenance(&conf.name, vec![]);
                }
            }
        }
        Ok(true)
    }
}

/// What happened to each unit of work in one processing run.
#[derive(Debug, Default)]
pub struct ProcessingSummary {
    /// Streams that ran the whole pipeline and still pass.
    pub passed: Vec<String>,
    /// Streams that ran the whole pipeline and are failed.
    pub failed: Vec<String>,
    /// Streams discarded because cancellation caught them in flight; their
    /// state in the collection is the pre-processing state.
    pub cancelled: Vec<String>,
}

/// Process every stream of the collection through the pipeline, in parallel.
///
/// Streams are independent units: each one is processed on a clone and the
/// clone replaces the original only when the stream ran to completion, so a
/// cancelled unit is discarded rather than left half-processed.
pub fn process_streams(
    collection: &mut StreamCollection,
    event: &Event,
    config: &Config,
    cancel: &CancelToken,
) -> Result<ProcessingSummary, SmError> {
    let registry = StepRegistry::standard();
    let pipeline = Pipeline::from_config(config, &registry)?;

    let outcomes: Vec<(String, Option<StationStream>)> = collection
        .streams_mut()
        .par_iter_mut()
        .map(|stream| {
            let id = stream.id();
            if cancel.is_cancelled() {
                return (id, None);
            }
            let mut work = stream.clone();
            match pipeline.run_stream(&mut work, Some(event), config, cancel) {
                Ok(true) => (id, Some(work)),
                Ok(false) => (id, None),
                // run_stream only errors on malformed step configuration;
                // surface it as a failed stream rather than aborting peers.
                Err(e) => {
                    work.fail("processing", &e.to_string());
                    (id, Some(work))
                }
            }
        })
        .collect();

    let mut summary = ProcessingSummary::default();
    for ((id, outcome), slot) in outcomes.into_iter().zip(collection.streams_mut()) {
        match outcome {
            Some(done) => {
                if done.passed() {
                    summary.passed.push(id);
                } else {
                    summary.failed.push(id);
                }
                *slot = done;
            }
            None => summary.cancelled.push(id),
        }
    }
    info!(
        "processing complete: {} passed, {} failed, {} cancelled",
        summary.passed.len(),
        summary.failed.len(),
        summary.cancelled.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use strongmotion_core::enums::Units;
    use strongmotion_core::trace::{Coordinates, StandardMetadata, StationTrace, TraceHeader};

    fn event() -> Event {
        Event {
            id: "ci3144585".to_string(),
            time: Utc.with_ymd_and_hms(1994, 1, 17, 12, 30, 55).unwrap(),
            latitude: 34.213,
            longitude: -118.537,
            depth_km: 18.2,
            magnitude: 6.7,
            magnitude_type: Some("Mw".to_string()),
        }
    }

    fn trace(station: &str, channel: &str, n: usize) -> StationTrace {
        let rate = 100.0;
        let onset = n / 3;
        let data: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64 / rate;
                let noise = 0.02 * ((2.0 * std::f64::consts::PI * 0.9 * t).sin()
                    + 0.6 * (2.0 * std::f64::consts::PI * 3.3 * t).sin());
                if i >= onset {
                    noise
                        + 30.0 * (2.0 * std::f64::consts::PI * 1.2 * t).sin()
                        + 20.0 * (2.0 * std::f64::consts::PI * 4.4 * t).sin()
                } else {
                    noise
                }
            })
            .collect();
        let header = TraceHeader {
            network: "CI".to_string(),
            station: station.to_string(),
            location: String::new(),
            channel: channel.to_string(),
            starttime: Utc.with_ymd_and_hms(1994, 1, 17, 12, 30, 55).unwrap(),
            sampling_rate: rate,
            npts: 0,
            units: Units::CmPerSecSquared,
            coordinates: Coordinates {
                latitude: 34.084,
                longitude: -118.599,
                elevation: 290.0,
            },
            standard: StandardMetadata::default(),
        };
        StationTrace::new(data, header).unwrap()
    }

    fn stream(station: &str) -> StationStream {
        let n = 9000;
        StationStream::new(vec![
            trace(station, "HN1", n),
            trace(station, "HN2", n),
            trace(station, "HNZ", n),
        ])
        .unwrap()
    }

    #[test]
    fn unknown_step_is_a_config_error() {
        let mut config = Config::default();
        config.processing.push(StepConf::new("no_such_step"));
        let registry = StepRegistry::standard();
        let err = Pipeline::from_config(&config, &registry).unwrap_err();
        assert!(matches!(err, SmError::Config { .. }));
    }

    #[test]
    fn duplicate_steps_are_allowed_and_both_recorded() {
        let mut config = Config::default();
        config.processing = vec![
            serde_yaml::from_str("detrend: {detrending_method: demean}").unwrap(),
            serde_yaml::from_str("detrend: {detrending_method: linear}").unwrap(),
        ];
        let registry = StepRegistry::standard();
        let pipeline = Pipeline::from_config(&config, &registry).unwrap();
        let mut s = stream("TOP");
        pipeline
            .run_stream(&mut s, Some(&event()), &config, &CancelToken::new())
            .unwrap();
        let prov = s.traces()[0].get_provenance();
        let detrends: Vec<_> = prov.iter().filter(|r| r.activity == "detrend").collect();
        assert_eq!(detrends.len(), 2);
    }

    #[test]
    fn full_default_pipeline_passes_a_good_stream() {
        let config = Config::default();
        let mut collection = StreamCollection::new(vec![stream("TOP")]).unwrap();
        let summary =
            process_streams(&mut collection, &event(), &config, &CancelToken::new()).unwrap();
        assert_eq!(summary.passed.len(), 1, "failed: {:?}", {
            collection.streams()[0].all_failures()
        });
        // Every step appended provenance to every trace.
        for t in collection.streams()[0].traces() {
            assert!(t.get_provenance().len() >= config.processing.len());
        }
    }

    #[test]
    fn failed_stream_keeps_collecting_skipped_entries() {
        let mut config = Config::default();
        // Force a failure at the first step.
        config.processing[0] = serde_yaml::from_str("check_stream: {max_traces: 1}").unwrap();
        let mut collection = StreamCollection::new(vec![stream("TOP")]).unwrap();
        let summary =
            process_streams(&mut collection, &event(), &config, &CancelToken::new()).unwrap();
        assert_eq!(summary.failed.len(), 1);
        let s = &collection.streams()[0];
        assert!(!s.passed());
        assert_eq!(s.failures()[0].reason, steps::NONUNIQUE_CHANNELS);
        // All later steps recorded skipped status.
        let prov = s.traces()[0].get_provenance();
        assert_eq!(prov.len(), config.processing.len());
        let skipped = prov
            .iter()
            .skip(1)
            .filter(|r| {
                r.attributes
                    .iter()
                    .any(|(k, v)| k == "status" && v == "skipped")
            })
            .count();
        assert_eq!(skipped, config.processing.len() - 1);
    }

    #[test]
    fn failure_isolation_between_streams() {
        let mut bad = stream("BAD");
        // A failed member trace fails the whole stream before processing.
        bad.traces_mut()[0].fail("read", "synthetic failure");
        let good = stream("TOP");
        let mut collection = StreamCollection::new(vec![bad, good]).unwrap();
        let summary =
            process_streams(&mut collection, &event(), &Config::default(), &CancelToken::new())
                .unwrap();
        assert_eq!(summary.passed.len(), 1);
        assert_eq!(summary.failed.len(), 1);
        assert!(collection.get("CI.TOP..HN").unwrap().passed());
    }

    #[test]
    fn cancellation_discards_in_flight_streams() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut collection = StreamCollection::new(vec![stream("TOP")]).unwrap();
        let summary =
            process_streams(&mut collection, &event(), &Config::default(), &cancel).unwrap();
        assert_eq!(summary.cancelled.len(), 1);
        // The stream is untouched: no provenance, no windows.
        let s = &collection.streams()[0];
        assert!(s.traces()[0].get_provenance().is_empty());
        assert!(s.parameters().is_empty());
    }

    #[test]
    fn registry_lists_standard_steps() {
        let registry = StepRegistry::standard();
        let names = registry.names();
        for expected in [
            "check_stream",
            "detrend",
            "compute_snr",
            "snr_check",
            "get_corner_frequencies",
            "highpass_filter",
            "lowpass_filter",
            "fit_spectra",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
        assert!(registry.resolve("nope").is_none());
    }
}
