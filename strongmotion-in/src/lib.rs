//! This is the reader facade for raw strong-motion files. It is designed
//! around a small capability interface: a format reader knows how to
//! recognize its own files and how to turn one into normalized station
//! streams. The facade memory-maps each file once, asks the registered
//! readers in priority order, and hands the first match's output through a
//! normalization pass so that everything downstream can rely on the core
//! container invariants.
//!
//! Concrete data-center formats are registered by the integrating
//! application; this crate deliberately ships none of them.

pub mod overrides;
pub mod raw_file;

use std::path::{Path, PathBuf};

use log::{debug, warn};

pub use raw_file::RawFile;

use strongmotion_core::collection::{glob_match, StreamCollection};
use strongmotion_core::config::Config;
use strongmotion_core::errors::SmError;
use strongmotion_core::stream::StationStream;

use crate::overrides::StationOverrides;

/// The reader capability: recognize a raw file, then produce normalized
/// station streams from it.
///
/// `read` must deliver traces whose units are in the recognized set, whose
/// sampling rate is positive (both enforced by the core containers) and
/// whose horizontal azimuth is set when the source declares one. The facade
/// takes care of location-code normalization and component-letter azimuth
/// fallbacks.
pub trait FormatReader: Send + Sync {
    /// Short format tag, recorded as `source_format` on the traces.
    fn name(&self) -> &'static str;
    /// Cheap sniff of the mapped bytes; must not error.
    fn is_format(&self, file: &RawFile) -> bool;
    fn read(&self, file: &RawFile, config: &Config) -> Result<Vec<StationStream>, SmError>;
}

/// An explicit, priority-ordered reader table populated at startup. No
/// dynamic discovery: what is registered is what dispatches.
#[derive(Default)]
pub struct ReaderRegistry {
    readers: Vec<Box<dyn FormatReader>>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reader; earlier registrations win the format sniff.
    pub fn register(&mut self, reader: Box<dyn FormatReader>) {
        self.readers.push(reader);
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// The first registered reader claiming the file.
    pub fn dispatch(&self, file: &RawFile) -> Option<&dyn FormatReader> {
        self.readers
            .iter()
            .map(|r| r.as_ref())
            .find(|r| r.is_format(file))
    }
}

/// Read one raw file into normalized station streams.
pub fn read_file(
    registry: &ReaderRegistry,
    path: &Path,
    config: &Config,
) -> Result<Vec<StationStream>, SmError> {
    let raw = RawFile::open(path)?;
    let reader = registry.dispatch(&raw).ok_or_else(|| SmError::MalformedInput {
        path: path.display().to_string(),
        msg: "no registered reader recognizes this format".to_string(),
    })?;
    debug!("{} claimed by the {} reader", path.display(), reader.name());
    let mut streams = reader.read(&raw, config)?;
    for stream in &mut streams {
        normalize_stream(stream);
    }
    Ok(streams)
}

/// Normalization the facade guarantees regardless of reader: blank location
/// codes become the empty string, and horizontals named by compass letter
/// get their implied azimuth when the reader left it unset.
fn normalize_stream(stream: &mut StationStream) {
    for trace in stream.traces_mut() {
        trace.normalize_location();
        let (component, has_azimuth, horizontal, id) = {
            let h = trace.header();
            (
                h.component(),
                h.standard.horizontal_orientation.is_some(),
                h.is_horizontal(),
                h.id(),
            )
        };
        if horizontal && !has_azimuth {
            match component {
                Some('N') => trace.set_orientation(Some(0.0), None),
                Some('E') => trace.set_orientation(Some(90.0), None),
                _ => warn!("horizontal channel {} has no azimuth", id),
            }
        }
    }
}

/// Outcome of walking one directory of raw files: what assembled, and which
/// files failed with what. An unreadable file only ever costs its own slot.
pub struct DirectoryRead {
    pub streams: Vec<StationStream>,
    pub failures: Vec<(PathBuf, SmError)>,
}

/// Read every non-excluded file under `dir`, collecting per-file failures
/// instead of aborting on them.
pub fn read_directory(
    registry: &ReaderRegistry,
    dir: &Path,
    config: &Config,
) -> Result<DirectoryRead, SmError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut streams = Vec::new();
    let mut failures = Vec::new();
    for path in paths {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if config
            .read
            .exclude_patterns
            .iter()
            .any(|pattern| glob_match(pattern, name))
        {
            debug!("excluding {} by pattern", path.display());
            continue;
        }
        match read_file(registry, &path, config) {
            Ok(mut file_streams) => streams.append(&mut file_streams),
            Err(e) => failures.push((path, e)),
        }
    }
    Ok(DirectoryRead { streams, failures })
}

/// Assemble a directory of raw files into an event's stream collection:
/// read, apply external station metadata, resolve duplicates and colocated
/// instruments.
pub fn assemble(
    registry: &ReaderRegistry,
    dir: &Path,
    config: &Config,
) -> Result<(StreamCollection, Vec<(PathBuf, SmError)>), SmError> {
    let DirectoryRead {
        mut streams,
        failures,
    } = read_directory(registry, dir, config)?;

    if let Some(metadata_dir) = &config.read.metadata_directory {
        match StationOverrides::load(metadata_dir) {
            Ok(overrides) => {
                for stream in &mut streams {
                    overrides.apply(stream);
                }
            }
            Err(e) => warn!(
                "station metadata directory {} unusable: {}",
                metadata_dir.display(),
                e
            ),
        }
    }

    let collection = if config.read.use_streamcollection {
        StreamCollection::assemble(streams, &config.duplicate, &config.colocated)
    } else {
        // Duplicate records are kept; downstream must tolerate shared ids.
        StreamCollection::assemble(
            streams,
            &strongmotion_core::config::DuplicateConf {
                max_dist_tolerance: 0.0,
                ..config.duplicate.clone()
            },
            &strongmotion_core::config::ColocatedConf { preference: vec![] },
        )
    };
    Ok((collection, failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Write;
    use strongmotion_core::enums::Units;
    use strongmotion_core::trace::{Coordinates, StandardMetadata, StationTrace, TraceHeader};

    /// A line-oriented test format: a `SYNTH` magic line with the channel
    /// list, then one sample per line per channel.
    struct SynthReader;

    impl SynthReader {
        fn parse(text: &str) -> Option<(Vec<String>, Vec<Vec<f64>>)> {
            let mut lines = text.lines();
            let head = lines.next()?;
            let mut parts = head.split_whitespace();
            if parts.next()? != "SYNTH" {
                return None;
            }
            let channels: Vec<String> = parts.map(|s| s.to_string()).collect();
            let mut columns: Vec<Vec<f64>> = vec![Vec::new(); channels.len()];
            for line in lines {
                for (i, field) in line.split_whitespace().enumerate() {
                    columns.get_mut(i)?.push(field.parse().ok()?);
                }
            }
            Some((channels, columns))
        }
    }

    impl FormatReader for SynthReader {
        fn name(&self) -> &'static str {
            "synth"
        }

        fn is_format(&self, file: &RawFile) -> bool {
            file.header_text(6).starts_with("SYNTH")
        }

        fn read(&self, file: &RawFile, _config: &Config) -> Result<Vec<StationStream>, SmError> {
            let (channels, columns) =
                Self::parse(&file.text()).ok_or_else(|| SmError::MalformedInput {
                    path: file.path().display().to_string(),
                    msg: "bad SYNTH layout".to_string(),
                })?;
            let traces = channels
                .iter()
                .zip(columns)
                .map(|(channel, data)| {
                    let header = TraceHeader {
                        network: "CI".to_string(),
                        station: "TOP".to_string(),
                        location: "--".to_string(),
                        channel: channel.clone(),
                        starttime: Utc.with_ymd_and_hms(1994, 1, 17, 12, 30, 0).unwrap(),
                        sampling_rate: 100.0,
                        npts: 0,
                        units: Units::CmPerSecSquared,
                        coordinates: Coordinates::default(),
                        standard: StandardMetadata {
                            source_format: "synth".to_string(),
                            ..StandardMetadata::default()
                        },
                    };
                    StationTrace::new(data, header)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(vec![StationStream::new(traces)?])
        }
    }

    fn registry() -> ReaderRegistry {
        let mut registry = ReaderRegistry::new();
        registry.register(Box::new(SynthReader));
        registry
    }

    fn write_synth(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "SYNTH HNN HNE HNZ").unwrap();
        for i in 0..32 {
            writeln!(f, "{} {} {}", i as f64 * 0.1, i as f64 * -0.1, 0.05).unwrap();
        }
        path
    }

    #[test]
    fn facade_dispatches_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_synth(dir.path(), "topanga.synth");
        let config = Config::default();
        let streams = read_file(&registry(), &path, &config).unwrap();
        assert_eq!(streams.len(), 1);
        let stream = &streams[0];
        assert_eq!(stream.len(), 3);
        // The facade blanked the "--" location and filled compass azimuths.
        let h = stream.traces()[0].header();
        assert_eq!(h.location, "");
        assert_eq!(h.standard.horizontal_orientation, Some(0.0));
        let e = stream.get_trace("HNE").unwrap().header();
        assert_eq!(e.standard.horizontal_orientation, Some(90.0));
    }

    #[test]
    fn unrecognized_format_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.bin");
        std::fs::write(&path, b"not a record").unwrap();
        let err = read_file(&registry(), &path, &Config::default()).unwrap_err();
        assert!(matches!(err, SmError::MalformedInput { .. }));
    }

    #[test]
    fn directory_read_isolates_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        write_synth(dir.path(), "good.synth");
        std::fs::write(dir.path().join("bad.synth"), b"garbage").unwrap();
        let out = read_directory(&registry(), dir.path(), &Config::default()).unwrap();
        assert_eq!(out.streams.len(), 1);
        assert_eq!(out.failures.len(), 1);
        assert!(out.failures[0].0.ends_with("bad.synth"));
    }

    #[test]
    fn exclude_patterns_skip_files() {
        let dir = tempfile::tempdir().unwrap();
        write_synth(dir.path(), "good.synth");
        write_synth(dir.path(), "skipme.evt");
        let mut config = Config::default();
        config.read.exclude_patterns = vec!["*.evt".to_string()];
        let out = read_directory(&registry(), dir.path(), &config).unwrap();
        assert_eq!(out.streams.len(), 1);
        assert!(out.failures.is_empty());
    }

    #[test]
    fn assemble_applies_station_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let meta_dir = dir.path().join("meta");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::create_dir_all(&meta_dir).unwrap();
        write_synth(&data_dir, "topanga.synth");

        let inventory = strongmotion_core::stationxml::Inventory {
            source: "test".to_string(),
            networks: vec![strongmotion_core::stationxml::Network {
                code: "CI".to_string(),
                stations: vec![strongmotion_core::stationxml::Station {
                    code: "TOP".to_string(),
                    latitude: 34.084,
                    longitude: -118.599,
                    elevation: 290.0,
                    name: String::new(),
                    channels: vec![strongmotion_core::stationxml::Channel {
                        code: "HNN".to_string(),
                        location_code: String::new(),
                        latitude: 34.084,
                        longitude: -118.599,
                        elevation: 290.0,
                        depth: 0.0,
                        azimuth: Some(7.0),
                        dip: Some(0.0),
                        sample_rate: 100.0,
                        sensor_description: String::new(),
                    }],
                }],
            }],
        };
        let xml = strongmotion_core::stationxml::write_to_string(&inventory).unwrap();
        std::fs::write(meta_dir.join("CI.TOP.xml"), xml).unwrap();

        let mut config = Config::default();
        config.read.metadata_directory = Some(meta_dir);
        let (collection, failures) = assemble(&registry(), &data_dir, &config).unwrap();
        assert!(failures.is_empty());
        assert_eq!(collection.len(), 1);
        let trace = collection.streams()[0].get_trace("HNN").unwrap();
        assert_eq!(trace.header().coordinates.latitude, 34.084);
        assert_eq!(trace.header().standard.horizontal_orientation, Some(7.0));
    }
}
