//! Event-level stream grouping with duplicate and colocated-instrument
//! resolution.
use log::{debug, info};

use crate::config::{ColocatedConf, DuplicateConf};
use crate::enums::ProcessLevel;
use crate::errors::SmError;
use crate::geo::great_circle_km;
use crate::stream::StationStream;

/// Match a channel glob: `?` matches one character, `*` any run.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&p[1..], &t[1..]),
            (Some(c), Some(d)) if c == d => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

/// All streams of one event.
///
/// The collection owns the invariant that no two member streams share the
/// full channel id. [`StreamCollection::assemble`] establishes it by
/// resolving duplicates with the configured preferences;
/// [`StreamCollection::new`] demands it outright and is what the workspace
/// reader uses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamCollection {
    streams: Vec<StationStream>,
}

impl StreamCollection {
    /// Build a collection from streams already known to be distinct.
    pub fn new(streams: Vec<StationStream>) -> Result<Self, SmError> {
        for (i, a) in streams.iter().enumerate() {
            for b in &streams[i + 1..] {
                if a.id() == b.id() {
                    return Err(SmError::Validation {
                        msg: format!("two streams share the channel id {}", a.id()),
                    });
                }
            }
        }
        Ok(Self { streams })
    }

    /// Build a collection from freshly read streams, resolving duplicate
    /// records and colocated instruments with the configured preferences.
    pub fn assemble(
        streams: Vec<StationStream>,
        duplicate: &DuplicateConf,
        colocated: &ColocatedConf,
    ) -> Self {
        let mut kept: Vec<StationStream> = Vec::with_capacity(streams.len());
        for candidate in streams {
            match kept
                .iter()
                .position(|existing| is_duplicate(existing, &candidate, duplicate))
            {
                None => kept.push(candidate),
                Some(i) => {
                    if prefer_replacement(&kept[i], &candidate, duplicate) {
                        info!(
                            "duplicate record: replacing {} with {}",
                            kept[i].id(),
                            candidate.id()
                        );
                        kept[i] = candidate;
                    } else {
                        info!(
                            "duplicate record: keeping {} over {}",
                            kept[i].id(),
                            candidate.id()
                        );
                    }
                }
            }
        }
        let kept = select_colocated(kept, colocated);
        Self { streams: kept }
    }

    pub fn streams(&self) -> &[StationStream] {
        &self.streams
    }

    pub fn streams_mut(&mut self) -> &mut [StationStream] {
        &mut self.streams
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StationStream> {
        self.streams.iter()
    }

    pub fn get(&self, id: &str) -> Option<&StationStream> {
        self.streams.iter().find(|s| s.id() == id)
    }

    /// Number of streams that are still passing.
    pub fn n_passed(&self) -> usize {
        self.streams.iter().filter(|s| s.passed()).count()
    }

    /// Append a stream, upholding the channel-id invariant.
    pub fn push(&mut self, stream: StationStream) -> Result<(), SmError> {
        if self.get(&stream.id()).is_some() {
            return Err(SmError::Validation {
                msg: format!("two streams share the channel id {}", stream.id()),
            });
        }
        self.streams.push(stream);
        Ok(())
    }

    pub fn into_streams(self) -> Vec<StationStream> {
        self.streams
    }
}

/// Two streams record the same motion when they carry the same full id, or
/// the same station/channel strings at effectively the same site even under
/// different network codes.
fn is_duplicate(a: &StationStream, b: &StationStream, cfg: &DuplicateConf) -> bool {
    if a.id() == b.id() {
        return true;
    }
    let ha = a.traces()[0].header();
    let hb = b.traces()[0].header();
    if ha.station != hb.station || ha.instrument() != hb.instrument() {
        return false;
    }
    let dist_m = great_circle_km(
        ha.coordinates.latitude,
        ha.coordinates.longitude,
        hb.coordinates.latitude,
        hb.coordinates.longitude,
    ) * 1000.0;
    dist_m <= cfg.max_dist_tolerance
}

fn preference_index(list: &[String], tag: &str) -> usize {
    list.iter().position(|p| p == tag).unwrap_or(list.len())
}

/// Decide whether `candidate` should replace `incumbent`, consulting the
/// configured preference keys in order. A full tie keeps the incumbent.
fn prefer_replacement(
    incumbent: &StationStream,
    candidate: &StationStream,
    cfg: &DuplicateConf,
) -> bool {
    use std::cmp::Ordering;
    let hi = incumbent.traces()[0].header();
    let hc = candidate.traces()[0].header();
    for key in &cfg.preference_order {
        let ordering = match key.as_str() {
            "process_level" => {
                let rank = |level: ProcessLevel| {
                    preference_index(&cfg.process_level_preference, level.as_str())
                };
                rank(hi.standard.process_level).cmp(&rank(hc.standard.process_level))
            }
            "source_format" => {
                let rank =
                    |fmt: &str| preference_index(&cfg.format_preference, &fmt.to_lowercase());
                rank(&hi.standard.source_format).cmp(&rank(&hc.standard.source_format))
            }
            "starttime" => hi.starttime.cmp(&hc.starttime),
            "npts" => hc.npts.cmp(&hi.npts),
            "sampling_rate" => hc
                .sampling_rate
                .partial_cmp(&hi.sampling_rate)
                .unwrap_or(Ordering::Equal),
            "location_code" => hi.location.cmp(&hc.location),
            other => {
                debug!("unknown duplicate preference key {:?}; skipped", other);
                Ordering::Equal
            }
        };
        match ordering {
            Ordering::Less => return false,
            Ordering::Greater => return true,
            Ordering::Equal => continue,
        }
    }
    // Tie on every configured key: first record seen wins.
    false
}

/// Of several instruments colocated at one station, keep the first one the
/// preference globs name.
fn select_colocated(streams: Vec<StationStream>, cfg: &ColocatedConf) -> Vec<StationStream> {
    use std::collections::BTreeMap;
    let mut by_station: BTreeMap<String, Vec<StationStream>> = BTreeMap::new();
    for stream in streams {
        let header = stream.traces()[0].header();
        let key = format!("{}.{}", header.network, header.station);
        by_station.entry(key).or_default().push(stream);
    }

    let mut kept = Vec::new();
    for (station, group) in by_station {
        let instruments: Vec<String> = {
            let mut seen = Vec::new();
            for stream in &group {
                let inst = stream.traces()[0].header().instrument();
                if !seen.contains(&inst) {
                    seen.push(inst);
                }
            }
            seen
        };
        if instruments.len() <= 1 {
            kept.extend(group);
            continue;
        }
        let choice = cfg.preference.iter().find_map(|pattern| {
            instruments
                .iter()
                .find(|inst| {
                    group.iter().any(|s| {
                        let h = s.traces()[0].header();
                        h.instrument() == **inst && glob_match(pattern, &h.channel)
                    })
                })
                .cloned()
        });
        match choice {
            Some(inst) => {
                info!(
                    "colocated instruments at {}: keeping {} of {:?}",
                    station, inst, instruments
                );
                kept.extend(
                    group
                        .into_iter()
                        .filter(|s| s.traces()[0].header().instrument() == inst),
                );
            }
            None => {
                debug!(
                    "colocated instruments at {} match no preference pattern; keeping all",
                    station
                );
                kept.extend(group);
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{ProcessLevel, Units};
    use crate::trace::{Coordinates, StandardMetadata, StationTrace, TraceHeader};
    use chrono::{TimeZone, Utc};

    fn stream(
        network: &str,
        station: &str,
        instrument: &str,
        process_level: ProcessLevel,
        lat: f64,
    ) -> StationStream {
        let traces = ["1", "2", "Z"]
            .iter()
            .map(|comp| {
                let header = TraceHeader {
                    network: network.to_string(),
                    station: station.to_string(),
                    location: String::new(),
                    channel: format!("{}{}", instrument, comp),
                    starttime: Utc.with_ymd_and_hms(1994, 1, 17, 12, 30, 0).unwrap(),
                    sampling_rate: 100.0,
                    npts: 0,
                    units: Units::CmPerSecSquared,
                    coordinates: Coordinates {
                        latitude: lat,
                        longitude: -118.0,
                        elevation: 0.0,
                    },
                    standard: StandardMetadata {
                        process_level,
                        ..StandardMetadata::default()
                    },
                };
                StationTrace::new(vec![0.0; 100], header).unwrap()
            })
            .collect();
        StationStream::new(traces).unwrap()
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("HN?", "HN1"));
        assert!(glob_match("H*", "HNZ"));
        assert!(!glob_match("BN?", "HN1"));
        assert!(!glob_match("HN?", "HN"));
    }

    #[test]
    fn process_level_preference_keeps_v1() {
        // Same site recorded by two data centers at V1 and V2; the
        // configured preference order keeps the V1 record.
        let v2 = stream("ZZ", "TOP", "HN", ProcessLevel::V2, 34.0);
        let v1 = stream("CI", "TOP", "HN", ProcessLevel::V1, 34.0);
        let cfg = DuplicateConf::default();
        let collection =
            StreamCollection::assemble(vec![v2, v1], &cfg, &ColocatedConf { preference: vec![] });
        assert_eq!(collection.len(), 1);
        assert_eq!(
            collection.streams()[0].traces()[0]
                .header()
                .standard
                .process_level,
            ProcessLevel::V1
        );
    }

    #[test]
    fn distant_same_name_stations_are_not_duplicates() {
        let a = stream("CI", "TOP", "HN", ProcessLevel::V1, 34.0);
        let b = stream("ZZ", "TOP", "HN", ProcessLevel::V1, 35.0);
        let cfg = DuplicateConf::default();
        let collection =
            StreamCollection::assemble(vec![a, b], &cfg, &ColocatedConf { preference: vec![] });
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn tie_keeps_first_seen() {
        let a = stream("CI", "TOP", "HN", ProcessLevel::V1, 34.0);
        let b = stream("ZZ", "TOP", "HN", ProcessLevel::V1, 34.0);
        let cfg = DuplicateConf::default();
        let collection =
            StreamCollection::assemble(vec![a, b], &cfg, &ColocatedConf { preference: vec![] });
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.streams()[0].traces()[0].header().network, "CI");
    }

    #[test]
    fn colocated_preference_selects_instrument() {
        let hn = stream("CI", "TOP", "HN", ProcessLevel::V1, 34.0);
        let bh = stream("CI", "TOP", "BH", ProcessLevel::V1, 34.0);
        let collection = StreamCollection::assemble(
            vec![bh, hn],
            &DuplicateConf::default(),
            &ColocatedConf::default(),
        );
        assert_eq!(collection.len(), 1);
        assert_eq!(
            collection.streams()[0].traces()[0].header().instrument(),
            "HN"
        );
    }

    #[test]
    fn new_rejects_shared_ids() {
        let a = stream("CI", "TOP", "HN", ProcessLevel::V1, 34.0);
        let b = stream("CI", "TOP", "HN", ProcessLevel::V1, 34.0);
        assert!(StreamCollection::new(vec![a, b]).is_err());
    }
}
