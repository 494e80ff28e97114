//! Dataset and group naming of the container layout.
//!
//! The delimiters are structural: `.` joins channel-code components, `__`
//! separates the code block from the start and end times in waveform names,
//! and `_` separates the event id from the label in record suffixes. Labels
//! therefore must never contain `_`.
use chrono::{DateTime, NaiveDateTime, Utc};

use strongmotion_core::trace::TraceHeader;

pub const WAVEFORMS_GROUP: &str = "Waveforms";
pub const AUX_GROUP: &str = "AuxiliaryData";
pub const PROVENANCE_GROUP: &str = "Provenance";
pub const QUAKEML_DATASET: &str = "QuakeML";
pub const STATIONXML_DATASET: &str = "StationXML";

pub const WAVEFORM_METRICS: &str = "WaveformMetrics";
pub const STATION_METRICS: &str = "StationMetrics";
pub const TRACE_PARAMETERS: &str = "TraceProcessingParameters";
pub const STREAM_PARAMETERS: &str = "StreamProcessingParameters";
pub const CACHE: &str = "Cache";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// `NET.STA`, the per-station group name.
pub fn station_group(header: &TraceHeader) -> String {
    format!("{}.{}", header.network, header.station)
}

pub fn format_name_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn parse_name_time(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// The full waveform dataset name:
/// `NET.STA.LOC.CHA__START__END__EVENTID_LABEL`.
pub fn waveform_dataset_name(
    header: &TraceHeader,
    event_id: &str,
    label: &str,
) -> String {
    format!(
        "{}__{}__{}__{}_{}",
        header.id(),
        format_name_time(header.starttime),
        format_name_time(header.endtime()),
        event_id,
        label
    )
}

/// The per-record auxiliary name: `NET.STA.LOC.X_EVENTID_LABEL`, where `X`
/// is a channel or instrument code.
pub fn record_name(channel_id: &str, event_id: &str, label: &str) -> String {
    format!("{}_{}_{}", channel_id, event_id, label)
}

/// A parsed waveform dataset name.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformTag {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub starttime: DateTime<Utc>,
    pub endtime: DateTime<Utc>,
    pub event_id: String,
    pub label: String,
}

impl WaveformTag {
    pub fn parse(name: &str) -> Option<Self> {
        let mut blocks = name.split("__");
        let code = blocks.next()?;
        let start = blocks.next()?;
        let end = blocks.next()?;
        let trailer = blocks.next()?;
        if blocks.next().is_some() {
            return None;
        }
        let mut code_parts = code.split('.');
        let network = code_parts.next()?.to_string();
        let station = code_parts.next()?.to_string();
        let location = code_parts.next()?.to_string();
        let channel = code_parts.next()?.to_string();
        if code_parts.next().is_some() {
            return None;
        }
        let (event_id, label) = trailer.rsplit_once('_')?;
        Some(Self {
            network,
            station,
            location,
            channel,
            starttime: parse_name_time(start)?,
            endtime: parse_name_time(end)?,
            event_id: event_id.to_string(),
            label: label.to_string(),
        })
    }

    pub fn channel_id(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }

    /// The instrument-level stream id this trace belongs to.
    pub fn stream_id(&self) -> String {
        let n = self.channel.len().saturating_sub(1);
        format!(
            "{}.{}.{}.{}",
            self.network,
            self.station,
            self.location,
            &self.channel[..n]
        )
    }
}

/// Cached-array dataset name for one cache kind, e.g.
/// `signal_spectrum_freq` -> `SignalSpectrumFreq`.
pub fn cache_name(kind: &str) -> String {
    kind.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Inverse of [`cache_name`].
pub fn cache_kind(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
