//! This library is the foundation for the `strongmotion-in`,
//! `strongmotion-process` and `strongmotion-asdf` crates. It holds the typed
//! containers raw strong-motion records are normalized into: traces,
//! station streams and event-level collections, together with the
//! provenance ledger, the typed parameter bags, the station inventory model
//! and the layered configuration that drives the processing pipeline.
//!
//! Nothing here reads files or runs signal processing; those live in the
//! sibling crates so that the containers stay cheap to depend on.

pub mod collection;
pub mod config;
pub mod enums;
pub mod errors;
pub mod event;
pub mod geo;
pub mod parameters;
pub mod provenance;
pub mod stationxml;
pub mod stream;
pub mod trace;
#[cfg(test)]
mod tests;

pub use errors::SmError;

pub use collection::StreamCollection;
pub use config::Config;
pub use enums::{ProcessLevel, Units};
pub use event::Event;
pub use stream::StationStream;
pub use trace::{Coordinates, StandardMetadata, StationTrace, TraceHeader};

use chrono::{DateTime, TimeZone, Utc};

/// Standard gravity in m/s/s, for `%g` conversions.
pub const GRAVITY_M_S2: f64 = 9.80665;
/// Standard gravity in cm/s/s.
pub const GRAVITY_CM_S2: f64 = 980.665;

/// Nanoseconds since the epoch for a UTC instant, the form used by the
/// workspace container's `starttime` attributes.
pub fn epoch_ns(time: DateTime<Utc>) -> Result<i64, SmError> {
    time.timestamp_nanos_opt().ok_or_else(|| SmError::Validation {
        msg: format!("time {} does not fit in nanoseconds since the epoch", time),
    })
}

/// The UTC instant for a nanoseconds-since-epoch value.
pub fn from_epoch_ns(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns)
}
