//! Signal processing and ground-motion metrics for strong-motion station
//! streams.
//!
//! The crate is organized the way the data flows. The spectrum kernel
//! ([`fft`], [`smoothing`], [`spectra`]) and the array primitives ([`ops`],
//! [`filter`], [`baseline`], [`oscillator`], [`rotation`]) are pure
//! functions over sample buffers. On top of them sit the window selection
//! ([`pickers`], [`windows`]), the SNR and passband logic ([`snr`]), the
//! registered processing steps ([`steps`]) and the ordered executor
//! ([`pipeline`]). The [`metrics`] and [`station_metrics`] engines read
//! processed streams and produce the values the workspace container stores.
//!
//! Nothing here does file I/O; streams come from `strongmotion-in` and land
//! in `strongmotion-asdf`.

pub mod baseline;
pub mod fft;
pub mod filter;
pub mod metrics;
pub mod ops;
pub mod oscillator;
pub mod pickers;
pub mod pipeline;
pub mod rotation;
pub mod smoothing;
pub mod snr;
pub mod spectra;
pub mod station_metrics;
pub mod steps;
pub mod windows;

pub use metrics::{compute_waveform_metrics, WaveformMetricCollection};
pub use pipeline::{process_streams, CancelToken, Pipeline, ProcessingSummary, StepRegistry};
pub use station_metrics::{compute_station_metrics, StationMetrics};
