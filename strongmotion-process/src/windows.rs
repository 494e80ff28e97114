//! Noise/signal window selection and the window QA checks.
//!
//! The split point comes from the ordered fallback picker chain; the signal
//! end from one of four models. Both land in the trace/stream parameter bags
//! so that every later step (SNR, corner frequencies, cut) reads the same
//! windows.
use chrono::{DateTime, Duration, Utc};
use log::debug;

use strongmotion_core::config::Config;
use strongmotion_core::enums::SignalEndMethod;
use strongmotion_core::errors::SmError;
use strongmotion_core::event::Event;
use strongmotion_core::parameters::{Param, ParamKey};
use strongmotion_core::stream::StationStream;

use crate::pickers;

/// Reference shear-wave velocity used by the duration model when no site
/// measurement is available.
pub const DEFAULT_VS30: f64 = 760.0;

fn seconds(duration: f64) -> Duration {
    Duration::nanoseconds((duration * 1e9) as i64)
}

/// Mean and standard deviation, in seconds, of the significant duration
/// predicted for a magnitude, hypocentral distance and site stiffness.
///
/// A compact parametric form: log-linear magnitude scaling, a distance term
/// that grows slowly beyond 10 km, and a softer-site lengthening.
pub fn mean_and_sd_duration(magnitude: f64, distance_km: f64, vs30: f64) -> (f64, f64) {
    let ln_mean = -1.0 + 0.55 * magnitude + 0.4 * (distance_km + 10.0).ln()
        - 0.3 * (vs30 / DEFAULT_VS30).ln();
    let mean = ln_mean.exp();
    (mean, 0.4 * mean)
}

/// Coarse magnitude-only signal durations for the `magnitude` end method.
fn magnitude_duration(magnitude: f64) -> f64 {
    if magnitude < 5.0 {
        60.0
    } else if magnitude < 6.0 {
        90.0
    } else if magnitude < 7.0 {
        120.0
    } else {
        180.0
    }
}

/// Estimate the noise/signal split for a stream and record it on the stream
/// and each trace.
///
/// The travel-time prediction is used when it lands inside the record; when
/// it lands at or before the record start, the autoregressive and STA/LTA
/// pickers each propose a candidate and the one with the larger post-split
/// time-domain SNR wins.
pub fn signal_split(
    stream: &mut StationStream,
    event: &Event,
    config: &Config,
) -> Result<(), SmError> {
    let (data, starttime, endtime, rate, coordinates) = {
        let trace = stream.vertical().unwrap_or(&stream.traces()[0]);
        (
            trace.data().to_vec(),
            trace.starttime(),
            trace.endtime(),
            trace.sampling_rate(),
            trace.header().coordinates,
        )
    };

    let predicted = pickers::travel_time_pick(event, &coordinates, &config.pickers.travel_time.layers);
    let (mut split, picker_name) = if predicted > starttime && predicted < endtime {
        (predicted, "travel_time")
    } else {
        debug!(
            "travel-time pick {} outside record [{}, {}]; engaging fallback pickers",
            predicted, starttime, endtime
        );
        let mut best: Option<(usize, &str, f64)> = None;
        let candidates = [
            (pickers::ar_pick(&data, rate, &config.pickers.ar), "ar"),
            (
                pickers::sta_lta_pick(&data, rate, &config.pickers.stalta),
                "sta_lta",
            ),
        ];
        for (candidate, name) in candidates {
            if let Some(idx) = candidate {
                let snr = split_snr(&data, idx);
                if best.map(|(_, _, s)| snr > s).unwrap_or(true) {
                    best = Some((idx, name, snr));
                }
            }
        }
        match best {
            Some((idx, name, _)) => (starttime + seconds(idx as f64 / rate), name),
            None => {
                stream.fail("signal_split", "No P arrival could be determined");
                return Ok(());
            }
        }
    };

    split = split + seconds(config.pickers.p_arrival_shift);
    if split <= starttime || split >= endtime {
        stream.fail("signal_split", "P arrival outside the record");
        return Ok(());
    }

    let param = Param::SignalSplit {
        split_time: split,
        picker: picker_name.to_string(),
    };
    stream.set_parameter(param.clone());
    for trace in stream.traces_mut() {
        trace.set_parameter(param.clone());
    }
    Ok(())
}

/// Time-domain SNR of a candidate split: signal RMS over noise RMS.
fn split_snr(data: &[f64], idx: usize) -> f64 {
    if idx == 0 || idx >= data.len() {
        return 0.0;
    }
    let rms = |slice: &[f64]| {
        (slice.iter().map(|&x| x * x).sum::<f64>() / slice.len() as f64).sqrt()
    };
    let noise = rms(&data[..idx]);
    let signal = rms(&data[idx..]);
    if noise > 0.0 {
        signal / noise
    } else {
        f64::INFINITY
    }
}

/// Choose the end of the signal window and record it.
pub fn signal_end(
    stream: &mut StationStream,
    event: &Event,
    config: &Config,
) -> Result<(), SmError> {
    let conf = &config.windows.signal_end;
    let Some(split) = stream.parameters().split_time() else {
        stream.fail("signal_end", "no signal split to anchor the window");
        return Ok(());
    };
    let (endtime, coordinates) = {
        let trace = &stream.traces()[0];
        (trace.endtime(), trace.header().coordinates)
    };
    let distance = event.hypocentral_distance_km(coordinates.latitude, coordinates.longitude);

    let end: DateTime<Utc> = match conf.method {
        SignalEndMethod::Model => {
            let (mean, sd) = mean_and_sd_duration(event.magnitude, distance, DEFAULT_VS30);
            let duration = (mean + conf.epsilon * sd).max(conf.floor);
            split + seconds(duration)
        }
        SignalEndMethod::Velocity => {
            let arrival = event.time + seconds(distance / conf.vmin);
            let floored = split + seconds(conf.floor);
            arrival.max(floored)
        }
        SignalEndMethod::Magnitude => {
            let duration = magnitude_duration(event.magnitude).max(conf.floor);
            split + seconds(duration)
        }
        SignalEndMethod::None => endtime,
    };

    let end = end.min(endtime);
    let param = Param::SignalEnd {
        end_time: end,
        method: format!("{:?}", conf.method).to_lowercase(),
    };
    stream.set_parameter(param.clone());
    for trace in stream.traces_mut() {
        trace.set_parameter(param.clone());
    }
    Ok(())
}

/// Enforce the minimum noise and signal durations.
pub fn window_checks(stream: &mut StationStream, config: &Config) -> Result<(), SmError> {
    let conf = &config.windows.window_checks;
    if !conf.enabled {
        return Ok(());
    }
    let Some(split) = stream.parameters().split_time() else {
        stream.fail("window_checks", "no signal split to check");
        return Ok(());
    };
    let Some(end) = stream.parameters().end_time() else {
        stream.fail("window_checks", "no signal end to check");
        return Ok(());
    };
    let starttime = stream.traces()[0].starttime();
    let noise_s = (split - starttime).num_nanoseconds().unwrap_or(0) as f64 / 1e9;
    let signal_s = (end - split).num_nanoseconds().unwrap_or(0) as f64 / 1e9;
    if noise_s < conf.min_noise_duration {
        stream.fail(
            "window_checks",
            &format!(
                "Noise window duration of {:.2} s is less than minimum of {:.2} s",
                noise_s, conf.min_noise_duration
            ),
        );
    } else if signal_s < conf.min_signal_duration {
        stream.fail(
            "window_checks",
            &format!(
                "Signal window duration of {:.2} s is less than minimum of {:.2} s",
                signal_s, conf.min_signal_duration
            ),
        );
    }
    Ok(())
}

/// Run the whole windowing pass: split, end, checks.
pub fn compute_windows(
    stream: &mut StationStream,
    event: &Event,
    config: &Config,
) -> Result<(), SmError> {
    signal_split(stream, event, config)?;
    if stream.passed() {
        signal_end(stream, event, config)?;
    }
    if stream.passed() {
        window_checks(stream, config)?;
    }
    Ok(())
}

/// Sample indices of the noise and signal windows of a trace, from its
/// recorded split/end parameters.
pub fn window_indices(
    trace: &strongmotion_core::trace::StationTrace,
) -> Result<(usize, usize), SmError> {
    let split = trace
        .parameters()
        .split_time()
        .ok_or_else(|| SmError::MissingParameter {
            key: ParamKey::SignalSplit.as_str().to_string(),
        })?;
    let end = trace
        .parameters()
        .end_time()
        .unwrap_or_else(|| trace.endtime());
    let rate = trace.sampling_rate();
    let to_idx = |t: DateTime<Utc>| -> usize {
        let dt_s = (t - trace.starttime()).num_nanoseconds().unwrap_or(0) as f64 / 1e9;
        ((dt_s * rate).round() as i64).clamp(0, trace.npts() as i64) as usize
    };
    Ok((to_idx(split), to_idx(end)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
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

    fn stream(start_offset_s: i64, seconds_len: f64) -> StationStream {
        let rate = 100.0;
        let n = (seconds_len * rate) as usize;
        let onset = n / 3;
        let traces = ["HN1", "HN2", "HNZ"]
            .iter()
            .map(|cha| {
                let data: Vec<f64> = (0..n)
                    .map(|i| {
                        let noise = 0.005 * ((i * 31 % 13) as f64 - 6.0) / 6.0;
                        if i >= onset {
                            noise + 1.5 * (0.1 * (i - onset) as f64).sin()
                        } else {
                            noise
                        }
                    })
                    .collect();
                let header = TraceHeader {
                    network: "CI".to_string(),
                    station: "TOP".to_string(),
                    location: String::new(),
                    channel: cha.to_string(),
                    starttime: Utc.with_ymd_and_hms(1994, 1, 17, 12, 30, 55).unwrap()
                        + Duration::seconds(start_offset_s),
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
            })
            .collect();
        StationStream::new(traces).unwrap()
    }

    #[test]
    fn duration_model_behaves() {
        let (m5, _) = mean_and_sd_duration(5.0, 20.0, DEFAULT_VS30);
        let (m7, _) = mean_and_sd_duration(7.0, 20.0, DEFAULT_VS30);
        assert!(m7 > m5);
        let (near, _) = mean_and_sd_duration(6.0, 5.0, DEFAULT_VS30);
        let (far, _) = mean_and_sd_duration(6.0, 200.0, DEFAULT_VS30);
        assert!(far > near);
        let (stiff, _) = mean_and_sd_duration(6.0, 20.0, 1500.0);
        let (soft, _) = mean_and_sd_duration(6.0, 20.0, 200.0);
        assert!(soft > stiff);
    }

    #[test]
    fn travel_time_split_lands_in_record() {
        let mut s = stream(0, 90.0);
        signal_split(&mut s, &event(), &Config::default()).unwrap();
        assert!(s.passed());
        let split = s.parameters().split_time().unwrap();
        assert!(split > s.traces()[0].starttime());
        assert!(split < s.traces()[0].endtime());
        // Every trace carries the same split.
        for t in s.traces() {
            assert_eq!(t.parameters().split_time().unwrap(), split);
        }
    }

    #[test]
    fn early_prediction_engages_fallback_pickers() {
        // Start the record well after the origin: the predicted arrival is
        // before the first sample and a waveform picker must take over.
        let mut s = stream(60, 90.0);
        signal_split(&mut s, &event(), &Config::default()).unwrap();
        assert!(s.passed());
        let split = s.parameters().split_time().unwrap();
        let offset =
            (split - s.traces()[0].starttime()).num_milliseconds() as f64 / 1e3;
        // The synthetic onset sits a third of the way in (30 s); allow for
        // the configured arrival shift.
        assert!((offset - 30.0).abs() < 4.0, "split at {} s", offset);
    }

    #[test]
    fn model_end_respects_floor() {
        let mut s = stream(0, 400.0);
        let mut config = Config::default();
        config.windows.signal_end.floor = 300.0;
        signal_split(&mut s, &event(), &config).unwrap();
        signal_end(&mut s, &event(), &config).unwrap();
        let split = s.parameters().split_time().unwrap();
        let end = s.parameters().end_time().unwrap();
        assert!((end - split).num_seconds() >= 299);
    }

    #[test]
    fn short_windows_fail_checks() {
        let mut s = stream(0, 90.0);
        let mut config = Config::default();
        config.windows.window_checks.min_signal_duration = 1e5;
        compute_windows(&mut s, &event(), &config).unwrap();
        assert!(!s.passed());
        assert!(s.failures()[0].reason.contains("Signal window"));
    }

    #[test]
    fn window_indices_round_trip() {
        let mut s = stream(0, 90.0);
        compute_windows(&mut s, &event(), &Config::default()).unwrap();
        assert!(s.passed());
        let (split_idx, end_idx) = window_indices(&s.traces()[0]).unwrap();
        assert!(split_idx > 0);
        assert!(end_idx > split_idx);
        assert!(end_idx <= s.traces()[0].npts());
    }
}
