//! The built-in processing steps.
//!
//! Every step shares one contract: it receives the stream, the event, its
//! own configuration block and the full configuration, mutates only passing
//! traces, records QA failures with `fail` rather than errors, and appends
//! provenance for the traces it touches. Returned errors mean the step
//! itself broke; the executor converts them into a stream failure without
//! stopping sibling streams.
use log::debug;
use serde_json::{json, Value};

use strongmotion_core::config::{Config, StepConf};
use strongmotion_core::enums::{DetrendMethod, TaperSide, Units};
use strongmotion_core::errors::SmError;
use strongmotion_core::event::Event;
use strongmotion_core::parameters::{Param, ParamKey};
use strongmotion_core::stream::StationStream;
use strongmotion_core::GRAVITY_CM_S2;

use crate::baseline;
use crate::filter;
use crate::ops;
use crate::snr;
use crate::spectra;
use crate::windows::window_indices;

/// The reason recorded when a stream carries more traces than one
/// instrument can.
pub const NONUNIQUE_CHANNELS: &str = "Nonunique channel code in StationStream";

pub type StepFn =
    fn(&mut StationStream, Option<&Event>, &StepConf, &Config) -> Result<(), SmError>;

/// Fail streams carrying more channels than one instrument records.
pub fn check_stream(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    let max_traces = conf.arg_usize("max_traces").unwrap_or(3);
    if stream.len() > max_traces {
        stream.fail("check_stream", NONUNIQUE_CHANNELS);
    }
    Ok(())
}

/// Fail streams recorded below the minimum usable sampling rate.
pub fn min_sample_rate(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    let min_sps = conf.arg_f64("min_sps").unwrap_or(20.0);
    let rate = stream.sampling_rate();
    if rate < min_sps {
        stream.fail(
            "min_sample_rate",
            &format!(
                "Sampling rate of {} Hz is below the minimum of {} Hz",
                rate, min_sps
            ),
        );
    }
    Ok(())
}

pub fn detrend(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    let tag = conf.require_str("detrending_method")?.to_string();
    let method = DetrendMethod::new(&tag).map_err(|_| SmError::Config {
        msg: format!("unknown detrending_method {:?}", tag),
    })?;
    for trace in stream.traces_mut() {
        if !trace.passed() {
            continue;
        }
        let dt = trace.delta();
        let mut data = trace.data().to_vec();
        let mut extra_attrs: Vec<(String, Value)> = Vec::new();
        match method {
            DetrendMethod::Constant | DetrendMethod::Demean => ops::demean(&mut data),
            DetrendMethod::Linear => ops::detrend_linear(&mut data),
            DetrendMethod::Polynomial => {
                let order = conf.arg_usize("order").unwrap_or(6);
                baseline::remove_polynomial(&mut data, order)?;
                extra_attrs.push(("order".to_string(), json!(order)));
            }
            DetrendMethod::Spline => {
                let knots = conf.arg_usize("knots").unwrap_or(8);
                baseline::remove_spline(&mut data, knots)?;
                extra_attrs.push(("knots".to_string(), json!(knots)));
            }
            DetrendMethod::Pre => {
                let (split_idx, _) = match window_indices(trace) {
                    Ok(idx) => idx,
                    Err(_) => {
                        trace.fail("detrend", "no pre-event window has been computed");
                        continue;
                    }
                };
                if baseline::remove_pre_event_baseline(&mut data, split_idx).is_err() {
                    trace.fail("detrend", "pre-event window too short for a baseline");
                    continue;
                }
            }
            DetrendMethod::BaselineSixthOrder => {
                if !trace.units().is_acceleration() {
                    trace.fail("detrend", "sixth-order baseline requires acceleration");
                    continue;
                }
                let coefs = baseline::correct_sixth_order(&mut data, dt)?;
                trace.set_parameter(Param::BaselineCoefs { coefs });
            }
        }
        trace.set_data(data)?;
        let mut attrs = vec![("detrending_method".to_string(), json!(tag))];
        attrs.extend(extra_attrs);
        trace.set_provenance("detrend", attrs);
    }
    Ok(())
}

/// Convert to physical units using the overall instrument sensitivity, then
/// to the configured output units.
pub fn remove_response(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    let output = conf.arg_str("output").unwrap_or("cm/s/s");
    let target = Units::new(output)?;
    if !target.is_acceleration() {
        return Err(SmError::Config {
            msg: format!("remove_response output must be an acceleration unit, got {}", output),
        });
    }
    for trace in stream.traces_mut() {
        if !trace.passed() {
            continue;
        }
        let mut data = trace.data().to_vec();
        // First to cm/s/s.
        match trace.units() {
            Units::Counts => {
                let Some(sensitivity) = trace.header().standard.instrument_sensitivity else {
                    trace.fail("remove_response", "no instrument sensitivity available");
                    continue;
                };
                for x in data.iter_mut() {
                    *x /= sensitivity;
                }
            }
            Units::CmPerSecSquared => {}
            Units::PercentG => {
                for x in data.iter_mut() {
                    *x *= GRAVITY_CM_S2 / 100.0;
                }
            }
            Units::MPerSecSquared => {
                for x in data.iter_mut() {
                    *x *= 100.0;
                }
            }
            other => {
                trace.fail(
                    "remove_response",
                    &format!("cannot convert {} to acceleration", other),
                );
                continue;
            }
        }
        // Then to the requested output units.
        match target {
            Units::PercentG => {
                for x in data.iter_mut() {
                    *x *= 100.0 / GRAVITY_CM_S2;
                }
            }
            Units::MPerSecSquared => {
                for x in data.iter_mut() {
                    *x /= 100.0;
                }
            }
            _ => {}
        }
        trace.set_data(data)?;
        trace.set_units(target)?;
        trace.set_provenance(
            "remove_response",
            vec![("output_units".to_string(), json!(target.as_str()))],
        );
    }
    Ok(())
}

pub fn compute_snr(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    let bandwidth = conf.arg_f64("bandwidth").unwrap_or(20.0);
    snr::compute_snr(stream, bandwidth)?;
    for trace in stream.traces_mut() {
        if trace.passed() {
            trace.set_provenance(
                "calculate_snr",
                vec![("smoothing_bandwidth".to_string(), json!(bandwidth))],
            );
        }
    }
    Ok(())
}

pub fn snr_check(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    let threshold = conf.arg_f64("threshold").unwrap_or(3.0);
    let min_freq = conf.arg_f64("min_freq").unwrap_or(0.2);
    let max_freq = conf.arg_f64("max_freq").unwrap_or(5.0);
    snr::snr_check(stream, threshold, min_freq, max_freq)
}

pub fn get_corner_frequencies(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    match conf.require_str("method")? {
        "constant" => {
            let block = conf.arg_map("constant");
            let highpass = block
                .and_then(|m| m.get("highpass"))
                .and_then(|v| v.as_f64())
                .unwrap_or(0.08);
            let lowpass = block
                .and_then(|m| m.get("lowpass"))
                .and_then(|v| v.as_f64())
                .unwrap_or(20.0);
            snr::corner_frequencies_constant(stream, highpass, lowpass)
        }
        "snr" => {
            let block = conf.arg_map("snr");
            let same_horiz = block
                .and_then(|m| m.get("same_horiz"))
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            let threshold = block
                .and_then(|m| m.get("threshold"))
                .and_then(|v| v.as_f64())
                .or_else(|| {
                    stream.traces().iter().find_map(|t| {
                        match t.get_parameter(ParamKey::SnrConf) {
                            Some(Param::SnrConf { threshold, .. }) => Some(*threshold),
                            _ => None,
                        }
                    })
                })
                .unwrap_or(3.0);
            snr::corner_frequencies_snr(stream, threshold, same_horiz)
        }
        other => Err(SmError::Config {
            msg: format!("unknown corner frequency method {:?}", other),
        }),
    }
}

pub fn lowpass_max_frequency(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    let fn_fac = conf.arg_f64("fn_fac").unwrap_or(0.75);
    snr::lowpass_max_frequency(stream, fn_fac)
}

pub fn adjust_highpass_ridder(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    let step_factor = conf.arg_f64("step_factor").unwrap_or(1.5);
    let maximum_freq = conf.arg_f64("maximum_freq").unwrap_or(0.5);
    let max_final_displacement = conf.arg_f64("max_final_displacement").unwrap_or(0.2);
    let max_displacement_ratio = conf.arg_f64("max_displacement_ratio").unwrap_or(0.2);
    let filter_order = conf.arg_usize("filter_order").unwrap_or(5);
    snr::adjust_highpass(
        stream,
        step_factor,
        maximum_freq,
        max_final_displacement,
        max_displacement_ratio,
        filter_order,
    )
}

/// Trim each trace to `[split - sec_before_split, signal_end]`.
pub fn cut(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    let sec_before_split = conf.arg_f64("sec_before_split").unwrap_or(2.0);
    for trace in stream.traces_mut() {
        if !trace.passed() {
            continue;
        }
        let (split_idx, end_idx) = match window_indices(trace) {
            Ok(idx) => idx,
            Err(_) => {
                trace.fail("cut", "no signal window has been computed");
                continue;
            }
        };
        let rate = trace.sampling_rate();
        let lead = (sec_before_split * rate).round() as usize;
        let start_idx = split_idx.saturating_sub(lead);
        let end_idx = end_idx.max(start_idx + 1).min(trace.npts());
        let new_start = trace.starttime()
            + chrono::Duration::nanoseconds((start_idx as f64 / rate * 1e9).round() as i64);
        let data = trace.data()[start_idx..end_idx].to_vec();
        trace.set_timeseries(data, new_start, rate)?;
        trace.set_provenance(
            "cut",
            vec![
                ("new_start_time".to_string(), json!(new_start.to_rfc3339())),
                ("sec_before_split".to_string(), json!(sec_before_split)),
            ],
        );
    }
    Ok(())
}

pub fn taper(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    let width = conf.arg_f64("width").unwrap_or(0.05);
    let side = match conf.arg_str("side").unwrap_or("both") {
        "both" => TaperSide::Both,
        "left" => TaperSide::Left,
        "right" => TaperSide::Right,
        other => {
            return Err(SmError::Config {
                msg: format!("unknown taper side {:?}", other),
            })
        }
    };
    for trace in stream.traces_mut() {
        if !trace.passed() {
            continue;
        }
        let mut data = trace.data().to_vec();
        ops::taper_hann(&mut data, width, side);
        trace.set_data(data)?;
        trace.set_provenance(
            "taper",
            vec![
                ("window_type".to_string(), json!("Hann")),
                ("taper_width".to_string(), json!(width)),
                ("side".to_string(), json!(format!("{:?}", side).to_lowercase())),
            ],
        );
    }
    Ok(())
}

fn apply_filter(
    stream: &mut StationStream,
    conf: &StepConf,
    highpass: bool,
) -> Result<(), SmError> {
    let order = conf.arg_usize("filter_order").unwrap_or(5);
    let passes = conf.arg_usize("number_of_passes").unwrap_or(2);
    let step_name = if highpass { "highpass_filter" } else { "lowpass_filter" };
    for trace in stream.traces_mut() {
        if !trace.passed() {
            continue;
        }
        let Some((hp, lp)) = trace.parameters().corner_frequencies() else {
            trace.fail(step_name, "no corner frequencies have been selected");
            continue;
        };
        let rate = trace.sampling_rate();
        let corner = if highpass { hp } else { lp };
        let sos = if highpass {
            filter::butter_highpass(order, corner, rate)
        } else {
            // A lowpass corner at or above Nyquist means nothing to remove.
            if corner >= rate / 2.0 {
                trace.set_provenance(
                    step_name,
                    vec![("corner_frequency".to_string(), json!(corner))],
                );
                continue;
            }
            filter::butter_lowpass(order, corner, rate)
        }?;
        let mut data = trace.data().to_vec();
        filter::apply(&sos, &mut data, passes)?;
        trace.set_data(data)?;
        trace.set_provenance(
            step_name,
            vec![
                ("filter_type".to_string(), json!("Butterworth")),
                ("corner_frequency".to_string(), json!(corner)),
                ("filter_order".to_string(), json!(order as i64)),
                ("number_of_passes".to_string(), json!(passes as i64)),
            ],
        );
    }
    Ok(())
}

pub fn highpass_filter(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    apply_filter(stream, conf, true)
}

pub fn lowpass_filter(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    apply_filter(stream, conf, false)
}

/// Integer-factor upsampling to a configured rate.
pub fn resample(
    stream: &mut StationStream,
    _event: Option<&Event>,
    conf: &StepConf,
    config: &Config,
) -> Result<(), SmError> {
    let Some(target) = conf
        .arg_f64("new_sampling_rate")
        .or(config.read.resample_rate)
    else {
        debug!("resample: no target rate configured; nothing to do");
        return Ok(());
    };
    for trace in stream.traces_mut() {
        if !trace.passed() {
            continue;
        }
        let rate = trace.sampling_rate();
        if (target - rate).abs() < 1e-9 {
            continue;
        }
        let factor = target / rate;
        if factor < 1.0 || (factor - factor.round()).abs() > 1e-9 {
            trace.fail(
                "resample",
                &format!("cannot resample {} Hz to {} Hz by an integer factor", rate, target),
            );
            continue;
        }
        let data = crate::fft::upsample(trace.data(), factor.round() as usize);
        let start = trace.starttime();
        trace.set_timeseries(data, start, target)?;
        trace.set_provenance(
            "resample",
            vec![("new_sampling_rate".to_string(), json!(target))],
        );
    }
    Ok(())
}

/// Fit the Brune source model to each horizontal's signal-window
/// displacement spectrum. Advisory: the fit never fails a trace.
pub fn fit_spectra(
    stream: &mut StationStream,
    event: Option<&Event>,
    _conf: &StepConf,
    _config: &Config,
) -> Result<(), SmError> {
    let Some(event) = event else {
        debug!("fit_spectra: no event available; skipping");
        return Ok(());
    };
    for trace in stream.traces_mut() {
        if !trace.passed() || !trace.header().is_horizontal() {
            continue;
        }
        let Ok((split_idx, end_idx)) = window_indices(trace) else {
            continue;
        };
        if end_idx <= split_idx {
            continue;
        }
        let dt = trace.delta();
        let signal = &trace.data()[split_idx..end_idx];
        let fas = spectra::acceleration_fas(signal, dt, signal.len());
        let disp = spectra::displacement_spectrum(&fas);
        let (f_lo, f_hi) = trace
            .parameters()
            .corner_frequencies()
            .unwrap_or((0.1, 0.375 * trace.sampling_rate()));
        let coordinates = trace.header().coordinates;
        let distance =
            event.hypocentral_distance_km(coordinates.latitude, coordinates.longitude);
        match spectra::fit_brune(&disp, f_lo, f_hi, distance) {
            Ok(fit) => {
                trace.set_parameter(Param::BruneFit {
                    omega0: fit.omega0,
                    corner_frequency: fit.corner_frequency,
                    moment: fit.moment,
                    stress_drop: fit.stress_drop,
                    misfit: fit.misfit,
                });
                trace.set_provenance(
                    "fit_spectra",
                    vec![
                        ("corner_frequency".to_string(), json!(fit.corner_frequency)),
                        ("misfit".to_string(), json!(fit.misfit)),
                    ],
                );
            }
            Err(e) => debug!("fit_spectra: {}: {}", trace.id(), e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use strongmotion_core::trace::{Coordinates, StandardMetadata, StationTrace, TraceHeader};
    use strongmotion_core::GRAVITY_CM_S2;

    fn counts_trace(channel: &str, sensitivity: Option<f64>) -> StationTrace {
        let header = TraceHeader {
            network: "CI".to_string(),
            station: "TOP".to_string(),
            location: String::new(),
            channel: channel.to_string(),
            starttime: Utc.with_ymd_and_hms(1994, 1, 17, 12, 30, 0).unwrap(),
            sampling_rate: 100.0,
            npts: 0,
            units: Units::Counts,
            coordinates: Coordinates::default(),
            standard: StandardMetadata {
                instrument_sensitivity: sensitivity,
                ..StandardMetadata::default()
            },
        };
        StationTrace::new(vec![GRAVITY_CM_S2 * 2.0; 64], header).unwrap()
    }

    fn step(yaml: &str) -> StepConf {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn remove_response_converts_counts_to_the_output_units() {
        let mut stream = StationStream::new(vec![counts_trace("HN1", Some(2.0))]).unwrap();
        let conf = step("remove_response: {output: \"%g\"}");
        remove_response(&mut stream, None, &conf, &Config::default()).unwrap();
        let trace = &stream.traces()[0];
        assert_eq!(trace.units(), Units::PercentG);
        // counts / 2.0 = 1 g of acceleration = 100 %g.
        assert!((trace.data()[0] - 100.0).abs() < 1e-9);
        assert_eq!(trace.get_provenance().len(), 1);
        assert_eq!(trace.get_provenance()[0].activity, "remove_response");
    }

    #[test]
    fn remove_response_without_sensitivity_fails_the_trace() {
        let mut stream = StationStream::new(vec![counts_trace("HN1", None)]).unwrap();
        let conf = step("remove_response: {output: cm/s/s}");
        remove_response(&mut stream, None, &conf, &Config::default()).unwrap();
        assert!(!stream.passed());
        assert_eq!(stream.traces()[0].failures()[0].step, "remove_response");
    }

    #[test]
    fn velocity_output_is_a_config_error() {
        let mut stream = StationStream::new(vec![counts_trace("HN1", Some(2.0))]).unwrap();
        let conf = step("remove_response: {output: cm/s}");
        let err = remove_response(&mut stream, None, &conf, &Config::default()).unwrap_err();
        assert!(matches!(err, SmError::Config { .. }));
    }

    #[test]
    fn five_channels_fail_check_stream() {
        let traces = ["HN1", "HN2", "HN3", "HN4", "HNZ"]
            .iter()
            .map(|cha| counts_trace(cha, Some(1.0)))
            .collect();
        let mut stream = StationStream::new(traces).unwrap();
        let conf = step("check_stream: {max_traces: 3}");
        check_stream(&mut stream, None, &conf, &Config::default()).unwrap();
        assert!(!stream.passed());
        assert_eq!(stream.failures()[0].reason, NONUNIQUE_CHANNELS);
    }

    #[test]
    fn low_rate_fails_min_sample_rate() {
        let mut trace = counts_trace("HN1", Some(1.0));
        let data = trace.data().to_vec();
        let start = trace.starttime();
        trace.set_timeseries(data, start, 10.0).unwrap();
        let mut stream = StationStream::new(vec![trace]).unwrap();
        let conf = step("min_sample_rate: {min_sps: 20.0}");
        min_sample_rate(&mut stream, None, &conf, &Config::default()).unwrap();
        assert!(!stream.passed());
    }

    #[test]
    fn unknown_detrend_method_is_a_config_error() {
        let mut stream = StationStream::new(vec![counts_trace("HN1", Some(1.0))]).unwrap();
        let conf = step("detrend: {detrending_method: vibes}");
        let err = detrend(&mut stream, None, &conf, &Config::default()).unwrap_err();
        assert!(matches!(err, SmError::Config { .. }));
    }
}
