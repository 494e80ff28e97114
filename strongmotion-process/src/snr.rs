//! Signal-to-noise ratios and passband selection.
//!
//! `compute_snr` turns the noise/signal windows into smoothed spectra and an
//! elementwise SNR curve, cached on the trace for the workspace container.
//! `snr_check` enforces a threshold over an acceptance band, and the corner
//! frequency selection turns the same curves into a filter passband.
use log::warn;

use strongmotion_core::errors::SmError;
use strongmotion_core::parameters::{Param, ParamKey};
use strongmotion_core::stream::StationStream;
use strongmotion_core::trace::StationTrace;

use crate::filter;
use crate::ops;
use crate::smoothing::konno_ohmachi_smooth;
use crate::spectra::acceleration_fas;
use crate::windows::window_indices;

pub const SNR_FAIL_REASON: &str = "Failed SNR check; SNR less than threshold.";

/// Cached-array names used for the spectra and SNR curves.
pub mod cache {
    pub const SIGNAL_SPECTRUM_FREQ: &str = "signal_spectrum_freq";
    pub const SIGNAL_SPECTRUM_SPEC: &str = "signal_spectrum_spec";
    pub const NOISE_SPECTRUM_FREQ: &str = "noise_spectrum_freq";
    pub const NOISE_SPECTRUM_SPEC: &str = "noise_spectrum_spec";
    pub const SMOOTH_SIGNAL_SPECTRUM_FREQ: &str = "smooth_signal_spectrum_freq";
    pub const SMOOTH_SIGNAL_SPECTRUM_SPEC: &str = "smooth_signal_spectrum_spec";
    pub const SMOOTH_NOISE_SPECTRUM_FREQ: &str = "smooth_noise_spectrum_freq";
    pub const SMOOTH_NOISE_SPECTRUM_SPEC: &str = "smooth_noise_spectrum_spec";
    pub const SNR_FREQ: &str = "snr_freq";
    pub const SNR: &str = "snr";
}

/// Compute and cache the signal/noise spectra and the SNR curve for every
/// passing trace of the stream.
pub fn compute_snr(stream: &mut StationStream, bandwidth: f64) -> Result<(), SmError> {
    for trace in stream.traces_mut() {
        if !trace.passed() {
            continue;
        }
        let (split_idx, end_idx) = match window_indices(trace) {
            Ok(indices) => indices,
            Err(_) => {
                trace.fail("compute_snr", "no signal window has been computed");
                continue;
            }
        };
        if split_idx == 0 || end_idx <= split_idx {
            trace.fail("compute_snr", "degenerate noise or signal window");
            continue;
        }
        let dt = trace.delta();
        let noise: Vec<f64> = trace.data()[..split_idx].to_vec();
        let signal: Vec<f64> = trace.data()[split_idx..end_idx].to_vec();

        if noise.iter().all(|&x| x == 0.0) {
            warn!(
                "compute_snr: noise window of {} has mean 0; no SNR available",
                trace.id()
            );
            continue;
        }

        let nfft = noise.len().max(signal.len());
        let signal_spec = acceleration_fas(&signal, dt, nfft);
        let noise_spec = acceleration_fas(&noise, dt, nfft);

        // Smooth both onto the positive-frequency part of the common grid.
        let centers: Vec<f64> = signal_spec.freqs[1..].to_vec();
        let smooth_signal = konno_ohmachi_smooth(
            &signal_spec.freqs,
            &signal_spec.amps,
            &centers,
            bandwidth,
            false,
        );
        let smooth_noise = konno_ohmachi_smooth(
            &noise_spec.freqs,
            &noise_spec.amps,
            &centers,
            bandwidth,
            false,
        );
        let snr: Vec<f64> = smooth_signal
            .iter()
            .zip(&smooth_noise)
            .map(|(&s, &n)| if n > 0.0 { s / n } else { f64::NAN })
            .collect();

        trace.set_cached(cache::SIGNAL_SPECTRUM_FREQ, signal_spec.freqs.clone());
        trace.set_cached(cache::SIGNAL_SPECTRUM_SPEC, signal_spec.amps);
        trace.set_cached(cache::NOISE_SPECTRUM_FREQ, noise_spec.freqs.clone());
        trace.set_cached(cache::NOISE_SPECTRUM_SPEC, noise_spec.amps);
        trace.set_cached(cache::SMOOTH_SIGNAL_SPECTRUM_FREQ, centers.clone());
        trace.set_cached(cache::SMOOTH_SIGNAL_SPECTRUM_SPEC, smooth_signal);
        trace.set_cached(cache::SMOOTH_NOISE_SPECTRUM_FREQ, centers.clone());
        trace.set_cached(cache::SMOOTH_NOISE_SPECTRUM_SPEC, smooth_noise);
        trace.set_cached(cache::SNR_FREQ, centers);
        trace.set_cached(cache::SNR, snr);
    }
    Ok(())
}

/// Fail every trace whose SNR curve drops below `threshold` anywhere inside
/// `[min_freq, max_freq]`, or that has no curve at all.
pub fn snr_check(
    stream: &mut StationStream,
    threshold: f64,
    min_freq: f64,
    max_freq: f64,
) -> Result<(), SmError> {
    for trace in stream.traces_mut() {
        if !trace.passed() {
            continue;
        }
        trace.set_parameter(Param::SnrConf {
            threshold,
            min_freq,
            max_freq,
        });
        let ok = match (trace.get_cached(cache::SNR_FREQ), trace.get_cached(cache::SNR)) {
            (Some(freqs), Some(snr)) => freqs
                .iter()
                .zip(snr)
                .filter(|(&f, _)| f >= min_freq && f <= max_freq)
                .all(|(_, &v)| v.is_finite() && v >= threshold),
            _ => false,
        };
        if !ok {
            trace.fail("snr_check", SNR_FAIL_REASON);
        }
    }
    Ok(())
}

/// The widest contiguous passband `[f_lo, f_hi]` over which the cached SNR
/// curve stays at or above `threshold`. Width is measured logarithmically.
fn snr_passband(trace: &StationTrace, threshold: f64) -> Option<(f64, f64)> {
    let freqs = trace.get_cached(cache::SNR_FREQ)?;
    let snr = trace.get_cached(cache::SNR)?;
    let mut best: Option<(f64, f64)> = None;
    let mut run_start: Option<usize> = None;
    for i in 0..=freqs.len() {
        let passing = i < freqs.len()
            && freqs[i] > 0.0
            && snr[i].is_finite()
            && snr[i] >= threshold;
        match (passing, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                let lo = freqs[start];
                let hi = freqs[i - 1];
                if hi > lo {
                    let keep = match best {
                        None => true,
                        Some((blo, bhi)) => hi / lo > bhi / blo,
                    };
                    if keep {
                        best = Some((lo, hi));
                    }
                }
                run_start = None;
            }
            _ => {}
        }
    }
    best
}

/// Corner-frequency selection, `constant` strategy.
pub fn corner_frequencies_constant(
    stream: &mut StationStream,
    highpass: f64,
    lowpass: f64,
) -> Result<(), SmError> {
    let param = Param::CornerFrequencies {
        highpass,
        lowpass,
        method: "constant".to_string(),
    };
    stream.set_parameter(param.clone());
    for trace in stream.traces_mut() {
        if trace.passed() {
            trace.set_parameter(param.clone());
        }
    }
    Ok(())
}

/// Corner-frequency selection, `snr` strategy: the widest band over which
/// the SNR stays above threshold, optionally shared across the two
/// horizontals by taking the intersection of their passbands.
pub fn corner_frequencies_snr(
    stream: &mut StationStream,
    threshold: f64,
    same_horiz: bool,
) -> Result<(), SmError> {
    let mut selections: Vec<(usize, (f64, f64))> = Vec::new();
    for (i, trace) in stream.traces().iter().enumerate() {
        if !trace.passed() {
            continue;
        }
        match snr_passband(trace, threshold) {
            Some(band) => selections.push((i, band)),
            None => {}
        }
    }

    // Traces with no acceptable band fail below; collect indices first.
    let chosen: Vec<usize> = selections.iter().map(|(i, _)| *i).collect();
    for (i, trace) in stream.traces_mut().iter_mut().enumerate() {
        if trace.passed() && !chosen.contains(&i) {
            trace.fail(
                "get_corner_frequencies",
                "No acceptable corner frequencies found within the SNR threshold",
            );
        }
    }

    if same_horiz {
        let horizontal: Vec<usize> = stream
            .traces()
            .iter()
            .enumerate()
            .filter(|(_, t)| t.header().is_horizontal() && t.passed())
            .map(|(i, _)| i)
            .collect();
        let bands: Vec<(f64, f64)> = selections
            .iter()
            .filter(|(i, _)| horizontal.contains(i))
            .map(|(_, b)| *b)
            .collect();
        if bands.len() >= 2 {
            let shared_lo = bands.iter().map(|b| b.0).fold(f64::MIN, f64::max);
            let shared_hi = bands.iter().map(|b| b.1).fold(f64::MAX, f64::min);
            if shared_hi > shared_lo {
                for sel in selections.iter_mut().filter(|(i, _)| horizontal.contains(i)) {
                    sel.1 = (shared_lo, shared_hi);
                }
            } else {
                for &i in &horizontal {
                    stream.traces_mut()[i].fail(
                        "get_corner_frequencies",
                        "Horizontal SNR passbands do not overlap",
                    );
                }
                selections.retain(|(i, _)| !horizontal.contains(i));
            }
        }
    }

    let mut stream_band: Option<(f64, f64)> = None;
    for (i, (lo, hi)) in selections {
        let param = Param::CornerFrequencies {
            highpass: lo,
            lowpass: hi,
            method: "snr".to_string(),
        };
        stream.traces_mut()[i].set_parameter(param);
        stream_band = match stream_band {
            None => Some((lo, hi)),
            Some((slo, shi)) => Some((slo.max(lo), shi.min(hi))),
        };
    }
    if let Some((lo, hi)) = stream_band {
        if hi > lo {
            stream.set_parameter(Param::CornerFrequencies {
                highpass: lo,
                lowpass: hi,
                method: "snr".to_string(),
            });
        }
    }
    Ok(())
}

/// Cap every selected lowpass corner at `fn_fac` times the trace Nyquist.
pub fn lowpass_max_frequency(stream: &mut StationStream, fn_fac: f64) -> Result<(), SmError> {
    for trace in stream.traces_mut() {
        if !trace.passed() {
            continue;
        }
        let cap = fn_fac * trace.sampling_rate() / 2.0;
        if let Some((highpass, lowpass)) = trace.parameters().corner_frequencies() {
            if lowpass > cap {
                trace.set_parameter(Param::CornerFrequencies {
                    highpass,
                    lowpass: cap,
                    method: "snr".to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Iteratively raise the highpass corner until the filtered, twice-integrated
/// record satisfies the displacement QA limits, multiplying by `step_factor`
/// each round and capping at `maximum_freq`.
pub fn adjust_highpass(
    stream: &mut StationStream,
    step_factor: f64,
    maximum_freq: f64,
    max_final_displacement: f64,
    max_displacement_ratio: f64,
    filter_order: usize,
) -> Result<(), SmError> {
    if step_factor <= 1.0 {
        return Err(SmError::Config {
            msg: format!("adjust_highpass step_factor must exceed 1, got {}", step_factor),
        });
    }
    for trace in stream.traces_mut() {
        if !trace.passed() {
            continue;
        }
        let Some((mut highpass, lowpass)) = trace.parameters().corner_frequencies() else {
            continue;
        };
        let rate = trace.sampling_rate();
        let dt = trace.delta();
        loop {
            let mut work = trace.data().to_vec();
            ops::demean(&mut work);
            let sos = filter::butter_highpass(filter_order, highpass, rate)?;
            filter::sosfiltfilt(&sos, &mut work);
            let vel = ops::integrate(&work, dt);
            let disp = ops::integrate(&vel, dt);
            let max_disp = disp.iter().fold(0.0f64, |m, &x| m.max(x.abs()));
            let final_disp = disp.last().copied().unwrap_or(0.0).abs();
            let ratio = if max_disp > 0.0 { final_disp / max_disp } else { 0.0 };
            if max_disp <= max_final_displacement && ratio <= max_displacement_ratio {
                break;
            }
            let next = highpass * step_factor;
            if next > maximum_freq {
                warn!(
                    "adjust_highpass: {} still violates displacement limits at the {} Hz cap",
                    trace.id(),
                    maximum_freq
                );
                highpass = maximum_freq;
                break;
            }
            highpass = next;
        }
        trace.set_parameter(Param::CornerFrequencies {
            highpass,
            lowpass,
            method: "snr".to_string(),
        });
    }
    // Keep the stream-level record in step with the traces.
    let bands: Vec<(f64, f64)> = stream
        .traces()
        .iter()
        .filter(|t| t.passed())
        .filter_map(|t| t.parameters().corner_frequencies())
        .collect();
    if let Some(&(lo, hi)) = bands.first() {
        let lo = bands.iter().map(|b| b.0).fold(lo, f64::max);
        let hi = bands.iter().map(|b| b.1).fold(hi, f64::min);
        if stream.get_parameter(ParamKey::CornerFrequencies).is_some() && hi > lo {
            stream.set_parameter(Param::CornerFrequencies {
                highpass: lo,
                lowpass: hi,
                method: "snr".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use strongmotion_core::enums::Units;
    use strongmotion_core::trace::{Coordinates, StandardMetadata, TraceHeader};

    /// A 3-channel stream with 20 s of weak noise then 60 s of a strong
    /// multi-tone signal, windows already recorded.
    fn windowed_stream(noise_amp: f64) -> StationStream {
        let rate = 100.0;
        let start = Utc.with_ymd_and_hms(1994, 1, 17, 12, 30, 0).unwrap();
        let split = start + Duration::seconds(20);
        let n = (80.0 * rate) as usize;
        let onset = (20.0 * rate) as usize;
        let traces = ["HN1", "HN2", "HNZ"]
            .iter()
            .map(|cha| {
                let data: Vec<f64> = (0..n)
                    .map(|i| {
                        let t = i as f64 / rate;
                        let noise = noise_amp
                            * ((2.0 * std::f64::consts::PI * 1.1 * t).sin()
                                + 0.7 * (2.0 * std::f64::consts::PI * 3.7 * t).sin());
                        if i >= onset {
                            noise
                                + 20.0 * (2.0 * std::f64::consts::PI * 1.0 * t).sin()
                                + 15.0 * (2.0 * std::f64::consts::PI * 4.0 * t).sin()
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
                    starttime: start,
                    sampling_rate: rate,
                    npts: 0,
                    units: Units::CmPerSecSquared,
                    coordinates: Coordinates::default(),
                    standard: StandardMetadata::default(),
                };
                let mut trace = strongmotion_core::trace::StationTrace::new(data, header).unwrap();
                trace.set_parameter(Param::SignalSplit {
                    split_time: split,
                    picker: "travel_time".to_string(),
                });
                trace.set_parameter(Param::SignalEnd {
                    end_time: start + Duration::seconds(80),
                    method: "none".to_string(),
                });
                trace
            })
            .collect();
        StationStream::new(traces).unwrap()
    }

    #[test]
    fn snr_curves_are_cached_with_matching_lengths() {
        let mut stream = windowed_stream(0.01);
        compute_snr(&mut stream, 20.0).unwrap();
        for trace in stream.traces() {
            let freqs = trace.get_cached(cache::SNR_FREQ).unwrap();
            let snr = trace.get_cached(cache::SNR).unwrap();
            assert_eq!(freqs.len(), snr.len());
            assert!(!freqs.is_empty());
        }
    }

    #[test]
    fn strong_signal_passes_the_check() {
        let mut stream = windowed_stream(0.01);
        compute_snr(&mut stream, 20.0).unwrap();
        snr_check(&mut stream, 3.0, 0.5, 5.0).unwrap();
        assert!(stream.passed(), "failures: {:?}", stream.all_failures());
    }

    #[test]
    fn zero_noise_window_fails_all_channels() {
        let mut stream = windowed_stream(0.0);
        compute_snr(&mut stream, 20.0).unwrap();
        snr_check(&mut stream, 3.0, 0.2, 5.0).unwrap();
        assert!(!stream.passed());
        for trace in stream.traces() {
            assert_eq!(trace.failures()[0].reason, SNR_FAIL_REASON);
        }
    }

    #[test]
    fn snr_band_selection_brackets_the_signal() {
        let mut stream = windowed_stream(0.01);
        compute_snr(&mut stream, 20.0).unwrap();
        corner_frequencies_snr(&mut stream, 3.0, true).unwrap();
        assert!(stream.passed());
        let (hp, lp) = stream.traces()[0]
            .parameters()
            .corner_frequencies()
            .expect("selected");
        // The injected tones live at 1 and 4 Hz; the passband must span them.
        assert!(hp < 1.0, "highpass {}", hp);
        assert!(lp > 4.0, "lowpass {}", lp);
        // With same_horiz the two horizontals share the selection.
        let other = stream.traces()[1].parameters().corner_frequencies().unwrap();
        assert_eq!((hp, lp), other);
    }

    #[test]
    fn lowpass_cap_applies() {
        let mut stream = windowed_stream(0.01);
        corner_frequencies_constant(&mut stream, 0.08, 49.0).unwrap();
        lowpass_max_frequency(&mut stream, 0.75).unwrap();
        let (_, lp) = stream.traces()[0].parameters().corner_frequencies().unwrap();
        assert!((lp - 37.5).abs() < 1e-12);
    }

    #[test]
    fn highpass_adjustment_raises_corner_on_drifting_record() {
        let mut stream = windowed_stream(0.01);
        // Inject a strong drift so the twice-integrated record violates the
        // displacement limits at the initial corner.
        for trace in stream.traces_mut() {
            let n = trace.npts();
            let drifted: Vec<f64> = trace
                .data()
                .iter()
                .enumerate()
                .map(|(i, &x)| x + 0.5 * (i as f64 / n as f64))
                .collect();
            trace.set_data(drifted).unwrap();
        }
        corner_frequencies_constant(&mut stream, 0.01, 20.0).unwrap();
        adjust_highpass(&mut stream, 1.5, 5.0, 10.0, 0.2, 5).unwrap();
        let (hp, _) = stream.traces()[0].parameters().corner_frequencies().unwrap();
        assert!(hp > 0.01, "highpass not raised: {}", hp);
    }
}
