//! P-arrival estimation.
//!
//! Three pickers with one contract: given a record, propose the onset. The
//! travel-time picker predicts from the hypocenter and a 1-D velocity model
//! and is tried first; the autoregressive and STA/LTA pickers work from the
//! waveform alone and serve as fallbacks when the prediction lands before
//! the record starts.
use chrono::{DateTime, Duration, Utc};

use strongmotion_core::config::{ArConf, StaLtaConf, VelocityLayer};
use strongmotion_core::event::Event;
use strongmotion_core::trace::Coordinates;

/// Predicted P arrival from the event hypocenter through the layered model.
///
/// The ray is approximated as a straight path at the P velocity of the layer
/// containing the source depth; the crude model is deliberately cheap, since
/// any prediction landing inside the record gets refined by the shift and
/// the SNR-based fallbacks handle the rest.
pub fn travel_time_pick(
    event: &Event,
    coordinates: &Coordinates,
    layers: &[VelocityLayer],
) -> DateTime<Utc> {
    let distance = event.hypocentral_distance_km(coordinates.latitude, coordinates.longitude);
    let vp = layers
        .iter()
        .find(|layer| event.depth_km <= layer.max_depth_km)
        .or_else(|| layers.last())
        .map(|layer| layer.vp_km_s)
        .unwrap_or(6.1);
    let seconds = distance / vp;
    event.time + Duration::nanoseconds((seconds * 1e9) as i64)
}

/// Classic short-term/long-term average ratio onset: the first sample where
/// the STA of the squared record exceeds `threshold` times its LTA.
pub fn sta_lta_pick(data: &[f64], sampling_rate: f64, conf: &StaLtaConf) -> Option<usize> {
    let n = data.len();
    let sta_n = ((conf.sta_length * sampling_rate) as usize).max(1);
    let lta_n = ((conf.lta_length * sampling_rate) as usize).max(sta_n + 1);
    if n <= lta_n {
        return None;
    }
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for &x in data {
        acc += x * x;
        prefix.push(acc);
    }
    let window_mean = |lo: usize, hi: usize| (prefix[hi] - prefix[lo]) / (hi - lo) as f64;
    for i in lta_n..n {
        let sta = window_mean(i - sta_n, i);
        let lta = window_mean(i - lta_n, i);
        if lta > 0.0 && sta / lta >= conf.threshold {
            return Some(i - sta_n);
        }
    }
    None
}

/// Levinson-Durbin recursion: prediction coefficients of an AR model from
/// the autocorrelation sequence. Returns `a[1..=order]` such that
/// `x[i] ~ sum_k a[k] * x[i-k]`.
fn levinson_durbin(autocorr: &[f64], order: usize) -> Option<Vec<f64>> {
    if autocorr.len() < order + 1 || autocorr[0] <= 0.0 {
        return None;
    }
    let mut a = vec![0.0; order + 1];
    a[0] = 1.0;
    let mut error = autocorr[0];
    for k in 1..=order {
        let mut lambda = -autocorr[k];
        for j in 1..k {
            lambda -= a[j] * autocorr[k - j];
        }
        lambda /= error;
        let snapshot = a.clone();
        for j in 1..k {
            a[j] = snapshot[j] + lambda * snapshot[k - j];
        }
        a[k] = lambda;
        error *= 1.0 - lambda * lambda;
        if error <= 0.0 {
            return None;
        }
    }
    // Convert from error-filter form to prediction coefficients.
    Some(a[1..].iter().map(|&c| -c).collect())
}

/// Autoregressive onset picker.
///
/// An AR model of the configured order is trained on the leading
/// `learning_window` seconds; the onset is the first sample where the
/// short-term energy of the prediction residual exceeds `threshold` times
/// the residual energy of the training window.
pub fn ar_pick(data: &[f64], sampling_rate: f64, conf: &ArConf) -> Option<usize> {
    let n = data.len();
    let order = conf.order.max(1);
    let train_n = ((conf.learning_window * sampling_rate) as usize)
        .min(n / 2)
        .max(order * 4);
    if n < train_n + order + 2 {
        return None;
    }

    let train = &data[..train_n];
    let mean = train.iter().sum::<f64>() / train_n as f64;
    let mut autocorr = vec![0.0; order + 1];
    for lag in 0..=order {
        let mut sum = 0.0;
        for i in lag..train_n {
            sum += (train[i] - mean) * (train[i - lag] - mean);
        }
        autocorr[lag] = sum / train_n as f64;
    }
    let coefs = levinson_durbin(&autocorr, order)?;

    let residual = |i: usize| -> f64 {
        let mut prediction = 0.0;
        for (k, &c) in coefs.iter().enumerate() {
            prediction += c * (data[i - k - 1] - mean);
        }
        (data[i] - mean) - prediction
    };

    // Baseline residual energy over the training region.
    let mut base = 0.0;
    for i in order..train_n {
        let e = residual(i);
        base += e * e;
    }
    base /= (train_n - order) as f64;
    if base <= 0.0 {
        return None;
    }

    let short_n = ((0.5 * sampling_rate) as usize).max(2);
    let mut window: Vec<f64> = Vec::with_capacity(short_n);
    let mut energy = 0.0;
    for i in train_n..n {
        let e = residual(i);
        window.push(e * e);
        energy += e * e;
        if window.len() > short_n {
            energy -= window[window.len() - 1 - short_n];
        }
        let count = window.len().min(short_n);
        if count == short_n && energy / count as f64 >= conf.threshold * base {
            return Some(i + 1 - short_n);
        }
    }
    None
}
