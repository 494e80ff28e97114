//! The waveform-metrics engine: the IMT x IMC matrix.
//!
//! An intensity measure type (PGA, SA(T), ...) is a scalar property of one
//! acceleration series; an intensity measure component (channels, geometric
//! mean, RotD50, ...) decides which series (original, combined or rotated)
//! the type is evaluated on. The engine expands the configured type and
//! component lists, skips the combinations the matrix does not define, and
//! returns a flat collection ready for XML serialization.
pub mod xml;

use log::debug;

use strongmotion_core::config::{parse_interval, Config};
use strongmotion_core::enums::Units;
use strongmotion_core::errors::SmError;
use strongmotion_core::event::Event;
use strongmotion_core::geo;
use strongmotion_core::stream::StationStream;
use strongmotion_core::{GRAVITY_CM_S2, GRAVITY_M_S2};

use crate::ops;
use crate::oscillator;
use crate::rotation;
use crate::smoothing::konno_ohmachi_smooth;
use crate::spectra::acceleration_fas;

/// Intensity measure type, with its parameters baked in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Imt {
    Pga,
    Pgv,
    Pgd,
    /// Spectral acceleration at a period in seconds.
    Sa(f64),
    /// Smoothed Fourier amplitude at a period in seconds.
    Fas(f64),
    Arias,
    /// Significant duration between two cumulative-Arias percentiles.
    Duration(f64, f64),
    /// As `Duration`, on the descending-sorted accumulation.
    SortedDuration(f64, f64),
}

impl Imt {
    /// The family tag grouping parameterized variants, used in XML.
    pub fn family(&self) -> &'static str {
        match self {
            Imt::Pga => "pga",
            Imt::Pgv => "pgv",
            Imt::Pgd => "pgd",
            Imt::Sa(_) => "sa",
            Imt::Fas(_) => "fas",
            Imt::Arias => "arias",
            Imt::Duration(..) => "duration",
            Imt::SortedDuration(..) => "sorted_duration",
        }
    }

    /// The units contract of the matrix.
    pub fn units(&self) -> &'static str {
        match self {
            Imt::Pga | Imt::Sa(_) => "%g",
            Imt::Pgv => "cm/s",
            Imt::Pgd => "cm",
            Imt::Fas(_) => "cm/s",
            Imt::Arias => "m/s",
            Imt::Duration(..) | Imt::SortedDuration(..) => "s",
        }
    }
}

/// Intensity measure component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Imc {
    Channels,
    GreaterOfTwoHorizontals,
    GeometricMean,
    ArithmeticMean,
    QuadraticMean,
    RotD(f64),
    GMRotD(f64),
    RadialTransverse,
}

impl Imc {
    pub fn tag(&self) -> String {
        match self {
            Imc::Channels => "channels".to_string(),
            Imc::GreaterOfTwoHorizontals => "greater_of_two_horizontals".to_string(),
            Imc::GeometricMean => "geometric_mean".to_string(),
            Imc::ArithmeticMean => "arithmetic_mean".to_string(),
            Imc::QuadraticMean => "quadratic_mean".to_string(),
            Imc::RotD(p) => format!("rotd{}", trim_float(*p)),
            Imc::GMRotD(p) => format!("gmrotd{}", trim_float(*p)),
            Imc::RadialTransverse => "radial_transverse".to_string(),
        }
    }
}

pub(crate) fn trim_float(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Parse a configured component name, e.g. `rotd50` or `geometric_mean`.
pub fn parse_imc(tag: &str) -> Result<Imc, SmError> {
    let lower = tag.to_lowercase();
    let imc = match lower.as_str() {
        "channels" => Imc::Channels,
        "greater_of_two_horizontals" => Imc::GreaterOfTwoHorizontals,
        "geometric_mean" => Imc::GeometricMean,
        "arithmetic_mean" => Imc::ArithmeticMean,
        "quadratic_mean" => Imc::QuadraticMean,
        "radial_transverse" => Imc::RadialTransverse,
        _ => {
            if let Some(rest) = lower.strip_prefix("gmrotd") {
                Imc::GMRotD(rest.parse().map_err(|_| bad_imc(tag))?)
            } else if let Some(rest) = lower.strip_prefix("rotd") {
                Imc::RotD(rest.parse().map_err(|_| bad_imc(tag))?)
            } else {
                return Err(bad_imc(tag));
            }
        }
    };
    if let Imc::RotD(p) | Imc::GMRotD(p) = imc {
        if !(0.0..=100.0).contains(&p) {
            return Err(bad_imc(tag));
        }
    }
    Ok(imc)
}

fn bad_imc(tag: &str) -> SmError {
    SmError::Config {
        msg: format!("unknown intensity measure component {:?}", tag),
    }
}

/// Expand the configured type names into concrete parameterized types.
pub fn expand_imts(config: &Config) -> Result<Vec<Imt>, SmError> {
    let metrics = &config.metrics;
    let mut out = Vec::new();
    for name in &metrics.output_imts {
        match name.to_lowercase().as_str() {
            "pga" => out.push(Imt::Pga),
            "pgv" => out.push(Imt::Pgv),
            "pgd" => out.push(Imt::Pgd),
            "arias" => out.push(Imt::Arias),
            "sa" => out.extend(metrics.sa.periods.periods().into_iter().map(Imt::Sa)),
            "fas" => out.extend(metrics.fas.periods.periods().into_iter().map(Imt::Fas)),
            "duration" => {
                for interval in &metrics.duration.intervals {
                    let (lo, hi) = parse_interval(interval)?;
                    out.push(Imt::Duration(lo, hi));
                }
            }
            "sorted_duration" => {
                for interval in &metrics.duration.intervals {
                    let (lo, hi) = parse_interval(interval)?;
                    out.push(Imt::SortedDuration(lo, hi));
                }
            }
            other => {
                return Err(SmError::Config {
                    msg: format!("unknown intensity measure type {:?}", other),
                })
            }
        }
    }
    Ok(out)
}

/// The support matrix: which component can evaluate which type.
pub fn supported(imt: &Imt, imc: &Imc) -> bool {
    match imc {
        Imc::Channels | Imc::ArithmeticMean => true,
        Imc::GreaterOfTwoHorizontals => !matches!(imt, Imt::Fas(_) | Imt::Arias),
        Imc::GeometricMean | Imc::QuadraticMean => !matches!(imt, Imt::Arias),
        Imc::RotD(_) | Imc::GMRotD(_) | Imc::RadialTransverse => {
            !matches!(imt, Imt::Fas(_) | Imt::Arias)
        }
    }
}

/// One evaluated cell of the matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub imt: Imt,
    pub imc: Imc,
    /// Set for per-channel components: `h1`, `h2`, `z`, `radial`,
    /// `transverse`.
    pub component: Option<String>,
    pub value: f64,
}

/// Everything computed for one stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WaveformMetricCollection {
    pub values: Vec<MetricValue>,
    /// SA damping fraction the collection was computed with.
    pub damping: f64,
    /// FAS smoothing parameters, echoed into the XML.
    pub fas_bandwidth: f64,
}

impl WaveformMetricCollection {
    /// Find one scalar, matching component when given.
    pub fn get(&self, imt: Imt, imc: Imc, component: Option<&str>) -> Option<f64> {
        self.values
            .iter()
            .find(|v| v.imt == imt && v.imc == imc && v.component.as_deref() == component)
            .map(|v| v.value)
    }

    pub fn to_xml(&self) -> Result<String, SmError> {
        xml::waveform_metrics_xml(self)
    }
}

/// One channel's acceleration in cm/s/s with its labels.
struct Prepared {
    label: String,
    acc: Vec<f64>,
    dt: f64,
    azimuth: Option<f64>,
}

fn to_cm_s2(trace: &strongmotion_core::trace::StationTrace) -> Result<Vec<f64>, SmError> {
    let scale = match trace.units() {
        Units::CmPerSecSquared => 1.0,
        Units::PercentG => GRAVITY_CM_S2 / 100.0,
        Units::MPerSecSquared => 100.0,
        other => {
            return Err(SmError::UnitsError {
                msg: format!(
                    "waveform metrics need acceleration units on {}, got {}",
                    trace.id(),
                    other
                ),
            })
        }
    };
    Ok(trace.data().iter().map(|&x| x * scale).collect())
}

/// Evaluate a scalar type on one acceleration series (cm/s/s).
fn scalar(imt: &Imt, acc: &[f64], dt: f64, damping: f64) -> Result<f64, SmError> {
    let peak = |series: &[f64]| series.iter().fold(0.0f64, |m, &x| m.max(x.abs()));
    Ok(match imt {
        Imt::Pga => peak(acc) / GRAVITY_CM_S2 * 100.0,
        Imt::Pgv => peak(&ops::integrate(acc, dt)),
        Imt::Pgd => {
            let vel = ops::integrate(acc, dt);
            peak(&ops::integrate(&vel, dt))
        }
        Imt::Sa(period) => {
            let response = oscillator::sdof_response(acc, dt, *period, damping)?;
            response.sa() / GRAVITY_CM_S2 * 100.0
        }
        Imt::Arias => arias_total(acc, dt),
        Imt::Duration(lo, hi) => {
            let cumulative = arias_cumulative(acc, dt);
            let total = *cumulative.last().unwrap_or(&0.0);
            if total <= 0.0 {
                0.0
            } else {
                let t_lo = crossing_time(&cumulative, total * lo / 100.0, dt);
                let t_hi = crossing_time(&cumulative, total * hi / 100.0, dt);
                t_hi - t_lo
            }
        }
        Imt::SortedDuration(lo, hi) => {
            let mut increments: Vec<f64> = acc.iter().map(|&a| a * a).collect();
            increments
                .sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
            let total: f64 = increments.iter().sum();
            if total <= 0.0 {
                0.0
            } else {
                let mut acc_sum = 0.0;
                let mut n_lo = 0usize;
                let mut n_hi = 0usize;
                for (i, inc) in increments.iter().enumerate() {
                    acc_sum += inc;
                    if n_lo == 0 && acc_sum >= total * lo / 100.0 {
                        n_lo = i + 1;
                    }
                    if acc_sum >= total * hi / 100.0 {
                        n_hi = i + 1;
                        break;
                    }
                }
                (n_hi.saturating_sub(n_lo)) as f64 * dt
            }
        }
        Imt::Fas(_) => unreachable!("FAS is evaluated on the spectrum path"),
    })
}

/// Total Arias intensity in m/s of a cm/s/s series.
fn arias_total(acc: &[f64], dt: f64) -> f64 {
    *arias_cumulative(acc, dt).last().unwrap_or(&0.0)
}

fn arias_cumulative(acc: &[f64], dt: f64) -> Vec<f64> {
    let factor = std::f64::consts::PI / (2.0 * GRAVITY_M_S2) * dt;
    let mut out = Vec::with_capacity(acc.len());
    let mut sum = 0.0;
    for &a in acc {
        let a_m = a / 100.0;
        sum += factor * a_m * a_m;
        out.push(sum);
    }
    out
}

fn crossing_time(cumulative: &[f64], level: f64, dt: f64) -> f64 {
    cumulative
        .iter()
        .position(|&v| v >= level)
        .map(|i| i as f64 * dt)
        .unwrap_or_else(|| cumulative.len() as f64 * dt)
}

/// Smoothed FAS of one series, evaluated at one period.
fn fas_at(acc: &[f64], dt: f64, period: f64, bandwidth: f64, allow_nans: bool) -> f64 {
    let spectrum = acceleration_fas(acc, dt, acc.len());
    let center = [1.0 / period];
    konno_ohmachi_smooth(&spectrum.freqs, &spectrum.amps, &center, bandwidth, allow_nans)[0]
}

fn combine(imc: &Imc, v1: f64, v2: f64) -> f64 {
    match imc {
        Imc::GreaterOfTwoHorizontals => v1.max(v2),
        Imc::GeometricMean => (v1 * v2).sqrt(),
        Imc::ArithmeticMean => 0.5 * (v1 + v2),
        Imc::QuadraticMean => ((v1 * v1 + v2 * v2) / 2.0).sqrt(),
        _ => unreachable!("not a combining component"),
    }
}

/// Evaluate the configured matrix for one passed stream.
pub fn compute_waveform_metrics(
    stream: &StationStream,
    event: Option<&Event>,
    config: &Config,
) -> Result<WaveformMetricCollection, SmError> {
    if !stream.passed() {
        return Err(SmError::Validation {
            msg: format!("waveform metrics requested for failed stream {}", stream.id()),
        });
    }
    let damping = config.metrics.sa.damping;
    let fas_bandwidth = config.metrics.fas.bandwidth;
    let allow_nans = config.metrics.fas.allow_nans;

    let imts = expand_imts(config)?;
    let imcs: Vec<Imc> = config
        .metrics
        .output_imcs
        .iter()
        .map(|tag| parse_imc(tag))
        .collect::<Result<_, _>>()?;

    // Channel ordering: horizontals as h1/h2 in trace order, vertical as z.
    let mut prepared: Vec<Prepared> = Vec::new();
    let mut horizontal_count = 0usize;
    for trace in stream.traces() {
        let header = trace.header();
        let label = if header.is_vertical() {
            "z".to_string()
        } else {
            horizontal_count += 1;
            format!("h{}", horizontal_count)
        };
        prepared.push(Prepared {
            label,
            acc: to_cm_s2(trace)?,
            dt: trace.delta(),
            azimuth: header.standard.horizontal_orientation,
        });
    }
    let h: Vec<&Prepared> = prepared.iter().filter(|p| p.label.starts_with('h')).collect();

    let mut collection = WaveformMetricCollection {
        values: Vec::new(),
        damping,
        fas_bandwidth,
    };

    for imt in &imts {
        for imc in &imcs {
            if !supported(imt, imc) {
                debug!("{} is not defined for {}; skipped", imt.family(), imc.tag());
                continue;
            }
            match imc {
                Imc::Channels => {
                    for p in &prepared {
                        let value = match imt {
                            Imt::Fas(period) => {
                                fas_at(&p.acc, p.dt, *period, fas_bandwidth, allow_nans)
                            }
                            _ => scalar(imt, &p.acc, p.dt, damping)?,
                        };
                        collection.values.push(MetricValue {
                            imt: *imt,
                            imc: *imc,
                            component: Some(p.label.clone()),
                            value,
                        });
                    }
                }
                Imc::GreaterOfTwoHorizontals
                | Imc::GeometricMean
                | Imc::ArithmeticMean
                | Imc::QuadraticMean => {
                    if h.len() != 2 {
                        debug!(
                            "{} needs two horizontals, stream {} has {}; skipped",
                            imc.tag(),
                            stream.id(),
                            h.len()
                        );
                        continue;
                    }
                    let evaluate = |p: &Prepared| -> Result<f64, SmError> {
                        Ok(match imt {
                            Imt::Fas(period) => {
                                fas_at(&p.acc, p.dt, *period, fas_bandwidth, allow_nans)
                            }
                            _ => scalar(imt, &p.acc, p.dt, damping)?,
                        })
                    };
                    let v1 = evaluate(h[0])?;
                    let v2 = evaluate(h[1])?;
                    collection.values.push(MetricValue {
                        imt: *imt,
                        imc: *imc,
                        component: None,
                        value: combine(imc, v1, v2),
                    });
                }
                Imc::RotD(p) => {
                    if h.len() != 2 {
                        continue;
                    }
                    let dt = h[0].dt;
                    let value = rotation::rotd(&h[0].acc, &h[1].acc, *p, |series| {
                        scalar(imt, series, dt, damping).unwrap_or(f64::NAN)
                    });
                    collection.values.push(MetricValue {
                        imt: *imt,
                        imc: *imc,
                        component: None,
                        value,
                    });
                }
                Imc::GMRotD(p) => {
                    if h.len() != 2 {
                        continue;
                    }
                    let dt = h[0].dt;
                    let value = rotation::gmrotd(&h[0].acc, &h[1].acc, *p, |series| {
                        scalar(imt, series, dt, damping).unwrap_or(f64::NAN)
                    });
                    collection.values.push(MetricValue {
                        imt: *imt,
                        imc: *imc,
                        component: None,
                        value,
                    });
                }
                Imc::RadialTransverse => {
                    if h.len() != 2 {
                        continue;
                    }
                    let Some(event) = event else {
                        debug!("radial_transverse needs an event; skipped");
                        continue;
                    };
                    let (Some(az1), Some(az2)) = (h[0].azimuth, h[1].azimuth) else {
                        debug!(
                            "radial_transverse needs horizontal azimuths on {}; skipped",
                            stream.id()
                        );
                        continue;
                    };
                    let tolerance = config
                        .metrics
                        .radial_transverse_tolerance
                        .unwrap_or(0.01);
                    let (north, east) =
                        rotation::to_north_east(&h[0].acc, az1, &h[1].acc, az2, tolerance)?;
                    let coords = stream.traces()[0].header().coordinates;
                    let back_azimuth = geo::azimuth_deg(
                        coords.latitude,
                        coords.longitude,
                        event.latitude,
                        event.longitude,
                    );
                    let (radial, transverse) =
                        rotation::rotate_ne_to_rt(&north, &east, back_azimuth);
                    let dt = h[0].dt;
                    for (name, series) in [("radial", &radial), ("transverse", &transverse)] {
                        collection.values.push(MetricValue {
                            imt: *imt,
                            imc: *imc,
                            component: Some(name.to_string()),
                            value: scalar(imt, series, dt, damping)?,
                        });
                    }
                }
            }
        }
    }
    Ok(collection)
}
