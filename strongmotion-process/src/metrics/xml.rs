//! Waveform-metrics XML serialization.
//!
//! Layout: one element per metric family (`pga`, `sa`, `duration` per
//! interval, ...), one child per component (`rot_d50`,
//! `greater_of_two_horizontals`, or `component name="h1"` for per-channel
//! values), and for the parameterized families a `value period=".."` grain
//! inside each component.
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use strongmotion_core::errors::SmError;

use super::{trim_float, Imc, Imt, MetricValue, WaveformMetricCollection};

/// Grouping key: family plus the duration interval when the family carries
/// one.
#[derive(PartialEq, Clone)]
struct GroupKey {
    family: &'static str,
    interval: Option<(f64, f64)>,
}

fn group_key(imt: &Imt) -> GroupKey {
    match imt {
        Imt::Duration(lo, hi) | Imt::SortedDuration(lo, hi) => GroupKey {
            family: imt.family(),
            interval: Some((*lo, *hi)),
        },
        _ => GroupKey {
            family: imt.family(),
            interval: None,
        },
    }
}

/// Per-component element name; `None` means the generic `component` element
/// with a `name` attribute.
fn imc_element(imc: &Imc) -> Option<String> {
    match imc {
        Imc::Channels | Imc::RadialTransverse => None,
        Imc::GreaterOfTwoHorizontals => Some("greater_of_two_horizontals".to_string()),
        Imc::GeometricMean => Some("geometric_mean".to_string()),
        Imc::ArithmeticMean => Some("arithmetic_mean".to_string()),
        Imc::QuadraticMean => Some("quadratic_mean".to_string()),
        Imc::RotD(p) => Some(format!("rot_d{}", trim_float(*p))),
        Imc::GMRotD(p) => Some(format!("gm_rot_d{}", trim_float(*p))),
    }
}

fn fmt(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else {
        format!("{}", v)
    }
}

type SeriesKey = (Imc, Option<String>);

pub fn waveform_metrics_xml(collection: &WaveformMetricCollection) -> Result<String, SmError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("waveform_metrics")))?;

    // Families in first-appearance order.
    let mut groups: Vec<GroupKey> = Vec::new();
    for value in &collection.values {
        let key = group_key(&value.imt);
        if !groups.contains(&key) {
            groups.push(key);
        }
    }

    for group in &groups {
        let members: Vec<&MetricValue> = collection
            .values
            .iter()
            .filter(|v| group_key(&v.imt) == *group)
            .collect();
        if members.is_empty() {
            continue;
        }

        let mut element = BytesStart::new(group.family);
        match group.family {
            "sa" => element
                .push_attribute(("percent_damping", fmt(collection.damping * 100.0).as_str())),
            "fas" => {
                element.push_attribute(("smoothing", "konno_ohmachi"));
                element.push_attribute(("bandwidth", fmt(collection.fas_bandwidth).as_str()));
            }
            "duration" | "sorted_duration" => {
                if let Some((lo, hi)) = group.interval {
                    element.push_attribute((
                        "interval",
                        format!("{}-{}", trim_float(lo), trim_float(hi)).as_str(),
                    ));
                }
            }
            _ => {}
        }
        writer.write_event(Event::Start(element))?;

        // Component series, in first-appearance order.
        let mut series: Vec<SeriesKey> = Vec::new();
        for member in &members {
            let key = (member.imc, member.component.clone());
            if !series.contains(&key) {
                series.push(key);
            }
        }

        let parameterized = matches!(group.family, "sa" | "fas");
        for (imc, component) in &series {
            let units = members[0].imt.units();
            let name = imc_element(imc);
            let tag = name.unwrap_or_else(|| "component".to_string());
            let mut open = BytesStart::new(tag.as_str());
            if let Some(component) = component {
                open.push_attribute(("name", component.as_str()));
            }
            open.push_attribute(("units", units));
            writer.write_event(Event::Start(open))?;

            let values = members
                .iter()
                .filter(|v| v.imc == *imc && v.component == *component);
            if parameterized {
                for value in values {
                    let period = match value.imt {
                        Imt::Sa(t) | Imt::Fas(t) => t,
                        _ => continue,
                    };
                    let mut v_el = BytesStart::new("value");
                    v_el.push_attribute(("period", fmt(period).as_str()));
                    writer.write_event(Event::Start(v_el))?;
                    writer.write_event(Event::Text(BytesText::new(&fmt(value.value))))?;
                    writer.write_event(Event::End(BytesEnd::new("value")))?;
                }
            } else if let Some(value) = values.into_iter().next() {
                writer.write_event(Event::Text(BytesText::new(&fmt(value.value))))?;
            }
            writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
        }
        writer.write_event(Event::End(BytesEnd::new(group.family)))?;
    }

    writer.write_event(Event::End(BytesEnd::new("waveform_metrics")))?;
    String::from_utf8(writer.into_inner()).map_err(|e| SmError::XmlError { msg: e.to_string() })
}
