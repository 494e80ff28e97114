//! Ordered per-trace processing provenance and its SEIS-PROV document form.
//!
//! Every registered processing step that touches a trace appends exactly one
//! [`ProvenanceRecord`]; steps that skip a failed trace append a record with
//! a `status = skipped` attribute so the ledger stays a complete account of
//! what ran. The ledger serializes to a SEIS-PROV XML document for storage
//! in the workspace container and parses back losslessly.
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::Value;

use crate::errors::SmError;

const PROV_NS: &str = "http://www.w3.org/ns/prov#";
const SEIS_PROV_NS: &str = "http://seisprov.org/seis_prov/0.1/#";

/// One activity entry in a trace's provenance ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceRecord {
    /// Activity name from the SEIS-PROV vocabulary (e.g. `detrend`).
    pub activity: String,
    /// Ordered activity attributes.
    pub attributes: Vec<(String, Value)>,
}

impl ProvenanceRecord {
    pub fn new(activity: &str, attributes: Vec<(String, Value)>) -> Self {
        Self {
            activity: activity.to_string(),
            attributes,
        }
    }

    /// Human readable label, e.g. `lowpass_filter` -> `Lowpass Filter`.
    pub fn label(&self) -> String {
        self.activity
            .split('_')
            .map(|w| {
                let mut c = w.chars();
                match c.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + c.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Two-letter SEIS-PROV id code for an activity name.
///
/// Unknown activities fall back to the generic `ac` code rather than
/// erroring; the vocabulary is open-ended.
pub fn activity_code(activity: &str) -> &'static str {
    match activity {
        "cut" => "ct",
        "detrend" => "dt",
        "taper" => "tp",
        "highpass_filter" => "hp",
        "lowpass_filter" => "lp",
        "bandpass_filter" => "bp",
        "remove_response" => "rr",
        "resample" => "rs",
        "integrate" => "ig",
        "differentiate" => "df",
        "rotate" => "rt",
        "calculate_snr" => "sn",
        "pick_onset" => "po",
        _ => "ac",
    }
}

/// Identity attached to every provenance document.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvAgent {
    pub software_name: String,
    pub software_version: String,
    /// `(name, email)` from the `user` configuration block, when present.
    pub person: Option<(String, String)>,
}

impl Default for ProvAgent {
    fn default() -> Self {
        Self {
            software_name: "strongmotion".to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            person: None,
        }
    }
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    text: &str,
) -> Result<(), SmError> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Serialize a ledger to a SEIS-PROV XML document.
pub fn to_seis_prov_xml(
    records: &[ProvenanceRecord],
    agent: &ProvAgent,
) -> Result<String, SmError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut doc = BytesStart::new("prov:document");
    doc.push_attribute(("xmlns:prov", PROV_NS));
    doc.push_attribute(("xmlns:seis_prov", SEIS_PROV_NS));
    writer.write_event(Event::Start(doc))?;

    let mut sa = BytesStart::new("prov:softwareAgent");
    sa.push_attribute(("prov:id", "seis_prov:sp000_sa_0000001"));
    writer.write_event(Event::Start(sa))?;
    write_text_element(&mut writer, "prov:label", &agent.software_name)?;
    write_text_element(&mut writer, "seis_prov:software_name", &agent.software_name)?;
    write_text_element(
        &mut writer,
        "seis_prov:software_version",
        &agent.software_version,
    )?;
    writer.write_event(Event::End(BytesEnd::new("prov:softwareAgent")))?;

    if let Some((name, email)) = &agent.person {
        let mut pp = BytesStart::new("prov:person");
        pp.push_attribute(("prov:id", "seis_prov:sp000_pp_0000001"));
        writer.write_event(Event::Start(pp))?;
        write_text_element(&mut writer, "prov:label", name)?;
        write_text_element(&mut writer, "seis_prov:name", name)?;
        write_text_element(&mut writer, "seis_prov:email", email)?;
        writer.write_event(Event::End(BytesEnd::new("prov:person")))?;
    }

    for (i, record) in records.iter().enumerate() {
        let id = format!(
            "seis_prov:sp{:03}_{}_{:06}",
            i + 1,
            activity_code(&record.activity),
            i + 1
        );
        let mut act = BytesStart::new("prov:activity");
        act.push_attribute(("prov:id", id.as_str()));
        writer.write_event(Event::Start(act))?;
        write_text_element(&mut writer, "prov:label", &record.label())?;
        write_text_element(
            &mut writer,
            "prov:type",
            &format!("seis_prov:{}", record.activity),
        )?;
        for (key, value) in &record.attributes {
            write_text_element(
                &mut writer,
                &format!("seis_prov:{}", key),
                &value_text(value),
            )?;
        }
        writer.write_event(Event::End(BytesEnd::new("prov:activity")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("prov:document")))?;
    let bytes = writer.into_inner();
    String::from_utf8(bytes).map_err(|e| SmError::XmlError { msg: e.to_string() })
}

fn parse_value(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(text.to_string()),
    }
}

/// Parse a SEIS-PROV document back into the ledger it was written from.
///
/// Agent and person entries are identity metadata, not processing history,
/// and are not returned.
pub fn from_seis_prov_xml(xml: &str) -> Result<Vec<ProvenanceRecord>, SmError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut records = Vec::new();
    let mut in_activity = false;
    let mut current_tag: Option<String> = None;
    let mut activity = String::new();
    let mut attributes: Vec<(String, Value)> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "prov:activity" {
                    in_activity = true;
                    activity.clear();
                    attributes.clear();
                } else if in_activity {
                    current_tag = Some(name);
                }
            }
            Event::Text(t) => {
                if let (true, Some(tag)) = (in_activity, current_tag.as_ref()) {
                    let text = t.unescape()?.to_string();
                    if tag == "prov:type" {
                        activity = text
                            .strip_prefix("seis_prov:")
                            .unwrap_or(text.as_str())
                            .to_string();
                    } else if let Some(key) = tag.strip_prefix("seis_prov:") {
                        attributes.push((key.to_string(), parse_value(&text)));
                    }
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "prov:activity" {
                    if activity.is_empty() {
                        return Err(SmError::XmlError {
                            msg: "prov:activity without a prov:type".to_string(),
                        });
                    }
                    records.push(ProvenanceRecord {
                        activity: std::mem::take(&mut activity),
                        attributes: std::mem::take(&mut attributes),
                    });
                    in_activity = false;
                } else if in_activity {
                    current_tag = None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ledger() -> Vec<ProvenanceRecord> {
        vec![
            ProvenanceRecord::new(
                "detrend",
                vec![("detrending_method".to_string(), json!("linear"))],
            ),
            ProvenanceRecord::new(
                "highpass_filter",
                vec![
                    ("filter_type".to_string(), json!("Butterworth")),
                    ("corner_frequency".to_string(), json!(0.08)),
                    ("filter_order".to_string(), json!(5)),
                    ("number_of_passes".to_string(), json!(2)),
                ],
            ),
        ]
    }

    #[test]
    fn label_from_activity() {
        let r = ProvenanceRecord::new("lowpass_filter", vec![]);
        assert_eq!(r.label(), "Lowpass Filter");
    }

    #[test]
    fn vocabulary_codes() {
        assert_eq!(activity_code("detrend"), "dt");
        assert_eq!(activity_code("highpass_filter"), "hp");
        assert_eq!(activity_code("no_such_activity"), "ac");
    }

    #[test]
    fn xml_round_trip() {
        let records = ledger();
        let agent = ProvAgent {
            person: Some(("Test User".to_string(), "test@example.org".to_string())),
            ..Default::default()
        };
        let xml = to_seis_prov_xml(&records, &agent).unwrap();
        assert!(xml.contains("prov:softwareAgent"));
        assert!(xml.contains("seis_prov:email"));
        let back = from_seis_prov_xml(&xml).unwrap();
        assert_eq!(records, back);
    }

    #[test]
    fn skipped_entry_round_trip() {
        let records = vec![ProvenanceRecord::new(
            "snr_check",
            vec![("status".to_string(), json!("skipped"))],
        )];
        let xml = to_seis_prov_xml(&records, &ProvAgent::default()).unwrap();
        let back = from_seis_prov_xml(&xml).unwrap();
        assert_eq!(records, back);
    }
}
