//! Minimal QuakeML read/write for the `/QuakeML` dataset.
//!
//! One document holds one `<event>` per event id, each carrying the origin
//! (time, hypocenter) and the preferred magnitude. Only the subset the
//! workspace needs is modeled; unknown elements are ignored on read.
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event as XmlEvent};
use quick_xml::{Reader, Writer};

use strongmotion_core::errors::SmError;
use strongmotion_core::event::Event;

const QUAKEML_NS: &str = "http://quakeml.org/xmlns/bed/1.2";

fn write_value_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    value: &str,
) -> Result<(), SmError> {
    writer.write_event(XmlEvent::Start(BytesStart::new(tag)))?;
    writer.write_event(XmlEvent::Start(BytesStart::new("value")))?;
    writer.write_event(XmlEvent::Text(BytesText::new(value)))?;
    writer.write_event(XmlEvent::End(BytesEnd::new("value")))?;
    writer.write_event(XmlEvent::End(BytesEnd::new(tag)))?;
    Ok(())
}

/// Serialize a catalog of events to a QuakeML document.
pub fn write_quakeml(events: &[Event]) -> Result<String, SmError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(XmlEvent::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    let mut root = BytesStart::new("quakeml");
    root.push_attribute(("xmlns", QUAKEML_NS));
    writer.write_event(XmlEvent::Start(root))?;
    let mut params = BytesStart::new("eventParameters");
    params.push_attribute(("publicID", "smi:local/catalog"));
    writer.write_event(XmlEvent::Start(params))?;

    for event in events {
        let mut ev = BytesStart::new("event");
        let public_id = format!("smi:local/event/{}", event.id);
        ev.push_attribute(("publicID", public_id.as_str()));
        writer.write_event(XmlEvent::Start(ev))?;

        let mut origin = BytesStart::new("origin");
        let origin_id = format!("smi:local/origin/{}", event.id);
        origin.push_attribute(("publicID", origin_id.as_str()));
        writer.write_event(XmlEvent::Start(origin))?;
        write_value_element(
            &mut writer,
            "time",
            &event.time.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
        )?;
        write_value_element(&mut writer, "latitude", &format!("{}", event.latitude))?;
        write_value_element(&mut writer, "longitude", &format!("{}", event.longitude))?;
        // QuakeML depth is meters.
        write_value_element(&mut writer, "depth", &format!("{}", event.depth_km * 1000.0))?;
        writer.write_event(XmlEvent::End(BytesEnd::new("origin")))?;

        let mut magnitude = BytesStart::new("magnitude");
        let magnitude_id = format!("smi:local/magnitude/{}", event.id);
        magnitude.push_attribute(("publicID", magnitude_id.as_str()));
        writer.write_event(XmlEvent::Start(magnitude))?;
        write_value_element(&mut writer, "mag", &format!("{}", event.magnitude))?;
        if let Some(kind) = &event.magnitude_type {
            writer.write_event(XmlEvent::Start(BytesStart::new("type")))?;
            writer.write_event(XmlEvent::Text(BytesText::new(kind)))?;
            writer.write_event(XmlEvent::End(BytesEnd::new("type")))?;
        }
        writer.write_event(XmlEvent::End(BytesEnd::new("magnitude")))?;

        writer.write_event(XmlEvent::End(BytesEnd::new("event")))?;
    }

    writer.write_event(XmlEvent::End(BytesEnd::new("eventParameters")))?;
    writer.write_event(XmlEvent::End(BytesEnd::new("quakeml")))?;
    String::from_utf8(writer.into_inner()).map_err(|e| SmError::XmlError { msg: e.to_string() })
}

#[derive(Default)]
struct PartialEvent {
    id: String,
    time: Option<DateTime<Utc>>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    depth_km: Option<f64>,
    magnitude: Option<f64>,
    magnitude_type: Option<String>,
}

impl PartialEvent {
    fn finish(self) -> Option<Event> {
        Some(Event {
            id: self.id,
            time: self.time?,
            latitude: self.latitude?,
            longitude: self.longitude?,
            depth_km: self.depth_km?,
            magnitude: self.magnitude?,
            magnitude_type: self.magnitude_type,
        })
    }
}

/// Parse a QuakeML document back into the catalog.
pub fn read_quakeml(xml: &str) -> Result<Vec<Event>, SmError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut events = Vec::new();
    let mut current: Option<PartialEvent> = None;
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event()? {
            XmlEvent::Start(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
                if name == "event" {
                    let mut partial = PartialEvent::default();
                    for attr in start.attributes().flatten() {
                        if attr.key.as_ref() == b"publicID" {
                            let value = String::from_utf8_lossy(&attr.value).to_string();
                            partial.id = value
                                .rsplit('/')
                                .next()
                                .unwrap_or(value.as_str())
                                .to_string();
                        }
                    }
                    current = Some(partial);
                }
                path.push(name);
            }
            XmlEvent::Text(text) => {
                let Some(partial) = current.as_mut() else { continue };
                let text = text.unescape()?.to_string();
                let tail: Vec<&str> = path.iter().rev().take(3).map(|s| s.as_str()).collect();
                match tail.as_slice() {
                    ["value", "time", "origin"] => {
                        partial.time = DateTime::parse_from_rfc3339(&text)
                            .ok()
                            .map(|t| t.with_timezone(&Utc));
                    }
                    ["value", "latitude", "origin"] => partial.latitude = text.parse().ok(),
                    ["value", "longitude", "origin"] => partial.longitude = text.parse().ok(),
                    ["value", "depth", "origin"] => {
                        partial.depth_km = text.parse::<f64>().ok().map(|m| m / 1000.0)
                    }
                    ["value", "mag", "magnitude"] => partial.magnitude = text.parse().ok(),
                    ["type", "magnitude", "event"] => partial.magnitude_type = Some(text),
                    _ => {}
                }
            }
            XmlEvent::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).to_string();
                path.pop();
                if name == "event" {
                    if let Some(event) = current.take().and_then(PartialEvent::finish) {
                        events.push(event);
                    }
                }
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn catalog() -> Vec<Event> {
        vec![
            Event {
                id: "ci3144585".to_string(),
                time: Utc.with_ymd_and_hms(1994, 1, 17, 12, 30, 55).unwrap(),
                latitude: 34.213,
                longitude: -118.537,
                depth_km: 18.2,
                magnitude: 6.7,
                magnitude_type: Some("Mw".to_string()),
            },
            Event {
                id: "nc72282711".to_string(),
                time: Utc.with_ymd_and_hms(2014, 8, 24, 10, 20, 44).unwrap(),
                latitude: 38.215,
                longitude: -122.312,
                depth_km: 11.1,
                magnitude: 6.0,
                magnitude_type: None,
            },
        ]
    }

    #[test]
    fn quakeml_round_trip() {
        let events = catalog();
        let xml = write_quakeml(&events).unwrap();
        assert!(xml.contains("smi:local/event/ci3144585"));
        let back = read_quakeml(&xml).unwrap();
        assert_eq!(events, back);
    }

    #[test]
    fn depth_converts_to_meters_in_the_document() {
        let xml = write_quakeml(&catalog()).unwrap();
        assert!(xml.contains("<value>18200</value>"));
    }

    #[test]
    fn foreign_elements_are_ignored() {
        let xml = r#"<?xml version="1.0"?>
<quakeml><eventParameters>
  <event publicID="smi:remote/event/abc123">
    <creationInfo><agencyID>XX</agencyID></creationInfo>
    <origin publicID="x">
      <time><value>1994-01-17T12:30:55+00:00</value></time>
      <latitude><value>34.2</value></latitude>
      <longitude><value>-118.5</value></longitude>
      <depth><value>18200</value></depth>
    </origin>
    <magnitude publicID="y"><mag><value>6.7</value></mag></magnitude>
  </event>
</eventParameters></quakeml>"#;
        let events = read_quakeml(xml).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "abc123");
        assert_eq!(events[0].depth_km, 18.2);
        assert!(events[0].magnitude_type.is_none());
    }
}
