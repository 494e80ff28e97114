//! Source-site geometry and site parameters for one station.
use std::path::Path;

use log::warn;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event as XmlEvent};
use quick_xml::Writer;

use strongmotion_core::config::Config;
use strongmotion_core::errors::SmError;
use strongmotion_core::event::Event;
use strongmotion_core::geo;
use strongmotion_core::stream::StationStream;

/// Distances and site parameters of one station for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct StationMetrics {
    pub epicentral_km: f64,
    pub hypocentral_km: f64,
    /// Station-to-event azimuth, degrees clockwise from north.
    pub back_azimuth_deg: f64,
    /// Vs30 values looked up from the configured rasters, keyed by the
    /// configuration name.
    pub vs30: Vec<(String, f64)>,
}

/// An ESRI ASCII grid raster, the common exchange form for Vs30 maps.
#[derive(Debug, Clone)]
pub struct Vs30Grid {
    ncols: usize,
    nrows: usize,
    xll: f64,
    yll: f64,
    cellsize: f64,
    nodata: f64,
    /// Row-major, northernmost row first, as the format stores it.
    values: Vec<f64>,
}

impl Vs30Grid {
    pub fn load(path: &Path) -> Result<Self, SmError> {
        let text = std::fs::read_to_string(path)?;
        let mut ncols = None;
        let mut nrows = None;
        let mut xll = None;
        let mut yll = None;
        let mut cellsize = None;
        let mut nodata = -9999.0;
        let mut values = Vec::new();
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            let Some(first) = parts.next() else { continue };
            match first.to_lowercase().as_str() {
                "ncols" => ncols = parts.next().and_then(|v| v.parse().ok()),
                "nrows" => nrows = parts.next().and_then(|v| v.parse().ok()),
                "xllcorner" => xll = parts.next().and_then(|v| v.parse().ok()),
                "yllcorner" => yll = parts.next().and_then(|v| v.parse().ok()),
                "cellsize" => cellsize = parts.next().and_then(|v| v.parse().ok()),
                "nodata_value" => {
                    nodata = parts.next().and_then(|v| v.parse().ok()).unwrap_or(-9999.0)
                }
                _ => {
                    // A data row; the first token is part of it.
                    values.push(first.parse::<f64>().map_err(|e| SmError::MalformedInput {
                        path: path.display().to_string(),
                        msg: e.to_string(),
                    })?);
                    for token in parts {
                        values.push(token.parse::<f64>().map_err(|e| {
                            SmError::MalformedInput {
                                path: path.display().to_string(),
                                msg: e.to_string(),
                            }
                        })?);
                    }
                }
            }
        }
        let (Some(ncols), Some(nrows), Some(xll), Some(yll), Some(cellsize)) =
            (ncols, nrows, xll, yll, cellsize)
        else {
            return Err(SmError::MalformedInput {
                path: path.display().to_string(),
                msg: "incomplete ESRI ASCII grid header".to_string(),
            });
        };
        if values.len() != ncols * nrows {
            return Err(SmError::MalformedInput {
                path: path.display().to_string(),
                msg: format!(
                    "grid declares {}x{} cells but carries {} values",
                    ncols,
                    nrows,
                    values.len()
                ),
            });
        }
        Ok(Self {
            ncols,
            nrows,
            xll,
            yll,
            cellsize,
            nodata,
            values,
        })
    }

    /// Nearest-cell lookup. `None` outside the grid or on a nodata cell.
    pub fn lookup(&self, latitude: f64, longitude: f64) -> Option<f64> {
        let col = ((longitude - self.xll) / self.cellsize).floor();
        let row_from_bottom = ((latitude - self.yll) / self.cellsize).floor();
        if col < 0.0 || row_from_bottom < 0.0 {
            return None;
        }
        let col = col as usize;
        let row_from_bottom = row_from_bottom as usize;
        if col >= self.ncols || row_from_bottom >= self.nrows {
            return None;
        }
        let row = self.nrows - 1 - row_from_bottom;
        let value = self.values[row * self.ncols + col];
        if (value - self.nodata).abs() < f64::EPSILON {
            None
        } else {
            Some(value)
        }
    }
}

/// Compute the source-site geometry (and any configured Vs30 lookups) for
/// one stream.
pub fn compute_station_metrics(
    stream: &StationStream,
    event: &Event,
    config: &Config,
) -> StationMetrics {
    let coords = stream.traces()[0].header().coordinates;
    let epicentral_km = event.epicentral_distance_km(coords.latitude, coords.longitude);
    let hypocentral_km = event.hypocentral_distance_km(coords.latitude, coords.longitude);
    let back_azimuth_deg = geo::azimuth_deg(
        coords.latitude,
        coords.longitude,
        event.latitude,
        event.longitude,
    );
    let mut vs30 = Vec::new();
    for (name, conf) in &config.metrics.vs30 {
        match Vs30Grid::load(&conf.file) {
            Ok(grid) => {
                if let Some(value) = grid.lookup(coords.latitude, coords.longitude) {
                    vs30.push((name.clone(), value));
                }
            }
            Err(e) => warn!("vs30 raster {} unusable: {}", conf.file.display(), e),
        }
    }
    StationMetrics {
        epicentral_km,
        hypocentral_km,
        back_azimuth_deg,
        vs30,
    }
}

impl StationMetrics {
    pub fn to_xml(&self) -> Result<String, SmError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(XmlEvent::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(XmlEvent::Start(BytesStart::new("station_metrics")))?;
        writer.write_event(XmlEvent::Start(BytesStart::new("distances")))?;
        for (tag, value) in [
            ("epicentral", self.epicentral_km),
            ("hypocentral", self.hypocentral_km),
        ] {
            let mut el = BytesStart::new(tag);
            el.push_attribute(("units", "km"));
            writer.write_event(XmlEvent::Start(el))?;
            writer.write_event(XmlEvent::Text(BytesText::new(&format!("{}", value))))?;
            writer.write_event(XmlEvent::End(BytesEnd::new(tag)))?;
        }
        let mut baz = BytesStart::new("back_azimuth");
        baz.push_attribute(("units", "deg"));
        writer.write_event(XmlEvent::Start(baz))?;
        writer.write_event(XmlEvent::Text(BytesText::new(&format!(
            "{}",
            self.back_azimuth_deg
        ))))?;
        writer.write_event(XmlEvent::End(BytesEnd::new("back_azimuth")))?;
        writer.write_event(XmlEvent::End(BytesEnd::new("distances")))?;
        for (name, value) in &self.vs30 {
            let mut el = BytesStart::new("vs30");
            el.push_attribute(("source", name.as_str()));
            el.push_attribute(("units", "m/s"));
            writer.write_event(XmlEvent::Start(el))?;
            writer.write_event(XmlEvent::Text(BytesText::new(&format!("{}", value))))?;
            writer.write_event(XmlEvent::End(BytesEnd::new("vs30")))?;
        }
        writer.write_event(XmlEvent::End(BytesEnd::new("station_metrics")))?;
        String::from_utf8(writer.into_inner()).map_err(|e| SmError::XmlError { msg: e.to_string() })
    }
}
