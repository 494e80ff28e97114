//! This is the per-event workspace container: one HDF5 file holding the raw
//! and processed stream collections (distinguished by label), the event
//! catalog, station metadata, waveform and station metrics, trace and stream
//! processing parameters, cached spectra and the per-trace SEIS-PROV
//! documents.
//!
//! The layout follows the ASDF convention: `/QuakeML`, `/Waveforms/NET.STA`
//! with `StationXML` plus one dataset per trace, `/AuxiliaryData` subgroups
//! per record kind, and `/Provenance`. Writing requires `&mut` access, so
//! there is exactly one writer per open workspace; any number of readers can
//! share a read-only handle.

pub mod errors;
pub mod layout;
pub mod quakeml;

use std::path::Path;

use hdf5::types::VarLenUnicode;
use hdf5::Group;
use log::debug;

pub use errors::WorkspaceError;

use strongmotion_core::collection::StreamCollection;
use strongmotion_core::enums::Units;
use strongmotion_core::event::Event;
use strongmotion_core::parameters::ParamMap;
use strongmotion_core::provenance::{self, ProvAgent, ProvenanceRecord};
use strongmotion_core::stationxml;
use strongmotion_core::stream::StationStream;
use strongmotion_core::trace::{Coordinates, StandardMetadata, StationTrace, TraceHeader};
use strongmotion_core::{epoch_ns, from_epoch_ns};

use crate::layout::*;

/// An open per-event workspace file.
pub struct StreamWorkspace {
    file: hdf5::File,
    agent: ProvAgent,
}

impl StreamWorkspace {
    /// Create a new workspace, truncating anything at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, WorkspaceError> {
        Ok(Self {
            file: hdf5::File::create(path)?,
            agent: ProvAgent::default(),
        })
    }

    /// Open a workspace read-write, creating it when absent.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WorkspaceError> {
        Ok(Self {
            file: hdf5::File::append(path)?,
            agent: ProvAgent::default(),
        })
    }

    /// Open an existing workspace read-only. Concurrent readers are fine
    /// as long as no writer holds the file.
    pub fn open_readonly<P: AsRef<Path>>(path: P) -> Result<Self, WorkspaceError> {
        Ok(Self {
            file: hdf5::File::open(path)?,
            agent: ProvAgent::default(),
        })
    }

    /// Identity recorded in every provenance document written from here.
    pub fn set_agent(&mut self, agent: ProvAgent) {
        self.agent = agent;
    }

    fn root(&self) -> Result<Group, WorkspaceError> {
        Ok(self.file.group("/")?)
    }

    fn ensure_group(&self, path: &str) -> Result<Group, WorkspaceError> {
        let mut current = self.root()?;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = if current.link_exists(part) {
                current.group(part)?
            } else {
                current.create_group(part)?
            };
        }
        Ok(current)
    }

    fn write_bytes(
        &self,
        group: &Group,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), WorkspaceError> {
        if group.link_exists(name) {
            group.unlink(name)?;
        }
        group.new_dataset_builder().with_data(bytes).create(name)?;
        Ok(())
    }

    fn read_bytes(&self, group: &Group, name: &str) -> Result<Vec<u8>, WorkspaceError> {
        Ok(group.dataset(name)?.read_raw::<u8>()?)
    }

    fn read_string(&self, group: &Group, name: &str) -> Result<String, WorkspaceError> {
        String::from_utf8(self.read_bytes(group, name)?).map_err(|e| WorkspaceError::Hdf5 {
            msg: e.to_string(),
        })
    }

    // ── events ─────────────────────────────────────────────────────

    fn read_catalog(&self) -> Result<Vec<Event>, WorkspaceError> {
        let root = self.root()?;
        if !root.link_exists(QUAKEML_DATASET) {
            return Ok(Vec::new());
        }
        let xml = self.read_string(&root, QUAKEML_DATASET)?;
        Ok(quakeml::read_quakeml(&xml)?)
    }

    /// Add (or refresh) an event in the catalog. Re-adding the same event is
    /// idempotent.
    pub fn add_event(&mut self, event: &Event) -> Result<(), WorkspaceError> {
        let mut catalog = self.read_catalog()?;
        match catalog.iter_mut().find(|e| e.id == event.id) {
            Some(slot) => *slot = event.clone(),
            None => catalog.push(event.clone()),
        }
        let xml = quakeml::write_quakeml(&catalog)?;
        let root = self.root()?;
        self.write_bytes(&root, QUAKEML_DATASET, xml.as_bytes())
    }

    pub fn get_event_ids(&self) -> Result<Vec<String>, WorkspaceError> {
        Ok(self.read_catalog()?.into_iter().map(|e| e.id).collect())
    }

    pub fn get_event(&self, event_id: &str) -> Result<Event, WorkspaceError> {
        self.read_catalog()?
            .into_iter()
            .find(|e| e.id == event_id)
            .ok_or_else(|| WorkspaceError::NotFound {
                what: format!("event {}", event_id),
            })
    }

    // ── streams ────────────────────────────────────────────────────

    fn validate_label(label: &str) -> Result<(), WorkspaceError> {
        if label.is_empty() || label.contains('_') {
            return Err(WorkspaceError::BadLabel {
                label: label.to_string(),
            });
        }
        Ok(())
    }

    /// Existing waveform records of a station that collide with
    /// `(channel, event, label)`.
    fn conflicting_datasets(
        &self,
        station_group: &Group,
        channel_ids: &[String],
        event_id: &str,
        label: &str,
    ) -> Result<Vec<String>, WorkspaceError> {
        let mut conflicts = Vec::new();
        for name in station_group.member_names()? {
            if let Some(tag) = WaveformTag::parse(&name) {
                if tag.event_id == event_id
                    && tag.label == label
                    && channel_ids.contains(&tag.channel_id())
                {
                    conflicts.push(name);
                }
            }
        }
        Ok(conflicts)
    }

    /// Add every stream of the collection under `label`.
    ///
    /// A record that already exists for the same `(station, event, label)`
    /// makes the whole call fail before anything is written, unless
    /// `overwrite` is passed, in which case the prior record is replaced;
    /// re-adding identical content with `overwrite` is idempotent.
    pub fn add_streams(
        &mut self,
        collection: &StreamCollection,
        event: &Event,
        label: &str,
        overwrite: bool,
    ) -> Result<(), WorkspaceError> {
        Self::validate_label(label)?;
        self.add_event(event)?;

        if !overwrite {
            for stream in collection.iter() {
                let station = station_group(stream.traces()[0].header());
                let waveforms = self.root()?;
                if !waveforms.link_exists(WAVEFORMS_GROUP) {
                    break;
                }
                let waveforms = waveforms.group(WAVEFORMS_GROUP)?;
                if !waveforms.link_exists(&station) {
                    continue;
                }
                let group = waveforms.group(&station)?;
                let channel_ids: Vec<String> =
                    stream.traces().iter().map(|t| t.id()).collect();
                if !self
                    .conflicting_datasets(&group, &channel_ids, &event.id, label)?
                    .is_empty()
                {
                    return Err(WorkspaceError::DuplicateRecord {
                        station: stream.id(),
                        event_id: event.id.clone(),
                        label: label.to_string(),
                    });
                }
            }
        }

        for stream in collection.iter() {
            self.write_stream(stream, event, label)?;
        }
        Ok(())
    }

    fn write_stream(
        &mut self,
        stream: &StationStream,
        event: &Event,
        label: &str,
    ) -> Result<(), WorkspaceError> {
        let station = station_group(stream.traces()[0].header());
        let group = self.ensure_group(&format!("{}/{}", WAVEFORMS_GROUP, station))?;

        // Station metadata: merge into whatever the station already has.
        let mut inventory = if group.link_exists(STATIONXML_DATASET) {
            stationxml::read_from_str(&self.read_string(&group, STATIONXML_DATASET)?)?
        } else {
            stationxml::Inventory::default()
        };
        inventory.merge(stream.get_inventory());
        let xml = stationxml::write_to_string(&inventory)?;
        self.write_bytes(&group, STATIONXML_DATASET, xml.as_bytes())?;

        // Waveforms, replacing any prior record of the same identity.
        let channel_ids: Vec<String> = stream.traces().iter().map(|t| t.id()).collect();
        for stale in self.conflicting_datasets(&group, &channel_ids, &event.id, label)? {
            debug!("replacing waveform record {}", stale);
            group.unlink(&stale)?;
        }
        for trace in stream.traces() {
            let name = waveform_dataset_name(trace.header(), &event.id, label);
            let dataset = group
                .new_dataset_builder()
                .with_data(trace.data())
                .create(name.as_str())?;
            dataset
                .new_attr::<i64>()
                .create("starttime")?
                .write_scalar(&epoch_ns(trace.starttime())?)?;
            dataset
                .new_attr::<f64>()
                .create("sampling_rate")?
                .write_scalar(&trace.sampling_rate())?;
            let units: VarLenUnicode =
                trace.units().as_str().parse().map_err(|_| WorkspaceError::Hdf5 {
                    msg: "units tag is not valid unicode".to_string(),
                })?;
            dataset
                .new_attr::<VarLenUnicode>()
                .create("units")?
                .write_scalar(&units)?;

            let record = record_name(&trace.id(), &event.id, label);
            if !trace.parameters().is_empty() {
                let aux = self.ensure_group(&format!(
                    "{}/{}/{}",
                    AUX_GROUP, TRACE_PARAMETERS, station
                ))?;
                self.write_bytes(&aux, &record, trace.parameters().to_json()?.as_bytes())?;
            }
            for kind in trace.cached_names() {
                if let Some(array) = trace.get_cached(kind) {
                    let cache = self.ensure_group(&format!(
                        "{}/{}/{}/{}",
                        AUX_GROUP,
                        CACHE,
                        cache_name(kind),
                        station
                    ))?;
                    if cache.link_exists(&record) {
                        cache.unlink(&record)?;
                    }
                    cache
                        .new_dataset_builder()
                        .with_data(array)
                        .create(record.as_str())?;
                }
            }
            if !trace.get_provenance().is_empty() {
                let prov_group = self.ensure_group(PROVENANCE_GROUP)?;
                let doc =
                    provenance::to_seis_prov_xml(trace.get_provenance(), &self.agent)?;
                self.write_bytes(&prov_group, &record, doc.as_bytes())?;
            }
        }

        if !stream.parameters().is_empty() || !stream.stream_parameters().is_empty() {
            let aux = self.ensure_group(&format!(
                "{}/{}/{}",
                AUX_GROUP, STREAM_PARAMETERS, station
            ))?;
            let record = record_name(&stream.id(), &event.id, label);
            let blob = serde_json::json!({
                "parameters": stream.parameters(),
                "stream_parameters": stream.stream_parameters(),
            });
            self.write_bytes(&aux, &record, blob.to_string().as_bytes())?;
        }
        Ok(())
    }

    /// Read streams back, optionally filtered by `NET.STA` station names and
    /// labels.
    pub fn get_streams(
        &self,
        event_id: &str,
        stations: Option<&[&str]>,
        labels: Option<&[&str]>,
    ) -> Result<StreamCollection, WorkspaceError> {
        let root = self.root()?;
        if !root.link_exists(WAVEFORMS_GROUP) {
            return Ok(StreamCollection::default());
        }
        let waveforms = root.group(WAVEFORMS_GROUP)?;

        // Collected traces keyed by (stream id, label).
        let mut buckets: Vec<((String, String), Vec<StationTrace>)> = Vec::new();
        for station in waveforms.member_names()? {
            if let Some(wanted) = stations {
                if !wanted.contains(&station.as_str()) {
                    continue;
                }
            }
            let group = waveforms.group(&station)?;
            let inventory = if group.link_exists(STATIONXML_DATASET) {
                Some(stationxml::read_from_str(
                    &self.read_string(&group, STATIONXML_DATASET)?,
                )?)
            } else {
                None
            };
            for name in group.member_names()? {
                let Some(tag) = WaveformTag::parse(&name) else {
                    continue;
                };
                if tag.event_id != event_id {
                    continue;
                }
                if let Some(wanted) = labels {
                    if !wanted.contains(&tag.label.as_str()) {
                        continue;
                    }
                }
                let trace = self.read_trace(&group, &station, &name, &tag, inventory.as_ref())?;
                let key = (tag.stream_id(), tag.label.clone());
                match buckets.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, traces)) => traces.push(trace),
                    None => buckets.push((key, vec![trace])),
                }
            }
        }

        // A collection forbids two streams with one channel id, so reading
        // more than one label at a time needs an explicit filter.
        let mut seen_labels: Vec<&str> = Vec::new();
        for ((_, label), _) in &buckets {
            if !seen_labels.contains(&label.as_str()) {
                seen_labels.push(label.as_str());
            }
        }
        if seen_labels.len() > 1 {
            return Err(WorkspaceError::Core(strongmotion_core::SmError::Validation {
                msg: format!(
                    "workspace holds labels {:?} for event {}; pass a label filter",
                    seen_labels, event_id
                ),
            }));
        }

        let mut streams = Vec::with_capacity(buckets.len());
        for ((stream_id, label), mut traces) in buckets {
            traces.sort_by(|a, b| a.header().channel.cmp(&b.header().channel));
            let mut stream = StationStream::new(traces)?;
            self.attach_stream_parameters(&mut stream, &stream_id, event_id, &label)?;
            streams.push(stream);
        }
        Ok(StreamCollection::new(streams)?)
    }

    fn read_trace(
        &self,
        group: &Group,
        station: &str,
        name: &str,
        tag: &WaveformTag,
        inventory: Option<&stationxml::Inventory>,
    ) -> Result<StationTrace, WorkspaceError> {
        let dataset = group.dataset(name)?;
        let data = dataset.read_raw::<f64>()?;
        let starttime = from_epoch_ns(dataset.attr("starttime")?.read_scalar::<i64>()?);
        let sampling_rate = dataset.attr("sampling_rate")?.read_scalar::<f64>()?;
        let units = match dataset.attr("units") {
            Ok(attr) => {
                let tag_text: VarLenUnicode = attr.read_scalar()?;
                Units::new(tag_text.as_str())?
            }
            Err(_) => Units::CmPerSecSquared,
        };

        let mut coordinates = Coordinates::default();
        let mut standard = StandardMetadata::default();
        if let Some(inventory) = inventory {
            standard.source = inventory.source.clone();
            for net in &inventory.networks {
                for sta in &net.stations {
                    for cha in &sta.channels {
                        if cha.code == tag.channel && cha.location_code == tag.location {
                            coordinates = Coordinates {
                                latitude: cha.latitude,
                                longitude: cha.longitude,
                                elevation: cha.elevation,
                            };
                            standard.horizontal_orientation = cha.azimuth;
                            standard.vertical_orientation = cha.dip;
                            standard.instrument = cha.sensor_description.clone();
                        }
                    }
                }
            }
        }

        let header = TraceHeader {
            network: tag.network.clone(),
            station: tag.station.clone(),
            location: tag.location.clone(),
            channel: tag.channel.clone(),
            starttime,
            sampling_rate,
            npts: 0,
            units,
            coordinates,
            standard,
        };
        let mut trace = StationTrace::new(data, header).map_err(WorkspaceError::Core)?;

        let record = record_name(&trace.id(), &tag.event_id, &tag.label);
        if let Ok(aux) = self
            .root()?
            .group(&format!("{}/{}/{}", AUX_GROUP, TRACE_PARAMETERS, station))
        {
            if aux.link_exists(&record) {
                let json = self.read_string(&aux, &record)?;
                trace.replace_parameters(ParamMap::from_json(&json)?);
            }
        }
        if let Ok(cache_root) = self.root()?.group(&format!("{}/{}", AUX_GROUP, CACHE)) {
            for kind_name in cache_root.member_names()? {
                if let Ok(kind_group) =
                    cache_root.group(&format!("{}/{}", kind_name, station))
                {
                    if kind_group.link_exists(&record) {
                        let array = kind_group.dataset(&record)?.read_raw::<f64>()?;
                        trace.set_cached(&cache_kind(&kind_name), array);
                    }
                }
            }
        }
        if let Ok(prov_group) = self.root()?.group(PROVENANCE_GROUP) {
            if prov_group.link_exists(&record) {
                let xml = self.read_string(&prov_group, &record)?;
                for rec in provenance::from_seis_prov_xml(&xml)? {
                    trace.append_provenance_record(rec);
                }
            }
        }
        Ok(trace)
    }

    fn attach_stream_parameters(
        &self,
        stream: &mut StationStream,
        stream_id: &str,
        event_id: &str,
        label: &str,
    ) -> Result<(), WorkspaceError> {
        let station = station_group(stream.traces()[0].header());
        let record = record_name(stream_id, event_id, label);
        if let Ok(aux) = self
            .root()?
            .group(&format!("{}/{}/{}", AUX_GROUP, STREAM_PARAMETERS, station))
        {
            if aux.link_exists(&record) {
                let blob: serde_json::Value =
                    serde_json::from_str(&self.read_string(&aux, &record)?)
                        .map_err(|e| WorkspaceError::Core(e.into()))?;
                if let Some(parameters) = blob.get("parameters") {
                    let map: ParamMap = serde_json::from_value(parameters.clone())
                        .map_err(|e| WorkspaceError::Core(e.into()))?;
                    stream.replace_parameters(map);
                }
                if let Some(serde_json::Value::Object(extra)) = blob.get("stream_parameters")
                {
                    for (key, value) in extra {
                        stream.set_stream_parameter(key, value.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// All labels present in the workspace.
    pub fn get_labels(&self) -> Result<Vec<String>, WorkspaceError> {
        let mut labels: Vec<String> = Vec::new();
        let root = self.root()?;
        if !root.link_exists(WAVEFORMS_GROUP) {
            return Ok(labels);
        }
        let waveforms = root.group(WAVEFORMS_GROUP)?;
        for station in waveforms.member_names()? {
            let group = waveforms.group(&station)?;
            for name in group.member_names()? {
                if let Some(tag) = WaveformTag::parse(&name) {
                    if !labels.contains(&tag.label) {
                        labels.push(tag.label);
                    }
                }
            }
        }
        labels.sort();
        Ok(labels)
    }

    // ── metrics and provenance ─────────────────────────────────────

    /// Store the waveform-metrics document of one stream. Re-storing for
    /// the same record replaces it, so fixed inputs are idempotent.
    pub fn set_waveform_metrics(
        &mut self,
        stream: &StationStream,
        event_id: &str,
        label: &str,
        xml: &str,
    ) -> Result<(), WorkspaceError> {
        Self::validate_label(label)?;
        let station = station_group(stream.traces()[0].header());
        let aux = self.ensure_group(&format!("{}/{}/{}", AUX_GROUP, WAVEFORM_METRICS, station))?;
        let record = record_name(&stream.id(), event_id, label);
        self.write_bytes(&aux, &record, xml.as_bytes())
    }

    /// Fetch a waveform-metrics document by stream id (`NET.STA.LOC.INST`).
    pub fn get_waveform_metrics(
        &self,
        stream_id: &str,
        event_id: &str,
        label: &str,
    ) -> Result<String, WorkspaceError> {
        let station = stream_id.split('.').take(2).collect::<Vec<_>>().join(".");
        let record = record_name(stream_id, event_id, label);
        let group = self
            .root()?
            .group(&format!("{}/{}/{}", AUX_GROUP, WAVEFORM_METRICS, station))
            .map_err(|_| WorkspaceError::NotFound {
                what: format!("waveform metrics for {}", stream_id),
            })?;
        if !group.link_exists(&record) {
            return Err(WorkspaceError::NotFound {
                what: format!("waveform metrics record {}", record),
            });
        }
        self.read_string(&group, &record)
    }

    /// Store the station-metrics document of one stream (no label grain).
    pub fn set_station_metrics(
        &mut self,
        stream: &StationStream,
        event_id: &str,
        xml: &str,
    ) -> Result<(), WorkspaceError> {
        let station = station_group(stream.traces()[0].header());
        let aux = self.ensure_group(&format!("{}/{}/{}", AUX_GROUP, STATION_METRICS, station))?;
        let record = format!("{}_{}", stream.id(), event_id);
        self.write_bytes(&aux, &record, xml.as_bytes())
    }

    pub fn get_station_metrics(
        &self,
        stream_id: &str,
        event_id: &str,
    ) -> Result<String, WorkspaceError> {
        let station = stream_id.split('.').take(2).collect::<Vec<_>>().join(".");
        let record = format!("{}_{}", stream_id, event_id);
        let group = self
            .root()?
            .group(&format!("{}/{}/{}", AUX_GROUP, STATION_METRICS, station))
            .map_err(|_| WorkspaceError::NotFound {
                what: format!("station metrics for {}", stream_id),
            })?;
        if !group.link_exists(&record) {
            return Err(WorkspaceError::NotFound {
                what: format!("station metrics record {}", record),
            });
        }
        self.read_string(&group, &record)
    }

    /// Every stored provenance document of an event, optionally filtered by
    /// label: `(record name, parsed ledger)` pairs.
    pub fn get_provenance(
        &self,
        event_id: &str,
        labels: Option<&[&str]>,
    ) -> Result<Vec<(String, Vec<ProvenanceRecord>)>, WorkspaceError> {
        let root = self.root()?;
        if !root.link_exists(PROVENANCE_GROUP) {
            return Ok(Vec::new());
        }
        let group = root.group(PROVENANCE_GROUP)?;
        let mut out = Vec::new();
        for name in group.member_names()? {
            // Record names are `NET.STA.LOC.CHA_EVENTID_LABEL`.
            let mut parts = name.rsplitn(3, '_');
            let label = parts.next().unwrap_or_default().to_string();
            let event = parts.next().unwrap_or_default();
            if event != event_id {
                continue;
            }
            if let Some(wanted) = labels {
                if !wanted.contains(&label.as_str()) {
                    continue;
                }
            }
            let xml = self.read_string(&group, &name)?;
            out.push((name, provenance::from_seis_prov_xml(&xml)?));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}
