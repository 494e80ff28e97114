mod timing {
    use crate::{epoch_ns, from_epoch_ns};
    use chrono::{TimeZone, Utc};

    #[test]
    fn epoch_ns_round_trip() {
        let t = Utc.with_ymd_and_hms(1994, 1, 17, 12, 30, 55).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let ns = epoch_ns(t).unwrap();
        assert_eq!(from_epoch_ns(ns), t);
    }

    #[test]
    fn sub_second_precision_survives() {
        let ns = 789_123_456_789_i64;
        assert_eq!(epoch_ns(from_epoch_ns(ns)).unwrap(), ns);
    }
}

mod model {
    use crate::enums::Units;
    use crate::parameters::{Param, ParamKey};
    use crate::trace::{Coordinates, StandardMetadata, StationTrace, TraceHeader};
    use crate::stream::StationStream;
    use chrono::{TimeZone, Utc};

    fn trace(channel: &str) -> StationTrace {
        let header = TraceHeader {
            network: "CI".to_string(),
            station: "TOP".to_string(),
            location: String::new(),
            channel: channel.to_string(),
            starttime: Utc.with_ymd_and_hms(1994, 1, 17, 12, 30, 0).unwrap(),
            sampling_rate: 200.0,
            npts: 0,
            units: Units::CmPerSecSquared,
            coordinates: Coordinates {
                latitude: 34.084,
                longitude: -118.599,
                elevation: 290.0,
            },
            standard: StandardMetadata::default(),
        };
        StationTrace::new(vec![0.0; 1800], header).unwrap()
    }

    #[test]
    fn inventory_from_stream_merges_channels() {
        let stream =
            StationStream::new(vec![trace("HN1"), trace("HN2"), trace("HNZ")]).unwrap();
        let inventory = stream.get_inventory();
        assert_eq!(inventory.networks.len(), 1);
        assert_eq!(inventory.networks[0].stations.len(), 1);
        assert_eq!(inventory.networks[0].stations[0].channels.len(), 3);
        let xml = crate::stationxml::write_to_string(&inventory).unwrap();
        let back = crate::stationxml::read_from_str(&xml).unwrap();
        assert_eq!(inventory, back);
    }

    #[test]
    fn stream_parameters_survive_json() {
        let mut stream = StationStream::new(vec![trace("HN1"), trace("HN2")]).unwrap();
        stream.set_parameter(Param::CornerFrequencies {
            highpass: 0.1,
            lowpass: 30.0,
            method: "snr".to_string(),
        });
        let json = stream.parameters().to_json().unwrap();
        let back = crate::parameters::ParamMap::from_json(&json).unwrap();
        assert_eq!(stream.parameters(), &back);
        assert!(back.get(ParamKey::CornerFrequencies).is_some());
    }

    #[test]
    fn skipped_steps_still_extend_provenance() {
        // A failed trace refuses data mutation, but the ledger keeps
        // recording what the pipeline attempted.
        let mut t = trace("HN1");
        t.fail("snr_check", "Failed SNR check; SNR less than threshold.");
        t.set_provenance(
            "lowpass_filter",
            vec![("status".to_string(), serde_json::json!("skipped"))],
        );
        assert_eq!(t.get_provenance().len(), 1);
        assert!(t.set_data(vec![1.0]).is_err());
    }
}
