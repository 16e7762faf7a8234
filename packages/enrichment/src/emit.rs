//! Correlation and publication of decoded records.

use geonames_enrichment_models::{
    Correlation, EnrichedRecord, INCIDENT_EVENT_TYPE, InputEvent, NO_INCIDENT, RECORD_KIND,
    RecordMetadata,
};

use crate::PublishError;
use crate::sink::OutputSink;

/// The processor instance records are attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorIdentity {
    /// Processor instance id.
    pub id: String,
    /// Processor definition URI.
    pub uri: String,
}

/// Outcome of emitting one batch of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitSummary {
    /// Records accepted by the sink.
    pub published: usize,
    /// Records the sink refused.
    pub dropped: usize,
}

/// Incident identifier for records derived from `event`.
///
/// Only events of type `"incident"` contribute their `id`; everything else
/// (including an incident without an `id`) maps to `"none"`.
#[must_use]
pub fn incident_id(event: &InputEvent) -> String {
    if event.event_type == INCIDENT_EVENT_TYPE {
        event.id.clone().unwrap_or_else(|| NO_INCIDENT.to_string())
    } else {
        NO_INCIDENT.to_string()
    }
}

/// Correlation fields copied from `event`.
#[must_use]
pub fn correlation(event: &InputEvent) -> Correlation {
    Correlation {
        track_id: event.track_id.clone(),
        timestamp: Some(event.start_time),
        incident_id: incident_id(event),
    }
}

/// Stamps correlation and ownership data onto a record.
pub fn attach(record: &mut EnrichedRecord, correlation: &Correlation, identity: &ProcessorIdentity) {
    record.correlation = correlation.clone();
    record.metadata = RecordMetadata {
        kind: RECORD_KIND.to_string(),
        owner_id: identity.id.clone(),
        owner_uri: identity.uri.clone(),
    };
}

/// Attaches correlation data to one record and publishes it.
///
/// # Errors
///
/// Returns [`PublishError`] if the sink refuses the record.
pub fn emit(
    mut record: EnrichedRecord,
    event: &InputEvent,
    identity: &ProcessorIdentity,
    sink: &dyn OutputSink,
) -> Result<(), PublishError> {
    attach(&mut record, &correlation(event), identity);
    sink.publish(record)
}

/// Publishes a batch. A refused record is logged and dropped; the rest of
/// the batch is still published.
pub fn emit_all(
    records: Vec<EnrichedRecord>,
    event: &InputEvent,
    identity: &ProcessorIdentity,
    sink: &dyn OutputSink,
) -> EmitSummary {
    let correlation = correlation(event);
    let mut summary = EmitSummary::default();

    for mut record in records {
        attach(&mut record, &correlation, identity);
        match sink.publish(record) {
            Ok(()) => summary.published += 1,
            Err(e) => {
                summary.dropped += 1;
                log::warn!(
                    "Failed to publish record for track {} from {}: {e}",
                    correlation.track_id,
                    identity.id
                );
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use geonames_enrichment_models::{EventDestination, FieldValue, PointGeometry};

    use super::*;
    use crate::sink::MemorySink;

    fn identity() -> ProcessorIdentity {
        ProcessorIdentity {
            id: "p1".to_string(),
            uri: "geonames.osmpoi.processor/10.5.0".to_string(),
        }
    }

    fn event(event_type: &str) -> InputEvent {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap();
        InputEvent::point("T1", start, event_type, -117.0, 34.0).with_id("INC-9")
    }

    fn record() -> EnrichedRecord {
        EnrichedRecord::new(
            "GeoNamesOSMPOI",
            vec![("name".to_string(), FieldValue::Text("Cafe".to_string()))],
            PointGeometry::new_2d(-117.001, 34.001),
        )
    }

    #[test]
    fn incident_events_contribute_their_id() {
        assert_eq!(incident_id(&event("incident")), "INC-9");
        assert_eq!(incident_id(&event("vehicle")), NO_INCIDENT);
        assert_eq!(incident_id(&event("Incident")), NO_INCIDENT);

        let mut no_id = event("incident");
        no_id.id = None;
        assert_eq!(incident_id(&no_id), NO_INCIDENT);
    }

    #[test]
    fn emit_copies_correlation_and_ownership() {
        let sink = MemorySink::new(EventDestination::for_instance("p1"));
        let input = event("incident");
        emit(record(), &input, &identity(), &sink).unwrap();

        let published = sink.take();
        let r = &published[0];
        assert_eq!(r.correlation.track_id, "T1");
        assert_eq!(r.correlation.timestamp, Some(input.start_time));
        assert_eq!(r.correlation.incident_id, "INC-9");
        assert_eq!(r.metadata.kind, RECORD_KIND);
        assert_eq!(r.metadata.owner_id, "p1");
        assert_eq!(r.metadata.owner_uri, "geonames.osmpoi.processor/10.5.0");
    }

    #[test]
    fn refused_record_does_not_stop_siblings() {
        let sink = MemorySink::new(EventDestination::for_instance("p1")).rejecting([0]);
        let summary = emit_all(
            vec![record(), record(), record()],
            &event("vehicle"),
            &identity(),
            &sink,
        );
        assert_eq!(
            summary,
            EmitSummary {
                published: 2,
                dropped: 1
            }
        );
        assert_eq!(sink.records().len(), 2);
    }
}
