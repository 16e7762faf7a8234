//! The enrichment orchestrator.
//!
//! One [`Processor`] is one configured instance of a variant. The host
//! calls [`Processor::process`] once per input event; the call blocks for
//! the remote round trip and never returns an error to the host.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use geonames_enrichment_models::{EventDestination, InputEvent, SearchParameters, WGS84_WKID};

use crate::config::{PropertySource, resolve_parameters};
use crate::decode::decode;
use crate::emit::{EmitSummary, ProcessorIdentity, emit_all};
use crate::fetch::FeatureService;
use crate::query::build_query;
use crate::sink::OutputSink;
use crate::variant_registry::VariantDescriptor;
use crate::{ConfigError, EnrichError, GeometryError};

/// What one invocation produced.
#[derive(Debug, Default)]
pub struct ProcessReport {
    /// Records accepted by the sink.
    pub published: usize,
    /// Records the sink refused.
    pub dropped: usize,
    /// The terminal failure, if the invocation ended early.
    pub failure: Option<EnrichError>,
}

impl ProcessReport {
    /// Whether the invocation ran to completion.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

impl From<EmitSummary> for ProcessReport {
    fn from(summary: EmitSummary) -> Self {
        Self {
            published: summary.published,
            dropped: summary.dropped,
            failure: None,
        }
    }
}

/// A configured enrichment processor instance.
pub struct Processor {
    id: String,
    descriptor: Arc<VariantDescriptor>,
    parameters: RwLock<Arc<SearchParameters>>,
    service: Arc<dyn FeatureService>,
    sink: Arc<dyn OutputSink>,
}

impl Processor {
    /// Creates an instance, resolving its search parameters from
    /// `properties`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a property is invalid.
    pub fn new(
        id: impl Into<String>,
        descriptor: Arc<VariantDescriptor>,
        properties: &dyn PropertySource,
        service: Arc<dyn FeatureService>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Self, ConfigError> {
        let parameters = resolve_parameters(&descriptor, properties)?;
        Ok(Self {
            id: id.into(),
            descriptor,
            parameters: RwLock::new(Arc::new(parameters)),
            service,
            sink,
        })
    }

    /// Instance id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The variant this instance runs.
    #[must_use]
    pub fn descriptor(&self) -> &VariantDescriptor {
        &self.descriptor
    }

    /// Identity stamped on published records.
    #[must_use]
    pub fn identity(&self) -> ProcessorIdentity {
        ProcessorIdentity {
            id: self.id.clone(),
            uri: self.descriptor.uri(),
        }
    }

    /// Snapshot of the current search parameters.
    #[must_use]
    pub fn parameters(&self) -> Arc<SearchParameters> {
        Arc::clone(&self.parameters.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Re-reads the search parameters.
    ///
    /// The new set replaces the old one atomically; invocations already in
    /// flight finish with the snapshot they started with. On error the
    /// current parameters are kept.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a property is invalid.
    pub fn reconfigure(&self, properties: &dyn PropertySource) -> Result<(), ConfigError> {
        let parameters = Arc::new(resolve_parameters(&self.descriptor, properties)?);
        *self
            .parameters
            .write()
            .unwrap_or_else(PoisonError::into_inner) = parameters;
        log::info!("{self} reconfigured");
        Ok(())
    }

    /// Enriches one event, publishing a record per nearby feature.
    ///
    /// Terminal failures are logged with the event's track id and returned
    /// in the report; they never escape as errors.
    pub fn process(&self, event: &InputEvent) -> ProcessReport {
        match self.enrich(event) {
            Ok(summary) => {
                log::debug!(
                    "{} published {} records for track {} ({} dropped)",
                    self.descriptor.name,
                    summary.published,
                    event.track_id,
                    summary.dropped
                );
                summary.into()
            }
            Err(e) => {
                log::error!(
                    "{} ({}) failed to enrich track {}: {e}",
                    self.descriptor.name,
                    self.id,
                    event.track_id
                );
                ProcessReport {
                    failure: Some(e),
                    ..ProcessReport::default()
                }
            }
        }
    }

    fn enrich(&self, event: &InputEvent) -> Result<EmitSummary, EnrichError> {
        let point = event_point(event)?;
        if event.wkid != WGS84_WKID {
            log::debug!(
                "Track {} has wkid {}; coordinates are sent as-is",
                event.track_id,
                event.wkid
            );
        }

        let url = build_query(&self.descriptor.endpoint, point, &self.parameters());
        let body = self.service.fetch(&url)?;
        let records = decode(&body, &self.descriptor)?;

        Ok(emit_all(records, event, &self.identity(), self.sink.as_ref()))
    }

    /// Whether the output channel is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.sink.is_connected()
    }

    /// Disconnects the output channel.
    pub fn disconnect(&self) {
        self.sink.disconnect();
    }

    /// Output channel status.
    #[must_use]
    pub fn status_details(&self) -> String {
        self.sink.status()
    }

    /// Destinations the output channel publishes to.
    #[must_use]
    pub fn event_destinations(&self) -> Vec<EventDestination> {
        self.sink.destinations()
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self.parameters();
        let names = &self.descriptor.properties;
        write!(
            f,
            "{}/{}[{}:{} {}:{} {}:{} ]",
            self.descriptor.name,
            self.descriptor.version,
            names.username.name,
            params.username,
            names.radius.name,
            params.radius_km,
            names.max_rows.name,
            params.max_rows
        )
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("id", &self.id)
            .field("variant", &self.descriptor.id)
            .field("parameters", &self.parameters())
            .finish_non_exhaustive()
    }
}

/// Extracts the point an event is located at.
///
/// # Errors
///
/// Returns [`GeometryError`] if the event has no geometry or it is not a
/// point.
pub fn event_point(event: &InputEvent) -> Result<geo::Point<f64>, GeometryError> {
    match &event.geometry {
        Some(geo::Geometry::Point(point)) => Ok(*point),
        Some(_) => Err(GeometryError::NotAPoint {
            track_id: event.track_id.clone(),
        }),
        None => Err(GeometryError::Missing {
            track_id: event.track_id.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use geonames_enrichment_models::{NO_INCIDENT, UNAVAILABLE, WGS84_WKID};
    use reqwest::Url;

    use super::*;
    use crate::sink::MemorySink;
    use crate::variant_registry::Variant;
    use crate::{DecodeError, RemoteError};

    /// Replies with a canned body (or status) and records requested URLs.
    struct StubService {
        reply: Result<&'static str, u16>,
        requests: Mutex<Vec<Url>>,
    }

    impl StubService {
        fn body(body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(body),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn status(status: u16) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(status),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<Url> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl FeatureService for StubService {
        fn fetch(&self, url: &Url) -> Result<String, RemoteError> {
            self.requests.lock().unwrap().push(url.clone());
            match self.reply {
                Ok(body) => Ok(body.to_string()),
                Err(status) => Err(RemoteError::Status {
                    status,
                    url: url.to_string(),
                }),
            }
        }
    }

    fn processor(
        variant: Variant,
        service: Arc<StubService>,
    ) -> (Processor, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new(EventDestination::for_instance("p1")));
        let processor = Processor::new(
            "p1",
            Arc::new(variant.descriptor()),
            &BTreeMap::<String, toml::Value>::new(),
            service,
            Arc::clone(&sink) as Arc<dyn OutputSink>,
        )
        .unwrap();
        (processor, sink)
    }

    fn event(event_type: &str) -> InputEvent {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap();
        InputEvent::point("T1", start, event_type, -117.0, 34.0).with_id("INC-1")
    }

    #[test]
    fn osm_poi_cafe_scenario() {
        let service = StubService::body(
            r#"{"poi":[{"name":"Cafe","typeName":"cafe","typeClass":"food","lat":"34.001","lng":"-117.001","distance":"0.12"}]}"#,
        );
        let (processor, sink) = processor(Variant::OsmPoi, Arc::clone(&service));

        let report = processor.process(&event("vehicle"));
        assert!(report.is_success());
        assert_eq!(report.published, 1);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let cafe = &records[0];
        assert_eq!(cafe.text("name"), Some("Cafe"));
        assert_eq!(cafe.text("typeName"), Some("cafe"));
        assert_eq!(cafe.text("typeClass"), Some("food"));
        assert!((cafe.double("distance").unwrap() - 0.12).abs() < f64::EPSILON);
        assert!((cafe.double("lat").unwrap() - 34.001).abs() < f64::EPSILON);
        assert!((cafe.double("lng").unwrap() - -117.001).abs() < f64::EPSILON);
        assert!(!cafe.geometry.is_3d());
        assert!((cafe.geometry.x() - -117.001).abs() < f64::EPSILON);
        assert!((cafe.geometry.y() - 34.001).abs() < f64::EPSILON);
        assert_eq!(cafe.geometry.wkid(), WGS84_WKID);
        assert_eq!(cafe.correlation.track_id, "T1");
        assert_eq!(cafe.correlation.incident_id, NO_INCIDENT);
        assert_eq!(cafe.metadata.owner_id, "p1");

        let url = &service.requests()[0];
        assert_eq!(url.path(), "/findNearbyPOIsOSMJSON");
        let query: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(query["lat"], "34");
        assert_eq!(query["lng"], "-117");
        assert_eq!(query["radius"], "1");
        assert_eq!(query["maxRows"], "50");
        assert!(!query.contains_key("lang"));
    }

    #[test]
    fn wikipedia_scenario_without_elevation_or_summary() {
        let service = StubService::body(
            r#"{"geonames":[{"title":"Hill","lng":-117.001,"lat":34.001,"distance":"0.3","rank":50}]}"#,
        );
        let (processor, sink) = processor(Variant::Wikipedia, Arc::clone(&service));

        let report = processor.process(&event("incident"));
        assert_eq!(report.published, 1);

        let record = &sink.records()[0];
        assert_eq!(record.text("summary"), Some(UNAVAILABLE));
        assert!(record.double("elevation").unwrap().is_nan());
        assert!(!record.geometry.is_3d());
        assert_eq!(record.correlation.incident_id, "INC-1");
        assert_eq!(record.definition_name, "GeoNamesWikipedia");

        let url = &service.requests()[0];
        assert!(url.query_pairs().any(|(k, v)| k == "lang" && v == "en"));
    }

    #[test]
    fn output_is_wgs84_whatever_the_input_reference() {
        let service = StubService::body(
            r#"{"poi":[{"name":"a","lat":"34.001","lng":"-117.001"},{"name":"b"}]}"#,
        );
        let (processor, sink) = processor(Variant::OsmPoi, Arc::clone(&service));

        let mut mercator = event("vehicle");
        mercator.geometry = Some(geo::Geometry::Point(geo::Point::new(
            -13_024_380.4, 4_028_802.0,
        )));
        mercator.wkid = 3857;

        let report = processor.process(&mercator);
        assert_eq!(report.published, 2);
        for record in sink.records() {
            assert_eq!(record.geometry.wkid(), WGS84_WKID);
        }

        let query: BTreeMap<String, String> =
            service.requests()[0].query_pairs().into_owned().collect();
        assert_eq!(query["lng"], "-13024380.4");
        assert_eq!(query["lat"], "4028802");
    }

    #[test]
    fn remote_failure_emits_nothing_and_is_reported() {
        let (processor, sink) = processor(Variant::OsmPoi, StubService::status(500));
        let report = processor.process(&event("vehicle"));
        assert_eq!(report.published, 0);
        assert!(matches!(
            report.failure,
            Some(EnrichError::Remote(RemoteError::Status { status: 500, .. }))
        ));
        assert!(sink.records().is_empty());
    }

    #[test]
    fn malformed_json_emits_nothing_and_is_reported() {
        let (processor, sink) = processor(Variant::OsmPoi, StubService::body("<html>"));
        let report = processor.process(&event("vehicle"));
        assert!(matches!(
            report.failure,
            Some(EnrichError::Decode(DecodeError::Json(_)))
        ));
        assert!(sink.records().is_empty());
    }

    #[test]
    fn event_without_point_is_a_geometry_error() {
        let service = StubService::body(r#"{"poi":[]}"#);
        let (processor, sink) = processor(Variant::OsmPoi, Arc::clone(&service));

        let mut missing = event("vehicle");
        missing.geometry = None;
        let report = processor.process(&missing);
        assert!(matches!(
            report.failure,
            Some(EnrichError::Geometry(GeometryError::Missing { .. }))
        ));

        let mut line = event("vehicle");
        line.geometry = Some(geo::Geometry::LineString(geo::LineString::from(vec![
            (0.0, 0.0),
            (1.0, 1.0),
        ])));
        let report = processor.process(&line);
        assert!(matches!(
            report.failure,
            Some(EnrichError::Geometry(GeometryError::NotAPoint { .. }))
        ));

        assert!(service.requests().is_empty());
        assert!(sink.records().is_empty());
    }

    #[test]
    fn publish_failure_drops_only_that_record() {
        let service = StubService::body(r#"{"poi":[{"name":"a"},{"name":"b"},{"name":"c"}]}"#);
        let sink = Arc::new(MemorySink::new(EventDestination::for_instance("p1")).rejecting([1]));
        let processor = Processor::new(
            "p1",
            Arc::new(Variant::OsmPoi.descriptor()),
            &BTreeMap::<String, toml::Value>::new(),
            service,
            Arc::clone(&sink) as Arc<dyn OutputSink>,
        )
        .unwrap();

        let report = processor.process(&event("vehicle"));
        assert!(report.is_success());
        assert_eq!((report.published, report.dropped), (2, 1));
        let names: Vec<_> = sink
            .records()
            .iter()
            .filter_map(|r| r.text("name").map(String::from))
            .collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn reconfigure_replaces_parameters() {
        let service = StubService::body(r#"{"poi":[]}"#);
        let (processor, _sink) = processor(Variant::OsmPoi, Arc::clone(&service));
        let before = processor.parameters();

        let mut properties = BTreeMap::new();
        properties.insert(
            "geoNamesOSMPOIsRadius".to_string(),
            toml::Value::Float(3.0),
        );
        processor.reconfigure(&properties).unwrap();

        assert!((before.radius_km - 1.0).abs() < f64::EPSILON);
        assert!((processor.parameters().radius_km - 3.0).abs() < f64::EPSILON);

        processor.process(&event("vehicle"));
        assert!(
            service.requests()[0]
                .query_pairs()
                .any(|(k, v)| k == "radius" && v == "3")
        );

        properties.insert(
            "geoNamesOSMPOIsMaxRows".to_string(),
            toml::Value::String("many".to_string()),
        );
        assert!(processor.reconfigure(&properties).is_err());
        assert!((processor.parameters().radius_km - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn passes_through_sink_state() {
        let (processor, _sink) = processor(Variant::OsmPoi, StubService::body(r#"{"poi":[]}"#));
        assert!(processor.is_connected());
        assert_eq!(
            processor.event_destinations(),
            [EventDestination::for_instance("p1")]
        );
        processor.disconnect();
        assert!(!processor.is_connected());
        assert!(processor.status_details().contains("p1:event"));
    }

    #[test]
    fn displays_name_version_and_properties() {
        let (processor, _sink) = processor(Variant::Wikipedia, StubService::body("{}"));
        let rendered = processor.to_string();
        assert!(rendered.starts_with("GeoNamesWikipediaProcessor/10.3.0["));
        assert!(rendered.contains("geoNamesWikiRadius:10 "));
        assert!(rendered.contains("geoNamesWikiMaxRows:10 "));
    }

    #[test]
    fn concurrent_invocations_share_parameters() {
        let service = StubService::body(r#"{"poi":[{"name":"a"}]}"#);
        let (processor, sink) = processor(Variant::OsmPoi, service);
        let processor = Arc::new(processor);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let processor = Arc::clone(&processor);
                std::thread::spawn(move || processor.process(&event("vehicle")).published)
            })
            .collect();
        let published: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(published, 4);
        assert_eq!(sink.records().len(), 4);
    }
}
