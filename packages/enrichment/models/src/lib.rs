#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Data types shared by the GeoNames enrichment pipeline.
//!
//! An [`InputEvent`] (a located, timestamped track observation) is turned
//! into zero or more [`EnrichedRecord`]s, one per nearby feature returned
//! by the GeoNames web service. Records carry a fixed, ordered field list
//! whose values are always populated: either the decoded remote value or
//! the field's fallback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Spatial reference of every enriched record geometry (WGS84).
pub const WGS84_WKID: u32 = 4326;

/// Sentinel used for text fields that could not be decoded.
pub const UNAVAILABLE: &str = "unavailable";

/// Incident identifier used when the triggering event is not an incident.
pub const NO_INCIDENT: &str = "none";

/// Event type name whose `id` field is copied onto derived records.
pub const INCIDENT_EVENT_TYPE: &str = "incident";

/// Record kind stamped on every published record.
pub const RECORD_KIND: &str = "event";

/// Errors raised while building an [`InputEvent`] from external input.
#[derive(Debug, thiserror::Error)]
pub enum InputEventError {
    /// A required property is missing.
    #[error("Input event is missing property '{name}'")]
    MissingProperty {
        /// Name of the missing property.
        name: &'static str,
    },

    /// The timestamp is not RFC 3339.
    #[error("Invalid timestamp '{value}': {source}")]
    InvalidTimestamp {
        /// The rejected value.
        value: String,
        /// Underlying parse failure.
        source: chrono::ParseError,
    },

    /// The `GeoJSON` geometry could not be converted.
    #[error("Invalid geometry: {0}")]
    Geometry(#[from] geojson::Error),
}

/// A located event delivered by the host.
///
/// Read-only to the pipeline: the processor copies correlation data out of
/// it but never mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct InputEvent {
    /// Unique track identifier.
    pub track_id: String,
    /// Originating timestamp.
    pub start_time: DateTime<Utc>,
    /// Name of the event's type definition (e.g. `"incident"`).
    pub event_type: String,
    /// Event geometry. Enrichment requires a point.
    pub geometry: Option<geo::Geometry<f64>>,
    /// Spatial reference identifier of [`Self::geometry`].
    pub wkid: u32,
    /// Optional `id` field, used as the incident identifier.
    pub id: Option<String>,
}

impl InputEvent {
    /// Creates a WGS84 point event.
    #[must_use]
    pub fn point(
        track_id: impl Into<String>,
        start_time: DateTime<Utc>,
        event_type: impl Into<String>,
        lon: f64,
        lat: f64,
    ) -> Self {
        Self {
            track_id: track_id.into(),
            start_time,
            event_type: event_type.into(),
            geometry: Some(geo::Geometry::Point(geo::Point::new(lon, lat))),
            wkid: WGS84_WKID,
            id: None,
        }
    }

    /// Sets the event's `id` field.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Builds an event from a `GeoJSON` `Feature`.
    ///
    /// Recognized properties: `trackId` (required), `timestamp` (RFC 3339,
    /// defaults to now), `type`, `id` (falls back to the feature id) and
    /// `wkid` (defaults to 4326).
    ///
    /// # Errors
    ///
    /// Returns [`InputEventError`] if `trackId` is missing, the timestamp
    /// does not parse, or the geometry cannot be converted.
    pub fn from_geojson_feature(feature: geojson::Feature) -> Result<Self, InputEventError> {
        let properties = feature.properties.unwrap_or_default();

        let track_id = property_string(&properties, "trackId")
            .ok_or(InputEventError::MissingProperty { name: "trackId" })?;

        let start_time = match properties.get("timestamp").and_then(serde_json::Value::as_str) {
            Some(value) => DateTime::parse_from_rfc3339(value)
                .map_err(|source| InputEventError::InvalidTimestamp {
                    value: value.to_string(),
                    source,
                })?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        let id = property_string(&properties, "id").or_else(|| {
            feature.id.map(|id| match id {
                geojson::feature::Id::String(s) => s,
                geojson::feature::Id::Number(n) => n.to_string(),
            })
        });

        let wkid = properties
            .get("wkid")
            .and_then(serde_json::Value::as_u64)
            .and_then(|w| u32::try_from(w).ok())
            .unwrap_or(WGS84_WKID);

        let geometry = feature
            .geometry
            .map(geo::Geometry::<f64>::try_from)
            .transpose()?;

        Ok(Self {
            track_id,
            start_time,
            event_type: property_string(&properties, "type").unwrap_or_default(),
            geometry,
            wkid,
            id,
        })
    }
}

/// Reads a string property, accepting numbers as well.
fn property_string(properties: &geojson::JsonObject, name: &str) -> Option<String> {
    match properties.get(name)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Declared type of an enriched record field.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FieldType {
    /// String passthrough.
    Text,
    /// Parsed to `f64`.
    Double,
}

/// A decoded (or fallback) field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Text value.
    Text(String),
    /// Numeric value. May be `NaN` when used as a fallback.
    Double(f64),
}

impl FieldValue {
    /// Returns the type this value satisfies.
    #[must_use]
    pub const fn field_type(&self) -> FieldType {
        match self {
            Self::Text(_) => FieldType::Text,
            Self::Double(_) => FieldType::Double,
        }
    }

    /// Returns the text value, if this is a text field.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Double(_) => None,
        }
    }

    /// Returns the numeric value, if this is a double field.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Converts to JSON. Non-finite numbers become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Double(v) => serde_json::Number::from_f64(*v)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
        }
    }
}

/// A point tagged with a spatial reference, optionally carrying elevation.
///
/// An "empty" point has `NaN` coordinates and is produced when a feature
/// lacks a usable location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointGeometry {
    point: geo::Point<f64>,
    z: Option<f64>,
    wkid: u32,
}

impl PointGeometry {
    /// Creates a 2D WGS84 point.
    #[must_use]
    pub fn new_2d(x: f64, y: f64) -> Self {
        Self {
            point: geo::Point::new(x, y),
            z: None,
            wkid: WGS84_WKID,
        }
    }

    /// Creates a 3D WGS84 point.
    #[must_use]
    pub fn new_3d(x: f64, y: f64, z: f64) -> Self {
        Self {
            point: geo::Point::new(x, y),
            z: Some(z),
            wkid: WGS84_WKID,
        }
    }

    /// Creates an empty WGS84 point.
    #[must_use]
    pub fn empty() -> Self {
        Self::new_2d(f64::NAN, f64::NAN)
    }

    /// Longitude.
    #[must_use]
    pub fn x(&self) -> f64 {
        self.point.x()
    }

    /// Latitude.
    #[must_use]
    pub fn y(&self) -> f64 {
        self.point.y()
    }

    /// Elevation, for 3D points.
    #[must_use]
    pub const fn z(&self) -> Option<f64> {
        self.z
    }

    /// Spatial reference identifier.
    #[must_use]
    pub const fn wkid(&self) -> u32 {
        self.wkid
    }

    /// The planar part of the point.
    #[must_use]
    pub const fn point(&self) -> geo::Point<f64> {
        self.point
    }

    /// Whether the point carries an elevation.
    #[must_use]
    pub const fn is_3d(&self) -> bool {
        self.z.is_some()
    }

    /// Whether either planar coordinate is missing or non-finite.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.x().is_finite() || !self.y().is_finite()
    }

    /// Converts to a `GeoJSON` point. Empty points have no geometry.
    #[must_use]
    pub fn to_geojson(&self) -> Option<geojson::Geometry> {
        if self.is_empty() {
            return None;
        }
        let mut position = vec![self.x(), self.y()];
        if let Some(z) = self.z.filter(|z| z.is_finite()) {
            position.push(z);
        }
        Some(geojson::Geometry::new(geojson::Value::Point(position)))
    }
}

/// Identifiers copied from the triggering event onto each derived record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    /// Track identifier of the input event.
    pub track_id: String,
    /// Start time of the input event.
    pub timestamp: Option<DateTime<Utc>>,
    /// Incident identifier, or [`NO_INCIDENT`].
    pub incident_id: String,
}

impl Default for Correlation {
    fn default() -> Self {
        Self {
            track_id: String::new(),
            timestamp: None,
            incident_id: NO_INCIDENT.to_string(),
        }
    }
}

/// Ownership metadata of a published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Record kind, always [`RECORD_KIND`] once emitted.
    pub kind: String,
    /// Id of the processor instance that produced the record.
    pub owner_id: String,
    /// URI of the processor definition.
    pub owner_uri: String,
}

impl Default for RecordMetadata {
    fn default() -> Self {
        Self {
            kind: RECORD_KIND.to_string(),
            owner_id: String::new(),
            owner_uri: String::new(),
        }
    }
}

/// The pipeline's output unit: one nearby feature, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    /// Name of the output definition (e.g. `"GeoNamesOSMPOI"`).
    pub definition_name: String,
    /// Correlation fields, attached at emission.
    pub correlation: Correlation,
    /// Feature location in WGS84.
    pub geometry: PointGeometry,
    /// Ownership metadata, attached at emission.
    pub metadata: RecordMetadata,
    fields: Vec<(String, FieldValue)>,
}

impl EnrichedRecord {
    /// Creates a record from its decoded field list (in declaration order).
    #[must_use]
    pub fn new(
        definition_name: impl Into<String>,
        fields: Vec<(String, FieldValue)>,
        geometry: PointGeometry,
    ) -> Self {
        Self {
            definition_name: definition_name.into(),
            correlation: Correlation::default(),
            geometry,
            metadata: RecordMetadata::default(),
            fields,
        }
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Looks up a text field by name.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_str)
    }

    /// Looks up a double field by name.
    #[must_use]
    pub fn double(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(FieldValue::as_f64)
    }

    /// Iterates fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Renders the record as a `GeoJSON` `Feature`.
    ///
    /// Correlation and decoded fields become properties; ownership
    /// metadata is carried as foreign members.
    #[must_use]
    pub fn to_geojson_feature(&self) -> geojson::Feature {
        let mut properties = geojson::JsonObject::new();
        properties.insert(
            "trackId".to_string(),
            serde_json::Value::String(self.correlation.track_id.clone()),
        );
        properties.insert(
            "timestamp".to_string(),
            self.correlation
                .timestamp
                .map_or(serde_json::Value::Null, |t| {
                    serde_json::Value::String(t.to_rfc3339())
                }),
        );
        properties.insert(
            "incidentId".to_string(),
            serde_json::Value::String(self.correlation.incident_id.clone()),
        );
        for (name, value) in &self.fields {
            properties.insert(name.clone(), value.to_json());
        }

        let mut foreign = geojson::JsonObject::new();
        foreign.insert(
            "definition".to_string(),
            serde_json::Value::String(self.definition_name.clone()),
        );
        foreign.insert(
            "kind".to_string(),
            serde_json::Value::String(self.metadata.kind.clone()),
        );
        foreign.insert(
            "ownerId".to_string(),
            serde_json::Value::String(self.metadata.owner_id.clone()),
        );
        foreign.insert(
            "ownerUri".to_string(),
            serde_json::Value::String(self.metadata.owner_uri.clone()),
        );
        foreign.insert(
            "wkid".to_string(),
            serde_json::Value::from(self.geometry.wkid()),
        );

        geojson::Feature {
            bbox: None,
            geometry: self.geometry.to_geojson(),
            id: None,
            properties: Some(properties),
            foreign_members: Some(foreign),
        }
    }
}

/// Search parameters for one processor instance.
///
/// Resolved from the property store at configuration time and treated as
/// immutable afterwards; reconfiguration replaces the whole set.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParameters {
    /// GeoNames account identifier.
    pub username: String,
    /// Search radius in kilometers.
    pub radius_km: f64,
    /// Maximum number of features to return.
    pub max_rows: u32,
    /// Language code, for variants that fix one.
    pub language: Option<String>,
}

/// A destination an output channel can publish to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventDestination {
    /// Destination name, `"{instance id}:event"`.
    pub name: String,
}

impl EventDestination {
    /// Returns the event destination of a processor instance.
    #[must_use]
    pub fn for_instance(instance_id: &str) -> Self {
        Self {
            name: format!("{instance_id}:event"),
        }
    }
}

impl std::fmt::Display for EventDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_value_nan_serializes_as_null() {
        assert_eq!(FieldValue::Double(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(
            FieldValue::Double(0.12).to_json(),
            serde_json::json!(0.12)
        );
    }

    #[test]
    fn field_value_deserializes_untagged() {
        let text: FieldValue = serde_json::from_str("\"unavailable\"").unwrap();
        assert_eq!(text, FieldValue::Text(UNAVAILABLE.to_string()));
        let double: FieldValue = serde_json::from_str("1.5").unwrap();
        assert_eq!(double.field_type(), FieldType::Double);
    }

    #[test]
    fn field_type_round_trips_through_strum() {
        assert_eq!("double".parse::<FieldType>().unwrap(), FieldType::Double);
        assert_eq!(FieldType::Text.to_string(), "text");
    }

    #[test]
    fn point_geometry_dimensions() {
        let flat = PointGeometry::new_2d(-117.001, 34.001);
        assert!(!flat.is_3d());
        assert_eq!(flat.wkid(), WGS84_WKID);

        let raised = PointGeometry::new_3d(-117.0, 34.0, 120.0);
        assert_eq!(raised.z(), Some(120.0));

        assert!(PointGeometry::empty().is_empty());
        assert!(PointGeometry::empty().to_geojson().is_none());
        assert!(PointGeometry::new_2d(f64::INFINITY, 34.0).is_empty());
    }

    #[test]
    fn non_finite_elevation_is_not_written() {
        let point = PointGeometry::new_3d(1.0, 2.0, f64::NAN).to_geojson().unwrap();
        assert_eq!(point.value, geojson::Value::Point(vec![1.0, 2.0]));
    }

    #[test]
    fn builds_event_from_geojson_feature() {
        let feature: geojson::Feature = serde_json::from_value(serde_json::json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [-117.0, 34.0]},
            "properties": {
                "trackId": "T1",
                "timestamp": "2024-01-15T14:30:00Z",
                "type": "incident",
                "id": 42
            }
        }))
        .unwrap();

        let event = InputEvent::from_geojson_feature(feature).unwrap();
        assert_eq!(event.track_id, "T1");
        assert_eq!(event.event_type, INCIDENT_EVENT_TYPE);
        assert_eq!(event.id.as_deref(), Some("42"));
        assert_eq!(event.wkid, WGS84_WKID);
        assert_eq!(event.start_time.to_rfc3339(), "2024-01-15T14:30:00+00:00");
        assert!(matches!(event.geometry, Some(geo::Geometry::Point(_))));
    }

    #[test]
    fn rejects_feature_without_track_id() {
        let feature: geojson::Feature = serde_json::from_value(serde_json::json!({
            "type": "Feature",
            "geometry": null,
            "properties": {}
        }))
        .unwrap();
        assert!(matches!(
            InputEvent::from_geojson_feature(feature),
            Err(InputEventError::MissingProperty { name: "trackId" })
        ));
    }

    #[test]
    fn record_feature_carries_correlation_and_metadata() {
        let mut record = EnrichedRecord::new(
            "GeoNamesOSMPOI",
            vec![("name".to_string(), FieldValue::Text("Cafe".to_string()))],
            PointGeometry::new_2d(-117.001, 34.001),
        );
        record.correlation.track_id = "T1".to_string();

        let feature = record.to_geojson_feature();
        let properties = feature.properties.unwrap();
        assert_eq!(properties["trackId"], serde_json::json!("T1"));
        assert_eq!(properties["incidentId"], serde_json::json!(NO_INCIDENT));
        assert_eq!(properties["name"], serde_json::json!("Cafe"));
        assert_eq!(
            feature.foreign_members.unwrap()["kind"],
            serde_json::json!(RECORD_KIND)
        );
    }
}
