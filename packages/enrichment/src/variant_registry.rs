//! Compile-time registry of enrichment variants.
//!
//! Each variant is defined in a TOML file under `variants/`: its endpoint,
//! feature array key, configurable properties and the ordered field table
//! the decoder walks. Adding an output field is a change to that table,
//! not to the decoder.

use std::collections::BTreeSet;

use geonames_enrichment_models::{FieldType, FieldValue, UNAVAILABLE};
use reqwest::Url;
use serde::{Deserialize, Deserializer};
use strum_macros::{Display, EnumString};

/// Errors from parsing a variant descriptor.
#[derive(Debug, thiserror::Error)]
pub enum VariantError {
    /// The TOML is malformed or missing required keys.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A field's declared fallback does not match its type.
    #[error("Field '{field}' declares a fallback that is not a {expected}")]
    FallbackType {
        /// Field name.
        field: String,
        /// Declared field type.
        expected: FieldType,
    },

    /// Two fields share an output name.
    #[error("Field '{field}' is declared more than once")]
    DuplicateField {
        /// Field name.
        field: String,
    },

    /// A property default does not match its declared type.
    #[error("Property '{name}' default is not a {expected}")]
    PropertyDefault {
        /// Property name.
        name: String,
        /// Declared property type.
        expected: PropertyType,
    },
}

/// The built-in enrichment variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Variant {
    /// Nearby `OpenStreetMap` points of interest.
    OsmPoi,
    /// Nearby georeferenced Wikipedia articles.
    Wikipedia,
}

impl Variant {
    /// Every built-in variant.
    pub const ALL: &[Self] = &[Self::OsmPoi, Self::Wikipedia];

    const fn toml(self) -> &'static str {
        match self {
            Self::OsmPoi => include_str!("../variants/osm_poi.toml"),
            Self::Wikipedia => include_str!("../variants/wikipedia.toml"),
        }
    }

    /// Returns this variant's descriptor.
    ///
    /// # Panics
    ///
    /// Panics if the embedded TOML is malformed (the descriptors are
    /// compiled in and covered by tests).
    #[must_use]
    pub fn descriptor(self) -> VariantDescriptor {
        parse_variant_toml(self.toml())
            .unwrap_or_else(|e| panic!("Failed to parse variant '{self}': {e}"))
    }
}

/// What to substitute when a field cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// `"unavailable"` for text, `NaN` for doubles.
    Sentinel,
    /// Empty string for text, `0.0` for doubles.
    ZeroValue,
}

impl FallbackPolicy {
    /// Returns the fallback for a field type under this policy.
    #[must_use]
    pub fn fallback_for(self, field_type: FieldType) -> FieldValue {
        match (self, field_type) {
            (Self::Sentinel, FieldType::Text) => FieldValue::Text(UNAVAILABLE.to_string()),
            (Self::Sentinel, FieldType::Double) => FieldValue::Double(f64::NAN),
            (Self::ZeroValue, FieldType::Text) => FieldValue::Text(String::new()),
            (Self::ZeroValue, FieldType::Double) => FieldValue::Double(0.0),
        }
    }
}

/// Declared type of a configurable property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PropertyType {
    /// Text property.
    String,
    /// Floating-point property.
    Double,
    /// Integer property.
    Integer,
}

/// A property the host can set on a processor instance.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDefinition {
    /// Property name in the host's property store.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    /// Value used when the property is not set.
    pub default: toml::Value,
    /// Short label.
    pub label: String,
    /// Longer help text.
    pub description: String,
}

/// The search properties every variant exposes.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDefinitions {
    /// Account identifier.
    pub username: PropertyDefinition,
    /// Search radius in kilometers.
    pub radius: PropertyDefinition,
    /// Maximum number of features.
    pub max_rows: PropertyDefinition,
}

impl PropertyDefinitions {
    /// Iterates the definitions in display order.
    pub fn iter(&self) -> impl Iterator<Item = &PropertyDefinition> {
        [&self.username, &self.radius, &self.max_rows].into_iter()
    }
}

/// One row of a variant's field table.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    /// Output field name.
    pub name: String,
    /// Remote key, when it differs from the output name.
    #[serde(default)]
    pub key: Option<String>,
    /// Declared output type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Field-specific fallback overriding the variant policy.
    #[serde(default)]
    pub fallback: Option<FieldValue>,
}

impl FieldSpec {
    /// Key to read from the remote feature.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.name)
    }

    /// Value to use when decoding fails.
    #[must_use]
    pub fn fallback(&self, policy: FallbackPolicy) -> FieldValue {
        self.fallback
            .clone()
            .unwrap_or_else(|| policy.fallback_for(self.field_type))
    }
}

/// Remote keys used to build a feature's point geometry.
#[derive(Debug, Clone, Deserialize)]
pub struct GeometrySpec {
    /// Longitude key.
    pub lng: String,
    /// Latitude key.
    pub lat: String,
    /// Elevation key; when present and parsable the point is 3D.
    #[serde(default)]
    pub elevation: Option<String>,
}

/// Everything that distinguishes one enrichment variant from another.
#[derive(Debug, Clone, Deserialize)]
pub struct VariantDescriptor {
    /// Unique identifier (e.g., `"osm_poi"`).
    pub id: String,
    /// Processor name (e.g., `"GeoNamesOSMPOIProcessor"`).
    pub name: String,
    /// Name of the output record definition.
    pub definition_name: String,
    /// Processor domain.
    pub domain: String,
    /// Processor version.
    pub version: String,
    /// Human-readable label.
    pub label: String,
    /// Human-readable description.
    pub description: String,
    /// Fixed remote endpoint.
    #[serde(deserialize_with = "deserialize_url")]
    pub endpoint: Url,
    /// Key of the feature array in the response.
    pub array_key: String,
    /// Fixed language code sent with every query.
    #[serde(default)]
    pub language: Option<String>,
    /// Default fallback policy for undecodable fields.
    pub fallback_policy: FallbackPolicy,
    /// Configurable search properties.
    pub properties: PropertyDefinitions,
    /// Ordered output field table.
    pub fields: Vec<FieldSpec>,
    /// Geometry keys.
    pub geometry: GeometrySpec,
}

impl VariantDescriptor {
    /// URI of the processor definition, `"{domain}/{version}"`.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("{}/{}", self.domain, self.version)
    }

    fn validate(&self) -> Result<(), VariantError> {
        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(VariantError::DuplicateField {
                    field: field.name.clone(),
                });
            }
            if let Some(fallback) = &field.fallback
                && fallback.field_type() != field.field_type
            {
                return Err(VariantError::FallbackType {
                    field: field.name.clone(),
                    expected: field.field_type,
                });
            }
        }

        for property in self.properties.iter() {
            let matches = match property.property_type {
                PropertyType::String => property.default.is_str(),
                PropertyType::Double => property.default.is_float() || property.default.is_integer(),
                PropertyType::Integer => property.default.is_integer(),
            };
            if !matches {
                return Err(VariantError::PropertyDefault {
                    name: property.name.clone(),
                    expected: property.property_type,
                });
            }
        }

        Ok(())
    }
}

fn deserialize_url<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Url, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Url::parse(&raw).map_err(serde::de::Error::custom)
}

/// Parses and validates a [`VariantDescriptor`] from a TOML string.
///
/// # Errors
///
/// Returns [`VariantError`] if the TOML is malformed, the endpoint is not a
/// URL, or the field table or property defaults are inconsistent.
pub fn parse_variant_toml(toml_str: &str) -> Result<VariantDescriptor, VariantError> {
    let descriptor: VariantDescriptor = toml::de::from_str(toml_str)?;
    descriptor.validate()?;
    Ok(descriptor)
}

/// Returns the descriptors of every built-in variant.
#[must_use]
pub fn all_variants() -> Vec<VariantDescriptor> {
    Variant::ALL.iter().map(|v| v.descriptor()).collect()
}
