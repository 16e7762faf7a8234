//! Feature decoding driven by a variant's field table.
//!
//! Only the array lookup can fail the whole response. Each field of each
//! feature is read independently; a missing or malformed value is logged
//! at trace level and replaced by the field's fallback, so one bad
//! attribute never costs the rest of the feature.

use geonames_enrichment_models::{EnrichedRecord, FieldType, FieldValue, PointGeometry};
use serde_json::Value;

use crate::DecodeError;
use crate::variant_registry::{GeometrySpec, VariantDescriptor};

/// Why a single field fell back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldDecodeError {
    /// The key is absent or `null`.
    #[error("'{key}' is missing")]
    Missing {
        /// Remote key.
        key: String,
    },

    /// The value has a JSON type that cannot represent the field.
    #[error("'{key}' is not representable as {expected}")]
    WrongType {
        /// Remote key.
        key: String,
        /// Declared field type.
        expected: FieldType,
    },

    /// The value is a string that does not parse as a number.
    #[error("'{key}' value '{value}' is not a number")]
    Unparseable {
        /// Remote key.
        key: String,
        /// The offending string.
        value: String,
    },
}

/// Decodes a response body into one record per feature.
///
/// # Errors
///
/// Returns [`DecodeError`] if the body is not JSON or lacks the variant's
/// feature array.
pub fn decode(text: &str, descriptor: &VariantDescriptor) -> Result<Vec<EnrichedRecord>, DecodeError> {
    let body: Value = serde_json::from_str(text)?;

    let features = body
        .get(&descriptor.array_key)
        .and_then(Value::as_array)
        .ok_or_else(|| DecodeError::MissingArray {
            key: descriptor.array_key.clone(),
        })?;

    Ok(features
        .iter()
        .map(|feature| decode_feature(feature, descriptor))
        .collect())
}

/// Decodes a single feature. Never fails.
#[must_use]
pub fn decode_feature(feature: &Value, descriptor: &VariantDescriptor) -> EnrichedRecord {
    if !feature.is_object() {
        log::debug!(
            "{}: feature is not an object, every field falls back",
            descriptor.definition_name
        );
    }

    let fields = descriptor
        .fields
        .iter()
        .map(|spec| {
            let value = read_field(feature, spec.key(), spec.field_type).unwrap_or_else(|e| {
                log::trace!("{}: {e}, using fallback", descriptor.definition_name);
                spec.fallback(descriptor.fallback_policy)
            });
            (spec.name.clone(), value)
        })
        .collect();

    EnrichedRecord::new(
        descriptor.definition_name.as_str(),
        fields,
        decode_geometry(feature, &descriptor.geometry),
    )
}

/// Builds a feature's point: 3D when the elevation parses to a finite
/// number, else 2D, and empty when either planar coordinate is unusable.
#[must_use]
pub fn decode_geometry(feature: &Value, spec: &GeometrySpec) -> PointGeometry {
    let finite = |key: &str| read_double(feature, key).ok().filter(|v| v.is_finite());

    let (Some(x), Some(y)) = (finite(&spec.lng), finite(&spec.lat)) else {
        return PointGeometry::empty();
    };

    match spec.elevation.as_deref().and_then(finite) {
        Some(z) => PointGeometry::new_3d(x, y, z),
        None => PointGeometry::new_2d(x, y),
    }
}

/// Reads one field with the declared conversion.
///
/// # Errors
///
/// Returns [`FieldDecodeError`] describing why the value is unusable.
pub fn read_field(
    feature: &Value,
    key: &str,
    field_type: FieldType,
) -> Result<FieldValue, FieldDecodeError> {
    match field_type {
        FieldType::Text => read_text(feature, key).map(FieldValue::Text),
        FieldType::Double => read_double(feature, key).map(FieldValue::Double),
    }
}

fn present<'a>(feature: &'a Value, key: &str) -> Result<&'a Value, FieldDecodeError> {
    match feature.get(key) {
        None | Some(Value::Null) => Err(FieldDecodeError::Missing {
            key: key.to_string(),
        }),
        Some(value) => Ok(value),
    }
}

fn read_text(feature: &Value, key: &str) -> Result<String, FieldDecodeError> {
    match present(feature, key)? {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(FieldDecodeError::WrongType {
            key: key.to_string(),
            expected: FieldType::Text,
        }),
    }
}

fn read_double(feature: &Value, key: &str) -> Result<f64, FieldDecodeError> {
    match present(feature, key)? {
        Value::Number(n) => n.as_f64().ok_or_else(|| FieldDecodeError::WrongType {
            key: key.to_string(),
            expected: FieldType::Double,
        }),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| FieldDecodeError::Unparseable {
                key: key.to_string(),
                value: s.clone(),
            }),
        _ => Err(FieldDecodeError::WrongType {
            key: key.to_string(),
            expected: FieldType::Double,
        }),
    }
}
