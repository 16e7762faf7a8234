//! Property store access and search parameter resolution.
//!
//! The host owns the property store; the processor only reads it through
//! [`PropertySource`], once at construction and again on explicit
//! reconfiguration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use geonames_enrichment_models::SearchParameters;

use crate::ConfigError;
use crate::variant_registry::{PropertyDefinition, PropertyType, VariantDescriptor};

/// Account used when no username is configured.
pub const DEFAULT_USERNAME: &str = "demo";

/// Environment variable overriding [`DEFAULT_USERNAME`].
pub const USERNAME_ENV: &str = "GEONAMES_USERNAME";

/// Property holding the HTTP request timeout in seconds (`0` disables it).
pub const REQUEST_TIMEOUT_PROPERTY: &str = "requestTimeoutSecs";

/// Request timeout used when [`REQUEST_TIMEOUT_PROPERTY`] is unset.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Read access to named, typed properties.
pub trait PropertySource {
    /// Returns the value of a property, if set.
    fn property(&self, name: &str) -> Option<toml::Value>;
}

impl PropertySource for toml::Table {
    fn property(&self, name: &str) -> Option<toml::Value> {
        self.get(name).cloned()
    }
}

impl PropertySource for BTreeMap<String, toml::Value> {
    fn property(&self, name: &str) -> Option<toml::Value> {
        self.get(name).cloned()
    }
}

/// HTTP settings for the remote fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    /// Overall request timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
        }
    }
}

/// Returns the account used when the username property is blank.
#[must_use]
pub fn default_username() -> String {
    std::env::var(USERNAME_ENV)
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_USERNAME.to_string())
}

/// Resolves a variant's search parameters from a property store.
///
/// Unset properties take the descriptor's defaults and a blank username
/// falls back to [`default_username`].
///
/// # Errors
///
/// Returns [`ConfigError`] if a property has the wrong type or the row
/// count is negative or too large.
pub fn resolve_parameters(
    descriptor: &VariantDescriptor,
    source: &dyn PropertySource,
) -> Result<SearchParameters, ConfigError> {
    let properties = &descriptor.properties;

    let username = resolve_string(&properties.username, source)?;
    let username = if username.trim().is_empty() {
        default_username()
    } else {
        username
    };

    let radius_km = resolve_double(&properties.radius, source)?;

    let rows = resolve_integer(&properties.max_rows, source)?;
    let max_rows = u32::try_from(rows).map_err(|_| ConfigError::OutOfRange {
        name: properties.max_rows.name.clone(),
        value: rows,
    })?;

    Ok(SearchParameters {
        username,
        radius_km,
        max_rows,
        language: descriptor.language.clone(),
    })
}

/// Resolves the fetcher's HTTP settings from a property store.
///
/// # Errors
///
/// Returns [`ConfigError`] if the timeout is not a non-negative integer.
pub fn resolve_fetch_settings(source: &dyn PropertySource) -> Result<FetchSettings, ConfigError> {
    let Some(value) = source.property(REQUEST_TIMEOUT_PROPERTY) else {
        return Ok(FetchSettings::default());
    };

    let secs = value
        .as_integer()
        .ok_or_else(|| ConfigError::InvalidProperty {
            name: REQUEST_TIMEOUT_PROPERTY.to_string(),
            expected: "integer",
        })?;
    let secs = u64::try_from(secs).map_err(|_| ConfigError::OutOfRange {
        name: REQUEST_TIMEOUT_PROPERTY.to_string(),
        value: secs,
    })?;

    Ok(FetchSettings {
        timeout: (secs > 0).then(|| Duration::from_secs(secs)),
    })
}

/// Loads the `[properties]` table of a TOML configuration file.
///
/// A file without a `[properties]` table yields an empty table.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read or is not TOML.
pub fn load_properties(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_properties(&contents)
}

/// Parses the `[properties]` table of a TOML document.
///
/// # Errors
///
/// Returns [`ConfigError`] if the document is not TOML or `properties` is
/// not a table.
pub fn parse_properties(toml_str: &str) -> Result<toml::Table, ConfigError> {
    let mut document: toml::Table = toml::de::from_str(toml_str)?;
    match document.remove("properties") {
        None => Ok(toml::Table::new()),
        Some(toml::Value::Table(properties)) => Ok(properties),
        Some(_) => Err(ConfigError::InvalidProperty {
            name: "properties".to_string(),
            expected: "table",
        }),
    }
}

fn lookup(definition: &PropertyDefinition, source: &dyn PropertySource) -> toml::Value {
    source
        .property(&definition.name)
        .unwrap_or_else(|| definition.default.clone())
}

fn invalid(definition: &PropertyDefinition) -> ConfigError {
    ConfigError::InvalidProperty {
        name: definition.name.clone(),
        expected: match definition.property_type {
            PropertyType::String => "string",
            PropertyType::Double => "number",
            PropertyType::Integer => "integer",
        },
    }
}

fn resolve_string(
    definition: &PropertyDefinition,
    source: &dyn PropertySource,
) -> Result<String, ConfigError> {
    match lookup(definition, source) {
        toml::Value::String(s) => Ok(s),
        _ => Err(invalid(definition)),
    }
}

fn resolve_double(
    definition: &PropertyDefinition,
    source: &dyn PropertySource,
) -> Result<f64, ConfigError> {
    let value = parse_double(definition, source)?;
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::OutOfRangeDouble {
            name: definition.name.clone(),
            value,
        });
    }
    Ok(value)
}

fn parse_double(
    definition: &PropertyDefinition,
    source: &dyn PropertySource,
) -> Result<f64, ConfigError> {
    match lookup(definition, source) {
        toml::Value::Float(f) => Ok(f),
        #[allow(clippy::cast_precision_loss)]
        toml::Value::Integer(i) => Ok(i as f64),
        toml::Value::String(s) => s.trim().parse().map_err(|_| invalid(definition)),
        _ => Err(invalid(definition)),
    }
}

fn resolve_integer(
    definition: &PropertyDefinition,
    source: &dyn PropertySource,
) -> Result<i64, ConfigError> {
    match lookup(definition, source) {
        toml::Value::Integer(i) => Ok(i),
        toml::Value::String(s) => s.trim().parse().map_err(|_| invalid(definition)),
        _ => Err(invalid(definition)),
    }
}
