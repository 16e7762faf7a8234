#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Enrichment of located events with nearby GeoNames features.
//!
//! For every incoming [`InputEvent`](geonames_enrichment_models::InputEvent)
//! the [`processor::Processor`] runs the same pipeline:
//!
//! 1. **Query** ([`query`]): builds the request URL from the event's
//!    point and the instance's search parameters.
//! 2. **Fetch** ([`fetch`]): one blocking HTTP GET, no retries.
//! 3. **Decode** ([`decode`]): reads the feature array and maps each
//!    feature through the variant's field table, substituting fallbacks
//!    field by field.
//! 4. **Emit** ([`emit`]): stamps correlation and ownership data on each
//!    record and publishes it to the [`sink::OutputSink`].
//!
//! The two supported variants (OpenStreetMap POIs and Wikipedia articles)
//! differ only in their [`variant_registry::VariantDescriptor`], which is
//! loaded from TOML files in `variants/`.
//!
//! Failures of a single event are logged and reported, never propagated to
//! the host.

pub mod config;
pub mod decode;
pub mod emit;
pub mod fetch;
pub mod processor;
pub mod query;
pub mod sink;
pub mod variant_registry;

use thiserror::Error;

/// Errors from the remote GeoNames service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service answered with a status other than 200.
    #[error("HTTP error code {status} from {url}")]
    Status {
        /// Status code returned by the service.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The request never completed (DNS, connection, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Errors that invalidate a whole response.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body is not well-formed JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The expected feature array is absent.
    #[error("Response has no '{key}' feature array")]
    MissingArray {
        /// Expected array key (e.g. `"poi"`).
        key: String,
    },
}

/// The input event cannot be located.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// The event has no geometry at all.
    #[error("Event {track_id} has no geometry")]
    Missing {
        /// Track id of the offending event.
        track_id: String,
    },

    /// The event geometry is not a point.
    #[error("Event {track_id} geometry is not a point")]
    NotAPoint {
        /// Track id of the offending event.
        track_id: String,
    },
}

/// The output channel refused a record.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The channel has been disconnected.
    #[error("Destination {destination} is disconnected")]
    Disconnected {
        /// Destination name.
        destination: String,
    },

    /// The channel rejected the record.
    #[error("Record rejected: {message}")]
    Rejected {
        /// Reason given by the channel.
        message: String,
    },

    /// Writing the record failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing the record failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors resolving processor configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A property holds a value of the wrong type.
    #[error("Property '{name}' must be a {expected}")]
    InvalidProperty {
        /// Property name.
        name: String,
        /// Expected type.
        expected: &'static str,
    },

    /// A numeric property is out of range.
    #[error("Property '{name}' is out of range: {value}")]
    OutOfRange {
        /// Property name.
        name: String,
        /// Rejected value.
        value: i64,
    },

    /// A numeric property is negative or not finite.
    #[error("Property '{name}' is out of range: {value}")]
    OutOfRangeDouble {
        /// Property name.
        name: String,
        /// Rejected value.
        value: f64,
    },

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file is not valid TOML.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A failure that ends one event's enrichment without output.
#[derive(Debug, Error)]
pub enum EnrichError {
    /// The event could not be located.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The remote call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The response could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
