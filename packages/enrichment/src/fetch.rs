//! Remote feature service access.
//!
//! [`HttpFeatureService`] issues exactly one blocking GET per call. There
//! is no retry, caching or rate limiting; the only latency bound is the
//! configurable request timeout in [`FetchSettings`].

use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};

use crate::RemoteError;
use crate::config::FetchSettings;

/// A source of raw feature-list responses.
pub trait FeatureService: Send + Sync {
    /// Fetches the response body for a fully formed request URL.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport failure or a non-200 status.
    fn fetch(&self, url: &Url) -> Result<String, RemoteError>;
}

/// [`FeatureService`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFeatureService {
    client: reqwest::blocking::Client,
}

impl HttpFeatureService {
    /// Creates a service with the given HTTP settings.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] if the HTTP client cannot be built (e.g. the
    /// TLS backend fails to initialize).
    pub fn new(settings: &FetchSettings) -> Result<Self, RemoteError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl FeatureService for HttpFeatureService {
    fn fetch(&self, url: &Url) -> Result<String, RemoteError> {
        log::debug!("GET {}", redacted(url));

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                url: redacted(url),
            });
        }

        Ok(response.text().map_err(reqwest::Error::without_url)?)
    }
}

/// Renders a request URL without its account identifier.
#[must_use]
pub fn redacted(url: &Url) -> String {
    let mut clean = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "username")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    clean.set_query(None);
    if !pairs.is_empty() {
        clean.query_pairs_mut().extend_pairs(pairs);
    }
    clean.to_string()
}
