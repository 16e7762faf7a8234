//! Request URL construction for the GeoNames nearby-search endpoints.
//!
//! See <https://www.geonames.org/export/web-services.html>

use geonames_enrichment_models::SearchParameters;
use reqwest::Url;

/// Builds the request URL for a point and a parameter set.
///
/// Parameters are form-encoded in the order `lat`, `lng`, `username`,
/// `lang` (when fixed by the variant), `radius`, `maxRows`. Coordinates
/// are passed through unvalidated.
#[must_use]
pub fn build_query(endpoint: &Url, point: geo::Point<f64>, params: &SearchParameters) -> Url {
    let mut url = endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("lat", &point.y().to_string())
            .append_pair("lng", &point.x().to_string())
            .append_pair("username", &params.username);
        if let Some(lang) = &params.language {
            query.append_pair("lang", lang);
        }
        query
            .append_pair("radius", &params.radius_km.to_string())
            .append_pair("maxRows", &params.max_rows.to_string());
    }
    url
}
