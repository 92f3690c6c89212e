//! Shared HTTP client construction for backend collaborators.

use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::error::{GateError, Result};

/// Creates a pooled HTTP client.
///
/// Configuration:
/// - Connection timeout: 10 seconds
/// - Total timeout: `timeout`
/// - Connection pool: max 10 idle connections per host
///
/// # Errors
///
/// Returns error if client configuration fails.
pub fn create_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .pool_max_idle_per_host(10)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .build()
        .map_err(GateError::HttpError)
}

/// Parses a base URL and guarantees a trailing slash so that relative
/// paths join beneath it.
///
/// # Errors
///
/// Returns [`GateError::Config`] for unparsable or non-HTTP(S) URLs.
pub fn base_url(raw: &str) -> Result<Url> {
    let mut url =
        Url::parse(raw).map_err(|e| GateError::Config(format!("invalid URL '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GateError::Config(format!("URL '{raw}' must use http or https")));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Joins a relative path onto a base from [`base_url`].
///
/// # Errors
///
/// Returns [`GateError::Config`] if the path cannot be joined.
pub fn endpoint(base: &Url, path: &str) -> Result<Url> {
    base.join(path).map_err(|e| GateError::Config(format!("invalid endpoint '{path}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_adds_trailing_slash() {
        let url = base_url("https://abc.supabase.co").unwrap();
        assert_eq!(url.as_str(), "https://abc.supabase.co/");

        let url = base_url("http://127.0.0.1:9000/prefix").unwrap();
        assert_eq!(
            endpoint(&url, "rest/v1/profiles").unwrap().as_str(),
            "http://127.0.0.1:9000/prefix/rest/v1/profiles"
        );
    }

    #[test]
    fn test_base_url_rejects_other_schemes() {
        assert!(matches!(base_url("ftp://example.com"), Err(GateError::Config(_))));
        assert!(matches!(base_url("not a url"), Err(GateError::Config(_))));
    }

    #[test]
    fn test_create_http_client() {
        assert!(create_http_client(Duration::from_secs(5)).is_ok());
    }
}
