//! HTTP client helper with native-tls support.

use std::time::Duration;
use ureq::Agent;
use ureq::tls::{RootCerts, TlsConfig, TlsProvider};

/// Maximum response body size for a version manifest (64 KB).
pub const MAX_MANIFEST_SIZE: u64 = 64 * 1024;

/// Query parameter appended to every probe URL so intermediaries cannot
/// answer from cache.
pub const CACHE_BUST_PARAM: &str = "_fresh";

/// Validate that a URL is usable as a probe target.
///
/// Enforces:
/// - `http` or `https` scheme (no file://, ftp, data:, etc.)
/// - a non-empty host
///
/// Returns the parsed URL, or an error string describing why it was rejected.
pub fn validate_probe_url(url: &str) -> Result<url::Url, String> {
    let parsed = url::Url::parse(url).map_err(|e| format!("Invalid URL '{}': {}", url, e))?;

    match parsed.scheme() {
        "https" | "http" => {}
        scheme => {
            return Err(format!(
                "Unsupported URL scheme '{}' for probe; only http and https are allowed. \
                 URL: {}",
                scheme, url
            ));
        }
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(format!("URL '{}' has no host", url));
    }

    Ok(parsed)
}

/// Append a cache-busting query parameter to `url`.
///
/// Any existing value for [`CACHE_BUST_PARAM`] is replaced; other query
/// parameters are preserved in order.
pub fn cache_busted(url: &url::Url, nonce: i64) -> url::Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != CACHE_BUST_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut busted = url.clone();
    {
        let mut pairs = busted.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(CACHE_BUST_PARAM, &nonce.to_string());
    }
    busted
}

/// Create a new HTTP agent configured with native-tls and a global timeout.
///
/// Non-2xx responses are returned as responses rather than errors so the
/// probe can classify them itself.
pub fn agent(timeout: Duration) -> Agent {
    let tls_config = TlsConfig::builder()
        .provider(TlsProvider::NativeTls)
        .root_certs(RootCerts::PlatformVerifier)
        .build();

    Agent::config_builder()
        .tls_config(tls_config)
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}
