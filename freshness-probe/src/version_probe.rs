//! Stale-build probing.
//!
//! A probe answers one question: is the build this client loaded older than
//! what the server currently serves? The HTTP implementation combines, in
//! order of strength:
//!
//! 1. an advisory nudge to a registered background worker (never decisive),
//! 2. a cache-bypassing HEAD request against the application entry resource,
//! 3. an optional version manifest compared against the loaded version.
//!
//! Probes never retry; cadence is the scheduler's business.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use semver::Version;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The loaded build is current.
    Fresh,
    /// A newer build is served, or the entry resource is gone.
    Stale,
}

impl Verdict {
    /// Collapse a probe outcome into a verdict.
    ///
    /// With `errors_as_stale` a failed probe prompts a refresh; otherwise it is
    /// treated as no news.
    pub fn from_outcome(outcome: &Result<Verdict, ProbeError>, errors_as_stale: bool) -> Self {
        match outcome {
            Ok(verdict) => *verdict,
            Err(_) if errors_as_stale => Verdict::Stale,
            Err(_) => Verdict::Fresh,
        }
    }

    pub fn is_stale(self) -> bool {
        self == Verdict::Stale
    }
}

/// Failure modes of a probe attempt.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid probe URL: {0}")]
    InvalidUrl(String),

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("version manifest at {url} is unreadable: {message}")]
    Manifest { url: String, message: String },

    #[error("failed to parse version '{value}': {source}")]
    Version {
        value: String,
        #[source]
        source: semver::Error,
    },

    #[error("probe exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("probe task failed: {0}")]
    Aborted(String),
}

/// A background worker able to re-check for a new version of itself.
///
/// Purely advisory: the probe nudges it and moves on regardless of outcome.
pub trait UpdateWorker: Send + Sync {
    fn request_update_check(&self) -> Result<(), String>;
}

/// Decides whether the loaded build is stale.
///
/// Implementations are blocking; callers run them off the event loop and
/// guarantee that at most one call is in flight.
pub trait VersionProbe: Send + Sync {
    fn probe(&self) -> Result<Verdict, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct VersionManifest {
    version: String,
}

/// Compare the loaded version with the served one.
///
/// A leading `v` is accepted on either side. Only a strictly newer served
/// version is stale; a rollback is not.
pub fn compare_versions(current: &str, served: &str) -> Result<Verdict, ProbeError> {
    let parse = |raw: &str| {
        let trimmed = raw.trim();
        let stripped = trimmed.strip_prefix('v').unwrap_or(trimmed);
        Version::parse(stripped).map_err(|source| ProbeError::Version {
            value: raw.to_string(),
            source,
        })
    };

    let current = parse(current)?;
    let served = parse(served)?;
    Ok(if served > current {
        Verdict::Stale
    } else {
        Verdict::Fresh
    })
}

/// HTTP-backed probe.
pub struct HttpVersionProbe {
    entry_url: url::Url,
    manifest_url: Option<url::Url>,
    current_version: Option<String>,
    worker: Option<Arc<dyn UpdateWorker>>,
    agent: ureq::Agent,
    /// Time of the last probe attempt, success or failure.
    last_attempt: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for HttpVersionProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpVersionProbe")
            .field("entry_url", &self.entry_url.as_str())
            .field("manifest_url", &self.manifest_url.as_ref().map(url::Url::as_str))
            .field("current_version", &self.current_version)
            .field("has_worker", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpVersionProbe {
    /// Create a probe against `entry_url` with a per-request deadline.
    pub fn new(entry_url: &str, timeout: Duration) -> Result<Self, ProbeError> {
        let entry_url = crate::http::validate_probe_url(entry_url).map_err(ProbeError::InvalidUrl)?;
        Ok(Self {
            entry_url,
            manifest_url: None,
            current_version: None,
            worker: None,
            agent: crate::http::agent(timeout),
            last_attempt: Mutex::new(None),
        })
    }

    /// Additionally compare `current_version` against the manifest at `url`.
    pub fn with_manifest(mut self, url: &str, current_version: &str) -> Result<Self, ProbeError> {
        let manifest_url = crate::http::validate_probe_url(url).map_err(ProbeError::InvalidUrl)?;
        // Fail at construction rather than on every probe.
        compare_versions(current_version, current_version)?;
        self.manifest_url = Some(manifest_url);
        self.current_version = Some(current_version.to_string());
        Ok(self)
    }

    /// Register the advisory background worker.
    pub fn with_worker(mut self, worker: Arc<dyn UpdateWorker>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Time of the last probe attempt, if any.
    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        *self.last_attempt.lock()
    }

    fn nudge_worker(&self) {
        let Some(worker) = &self.worker else {
            return;
        };
        if let Err(e) = worker.request_update_check() {
            log::debug!("Background worker update check failed: {}", e);
        }
    }

    fn check_entry(&self, nonce: i64) -> Result<Verdict, ProbeError> {
        let url = crate::http::cache_busted(&self.entry_url, nonce);
        let response = self
            .agent
            .head(url.as_str())
            .header("Cache-Control", "no-cache, no-store")
            .header("Pragma", "no-cache")
            .call()
            .map_err(|e| ProbeError::Request {
                url: self.entry_url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(Verdict::Fresh)
        } else {
            log::info!(
                "Entry resource {} answered {}; treating build as stale",
                self.entry_url,
                status.as_u16()
            );
            Ok(Verdict::Stale)
        }
    }

    fn check_manifest(
        &self,
        manifest_url: &url::Url,
        current_version: &str,
        nonce: i64,
    ) -> Result<Verdict, ProbeError> {
        let url = crate::http::cache_busted(manifest_url, nonce);
        let manifest_err = |message: String| ProbeError::Manifest {
            url: manifest_url.to_string(),
            message,
        };

        let response = self
            .agent
            .get(url.as_str())
            .header("Cache-Control", "no-cache, no-store")
            .header("Accept", "application/json")
            .call()
            .map_err(|e| ProbeError::Request {
                url: manifest_url.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(manifest_err(format!("HTTP {}", response.status().as_u16())));
        }

        let body = response
            .into_body()
            .with_config()
            .limit(crate::http::MAX_MANIFEST_SIZE)
            .read_to_string()
            .map_err(|e| manifest_err(format!("failed to read body: {}", e)))?;

        let manifest: VersionManifest = serde_json::from_str(&body)
            .map_err(|e| manifest_err(format!("failed to parse JSON: {}", e)))?;

        let verdict = compare_versions(current_version, &manifest.version)?;
        if verdict.is_stale() {
            log::info!(
                "Server build {} is newer than loaded build {}",
                manifest.version,
                current_version
            );
        }
        Ok(verdict)
    }
}

impl VersionProbe for HttpVersionProbe {
    fn probe(&self) -> Result<Verdict, ProbeError> {
        let now = Utc::now();
        *self.last_attempt.lock() = Some(now);

        self.nudge_worker();

        let nonce = now.timestamp_millis();
        if self.check_entry(nonce)?.is_stale() {
            return Ok(Verdict::Stale);
        }

        match (&self.manifest_url, &self.current_version) {
            (Some(manifest_url), Some(current)) => self.check_manifest(manifest_url, current, nonce),
            _ => Ok(Verdict::Fresh),
        }
    }
}
