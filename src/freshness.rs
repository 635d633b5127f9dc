//! Decides whether a cached dataset needs to be fetched again.
//!
//! A cheap HEAD request is compared against the validators stored with the
//! local copy. When the server sends no validators the payload is fetched and
//! hashed instead. Anything that goes wrong along the way counts as stale.

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::download::{HttpResponse, HttpSource};

/// Stored next to every persisted table and replaced on each successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchMetadata {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub fetch_timestamp: DateTime<Utc>,
    pub content_length: u64,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub synthetic: bool,
    /// Request parameters that shaped the saved table, e.g. a year window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl FetchMetadata {
    pub fn from_response(source: &str, response: &HttpResponse) -> Self {
        FetchMetadata {
            last_modified: response.validators.last_modified.clone(),
            etag: response.validators.etag.clone(),
            fetch_timestamp: Utc::now(),
            content_length: response.body.len() as u64,
            content_hash: Some(content_hash(&response.body)),
            source: Some(source.to_string()),
            synthetic: false,
            query: None,
        }
    }
}

/// SHA-256 of the payload. JSON payloads are hashed in a key-sorted form so
/// that reordered objects hash the same; anything else is hashed raw.
pub fn content_hash(body: &[u8]) -> String {
    let canonical = match serde_json::from_slice::<JsonValue>(body) {
        Ok(value) => serde_json::to_vec(&canonicalize(value)).unwrap_or_else(|_| body.to_vec()),
        Err(_) => body.to_vec(),
    };
    format!("{:x}", Sha256::digest(&canonical))
}

fn canonicalize(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let sorted: BTreeMap<String, JsonValue> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            JsonValue::Object(sorted.into_iter().collect())
        }
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// What is on disk for a dataset.
#[derive(Debug, Clone, Default)]
pub struct LocalState {
    pub data_present: bool,
    pub metadata: Option<FetchMetadata>,
}

#[derive(Debug, Clone)]
pub enum Freshness {
    UpToDate {
        reason: String,
    },
    NeedsUpdate {
        reason: String,
        /// Payload downloaded while checking, ready to be reused.
        prefetched: Option<HttpResponse>,
    },
}

impl Freshness {
    fn stale(reason: impl Into<String>) -> Self {
        Freshness::NeedsUpdate {
            reason: reason.into(),
            prefetched: None,
        }
    }

    pub fn needs_update(&self) -> bool {
        matches!(self, Freshness::NeedsUpdate { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Freshness::UpToDate { reason } | Freshness::NeedsUpdate { reason, .. } => reason,
        }
    }
}

/// Never fails: errors degrade to `NeedsUpdate`.
pub async fn check<S>(
    source: &S,
    url: &str,
    headers: &HeaderMap,
    timeout: Duration,
    local: &LocalState,
) -> Freshness
where
    S: HttpSource + ?Sized,
{
    let decision = decide(source, url, headers, timeout, local).await;
    info!(
        needs_update = decision.needs_update(),
        reason = decision.reason(),
        "freshness of {}",
        url
    );
    decision
}

async fn decide<S>(
    source: &S,
    url: &str,
    headers: &HeaderMap,
    timeout: Duration,
    local: &LocalState,
) -> Freshness
where
    S: HttpSource + ?Sized,
{
    if !local.data_present {
        return Freshness::stale("no local data");
    }
    let stored = local.metadata.clone().unwrap_or_default();

    let remote = match source.head(url, headers, timeout).await {
        Ok(response) if response.is_success() => response.validators,
        Ok(response) => {
            return Freshness::stale(format!(
                "unable to verify: HEAD returned HTTP {}",
                response.status
            ))
        }
        Err(e) => return Freshness::stale(format!("unable to verify: {e}")),
    };

    if let Some(remote_modified) = &remote.last_modified {
        if stored.last_modified.as_ref() != Some(remote_modified) {
            return Freshness::stale(format!(
                "Last-Modified changed (local {}, remote {remote_modified})",
                stored.last_modified.as_deref().unwrap_or("none")
            ));
        }
    }

    if let Some(remote_etag) = &remote.etag {
        if stored.etag.as_ref() != Some(remote_etag) {
            return Freshness::stale(format!(
                "ETag mismatch (local {}, remote {remote_etag})",
                stored.etag.as_deref().unwrap_or("none")
            ));
        }
    }

    if !remote.is_empty() {
        return Freshness::UpToDate {
            reason: "validators unchanged".to_string(),
        };
    }

    // No validators: only the content itself can tell
    let response = match source.get(url, headers, timeout).await {
        Ok(response) if response.is_success() => response,
        Ok(response) => {
            return Freshness::stale(format!(
                "unable to verify: GET returned HTTP {}",
                response.status
            ))
        }
        Err(e) => return Freshness::stale(format!("unable to verify: {e}")),
    };

    let remote_hash = content_hash(&response.body);
    match stored.content_hash {
        Some(hash) if hash == remote_hash => Freshness::UpToDate {
            reason: "content hash unchanged".to_string(),
        },
        Some(_) => Freshness::NeedsUpdate {
            reason: "content hash changed".to_string(),
            prefetched: Some(response),
        },
        None => Freshness::NeedsUpdate {
            reason: "no stored content hash".to_string(),
            prefetched: Some(response),
        },
    }
}

// -- Tests -------------------------------------------------------------------
