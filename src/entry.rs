use std::time::{Duration, SystemTime};

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::age::normalize_last_modified;
use crate::headers::HeaderView;

/// A stored response. Immutable once written; freshening writes a whole
/// new record under the same `id`, and `invalidated` is the only bit ever
/// flipped in place.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Stable across freshenings of the same resource; the blob key embeds
    /// it, so a freshened record keeps pointing at the original body.
    pub id: String,
    pub response_time: SystemTime,
    pub last_modified: Option<SystemTime>,
    pub etag: Option<String>,
    /// Request header name mapped to the request's value at storage time;
    /// `None` records that the request did not carry the header.
    pub vary: Vec<(String, Option<String>)>,
    pub method: Method,
    pub status: StatusCode,
    pub corrected_initial_age: Duration,
    pub lifetime: Duration,
    pub must_revalidate_when_stale: bool,
    pub shared_must_revalidate_when_stale: bool,
    pub always_revalidate: bool,
    pub response_headers: Vec<(String, String)>,
    pub invalidated: bool,
}

/// Wire form of a [`CacheEntry`] as handed to the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub id: String,
    pub response_time_ms: u64,
    pub last_modified_ms: Option<u64>,
    pub etag: Option<String>,
    pub vary: Vec<(String, Option<String>)>,
    pub method: String,
    pub status: u16,
    pub corrected_initial_age_ms: u64,
    pub lifetime_ms: u64,
    pub must_revalidate_when_stale: bool,
    pub shared_must_revalidate_when_stale: bool,
    pub always_revalidate: bool,
    pub response_headers: Vec<(String, String)>,
    pub invalidated: bool,
}

fn epoch_ms(instant: SystemTime) -> u64 {
    instant
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

fn from_epoch_ms(ms: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(ms)
}

impl CacheEntry {
    pub fn to_persisted(&self) -> PersistedEntry {
        PersistedEntry {
            id: self.id.clone(),
            response_time_ms: epoch_ms(self.response_time),
            last_modified_ms: self.last_modified.map(epoch_ms),
            etag: self.etag.clone(),
            vary: self.vary.clone(),
            method: self.method.to_string(),
            status: self.status.as_u16(),
            corrected_initial_age_ms: self.corrected_initial_age.as_millis() as u64,
            lifetime_ms: self.lifetime.as_millis() as u64,
            must_revalidate_when_stale: self.must_revalidate_when_stale,
            shared_must_revalidate_when_stale: self.shared_must_revalidate_when_stale,
            always_revalidate: self.always_revalidate,
            response_headers: self.response_headers.clone(),
            invalidated: self.invalidated,
        }
    }

    pub fn from_persisted(persisted: &PersistedEntry) -> Self {
        Self {
            id: persisted.id.clone(),
            response_time: from_epoch_ms(persisted.response_time_ms),
            last_modified: persisted.last_modified_ms.map(from_epoch_ms),
            etag: persisted.etag.clone(),
            vary: persisted.vary.clone(),
            method: Method::from_bytes(persisted.method.as_bytes()).unwrap_or(Method::GET),
            status: StatusCode::from_u16(persisted.status).unwrap_or(StatusCode::OK),
            corrected_initial_age: Duration::from_millis(persisted.corrected_initial_age_ms),
            lifetime: Duration::from_millis(persisted.lifetime_ms),
            must_revalidate_when_stale: persisted.must_revalidate_when_stale,
            shared_must_revalidate_when_stale: persisted.shared_must_revalidate_when_stale,
            always_revalidate: persisted.always_revalidate,
            response_headers: persisted.response_headers.clone(),
            invalidated: persisted.invalidated,
        }
    }

    pub fn stored_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(stored, _)| stored.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

const ECHO_HEADERS: [&str; 4] = [
    "content-length",
    "content-type",
    "content-language",
    "content-encoding",
];

/// Exact-validator comparison used by the freshening path. Every validator
/// the incoming response carries must match the stored entry byte for
/// byte; validators the incoming response omits are not consulted. This is
/// deliberately stricter than RFC 9111 §4.3.4.
pub fn validators_match(entry: &CacheEntry, incoming: &HeaderView) -> bool {
    if let Some(etag) = incoming.get("etag")
        && entry.etag.as_deref() != Some(etag)
    {
        return false;
    }
    if incoming.has("last-modified")
        && normalize_last_modified(incoming) != entry.last_modified
    {
        return false;
    }
    for name in ECHO_HEADERS {
        if let Some(value) = incoming.get(name)
            && entry.stored_header(name) != Some(value)
        {
            return false;
        }
    }
    true
}
