use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tracing::{debug, trace};

use crate::age::{age_header_value, current_age, format_http_date};
use crate::cache::HttpCache;
use crate::cache_control::Directives;
use crate::entry::CacheEntry;
use crate::headers::HeaderView;
use crate::storage::blob_key;

/// Headers that mean the caller is running its own conditional exchange;
/// the cache stays out of the way.
const CONDITIONAL_HEADERS: [&str; 6] = [
    "range",
    "if-match",
    "if-none-match",
    "if-modified-since",
    "if-unmodified-since",
    "if-range",
];

#[derive(Debug)]
pub enum LookupOutcome {
    Miss,
    Hit(CachedResponse),
    Revalidate(RevalidationRequest),
}

/// A reconstructed response. `headers` always carries a recomputed `Age`.
/// `body` is `None` for `HEAD` lookups.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Instruction to revalidate upstream with the contained conditional
/// headers (`If-None-Match` and/or `If-Modified-Since`).
#[derive(Debug, Clone)]
pub struct RevalidationRequest {
    pub headers: HeaderMap,
}

enum Freshness {
    Serve(Duration),
    Revalidate,
}

/// Freshness verdict for a stored entry against the request's directives.
/// `max-stale` and `min-fresh` are strict: absent `max-stale` means no
/// stale response is acceptable, and `min-fresh` that cannot be satisfied
/// forces revalidation.
fn evaluate_freshness(
    entry: &CacheEntry,
    request_directives: &Directives,
    shared: bool,
    now: SystemTime,
) -> Freshness {
    let age = current_age(entry.corrected_initial_age, entry.response_time, now);
    let is_stale = age >= entry.lifetime;
    let stale_by = age.saturating_sub(entry.lifetime);

    let force_revalidate = entry.invalidated
        || request_directives.has("no-cache")
        || entry.always_revalidate
        || (is_stale && entry.must_revalidate_when_stale)
        || (shared && is_stale && entry.shared_must_revalidate_when_stale);

    let accept_stale = request_directives
        .delta_seconds("max-stale")
        .map(Duration::from_secs)
        .is_some_and(|max_stale| max_stale >= stale_by);
    let min_fresh = request_directives
        .delta_seconds("min-fresh")
        .map(Duration::from_secs);
    let fresh_enough = age.saturating_add(min_fresh.unwrap_or(Duration::ZERO)) < entry.lifetime;

    if force_revalidate
        || (min_fresh.is_some() && !fresh_enough)
        || (is_stale && !accept_stale)
    {
        Freshness::Revalidate
    } else {
        Freshness::Serve(age)
    }
}

fn stored_headers_to_map(entry: &CacheEntry) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in &entry.response_headers {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::try_from(name.as_str()),
            http::HeaderValue::from_str(value),
        ) {
            map.append(name, value);
        }
    }
    map
}

fn revalidation_headers(entry: &CacheEntry) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(etag) = &entry.etag
        && let Ok(value) = http::HeaderValue::from_str(etag)
    {
        headers.insert(http::header::IF_NONE_MATCH, value);
    }
    if let Some(last_modified) = entry.last_modified
        && let Ok(value) = http::HeaderValue::from_str(&format_http_date(last_modified))
    {
        headers.insert(http::header::IF_MODIFIED_SINCE, value);
    }
    headers
}

impl HttpCache {
    /// Answer a request from the cache: a reconstructed response, a
    /// revalidation instruction, or a miss. A miss under
    /// `Cache-Control: only-if-cached` becomes a synthesized `504`.
    pub async fn lookup(
        &self,
        url: &str,
        method: &Method,
        request_headers: &HeaderView,
    ) -> LookupOutcome {
        let request_directives = Directives::parse(request_headers.get("cache-control"));
        let outcome = self
            .lookup_inner(url, method, request_headers, &request_directives)
            .await;
        match outcome {
            LookupOutcome::Miss if request_directives.has("only-if-cached") => {
                LookupOutcome::Hit(CachedResponse {
                    status: StatusCode::GATEWAY_TIMEOUT,
                    headers: HeaderMap::new(),
                    body: Some(Bytes::new()),
                })
            }
            other => other,
        }
    }

    async fn lookup_inner(
        &self,
        url: &str,
        method: &Method,
        request_headers: &HeaderView,
        request_directives: &Directives,
    ) -> LookupOutcome {
        if method != Method::GET && method != Method::HEAD {
            if *method != Method::OPTIONS && *method != Method::TRACE {
                debug!(%method, url, "unsafe method observed; invalidating stored entry");
                if let Err(err) = self.invalidate(url).await {
                    self.report(err);
                }
            }
            return LookupOutcome::Miss;
        }

        if CONDITIONAL_HEADERS
            .iter()
            .any(|name| request_headers.has(name))
        {
            trace!(url, "request carries its own conditionals; bypassing");
            return LookupOutcome::Miss;
        }

        let persisted = match self.metadata.get(url).await {
            Ok(persisted) => persisted,
            Err(err) => {
                self.report(err.context("failed to read cache metadata"));
                return LookupOutcome::Miss;
            }
        };
        let Some(persisted) = persisted else {
            return LookupOutcome::Miss;
        };
        let entry = CacheEntry::from_persisted(&persisted);

        // A HEAD-sourced entry has no body to serve a GET with.
        if entry.method == Method::HEAD && method == Method::GET {
            return LookupOutcome::Miss;
        }

        for (name, stored) in &entry.vary {
            if request_headers.get(name) != stored.as_deref() {
                trace!(url, header = name.as_str(), "vary mismatch");
                return LookupOutcome::Miss;
            }
        }

        let now = SystemTime::now();
        match evaluate_freshness(&entry, request_directives, self.settings.shared, now) {
            Freshness::Revalidate => {
                let headers = revalidation_headers(&entry);
                if headers.is_empty() {
                    return LookupOutcome::Miss;
                }
                LookupOutcome::Revalidate(RevalidationRequest { headers })
            }
            Freshness::Serve(age) => {
                let body = if method == Method::HEAD {
                    None
                } else {
                    match self.bodies.get(&blob_key(&entry.id, url)).await {
                        Ok(Some(bytes)) => Some(bytes),
                        Ok(None) => {
                            debug!(url, "cache body missing; treating as miss");
                            return LookupOutcome::Miss;
                        }
                        Err(err) => {
                            self.report(err.context("failed to read cache body"));
                            return LookupOutcome::Miss;
                        }
                    }
                };

                let mut headers = stored_headers_to_map(&entry);
                if let Ok(value) = http::HeaderValue::from_str(&age_header_value(age)) {
                    headers.insert(http::header::AGE, value);
                }
                LookupOutcome::Hit(CachedResponse {
                    status: entry.status,
                    headers,
                    body,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(lifetime: Duration, age_ms: u64) -> CacheEntry {
        let now = SystemTime::now();
        CacheEntry {
            id: "entry".to_string(),
            response_time: now - Duration::from_millis(age_ms),
            last_modified: None,
            etag: Some("\"v1\"".to_string()),
            vary: Vec::new(),
            method: Method::GET,
            status: StatusCode::OK,
            corrected_initial_age: Duration::ZERO,
            lifetime,
            must_revalidate_when_stale: false,
            shared_must_revalidate_when_stale: false,
            always_revalidate: false,
            response_headers: Vec::new(),
            invalidated: false,
        }
    }

    fn verdict(entry: &CacheEntry, request_cc: Option<&str>, shared: bool) -> Freshness {
        let directives = Directives::parse(request_cc);
        evaluate_freshness(entry, &directives, shared, SystemTime::now())
    }

    #[test]
    fn fresh_entry_is_served() {
        let entry = entry(Duration::from_secs(60), 1_000);
        assert!(matches!(verdict(&entry, None, true), Freshness::Serve(_)));
    }

    #[test]
    fn stale_entry_revalidates_without_max_stale() {
        let entry = entry(Duration::from_secs(1), 2_000);
        assert!(matches!(verdict(&entry, None, true), Freshness::Revalidate));
    }

    #[test]
    fn max_stale_is_strict_but_honored() {
        let entry = entry(Duration::from_secs(1), 2_500);
        assert!(matches!(
            verdict(&entry, Some("max-stale=10"), true),
            Freshness::Serve(_)
        ));
        assert!(matches!(
            verdict(&entry, Some("max-stale=1"), true),
            Freshness::Revalidate
        ));
    }

    #[test]
    fn min_fresh_forces_revalidation_when_unsatisfiable() {
        let entry = entry(Duration::from_secs(60), 30_000);
        assert!(matches!(
            verdict(&entry, Some("min-fresh=10"), true),
            Freshness::Serve(_)
        ));
        assert!(matches!(
            verdict(&entry, Some("min-fresh=45"), true),
            Freshness::Revalidate
        ));
    }

    #[test]
    fn request_no_cache_always_revalidates() {
        let entry = entry(Duration::from_secs(60), 1_000);
        assert!(matches!(
            verdict(&entry, Some("no-cache"), true),
            Freshness::Revalidate
        ));
    }

    #[test]
    fn invalidated_entries_always_revalidate() {
        let mut entry = entry(Duration::from_secs(60), 1_000);
        entry.invalidated = true;
        assert!(matches!(verdict(&entry, None, true), Freshness::Revalidate));
    }

    #[test]
    fn must_revalidate_only_bites_once_stale() {
        let mut fresh = entry(Duration::from_secs(60), 1_000);
        fresh.must_revalidate_when_stale = true;
        assert!(matches!(verdict(&fresh, None, true), Freshness::Serve(_)));

        let mut stale = entry(Duration::from_secs(1), 2_000);
        stale.must_revalidate_when_stale = true;
        assert!(matches!(
            verdict(&stale, Some("max-stale=600"), true),
            Freshness::Revalidate
        ));
    }

    #[test]
    fn proxy_revalidate_applies_to_shared_caches_only() {
        let mut stale = entry(Duration::from_secs(1), 2_000);
        stale.shared_must_revalidate_when_stale = true;
        assert!(matches!(
            verdict(&stale, Some("max-stale=600"), true),
            Freshness::Revalidate
        ));
        assert!(matches!(
            verdict(&stale, Some("max-stale=600"), false),
            Freshness::Serve(_)
        ));
    }

    #[test]
    fn revalidation_headers_carry_available_validators() {
        let mut e = entry(Duration::from_secs(60), 0);
        e.last_modified = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        let headers = revalidation_headers(&e);
        assert_eq!(
            headers.get(http::header::IF_NONE_MATCH).unwrap(),
            "\"v1\""
        );
        assert!(headers.contains_key(http::header::IF_MODIFIED_SINCE));

        e.etag = None;
        e.last_modified = None;
        assert!(revalidation_headers(&e).is_empty());
    }
}
