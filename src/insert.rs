use std::time::SystemTime;

use anyhow::{Context, Result, anyhow};
use http::{Method, StatusCode};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::admission::{LifetimeInput, StorabilityInput, can_store, freshness_lifetime};
use crate::age::{corrected_initial_age, normalize_last_modified};
use crate::body::{BodyError, ResponseBody};
use crate::cache::HttpCache;
use crate::cache_control::Directives;
use crate::entry::{CacheEntry, validators_match};
use crate::headers::{HeaderView, strip_hop_by_hop};
use crate::storage::blob_key;

/// The request's values for every header the response's `Vary` names.
/// `None` records that the request did not carry the header, which a later
/// lookup must reproduce to match.
fn build_vary(
    vary: Option<&str>,
    request_headers: &HeaderView,
) -> Vec<(String, Option<String>)> {
    let Some(vary) = vary else {
        return Vec::new();
    };
    let mut fields = Vec::new();
    for member in vary.split(',') {
        let name = member.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        if fields.iter().any(|(stored, _)| *stored == name) {
            continue;
        }
        let value = request_headers.get(&name).map(str::to_string);
        fields.push((name, value));
    }
    fields
}

impl HttpCache {
    /// Ingest an observed upstream response. Completion does not imply
    /// storage; the engine may legitimately decide not to cache. Failures
    /// are routed to the error hook and never propagate.
    #[allow(clippy::too_many_arguments)]
    pub async fn on_response(
        &self,
        url: &str,
        method: &Method,
        status: StatusCode,
        request_headers: &HeaderView,
        response_headers: &HeaderView,
        request_time: SystemTime,
        response_time: SystemTime,
        body: Option<ResponseBody>,
    ) {
        if let Some(body) = &body
            && body.consumed()
        {
            self.report(
                anyhow!(BodyError::AlreadyConsumed)
                    .context("refusing to cache a body that was read elsewhere"),
            );
            return;
        }

        if response_headers.has("content-range") {
            trace!(url, "partial content; not storing");
            return;
        }

        let response_directives = Directives::parse(response_headers.get("cache-control"));
        let storability = StorabilityInput {
            shared: self.settings.shared,
            method,
            status,
            has_authorization: request_headers.has("authorization"),
            response_directives: &response_directives,
            has_expires: response_headers.has("expires"),
            vary: response_headers.get("vary"),
            force_must_understand: self.settings.force_must_understand,
        };
        if !can_store(&storability) {
            trace!(url, status = status.as_u16(), "response is not storable");
            return;
        }

        let now = SystemTime::now();
        let request_directives = Directives::parse(request_headers.get("cache-control"));
        let lifetime = freshness_lifetime(&LifetimeInput {
            shared: self.settings.shared,
            expires: response_headers.get("expires"),
            request_directives: &request_directives,
            response_directives: &response_directives,
            heuristic_lifetime: self.settings.heuristic_lifetime(),
            now,
        });
        let Some(lifetime) = lifetime else {
            trace!(url, "no usable freshness lifetime; not storing");
            return;
        };

        let initial_age = corrected_initial_age(response_headers, request_time, response_time, now);
        let last_modified = normalize_last_modified(response_headers);

        let prior = match self.metadata.get(url).await {
            Ok(prior) => prior.map(|persisted| CacheEntry::from_persisted(&persisted)),
            Err(err) => {
                self.report(err.context("failed to read prior cache metadata"));
                return;
            }
        };

        // Only a 304 may refresh the stored entry, and only with exact
        // validator agreement; a 304 that disagrees poisons it instead.
        // Any other response replaces the entry outright.
        if let Some(prior_entry) = &prior
            && method == Method::GET
            && status == StatusCode::NOT_MODIFIED
            && !validators_match(prior_entry, response_headers)
        {
            debug!(url, "304 validators differ from stored entry");
            if !prior_entry.invalidated {
                let mut poisoned = prior_entry.to_persisted();
                poisoned.invalidated = true;
                if let Err(err) = self.metadata.set(url, poisoned).await {
                    self.report(err.context("failed to invalidate stored entry"));
                }
            }
            return;
        }

        let id = match &prior {
            Some(prior_entry) => prior_entry.id.clone(),
            None => Uuid::new_v4().to_string(),
        };
        // A 304 freshens the prior record without rewriting what it
        // answers for; every other response describes itself.
        let (stored_method, stored_status) = match &prior {
            Some(prior_entry) if status == StatusCode::NOT_MODIFIED => {
                (prior_entry.method.clone(), prior_entry.status)
            }
            _ => (method.clone(), status),
        };

        let entry = CacheEntry {
            id,
            response_time,
            last_modified,
            etag: response_headers.get("etag").map(str::to_string),
            vary: build_vary(response_headers.get("vary"), request_headers),
            method: stored_method,
            status: stored_status,
            corrected_initial_age: initial_age,
            lifetime,
            must_revalidate_when_stale: response_directives.has("must-revalidate"),
            shared_must_revalidate_when_stale: response_directives.has("proxy-revalidate"),
            always_revalidate: response_directives.has("no-cache"),
            response_headers: strip_hop_by_hop(response_headers, request_headers.get("connection")),
            invalidated: false,
        };

        let no_content = body.is_none()
            || method == Method::HEAD
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED;
        let body_bytes = match body {
            Some(body) if !no_content => {
                match body.drain(self.settings.max_capture_bytes).await {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        debug!(url, error = %err, "body capture failed; not storing");
                        return;
                    }
                }
            }
            _ => bytes::Bytes::new(),
        };

        // A 304 freshens metadata only; the blob under the preserved id
        // stays authoritative. HEAD responses never bring a blob.
        let write_blob = status != StatusCode::NOT_MODIFIED && method != Method::HEAD;
        let key = blob_key(&entry.id, url);
        let write = async {
            self.metadata
                .set(url, entry.to_persisted())
                .await
                .context("failed to write cache metadata")?;
            if write_blob {
                self.bodies
                    .set(&key, body_bytes)
                    .await
                    .context("failed to write cache body")?;
            }
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if let Err(err) = write {
            let _ = self.metadata.delete(url).await;
            let _ = self.bodies.delete(&key).await;
            self.report(err.context("cache write rolled back"));
            return;
        }
        trace!(url, status = entry.status.as_u16(), "stored cache entry");
    }

    /// Mark any current entry for `url` as requiring revalidation. Sticky:
    /// the flag survives until the entry is replaced. The entry keeps
    /// serving validators for conditional requests.
    pub async fn invalidate(&self, url: &str) -> Result<()> {
        let persisted = self
            .metadata
            .get(url)
            .await
            .context("failed to read cache metadata")?;
        let Some(mut persisted) = persisted else {
            return Ok(());
        };
        if persisted.invalidated {
            return Ok(());
        }
        persisted.invalidated = true;
        self.metadata
            .set(url, persisted)
            .await
            .context("failed to mark cache entry invalidated")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vary_records_absent_request_headers() {
        let request = HeaderView::from_pairs([("accept-encoding", "gzip")]);
        let vary = build_vary(Some("Accept-Encoding, Accept-Language"), &request);
        assert_eq!(
            vary,
            vec![
                ("accept-encoding".to_string(), Some("gzip".to_string())),
                ("accept-language".to_string(), None),
            ]
        );
    }

    #[test]
    fn vary_ignores_duplicate_and_empty_members() {
        let request = HeaderView::from_pairs([("accept", "text/html")]);
        let vary = build_vary(Some("Accept,, accept"), &request);
        assert_eq!(vary, vec![("accept".to_string(), Some("text/html".to_string()))]);
    }

    #[test]
    fn no_vary_field_stores_no_requirements() {
        let request = HeaderView::new();
        assert!(build_vary(None, &request).is_empty());
    }
}
