use std::time::{Duration, SystemTime};

use http::{Method, StatusCode};

use crate::age::parse_http_date;
use crate::cache_control::Directives;

/// Status codes the engine understands well enough to honor
/// `must-understand` (RFC 9111 §3, RFC 9110 §15).
fn understood_status(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        200 | 201 | 202 | 203 | 204 | 205 | 300 | 301 | 302 | 303 | 304 | 307 | 308 | 400 | 401
            | 403 | 404 | 405 | 406 | 407 | 408 | 410 | 411 | 412 | 413 | 414 | 415 | 417 | 421
            | 426 | 451 | 500 | 501 | 502 | 503 | 504 | 505 | 506
    )
}

/// Status codes cacheable without explicit freshness (RFC 9110 §15.1).
pub fn heuristically_cacheable(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        200 | 203 | 204 | 300 | 301 | 308 | 404 | 405 | 410 | 414 | 451 | 501
    )
}

fn vary_contains_star(vary: Option<&str>) -> bool {
    vary.map(|value| value.split(',').any(|member| member.trim() == "*"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy)]
pub struct StorabilityInput<'a> {
    pub shared: bool,
    pub method: &'a Method,
    pub status: StatusCode,
    pub has_authorization: bool,
    pub response_directives: &'a Directives,
    pub has_expires: bool,
    pub vary: Option<&'a str>,
    pub force_must_understand: bool,
}

/// Whether a response may be stored at all (RFC 9111 §3).
pub fn can_store(input: &StorabilityInput<'_>) -> bool {
    let status = input.status.as_u16();
    if !(200..=599).contains(&status) {
        return false;
    }
    if input.method != Method::GET && input.method != Method::HEAD {
        return false;
    }
    if vary_contains_star(input.vary) {
        return false;
    }

    let cc = input.response_directives;
    if cc.has("no-store") {
        return false;
    }
    if input.shared && cc.has("private") {
        return false;
    }
    if input.shared
        && input.has_authorization
        && !cc.has("must-revalidate")
        && !cc.has("public")
        && cc.delta_seconds("s-maxage").is_none()
    {
        return false;
    }
    if (input.force_must_understand || cc.has("must-understand"))
        && !understood_status(input.status)
    {
        return false;
    }

    // At least one positive cacheability signal must remain.
    cc.has("public")
        || (!input.shared && cc.has("private"))
        || input.has_expires
        || cc.delta_seconds("max-age").is_some()
        || (input.shared && cc.delta_seconds("s-maxage").is_some())
        || heuristically_cacheable(input.status)
}

#[derive(Debug, Clone, Copy)]
pub struct LifetimeInput<'a> {
    pub shared: bool,
    pub expires: Option<&'a str>,
    pub request_directives: &'a Directives,
    pub response_directives: &'a Directives,
    pub heuristic_lifetime: Duration,
    pub now: SystemTime,
}

/// Freshness lifetime of a response, or `None` when the combination of
/// directives forbids storing it. Precedence: no-store, shared+private,
/// s-maxage (shared), max-age, heuristic when `Expires` is absent, then a
/// parseable `Expires`.
pub fn freshness_lifetime(input: &LifetimeInput<'_>) -> Option<Duration> {
    if input.request_directives.has("no-store") || input.response_directives.has("no-store") {
        return None;
    }
    if input.shared && input.response_directives.has("private") {
        return None;
    }
    if input.shared
        && let Some(s_maxage) = input.response_directives.delta_seconds("s-maxage")
    {
        return Some(Duration::from_secs(s_maxage));
    }
    if let Some(max_age) = input.response_directives.delta_seconds("max-age") {
        return Some(Duration::from_secs(max_age));
    }
    let Some(expires) = input.expires else {
        return Some(input.heuristic_lifetime);
    };
    if let Some(expires_at) = parse_http_date(expires) {
        return Some(
            expires_at
                .duration_since(input.now)
                .unwrap_or(Duration::ZERO),
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directives(field: Option<&str>) -> Directives {
        Directives::parse(field)
    }

    fn base_input<'a>(cc: &'a Directives) -> StorabilityInput<'a> {
        StorabilityInput {
            shared: true,
            method: &Method::GET,
            status: StatusCode::OK,
            has_authorization: false,
            response_directives: cc,
            has_expires: false,
            vary: None,
            force_must_understand: false,
        }
    }

    #[test]
    fn stores_plain_200_heuristically() {
        let cc = directives(None);
        assert!(can_store(&base_input(&cc)));
    }

    #[test]
    fn refuses_non_get_head_methods() {
        let cc = directives(Some("max-age=60"));
        let mut input = base_input(&cc);
        input.method = &Method::POST;
        assert!(!can_store(&input));
    }

    #[test]
    fn refuses_vary_star() {
        let cc = directives(Some("max-age=60"));
        let mut input = base_input(&cc);
        input.vary = Some("accept-encoding, *");
        assert!(!can_store(&input));
    }

    #[test]
    fn refuses_no_store() {
        let cc = directives(Some("no-store"));
        assert!(!can_store(&base_input(&cc)));
    }

    #[test]
    fn shared_cache_refuses_private() {
        let cc = directives(Some("private, max-age=60"));
        assert!(!can_store(&base_input(&cc)));

        let mut input = base_input(&cc);
        input.shared = false;
        assert!(can_store(&input));
    }

    #[test]
    fn authorization_requires_explicit_permission_when_shared() {
        let cc = directives(Some("max-age=60"));
        let mut input = base_input(&cc);
        input.has_authorization = true;
        assert!(!can_store(&input));

        for field in ["max-age=60, public", "must-revalidate", "s-maxage=30"] {
            let cc = directives(Some(field));
            let mut input = base_input(&cc);
            input.has_authorization = true;
            assert!(can_store(&input));
        }

        // Non-shared caches ignore the Authorization gate.
        let cc = directives(Some("max-age=60"));
        let mut input = base_input(&cc);
        input.shared = false;
        input.has_authorization = true;
        assert!(can_store(&input));
    }

    #[test]
    fn must_understand_restricts_status() {
        let cc = directives(Some("must-understand, max-age=60"));
        let mut input = base_input(&cc);
        input.status = StatusCode::from_u16(299).unwrap();
        assert!(!can_store(&input));
        input.status = StatusCode::OK;
        assert!(can_store(&input));

        let cc = directives(Some("max-age=60"));
        let mut input = base_input(&cc);
        input.force_must_understand = true;
        input.status = StatusCode::from_u16(299).unwrap();
        assert!(!can_store(&input));
    }

    #[test]
    fn requires_a_positive_cacheability_signal() {
        let cc = directives(None);
        let mut input = base_input(&cc);
        input.status = StatusCode::IM_A_TEAPOT;
        assert!(!can_store(&input));

        input.has_expires = true;
        assert!(can_store(&input));

        let cc = directives(Some("s-maxage=30"));
        let mut input = base_input(&cc);
        input.status = StatusCode::IM_A_TEAPOT;
        assert!(can_store(&input));
        input.shared = false;
        assert!(!can_store(&input));
    }

    #[test]
    fn duplicate_directives_make_the_response_unstorable() {
        let cc = directives(Some("max-age=60, max-age=120"));
        assert!(!can_store(&base_input(&cc)));
    }

    fn lifetime_input<'a>(
        request: &'a Directives,
        response: &'a Directives,
        expires: Option<&'a str>,
        now: SystemTime,
    ) -> LifetimeInput<'a> {
        LifetimeInput {
            shared: true,
            expires,
            request_directives: request,
            response_directives: response,
            heuristic_lifetime: Duration::from_secs(60),
            now,
        }
    }

    #[test]
    fn lifetime_precedence() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let none = directives(None);

        let response = directives(Some("s-maxage=30, max-age=90"));
        let input = lifetime_input(&none, &response, None, now);
        assert_eq!(freshness_lifetime(&input), Some(Duration::from_secs(30)));

        let mut input = lifetime_input(&none, &response, None, now);
        input.shared = false;
        assert_eq!(freshness_lifetime(&input), Some(Duration::from_secs(90)));

        let response = directives(Some("public"));
        let input = lifetime_input(&none, &response, None, now);
        assert_eq!(freshness_lifetime(&input), Some(Duration::from_secs(60)));
    }

    #[test]
    fn no_store_on_either_side_blocks_storage() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let no_store = directives(Some("no-store"));
        let max_age = directives(Some("max-age=60"));

        let input = lifetime_input(&no_store, &max_age, None, now);
        assert_eq!(freshness_lifetime(&input), None);
        let input = lifetime_input(&max_age, &no_store, None, now);
        assert_eq!(freshness_lifetime(&input), None);
    }

    #[test]
    fn expires_gives_the_remaining_window() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let none = directives(None);
        let future = crate::age::format_http_date(now + Duration::from_secs(120));
        let input = lifetime_input(&none, &none, Some(&future), now);
        assert_eq!(freshness_lifetime(&input), Some(Duration::from_secs(120)));

        let past = crate::age::format_http_date(now - Duration::from_secs(120));
        let input = lifetime_input(&none, &none, Some(&past), now);
        assert_eq!(freshness_lifetime(&input), Some(Duration::ZERO));
    }

    #[test]
    fn unparseable_expires_is_not_storable() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let none = directives(None);
        let input = lifetime_input(&none, &none, Some("yesterday"), now);
        assert_eq!(freshness_lifetime(&input), None);
    }
}
