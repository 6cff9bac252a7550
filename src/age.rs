use std::time::{Duration, SystemTime};

use crate::cache_control::parse_delta_seconds;
use crate::headers::HeaderView;

/// Parse an HTTP-date field value (RFC 9110 §5.6.7).
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value.trim()).ok()
}

pub fn format_http_date(instant: SystemTime) -> String {
    httpdate::fmt_http_date(instant)
}

/// The `Date` value a response is aged against. A parsed `Date` is only
/// trusted inside `(request_time, now]`; anything else falls back to
/// `request_time` (RFC 9110 §6.6.1).
pub fn normalize_date(
    headers: &HeaderView,
    request_time: SystemTime,
    now: SystemTime,
) -> SystemTime {
    let parsed = headers.get("date").and_then(parse_http_date);
    match parsed {
        Some(date) if date > request_time && date <= now => date,
        _ => request_time,
    }
}

/// Corrected initial age per RFC 9111 §4.2.3: the larger of the apparent
/// age (receipt time minus origin `Date`) and the upstream-declared `Age`
/// plus the response delay.
pub fn corrected_initial_age(
    headers: &HeaderView,
    request_time: SystemTime,
    response_time: SystemTime,
    now: SystemTime,
) -> Duration {
    let age_value = headers
        .get("age")
        .and_then(parse_delta_seconds)
        .map(Duration::from_secs)
        .unwrap_or(Duration::ZERO);

    let date_value = normalize_date(headers, request_time, now);
    let apparent_age = response_time
        .duration_since(date_value)
        .unwrap_or(Duration::ZERO);
    let response_delay = response_time
        .duration_since(request_time)
        .unwrap_or(Duration::ZERO);
    let corrected_age = age_value.saturating_add(response_delay);

    apparent_age.max(corrected_age)
}

/// Estimated age of a stored response at `now`.
pub fn current_age(
    corrected_initial_age: Duration,
    response_time: SystemTime,
    now: SystemTime,
) -> Duration {
    let resident = now.duration_since(response_time).unwrap_or(Duration::ZERO);
    corrected_initial_age.saturating_add(resident)
}

/// The `Age` header emitted on a cache hit: whole seconds, rounded down.
pub fn age_header_value(current_age: Duration) -> String {
    current_age.as_secs().to_string()
}

pub fn normalize_last_modified(headers: &HeaderView) -> Option<SystemTime> {
    headers.get("last-modified").and_then(parse_http_date)
}
