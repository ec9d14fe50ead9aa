//! Time-bucket keying (spec §4.1): maps (client, limit-kind, wall clock) to
//! a counter identifier and a residual TTL. Pure functions, no I/O — the
//! counter store backend (`crate::store::counters`) calls into these to
//! build Redis keys and TTLs.

use chrono::{Datelike, TimeZone, Utc};
use uuid::Uuid;

/// A fixed window: `floor(now / window_seconds) * window_seconds`.
///
/// This is a *fixed* window, not sliding: a burst at a bucket boundary may
/// briefly see up to 2x the limit within a 2*window_seconds span. That
/// trade-off is intentional — it is O(1), atomic, and consistent across
/// nodes (spec §4.1).
pub fn window_bucket(now_unix_seconds: i64, window_seconds: u32) -> i64 {
    let window_seconds = window_seconds as i64;
    (now_unix_seconds / window_seconds) * window_seconds
}

/// TTL for a freshly-created window counter: exactly the window length.
pub fn window_ttl_seconds(window_seconds: u32) -> u64 {
    window_seconds as u64
}

/// The calendar year-month in UTC, formatted `YYYYMM`.
pub fn month_bucket(now_unix_seconds: i64) -> String {
    let dt = Utc.timestamp_opt(now_unix_seconds, 0).single().unwrap_or_else(Utc::now);
    format!("{:04}{:02}", dt.year(), dt.month())
}

/// Seconds from `now` to the first instant of the next UTC month.
pub fn month_ttl_seconds(now_unix_seconds: i64) -> u64 {
    let now = Utc.timestamp_opt(now_unix_seconds, 0).single().unwrap_or_else(Utc::now);
    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let next_month_start = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .expect("valid first-of-month instant");
    (next_month_start.timestamp() - now_unix_seconds).max(1) as u64
}

/// `rl:c:<clientId>:w:<bucket>`
pub fn client_window_key(client_id: Uuid, window_seconds: u32, now_unix_seconds: i64) -> String {
    format!(
        "rl:c:{}:w:{}",
        client_id,
        window_bucket(now_unix_seconds, window_seconds)
    )
}

/// `rl:c:<clientId>:m:<YYYYMM>`
pub fn client_monthly_key(client_id: Uuid, now_unix_seconds: i64) -> String {
    format!("rl:c:{}:m:{}", client_id, month_bucket(now_unix_seconds))
}

/// `rl:g:w:<bucket>`
pub fn global_window_key(window_seconds: u32, now_unix_seconds: i64) -> String {
    format!("rl:g:w:{}", window_bucket(now_unix_seconds, window_seconds))
}

/// `rl:g:m:<YYYYMM>`
pub fn global_monthly_key(now_unix_seconds: i64) -> String {
    format!("rl:g:m:{}", month_bucket(now_unix_seconds))
}

/// `sub:cache:<clientId>`
pub fn subscription_cache_key(client_id: Uuid) -> String {
    format!("sub:cache:{}", client_id)
}

/// Pattern matching every counter key for a client, for cache/invalidation
/// purposes (spec §4.2, §6): `rl:c:<clientId>:*`.
pub fn client_counter_pattern(client_id: Uuid) -> String {
    format!("rl:c:{}:*", client_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_bucket_aligns_to_multiples_of_window() {
        // 2024-01-01T00:00:30Z
        let now = 1704067230;
        assert_eq!(window_bucket(now, 60), 1704067200);
        assert_eq!(window_bucket(now, 60) % 60, 0);
    }

    #[test]
    fn window_bucket_stable_within_same_window() {
        let start = window_bucket(1704067230, 60);
        let later = window_bucket(1704067259, 60);
        assert_eq!(start, later);
    }

    #[test]
    fn window_ttl_equals_window_length() {
        assert_eq!(window_ttl_seconds(60), 60);
    }

    #[test]
    fn month_bucket_formats_as_yyyymm() {
        // 2024-03-15T12:00:00Z
        assert_eq!(month_bucket(1710504000), "202403");
    }

    #[test]
    fn month_ttl_counts_down_to_next_month_start() {
        // 2024-02-28T23:00:00Z (2024 is a leap year, so Feb has 29 days)
        let now = Utc
            .with_ymd_and_hms(2024, 2, 28, 23, 0, 0)
            .single()
            .unwrap()
            .timestamp();
        let ttl = month_ttl_seconds(now);
        // From Feb 28 23:00 to Mar 1 00:00 is 25 hours.
        assert_eq!(ttl, 25 * 3600);
    }

    #[test]
    fn month_ttl_wraps_december_into_next_year() {
        let now = Utc
            .with_ymd_and_hms(2024, 12, 31, 23, 0, 0)
            .single()
            .unwrap()
            .timestamp();
        assert_eq!(month_ttl_seconds(now), 3600);
    }

    #[test]
    fn client_keys_embed_namespace_and_bucket() {
        let id = Uuid::nil();
        let now = 1704067230;
        assert_eq!(
            client_window_key(id, 60, now),
            format!("rl:c:{}:w:1704067200", id)
        );
        assert_eq!(client_monthly_key(id, now), format!("rl:c:{}:m:202401", id));
    }

    #[test]
    fn global_keys_have_no_client_segment() {
        let now = 1704067230;
        assert_eq!(global_window_key(60, now), "rl:g:w:1704067200");
        assert_eq!(global_monthly_key(now), "rl:g:m:202401");
    }
}
