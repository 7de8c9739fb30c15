//! Refresh cadence, retry classification and backoff for the reconciliation loop.

use serde::{Deserialize, Serialize};

/// Default full-refresh cadence in seconds.
pub const REFRESH_INTERVAL_SECS: u64 = 15 * 60;

/// Maximum jitter (seconds) added to periodic refresh intervals.
pub const REFRESH_INTERVAL_JITTER_SECS: u64 = 30;

/// Retry policy classification for collaborator failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Retry class of a failed table or guild API call.
///
/// A bad token (401) needs new credentials. Missing permissions (403) or an
/// unknown resource will not heal by retrying. Rate limits, timeouts and server
/// errors are transient.
pub fn classify_http_status(status: u16) -> RetryClass {
    match status {
        401 => RetryClass::ReauthRequired,
        408 | 429 | 500..=599 => RetryClass::Retryable,
        _ => RetryClass::Permanent,
    }
}

/// Seconds to wait after `consecutive_failures` failed refreshes.
pub fn backoff_seconds(consecutive_failures: u32) -> u64 {
    const BASE_DELAY_SECS: u64 = 30;
    const MAX_DOUBLINGS: u32 = 5;

    match consecutive_failures {
        0 => 0,
        n => BASE_DELAY_SECS << (n - 1).min(MAX_DOUBLINGS),
    }
}

/// Milliseconds to wait before the next refresh.
///
/// After failures the wait is the backoff, but never longer than the regular
/// interval.
pub fn next_refresh_delay_ms(interval_secs: u64, consecutive_failures: u32, jitter_ms: u64) -> u64 {
    let interval_ms = interval_secs.saturating_mul(1000);
    if consecutive_failures == 0 {
        return interval_ms.saturating_add(jitter_ms);
    }
    let backoff_ms = backoff_seconds(consecutive_failures).saturating_mul(1000);
    backoff_ms.min(interval_ms).saturating_add(jitter_ms)
}
