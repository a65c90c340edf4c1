//! Retry eligibility and backoff.
//!
//! Predicates take the number of attempts that have already failed and the
//! latest error. They are plain functions so the policies can be checked
//! without any network or cache machinery.

use std::time::Duration;

use crate::error::ApiError;

/// Decides whether another attempt should be made after `failures` failed attempts.
pub type RetryPredicate = fn(failures: u32, error: &ApiError) -> bool;

const MAX_QUERY_ATTEMPTS: u32 = 3;
const MAX_MUTATION_ATTEMPTS: u32 = 2;

/// Onboarding status reads retry anything except authentication failures,
/// which must reach the auth layer immediately.
pub fn onboarding_query(failures: u32, error: &ApiError) -> bool {
    !error.is_unauthorized() && failures < MAX_QUERY_ATTEMPTS
}

/// Other reads retry server errors only.
pub fn default_query(failures: u32, error: &ApiError) -> bool {
    error.is_server_error() && failures < MAX_QUERY_ATTEMPTS
}

/// Mutations are not assumed idempotent: one retry, server errors only.
pub fn mutation(failures: u32, error: &ApiError) -> bool {
    error.is_server_error() && failures < MAX_MUTATION_ATTEMPTS
}

pub fn never(_failures: u32, _error: &ApiError) -> bool {
    false
}

/// `min(base * 2^retry_index, max)`, where `retry_index` is 0 before the first retry.
pub fn retry_delay(retry_index: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(retry_index).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(max, |delay| delay.min(max))
}

pub fn default_retry_delay(retry_index: u32) -> Duration {
    retry_delay(retry_index, Duration::from_millis(1_000), Duration::from_millis(30_000))
}
