// decision-gate-core/src/retry.rs
// ============================================================================
// Module: Retry Runner
// Description: Error classification and bounded retry with backoff.
// Purpose: Drive a fallible tool invocation through a retry class's budget.
// Dependencies: std::{thread, time}, crate::core::{model, registry}
// ============================================================================

//! ## Overview
//! `classify_error` turns a raw tool/transport failure into the kernel's
//! stable error taxonomy via string fingerprints, matching the reference
//! implementation exactly. `run_with_retry` then drives a closure up to
//! `retry_class.max_attempts` times, honoring the non-retryable set and the
//! retry class's backoff schedule.

use std::thread;
use std::time::Duration;

use crate::core::model::ErrorClass;
use crate::core::registry::RetryClass;

/// Classifies a raw error message and (optional) exception-style type name
/// into the kernel's error taxonomy, using the same string fingerprints as
/// the reference implementation.
#[must_use]
pub fn classify_error(message: &str, type_name: &str) -> ErrorClass {
    let msg = message.to_lowercase();
    let name = type_name.to_lowercase();

    if msg.contains("unauthorized") || msg.contains("auth") || name.contains("auth") {
        ErrorClass::Auth
    } else if msg.contains("forbidden") || msg.contains("permission") {
        ErrorClass::Permission
    } else if msg.contains("rate") || msg.contains("429") {
        ErrorClass::RateLimit
    } else if msg.contains("timeout") {
        ErrorClass::Timeout
    } else if msg.contains("not found") || msg.contains("404") {
        ErrorClass::NotFound
    } else if msg.contains("conflict") || msg.contains("409") {
        ErrorClass::Conflict
    } else if msg.contains("validation") || msg.contains("invalid") {
        ErrorClass::Validation
    } else if msg.contains("upstream") || msg.contains("5xx") {
        ErrorClass::Upstream
    } else if msg.contains("network") || name.contains("connection") {
        ErrorClass::Transient
    } else {
        ErrorClass::Unknown
    }
}

/// Outcome of a retry-bounded attempt sequence.
pub struct RetryOutcome<T> {
    /// The successful value, if any attempt succeeded.
    pub value: Option<T>,
    /// The last classified error, if the final attempt failed.
    pub error: Option<(ErrorClass, String)>,
    /// Number of attempts made.
    pub attempts: u32,
}

/// Runs `attempt` up to `retry_class.max_attempts` times.
///
/// `attempt` returns `Ok(value)` on success or `Err((message, type_name))` on
/// failure; this function classifies the error, stops immediately for
/// non-retryable classes or classes outside `retry_class.retry_on`, and
/// otherwise sleeps the backoff slot for `attempt_index - 1` (clamped to the
/// last configured slot, defaulting to 250ms when `backoff_ms` is empty)
/// before trying again.
pub fn run_with_retry<T>(
    retry_class: &RetryClass,
    mut attempt: impl FnMut(u32) -> Result<T, (String, String)>,
) -> RetryOutcome<T> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match attempt(attempts) {
            Ok(value) => {
                return RetryOutcome {
                    value: Some(value),
                    error: None,
                    attempts,
                };
            }
            Err((message, type_name)) => {
                let class = classify_error(&message, &type_name);
                let exhausted = attempts >= retry_class.max_attempts;
                let retryable = !class.is_non_retryable() && retry_class.retry_on.contains(&class);
                if exhausted || !retryable {
                    return RetryOutcome {
                        value: None,
                        error: Some((class, message)),
                        attempts,
                    };
                }
                thread::sleep(Duration::from_millis(backoff_for(retry_class, attempts)));
            }
        }
    }
}

fn backoff_for(retry_class: &RetryClass, attempts: u32) -> u64 {
    if retry_class.backoff_ms.is_empty() {
        return 250;
    }
    let idx = (attempts as usize).saturating_sub(1).min(retry_class.backoff_ms.len() - 1);
    retry_class.backoff_ms[idx]
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions are permitted."
)]
mod tests {
    use super::*;
    use crate::core::identifiers::RetryClassId;

    fn retry_class(max_attempts: u32, retry_on: Vec<ErrorClass>) -> RetryClass {
        RetryClass {
            retry_class_id: RetryClassId::new("rc"),
            max_attempts,
            backoff_ms: vec![0],
            retry_on,
        }
    }

    #[test]
    fn classify_rate_limit_message() {
        assert_eq!(classify_error("429 rate limit", ""), ErrorClass::RateLimit);
    }

    #[test]
    fn non_retryable_class_stops_after_one_attempt() {
        let rc = retry_class(5, vec![ErrorClass::Validation]);
        let mut calls = 0;
        let outcome = run_with_retry(&rc, |_| {
            calls += 1;
            Err::<(), _>(("invalid input".to_string(), String::new()))
        });
        assert_eq!(calls, 1);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error.unwrap().0, ErrorClass::Validation);
    }

    #[test]
    fn retryable_class_retries_until_success() {
        let rc = retry_class(3, vec![ErrorClass::RateLimit]);
        let mut calls = 0;
        let outcome = run_with_retry(&rc, |attempt| {
            calls += 1;
            if attempt < 2 {
                Err(("429 too many requests".to_string(), String::new()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(calls, 2);
        assert_eq!(outcome.value, Some(42));
        assert_eq!(outcome.attempts, 2);
    }

    #[test]
    fn exhausts_max_attempts() {
        let rc = retry_class(2, vec![ErrorClass::RateLimit]);
        let outcome = run_with_retry(&rc, |_| {
            Err::<(), _>(("429".to_string(), String::new()))
        });
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.value.is_none());
    }
}
