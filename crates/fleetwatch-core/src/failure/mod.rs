//! Failure controller.
//!
//! Classifies agent failures, decides what the orchestrator should do
//! about them, and computes jittered exponential backoff. Both `classify`
//! and `decide` are pure functions so the full decision tree is testable
//! without a database.

use std::time::Duration;

use fleetwatch_db::models::{ErrorCategory, ErrorClass, EscalationReason};

/// Default retry ceiling before a task is escalated.
pub const DEFAULT_RETRY_MAX: i32 = 3;
/// Consecutive-failure ceiling before a task is escalated regardless of
/// `retry_max`.
pub const CONSECUTIVE_FAILURE_CEILING: i32 = 3;
/// An error we couldn't classify gets one grace retry, never the full
/// `retry_max` run of a known-transient failure.
pub const UNKNOWN_RETRY_MAX: i32 = 1;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CEILING: Duration = Duration::from_secs(30);
const BACKOFF_MULT: f64 = 2.0;
const BACKOFF_JITTER: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: ErrorClass,
    pub category: ErrorCategory,
}

/// A minimal view of a failing task's recent history, enough to decide
/// what happens next without fetching anything else from the store.
pub struct FailureContext<'a> {
    pub retry_count: i32,
    pub retry_max: i32,
    pub consecutive_failures: i32,
    /// Messages of the most recent failures, newest first.
    pub recent_messages: &'a [String],
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureDecision {
    Retry(Duration),
    Skip,
    Escalate(EscalationReason),
    Abort,
}

/// Classify a failure from its message and exit code.
///
/// Exit-code disambiguation for signal-kill codes (137 = SIGKILL, 139 =
/// SIGSEGV) is checked before message keywords, so a message containing
/// the literal word "SIGKILL" from an out-of-memory kill is still
/// classified transient rather than permanent.
pub fn classify(message: &str, exit_code: Option<i32>) -> Classification {
    if let Some(code) = exit_code {
        if code == 137 {
            return Classification { class: ErrorClass::Transient, category: ErrorCategory::Memory };
        }
        if code == 139 {
            return Classification { class: ErrorClass::Transient, category: ErrorCategory::Process };
        }
    }

    let lower = message.to_lowercase();

    const TRANSIENT_NETWORK: &[&str] =
        &["etimedout", "econnreset", "econnrefused", "enotfound", "timed out", "timeout"];
    const TRANSIENT_RATE_LIMIT: &[&str] = &["rate limit", "429", "502", "503", "504"];
    const TRANSIENT_MEMORY: &[&str] = &["out of memory", "oom", "sigkill", "sigterm"];
    const PERMANENT_COMPILE: &[&str] =
        &["syntax error", "type error", "compile error", "compilation failed", "cannot find"];
    const PERMANENT_FS: &[&str] = &["enoent", "no such file", "permission denied", "module not found"];
    const PERMANENT_ASSERT: &[&str] =
        &["assertion failed", "lint error", "constraint violation", "unique violation"];

    if TRANSIENT_NETWORK.iter().any(|k| lower.contains(k)) {
        return Classification { class: ErrorClass::Transient, category: ErrorCategory::Network };
    }
    if TRANSIENT_RATE_LIMIT.iter().any(|k| lower.contains(k)) {
        return Classification { class: ErrorClass::Transient, category: ErrorCategory::Network };
    }
    if TRANSIENT_MEMORY.iter().any(|k| lower.contains(k)) {
        return Classification { class: ErrorClass::Transient, category: ErrorCategory::Memory };
    }
    if PERMANENT_COMPILE.iter().any(|k| lower.contains(k)) {
        return Classification { class: ErrorClass::Permanent, category: ErrorCategory::Compilation };
    }
    if PERMANENT_FS.iter().any(|k| lower.contains(k)) {
        return Classification { class: ErrorClass::Permanent, category: ErrorCategory::Filesystem };
    }
    if PERMANENT_ASSERT.iter().any(|k| lower.contains(k)) {
        return Classification { class: ErrorClass::Permanent, category: ErrorCategory::TestFailure };
    }
    if lower.contains("database") || lower.contains("sql") {
        return Classification { class: ErrorClass::Permanent, category: ErrorCategory::Database };
    }

    Classification { class: ErrorClass::Unknown, category: ErrorCategory::General }
}

/// Decide what to do about a failure, given its classification and the
/// task's recent history.
///
/// The three-identical-messages "no progress" check runs ahead of the
/// plain retry path, so it can fire even on an early attempt if the
/// caller has already accumulated matching history.
pub fn decide(ctx: &FailureContext, classification: Classification) -> FailureDecision {
    if ctx.recent_messages.len() >= 3 {
        let last_three = &ctx.recent_messages[..3];
        if last_three.iter().all(|m| m == &last_three[0]) {
            return FailureDecision::Escalate(EscalationReason::NoProgress);
        }
    }

    let effective_retry_max = if classification.class == ErrorClass::Unknown {
        ctx.retry_max.min(UNKNOWN_RETRY_MAX)
    } else {
        ctx.retry_max
    };
    if ctx.retry_count >= effective_retry_max {
        return FailureDecision::Escalate(EscalationReason::MaxRetriesExceeded);
    }

    if ctx.consecutive_failures >= CONSECUTIVE_FAILURE_CEILING {
        return FailureDecision::Escalate(EscalationReason::RepeatedFailure);
    }

    if classification.class == ErrorClass::Permanent {
        return FailureDecision::Skip;
    }

    let attempt = (ctx.retry_count + 1).max(1) as u32;
    FailureDecision::Retry(backoff(attempt))
}

/// `clamp(base * mult^(k-1), base, ceiling)`, jittered by ±10%.
///
/// The jitter is applied by the caller seeding from `rand::rng()`, so this
/// function stays deterministic and unit-testable; it returns the
/// non-jittered midpoint here and [`jittered_backoff`] applies the jitter.
pub fn backoff(attempt: u32) -> Duration {
    let k = attempt.saturating_sub(1) as i32;
    let scaled = BACKOFF_BASE.as_secs_f64() * BACKOFF_MULT.powi(k);
    let clamped = scaled.clamp(BACKOFF_BASE.as_secs_f64(), BACKOFF_CEILING.as_secs_f64());
    Duration::from_secs_f64(clamped)
}

/// Apply ±10% jitter to a backoff duration using the provided random
/// fraction in `[0.0, 1.0)` (typically sourced from `rand::rng()` at the
/// call site, kept as a parameter here so this stays unit-testable).
pub fn jittered_backoff(base: Duration, jitter_fraction: f64) -> Duration {
    let factor = 1.0 - BACKOFF_JITTER + (2.0 * BACKOFF_JITTER * jitter_fraction);
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_network_errors_as_transient() {
        let c = classify("connection reset: ECONNRESET", None);
        assert_eq!(c.class, ErrorClass::Transient);
        assert_eq!(c.category, ErrorCategory::Network);
    }

    #[test]
    fn classify_compile_errors_as_permanent() {
        let c = classify("error[E0308]: type error in expression", None);
        assert_eq!(c.class, ErrorClass::Permanent);
        assert_eq!(c.category, ErrorCategory::Compilation);
    }

    #[test]
    fn classify_unknown_messages_as_unknown() {
        let c = classify("agent exited unexpectedly", None);
        assert_eq!(c.class, ErrorClass::Unknown);
    }

    #[test]
    fn memory_kill_is_transient_even_if_message_says_sigkill() {
        let c = classify("process terminated with SIGKILL", Some(137));
        assert_eq!(c.class, ErrorClass::Transient);
        assert_eq!(c.category, ErrorCategory::Memory);
    }

    #[test]
    fn exit_code_disambiguation_runs_before_message_keywords() {
        // A message containing a permanent-sounding phrase, but an OOM exit code.
        let c = classify("assertion failed in module", Some(137));
        assert_eq!(c.class, ErrorClass::Transient);
    }

    #[test]
    fn decide_retries_transient_within_limits() {
        let ctx = FailureContext {
            retry_count: 0,
            retry_max: 3,
            consecutive_failures: 1,
            recent_messages: &[],
        };
        let classification = Classification { class: ErrorClass::Transient, category: ErrorCategory::Network };
        let decision = decide(&ctx, classification);
        assert!(matches!(decision, FailureDecision::Retry(_)));
    }

    #[test]
    fn decide_skips_permanent_errors() {
        let ctx = FailureContext {
            retry_count: 0,
            retry_max: 3,
            consecutive_failures: 0,
            recent_messages: &[],
        };
        let classification = Classification { class: ErrorClass::Permanent, category: ErrorCategory::Compilation };
        let decision = decide(&ctx, classification);
        assert_eq!(decision, FailureDecision::Skip);
    }

    #[test]
    fn decide_escalates_after_max_retries() {
        let ctx = FailureContext {
            retry_count: 3,
            retry_max: 3,
            consecutive_failures: 1,
            recent_messages: &[],
        };
        let classification = Classification { class: ErrorClass::Transient, category: ErrorCategory::Network };
        let decision = decide(&ctx, classification);
        assert_eq!(decision, FailureDecision::Escalate(EscalationReason::MaxRetriesExceeded));
    }

    #[test]
    fn decide_escalates_unknown_errors_after_a_single_retry() {
        let ctx = FailureContext {
            retry_count: 1,
            retry_max: 3,
            consecutive_failures: 1,
            recent_messages: &[],
        };
        let classification = Classification { class: ErrorClass::Unknown, category: ErrorCategory::General };
        let decision = decide(&ctx, classification);
        assert_eq!(decision, FailureDecision::Escalate(EscalationReason::MaxRetriesExceeded));
    }

    #[test]
    fn decide_grants_unknown_errors_one_grace_retry() {
        let ctx = FailureContext {
            retry_count: 0,
            retry_max: 3,
            consecutive_failures: 0,
            recent_messages: &[],
        };
        let classification = Classification { class: ErrorClass::Unknown, category: ErrorCategory::General };
        let decision = decide(&ctx, classification);
        assert!(matches!(decision, FailureDecision::Retry(_)));
    }

    #[test]
    fn decide_escalates_after_repeated_consecutive_failures() {
        let ctx = FailureContext {
            retry_count: 1,
            retry_max: 5,
            consecutive_failures: 3,
            recent_messages: &[],
        };
        let classification = Classification { class: ErrorClass::Transient, category: ErrorCategory::Network };
        let decision = decide(&ctx, classification);
        assert_eq!(decision, FailureDecision::Escalate(EscalationReason::RepeatedFailure));
    }

    #[test]
    fn decide_escalates_on_no_progress_even_on_first_attempt() {
        let messages = vec!["same error".to_string(); 3];
        let ctx = FailureContext {
            retry_count: 0,
            retry_max: 5,
            consecutive_failures: 1,
            recent_messages: &messages,
        };
        let classification = Classification { class: ErrorClass::Transient, category: ErrorCategory::Network };
        let decision = decide(&ctx, classification);
        assert_eq!(decision, FailureDecision::Escalate(EscalationReason::NoProgress));
    }

    #[test]
    fn backoff_grows_exponentially_then_clamps_at_ceiling() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(4));
        assert_eq!(backoff(10), Duration::from_secs(30));
    }

    #[test]
    fn jittered_backoff_stays_within_bounds() {
        let base = Duration::from_secs(10);
        let low = jittered_backoff(base, 0.0);
        let high = jittered_backoff(base, 1.0);
        assert!(low.as_secs_f64() >= 9.0 && low.as_secs_f64() <= 9.01);
        assert!(high.as_secs_f64() >= 10.99 && high.as_secs_f64() <= 11.0);
    }
}
