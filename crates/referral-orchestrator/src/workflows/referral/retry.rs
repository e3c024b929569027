use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use tracing::warn;

/// Failure reasons whose referrals are re-selected by the completed-referral pass.
/// Retry happens by re-selection, never inside a state-changing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableReasons(BTreeSet<String>);

impl RetryableReasons {
    pub fn new<I, S>(reasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            reasons
                .into_iter()
                .map(Into::into)
                .map(|reason: String| reason.trim().to_string())
                .filter(|reason| !reason.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, reason: &str) -> bool {
        self.0.contains(reason)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for RetryableReasons {
    fn default() -> Self {
        Self::new([
            "missing_questionnaire",
            "invalid_decision_vendor",
            "executor_timeout",
            "executor_session_expired",
            "executor_patient_not_found",
        ])
    }
}

/// Delays between attempts of an idempotent call. Two entries means three attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    delays: Vec<Duration>,
}

impl BackoffPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(vec![Duration::from_secs(2), Duration::from_secs(10)])
    }
}

/// Run an idempotent call, sleeping through the policy's delays while `retry_if` accepts
/// the error. Only safe for lookups; the caller's thread is blocked while waiting.
pub fn retry_idempotent<T, E, F, P>(
    policy: &BackoffPolicy,
    operation: &str,
    mut call: F,
    retry_if: P,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut delays = policy.delays().iter();
    let mut attempt = 1;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(error) => {
                let delay = match delays.next() {
                    Some(delay) if retry_if(&error) => *delay,
                    _ => return Err(error),
                };
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying idempotent call"
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}
