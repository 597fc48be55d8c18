//! Retry with exponential backoff for transient inference failures.

use std::any::Any;
use std::error::Error;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use court::CollaboratorError;

/// How often, and how patiently, a failed call is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Whether an error message looks like a transient backend condition.
pub fn is_transient_error(err_str: &str) -> bool {
    let err_lower = err_str.to_ascii_lowercase();
    // HTTP status codes
    err_str.contains("429")
        || err_str.contains("502")
        || err_str.contains("503")
        || err_str.contains("504")
        || err_lower.contains("rate limit")
        || err_lower.contains("resource_exhausted")
        // Connection-level failures (reqwest)
        || err_lower.contains("connection")
        || err_lower.contains("timed out")
        || err_lower.contains("timeout")
        || err_lower.contains("error sending request")
        || err_lower.contains("broken pipe")
        || err_lower.contains("reset by peer")
}

/// The first [`CollaboratorError`] in `err`'s source chain.
fn find_collaborator_error<'a>(err: &'a (dyn Error + 'static)) -> Option<&'a CollaboratorError> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(known) = e.downcast_ref::<CollaboratorError>() {
            return Some(known);
        }
        current = e.source();
    }
    None
}

/// Map a failed prompt to the engine's error taxonomy.
///
/// A [`CollaboratorError`] anywhere in the source chain is kept as is;
/// anything else is classified by its message.
pub fn classify(err: &(dyn Error + 'static)) -> CollaboratorError {
    match find_collaborator_error(err) {
        Some(known) => known.clone(),
        None => classify_message(&err.to_string()),
    }
}

/// Classify an error by its message alone.
pub fn classify_message(err_str: &str) -> CollaboratorError {
    let err_lower = err_str.to_ascii_lowercase();
    if err_str.contains("429")
        || err_lower.contains("rate limit")
        || err_lower.contains("resource_exhausted")
    {
        CollaboratorError::RateLimited(err_str.to_string())
    } else {
        CollaboratorError::Inference(err_str.to_string())
    }
}

/// Whether `err` is worth another attempt. A [`CollaboratorError`] answers
/// for itself; anything else goes by its message.
fn should_retry<E: Display + 'static>(err: &E, err_str: &str) -> bool {
    match (err as &dyn Any).downcast_ref::<CollaboratorError>() {
        Some(known) => known.is_retriable(),
        None => is_transient_error(err_str),
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
///
/// `label` names the call in log lines.
pub async fn retry_transient<T, E, F, Fut>(label: &str, policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Display + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        let err_str = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let err_str = err.to_string();
                if attempt >= policy.max_retries || !should_retry(&err, &err_str) {
                    return Err(err);
                }
                err_str
            }
        };

        let backoff = policy.backoff(attempt);
        warn!(
            call = label,
            attempt = attempt + 1,
            max_retries = policy.max_retries,
            backoff_ms = backoff.as_millis() as u64,
            error = %err_str,
            "Transient error, retrying"
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}
