use crate::error::ClientError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const BACKOFF_CAP_MS: i64 = 5_000;

/// Backoff window `(min, max)` in milliseconds after `failures` consecutive failures.
pub fn backoff_bounds(failures: u32) -> (u64, u64) {
    let n = i64::from(failures);
    let max = (500 + 2_000 * n).min(BACKOFF_CAP_MS);
    let min = (2_000 * (n - 1)).max(250).min(BACKOFF_CAP_MS);
    (min as u64, max.max(min) as u64)
}

/// Randomized reconnect/retry delay for the given consecutive-failure count.
pub fn retry_interval(failures: u32) -> Duration {
    let (min, max) = backoff_bounds(failures);
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("retry handler aborted due to value change")]
    Aborted,
    #[error("reached maximum amount of retries after {attempts} attempts")]
    LimitReached {
        attempts: u32,
        #[source]
        last: E,
    },
    #[error(transparent)]
    Failed(E),
}

impl From<RetryError<ClientError>> for ClientError {
    fn from(err: RetryError<ClientError>) -> Self {
        match err {
            RetryError::Aborted => ClientError::RetryAborted,
            RetryError::LimitReached { attempts, last } => ClientError::RetryLimitReached {
                attempts,
                source: Box::new(last),
            },
            RetryError::Failed(e) => e,
        }
    }
}

type Predicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

pub struct RetryOptions<E> {
    /// Retries after the first call; the operation runs at most `retry_attempts + 1` times.
    pub retry_attempts: u32,
    pub is_retryable: Predicate<E>,
    pub delay_between_retries: Box<dyn Fn(u32) -> Duration + Send + Sync>,
    pub did_value_change: Box<dyn Fn() -> bool + Send + Sync>,
}

impl<E> RetryOptions<E> {
    pub fn new(retry_attempts: u32) -> Self {
        Self {
            retry_attempts,
            is_retryable: Box::new(|_| true),
            delay_between_retries: Box::new(retry_interval),
            did_value_change: Box::new(|| false),
        }
    }

    pub fn with_is_retryable(mut self, f: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.is_retryable = Box::new(f);
        self
    }

    pub fn with_delay(mut self, f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.delay_between_retries = Box::new(f);
        self
    }

    pub fn with_did_value_change(mut self, f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.did_value_change = Box::new(f);
        self
    }
}

/// Runs `f` until it succeeds, fails with a non-retryable error, or attempts run out.
///
/// `did_value_change` is checked before every attempt and after every failure; a `true`
/// aborts the whole operation.
pub async fn retry<T, E, F, Fut>(mut f: F, options: RetryOptions<E>) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        if (options.did_value_change)() {
            return Err(RetryError::Aborted);
        }

        let err = match f().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if (options.did_value_change)() {
            return Err(RetryError::Aborted);
        }
        if !(options.is_retryable)(&err) {
            return Err(RetryError::Failed(err));
        }
        if attempt >= options.retry_attempts {
            warn!(attempts = attempt + 1, "Giving up: {err}");
            return Err(RetryError::LimitReached {
                attempts: attempt + 1,
                last: err,
            });
        }

        attempt += 1;
        let delay = (options.delay_between_retries)(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying after: {err}");
        tokio::time::sleep(delay).await;
    }
}
