use std::time::Duration;
use topgg_core::{ApiError, CoreError, ErrorExt};

/// Longest server-requested wait honoured by [`RetryConfig::fail_fast`].
pub const FAIL_FAST_THRESHOLD: Duration = Duration::from_secs(5);

/// Configuration for the pipeline's single automatic retry.
#[derive(Debug, Clone, Default)]
pub struct RetryConfig {
    /// Waits longer than this surface `Ratelimited` instead of retrying.
    /// `None` always waits.
    pub max_retry_wait: Option<Duration>,
}

impl RetryConfig {
    pub fn fail_fast() -> Self {
        Self {
            max_retry_wait: Some(FAIL_FAST_THRESHOLD),
        }
    }

    pub fn strategy_for(&self, error: &CoreError) -> RetryStrategy {
        match retry_strategy(error) {
            RetryStrategy::RetryAfter(wait) => match self.max_retry_wait {
                Some(limit) if wait > limit => RetryStrategy::NoRetry,
                _ => RetryStrategy::RetryAfter(wait),
            },
            RetryStrategy::NoRetry => RetryStrategy::NoRetry,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Wait out the server's penalty, then retry once.
    RetryAfter(Duration),
    NoRetry,
}

/// Only rate limiting resolves itself by waiting. Auth failures, missing
/// resources and 5xx responses are surfaced to the caller.
pub fn retry_strategy(error: &CoreError) -> RetryStrategy {
    match error {
        CoreError::Api(ApiError::Ratelimited { retry_after }) => {
            RetryStrategy::RetryAfter(*retry_after)
        }
        _ if error.is_retryable() => match error.retry_after() {
            Some(wait) => RetryStrategy::RetryAfter(wait),
            None => RetryStrategy::NoRetry,
        },
        _ => RetryStrategy::NoRetry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratelimited(secs: u64) -> CoreError {
        CoreError::Api(ApiError::Ratelimited {
            retry_after: Duration::from_secs(secs),
        })
    }

    #[test]
    fn test_strategy_by_error_type() {
        assert_eq!(
            retry_strategy(&ratelimited(3)),
            RetryStrategy::RetryAfter(Duration::from_secs(3))
        );

        let unauthorized = CoreError::Api(ApiError::Unauthorized {
            reason: "bad token".to_string(),
        });
        assert_eq!(retry_strategy(&unauthorized), RetryStrategy::NoRetry);

        let server_error = CoreError::Api(ApiError::ServerError { status_code: 503 });
        assert_eq!(retry_strategy(&server_error), RetryStrategy::NoRetry);
    }

    #[test]
    fn test_default_always_waits() {
        let config = RetryConfig::default();
        assert_eq!(
            config.strategy_for(&ratelimited(3600)),
            RetryStrategy::RetryAfter(Duration::from_secs(3600))
        );
    }

    #[test]
    fn test_fail_fast_threshold() {
        let config = RetryConfig::fail_fast();
        assert_eq!(
            config.strategy_for(&ratelimited(5)),
            RetryStrategy::RetryAfter(Duration::from_secs(5))
        );
        assert_eq!(config.strategy_for(&ratelimited(6)), RetryStrategy::NoRetry);
    }
}
