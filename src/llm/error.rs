use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for provider calls. The retry executor decides what to do
/// from the variant alone, never from the underlying error's type.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429 from the provider.
    #[error("rate limit exceeded: {message}")]
    RateLimited { message: String },

    /// Connection, DNS, or timeout failure before a response arrived.
    #[error("connection error: {0}")]
    Transport(String),

    /// Any other non-success HTTP status.
    #[error("API status error: {status} - {message}")]
    Status { status: u16, message: String },

    /// A 2xx response whose body did not match the expected shape.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// Misconfiguration caught at construction time (missing API key,
    /// malformed header value, tokenizer init failure).
    #[error("provider configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Transient failures are worth retrying: rate limits, transport
    /// failures, and server faults (5xx). Client faults (4xx) and anything
    /// unclassified are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } | ProviderError::Transport(_) => true,
            ProviderError::Status { status, .. } => (500..=599).contains(status),
            ProviderError::InvalidResponse(_) | ProviderError::Config(_) => false,
        }
    }
}

/// Retry decision table: `Some(delay)` means sleep and try again, `None`
/// means surface the failure. Backoff is `2^attempt` seconds with no jitter;
/// the system is single-user so thundering herd is out of scope.
pub fn backoff_delay(err: &ProviderError, attempt: u32, max_retries: u32) -> Option<Duration> {
    if !err.is_transient() {
        return None;
    }
    if attempt + 1 >= max_retries {
        return None;
    }
    Some(Duration::from_secs(1u64 << attempt.min(32)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limited() -> ProviderError {
        ProviderError::RateLimited {
            message: "slow down".to_string(),
        }
    }

    #[test]
    fn transient_classification() {
        assert!(rate_limited().is_transient());
        assert!(ProviderError::Transport("connection refused".to_string()).is_transient());
        assert!(ProviderError::Status {
            status: 500,
            message: String::new()
        }
        .is_transient());
        assert!(ProviderError::Status {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!ProviderError::Status {
            status: 404,
            message: String::new()
        }
        .is_transient());
        assert!(!ProviderError::Status {
            status: 400,
            message: String::new()
        }
        .is_transient());
        assert!(!ProviderError::InvalidResponse("empty choices".to_string()).is_transient());
        assert!(!ProviderError::Config("missing key".to_string()).is_transient());
    }

    #[test]
    fn backoff_grows_exponentially() {
        let err = rate_limited();
        assert_eq!(backoff_delay(&err, 0, 4), Some(Duration::from_secs(1)));
        assert_eq!(backoff_delay(&err, 1, 4), Some(Duration::from_secs(2)));
        assert_eq!(backoff_delay(&err, 2, 4), Some(Duration::from_secs(4)));
    }

    #[test]
    fn backoff_stops_when_attempts_exhausted() {
        let err = rate_limited();
        assert_eq!(backoff_delay(&err, 2, 3), None);
        assert_eq!(backoff_delay(&err, 5, 3), None);
    }

    #[test]
    fn no_backoff_for_permanent_failures() {
        let not_found = ProviderError::Status {
            status: 404,
            message: String::new(),
        };
        assert_eq!(backoff_delay(&not_found, 0, 3), None);

        let bad_body = ProviderError::InvalidResponse("garbage".to_string());
        assert_eq!(backoff_delay(&bad_body, 0, 3), None);
    }
}
