use thiserror::Error;

use crate::retry::RetryAttempt;

/// Phrases providers use for throttling or overload, in bodies and CLI output.
const RATE_LIMIT_SIGNATURES: [&str; 5] = [
    "rate limit",
    "rate_limit",
    "too many requests",
    "overloaded",
    "temporarily unavailable",
];

pub(crate) fn looks_rate_limited(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    RATE_LIMIT_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Failure of one provider call. Cloneable so callers coalesced onto the same
/// in-flight request all receive it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Provider response parse error: {0}")]
    Parse(String),

    #[error("Provider timed out after {0} ms")]
    Timeout(u64),

    #[error("Claude CLI error: {0}")]
    Cli(String),

    #[error("Circuit open for {provider}, next attempt in {retry_in_ms} ms")]
    CircuitOpen { provider: String, retry_in_ms: u64 },

    #[error("{provider} failed after {} attempts", .attempts.len())]
    RetryExhausted {
        provider: String,
        attempts: Vec<RetryAttempt>,
    },
}

impl ProviderError {
    /// Map a non-success HTTP status and its body to an error.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message: String = body.chars().take(500).collect();
        match status {
            401 | 403 => ProviderError::Auth(message),
            429 => ProviderError::RateLimited(message),
            _ if looks_rate_limited(body) => ProviderError::RateLimited(message),
            400 | 404 | 422 => ProviderError::Validation(format!("HTTP {status}: {message}")),
            _ => ProviderError::Http { status, message },
        }
    }

    /// Short machine-readable cause, used in exclusion records and logs.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Network(_) => "network",
            ProviderError::Http { .. } => "http",
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::Auth(_) => "auth",
            ProviderError::Validation(_) => "validation",
            ProviderError::Parse(_) => "parse",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Cli(_) => "cli",
            ProviderError::CircuitOpen { .. } => "circuit_open",
            ProviderError::RetryExhausted { .. } => "retry_exhausted",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_) | ProviderError::Timeout(_) | ProviderError::RateLimited(_) => {
                true
            }
            ProviderError::Http { status, message } => {
                matches!(status, 408 | 429) || *status >= 500 || looks_rate_limited(message)
            }
            ProviderError::Cli(message) => looks_rate_limited(message),
            ProviderError::Auth(_)
            | ProviderError::Validation(_)
            | ProviderError::Parse(_)
            | ProviderError::CircuitOpen { .. }
            | ProviderError::RetryExhausted { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(ProviderError::from_status(401, "bad key"), ProviderError::Auth(_)));
        assert!(matches!(
            ProviderError::from_status(429, ""),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            ProviderError::from_status(400, "{\"error\":\"Rate limit reached\"}"),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            ProviderError::from_status(400, "max_tokens too large"),
            ProviderError::Validation(_)
        ));
        assert!(matches!(
            ProviderError::from_status(503, "down"),
            ProviderError::Http { status: 503, .. }
        ));
    }

    #[test]
    fn retryability() {
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(ProviderError::Timeout(30_000).is_retryable());
        assert!(ProviderError::Http { status: 502, message: String::new() }.is_retryable());
        assert!(ProviderError::Http { status: 408, message: String::new() }.is_retryable());
        assert!(ProviderError::Http {
            status: 529,
            message: "Overloaded".into()
        }
        .is_retryable());
        assert!(ProviderError::Cli("API Error: overloaded_error".into()).is_retryable());

        assert!(!ProviderError::Auth("bad key".into()).is_retryable());
        assert!(!ProviderError::Validation("bad prompt".into()).is_retryable());
        assert!(!ProviderError::Cli("command not found".into()).is_retryable());
        assert!(!ProviderError::CircuitOpen {
            provider: "claude".into(),
            retry_in_ms: 100
        }
        .is_retryable());
    }

    #[test]
    fn exhausted_message_counts_attempts() {
        let err = ProviderError::RetryExhausted {
            provider: "openai".into(),
            attempts: (1..=2)
                .map(|n| RetryAttempt {
                    attempt_number: n,
                    delay_ms: 0,
                    error: Some("HTTP 503: down".into()),
                    timestamp: chrono::Utc::now(),
                })
                .collect(),
        };
        assert_eq!(err.to_string(), "openai failed after 2 attempts");
        assert_eq!(err.code(), "retry_exhausted");
    }
}
