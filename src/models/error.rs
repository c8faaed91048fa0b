//! Error types for evalsynth.
//!
//! Only unrecoverable conditions surface as errors (bad configuration,
//! unwritable output, unreadable checkpoint). Everything that can go wrong
//! inside a single batch window degrades to "fewer records" instead.

use thiserror::Error;

/// Top-level error type for evalsynth.
#[derive(Debug, Error)]
pub enum EvalsynthError {
    // ═══════════════════════════════════════════════════════════════════
    // Expected failures (bad input, bad configuration)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // Infrastructure failures (network, provider, filesystem)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Invariant violations
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors reported by a model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Authentication failed for {provider}: invalid API key")]
    AuthenticationFailed { provider: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Rate limited by {provider}: {message}")]
    RateLimited {
        provider: String,
        message: String,
        retry_after_secs: Option<f64>,
    },

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl EvalsynthError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::RateLimited { .. }
                | Self::Network(_)
                | Self::Provider(ProviderError::RateLimited { .. })
        )
    }

    /// Get retry delay hint in seconds, if applicable.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::Provider(ProviderError::RateLimited {
                retry_after_secs, ..
            }) => *retry_after_secs,
            _ => None,
        }
    }
}

/// Result type alias for evalsynth.
pub type Result<T> = std::result::Result<T, EvalsynthError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_classification() {
        assert!(EvalsynthError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(
            EvalsynthError::Provider(ProviderError::RateLimited {
                provider: "openai".to_string(),
                message: "slow down".to_string(),
                retry_after_secs: Some(3.0),
            })
            .is_retryable()
        );
        assert!(
            !EvalsynthError::Provider(ProviderError::AuthenticationFailed {
                provider: "openai".to_string(),
            })
            .is_retryable()
        );
        assert!(!EvalsynthError::InvalidInput("x".to_string()).is_retryable());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = EvalsynthError::RateLimited {
            retry_after_secs: 2.5,
        };
        assert_eq!(err.retry_after(), Some(2.5));

        let err = EvalsynthError::Provider(ProviderError::RateLimited {
            provider: "grok".to_string(),
            message: "busy".to_string(),
            retry_after_secs: None,
        });
        assert_eq!(err.retry_after(), None);
        assert_eq!(EvalsynthError::Internal("x".into()).retry_after(), None);
    }
}
