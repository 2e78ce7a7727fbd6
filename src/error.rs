use thiserror::Error;

use crate::types::Platform;

/// Maximum length of backend diagnostic text carried inside an error message.
pub const DIAGNOSTIC_LIMIT: usize = 200;

/// Errors produced by adapters, the poller, and the orchestrator.
///
/// Every backend maps its own wire-level failure signals into this one
/// taxonomy, so callers never branch on backend identity. The `Display`
/// output is the human-readable message surfaced to the user.
#[derive(Error, Debug)]
pub enum TransformError {
    /// The credential for this platform was never configured.
    #[error("{platform} API key not found. Add {env_var} to your .env file.")]
    CredentialMissing {
        platform: Platform,
        env_var: &'static str,
    },

    /// The platform rejected the configured credential.
    #[error("{platform} API key is invalid. Check your key.")]
    CredentialInvalid { platform: Platform },

    /// Billing or quota is exhausted on the platform account.
    #[error("No credit left on your {platform} account. Check your billing settings.")]
    QuotaExhausted { platform: Platform },

    /// Too many requests in too little time.
    #[error("{platform} rate limit exceeded. Wait a few seconds and try again.")]
    RateLimited { platform: Platform },

    /// The platform reported a server-side error.
    #[error("{platform} server error (HTTP {status}). Please try again in a few minutes.")]
    TransientServer { platform: Platform, status: u16 },

    /// The call exceeded the adapter's wall-clock ceiling.
    #[error("{platform} timeout: processing did not complete within {seconds} seconds.")]
    Timeout { platform: Platform, seconds: u64 },

    /// The response arrived but was missing expected fields or undecodable.
    #[error("Unexpected response from {platform}: {detail}")]
    MalformedResponse { platform: Platform, detail: String },

    /// The platform's content filter rejected the generation.
    #[error("Caught by the {platform} content filter. Please change your prompt.")]
    ContentPolicyRejected { platform: Platform },

    /// The local device ran out of memory during inference. Recoverable.
    #[error("Insufficient GPU memory. Try a smaller image or lower the strength value.")]
    DeviceOutOfMemory,

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// The input image could not be decoded or failed upload validation.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Invalid configuration or unsupported operation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transformation strength outside the supported range.
    #[error("Strength {0:.2} is outside the supported range 0.3 to 0.9.")]
    StrengthOutOfRange(f32),

    /// A second batch was submitted while one is still running.
    #[error("A batch is already running. Wait for it to finish before submitting another.")]
    BatchInFlight,

    /// Catch-all with truncated diagnostic text from the backend.
    #[error("{platform} error: {detail}")]
    Unknown { platform: Platform, detail: String },
}

/// Internal failure classification, uniform across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Credential,
    Quota,
    RateLimit,
    TransientServer,
    Timeout,
    MalformedResponse,
    ContentPolicy,
    DeviceMemory,
    Network,
    Precondition,
    Unknown,
}

impl TransformError {
    /// Classify this error into its uniform failure kind.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::CredentialMissing { .. } | Self::CredentialInvalid { .. } => {
                FailureKind::Credential
            }
            Self::QuotaExhausted { .. } => FailureKind::Quota,
            Self::RateLimited { .. } => FailureKind::RateLimit,
            Self::TransientServer { .. } => FailureKind::TransientServer,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::MalformedResponse { .. } => FailureKind::MalformedResponse,
            Self::ContentPolicyRejected { .. } => FailureKind::ContentPolicy,
            Self::DeviceOutOfMemory => FailureKind::DeviceMemory,
            Self::Network { .. } => FailureKind::Network,
            Self::InvalidImage(_)
            | Self::InvalidConfig(_)
            | Self::StrengthOutOfRange(_)
            | Self::BatchInFlight => FailureKind::Precondition,
            Self::Unknown { .. } => FailureKind::Unknown,
        }
    }

    /// Default mapping from an HTTP status code to a failure.
    ///
    /// Adapters with backend-specific cases (engine-not-found, plan
    /// permissions) handle those first and fall back to this table.
    pub fn from_status(platform: Platform, status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::CredentialInvalid { platform },
            402 => Self::QuotaExhausted { platform },
            429 => Self::RateLimited { platform },
            500..=599 => Self::TransientServer { platform, status },
            _ => Self::Unknown {
                platform,
                detail: format!("HTTP {}: {}", status, truncate_diagnostic(body, DIAGNOSTIC_LIMIT)),
            },
        }
    }

    /// Map a `reqwest` send error, folding client-side timeouts into the
    /// uniform `Timeout` variant.
    pub fn from_request_error(platform: Platform, seconds: u64, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { platform, seconds }
        } else {
            Self::Network {
                context: format!("{} connection error", platform),
                source,
            }
        }
    }
}

/// Truncate diagnostic text to `max` characters on a char boundary.
pub fn truncate_diagnostic(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, TransformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let p = Platform::DeepAi;
        assert_eq!(
            TransformError::from_status(p, 401, "").kind(),
            FailureKind::Credential
        );
        assert_eq!(
            TransformError::from_status(p, 402, "").kind(),
            FailureKind::Quota
        );
        assert_eq!(
            TransformError::from_status(p, 429, "").kind(),
            FailureKind::RateLimit
        );
        assert_eq!(
            TransformError::from_status(p, 500, "").kind(),
            FailureKind::TransientServer
        );
        assert_eq!(
            TransformError::from_status(p, 418, "teapot").kind(),
            FailureKind::Unknown
        );
    }

    #[test]
    fn test_unknown_carries_truncated_body() {
        let body = "x".repeat(500);
        let err = TransformError::from_status(Platform::Replicate, 418, &body);
        let msg = err.to_string();
        assert!(msg.len() < 300);
        assert!(msg.contains("HTTP 418"));
    }

    #[test]
    fn test_truncate_diagnostic() {
        assert_eq!(truncate_diagnostic("short", 10), "short");
        let long = "a".repeat(20);
        let cut = truncate_diagnostic(&long, 10);
        assert_eq!(cut, format!("{}...", "a".repeat(10)));
        // multi-byte input must not split a char
        let emoji = "é".repeat(20);
        assert!(truncate_diagnostic(&emoji, 5).starts_with("ééééé"));
    }

    #[test]
    fn test_every_message_is_non_empty() {
        let p = Platform::StabilityAi;
        let errors = vec![
            TransformError::CredentialMissing {
                platform: p,
                env_var: "STABILITY_API_KEY",
            },
            TransformError::CredentialInvalid { platform: p },
            TransformError::QuotaExhausted { platform: p },
            TransformError::RateLimited { platform: p },
            TransformError::TransientServer {
                platform: p,
                status: 502,
            },
            TransformError::Timeout {
                platform: p,
                seconds: 120,
            },
            TransformError::MalformedResponse {
                platform: p,
                detail: "missing artifacts".into(),
            },
            TransformError::ContentPolicyRejected { platform: p },
            TransformError::DeviceOutOfMemory,
            TransformError::InvalidImage("not a png".into()),
            TransformError::InvalidConfig("bad".into()),
            TransformError::StrengthOutOfRange(0.95),
            TransformError::BatchInFlight,
            TransformError::Unknown {
                platform: p,
                detail: "mystery".into(),
            },
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }
}
