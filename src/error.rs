use thiserror::Error;

/// Broad class of a failure, used by the UI to choose between a "retry"
/// affordance (connectivity) and an "upsell/explain" affordance (quota).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connectivity,
    Quota,
    Authentication,
    Backend,
    Internal,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("No reachable backend endpoint ({attempted} candidates tried)")]
    NoReachableEndpoint { attempted: usize },

    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: usize },

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Chat has expired")]
    ChatExpired,

    #[error("Daily message limit reached")]
    DailyLimitReached,

    #[error("No clips remaining")]
    NoClipsRemaining,

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Backend error {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::NoReachableEndpoint { .. }
            | ClientError::RateLimitExceeded { .. }
            | ClientError::RequestTimeout
            | ClientError::Network(_) => ErrorKind::Connectivity,
            ClientError::ChatExpired
            | ClientError::DailyLimitReached
            | ClientError::NoClipsRemaining => ErrorKind::Quota,
            ClientError::AuthenticationRequired => ErrorKind::Authentication,
            ClientError::Backend { .. } | ClientError::Decode(_) => ErrorKind::Backend,
            ClientError::Config(_) | ClientError::Validation(_) | ClientError::Cancelled => {
                ErrorKind::Internal
            }
        }
    }

    /// True when the server signalled overload (HTTP 429), either through the
    /// status code or through the message text of a passthrough error.
    pub fn is_rate_limit_signal(&self) -> bool {
        match self {
            ClientError::Backend { status: 429, .. } => true,
            ClientError::Backend { message, .. } | ClientError::Network(message) => {
                let lower = message.to_lowercase();
                lower.contains("429")
                    || lower.contains("too many requests")
                    || lower.contains("rate limit")
            }
            _ => false,
        }
    }

    /// Failures that mean the resolved endpoint may have gone away.
    pub fn is_connectivity_failure(&self) -> bool {
        matches!(self, ClientError::Network(_) | ClientError::RequestTimeout)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::RequestTimeout
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let config_err = config::ConfigError::NotFound(String::from("backend.primary_url"));
        let err: ClientError = config_err.into();
        assert!(matches!(err, ClientError::Config(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ClientError = json_err.into();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(ClientError::NoReachableEndpoint { attempted: 3 }.kind(), ErrorKind::Connectivity);
        assert_eq!(ClientError::RateLimitExceeded { attempts: 5 }.kind(), ErrorKind::Connectivity);
        assert_eq!(ClientError::RequestTimeout.kind(), ErrorKind::Connectivity);
        assert_eq!(ClientError::ChatExpired.kind(), ErrorKind::Quota);
        assert_eq!(ClientError::DailyLimitReached.kind(), ErrorKind::Quota);
        assert_eq!(ClientError::NoClipsRemaining.kind(), ErrorKind::Quota);
        assert_eq!(ClientError::AuthenticationRequired.kind(), ErrorKind::Authentication);

        let err = ClientError::Backend { status: 404, message: "not found".into() };
        assert_eq!(err.kind(), ErrorKind::Backend);
    }

    #[test]
    fn test_rate_limit_signal_detection() {
        let err = ClientError::Backend { status: 429, message: String::new() };
        assert!(err.is_rate_limit_signal());

        let err = ClientError::Backend { status: 500, message: "Too Many Requests".into() };
        assert!(err.is_rate_limit_signal());

        let err = ClientError::Network("upstream said 429".into());
        assert!(err.is_rate_limit_signal());

        let err = ClientError::Backend { status: 404, message: "not found".into() };
        assert!(!err.is_rate_limit_signal());
        assert!(!ClientError::RequestTimeout.is_rate_limit_signal());
        assert!(!ClientError::DailyLimitReached.is_rate_limit_signal());
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::Backend { status: 500, message: "boom".into() };
        assert_eq!(err.to_string(), "Backend error 500: boom");

        let err = ClientError::NoReachableEndpoint { attempted: 6 };
        assert_eq!(err.to_string(), "No reachable backend endpoint (6 candidates tried)");
    }
}
