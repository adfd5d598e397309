//! Provider failure taxonomy.
//!
//! The retry state machine branches on tags, never on message text.
//! Raw provider error strings are folded into a [`ProviderFault`] in
//! exactly one place, [`ProviderFault::classify`], so the keyword
//! table stays an implementation detail of this module.

/// What went wrong upstream, as far as we can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFault {
    /// Capacity or rate-limit pushback. Worth retrying after backoff.
    RateLimited,
    /// The provider explicitly timed out the render. Retrying the same
    /// request tends to time out again, so this is terminal.
    Timeout,
    /// Credentials rejected.
    Unauthorized,
    /// The provider rejected the request itself.
    BadRequest,
    /// Upstream internal error.
    ServerError,
    /// Anything we could not classify, including empty or malformed
    /// responses. Treated as transient.
    Unknown,
}

impl ProviderFault {
    /// Fold raw provider error text into a fault tag.
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();

        if lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("quota")
            || lower.contains("429")
        {
            ProviderFault::RateLimited
        } else if lower.contains("timeout") || lower.contains("timed out") {
            ProviderFault::Timeout
        } else if lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("api key")
            || lower.contains("401")
            || lower.contains("403")
        {
            ProviderFault::Unauthorized
        } else if lower.contains("bad request")
            || lower.contains("invalid")
            || lower.contains("400")
        {
            ProviderFault::BadRequest
        } else if lower.contains("internal server")
            || lower.contains("unavailable")
            || lower.contains("bad gateway")
            || lower.contains("500")
            || lower.contains("502")
            || lower.contains("503")
        {
            ProviderFault::ServerError
        } else {
            ProviderFault::Unknown
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderFault::RateLimited | ProviderFault::ServerError | ProviderFault::Unknown
        )
    }
}

/// Error type for provider calls. The retry controller looks only at
/// which variant it gets; the message is kept verbatim for the job's
/// error detail field.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Transient failure. Worth another attempt after backoff.
    #[error("{message}")]
    Retryable {
        fault: ProviderFault,
        message: String,
    },

    /// Permanent failure. Further attempts are pointless.
    #[error("{message}")]
    Terminal {
        fault: ProviderFault,
        message: String,
    },
}

impl ProviderError {
    /// Build an error from raw provider text, classifying it and
    /// picking the variant from the fault's retryability.
    pub fn from_text(message: impl Into<String>) -> Self {
        let message = message.into();
        let fault = ProviderFault::classify(&message);
        Self::with_fault(fault, message)
    }

    /// Build an error with an already-known fault tag.
    pub fn with_fault(fault: ProviderFault, message: impl Into<String>) -> Self {
        let message = message.into();
        if fault.is_retryable() {
            ProviderError::Retryable { fault, message }
        } else {
            ProviderError::Terminal { fault, message }
        }
    }

    pub fn fault(&self) -> ProviderFault {
        match self {
            ProviderError::Retryable { fault, .. } | ProviderError::Terminal { fault, .. } => {
                *fault
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ProviderError::Retryable { message, .. } | ProviderError::Terminal { message, .. } => {
                message
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_keywords() {
        assert_eq!(
            ProviderFault::classify("Rate limit exceeded, try later"),
            ProviderFault::RateLimited
        );
        assert_eq!(
            ProviderFault::classify("render timed out after 300s"),
            ProviderFault::Timeout
        );
        assert_eq!(
            ProviderFault::classify("401 Unauthorized"),
            ProviderFault::Unauthorized
        );
        assert_eq!(
            ProviderFault::classify("invalid prompt parameter"),
            ProviderFault::BadRequest
        );
        assert_eq!(
            ProviderFault::classify("502 Bad Gateway"),
            ProviderFault::ServerError
        );
        assert_eq!(ProviderFault::classify(""), ProviderFault::Unknown);
        assert_eq!(
            ProviderFault::classify("something novel happened"),
            ProviderFault::Unknown
        );
    }

    #[test]
    fn test_retryability_split() {
        assert!(ProviderFault::RateLimited.is_retryable());
        assert!(ProviderFault::ServerError.is_retryable());
        assert!(ProviderFault::Unknown.is_retryable());
        assert!(!ProviderFault::Timeout.is_retryable());
        assert!(!ProviderFault::Unauthorized.is_retryable());
        assert!(!ProviderFault::BadRequest.is_retryable());
    }

    #[test]
    fn test_from_text_picks_variant() {
        let transient = ProviderError::from_text("quota exhausted");
        assert!(transient.is_retryable());
        assert_eq!(transient.fault(), ProviderFault::RateLimited);

        let fatal = ProviderError::from_text("request timed out");
        assert!(!fatal.is_retryable());
        assert_eq!(fatal.message(), "request timed out");
    }
}
