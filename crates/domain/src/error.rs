/// Reasons a proposed webhook URL was rejected by the safety layer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlRejection {
    #[error("scheme not allowed: {0}")]
    SchemeNotAllowed(String),
    #[error("hostname blocked: {0}")]
    HostnameBlocked(String),
    #[error("DNS resolution failed for {0}")]
    DnsFailure(String),
    #[error("resolved address is blocked: {0}")]
    IpBlocked(String),
    #[error("redirect blocked: target={0}")]
    RedirectBlocked(String),
}

/// Shared error type used across the scheduling engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid time: {0}")]
    InvalidTime(String),

    #[error("invalid cron: {0}")]
    InvalidCron(String),

    #[error("url rejected: {0}")]
    UrlRejected(#[from] UrlRejection),

    #[error("payload too large: {0} bytes exceeds cap of {1}")]
    PayloadTooLarge(usize, usize),

    #[error("payload invalid: {0}")]
    PayloadInvalid(String),

    #[error("too many active tasks for session (cap {0})")]
    TooManyActive(usize),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("illegal state transition: {0}")]
    IllegalStateTransition(String),

    #[error("rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("callback failure: {0}")]
    CallbackFailure(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable short name matching the spec's error-kind vocabulary;
    /// used in tool responses and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "InvalidInput",
            Error::InvalidTime(_) => "InvalidTime",
            Error::InvalidCron(_) => "InvalidCron",
            Error::UrlRejected(_) => "UrlRejected",
            Error::PayloadTooLarge(..) => "PayloadTooLarge",
            Error::PayloadInvalid(_) => "PayloadInvalid",
            Error::TooManyActive(_) => "TooManyActive",
            Error::NotFound(_) => "NotFound",
            Error::IllegalStateTransition(_) => "IllegalStateTransition",
            Error::RateLimited(_) => "RateLimited",
            Error::Timeout(_) => "Timeout",
            Error::CallbackFailure(_) => "CallbackFailure",
            Error::StoreError(_) => "StoreError",
            Error::Io(_) | Error::Json(_) => "Internal",
        }
    }

    /// True for errors whose detail is safe to hand back to a caller
    /// verbatim (validation-layer errors). `StoreError` and the `Io`/
    /// `Json` variants are internal-detail and get genericized at the
    /// HTTP boundary instead.
    pub fn is_caller_safe(&self) -> bool {
        !matches!(self, Error::StoreError(_) | Error::Io(_) | Error::Json(_))
    }

    /// The message to hand to an external caller: the real message
    /// for caller-safe kinds, a generic message otherwise (unless
    /// `development` explicitly enables raw messages).
    pub fn public_message(&self, development: bool) -> String {
        if self.is_caller_safe() || development {
            self.to_string()
        } else {
            "An error occurred processing your request".to_string()
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_is_not_caller_safe() {
        let e = Error::StoreError("disk full".into());
        assert!(!e.is_caller_safe());
        assert_eq!(e.public_message(false), "An error occurred processing your request");
        assert_eq!(e.public_message(true), "store error: disk full");
    }

    #[test]
    fn invalid_input_is_caller_safe() {
        let e = Error::InvalidInput("missing name".into());
        assert!(e.is_caller_safe());
        assert_eq!(e.public_message(false), "invalid input: missing name");
    }

    #[test]
    fn kind_names_match_spec_vocabulary() {
        assert_eq!(Error::NotFound("x".into()).kind(), "NotFound");
        assert_eq!(Error::RateLimited(30).kind(), "RateLimited");
        assert_eq!(
            Error::UrlRejected(UrlRejection::DnsFailure("x".into())).kind(),
            "UrlRejected"
        );
    }
}
