use thiserror::Error;

/// A recognised problem with the user's text. The message is shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("✍️ Tell me what to remind you about, for example \"tomorrow at 9pm call mom\".")]
    Empty,

    #[error("⏰ When should I remind you? Add a time like \"in 2 hours\" or \"tomorrow at 9am\".")]
    NoTime,

    #[error("🤔 \"{0}\" doesn't look like a valid time of day.")]
    InvalidClock(String),

    #[error("⌛ {0} has already passed today. Did you mean tomorrow?")]
    InPast(String),

    #[error("🚀 That is too far in the future for me to remember.")]
    TooFar,
}

/// Failure of an out-of-band send through the platform API.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("platform API error {code}: {message}")]
    Api { code: i64, message: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("side-channel delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_is_user_facing_text() {
        let err = ParseError::InvalidClock("25:00".to_string());
        assert_eq!(
            err.to_string(),
            "🤔 \"25:00\" doesn't look like a valid time of day."
        );
    }

    #[test]
    fn test_dispatch_error_conversions() {
        let err: DispatchError = ParseError::NoTime.into();
        assert!(matches!(err, DispatchError::Parse(ParseError::NoTime)));

        let err: DispatchError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, DispatchError::Internal(_)));
        assert_eq!(err.to_string(), "disk full");

        let err: DispatchError = DeliveryError::Api {
            code: 45015,
            message: "response out of time limit".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "side-channel delivery failed: platform API error 45015: response out of time limit"
        );
    }
}
