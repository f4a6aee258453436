/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The envelope is not valid JSON or does not have the envelope shape.
    #[error("envelope json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The action code is not defined for this direction.
    #[error("unknown {direction} action {code}")]
    UnknownAction {
        direction: &'static str,
        code: u8,
    },

    /// The `data` object does not match what the action requires.
    #[error("malformed {action} envelope: {reason}")]
    Malformed {
        action: &'static str,
        reason: String,
    },

    /// The encoded envelope exceeds the configured limit.
    #[error("envelope too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, WireError>;
