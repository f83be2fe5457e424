//! Wire protocol error types.

use thiserror::Error;

/// Error raised while encoding or decoding wire payloads.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A NewData envelope arrived without a Data field.
    #[error("long-poll envelope has no data")]
    MissingData,

    /// Percent-decoding of the relayed payload failed.
    #[error("percent-decoding failed: {0}")]
    Decode(String),
}

/// Convenience Result alias for wire operations.
pub type WireResult<T> = Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_data_display() {
        let err = WireError::MissingData;
        assert_eq!(format!("{}", err), "long-poll envelope has no data");
    }

    #[test]
    fn json_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{{{").unwrap_err();
        let err: WireError = serde_err.into();
        assert!(format!("{}", err).starts_with("JSON error:"));
    }
}
