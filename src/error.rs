//! Error taxonomy for the Marasi proxy core.

use thiserror::Error;

/// Errors surfaced by the traffic-processing pipeline and scripting runtime.
///
/// Each variant corresponds to one category in the error handling design: the
/// reporting behavior for a variant (close vs. synthesize-502 vs. log-and-continue)
/// lives with its caller, not on the error type itself.
#[derive(Debug, Error)]
pub enum MarasiError {
    #[error("client io error: {0}")]
    ClientIo(String),

    #[error("upstream io error: {0}")]
    UpstreamIo(String),

    #[error("tls handshake failed for {host}: {source}")]
    TlsHandshake {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("script error in extension {extension_id}: {message}")]
    ScriptError {
        extension_id: String,
        message: String,
    },

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("sandbox violation: attempted to access denied global '{0}'")]
    SandboxViolation(String),

    #[error("bridge argument error: expected {expected}, got {actual}")]
    BridgeArgument { expected: String, actual: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MarasiError {
    pub fn bridge_argument(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        MarasiError::BridgeArgument {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn script(extension_id: impl Into<String>, message: impl Into<String>) -> Self {
        MarasiError::ScriptError {
            extension_id: extension_id.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MarasiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_argument_message() {
        let err = MarasiError::bridge_argument("string", "map");
        assert_eq!(
            err.to_string(),
            "bridge argument error: expected string, got map"
        );
    }

    #[test]
    fn script_error_message_contains_extension_id() {
        let err = MarasiError::script("ext-123", "nil access");
        assert!(err.to_string().contains("ext-123"));
        assert!(err.to_string().contains("nil access"));
    }
}
