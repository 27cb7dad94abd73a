// src/error.rs
use thiserror::Error;

/// Terminal classification of a handshake session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Channel failed to open, errored, or closed before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// Inbound frame with an unexpected shape. Logged and dropped by the engine.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No challenge or no response within the allotted window.
    #[error("handshake timeout while {phase}")]
    HandshakeTimeout { phase: &'static str },

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("signing failed: {0}")]
    Signing(String),

    /// Server answered `ok: false`; carries the server's message.
    #[error("{0}")]
    AuthRejected(String),

    #[error("session aborted")]
    Aborted,
}

impl HandshakeError {
    /// Errors that should turn into a non-zero process exit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HandshakeError::Transport(_)
                | HandshakeError::KeyGeneration(_)
                | HandshakeError::Signing(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid base64url: {0}")]
    Base64(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningStringError {
    #[error("field {field} contains reserved delimiter {delimiter:?}")]
    Delimiter { field: &'static str, delimiter: char },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("invalid signature: {0}")]
    MalformedSignature(String),

    #[error("invalid pubkey: {0}")]
    MalformedPublicKey(String),

    #[error("bad signature")]
    BadSignature,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write config to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
