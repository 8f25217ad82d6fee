//! Error taxonomy shared by every sub-writer.
//!
//! Kinds mirror the JVMS-facing failure modes a class-file writer can hit:
//! malformed caller input, visit events out of the prescribed order, a
//! structure that overflows a 16-bit JVMS limit, or a feature gated behind a
//! class-file version the caller hasn't declared.

use thiserror::Error;

pub type KapiResult<T> = Result<T, KapiError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KapiError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("invalid state: expected {expected}, but {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("{what} too large: {actual} exceeds the limit of {limit}")]
    ClassFormatTooLarge {
        what: &'static str,
        limit: u32,
        actual: u32,
    },

    #[error(
        "method `{class}.{name}{descriptor}` is too large: {size} bytes exceeds the 65535 byte limit"
    )]
    MethodTooLarge {
        class: String,
        name: String,
        descriptor: String,
        size: u32,
    },

    #[error("`{feature}` is not supported: {detail}")]
    UnsupportedFeature {
        feature: &'static str,
        detail: String,
    },
}

impl KapiError {
    pub(crate) fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_state<S1, S2>(expected: S1, actual: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
