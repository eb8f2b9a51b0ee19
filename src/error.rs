//! Error types for the morphometric engine.

use thiserror::Error;

/// Configuration errors, raised before any grid is scanned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("{name} must have the same shape as dsm: expected {expected:?}, got {actual:?}")]
    ExtentMismatch {
        name: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn invalid(
        name: &'static str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
