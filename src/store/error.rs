//! Configuration Store Error Types

use std::path::PathBuf;
use thiserror::Error;

use crate::multimon::error::VerificationError;

/// Failure to read one persisted document
#[derive(Error, Debug)]
pub enum ParseError {
    /// Malformed markup
    #[error("Invalid XML at byte {position}: {message}")]
    Xml {
        /// Byte offset reported by the reader
        position: usize,
        /// Reader message
        message: String,
    },

    /// Root element is not `<monitors>`
    #[error("Unexpected root element <{0}>")]
    UnexpectedRoot(String),

    /// Unsupported `version` attribute
    #[error("Invalid document version '{0}'")]
    InvalidVersion(String),

    /// Version 1 document; migrate instead of parsing
    #[error("Document uses the legacy format and needs migration")]
    NeedsMigration,

    /// Scalar could not be parsed
    #[error("Invalid value '{value}' for <{element}>")]
    InvalidValue {
        /// Element name
        element: &'static str,
        /// Offending text
        value: String,
    },

    /// Required child element absent
    #[error("Missing <{0}>")]
    MissingElement(&'static str),

    /// `<policy>` outside a system file
    #[error("Policy can only be defined in system level configurations")]
    PolicyNotAllowed,

    /// Configuration parsed but is not a valid arrangement
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] VerificationError),

    /// File could not be read
    #[error("Failed to read {path:?}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl ParseError {
    pub(crate) fn invalid(element: &'static str, value: &str) -> Self {
        ParseError::InvalidValue {
            element,
            value: value.to_string(),
        }
    }
}
