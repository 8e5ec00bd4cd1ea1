//! Display Configuration Error Types
//!
//! Error taxonomy shared by the verifier, generators, CRTC assignment and
//! the configuration manager.

use thiserror::Error;

use crate::hardware::BackendError;
use crate::multimon::layout::LayoutError;
use crate::multimon::types::MonitorSpec;
use crate::store::legacy::MigrationError;
use crate::store::ParseError;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Reasons a monitors configuration fails verification
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerificationError {
    /// Missing identity or mode fields
    #[error("Invalid monitor spec: {0}")]
    InvalidSpec(String),

    /// Negative origin, empty logical monitor or mode/scale mismatch
    #[error("Invalid logical monitor: {0}")]
    InvalidLayout(String),

    /// Global scale required but scales differ
    #[error("Logical monitor scales must be identical ({previous} != {current})")]
    ScaleMismatch {
        /// Scale of the preceding logical monitor
        previous: f32,
        /// Offending scale
        current: f32,
    },

    /// Two logical monitors share area
    #[error("Logical monitors overlap")]
    Overlap,

    /// More than one logical monitor marked primary
    #[error("Config contains multiple primary logical monitors")]
    MultiplePrimary,

    /// No logical monitor marked primary
    #[error("Config is missing primary logical monitor")]
    MissingPrimary,

    /// Logical monitors do not form one connected region
    #[error("Logical monitors not adjacent")]
    Disconnected,

    /// Layout does not start at (0, 0)
    #[error("Logical monitors positions are offset: minimum is ({x}, {y})")]
    NonZeroOrigin {
        /// Minimum x
        x: i32,
        /// Minimum y
        y: i32,
    },

    /// A monitor is both enabled and disabled
    #[error("Assigned monitor explicitly disabled: {0}")]
    DisabledConflict(MonitorSpec),
}

/// Display configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration failed verification
    #[error("Verification failed: {0}")]
    VerificationFailed(#[from] VerificationError),

    /// No CRTC, monitor or mode available for a request
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Persisted document could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Legacy configuration could not be migrated
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    /// Backend refused to program the hardware
    #[error("Backend rejected configuration: {0}")]
    BackendRejected(#[from] BackendError),

    /// Request refused by manager policy (stale serial, D-Bus disabled, ...)
    #[error("Request rejected: {0}")]
    RequestRejected(String),

    /// Generator does not apply to the current hardware
    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    /// No generator could produce a configuration
    #[error("No configuration available: {0}")]
    NoConfiguration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Whether the next fallback strategy may still succeed
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ConfigError::RequestRejected(_) | ConfigError::Io(_))
    }
}
