//! Utility Functions and Diagnostics
//!
//! Hardware summaries and user-friendly error formatting for the
//! command-line tool.
//!
//! ## Error Formatting
//!
//! The [`errors`] module turns engine errors into messages with hints:
//!
//! ```rust,no_run
//! use lamco_display_config::utils::format_user_error;
//!
//! # fn operation() -> anyhow::Result<()> { Ok(()) }
//! if let Err(e) = operation() {
//!     eprintln!("{}", format_user_error(&e));
//! }
//! ```
//!
//! Error categories with context-aware help:
//! - monitors.xml errors → markup, policy placement, versions
//! - Migration errors → unidentifiable outputs, incomplete tiles
//! - Arrangement errors → primary, adjacency and overlap rules
//! - Hardware errors → CRTC shortage, unsupported modes
//! - Settings errors → TOML syntax and values

pub mod diagnostics;
pub mod errors;

pub use diagnostics::{log_startup_diagnostics, HardwareSummary};
pub use errors::format_user_error;
