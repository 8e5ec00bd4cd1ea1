//! # lamco-display-config
//!
//! Display configuration engine for Linux compositors.
//!
//! Turns the connected monitors into an arrangement of logical monitors,
//! keeps that arrangement across hotplugs in `monitors.xml`, and computes
//! the CRTC/output assignments that drive it:
//! - [`multimon`] - configuration model, verification, generators, manager
//! - [`hardware`] - backend contract and CRTC assignment
//! - [`store`] - monitors.xml parsing, writing and legacy migration
//!
//! # Architecture
//!
//! ```text
//! lamco-display-config
//!   ├─> ConfigStore (system + user monitors.xml, policy, async writes)
//!   ├─> ConfigManager (stored → generated fallback ladder, history,
//!   │                  confirmation countdown, panel orientation)
//!   ├─> LayoutCalculator (linear, fallback, suggested, for-lid generators)
//!   └─> MonitorBackend (hardware snapshot + apply)
//! ```
//!
//! # Data Flow
//!
//! **Hotplug:** Backend → ConfigManager::ensure_configured → verify →
//! crtc::assign → MonitorBackend::apply
//!
//! **Request:** apply_monitors_config → verify → confirmation → ConfigStore

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Engine settings
pub mod config;

/// Hardware backend contract
pub mod hardware;

/// Monitor configuration model and manager
pub mod multimon;

/// Persisted configurations
pub mod store;

/// Utility functions
pub mod utils;
