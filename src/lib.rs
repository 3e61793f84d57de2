//! auto-logout - Idle-triggered forced logout for shared macOS workstations.
//!
//! Samples user-input idle time and, past a threshold, gives the user a
//! bounded window to cancel a forced session termination. An
//! uncancelled countdown resolves to a shutdown, a restart, or a
//! FileVault-authenticated restart, depending on the system's power
//! schedule and disk-encryption state.
//!
//! The binary is a stateless one-shot: an external scheduler (launchd)
//! provides the invocation cadence.

pub mod action;
pub mod config;
pub mod domain;
pub mod engine;
pub mod idle;
pub mod prompt;
pub mod schedule;
pub mod security;
