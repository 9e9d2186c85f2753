//! # recontrol-agent
//!
//! Agent binary around `recontrol-core`: TOML configuration, tracing setup,
//! and the OS-facing capability implementations the command table drives.

pub mod config;
pub mod system;
