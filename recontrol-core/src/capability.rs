//! Capability seams for the OS-level subsystems the core drives.
//!
//! Input injection, process execution, power actions, and surface capture are
//! platform integrations that live outside this crate. The core only consumes
//! these traits; the agent binary (or a test) supplies the implementations.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capture::PixelBuffer;
use crate::error::ReconError;

// ── Input ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// A single mouse action to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    Move { dx: i32, dy: i32 },
    Down(MouseButton),
    Up(MouseButton),
    Click { button: MouseButton, delay_ms: u32 },
    DoubleClick { delay_ms: u32 },
    Scroll { clicks: i32 },
}

/// Keyboard injection (Win32 `SendInput` or equivalent).
pub trait KeyInjector: Send + Sync {
    /// Press (`down = true`) or release a key by virtual-key code.
    fn inject_key(&self, code: u16, down: bool) -> Result<(), ReconError>;
}

/// Mouse injection.
pub trait MouseInjector: Send + Sync {
    fn inject(&self, action: MouseAction) -> Result<(), ReconError>;
}

// ── Processes ────────────────────────────────────────────────────

/// Output of a completed process run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// One entry from a process listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub memory_mb: u64,
}

/// Shell execution and process management.
///
/// The runner keeps a current working directory that `run`/`run_script`
/// and `start_detached` inherit, and tracks at most one in-flight shell
/// run that `abort` can cancel.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Execute `command` in the platform shell; a run exceeding `timeout`
    /// must resolve to [`ReconError::Timeout`].
    async fn run(&self, command: &str, timeout: Duration) -> Result<ProcessOutput, ReconError>;

    /// Execute `script` through PowerShell (or the closest local
    /// equivalent), same deadline semantics as [`run`](Self::run).
    async fn run_script(&self, script: &str, timeout: Duration)
    -> Result<ProcessOutput, ReconError>;

    /// Enumerate running processes.
    async fn list(&self) -> Result<Vec<ProcessInfo>, ReconError>;

    /// Terminate `pid`; `force` skips the polite signal. Returns whether
    /// the process accepted the signal.
    async fn kill(&self, pid: u32, force: bool) -> Result<bool, ReconError>;

    /// Launch a program without waiting for it; returns its pid, or -1
    /// when the platform does not report one.
    async fn start_detached(
        &self,
        file_name: &str,
        arguments: &str,
        redirect_output: bool,
    ) -> Result<i64, ReconError>;

    /// The working directory inherited by runs.
    fn cwd(&self) -> String;

    /// Change the working directory; the path must exist.
    fn set_cwd(&self, path: &str) -> Result<(), ReconError>;

    /// The account the agent runs as.
    fn who_am_i(&self) -> String;

    /// How long the host has been up.
    fn uptime(&self) -> Duration;

    /// Cancel the in-flight shell run, if any.
    fn abort(&self);
}

// ── Power ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerKind {
    Shutdown,
    Restart,
    Sleep,
    Lock,
}

/// Machine power actions.
#[async_trait]
pub trait PowerControl: Send + Sync {
    /// Perform the action; returns a short human-readable status.
    async fn power_action(&self, kind: PowerKind) -> Result<String, ReconError>;
}

// ── Capture ──────────────────────────────────────────────────────

/// Captures the primary display into an owned pixel buffer.
///
/// `downscale` in (0, 1] shrinks the captured surface before diffing.
/// Called once per tick by the capture loop, which exclusively owns the
/// source for the lifetime of the stream.
pub trait CaptureSource: Send {
    fn capture(&mut self, downscale: f64) -> Result<PixelBuffer, ReconError>;
}
