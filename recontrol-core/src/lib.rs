//! # recontrol-core
//!
//! Core library for the recontrol remote-control agent.
//!
//! This crate contains:
//! - **Auth**: `TokenAuthority` — the credential store and single-flight token refresh
//! - **Protocol**: request/response envelopes, inbound frame classification, `CommandRouter`
//! - **Capture**: the screen pipeline — dirty-region diff, region encoding, `CaptureEngine`, `BatchQueue`
//! - **Session**: `SessionTransport` — the WebSocket control channel with its reconnect state machine
//! - **Commands**: the routing table over the OS capability seams
//! - **Capability**: traits the agent binary implements for input, processes, power and capture
//! - **Diag**: `EventLog`, a bounded in-memory diagnostics ring
//! - **Error**: `ReconError` — typed, `thiserror`-based error hierarchy

pub mod auth;
pub mod capability;
pub mod capture;
pub mod commands;
pub mod diag;
pub mod error;
pub mod protocol;
pub mod session;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use auth::{Credentials, HttpRefreshApi, RefreshApi, TokenAuthority, TokenPair};
pub use capability::{
    CaptureSource, KeyInjector, MouseAction, MouseButton, MouseInjector, PowerControl, PowerKind,
    ProcessInfo, ProcessOutput, ProcessRunner,
};
pub use capture::{
    BatchQueue, CaptureConfig, CaptureEngine, DirtyDetector, FrameBatch, FrameRegion, PixelBuffer,
    Rect, RegionEncoder, ZstdRegionEncoder,
};
pub use commands::{Capabilities, build_router};
pub use diag::EventLog;
pub use error::ReconError;
pub use protocol::{CommandRequest, CommandResponse, CommandRouter, InboundFrame};
pub use session::{ConnectionState, SessionTransport, TransportConfig};
