//! Connection lifecycle state machine.
//!
//! One [`ConnectionState`] is owned per transport instance; transitions are
//! validated and return `Result` instead of panicking, with a force-reset
//! escape hatch for unrecoverable errors.

use std::time::Instant;

use crate::error::ReconError;

// ── ConnectionState ──────────────────────────────────────────────

/// The current phase of the control channel.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲               ▲  │           │
///       │               │  ▼           ▼
///       └──────────── Reconnecting ◄───┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No active connection. Initial / terminal state.
    #[default]
    Disconnected,

    /// Socket dial and subscribe in progress.
    Connecting,

    /// Subscribed; commands and frame batches flow.
    Connected {
        /// When the channel entered the `Connected` state.
        since: Instant,
    },

    /// Lost the connection; waiting out the retry interval.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { .. } => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

impl ConnectionState {
    /// Returns `true` when the channel is established and traffic flows.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Returns `true` when the channel is idle or abandoned.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// How long the channel has been in the `Connected` state.
    ///
    /// Returns `None` for any other state.
    pub fn connected_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected`, `Reconnecting`.
    pub fn begin_connect(&mut self) -> Result<(), ReconError> {
        match self {
            Self::Disconnected | Self::Reconnecting => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(ReconError::InvalidTransition(
                "cannot connect: not in Disconnected or Reconnecting state",
            )),
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), ReconError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(ReconError::InvalidTransition(
                "cannot complete connect: not in Connecting state",
            )),
        }
    }

    /// Transition to `Reconnecting` after a terminal close or socket error.
    ///
    /// Valid from: `Connected`, `Connecting` (dial failed but retry is due).
    pub fn begin_reconnect(&mut self) -> Result<(), ReconError> {
        match self {
            Self::Connected { .. } | Self::Connecting => {
                *self = Self::Reconnecting;
                Ok(())
            }
            _ => Err(ReconError::InvalidTransition(
                "cannot reconnect: not in Connected or Connecting state",
            )),
        }
    }

    /// Transition to `Disconnected` when a connect attempt fails or
    /// reconnection is abandoned.
    ///
    /// Valid from: `Connecting`, `Reconnecting`.
    pub fn abandon(&mut self) -> Result<(), ReconError> {
        match self {
            Self::Connecting | Self::Reconnecting => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(ReconError::InvalidTransition(
                "cannot abandon: not in Connecting or Reconnecting state",
            )),
        }
    }

    /// Force-reset to `Disconnected` regardless of current state.
    ///
    /// Use this on disposal or unrecoverable errors.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Tests ────────────────────────────────────────────────────────
