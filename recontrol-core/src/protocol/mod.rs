//! Wire protocol: envelopes, inbound frame classification, command routing.

pub mod dispatch;
pub mod envelope;
pub mod frame;

pub use dispatch::{CommandRouter, HandlerFuture};
pub use envelope::{CommandRequest, CommandResponse, message_frame, subscribe_frame};
pub use frame::{InboundFrame, classify, reason_is_credential};
