//! Command routing.
//!
//! A [`CommandRouter`] maps exact command names to async handlers. Handlers
//! receive the raw payload and return a JSON result; failures are converted
//! to error responses here, never propagated to the receive loop. The
//! transport spawns `dispatch` onto its own task so a slow handler cannot
//! stall frame delivery.

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::ReconError;
use crate::protocol::envelope::{CommandRequest, CommandResponse};

pub type HandlerFuture = BoxFuture<'static, Result<Value, ReconError>>;
type Handler = Box<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
pub struct CommandRouter {
    handlers: HashMap<String, Handler>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under an exact command name. A later registration
    /// under the same name replaces the earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> HandlerFuture + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    /// Route one request to its handler.
    ///
    /// Returns `None` when the request carries no id: fire-and-forget
    /// commands never produce a response, whatever the outcome. Unknown
    /// commands and handler failures become `Error` responses when an id is
    /// present.
    pub async fn dispatch(&self, request: CommandRequest) -> Option<CommandResponse> {
        let CommandRequest { id, command, payload } = request;

        let Some(handler) = self.handlers.get(&command) else {
            tracing::warn!(%command, "unsupported command");
            return id.map(|id| {
                CommandResponse::error(id, ReconError::UnsupportedCommand(command).to_string())
            });
        };

        match handler(payload).await {
            Ok(result) => id.map(|id| CommandResponse::success(id, result)),
            Err(e) => match id {
                Some(id) => Some(CommandResponse::error(id, e.to_string())),
                None => {
                    tracing::warn!(%command, "fire-and-forget command failed: {e}");
                    None
                }
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
