//! The control channel: connect, subscribe, receive loop, reconnect.
//!
//! One [`SessionTransport`] owns one logical connection to the control
//! server. Inbound control frames (ping/welcome/disconnect) are consumed
//! here; application frames go to the [`CommandRouter`] on a spawned task so
//! a slow handler never stalls the receive loop. All outbound traffic
//! funnels through a single writer task, which defines send order.
//!
//! Reconnect handling is single-flight: concurrent disconnect signals
//! collapse into one active reconnect sequence. Credential-related
//! disconnects get at most one token refresh and one retry; anything else
//! retries on a fixed interval until success or disposal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use crate::auth::TokenAuthority;
use crate::capture::{BatchQueue, FrameBatch};
use crate::diag::EventLog;
use crate::error::ReconError;
use crate::protocol::dispatch::CommandRouter;
use crate::protocol::envelope::{message_frame, subscribe_frame};
use crate::protocol::frame::{self, InboundFrame};
use crate::session::state::ConnectionState;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// ── TransportConfig ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket endpoint, e.g. `wss://host/cable`.
    pub ws_url: String,
    /// Delay between reconnect attempts for non-credential disconnects.
    pub retry_interval: Duration,
}

impl TransportConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            retry_interval: Duration::from_secs(5),
        }
    }
}

// ── SessionTransport ─────────────────────────────────────────────

pub struct SessionTransport {
    config: TransportConfig,
    authority: Arc<TokenAuthority>,
    router: Arc<CommandRouter>,
    events: Arc<EventLog>,
    state: Mutex<ConnectionState>,
    /// Present only while a connection is live; the single writer task
    /// drains it.
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Single-flight reconnect guard.
    reconnecting: AtomicBool,
    cancel: CancellationToken,
}

impl SessionTransport {
    pub fn new(
        config: TransportConfig,
        authority: Arc<TokenAuthority>,
        router: Arc<CommandRouter>,
        events: Arc<EventLog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            authority,
            router,
            events,
            state: Mutex::new(ConnectionState::default()),
            writer: Mutex::new(None),
            reconnecting: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    /// A snapshot of the connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Connect, subscribe and start the receive loop.
    ///
    /// A first-attempt failure triggers exactly one token refresh followed
    /// by one retry; any further failure surfaces to the caller. An absent
    /// access token fails immediately without a network call.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ReconError> {
        if self.authority.access_token().is_none() {
            return Err(ReconError::NoCredentials);
        }
        self.lock_state().begin_connect()?;

        match self.establish().await {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::warn!("connect failed: {first}, trying a token refresh");
                if self.authority.refresh().await {
                    self.establish().await.inspect_err(|_| {
                        self.lock_state().abandon().ok();
                    })
                } else {
                    self.lock_state().abandon().ok();
                    Err(first)
                }
            }
        }
    }

    /// Tear everything down. Idempotent; reconnect attempts in flight are
    /// abandoned immediately.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.clear_writer();
        self.lock_state().force_disconnect();
        tracing::info!("transport shut down");
    }

    /// Queue one raw text frame for the writer task.
    pub fn send_raw(&self, frame: String) -> Result<(), ReconError> {
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match writer.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| ReconError::NotConnected),
            None => Err(ReconError::NotConnected),
        }
    }

    /// Wrap a payload in the channel message envelope and queue it.
    pub fn send_payload<T: Serialize>(&self, payload: &T) -> Result<(), ReconError> {
        self.send_raw(message_frame(payload)?)
    }

    /// Spawn a task that drains `queue` and ships each batch as a
    /// `screen.frame` message. Batches produced while disconnected are
    /// dropped; there is no replay across reconnects.
    pub fn spawn_batch_pump(self: &Arc<Self>, queue: Arc<BatchQueue>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let batch = tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    batch = queue.pop() => batch,
                };
                match this.send_payload(&batch_payload(&batch)) {
                    Ok(()) => {}
                    Err(ReconError::NotConnected) => {
                        tracing::debug!("frame batch dropped: not connected");
                    }
                    Err(e) => tracing::warn!("frame batch send failed: {e}"),
                }
            }
        });
    }

    // ── Connection plumbing ──────────────────────────────────────

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_writer(&self) {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Dial, subscribe and start the writer and receive tasks. The state
    /// must already be `Connecting`.
    async fn establish(self: &Arc<Self>) -> Result<(), ReconError> {
        let token = self
            .authority
            .access_token()
            .ok_or(ReconError::NoCredentials)?;

        let mut url = url::Url::parse(&self.config.ws_url)?;
        url.query_pairs_mut().append_pair("access_token", &token);

        let (stream, _response) = connect_async(url.as_str()).await?;
        let (mut sink, source) = stream.split();
        sink.send(Message::Text(subscribe_frame())).await?;

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            *writer = Some(tx);
        }
        self.spawn_writer(sink, rx);
        self.spawn_receive_loop(source);

        self.lock_state().complete_connect()?;
        self.events.record("connected".to_string());
        tracing::info!(url = %self.config.ws_url, "connected and subscribed");
        Ok(())
    }

    fn spawn_writer(&self, mut sink: WsSink, mut rx: mpsc::UnboundedReceiver<String>) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = cancel.cancelled() => None,
                    frame = rx.recv() => frame,
                };
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    // The receive side sees the same socket error and
                    // drives reconnect; just stop writing.
                    tracing::warn!("socket write failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });
    }

    fn spawn_receive_loop(self: &Arc<Self>, mut source: WsSource) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = this.cancel.cancelled() => {
                        this.clear_writer();
                        this.lock_state().force_disconnect();
                        break;
                    }
                    message = source.next() => message,
                };
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if this.handle_text(&text) {
                            break;
                        }
                    }
                    // tungstenite answers pings itself; binary frames are
                    // not part of this protocol.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("socket read failed: {e}");
                        this.schedule_reconnect(false);
                        break;
                    }
                    None => {
                        tracing::info!("socket closed by peer");
                        this.schedule_reconnect(false);
                        break;
                    }
                }
            }
        });
    }

    /// Handle one inbound text frame. Returns `true` when the receive loop
    /// should stop.
    fn handle_text(self: &Arc<Self>, text: &str) -> bool {
        match frame::classify(text) {
            InboundFrame::Ping => false,
            InboundFrame::Welcome => {
                tracing::debug!("server welcome");
                false
            }
            InboundFrame::Disconnect { reason, reconnect } => {
                self.events.record(format!("server disconnect: {reason}"));
                if reconnect {
                    self.schedule_reconnect(frame::reason_is_credential(&reason));
                } else {
                    tracing::info!(%reason, "server requested a final disconnect");
                    self.clear_writer();
                    self.lock_state().force_disconnect();
                }
                true
            }
            InboundFrame::Command { from, request } => {
                self.events.record(format!(
                    "command {} from {}",
                    request.command,
                    from.as_deref().unwrap_or("?")
                ));
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    if let Some(response) = this.router.dispatch(request).await {
                        if let Err(e) = this.send_payload(&response) {
                            tracing::warn!(id = response.id(), "response dropped: {e}");
                        }
                    }
                });
                false
            }
            InboundFrame::Other(raw) => {
                tracing::debug!(frame = %raw, "unrecognized frame dropped");
                false
            }
        }
    }

    // ── Reconnect ────────────────────────────────────────────────

    /// Enter reconnect handling unless a reconnect is already in flight.
    fn schedule_reconnect(self: &Arc<Self>, credential_related: bool) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            tracing::debug!("reconnect already in progress");
            return;
        }
        self.clear_writer();
        self.lock_state().begin_reconnect().ok();

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_reconnect(credential_related).await;
            this.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    async fn run_reconnect(self: &Arc<Self>, credential_related: bool) {
        if credential_related {
            // One refresh, one attempt, no loop. A genuinely dead
            // credential must not cause a refresh storm.
            tracing::info!("credential-related disconnect, refreshing token");
            if !self.authority.refresh().await {
                tracing::warn!("token refresh failed, staying disconnected");
                self.lock_state().abandon().ok();
                return;
            }
            self.lock_state().begin_connect().ok();
            if let Err(e) = self.establish().await {
                tracing::warn!("reconnect after refresh failed: {e}");
                self.lock_state().abandon().ok();
            }
            return;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.lock_state().force_disconnect();
                    return;
                }
                _ = tokio::time::sleep(self.config.retry_interval) => {}
            }
            self.lock_state().begin_connect().ok();
            match self.establish().await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!("reconnect attempt failed: {e}");
                    self.lock_state().begin_reconnect().ok();
                }
            }
        }
    }
}

// ── Frame batch payload ──────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegionPayload {
    image: String,
    is_full_frame: bool,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct BatchPayload {
    command: &'static str,
    regions: Vec<RegionPayload>,
}

/// The `screen.frame` message body: regions with base64-encoded bytes.
fn batch_payload(batch: &FrameBatch) -> BatchPayload {
    BatchPayload {
        command: "screen.frame",
        regions: batch
            .regions
            .iter()
            .map(|region| RegionPayload {
                image: BASE64.encode(&region.data),
                is_full_frame: region.is_full_frame,
                x: region.rect.x,
                y: region.rect.y,
                width: region.rect.width,
                height: region.rect.height,
            })
            .collect(),
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, RefreshApi, TokenPair};
    use crate::capture::{FrameRegion, Rect};
    use bytes::Bytes;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    struct CountingApi {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RefreshApi for &'static CountingApi {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair, ReconError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ReconError::RefreshRejected("status 401".into()))
        }
    }

    fn test_transport(api: &'static CountingApi) -> Arc<SessionTransport> {
        let authority = Arc::new(TokenAuthority::new(
            Credentials {
                user_id: "u1".into(),
                device_id: "d1".into(),
                access_token: "tok".into(),
                refresh_token: "r1".into(),
            },
            Box::new(api),
        ));
        SessionTransport::new(
            TransportConfig::new("ws://127.0.0.1:1/cable"),
            authority,
            Arc::new(CommandRouter::new()),
            Arc::new(EventLog::default()),
        )
    }

    #[tokio::test]
    async fn concurrent_disconnect_signals_collapse_into_one_reconnect() {
        let api: &'static CountingApi = Box::leak(Box::new(CountingApi {
            calls: AtomicUsize::new(0),
        }));
        let transport = test_transport(api);
        *transport.lock_state() = ConnectionState::Connected {
            since: std::time::Instant::now(),
        };

        // Both signals land before the spawned reconnect runs; the guard
        // must admit exactly one sequence, hence one refresh call.
        transport.schedule_reconnect(true);
        transport.schedule_reconnect(true);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert!(transport.state().is_disconnected());
    }

    #[test]
    fn batch_payload_encodes_regions() {
        let batch = FrameBatch::new(vec![FrameRegion {
            data: Bytes::from_static(b"abc"),
            is_full_frame: true,
            rect: Rect::new(0, 0, 64, 64),
        }]);

        let value = serde_json::to_value(batch_payload(&batch)).unwrap();
        assert_eq!(value["command"], "screen.frame");
        let region = &value["regions"][0];
        assert_eq!(region["image"], Value::String(BASE64.encode(b"abc")));
        assert_eq!(region["isFullFrame"], Value::Bool(true));
        assert_eq!(region["width"], 64);
    }

    #[test]
    fn retry_interval_defaults_to_five_seconds() {
        let config = TransportConfig::new("ws://localhost/cable");
        assert_eq!(config.retry_interval, Duration::from_secs(5));
    }
}
