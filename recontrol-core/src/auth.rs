//! Credential store and token refresh.
//!
//! [`TokenAuthority`] owns the current access/refresh credentials and is the
//! only component that mutates them. The actual refresh exchange goes through
//! the [`RefreshApi`] trait so tests can substitute the HTTP backend.
//!
//! Refresh is single-flight: concurrent callers serialize on an async gate,
//! and a caller that was queued behind a successful exchange reuses its
//! result instead of issuing a second one. The HTTP 401 path and the
//! WebSocket disconnect path can therefore both call [`TokenAuthority::refresh`]
//! without risking a refresh storm.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ReconError;

// ── Credentials ──────────────────────────────────────────────────

/// The agent's identity and token material.
///
/// Persists across reconnects; refreshed in place. Long-lived persistence to
/// disk is handled outside the core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub device_id: String,
    pub access_token: String,
    pub refresh_token: String,
}

/// Token material returned by a successful refresh exchange.
///
/// `refresh_token` is only present when the server rotates it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

// ── RefreshApi ───────────────────────────────────────────────────

/// One refresh exchange against the auth backend.
#[async_trait]
pub trait RefreshApi: Send + Sync {
    /// Exchange `refresh_token` for a fresh token pair.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ReconError>;
}

/// HTTP refresh backend: `POST {base_url}/auth/refresh` with the refresh
/// token in a `Refresh-Token` header and an empty body.
pub struct HttpRefreshApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRefreshApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RefreshApi for HttpRefreshApi {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ReconError> {
        let url = format!("{}/auth/refresh", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Refresh-Token", refresh_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ReconError::RefreshRejected(format!(
                "status {}",
                response.status()
            )));
        }

        Ok(response.json::<TokenPair>().await?)
    }
}

// ── TokenAuthority ───────────────────────────────────────────────

/// Owns the credential store; produces access tokens and performs refreshes.
pub struct TokenAuthority {
    store: Mutex<Credentials>,
    api: Box<dyn RefreshApi>,
    /// Serializes refresh exchanges (single-flight).
    refresh_gate: tokio::sync::Mutex<()>,
    /// Bumped on every successful refresh; lets a queued caller detect that
    /// the exchange it was waiting for already happened.
    generation: AtomicU64,
}

impl TokenAuthority {
    pub fn new(credentials: Credentials, api: Box<dyn RefreshApi>) -> Self {
        Self {
            store: Mutex::new(credentials),
            api,
            refresh_gate: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// The cached access token, if present and non-empty.
    pub fn access_token(&self) -> Option<String> {
        let creds = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        if creds.access_token.is_empty() {
            None
        } else {
            Some(creds.access_token.clone())
        }
    }

    /// A snapshot of the current credentials.
    pub fn credentials(&self) -> Credentials {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Perform one refresh exchange.
    ///
    /// On success the access token (and the refresh token, when the server
    /// rotates it) is replaced atomically. On any failure the store is left
    /// untouched and `false` is returned. An absent/empty refresh token
    /// returns `false` immediately without a network call.
    ///
    /// Single-flight: a caller that queued behind an in-progress refresh
    /// which succeeded returns `true` without a second exchange.
    pub async fn refresh(&self) -> bool {
        let entry_generation = self.generation.load(Ordering::SeqCst);
        let _gate = self.refresh_gate.lock().await;
        if self.generation.load(Ordering::SeqCst) != entry_generation {
            tracing::debug!("refresh coalesced with a concurrent caller");
            return true;
        }

        let refresh_token = {
            let creds = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            creds.refresh_token.clone()
        };
        if refresh_token.is_empty() {
            tracing::debug!("refresh skipped: no refresh token");
            return false;
        }

        match self.api.refresh(&refresh_token).await {
            Ok(pair) if !pair.access_token.is_empty() => {
                let mut creds = self.store.lock().unwrap_or_else(PoisonError::into_inner);
                creds.access_token = pair.access_token;
                if let Some(rotated) = pair.refresh_token {
                    creds.refresh_token = rotated;
                }
                drop(creds);
                self.generation.fetch_add(1, Ordering::SeqCst);
                tracing::info!("access token refreshed");
                true
            }
            Ok(_) => {
                tracing::warn!("refresh returned an empty access token");
                false
            }
            Err(e) => {
                tracing::warn!("refresh failed: {e}");
                false
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
