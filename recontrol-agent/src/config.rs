//! Configuration for the agent binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use recontrol_core::capture::CaptureConfig;
use recontrol_core::session::TransportConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Control server settings.
    pub server: ServerConfig,
    /// Screen streaming settings.
    pub screen: ScreenConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Control server endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket endpoint of the command channel.
    pub ws_url: String,
    /// HTTP API base used for token refresh.
    pub api_base: String,
    /// Seconds between reconnect attempts after a non-credential disconnect.
    pub retry_interval_secs: u64,
}

/// Screen streaming defaults; `screen.start` payloads can override them
/// per stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Encoder quality (1-100).
    pub quality: u8,
    /// Capture interval in milliseconds.
    pub interval_ms: u64,
    /// Dirty-grid tile size in pixels.
    pub tile_size: u32,
    /// Capture downscale factor in (0, 1].
    pub downscale: f64,
    /// Outbound frame-batch queue depth; overflow drops the oldest batch.
    pub queue_depth: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            screen: ScreenConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://localhost:3000/cable".into(),
            api_base: "https://localhost:3000".into(),
            retry_interval_secs: 5,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            quality: 30,
            interval_ms: 200,
            tile_size: 32,
            downscale: 1.0,
            queue_depth: 4,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading / conversion ─────────────────────────────────────────

impl AgentConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Capture defaults for `screen.start`.
    pub fn to_capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            quality: self.screen.quality.clamp(1, 100),
            interval: Duration::from_millis(self.screen.interval_ms.max(16)),
            tile_size: self.screen.tile_size.max(8),
            downscale: self.screen.downscale.clamp(0.1, 1.0),
        }
    }

    /// Transport settings for the command channel.
    pub fn to_transport_config(&self) -> TransportConfig {
        let mut config = TransportConfig::new(self.server.ws_url.clone());
        config.retry_interval = Duration::from_secs(self.server.retry_interval_secs.max(1));
        config
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = AgentConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("ws_url"));
        assert!(text.contains("tile_size"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = AgentConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: AgentConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.screen.quality, 30);
        assert_eq!(parsed.server.retry_interval_secs, 5);
    }

    #[test]
    fn to_capture_config_clamps() {
        let mut cfg = AgentConfig::default();
        cfg.screen.quality = 250;
        cfg.screen.interval_ms = 1;
        cfg.screen.downscale = 7.0;
        let capture = cfg.to_capture_config();
        assert_eq!(capture.quality, 100);
        assert_eq!(capture.interval, Duration::from_millis(16));
        assert_eq!(capture.downscale, 1.0);
    }

    #[test]
    fn partial_toml_keeps_section_defaults() {
        let parsed: AgentConfig = toml::from_str("[screen]\nquality = 80\n").unwrap();
        assert_eq!(parsed.screen.quality, 80);
        assert_eq!(parsed.screen.tile_size, 32);
        assert_eq!(parsed.logging.level, "info");
    }
}
