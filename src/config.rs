//! # Configuration Management
//!
//! Loads application configuration from multiple sources, in priority order:
//! environment variables with an `APP_` prefix, then an optional `config.toml`,
//! then built-in defaults. The deployment-platform style `HOST`/`PORT`
//! variables are honored as a final override.
//!
//! Configuration is validated once at startup so a bad model name or a zero
//! port fails the process before the listener ever binds.

use crate::device::DevicePreference;
use crate::transcription::model::ModelId;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub limits: LimitsConfig,
}

/// Where the WebSocket listener binds.
///
/// The default of `127.0.0.1:8083` keeps the service local-only; deployments
/// that front it with another process set `host = "0.0.0.0"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Which acoustic model backs the transcriber, and how it decodes.
///
/// `name` accepts the Whisper size names (`tiny`, `base.en`, `small`, ...);
/// `language` is an ISO 639-1 hint applied to multilingual models and ignored
/// by the English-only variants. `device` is `auto`, `cpu`, `cuda` or `metal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub language: String,
    pub device: String,
}

/// Explicit ceilings on what a single session may ask of the service.
///
/// The wire protocol itself imposes no payload bound, so these are the only
/// protection against a client streaming arbitrarily large clips or holding
/// open an unbounded number of connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest WebSocket frame accepted, in bytes.
    pub max_frame_bytes: usize,
    /// Longest audio clip a single request may carry, in seconds.
    pub max_clip_seconds: f64,
    /// Concurrent session cap; further upgrades are refused with 503.
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8083,
            },
            model: ModelConfig {
                name: "base.en".to_string(),
                language: "en".to_string(),
                device: "auto".to_string(),
            },
            limits: LimitsConfig {
                // 10 MiB fits several minutes of 16 kHz 16-bit mono WAV.
                max_frame_bytes: 10 * 1024 * 1024,
                max_clip_seconds: 30.0,
                max_concurrent_sessions: 64,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// Environment variables use the `APP_` prefix with `_` as the section
    /// separator, e.g. `APP_SERVER_PORT=9000` or `APP_MODEL_NAME=small.en`.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // HOST/PORT are what most deployment platforms export.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that cannot possibly serve requests.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server port cannot be 0"));
        }

        self.model
            .name
            .parse::<ModelId>()
            .map_err(|e| anyhow::anyhow!("invalid model name: {}", e))?;

        self.model
            .device
            .parse::<DevicePreference>()
            .map_err(|e| anyhow::anyhow!("invalid device preference: {}", e))?;

        if self.limits.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("max_frame_bytes must be greater than 0"));
        }

        if self.limits.max_clip_seconds <= 0.0 {
            return Err(anyhow::anyhow!("max_clip_seconds must be positive"));
        }

        if self.limits.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!(
                "max_concurrent_sessions must be greater than 0"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8083);
        assert_eq!(config.model.name, "base.en");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_model_rejected() {
        let mut config = AppConfig::default();
        config.model.name = "colossal".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_limits_rejected() {
        let mut config = AppConfig::default();
        config.limits.max_clip_seconds = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.limits.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());
    }
}
