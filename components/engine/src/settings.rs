//! Typed configuration surface consumed by the rest of the engine. Parsing
//! one of these from a file, environment, or flags is the embedding
//! service's job; this module only defines the shape and validates it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsMode {
    None,
    Implicit,
    Stls,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub address: String,
    pub port: u16,
    pub tls: TlsMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub certificate_path: PathBuf,
    pub key_path: PathBuf,
    /// e.g. "1.2" or "1.3"; advisory, interpreted by the TLS layer.
    pub min_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub listeners: Vec<ListenerConfig>,
    pub tls: Option<TlsConfig>,
    pub allow_read_only_mode: bool,
    pub allow_plaintext_auth_without_tls: bool,
    pub max_concurrent_sessions: usize,
    pub idle_timeout_seconds: u64,
    /// Seconds of delay applied after the 1st, 2nd, 3rd, ... consecutive
    /// failed authentication from one remote address; the last entry
    /// repeats as the cap once exhausted.
    pub auth_delay_curve: Vec<u64>,
    pub serialize_adapter_calls: bool,
    /// How long the shutdown coordinator waits for active sessions to
    /// finish before force-closing them.
    pub shutdown_deadline_seconds: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("at least one listener must be configured")]
    NoListeners,
    #[error("listener requires TLS configuration but none is set: {address}:{port}")]
    MissingTlsConfig { address: String, port: u16 },
    #[error("max_concurrent_sessions must be greater than zero")]
    ZeroConcurrency,
    #[error("idle_timeout_seconds must be at least 30")]
    IdleTimeoutTooShort,
    #[error("failed to load TLS certificate/key: {0}")]
    TlsLoadFailure(String),
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.listeners.is_empty() {
            return Err(SettingsError::NoListeners);
        }
        if self.max_concurrent_sessions == 0 {
            return Err(SettingsError::ZeroConcurrency);
        }
        if self.idle_timeout_seconds < 30 {
            return Err(SettingsError::IdleTimeoutTooShort);
        }
        for listener in &self.listeners {
            let needs_tls = matches!(listener.tls, TlsMode::Implicit | TlsMode::Stls);
            if needs_tls && self.tls.is_none() {
                return Err(SettingsError::MissingTlsConfig {
                    address: listener.address.clone(),
                    port: listener.port,
                });
            }
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_deadline_seconds)
    }

    pub fn auth_delay_curve(&self) -> Vec<Duration> {
        self.auth_delay_curve
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }
}
