//! Typed service configuration: the engine's [`Settings`](pop3sf_engine::settings::Settings)
//! plus which adapter this process wires up. Parsing one of these from a
//! real configuration file/environment is out of scope here; this module
//! only defines the shape and a hardcoded `demo()` instance so the binary
//! is runnable.

use pop3sf_engine::settings::{ListenerConfig, Settings, TlsMode};

/// Identifies which adapter implementation a deployment wires in. The real
/// set of adapters (directory-backed, SQL-backed, ...) lives outside this
/// crate; `InMemory` is the only variant this workspace ships, for demos and
/// integration tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    InMemory,
}

pub struct ServiceConfig {
    pub settings: Settings,
    pub adapter: AdapterKind,
}

impl ServiceConfig {
    /// A runnable configuration: one plaintext listener on the standard POP3
    /// port, read-only mode and plaintext auth both permitted, conservative
    /// concurrency and idle-timeout defaults.
    pub fn demo() -> Self {
        ServiceConfig {
            settings: Settings {
                listeners: vec![ListenerConfig {
                    address: "0.0.0.0".to_string(),
                    port: 1100,
                    tls: TlsMode::None,
                }],
                tls: None,
                allow_read_only_mode: true,
                allow_plaintext_auth_without_tls: true,
                max_concurrent_sessions: 64,
                idle_timeout_seconds: 600,
                auth_delay_curve: vec![0, 1, 2, 4, 8],
                serialize_adapter_calls: false,
                shutdown_deadline_seconds: 30,
            },
            adapter: AdapterKind::InMemory,
        }
    }
}
