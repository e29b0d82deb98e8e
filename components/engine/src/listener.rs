//! The listener/acceptor: binds every configured endpoint, applies TLS where
//! configured, and spawns one session task per accepted connection, subject
//! to the configured concurrency ceiling.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::session::{Session, SessionShared};
use crate::settings::{ListenerConfig, TlsMode};
use crate::shutdown::ShutdownState;
use crate::tls::TlsLayer;

/// Handles of every spawned session task, so the shutdown coordinator can
/// force-abort whatever is still running once its deadline elapses.
pub type SessionHandles = Arc<AsyncMutex<Vec<JoinHandle<()>>>>;

/// Bind and run one configured listener until the shutdown signal is
/// observed and its socket stops accepting. Each accepted connection is
/// spawned as its own task; this function returns once the socket is closed.
pub async fn run_listener(
    config: ListenerConfig,
    shared: Arc<SessionShared>,
    semaphore: Arc<Semaphore>,
    handles: SessionHandles,
    mut shutdown_rx: watch::Receiver<ShutdownState>,
) -> std::io::Result<()> {
    let bind_addr = format!("{}:{}", config.address, config.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    log::info!("listening on {} (tls: {:?})", bind_addr, config.tls);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() == ShutdownState::Draining {
                    log::info!("listener {} no longer accepting", bind_addr);
                    return Ok(());
                }
            }
            accepted = listener.accept() => {
                let (socket, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::warn!("accept error on {}: {}", bind_addr, e);
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        log::warn!("rejecting {}: too many concurrent sessions", remote);
                        tokio::spawn(reject_overloaded(socket));
                        continue;
                    }
                };

                let shared = Arc::clone(&shared);
                let shutdown_rx = shutdown_rx.clone();
                let tls_mode = config.tls;

                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    accept_session(shared, socket, remote, tls_mode, shutdown_rx).await;
                });
                handles.lock().await.push(handle);
                handles.lock().await.retain(|h| !h.is_finished());
            }
        }
    }
}

async fn accept_session(
    shared: Arc<SessionShared>,
    socket: tokio::net::TcpStream,
    remote: std::net::SocketAddr,
    tls_mode: TlsMode,
    shutdown_rx: watch::Receiver<ShutdownState>,
) {
    if tls_mode == TlsMode::Implicit {
        let tls_layer = match &shared.tls_layer {
            Some(layer) => layer.clone(),
            None => {
                log::error!("implicit TLS listener has no TLS layer configured");
                return;
            }
        };
        match tls_layer.accept(socket).await {
            Ok(tls_stream) => {
                let session = Session::from_tls(shared, tls_stream, remote, shutdown_rx);
                session.run().await;
            }
            Err(e) => {
                log::warn!("TLS handshake with {} failed: {}", remote, e);
            }
        }
    } else {
        let session = Session::new(shared, socket, remote, false, shutdown_rx);
        session.run().await;
    }
}

async fn reject_overloaded(mut socket: tokio::net::TcpStream) {
    use tokio::io::AsyncWriteExt;
    let _ = socket
        .write_all(b"-ERR [SYS/TEMP] too many connections\r\n")
        .await;
    let _ = socket.shutdown().await;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::adapter::{Adapter, AdapterCapabilities, AdapterError, Identity, Mailbox};
    use crate::lock::LockRegistry;
    use crate::settings::Settings;
    use crate::throttle::AuthThrottle;
    use async_trait::async_trait;
    use std::time::Duration;

    struct EmptyAdapter;

    #[async_trait]
    impl Adapter for EmptyAdapter {
        fn capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities::default()
        }
        async fn authenticate(&self, _u: &str, _p: &str) -> Result<Identity, AdapterError> {
            Err(AdapterError::AuthFail)
        }
        async fn open_mailbox(
            &self,
            _identity: &Identity,
            _read_only: bool,
        ) -> Result<Box<dyn Mailbox>, AdapterError> {
            Err(AdapterError::AuthFail)
        }
    }

    fn test_settings() -> Settings {
        Settings {
            listeners: vec![ListenerConfig {
                address: "127.0.0.1".to_string(),
                port: 0,
                tls: TlsMode::None,
            }],
            tls: None,
            allow_read_only_mode: true,
            allow_plaintext_auth_without_tls: true,
            max_concurrent_sessions: 1,
            idle_timeout_seconds: 30,
            auth_delay_curve: vec![0],
            serialize_adapter_calls: false,
            shutdown_deadline_seconds: 5,
        }
    }

    #[tokio::test]
    async fn bind_failure_on_unparseable_address_surfaces_as_error() {
        let shared = Arc::new(SessionShared {
            settings: Arc::new(test_settings()),
            adapter: Arc::new(EmptyAdapter),
            lock_registry: LockRegistry::new(),
            throttle: Arc::new(AuthThrottle::new(vec![], Duration::from_secs(30))),
            tls_layer: None,
            listener_tls_mode: TlsMode::None,
        });
        let (_tx, rx) = watch::channel(ShutdownState::Running);
        let config = ListenerConfig {
            address: "not a real host".to_string(),
            port: 1,
            tls: TlsMode::None,
        };
        let handles: SessionHandles = Arc::new(AsyncMutex::new(Vec::new()));
        let result = run_listener(config, shared, Arc::new(Semaphore::new(1)), handles, rx).await;
        assert!(result.is_err());
    }
}
