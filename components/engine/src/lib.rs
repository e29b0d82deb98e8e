//! pop3sf-engine: the POP3 protocol engine.
//!
//! This crate has no notion of where messages actually live; it drives the
//! wire protocol, session lifecycle, and cross-connection coordination over
//! whatever [`adapter::Adapter`] the embedder supplies. See [`serve`] for the
//! top-level entry point an embedding binary calls.

pub mod adapter;
pub mod capa;
pub mod codec;
pub mod error;
pub mod listener;
pub mod lock;
pub mod mailbox;
pub mod parser;
pub mod proto;
pub mod session;
pub mod settings;
pub mod shutdown;
pub mod throttle;
pub mod tls;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};

use crate::adapter::{Adapter, SerializedAdapter};
use crate::listener::{run_listener, SessionHandles};
use crate::lock::LockRegistry;
use crate::session::SessionShared;
use crate::settings::{Settings, SettingsError};
use crate::shutdown::{run_until_deadline, ShutdownCoordinator};
use crate::throttle::AuthThrottle;
use crate::tls::TlsLayer;

/// Runs every configured listener until `shutdown_signal` resolves, then
/// drains: stop accepting, let active sessions finish on their own, and
/// force-abort whatever is still running once the configured deadline
/// elapses.
///
/// `shutdown_signal` is typically `tokio::signal::ctrl_c()` mapped to `()`,
/// but tests can pass any future to trigger a deterministic shutdown.
pub async fn serve<A, S>(
    settings: Settings,
    adapter: A,
    shutdown_signal: S,
) -> Result<(), SettingsError>
where
    A: Adapter + 'static,
    S: std::future::Future<Output = ()> + Send + 'static,
{
    settings.validate()?;
    let serialize_calls = settings.serialize_adapter_calls;
    let settings = Arc::new(settings);
    let adapter: Arc<dyn Adapter> = if serialize_calls {
        Arc::new(SerializedAdapter::new(adapter))
    } else {
        Arc::new(adapter)
    };

    let tls_layer = match &settings.tls {
        Some(cfg) => Some(Arc::new(TlsLayer::from_config(cfg).map_err(|e| {
            log::error!("failed to load TLS configuration: {}", e);
            SettingsError::TlsLoadFailure(e.to_string())
        })?)),
        None => None,
    };

    let lock_registry = LockRegistry::new();
    let throttle = Arc::new(AuthThrottle::new(
        settings.auth_delay_curve(),
        Duration::from_secs(60),
    ));
    let coordinator = Arc::new(ShutdownCoordinator::new(settings.shutdown_deadline()));
    let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_sessions));
    let handles: SessionHandles = Arc::new(Mutex::new(Vec::new()));

    let mut listener_tasks = Vec::new();
    for listener_config in settings.listeners.clone() {
        let shared = Arc::new(SessionShared {
            settings: Arc::clone(&settings),
            adapter: Arc::clone(&adapter),
            lock_registry: Arc::clone(&lock_registry),
            throttle: Arc::clone(&throttle),
            tls_layer: tls_layer.clone(),
            listener_tls_mode: listener_config.tls,
        });
        let semaphore = Arc::clone(&semaphore);
        let handles = Arc::clone(&handles);
        let shutdown_rx = coordinator.subscribe();
        listener_tasks.push(tokio::spawn(async move {
            if let Err(e) =
                run_listener(listener_config, shared, semaphore, handles, shutdown_rx).await
            {
                log::error!("listener task ended with error: {}", e);
            }
        }));
    }

    shutdown_signal.await;
    log::info!("shutdown signal received, draining active sessions");
    coordinator.begin_draining();

    for task in listener_tasks {
        let _ = task.await;
    }

    let deadline = coordinator.deadline();
    let _ = run_until_deadline(deadline, wait_for_sessions(&handles)).await;

    let mut guard = handles.lock().await;
    for handle in guard.drain(..) {
        if !handle.is_finished() {
            log::warn!("force-aborting session past shutdown deadline");
            handle.abort();
        }
    }

    Ok(())
}

/// Polls until every tracked session handle has finished, so [`serve`] can
/// race this against the shutdown deadline instead of sleeping it out
/// unconditionally.
async fn wait_for_sessions(handles: &SessionHandles) {
    loop {
        {
            let guard = handles.lock().await;
            if guard.iter().all(|h| h.is_finished()) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
