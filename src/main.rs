//! pop3sf: wires a [`ServiceConfig`] and an [`Adapter`](pop3sf_engine::adapter::Adapter)
//! implementation to `pop3sf_engine::serve`.
//!
//! Configuration *loading* (files, env, flags) and a full CLI entry point
//! are out of scope for this crate; this binary only demonstrates the
//! wiring with a hardcoded listener and an in-memory demo adapter so the
//! workspace is runnable end to end.

mod demo_adapter;
mod service_config;

use anyhow::Result;

use crate::demo_adapter::InMemoryAdapter;
use crate::service_config::{AdapterKind, ServiceConfig};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = ServiceConfig::demo();
    log::info!(
        "starting pop3sf with {} listener(s)",
        config.settings.listeners.len()
    );

    let adapter = match config.adapter {
        AdapterKind::InMemory => InMemoryAdapter::demo(),
    };
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    pop3sf_engine::serve(config.settings, adapter, shutdown).await?;
    log::info!("pop3sf stopped");
    Ok(())
}
