// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Towerline: session, dispatch, and coordination server for a
//! multi-controller ATC training simulator.

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod manager;
pub mod providers;
pub mod session;
pub mod sim;
pub mod test_support;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::manager::SimManager;
use crate::providers::ProviderGate;
use crate::sim::local::LocalSimFactory;

/// Run the server until shutdown.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let providers = ProviderGate::spawn(&config);
    let factory = Arc::new(LocalSimFactory::new(&config));
    let manager = SimManager::new(config.clone(), factory, providers);

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(addr = %listener.local_addr()?, "towerline listening");

    http::serve(Arc::clone(&manager), config.http_port).await?;

    let dispatcher = Arc::new(Dispatcher::new(manager));
    transport::server::serve(listener, dispatcher, shutdown).await
}
