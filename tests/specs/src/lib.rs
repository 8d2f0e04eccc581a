// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end protocol tests.
//!
//! Boots a real towerline server in-process on port 0 and exposes the bound
//! addresses plus the manager handle for white-box assertions.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use towerline::config::ServerConfig;
use towerline::dispatch::Dispatcher;
use towerline::manager::SimManager;
use towerline::providers::{ProviderGate, ProviderSet};
use towerline::sim::local::LocalSimFactory;
use towerline::transport::client::RpcClient;

/// A running in-process server, shut down on drop.
pub struct SpecServer {
    pub rpc_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub manager: Arc<SimManager>,
    shutdown: CancellationToken,
}

impl SpecServer {
    /// Boot with the given config; ports are always overridden to 0 and the
    /// provider gate is closed empty (provider behavior is covered by unit
    /// tests; the wire contract is what specs exercise).
    pub async fn start(mut config: ServerConfig) -> anyhow::Result<SpecServer> {
        config.port = 0;
        let factory = Arc::new(LocalSimFactory::new(&config));
        let providers = ProviderGate::ready(ProviderSet::default());
        let manager = SimManager::new(config.clone(), factory, providers);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let rpc_addr = listener.local_addr()?;
        let http_addr = towerline::http::serve(Arc::clone(&manager), free_port_base()).await?;

        let shutdown = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&manager)));
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = towerline::transport::server::serve(listener, dispatcher, server_shutdown).await;
        });

        Ok(SpecServer { rpc_addr, http_addr, manager, shutdown })
    }

    pub async fn start_default() -> anyhow::Result<SpecServer> {
        Self::start(ServerConfig::default()).await
    }

    /// Dial the RPC port. No handshake is performed.
    pub async fn dial(&self) -> anyhow::Result<RpcClient> {
        RpcClient::dial(&self.rpc_addr.to_string()).await.map_err(|e| anyhow::anyhow!("{e}"))
    }

    pub fn speech_url(&self) -> String {
        format!("ws://{}/speech", self.http_addr)
    }
}

impl Drop for SpecServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A base port for the HTTP scan that is very likely free: bind :0, take the
/// port, release it.
fn free_port_base() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap_or(0)
}
