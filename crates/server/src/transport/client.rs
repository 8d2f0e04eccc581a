// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC client over the frame codec. Used for upstream TTS/weather relays and
//! by the end-to-end test suites.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::error::{ErrorKind, ServerError};
use crate::session::TrafficCounters;
use crate::transport::codec::FrameCodec;
use crate::transport::{decode, encode, RpcRequest, RpcResponse, PROTOCOL_VERSION};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

pub struct RpcClient {
    framed: Framed<TcpStream, FrameCodec>,
    next_id: AtomicU64,
    /// `None` disables the per-call timer (debugger attached).
    timeout: Option<Duration>,
}

impl RpcClient {
    /// Dial a server. No handshake is performed; call
    /// [`RpcClient::connect_handshake`] (or `SimManager.Connect` directly)
    /// before anything else.
    pub async fn dial(addr: &str) -> Result<RpcClient, ServerError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ServerError::opaque(format!("dial {addr}: {e}")))?;
        let codec = FrameCodec::new(Arc::new(TrafficCounters::default()));
        Ok(RpcClient {
            framed: Framed::new(stream, codec),
            next_id: AtomicU64::new(1),
            timeout: Some(DEFAULT_CALL_TIMEOUT),
        })
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Exchange protocol versions as the mandatory first RPC.
    pub async fn connect_handshake<R: DeserializeOwned>(&mut self) -> Result<R, ServerError> {
        #[derive(Serialize)]
        struct ConnectArgs {
            version: i32,
        }
        self.call("SimManager.Connect", &ConnectArgs { version: PROTOCOL_VERSION }).await
    }

    /// Issue one RPC and await its reply. Calls are serialized; replies are
    /// matched by envelope id. An error string in the reply is rehydrated
    /// through the error registry.
    pub async fn call<A: Serialize, R: DeserializeOwned>(
        &mut self,
        method: &str,
        args: &A,
    ) -> Result<R, ServerError> {
        let limit = self.timeout;
        let fut = self.call_inner(method, args);
        match limit {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(ErrorKind::RpcTimeout.into()),
            },
            None => fut.await,
        }
    }

    async fn call_inner<A: Serialize, R: DeserializeOwned>(
        &mut self,
        method: &str,
        args: &A,
    ) -> Result<R, ServerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest { id, method: method.to_owned(), params: encode(args)? };
        let frame = encode(&request)?;
        self.framed
            .send(Bytes::from(frame))
            .await
            .map_err(|e| ServerError::opaque(format!("send {method}: {e}")))?;

        loop {
            let frame = match self.framed.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(ServerError::opaque(format!("recv {method}: {e}"))),
                None => return Err(ErrorKind::ServerDisconnected.into()),
            };
            let response: RpcResponse = decode(&frame)?;
            if response.id != id {
                // A stale reply from an abandoned (timed out) call.
                continue;
            }
            if let Some(error) = response.error {
                return Err(ServerError::decode(&error));
            }
            return decode(&response.payload);
        }
    }
}
