// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP accept loop and per-connection RPC service.
//!
//! Each connection gets its own worker; each request is served on a further
//! short-lived worker so a panicking handler is absorbed at the task
//! boundary, logged, and answered with a generic internal error instead of
//! tearing the connection (or the process) down.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::dispatch::{Dispatcher, RequestContext};
use crate::error::ServerError;
use crate::session::TrafficCounters;
use crate::transport::codec::FrameCodec;
use crate::transport::{decode, encode, RpcRequest, RpcResponse};

/// Serve RPC connections until shutdown.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let dispatcher = Arc::clone(&dispatcher);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, dispatcher, shutdown).await {
                        debug!(%peer, err = %e, "connection closed");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let counters = Arc::new(TrafficCounters::default());
    let framed = Framed::new(stream, FrameCodec::new(Arc::clone(&counters)));
    let (mut sink, mut frames) = framed.split();

    // Request workers funnel their replies through one writer so frames
    // never interleave.
    let (reply_tx, mut reply_rx) = mpsc::channel::<Bytes>(64);
    let handshaken = Arc::new(AtomicBool::new(false));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            Some(frame) = reply_rx.recv() => {
                sink.send(frame).await?;
            }

            next = frames.next() => {
                let frame = match next {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => anyhow::bail!("read frame: {e}"),
                    None => break,
                };
                let request: RpcRequest = match decode(&frame) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(%peer, err = %e, "undecodable request frame");
                        continue;
                    }
                };
                let ctx = RequestContext {
                    peer,
                    traffic: Arc::clone(&counters),
                    handshaken: handshaken.load(Ordering::Acquire),
                };
                tokio::spawn(handle_request(
                    Arc::clone(&dispatcher),
                    ctx,
                    request,
                    reply_tx.clone(),
                    Arc::clone(&handshaken),
                ));
            }
        }
    }

    // Drain replies already in flight before closing the socket.
    drop(reply_tx);
    while let Some(frame) = reply_rx.recv().await {
        sink.send(frame).await?;
    }
    Ok(())
}

/// One RPC. The dispatch itself runs on an inner task so that a panic in a
/// handler surfaces as a `JoinError` here rather than unwinding the
/// connection worker.
async fn handle_request(
    dispatcher: Arc<Dispatcher>,
    ctx: RequestContext,
    request: RpcRequest,
    reply_tx: mpsc::Sender<Bytes>,
    handshaken: Arc<AtomicBool>,
) {
    let id = request.id;
    let method = request.method.clone();
    let joined = tokio::spawn(async move {
        dispatcher.dispatch(&ctx, &request.method, &request.params).await
    })
    .await;

    let response = match joined {
        Ok(Ok(payload)) => {
            if method == "SimManager.Connect" {
                handshaken.store(true, Ordering::Release);
            }
            RpcResponse::ok(id, payload)
        }
        Ok(Err(e)) => RpcResponse::err(id, &e),
        Err(join_err) => {
            error!(%method, err = %join_err, "RPC handler panicked");
            RpcResponse::err(id, &ServerError::opaque("internal error"))
        }
    };

    match encode(&response) {
        Ok(frame) => {
            let _ = reply_tx.send(Bytes::from(frame)).await;
        }
        Err(e) => error!(%method, err = %e, "encoding RPC response"),
    }
}
