// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP side channel: status page, speech WebSocket, debug counters.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::manager::SimManager;
use crate::session::SpeechPacket;

/// How many consecutive ports are tried from the configured base.
const PORT_SCAN_WIDTH: u16 = 10;

pub fn build_router(manager: Arc<SimManager>) -> Router {
    Router::new()
        .route("/sup", get(status_page))
        .route("/speech", get(speech_handler))
        .route("/debug/stats", get(debug_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

/// Bind the first free port in the scan range and serve until the process
/// exits. Returns the bound address.
pub async fn serve(manager: Arc<SimManager>, base_port: u16) -> anyhow::Result<SocketAddr> {
    let mut listener = None;
    for port in base_port..base_port.saturating_add(PORT_SCAN_WIDTH) {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(bound) => {
                listener = Some(bound);
                break;
            }
            Err(e) => debug!(port, err = %e, "HTTP port in use, trying next"),
        }
    }
    let Some(listener) = listener else {
        anyhow::bail!(
            "no free HTTP port in {}..{}",
            base_port,
            base_port.saturating_add(PORT_SCAN_WIDTH)
        );
    };
    let addr = listener.local_addr()?;
    let router = build_router(manager);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(err = %e, "HTTP side channel failed");
        }
    });
    info!(%addr, "status endpoint up");
    Ok(addr)
}

/// `GET /sup` — human-readable status page.
async fn status_page(State(manager): State<Arc<SimManager>>) -> Html<String> {
    let stats = manager.stats();
    let mut page = String::with_capacity(4096);
    page.push_str("<!doctype html><html><head><title>towerline</title></head><body>");
    page.push_str("<h1>towerline</h1>");
    page.push_str(&format!("<p>uptime: {}s</p>", stats.uptime_secs));
    page.push_str(&format!(
        "<p>cpu: {}s user, {}s system; memory: {} MiB resident</p>",
        stats.runtime.cpu_user_secs,
        stats.runtime.cpu_system_secs,
        stats.runtime.rss_bytes / (1024 * 1024),
    ));

    page.push_str("<h2>sessions</h2><table border=1><tr><th>name</th><th>scenario</th><th>controllers</th><th>bytes in</th><th>bytes out</th></tr>");
    for s in &stats.sessions {
        page.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&s.name),
            escape(&s.scenario),
            s.controllers,
            s.bytes_in,
            s.bytes_out,
        ));
    }
    page.push_str("</table>");

    page.push_str("<h2>TTS usage</h2><table border=1><tr><th>client</th><th>words</th></tr>");
    let mut usage: Vec<_> = stats.tts_words_by_client.iter().collect();
    usage.sort();
    for (client, words) in usage {
        page.push_str(&format!("<tr><td>{}</td><td>{}</td></tr>", escape(client), words));
    }
    page.push_str("</table></body></html>");
    Html(page)
}

/// `GET /debug/stats` — runtime counters as JSON.
async fn debug_stats(State(manager): State<Arc<SimManager>>) -> impl IntoResponse {
    Json(manager.stats())
}

/// `GET /speech` — WebSocket upgrade for asynchronous audio delivery.
/// Authenticated by `Authorization: Bearer <controller token>`.
async fn speech_handler(
    State(manager): State<Arc<SimManager>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    let Some(token) = bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
    };
    let Some(c) = manager.lookup_controller(&token) else {
        return (StatusCode::UNAUTHORIZED, "unknown controller token").into_response();
    };
    let session = c.session;
    ws.on_upgrade(move |socket| speech_loop(socket, session, token))
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

/// Forward queued readback audio to the client. Packets travel as binary
/// messagepack frames; backpressure blocks only this socket.
async fn speech_loop(
    mut socket: WebSocket,
    session: Arc<crate::session::Session>,
    token: String,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<SpeechPacket>();
    if !session.attach_speech(&token, tx) {
        // Signed off between the upgrade and now.
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            packet = rx.recv() => {
                let Some(packet) = packet else { break };
                let Ok(frame) = rmp_serde::to_vec_named(&packet) else { continue };
                if socket.send(Message::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    session.detach_speech(&token);
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
