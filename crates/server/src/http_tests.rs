// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum_test::TestServer;

use super::build_router;
use crate::test_support::{join_new_sim, test_manager};

#[tokio::test]
async fn status_page_lists_sessions() {
    let (manager, _) = test_manager();
    join_new_sim(&manager, "alpha<script>", "AB").map(|_| ()).expect("ok");

    let server = TestServer::new(build_router(manager)).expect("server");
    let response = server.get("/sup").await;
    response.assert_status_ok();
    let body = response.text();
    assert!(body.contains("towerline"));
    assert!(body.contains("cpu:"), "process CPU is shown: {body}");
    assert!(body.contains("memory:"), "process memory is shown: {body}");
    assert!(body.contains("alpha&lt;script&gt;"), "session names are escaped: {body}");
    assert!(!body.contains("alpha<script>"));
}

#[tokio::test]
async fn debug_stats_serves_json_counters() {
    let (manager, _) = test_manager();
    join_new_sim(&manager, "alpha", "AB").map(|_| ()).expect("ok");

    let server = TestServer::new(build_router(manager)).expect("server");
    let response = server.get("/debug/stats").await;
    response.assert_status_ok();
    let stats: serde_json::Value = response.json();
    assert_eq!(stats["sessions"][0]["name"], "alpha");
    assert!(stats["uptime_secs"].is_u64());
    assert!(stats["runtime"]["rss_bytes"].is_u64());
    assert!(stats["runtime"]["cpu_user_secs"].is_u64());
}

#[tokio::test]
async fn speech_requires_a_bearer_token() {
    let (manager, _) = test_manager();
    let server = TestServer::new(build_router(manager)).expect("server");

    // A well-formed upgrade request with no bearer token.
    let response = server
        .get("/speech")
        .add_header("connection", "upgrade")
        .add_header("upgrade", "websocket")
        .add_header("sec-websocket-version", "13")
        .add_header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .await;
    response.assert_status_unauthorized();

    // Same, with a token no controller holds.
    let response = server
        .get("/speech")
        .add_header("connection", "upgrade")
        .add_header("upgrade", "websocket")
        .add_header("sec-websocket-version", "13")
        .add_header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .add_header("authorization", "Bearer bogus-token")
        .await;
    response.assert_status_unauthorized();
}
