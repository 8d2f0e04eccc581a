// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::{ProviderGate, ProviderSet, INIT_DEADLINE};
use crate::config::ServerConfig;

#[tokio::test]
async fn ready_gate_returns_immediately() {
    let gate = ProviderGate::ready(ProviderSet::default());
    let set = gate.providers().await;
    assert!(set.weather.is_none());
    assert!(set.tts.is_none());
    assert!(set.weather_intervals.is_empty());
}

#[tokio::test]
#[serial_test::serial]
async fn spawned_gate_closes_within_the_deadline() {
    // No credentials, no upstream: the chain settles on offline weather and
    // no TTS, well inside the bound.
    std::env::remove_var("TOWERLINE_GCS_CREDENTIALS");
    let gate = ProviderGate::spawn(&ServerConfig::default());
    let set = tokio::time::timeout(INIT_DEADLINE + Duration::from_secs(1), gate.providers())
        .await
        .expect("latch closed in time");
    assert!(set.tts.is_none());
    assert_eq!(set.weather.as_ref().map(|w| w.describe()), Some("offline resources"));
    assert!(set.weather_intervals.contains_key("*"));
}

#[tokio::test]
async fn all_accessors_see_the_same_set() {
    let gate = ProviderGate::ready(ProviderSet::default());
    let a = gate.providers().await;
    let b = gate.clone().providers().await;
    assert!(std::sync::Arc::ptr_eq(&a, &b));
}
