// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External provider brokerage.
//!
//! TTS and weather providers are initialized in parallel at manager
//! construction under a shared bounded wait; a latch closes when both
//! attempts have completed (success or failure). The server starts either
//! way — calls that need an absent provider fail individually.

pub mod tts;
pub mod weather;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::providers::tts::TtsEngine;
use crate::providers::weather::WeatherSource;

/// Bound on provider initialization; the latch closes no later than this.
pub const INIT_DEADLINE: Duration = Duration::from_secs(4);

/// What provider initialization produced.
#[derive(Default)]
pub struct ProviderSet {
    pub weather: Option<WeatherSource>,
    pub tts: Option<TtsEngine>,
    /// Facility -> (start, end) epoch-seconds span of available weather data,
    /// advertised in `Connect` so clients can schedule refreshes.
    pub weather_intervals: HashMap<String, (i64, i64)>,
}

/// Readiness latch over the provider set. Cheap to clone; all accessors
/// block on the latch, which is bounded by construction.
#[derive(Clone)]
pub struct ProviderGate {
    rx: watch::Receiver<Option<Arc<ProviderSet>>>,
}

impl ProviderGate {
    /// Spawn the initialization workers and return the gate immediately.
    pub fn spawn(config: &ServerConfig) -> ProviderGate {
        let (tx, rx) = watch::channel(None);
        let config = config.clone();
        tokio::spawn(async move {
            let (weather, tts) = tokio::join!(
                tokio::time::timeout(INIT_DEADLINE, weather::init(&config)),
                tokio::time::timeout(INIT_DEADLINE, tts::init(&config)),
            );
            let weather = match weather {
                Ok(source) => source,
                Err(_) => {
                    warn!("weather provider initialization timed out");
                    None
                }
            };
            let tts = match tts {
                Ok(engine) => engine,
                Err(_) => {
                    warn!("TTS provider initialization timed out");
                    None
                }
            };
            let weather_intervals = match &weather {
                Some(source) => source.time_intervals(),
                None => HashMap::new(),
            };
            info!(
                weather = weather.as_ref().map(WeatherSource::describe),
                tts = tts.as_ref().map(TtsEngine::describe),
                "providers ready"
            );
            let _ = tx.send(Some(Arc::new(ProviderSet { weather, tts, weather_intervals })));
        });
        ProviderGate { rx }
    }

    /// A gate that is already closed over the given set (tests, local mode).
    pub fn ready(set: ProviderSet) -> ProviderGate {
        let (_tx, rx) = watch::channel(Some(Arc::new(set)));
        ProviderGate { rx }
    }

    /// Wait for initialization to finish and return the set.
    pub async fn providers(&self) -> Arc<ProviderSet> {
        let mut rx = self.rx.clone();
        loop {
            if let Some(set) = rx.borrow().clone() {
                return set;
            }
            if rx.changed().await.is_err() {
                // Init task dropped without sending; behave as no providers.
                return Arc::new(ProviderSet::default());
            }
        }
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
