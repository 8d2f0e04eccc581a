// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Weather provider chain: object storage, upstream relay, offline
//! resources. The first that initializes wins.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::{ErrorKind, ServerError};
use crate::transport::client::RpcClient;

/// Precipitation mosaics are republished on this cadence.
const PRECIP_INTERVAL: i64 = 6 * 60;
/// Atmospheric grids are republished hourly.
const ATMOS_INTERVAL: i64 = 60 * 60;

pub const WEATHER_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// One point of the gridded atmospheric sounding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtmosPoint {
    pub altitude: i32,
    pub temperature_c: f32,
    pub wind_dir: i32,
    pub wind_kts: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtmosGrid {
    pub airport: String,
    pub points: Vec<AtmosPoint>,
}

pub enum WeatherSource {
    Gcs(GcsWeather),
    Remote(RemoteWeather),
    Offline(OfflineWeather),
}

impl WeatherSource {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Gcs(_) => "object storage",
            Self::Remote(_) => "upstream relay",
            Self::Offline(_) => "offline resources",
        }
    }

    /// URL of the precipitation mosaic covering `t`, plus the timestamp at
    /// which newer data becomes available.
    pub async fn precip_url(&self, facility: &str, t: i64) -> Result<(String, i64), ServerError> {
        match self {
            Self::Gcs(p) => p.precip_url(facility, t).await,
            Self::Remote(p) => p.precip_url(facility, t).await,
            // Offline resources carry atmospheric data only; there is no
            // canned precipitation imagery.
            Self::Offline(_) => Err(ErrorKind::WeatherUnavailable.into()),
        }
    }

    /// Atmospheric grid for the facility at `t`, plus the next-refresh
    /// timestamp.
    pub async fn atmos_grid(
        &self,
        facility: &str,
        t: i64,
        primary_airport: &str,
    ) -> Result<(AtmosGrid, i64), ServerError> {
        match self {
            Self::Gcs(p) => p.atmos_grid(facility, t, primary_airport).await,
            Self::Remote(p) => p.atmos_grid(facility, t, primary_airport).await,
            Self::Offline(p) => Ok(p.atmos_grid(facility, t, primary_airport)),
        }
    }

    pub fn time_intervals(&self) -> HashMap<String, (i64, i64)> {
        match self {
            // Object storage and the relay serve a trailing 24 h window.
            Self::Gcs(_) | Self::Remote(_) => {
                let now = chrono::Utc::now().timestamp();
                HashMap::from([("*".to_owned(), (now - 24 * 3600, now))])
            }
            Self::Offline(_) => HashMap::from([("*".to_owned(), (0, i64::MAX))]),
        }
    }
}

/// Try the chain in order. Never fails the server: the offline provider is
/// the floor.
pub async fn init(config: &ServerConfig) -> Option<WeatherSource> {
    if let Some(creds) = config.gcs_credentials() {
        match GcsWeather::new(&creds, config.debug_hold) {
            Ok(p) => return Some(WeatherSource::Gcs(p)),
            Err(e) => warn!(err = %e, "object-storage weather unavailable"),
        }
    }
    if let Some(addr) = &config.server_address {
        match RemoteWeather::dial(addr, config.debug_hold).await {
            Ok(p) => return Some(WeatherSource::Remote(p)),
            Err(e) => warn!(addr = %addr, err = %e, "upstream weather unavailable"),
        }
    }
    debug!("using offline weather resources");
    Some(WeatherSource::Offline(OfflineWeather))
}

fn next_refresh(t: i64, interval: i64) -> i64 {
    t - t.rem_euclid(interval) + interval
}

fn call_timeout(debug_hold: bool) -> Option<Duration> {
    if debug_hold {
        None
    } else {
        Some(WEATHER_CALL_TIMEOUT)
    }
}

async fn bounded<T>(
    limit: Option<Duration>,
    fut: impl std::future::Future<Output = Result<T, ServerError>>,
) -> Result<T, ServerError> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ErrorKind::RpcTimeout.into()),
        },
        None => fut.await,
    }
}

// -- Object storage -----------------------------------------------------------

/// Reads the public weather bucket with ambient service-account credentials.
pub struct GcsWeather {
    http: reqwest::Client,
    bucket: String,
    timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct ServiceAccount {
    project_id: String,
}

impl GcsWeather {
    pub fn new(credentials_json: &str, debug_hold: bool) -> anyhow::Result<GcsWeather> {
        let account: ServiceAccount = serde_json::from_str(credentials_json)?;
        Ok(GcsWeather {
            http: reqwest::Client::new(),
            bucket: format!("{}-wx", account.project_id),
            timeout: call_timeout(debug_hold),
        })
    }

    async fn precip_url(&self, facility: &str, t: i64) -> Result<(String, i64), ServerError> {
        let slot = t - t.rem_euclid(PRECIP_INTERVAL);
        let url = format!(
            "https://storage.googleapis.com/{}/precip/{facility}/{slot}.png",
            self.bucket
        );
        Ok((url, next_refresh(t, PRECIP_INTERVAL)))
    }

    async fn atmos_grid(
        &self,
        facility: &str,
        t: i64,
        primary_airport: &str,
    ) -> Result<(AtmosGrid, i64), ServerError> {
        let slot = t - t.rem_euclid(ATMOS_INTERVAL);
        let url = format!(
            "https://storage.googleapis.com/{}/atmos/{facility}/{primary_airport}/{slot}.json",
            self.bucket
        );
        let http = self.http.clone();
        let grid = bounded(self.timeout, async move {
            let response = http
                .get(&url)
                .send()
                .await
                .map_err(|e| ServerError::opaque(format!("atmos fetch: {e}")))?;
            if !response.status().is_success() {
                return Err(ErrorKind::WeatherUnavailable.into());
            }
            response
                .json::<AtmosGrid>()
                .await
                .map_err(|e| ServerError::opaque(format!("atmos decode: {e}")))
        })
        .await?;
        Ok((grid, next_refresh(t, ATMOS_INTERVAL)))
    }
}

// -- Upstream relay -----------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct PrecipUrlArgs {
    pub facility: String,
    pub time: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrecipUrlReply {
    pub url: String,
    pub next_refresh: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AtmosGridArgs {
    pub facility: String,
    pub time: i64,
    pub primary_airport: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AtmosGridReply {
    pub grid: AtmosGrid,
    pub next_refresh: i64,
}

/// Relays weather RPCs to an upstream server over the same wire protocol.
pub struct RemoteWeather {
    client: Mutex<RpcClient>,
}

impl RemoteWeather {
    pub async fn dial(addr: &str, debug_hold: bool) -> Result<RemoteWeather, ServerError> {
        let mut client = RpcClient::dial(addr).await?;
        client.set_timeout(call_timeout(debug_hold));
        let _: serde_json::Value = client.connect_handshake().await?;
        Ok(RemoteWeather { client: Mutex::new(client) })
    }

    async fn precip_url(&self, facility: &str, t: i64) -> Result<(String, i64), ServerError> {
        let args = PrecipUrlArgs { facility: facility.to_owned(), time: t };
        let reply: PrecipUrlReply =
            self.client.lock().await.call("SimManager.GetPrecipURL", &args).await?;
        Ok((reply.url, reply.next_refresh))
    }

    async fn atmos_grid(
        &self,
        facility: &str,
        t: i64,
        primary_airport: &str,
    ) -> Result<(AtmosGrid, i64), ServerError> {
        let args = AtmosGridArgs {
            facility: facility.to_owned(),
            time: t,
            primary_airport: primary_airport.to_owned(),
        };
        let reply: AtmosGridReply =
            self.client.lock().await.call("SimManager.GetAtmosGrid", &args).await?;
        Ok((reply.grid, reply.next_refresh))
    }
}

// -- Offline ------------------------------------------------------------------

/// Canned standard-atmosphere data bundled with the server.
pub struct OfflineWeather;

impl OfflineWeather {
    fn atmos_grid(&self, _facility: &str, t: i64, primary_airport: &str) -> (AtmosGrid, i64) {
        // ISA lapse rate from a 15C surface, calm winds.
        let points = (0..8)
            .map(|i| {
                let altitude = i * 4000;
                AtmosPoint {
                    altitude,
                    temperature_c: 15.0 - 1.98 * (altitude as f32 / 1000.0),
                    wind_dir: 270,
                    wind_kts: 5 + i * 3,
                }
            })
            .collect();
        let grid = AtmosGrid { airport: primary_airport.to_owned(), points };
        (grid, next_refresh(t, ATMOS_INTERVAL))
    }
}

#[cfg(test)]
#[path = "weather_tests.rs"]
mod tests;
