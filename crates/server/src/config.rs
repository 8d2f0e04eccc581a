// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone, Default, clap::Parser)]
#[command(name = "towerline", version, about = "Multi-controller ATC training simulator server.")]
pub struct ServerConfig {
    /// RPC port to listen on (0 = pick any).
    #[arg(long, default_value_t = 0, env = "TOWERLINE_PORT")]
    pub port: u16,

    /// Base port for the HTTP side channel; ten consecutive ports are tried.
    #[arg(long, default_value_t = 6502, env = "TOWERLINE_HTTP_PORT")]
    pub http_port: u16,

    /// Upstream server for relayed TTS and weather, host:port.
    #[arg(long, env = "TOWERLINE_SERVER_ADDRESS")]
    pub server_address: Option<String>,

    /// Single-user local session: no idle timeouts, no eviction.
    #[arg(long)]
    pub local: bool,

    /// Additional scenario file(s) to merge into the catalog. Broken files
    /// are reported and skipped.
    #[arg(long = "extra-scenario")]
    pub extra_scenarios: Vec<PathBuf>,

    /// Additional video map file(s) passed through to the scenario loader.
    #[arg(long = "extra-video-map")]
    pub extra_video_maps: Vec<PathBuf>,

    /// Disable upstream call timeouts and idle culling (debugger attached).
    #[arg(long, hide = true, env = "TOWERLINE_DEBUG_HOLD")]
    pub debug_hold: bool,

    /// Directory for server logs and client crash reports.
    #[arg(long, default_value = ".", env = "TOWERLINE_LOG_DIR")]
    pub log_dir: PathBuf,

    /// File holding the admin broadcast secret.
    #[arg(long, default_value = "password")]
    pub password_file: PathBuf,
}

impl ServerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for path in &self.extra_video_maps {
            if !path.exists() {
                anyhow::bail!("video map file does not exist: {}", path.display());
            }
        }
        Ok(())
    }

    /// Service-account JSON for object storage and cloud TTS, if configured.
    pub fn gcs_credentials(&self) -> Option<String> {
        std::env::var("TOWERLINE_GCS_CREDENTIALS").ok().filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
