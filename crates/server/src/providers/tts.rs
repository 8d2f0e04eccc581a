// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Text-to-speech provider chain: direct cloud client or upstream relay.
//! Unlike weather there is no offline floor — without credentials or an
//! upstream, TTS is simply unavailable.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::ServerConfig;
use crate::error::{ErrorKind, ServerError};
use crate::transport::client::RpcClient;

pub const TTS_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    /// Filled by the transport from the connection's remote address; used
    /// for per-client word accounting, never trusted from the client.
    #[serde(default)]
    pub client_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisReply {
    pub audio: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoicesReply {
    pub voices: Vec<String>,
}

pub enum TtsEngine {
    Cloud(CloudTts),
    Remote(RemoteTts),
}

impl TtsEngine {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Cloud(_) => "cloud",
            Self::Remote(_) => "upstream relay",
        }
    }

    pub async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, ServerError> {
        match self {
            Self::Cloud(p) => p.synthesize(text, voice).await,
            Self::Remote(p) => p.synthesize(text, voice).await,
        }
    }

    pub async fn voices(&self) -> Result<Vec<String>, ServerError> {
        match self {
            Self::Cloud(p) => p.voices().await,
            Self::Remote(p) => p.voices().await,
        }
    }
}

pub async fn init(config: &ServerConfig) -> Option<TtsEngine> {
    if let Some(creds) = config.gcs_credentials() {
        match CloudTts::new(&creds, config.debug_hold) {
            Ok(p) => return Some(TtsEngine::Cloud(p)),
            Err(e) => warn!(err = %e, "cloud TTS unavailable"),
        }
    }
    if let Some(addr) = &config.server_address {
        match RemoteTts::dial(addr, config.debug_hold).await {
            Ok(p) => return Some(TtsEngine::Remote(p)),
            Err(e) => warn!(addr = %addr, err = %e, "upstream TTS unavailable"),
        }
    }
    None
}

fn call_timeout(debug_hold: bool) -> Option<Duration> {
    if debug_hold {
        None
    } else {
        Some(TTS_CALL_TIMEOUT)
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

// -- Cloud --------------------------------------------------------------------

pub struct CloudTts {
    http: reqwest::Client,
    api_key: String,
    timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct CloudCredentials {
    private_key_id: String,
}

#[derive(Debug, Deserialize)]
struct CloudSynthesisResponse {
    #[serde(rename = "audioContent")]
    audio_content: String,
}

#[derive(Debug, Deserialize)]
struct CloudVoice {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CloudVoicesResponse {
    voices: Vec<CloudVoice>,
}

impl CloudTts {
    pub fn new(credentials_json: &str, debug_hold: bool) -> anyhow::Result<CloudTts> {
        let creds: CloudCredentials = serde_json::from_str(credentials_json)?;
        Ok(CloudTts {
            http: reqwest::Client::new(),
            api_key: creds.private_key_id,
            timeout: call_timeout(debug_hold),
        })
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, ServerError> {
        let body = serde_json::json!({
            "input": { "text": text },
            "voice": { "languageCode": "en-US", "name": voice },
            "audioConfig": { "audioEncoding": "MP3" },
        });
        let http = self.http.clone();
        let key = self.api_key.clone();
        let response = bounded(self.timeout, async move {
            let response = http
                .post("https://texttospeech.googleapis.com/v1/text:synthesize")
                .bearer_auth(key)
                .json(&body)
                .send()
                .await
                .map_err(|e| ServerError::opaque(format!("TTS request: {e}")))?;
            if !response.status().is_success() {
                return Err(ServerError::opaque(format!("TTS status {}", response.status())));
            }
            response
                .json::<CloudSynthesisResponse>()
                .await
                .map_err(|e| ServerError::opaque(format!("TTS decode: {e}")))
        })
        .await?;
        BASE64
            .decode(response.audio_content)
            .map_err(|e| ServerError::opaque(format!("TTS audio decode: {e}")))
    }

    async fn voices(&self) -> Result<Vec<String>, ServerError> {
        let http = self.http.clone();
        let key = self.api_key.clone();
        let response = bounded(self.timeout, async move {
            let response = http
                .get("https://texttospeech.googleapis.com/v1/voices?languageCode=en-US")
                .bearer_auth(key)
                .send()
                .await
                .map_err(|e| ServerError::opaque(format!("voices request: {e}")))?;
            response
                .json::<CloudVoicesResponse>()
                .await
                .map_err(|e| ServerError::opaque(format!("voices decode: {e}")))
        })
        .await?;
        Ok(response.voices.into_iter().map(|v| v.name).collect())
    }
}

// -- Upstream relay -----------------------------------------------------------

pub struct RemoteTts {
    client: Mutex<RpcClient>,
}

impl RemoteTts {
    pub async fn dial(addr: &str, debug_hold: bool) -> Result<RemoteTts, ServerError> {
        let mut client = RpcClient::dial(addr).await?;
        client.set_timeout(call_timeout(debug_hold));
        let _: serde_json::Value = client.connect_handshake().await?;
        Ok(RemoteTts { client: Mutex::new(client) })
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, ServerError> {
        let args = SynthesisRequest {
            text: text.to_owned(),
            voice: voice.to_owned(),
            client_addr: String::new(),
        };
        let reply: SynthesisReply =
            self.client.lock().await.call("SimManager.TextToSpeech", &args).await?;
        Ok(reply.audio)
    }

    async fn voices(&self) -> Result<Vec<String>, ServerError> {
        let reply: VoicesReply =
            self.client.lock().await.call("SimManager.GetAllVoices", &()).await?;
        Ok(reply.voices)
    }
}
