// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC transport: length-framed, per-frame-compressed messagepack over TCP.
//!
//! Every frame is one `RpcRequest` or `RpcResponse` envelope. The envelope's
//! params/payload are themselves messagepack-encoded argument and reply
//! structs, so a reply can be dropped wholesale when the method errored.

pub mod client;
pub mod codec;
pub mod server;

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Bumped for any wire-incompatible change.
pub const PROTOCOL_VERSION: i32 = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    pub params: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    pub error: Option<String>,
    pub payload: Vec<u8>,
}

impl RpcResponse {
    pub fn ok(id: u64, payload: Vec<u8>) -> RpcResponse {
        RpcResponse { id, error: None, payload }
    }

    pub fn err(id: u64, error: &ServerError) -> RpcResponse {
        RpcResponse { id, error: Some(error.to_string()), payload: Vec::new() }
    }
}

/// Messagepack-encode an argument or reply struct.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ServerError> {
    rmp_serde::to_vec_named(value).map_err(|e| ServerError::opaque(format!("encode: {e}")))
}

/// Messagepack-decode an argument or reply struct.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, ServerError> {
    rmp_serde::from_slice(bytes).map_err(|e| ServerError::opaque(format!("decode: {e}")))
}
