// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::FrameCodec;
use crate::session::TrafficCounters;
use crate::transport::{decode, encode, RpcRequest, RpcResponse};

fn round_trip(payload: &[u8]) -> BytesMut {
    let counters = Arc::new(TrafficCounters::default());
    let mut codec = FrameCodec::new(counters);
    let mut wire = BytesMut::new();
    codec.encode(Bytes::copy_from_slice(payload), &mut wire).expect("encode");
    codec.decode(&mut wire).expect("decode").expect("one frame")
}

#[test]
fn frames_round_trip() {
    let payload = b"hello towerline";
    assert_eq!(round_trip(payload).as_ref(), payload);
}

#[test]
fn empty_frame_round_trips() {
    assert_eq!(round_trip(b"").as_ref(), b"");
}

#[test]
fn repetitive_payloads_shrink_on_the_wire() {
    let counters = Arc::new(TrafficCounters::default());
    let mut codec = FrameCodec::new(Arc::clone(&counters));
    let payload = vec![b'a'; 64 * 1024];
    let mut wire = BytesMut::new();
    codec.encode(Bytes::from(payload.clone()), &mut wire).expect("encode");
    assert!(
        wire.len() < payload.len() / 10,
        "compression had little effect: {} bytes",
        wire.len()
    );
    let decoded = codec.decode(&mut wire).expect("decode").expect("one frame");
    assert_eq!(decoded.as_ref(), payload.as_slice());
}

#[test]
fn byte_counters_track_compressed_sizes() {
    let counters = Arc::new(TrafficCounters::default());
    let mut codec = FrameCodec::new(Arc::clone(&counters));
    let mut wire = BytesMut::new();
    codec.encode(Bytes::from_static(b"some payload"), &mut wire).expect("encode");

    let sent = counters.bytes_out.load(Ordering::Relaxed);
    assert_eq!(sent as usize, wire.len());

    codec.decode(&mut wire).expect("decode").expect("one frame");
    assert_eq!(counters.bytes_in.load(Ordering::Relaxed), sent);
}

#[test]
fn partial_frames_wait_for_more_bytes() {
    let counters = Arc::new(TrafficCounters::default());
    let mut codec = FrameCodec::new(Arc::clone(&counters));
    let mut wire = BytesMut::new();
    codec.encode(Bytes::from_static(b"partial delivery"), &mut wire).expect("encode");

    let full = wire.clone();
    let mut first_half = BytesMut::from(&full[..full.len() / 2]);
    assert_eq!(codec.decode(&mut first_half).expect("decode"), None);

    first_half.extend_from_slice(&full[full.len() / 2..]);
    let frame = codec.decode(&mut first_half).expect("decode").expect("one frame");
    assert_eq!(frame.as_ref(), b"partial delivery");
}

#[test]
fn corrupt_compression_is_an_error() {
    let counters = Arc::new(TrafficCounters::default());
    let mut codec = FrameCodec::new(counters);
    // A valid length prefix around bytes that are not a zlib stream.
    let mut wire = BytesMut::from(&[0u8, 0, 0, 4, 0xde, 0xad, 0xbe, 0xef][..]);
    assert!(codec.decode(&mut wire).is_err());
}

#[test]
fn envelopes_round_trip_through_messagepack() {
    let request = RpcRequest {
        id: 7,
        method: "Sim.GetStateUpdate".to_owned(),
        params: vec![1, 2, 3],
    };
    let bytes = encode(&request).expect("encode");
    let back: RpcRequest = decode(&bytes).expect("decode");
    assert_eq!(back.id, 7);
    assert_eq!(back.method, "Sim.GetStateUpdate");
    assert_eq!(back.params, vec![1, 2, 3]);

    let response = RpcResponse::err(7, &crate::error::ErrorKind::RpcTimeout.into());
    let bytes = encode(&response).expect("encode");
    let back: RpcResponse = decode(&bytes).expect("decode");
    assert_eq!(back.error.as_deref(), Some("RPC call timed out"));
    assert!(back.payload.is_empty());
}
