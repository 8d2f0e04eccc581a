// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame codec: u32 length prefix around a zlib-compressed messagepack body.
//!
//! Compression is applied per frame, symmetric in both directions, and the
//! codec records raw byte counts for the status page.

use std::io::{Read as _, Write as _};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::session::TrafficCounters;

/// Frames larger than this are treated as protocol corruption.
const MAX_FRAME: usize = 16 * 1024 * 1024;

pub struct FrameCodec {
    inner: LengthDelimitedCodec,
    counters: Arc<TrafficCounters>,
}

impl FrameCodec {
    pub fn new(counters: Arc<TrafficCounters>) -> FrameCodec {
        let inner = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME)
            .new_codec();
        FrameCodec { inner, counters }
    }

    pub fn counters(&self) -> Arc<TrafficCounters> {
        Arc::clone(&self.counters)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> std::io::Result<()> {
        let mut enc = ZlibEncoder::new(Vec::with_capacity(item.len() / 2), Compression::default());
        enc.write_all(&item)?;
        let compressed = enc.finish()?;
        self.counters.add_out(compressed.len() as u64 + 4);
        self.inner.encode(Bytes::from(compressed), dst)
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::io::Result<Option<BytesMut>> {
        let Some(frame) = self.inner.decode(src)? else {
            return Ok(None);
        };
        self.counters.add_in(frame.len() as u64 + 4);
        let mut body = Vec::new();
        ZlibDecoder::new(frame.as_ref()).take(MAX_FRAME as u64 + 1).read_to_end(&mut body)?;
        if body.len() > MAX_FRAME {
            return Err(std::io::Error::other("decompressed frame too large"));
        }
        Ok(Some(BytesMut::from(body.as_slice())))
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
