//! Metadata side-channel encoding, chunking, and reassembly.
//!
//! Metadata travels as an ordered multimap carried in one or more METADATA
//! frames per logical block. Chunking is bounded by a configurable payload
//! size independent of the DATA flow-control windows; reassembly is bounded
//! by a separate hard cap and rejects oversized blocks outright instead of
//! truncating them.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ErrorCode, MuxError};
use crate::frame::MetadataFrame;

/// An ordered multimap of string keys to string values.
///
/// Duplicate keys are preserved as distinct entries in insertion order;
/// encoding and reassembly round-trip the exact entry sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataMap {
    entries: Vec<(String, String)>,
}

impl MetadataMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; existing entries with the same key are kept.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Number of entries, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// All values recorded for `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MetadataMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Serialize `map` into the minimum number of METADATA frames for
/// `stream_id`, none exceeding `max_frame_size` encoded bytes.
///
/// Entry order and duplicates survive chunk boundaries; only the final
/// chunk carries the end-of-block marker. An empty map still produces one
/// (empty, end-marked) frame so the block boundary is observable.
pub fn encode_block(
    stream_id: u32,
    map: &MetadataMap,
    max_frame_size: usize,
) -> Vec<MetadataFrame> {
    let mut encoded = BytesMut::new();
    for (key, value) in map.iter() {
        encoded.put_u32(u32::try_from(key.len()).unwrap_or(u32::MAX));
        encoded.put_slice(key.as_bytes());
        encoded.put_u32(u32::try_from(value.len()).unwrap_or(u32::MAX));
        encoded.put_slice(value.as_bytes());
    }
    let mut payload = encoded.freeze();

    let chunk_size = max_frame_size.max(1);
    let mut frames = Vec::with_capacity(payload.len() / chunk_size + 1);
    loop {
        let take = payload.len().min(chunk_size);
        let chunk = payload.split_to(take);
        let last = payload.is_empty();
        frames.push(MetadataFrame {
            stream_id,
            payload: chunk,
            end_metadata: last,
        });
        if last {
            break;
        }
    }
    frames
}

fn decode_payload(stream_id: u32, mut payload: Bytes) -> Result<MetadataMap, MuxError> {
    let mut map = MetadataMap::new();
    while payload.has_remaining() {
        let key = take_string(stream_id, &mut payload)?;
        let value = take_string(stream_id, &mut payload)?;
        map.insert(key, value);
    }
    Ok(map)
}

fn take_string(stream_id: u32, payload: &mut Bytes) -> Result<String, MuxError> {
    if payload.remaining() < 4 {
        return Err(MuxError::stream(
            stream_id,
            ErrorCode::ProtocolError,
            "truncated metadata length prefix",
        ));
    }
    let len = payload.get_u32() as usize;
    if payload.remaining() < len {
        return Err(MuxError::stream(
            stream_id,
            ErrorCode::ProtocolError,
            "truncated metadata entry",
        ));
    }
    let raw = payload.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| {
        MuxError::stream(
            stream_id,
            ErrorCode::ProtocolError,
            "metadata entry is not valid UTF-8",
        )
    })
}

/// Per-stream reassembly of inbound METADATA chunks.
///
/// Chunks accumulate until the end-of-block marker, then decode as one map.
/// A block whose reassembled size exceeds the hard cap is rejected and the
/// stream is reset; the block is never delivered truncated.
#[derive(Debug)]
pub struct MetadataAssembler {
    buffer: BytesMut,
    max_block_size: usize,
}

impl MetadataAssembler {
    /// Create an assembler bounded by `max_block_size` reassembled bytes.
    #[must_use]
    pub fn new(max_block_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_block_size,
        }
    }

    /// Accept one chunk; returns the reassembled map on the final chunk.
    pub fn on_chunk(
        &mut self,
        stream_id: u32,
        payload: Bytes,
        end_metadata: bool,
    ) -> Result<Option<MetadataMap>, MuxError> {
        if self.buffer.len().saturating_add(payload.len()) > self.max_block_size {
            self.buffer.clear();
            return Err(MuxError::stream(
                stream_id,
                ErrorCode::EnhanceYourCalm,
                "reassembled metadata block exceeds hard cap",
            ));
        }
        self.buffer.extend_from_slice(&payload);
        if !end_metadata {
            return Ok(None);
        }
        let block = std::mem::take(&mut self.buffer).freeze();
        decode_payload(stream_id, block).map(Some)
    }

    /// Returns `true` while a block is partially assembled.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        !self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> MetadataMap {
        let mut map = MetadataMap::new();
        map.insert("route", "edge-a");
        map.insert("trace", "0001");
        map.insert("route", "edge-b");
        map
    }

    fn reassemble(frames: &[MetadataFrame], cap: usize) -> Result<Option<MetadataMap>, MuxError> {
        let mut assembler = MetadataAssembler::new(cap);
        let mut out = None;
        for frame in frames {
            out = assembler.on_chunk(frame.stream_id, frame.payload.clone(), frame.end_metadata)?;
        }
        Ok(out)
    }

    #[test]
    fn duplicate_keys_preserved_in_order() {
        let map = sample_map();
        let values: Vec<&str> = map.get_all("route").collect();
        assert_eq!(values, ["edge-a", "edge-b"]);
    }

    #[test]
    fn round_trip_single_chunk() {
        let map = sample_map();
        let frames = encode_block(5, &map, 16_384);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].end_metadata);

        let decoded = reassemble(&frames, 1 << 20).expect("decode").expect("complete");
        assert_eq!(decoded, map);
    }

    #[test]
    fn round_trip_across_chunk_boundaries() {
        let mut map = MetadataMap::new();
        for i in 0..64 {
            map.insert(format!("key-{i}"), "v".repeat(100));
        }
        // Force many small chunks that split entries mid-encoding.
        let frames = encode_block(7, &map, 64);
        assert!(frames.len() > 1);
        assert!(frames.iter().rev().skip(1).all(|f| !f.end_metadata));
        assert!(frames.last().is_some_and(|f| f.end_metadata));

        let decoded = reassemble(&frames, 1 << 20).expect("decode").expect("complete");
        assert_eq!(decoded, map);
    }

    #[test]
    fn empty_map_emits_one_end_marked_frame() {
        let frames = encode_block(3, &MetadataMap::new(), 1024);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
        assert!(frames[0].end_metadata);

        let decoded = reassemble(&frames, 1024).expect("decode").expect("complete");
        assert!(decoded.is_empty());
    }

    #[test]
    fn oversized_block_rejected_not_truncated() {
        let mut map = MetadataMap::new();
        map.insert("k", "v".repeat(4096));
        let frames = encode_block(9, &map, 512);

        let err = reassemble(&frames, 1024).expect_err("over cap");
        assert!(!err.is_connection_error());
    }

    #[test]
    fn truncated_payload_is_a_stream_error() {
        let mut assembler = MetadataAssembler::new(1024);
        let err = assembler
            .on_chunk(1, Bytes::from_static(&[0, 0, 0, 9, b'x']), true)
            .expect_err("truncated");
        assert!(!err.is_connection_error());
    }

    #[test]
    fn assembler_resets_after_rejection() {
        let mut assembler = MetadataAssembler::new(8);
        assert!(assembler
            .on_chunk(1, Bytes::from_static(&[0; 16]), false)
            .is_err());
        assert!(!assembler.in_progress());
    }
}
