//! Chunked payload buffer
//!
//! Advertising and scan-response payloads are assembled into fixed 32-octet
//! segments that are allocated lazily, in index order, as data is appended.
//! Nothing is ever reallocated in place. When a payload is submitted the
//! segments are moved out as a [`SegmentedPayload`] and the buffer is left
//! empty, ready for reuse.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::ContractError;

/// Octets per segment handed to the controller
pub const SEGMENT_SIZE: usize = 32;
/// Segments needed for the largest extended payload
pub const MAX_SEGMENTS: usize = 8;
/// Largest payload a buffer may be created for
pub const MAX_PAYLOAD_SIZE: usize = 255;

type Segment = Box<[u8; SEGMENT_SIZE]>;

// ----------------------------------------------------------------------------
// Chunked Payload
// ----------------------------------------------------------------------------

/// Append-only payload builder backed by lazily allocated segments
#[derive(Debug)]
pub struct ChunkedPayload {
    max_size: usize,
    size: usize,
    segments: [Option<Segment>; MAX_SEGMENTS],
}

impl ChunkedPayload {
    pub fn new(max_size: usize) -> Result<Self, ContractError> {
        if max_size > MAX_PAYLOAD_SIZE {
            return Err(ContractError::PayloadTooLarge {
                requested: max_size,
                limit: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            max_size,
            size: 0,
            segments: Default::default(),
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn free_space(&self) -> usize {
        self.max_size - self.size
    }

    /// Append `data`, leaving the buffer untouched if it does not fit
    pub fn add_item(&mut self, data: &[u8]) -> bool {
        if self.free_space() < data.len() {
            return false;
        }

        let mut remaining = data;
        while !remaining.is_empty() {
            let index = self.size / SEGMENT_SIZE;
            let offset = self.size % SEGMENT_SIZE;
            let segment = self.segments[index].get_or_insert_with(|| Box::new([0u8; SEGMENT_SIZE]));

            let count = remaining.len().min(SEGMENT_SIZE - offset);
            segment[offset..offset + count].copy_from_slice(&remaining[..count]);
            self.size += count;
            remaining = &remaining[count..];
        }
        true
    }

    /// Number of segments allocated so far
    pub fn allocated_segments(&self) -> usize {
        self.segments.iter().filter(|s| s.is_some()).count()
    }

    /// True when no unallocated segment precedes an allocated one
    pub fn segments_are_contiguous(&self) -> bool {
        self.segments
            .iter()
            .skip_while(|s| s.is_some())
            .all(|s| s.is_none())
    }

    /// Forget all content and segments
    pub fn reset(&mut self) {
        self.size = 0;
        self.segments = Default::default();
    }

    /// Hand the segments over for submission and reset the buffer
    pub fn take(&mut self) -> SegmentedPayload {
        let segments = self.segments.iter_mut().map_while(Option::take).collect();
        let payload = SegmentedPayload {
            len: self.size,
            segments,
        };
        self.reset();
        payload
    }

    /// Contiguous copy of the content
    pub fn to_bytes(&self) -> Vec<u8> {
        collect_bytes(self.segments.iter().map_while(|s| s.as_deref()), self.size)
    }

    /// Hex rendering of the content, also emitted at trace level
    pub fn debug_dump(&self) -> String {
        let dump = hex::encode(self.to_bytes());
        trace!(
            size = self.size,
            max_size = self.max_size,
            segments = self.allocated_segments(),
            "payload {}",
            dump
        );
        dump
    }
}

fn collect_bytes<'a>(segments: impl Iterator<Item = &'a [u8; SEGMENT_SIZE]>, len: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(len);
    for segment in segments {
        let count = (len - bytes.len()).min(SEGMENT_SIZE);
        bytes.extend_from_slice(&segment[..count]);
        if bytes.len() == len {
            break;
        }
    }
    bytes
}

// ----------------------------------------------------------------------------
// Segmented Payload
// ----------------------------------------------------------------------------

/// Payload as delivered to the controller: a length plus whole segments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentedPayload {
    len: usize,
    segments: Vec<Segment>,
}

impl SegmentedPayload {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        collect_bytes(self.segments.iter().map(|s| &**s), self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_empty() {
        let payload = ChunkedPayload::new(31).unwrap();
        assert_eq!(payload.size(), 0);
        assert_eq!(payload.allocated_segments(), 0);
        assert!(ChunkedPayload::new(256).is_err());
    }

    #[test]
    fn test_add_item_rejects_overflow_without_mutation() {
        let mut payload = ChunkedPayload::new(31).unwrap();
        assert!(payload.add_item(&[0xAA; 20]));
        assert!(!payload.add_item(&[0xBB; 12]));
        assert_eq!(payload.size(), 20);
        assert_eq!(payload.to_bytes(), vec![0xAA; 20]);
        assert!(payload.add_item(&[0xBB; 11]));
        assert_eq!(payload.free_space(), 0);
    }

    #[test]
    fn test_segments_allocated_lazily_across_boundary() {
        let mut payload = ChunkedPayload::new(255).unwrap();
        payload.add_item(&[1; 30]);
        assert_eq!(payload.allocated_segments(), 1);
        payload.add_item(&[2; 5]);
        assert_eq!(payload.allocated_segments(), 2);
        assert!(payload.segments_are_contiguous());

        let bytes = payload.to_bytes();
        assert_eq!(&bytes[..30], &[1; 30]);
        assert_eq!(&bytes[30..], &[2; 5]);
    }

    #[test]
    fn test_take_transfers_segments_and_resets() {
        let mut payload = ChunkedPayload::new(255).unwrap();
        payload.add_item(&[7; 70]);
        let submitted = payload.take();

        assert_eq!(submitted.len(), 70);
        assert_eq!(submitted.segment_count(), 3);
        assert_eq!(submitted.to_bytes(), vec![7; 70]);
        assert_eq!(payload.size(), 0);
        assert_eq!(payload.allocated_segments(), 0);
        assert!(payload.add_item(&[1, 2, 3]));
    }

    #[test]
    fn test_debug_dump_is_hex() {
        let mut payload = ChunkedPayload::new(31).unwrap();
        payload.add_item(&[0x02, 0x01, 0x06]);
        assert_eq!(payload.debug_dump(), "020106");
    }
}
