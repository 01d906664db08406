use bytes::{Buf, BytesMut};

use crate::error::{GatewayError, Result};

/// Bytes per chunk: 100 ms @ 16 kHz, 16-bit mono PCM (1600 samples × 2 bytes).
pub const BYTES_PER_CHUNK: usize = 3200;

/// Per-session append-only byte buffer addressable by chunk index.
///
/// All arithmetic is in chunk units — the FSM and dispatcher never see
/// raw byte offsets. `base_chunk` tracks the chunk index corresponding
/// to buffer byte 0; `truncate_until` advances past the discarded
/// prefix via `BytesMut::advance`, which reclaims the dropped region
/// without shifting the retained bytes, so long sessions don't pay an
/// O(n) memmove on every final.
#[derive(Debug, Default)]
pub struct RingBuffer {
    data: BytesMut,
    base_chunk: u64,
}

impl RingBuffer {
    pub fn new() -> Self {
        Self { data: BytesMut::new(), base_chunk: 0 }
    }

    /// Chunk index corresponding to buffer byte 0.
    pub fn base_chunk(&self) -> u64 {
        self.base_chunk
    }

    /// Number of whole chunks currently held.
    pub fn chunks_in_buffer(&self) -> u64 {
        (self.data.len() / BYTES_PER_CHUNK) as u64
    }

    /// Append one chunk's raw PCM bytes to the tail. Never fails;
    /// `base_chunk` is unchanged.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Return an independent copy of `[start_chunk, end_chunk)`.
    ///
    /// Fails when `start_chunk < base_chunk` — the caller treats this
    /// as "segment already delivered" and drops the work item.
    pub fn read_range(&self, start_chunk: u64, end_chunk: u64) -> Result<Vec<u8>> {
        if start_chunk < self.base_chunk {
            return Err(GatewayError::RangeAlreadyTruncated {
                requested: start_chunk,
                base: self.base_chunk,
            });
        }
        let available_end = self.base_chunk + self.chunks_in_buffer();
        let end_chunk = end_chunk.min(available_end);
        if start_chunk >= end_chunk {
            return Ok(Vec::new());
        }

        let start_off = ((start_chunk - self.base_chunk) as usize) * BYTES_PER_CHUNK;
        let end_off = ((end_chunk - self.base_chunk) as usize) * BYTES_PER_CHUNK;
        let end_off = end_off.min(self.data.len());
        Ok(self.data[start_off..end_off].to_vec())
    }

    /// Discard bytes before chunk `chunk`; `base_chunk := chunk`.
    /// Idempotent / a no-op when `chunk <= base_chunk`. Never moves
    /// backwards.
    pub fn truncate_until(&mut self, chunk: u64) {
        if chunk <= self.base_chunk {
            return;
        }
        let drop_chunks = (chunk - self.base_chunk).min(self.chunks_in_buffer());
        let drop_bytes = (drop_chunks as usize) * BYTES_PER_CHUNK;
        self.data.advance(drop_bytes);
        self.base_chunk += drop_chunks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_of(byte: u8) -> Vec<u8> {
        vec![byte; BYTES_PER_CHUNK]
    }

    #[test]
    fn append_then_read_range_round_trips() {
        let mut rb = RingBuffer::new();
        rb.append(&chunk_of(1));
        rb.append(&chunk_of(2));
        rb.append(&chunk_of(3));

        let got = rb.read_range(0, 2).unwrap();
        assert_eq!(got.len(), 2 * BYTES_PER_CHUNK);
        assert_eq!(got[0], 1);
        assert_eq!(got[BYTES_PER_CHUNK], 2);
    }

    #[test]
    fn truncate_advances_base_chunk_and_is_idempotent() {
        let mut rb = RingBuffer::new();
        rb.append(&chunk_of(1));
        rb.append(&chunk_of(2));
        rb.append(&chunk_of(3));

        rb.truncate_until(2);
        assert_eq!(rb.base_chunk(), 2);
        assert_eq!(rb.chunks_in_buffer(), 1);

        // no-op: chunk <= base_chunk
        rb.truncate_until(2);
        rb.truncate_until(0);
        assert_eq!(rb.base_chunk(), 2);

        let got = rb.read_range(2, 3).unwrap();
        assert_eq!(got[0], 3);
    }

    #[test]
    fn read_range_below_base_chunk_errors() {
        let mut rb = RingBuffer::new();
        rb.append(&chunk_of(1));
        rb.append(&chunk_of(2));
        rb.truncate_until(1);

        let err = rb.read_range(0, 1).unwrap_err();
        matches!(err, GatewayError::RangeAlreadyTruncated { .. });
    }

    #[test]
    fn base_chunk_never_moves_backwards() {
        let mut rb = RingBuffer::new();
        for _ in 0..5 {
            rb.append(&chunk_of(9));
        }
        rb.truncate_until(3);
        rb.truncate_until(1);
        assert_eq!(rb.base_chunk(), 3);
    }
}
