//! Fragmentation for oversized reliable messages.
//!
//! Chunk snapshots run several KB; datagram transports cap records near
//! the MTU. A message larger than the record budget is split into
//! fragments carrying `(message_id, index, count)`; the receiver buffers
//! and reassembles, dropping incomplete messages after a bounded lifetime.
//! Message ids are `u32` and wrap; the reassembly table is a bounded LRU.

use std::collections::HashMap;

use super::TransportError;

/// Record tag: a complete message follows.
const RECORD_WHOLE: u8 = 0;
/// Record tag: a fragment follows.
const RECORD_FRAGMENT: u8 = 1;

/// Fragment header size: tag + message_id + index + count.
const FRAGMENT_HEADER: usize = 1 + 4 + 2 + 2;

/// Most in-flight reassembly buffers kept per peer.
const MAX_PENDING: usize = 64;

/// Reassembly deadline in milliseconds.
const PENDING_TTL_MS: u64 = 5_000;

/// Splits a message into one or more records that each fit `max_record`.
#[must_use]
pub fn encode_records(message_id: u32, payload: &[u8], max_record: usize) -> Vec<Vec<u8>> {
    if payload.len() + 1 <= max_record {
        let mut record = Vec::with_capacity(payload.len() + 1);
        record.push(RECORD_WHOLE);
        record.extend_from_slice(payload);
        return vec![record];
    }

    let body_budget = max_record - FRAGMENT_HEADER;
    let count = payload.len().div_ceil(body_budget);
    let mut records = Vec::with_capacity(count);
    for (index, body) in payload.chunks(body_budget).enumerate() {
        let mut record = Vec::with_capacity(FRAGMENT_HEADER + body.len());
        record.push(RECORD_FRAGMENT);
        record.extend_from_slice(&message_id.to_le_bytes());
        record.extend_from_slice(&(index as u16).to_le_bytes());
        record.extend_from_slice(&(count as u16).to_le_bytes());
        record.extend_from_slice(body);
        records.push(record);
    }
    records
}

struct Pending {
    parts: Vec<Option<Vec<u8>>>,
    received: usize,
    deadline_ms: u64,
}

/// Receiver-side reassembly table.
#[derive(Default)]
pub struct Reassembler {
    pending: HashMap<u32, Pending>,
}

impl Reassembler {
    /// Creates an empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of in-flight messages.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Accepts one record. Returns the full message when complete.
    pub fn accept(
        &mut self,
        record: &[u8],
        now_ms: u64,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let (&tag, rest) = record
            .split_first()
            .ok_or(TransportError::PayloadTooLarge(0))?;
        match tag {
            RECORD_WHOLE => Ok(Some(rest.to_vec())),
            RECORD_FRAGMENT => self.accept_fragment(rest, now_ms),
            _ => Ok(None), // unknown record tags are skipped, not fatal
        }
    }

    fn accept_fragment(
        &mut self,
        rest: &[u8],
        now_ms: u64,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        if rest.len() < FRAGMENT_HEADER - 1 {
            return Ok(None);
        }
        let message_id = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let index = u16::from_le_bytes([rest[4], rest[5]]) as usize;
        let count = u16::from_le_bytes([rest[6], rest[7]]) as usize;
        let body = &rest[8..];
        if count == 0 || index >= count {
            return Ok(None);
        }

        // Bound the table: evict the entry closest to its deadline.
        if !self.pending.contains_key(&message_id) && self.pending.len() >= MAX_PENDING {
            if let Some(&oldest) = self
                .pending
                .iter()
                .min_by_key(|(_, p)| p.deadline_ms)
                .map(|(id, _)| id)
            {
                self.pending.remove(&oldest);
            }
        }

        let entry = self.pending.entry(message_id).or_insert_with(|| Pending {
            parts: vec![None; count],
            received: 0,
            deadline_ms: now_ms + PENDING_TTL_MS,
        });
        if entry.parts.len() != count {
            // Same id, conflicting geometry: the old buffer is garbage.
            *entry = Pending {
                parts: vec![None; count],
                received: 0,
                deadline_ms: now_ms + PENDING_TTL_MS,
            };
        }
        if entry.parts[index].is_none() {
            entry.parts[index] = Some(body.to_vec());
            entry.received += 1;
        }

        if entry.received == count {
            let entry = self.pending.remove(&message_id).expect("entry just filled");
            let mut message = Vec::new();
            for part in entry.parts {
                message.extend_from_slice(&part.expect("all parts received"));
            }
            return Ok(Some(message));
        }
        Ok(None)
    }

    /// Drops buffers whose completion deadline passed.
    pub fn expire(&mut self, now_ms: u64) {
        self.pending.retain(|_, p| p.deadline_ms > now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_message_single_record() {
        let records = encode_records(1, b"hello", 1100);
        assert_eq!(records.len(), 1);

        let mut reassembler = Reassembler::new();
        let out = reassembler.accept(&records[0], 0).unwrap();
        assert_eq!(out.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_large_message_fragments_and_reassembles() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let records = encode_records(7, &payload, 1100);
        assert!(records.len() > 1);
        for record in &records {
            assert!(record.len() <= 1100);
        }

        let mut reassembler = Reassembler::new();
        let mut out = None;
        for record in &records {
            out = reassembler.accept(record, 0).unwrap();
        }
        assert_eq!(out, Some(payload));
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_out_of_order_fragments() {
        let payload: Vec<u8> = (0..5_000u32).map(|i| (i % 7) as u8).collect();
        let mut records = encode_records(9, &payload, 600);
        records.reverse();

        let mut reassembler = Reassembler::new();
        let mut out = None;
        for record in &records {
            out = reassembler.accept(record, 0).unwrap();
        }
        assert_eq!(out, Some(payload));
    }

    #[test]
    fn test_duplicate_fragment_harmless() {
        let payload = vec![1u8; 3000];
        let records = encode_records(3, &payload, 1100);
        let mut reassembler = Reassembler::new();
        assert!(reassembler.accept(&records[0], 0).unwrap().is_none());
        assert!(reassembler.accept(&records[0], 0).unwrap().is_none());
        let mut out = None;
        for record in &records[1..] {
            out = reassembler.accept(record, 0).unwrap();
        }
        assert_eq!(out, Some(payload));
    }

    #[test]
    fn test_incomplete_message_expires() {
        let payload = vec![0u8; 3000];
        let records = encode_records(5, &payload, 1100);
        let mut reassembler = Reassembler::new();
        reassembler.accept(&records[0], 1000).unwrap();
        assert_eq!(reassembler.pending_count(), 1);

        reassembler.expire(1000 + PENDING_TTL_MS + 1);
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_pending_table_bounded() {
        let mut reassembler = Reassembler::new();
        let payload = vec![0u8; 3000];
        for id in 0..(MAX_PENDING as u32 + 16) {
            let records = encode_records(id, &payload, 1100);
            reassembler.accept(&records[0], u64::from(id)).unwrap();
        }
        assert!(reassembler.pending_count() <= MAX_PENDING);
    }
}
