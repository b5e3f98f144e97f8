//! Reliability sublayer for the datagram transport's `sync` channel.
//!
//! Symmetric endpoint: each side numbers its records with a wrapping u16
//! sequence, acknowledges with `(ack, ack_bits)` covering the 32 sequences
//! before the latest, retransmits unacked records after a timeout, and
//! delivers incoming records strictly in order.

use std::collections::BTreeMap;

/// Packet header: seq + ack + ack_bits.
const HEADER: usize = 2 + 2 + 4;

/// Retransmit timeout.
const RTO_MS: u64 = 250;

/// Retries before the peer is declared dead.
const MAX_RETRIES: u32 = 20;

/// Wrap-aware "a is newer than b".
#[inline]
const fn seq_newer(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000
}

struct PendingSend {
    record: Vec<u8>,
    last_sent_ms: u64,
    retries: u32,
}

/// One side of a reliable, ordered record stream over datagrams.
pub struct ReliableEndpoint {
    next_send_seq: u16,
    pending: BTreeMap<u16, PendingSend>,

    expected_recv: u16,
    held: BTreeMap<u16, Vec<u8>>,

    latest_recv: u16,
    recv_bits: u32,
    has_received: bool,
    needs_ack: bool,

    dead: bool,
}

impl Default for ReliableEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl ReliableEndpoint {
    /// Creates a fresh endpoint (sequences start at zero).
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_send_seq: 0,
            pending: BTreeMap::new(),
            expected_recv: 0,
            held: BTreeMap::new(),
            latest_recv: 0,
            recv_bits: 0,
            has_received: false,
            needs_ack: false,
            dead: false,
        }
    }

    /// True once the peer stopped acking for too long.
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.dead
    }

    /// Records in flight (sent, not yet acked).
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// True if received data is still unacknowledged.
    #[must_use]
    pub const fn needs_ack(&self) -> bool {
        self.needs_ack
    }

    /// Queues a record and returns the packet to put on the wire now.
    pub fn send(&mut self, record: Vec<u8>, now_ms: u64) -> Vec<u8> {
        let seq = self.next_send_seq;
        self.next_send_seq = self.next_send_seq.wrapping_add(1);
        let packet = self.build_packet(seq, &record);
        self.pending.insert(
            seq,
            PendingSend { record, last_sent_ms: now_ms, retries: 0 },
        );
        packet
    }

    /// Handles an incoming packet. Returns the records now deliverable in
    /// order.
    pub fn on_packet(&mut self, bytes: &[u8], _now_ms: u64) -> Vec<Vec<u8>> {
        if bytes.len() < HEADER {
            return Vec::new();
        }
        let seq = u16::from_le_bytes([bytes[0], bytes[1]]);
        let ack = u16::from_le_bytes([bytes[2], bytes[3]]);
        let ack_bits = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        self.apply_ack(ack, ack_bits);

        let record = &bytes[HEADER..];
        if record.is_empty() {
            // Ack-only packet.
            return Vec::new();
        }

        self.note_received(seq);
        self.needs_ack = true;

        // Ordered delivery: stash the record unless it is the expected one.
        if seq == self.expected_recv {
            let mut out = vec![record.to_vec()];
            self.expected_recv = self.expected_recv.wrapping_add(1);
            while let Some(next) = self.held.remove(&self.expected_recv) {
                out.push(next);
                self.expected_recv = self.expected_recv.wrapping_add(1);
            }
            out
        } else if seq_newer(seq, self.expected_recv) {
            self.held.entry(seq).or_insert_with(|| record.to_vec());
            Vec::new()
        } else {
            // Duplicate of something already delivered.
            Vec::new()
        }
    }

    /// Builds an ack-only packet and clears the ack debt.
    pub fn ack_packet(&mut self) -> Vec<u8> {
        self.needs_ack = false;
        self.build_packet_raw(self.next_send_seq, &[])
    }

    /// Returns packets due for retransmission. Marks the endpoint dead
    /// when a record exhausts its retries.
    pub fn due_retransmits(&mut self, now_ms: u64) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut died = false;
        let header = (self.ack_value(), self.recv_bits);
        for (&seq, pending) in &mut self.pending {
            if now_ms.saturating_sub(pending.last_sent_ms) < RTO_MS {
                continue;
            }
            if pending.retries >= MAX_RETRIES {
                died = true;
                continue;
            }
            pending.retries += 1;
            pending.last_sent_ms = now_ms;
            let mut packet = Vec::with_capacity(HEADER + pending.record.len());
            packet.extend_from_slice(&seq.to_le_bytes());
            packet.extend_from_slice(&header.0.to_le_bytes());
            packet.extend_from_slice(&header.1.to_le_bytes());
            packet.extend_from_slice(&pending.record);
            out.push(packet);
        }
        if died {
            self.dead = true;
        }
        out
    }

    fn ack_value(&self) -> u16 {
        if self.has_received {
            self.latest_recv
        } else {
            u16::MAX // nothing received yet; acks nothing
        }
    }

    fn build_packet(&self, seq: u16, record: &[u8]) -> Vec<u8> {
        self.build_packet_raw(seq, record)
    }

    fn build_packet_raw(&self, seq: u16, record: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(HEADER + record.len());
        packet.extend_from_slice(&seq.to_le_bytes());
        packet.extend_from_slice(&self.ack_value().to_le_bytes());
        packet.extend_from_slice(&self.recv_bits.to_le_bytes());
        packet.extend_from_slice(record);
        packet
    }

    fn apply_ack(&mut self, ack: u16, ack_bits: u32) {
        // u16::MAX doubles as "nothing received yet"; a real wrap-around
        // ack of seq 65535 is only meaningful while that seq is in flight.
        if ack == u16::MAX && !self.pending.contains_key(&u16::MAX) {
            return;
        }
        self.pending.remove(&ack);
        for bit in 0..32u16 {
            if ack_bits & (1 << bit) != 0 {
                self.pending.remove(&ack.wrapping_sub(bit + 1));
            }
        }
    }

    fn note_received(&mut self, seq: u16) {
        if !self.has_received {
            self.has_received = true;
            self.latest_recv = seq;
            self.recv_bits = 0;
            return;
        }
        if seq_newer(seq, self.latest_recv) {
            let shift = seq.wrapping_sub(self.latest_recv);
            self.recv_bits = if shift >= 32 {
                0
            } else {
                (self.recv_bits << shift) | (1u32 << (shift - 1))
            };
            self.latest_recv = seq;
        } else if seq != self.latest_recv {
            let diff = self.latest_recv.wrapping_sub(seq);
            if diff <= 32 {
                self.recv_bits |= 1 << (diff - 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pump(from: &mut ReliableEndpoint, to: &mut ReliableEndpoint, packet: &[u8]) -> Vec<Vec<u8>> {
        let delivered = to.on_packet(packet, 0);
        if to.needs_ack() {
            let ack = to.ack_packet();
            from.on_packet(&ack, 0);
        }
        delivered
    }

    #[test]
    fn test_in_order_delivery_and_ack() {
        let mut a = ReliableEndpoint::new();
        let mut b = ReliableEndpoint::new();

        let p1 = a.send(b"one".to_vec(), 0);
        let p2 = a.send(b"two".to_vec(), 0);
        assert_eq!(a.in_flight(), 2);

        assert_eq!(pump(&mut a, &mut b, &p1), vec![b"one".to_vec()]);
        assert_eq!(pump(&mut a, &mut b, &p2), vec![b"two".to_vec()]);
        assert_eq!(a.in_flight(), 0, "acks drained the pending set");
    }

    #[test]
    fn test_reorder_buffered_until_gap_fills() {
        let mut a = ReliableEndpoint::new();
        let mut b = ReliableEndpoint::new();

        let p1 = a.send(b"one".to_vec(), 0);
        let p2 = a.send(b"two".to_vec(), 0);
        let p3 = a.send(b"three".to_vec(), 0);

        assert!(pump(&mut a, &mut b, &p3).is_empty(), "held for ordering");
        assert!(pump(&mut a, &mut b, &p2).is_empty(), "still waiting on 1");
        let delivered = pump(&mut a, &mut b, &p1);
        assert_eq!(
            delivered,
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()],
            "gap fill releases the whole run in order"
        );
    }

    #[test]
    fn test_duplicate_not_redelivered() {
        let mut a = ReliableEndpoint::new();
        let mut b = ReliableEndpoint::new();
        let p1 = a.send(b"one".to_vec(), 0);
        assert_eq!(pump(&mut a, &mut b, &p1), vec![b"one".to_vec()]);
        assert!(pump(&mut a, &mut b, &p1).is_empty());
    }

    #[test]
    fn test_lost_packet_retransmitted() {
        let mut a = ReliableEndpoint::new();
        let mut b = ReliableEndpoint::new();

        let _lost = a.send(b"one".to_vec(), 0);
        assert!(a.due_retransmits(RTO_MS - 1).is_empty(), "not due yet");
        let resends = a.due_retransmits(RTO_MS + 1);
        assert_eq!(resends.len(), 1);
        assert_eq!(pump(&mut a, &mut b, &resends[0]), vec![b"one".to_vec()]);
        assert_eq!(a.in_flight(), 0);
    }

    #[test]
    fn test_endpoint_dies_after_retry_budget() {
        let mut a = ReliableEndpoint::new();
        let _ = a.send(b"void".to_vec(), 0);
        let mut now = 0;
        for _ in 0..=MAX_RETRIES {
            now += RTO_MS + 1;
            let _ = a.due_retransmits(now);
        }
        now += RTO_MS + 1;
        let _ = a.due_retransmits(now);
        assert!(a.is_dead());
    }

    #[test]
    fn test_ack_bits_cover_burst_loss() {
        let mut a = ReliableEndpoint::new();
        let mut b = ReliableEndpoint::new();

        let packets: Vec<_> = (0..10).map(|i| a.send(vec![i as u8], 0)).collect();
        // Deliver only the last packet; its ack news still tells A that
        // 0..9 are missing (no bits set for them).
        let _ = b.on_packet(&packets[9], 0);
        let ack = b.ack_packet();
        a.on_packet(&ack, 0);
        assert_eq!(a.in_flight(), 9, "only the delivered packet was acked");

        // Deliver the rest; a single ack then clears everything.
        for packet in &packets[..9] {
            let _ = b.on_packet(packet, 0);
        }
        let ack = b.ack_packet();
        a.on_packet(&ack, 0);
        assert_eq!(a.in_flight(), 0);
    }
}
