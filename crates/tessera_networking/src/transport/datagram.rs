//! UDP datagram transport - the native dual-channel case.
//!
//! The `entities` channel is raw datagrams (max retransmits zero). The
//! `sync` channel runs the reliability sublayer plus fragmentation. A
//! 1-byte discriminator routes incoming datagrams.

use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, UdpSocket};

use tracing::{debug, warn};

use crate::MAX_DATAGRAM_SIZE;

use super::fragment::{encode_records, Reassembler};
use super::reliable::ReliableEndpoint;
use super::{
    ChannelKind, ClientEvent, ClientTransport, PeerId, Transport, TransportError, TransportEvent,
};

/// Connection request (client → server).
const DG_CONNECT: u8 = 1;
/// Connection accept (server → client).
const DG_ACCEPT: u8 = 2;
/// Raw unreliable payload.
const DG_ENTITIES: u8 = 3;
/// Reliable sublayer packet (ack-only when the record is empty).
const DG_SYNC: u8 = 4;
/// Clean close.
const DG_DISCONNECT: u8 = 5;
/// Liveness refresh.
const DG_KEEPALIVE: u8 = 6;

/// Reliable record budget: datagram minus discriminator and sublayer
/// header.
const MAX_RECORD: usize = MAX_DATAGRAM_SIZE - 1 - 8;

/// Peer silence tolerated before a timeout disconnect.
const PEER_TIMEOUT_MS: u64 = 15_000;

/// Client keepalive cadence.
const KEEPALIVE_MS: u64 = 1_000;

struct PeerState {
    id: PeerId,
    endpoint: ReliableEndpoint,
    reassembler: Reassembler,
    last_recv_ms: u64,
}

/// Server side of the datagram transport.
pub struct UdpServerTransport {
    socket: UdpSocket,
    recv_buf: Box<[u8; 65_536]>,
    peers: HashMap<SocketAddr, PeerState>,
    by_id: HashMap<PeerId, SocketAddr>,
    next_peer: PeerId,
    next_message_id: u32,
    fallback_logged: HashSet<PeerId>,
    now_ms: u64,
}

impl UdpServerTransport {
    /// Binds the server socket.
    pub fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            recv_buf: Box::new([0; 65_536]),
            peers: HashMap::new(),
            by_id: HashMap::new(),
            next_peer: 1,
            next_message_id: 0,
            fallback_logged: HashSet::new(),
            now_ms: 0,
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    fn send_sync_records(&mut self, addr: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        let now = self.now_ms;
        let Some(peer) = self.peers.get_mut(&addr) else {
            return Err(TransportError::Disconnected);
        };
        for record in encode_records(message_id, payload, MAX_RECORD) {
            let packet = peer.endpoint.send(record, now);
            let mut datagram = Vec::with_capacity(1 + packet.len());
            datagram.push(DG_SYNC);
            datagram.extend_from_slice(&packet);
            self.socket.send_to(&datagram, addr)?;
        }
        Ok(())
    }

    fn drop_peer(&mut self, addr: SocketAddr, events: &mut Vec<TransportEvent>) {
        if let Some(peer) = self.peers.remove(&addr) {
            self.by_id.remove(&peer.id);
            self.fallback_logged.remove(&peer.id);
            events.push(TransportEvent::Disconnected { peer: peer.id });
        }
    }
}

impl Transport for UdpServerTransport {
    fn poll(&mut self, now_ms: u64) -> Vec<TransportEvent> {
        self.now_ms = now_ms;
        let mut events = Vec::new();

        loop {
            let (len, addr) = match self.socket.recv_from(&mut self.recv_buf[..]) {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(error = %e, "udp recv error");
                    break;
                }
            };
            if len == 0 {
                continue;
            }
            let datagram = &self.recv_buf[..len];
            let (tag, rest) = (datagram[0], &datagram[1..]);

            match tag {
                DG_CONNECT => {
                    if !self.peers.contains_key(&addr) {
                        let id = self.next_peer;
                        self.next_peer += 1;
                        self.peers.insert(
                            addr,
                            PeerState {
                                id,
                                endpoint: ReliableEndpoint::new(),
                                reassembler: Reassembler::new(),
                                last_recv_ms: now_ms,
                            },
                        );
                        self.by_id.insert(id, addr);
                        events.push(TransportEvent::Connected { peer: id });
                    }
                    // Accept is idempotent; duplicates re-confirm.
                    let _ = self.socket.send_to(&[DG_ACCEPT], addr);
                }
                DG_ENTITIES => {
                    if let Some(peer) = self.peers.get_mut(&addr) {
                        peer.last_recv_ms = now_ms;
                        events.push(TransportEvent::Message {
                            peer: peer.id,
                            channel: ChannelKind::Entities,
                            payload: rest.to_vec(),
                        });
                    }
                }
                DG_SYNC => {
                    let mut acks = Vec::new();
                    if let Some(peer) = self.peers.get_mut(&addr) {
                        peer.last_recv_ms = now_ms;
                        for record in peer.endpoint.on_packet(rest, now_ms) {
                            match peer.reassembler.accept(&record, now_ms) {
                                Ok(Some(message)) => events.push(TransportEvent::Message {
                                    peer: peer.id,
                                    channel: ChannelKind::Sync,
                                    payload: message,
                                }),
                                Ok(None) => {}
                                Err(e) => debug!(error = %e, "bad sync record"),
                            }
                        }
                        if peer.endpoint.needs_ack() {
                            let mut datagram = vec![DG_SYNC];
                            datagram.extend_from_slice(&peer.endpoint.ack_packet());
                            acks.push(datagram);
                        }
                    }
                    for datagram in acks {
                        let _ = self.socket.send_to(&datagram, addr);
                    }
                }
                DG_KEEPALIVE => {
                    if let Some(peer) = self.peers.get_mut(&addr) {
                        peer.last_recv_ms = now_ms;
                    }
                }
                DG_DISCONNECT => self.drop_peer(addr, &mut events),
                _ => debug!(tag, "unknown datagram discriminator"),
            }
        }

        // Retransmits, expiry, and timeouts.
        let mut dead = Vec::new();
        for (addr, peer) in &mut self.peers {
            for packet in peer.endpoint.due_retransmits(now_ms) {
                let mut datagram = vec![DG_SYNC];
                datagram.extend_from_slice(&packet);
                let _ = self.socket.send_to(&datagram, *addr);
            }
            peer.reassembler.expire(now_ms);
            if peer.endpoint.is_dead()
                || now_ms.saturating_sub(peer.last_recv_ms) > PEER_TIMEOUT_MS
            {
                dead.push(*addr);
            }
        }
        for addr in dead {
            warn!(%addr, "peer timed out");
            self.drop_peer(addr, &mut events);
        }

        events
    }

    fn send(
        &mut self,
        peer: PeerId,
        channel: ChannelKind,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let addr = *self.by_id.get(&peer).ok_or(TransportError::UnknownPeer(peer))?;
        match channel {
            ChannelKind::Entities if payload.len() + 1 <= MAX_DATAGRAM_SIZE => {
                let mut datagram = Vec::with_capacity(1 + payload.len());
                datagram.push(DG_ENTITIES);
                datagram.extend_from_slice(payload);
                self.socket.send_to(&datagram, addr)?;
                Ok(())
            }
            ChannelKind::Entities => {
                // Oversized for a single datagram: fall back to the
                // reliable path, once-per-peer log.
                if self.fallback_logged.insert(peer) {
                    debug!(peer, size = payload.len(), "entities payload over MTU, sent reliably");
                }
                self.send_sync_records(addr, payload)
            }
            ChannelKind::Sync => self.send_sync_records(addr, payload),
        }
    }

    fn disconnect(&mut self, peer: PeerId) {
        if let Some(addr) = self.by_id.get(&peer).copied() {
            let _ = self.socket.send_to(&[DG_DISCONNECT], addr);
            let mut events = Vec::new();
            self.drop_peer(addr, &mut events);
            // The Disconnected event is synthesized locally on the next
            // poll via the removed map entry; a server-initiated drop
            // needs no event for itself.
        }
    }
}

/// Client side of the datagram transport.
pub struct UdpClientTransport {
    socket: UdpSocket,
    server: SocketAddr,
    recv_buf: Box<[u8; 65_536]>,
    endpoint: ReliableEndpoint,
    reassembler: Reassembler,
    connected: bool,
    closed: bool,
    next_message_id: u32,
    last_connect_ms: u64,
    last_keepalive_ms: u64,
    last_recv_ms: u64,
    now_ms: u64,
}

impl UdpClientTransport {
    /// Creates a client socket and starts the connect handshake.
    pub fn connect(server: SocketAddr) -> Result<Self, TransportError> {
        let bind: SocketAddr = if server.is_ipv4() {
            "0.0.0.0:0".parse().expect("ipv4 any")
        } else {
            "[::]:0".parse().expect("ipv6 any")
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        socket.send_to(&[DG_CONNECT], server)?;
        Ok(Self {
            socket,
            server,
            recv_buf: Box::new([0; 65_536]),
            endpoint: ReliableEndpoint::new(),
            reassembler: Reassembler::new(),
            connected: false,
            closed: false,
            next_message_id: 0,
            last_connect_ms: 0,
            last_keepalive_ms: 0,
            last_recv_ms: 0,
            now_ms: 0,
        })
    }

    /// True once the server accepted the connection.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }
}

impl ClientTransport for UdpClientTransport {
    fn poll(&mut self, now_ms: u64) -> Vec<ClientEvent> {
        self.now_ms = now_ms;
        let mut events = Vec::new();
        if self.closed {
            return events;
        }

        loop {
            let (len, addr) = match self.socket.recv_from(&mut self.recv_buf[..]) {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            };
            if addr != self.server || len == 0 {
                continue;
            }
            let datagram = &self.recv_buf[..len];
            let (tag, rest) = (datagram[0], &datagram[1..]);
            self.last_recv_ms = now_ms;
            match tag {
                DG_ACCEPT => self.connected = true,
                DG_ENTITIES => events.push(ClientEvent::Message {
                    channel: ChannelKind::Entities,
                    payload: rest.to_vec(),
                }),
                DG_SYNC => {
                    for record in self.endpoint.on_packet(rest, now_ms) {
                        if let Ok(Some(message)) = self.reassembler.accept(&record, now_ms) {
                            events.push(ClientEvent::Message {
                                channel: ChannelKind::Sync,
                                payload: message,
                            });
                        }
                    }
                    if self.endpoint.needs_ack() {
                        let mut datagram = vec![DG_SYNC];
                        datagram.extend_from_slice(&self.endpoint.ack_packet());
                        let _ = self.socket.send_to(&datagram, self.server);
                    }
                }
                DG_DISCONNECT => {
                    self.closed = true;
                    events.push(ClientEvent::Disconnected);
                    return events;
                }
                _ => {}
            }
        }

        // Handshake retry until accepted.
        if !self.connected && now_ms.saturating_sub(self.last_connect_ms) >= 500 {
            self.last_connect_ms = now_ms;
            let _ = self.socket.send_to(&[DG_CONNECT], self.server);
        }
        if self.connected && now_ms.saturating_sub(self.last_keepalive_ms) >= KEEPALIVE_MS {
            self.last_keepalive_ms = now_ms;
            let _ = self.socket.send_to(&[DG_KEEPALIVE], self.server);
        }
        for packet in self.endpoint.due_retransmits(now_ms) {
            let mut datagram = vec![DG_SYNC];
            datagram.extend_from_slice(&packet);
            let _ = self.socket.send_to(&datagram, self.server);
        }
        self.reassembler.expire(now_ms);

        if self.endpoint.is_dead()
            || (self.connected && now_ms.saturating_sub(self.last_recv_ms) > PEER_TIMEOUT_MS)
        {
            self.closed = true;
            events.push(ClientEvent::Disconnected);
        }
        events
    }

    fn send(&mut self, channel: ChannelKind, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Disconnected);
        }
        match channel {
            ChannelKind::Entities if payload.len() + 1 <= MAX_DATAGRAM_SIZE => {
                let mut datagram = Vec::with_capacity(1 + payload.len());
                datagram.push(DG_ENTITIES);
                datagram.extend_from_slice(payload);
                self.socket.send_to(&datagram, self.server)?;
                Ok(())
            }
            _ => {
                let message_id = self.next_message_id;
                self.next_message_id = self.next_message_id.wrapping_add(1);
                let now = self.now_ms;
                for record in encode_records(message_id, payload, MAX_RECORD) {
                    let packet = self.endpoint.send(record, now);
                    let mut datagram = Vec::with_capacity(1 + packet.len());
                    datagram.push(DG_SYNC);
                    datagram.extend_from_slice(&packet);
                    self.socket.send_to(&datagram, self.server)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost_pair() -> (UdpServerTransport, UdpClientTransport) {
        let server = UdpServerTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr().unwrap();
        let client = UdpClientTransport::connect(addr).unwrap();
        (server, client)
    }

    #[test]
    fn test_handshake_and_both_channels() {
        let (mut server, mut client) = localhost_pair();

        // Handshake: server sees connect, client sees accept.
        let mut peer = None;
        for now in 0..50 {
            for event in server.poll(now) {
                if let TransportEvent::Connected { peer: p } = event {
                    peer = Some(p);
                }
            }
            let _ = client.poll(now);
            if peer.is_some() && client.is_connected() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let peer = peer.expect("server saw the connect");
        assert!(client.is_connected());

        // Client sync message reaches the server.
        client.send(ChannelKind::Sync, b"hello-sync").unwrap();
        let mut got_sync = false;
        for now in 50..150 {
            for event in server.poll(now) {
                if let TransportEvent::Message { channel: ChannelKind::Sync, payload, .. } = event {
                    assert_eq!(payload, b"hello-sync");
                    got_sync = true;
                }
            }
            if got_sync {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert!(got_sync);

        // Server entities datagram reaches the client.
        server.send(peer, ChannelKind::Entities, b"frame-1").unwrap();
        let mut got_frame = false;
        for now in 150..250 {
            for event in client.poll(now) {
                if let ClientEvent::Message { channel: ChannelKind::Entities, payload } = event {
                    assert_eq!(payload, b"frame-1");
                    got_frame = true;
                }
            }
            if got_frame {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert!(got_frame);
    }

    #[test]
    fn test_large_sync_message_fragments_across_datagrams() {
        let (mut server, mut client) = localhost_pair();

        let mut peer = None;
        for now in 0..100 {
            for event in server.poll(now) {
                if let TransportEvent::Connected { peer: p } = event {
                    peer = Some(p);
                }
            }
            let _ = client.poll(now);
            if peer.is_some() && client.is_connected() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let peer = peer.unwrap();

        let big: Vec<u8> = (0..9000u32).map(|i| (i % 253) as u8).collect();
        server.send(peer, ChannelKind::Sync, &big).unwrap();

        let mut received = None;
        for now in 100..400 {
            for event in client.poll(now) {
                if let ClientEvent::Message { channel: ChannelKind::Sync, payload } = event {
                    received = Some(payload);
                }
            }
            let _ = server.poll(now);
            if received.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(received, Some(big));
    }
}
