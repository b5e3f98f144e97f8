//! Reliable-only stream transport (TCP).
//!
//! Both logical channels map onto one ordered stream with
//! `[channel:u8][len:u32][bytes]` framing - the deployment case for
//! environments without datagram support. The first entities-preference
//! send per peer logs that it was delivered reliably.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::debug;

use super::{
    ChannelKind, ClientEvent, ClientTransport, PeerId, Transport, TransportError, TransportEvent,
};

/// Frame channel byte for sync.
const CH_SYNC: u8 = 0;
/// Frame channel byte for entities.
const CH_ENTITIES: u8 = 1;

/// Frame header size.
const FRAME_HEADER: usize = 1 + 4;

/// Refuse frames above this (a protocol message never legitimately
/// reaches it).
const MAX_FRAME: usize = 4 * 1024 * 1024;

fn encode_frame(channel: ChannelKind, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
    frame.push(match channel {
        ChannelKind::Sync => CH_SYNC,
        ChannelKind::Entities => CH_ENTITIES,
    });
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Parses complete frames off the front of `buf`.
fn drain_frames(buf: &mut Vec<u8>) -> Result<Vec<(ChannelKind, Vec<u8>)>, TransportError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while buf.len() - offset >= FRAME_HEADER {
        let channel = match buf[offset] {
            CH_SYNC => ChannelKind::Sync,
            CH_ENTITIES => ChannelKind::Entities,
            other => {
                debug!(byte = other, "bad stream channel byte");
                return Err(TransportError::Disconnected);
            }
        };
        let len = u32::from_le_bytes([
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
            buf[offset + 4],
        ]) as usize;
        if len > MAX_FRAME {
            return Err(TransportError::PayloadTooLarge(len));
        }
        if buf.len() - offset - FRAME_HEADER < len {
            break;
        }
        let start = offset + FRAME_HEADER;
        out.push((channel, buf[start..start + len].to_vec()));
        offset = start + len;
    }
    buf.drain(..offset);
    Ok(out)
}

struct Connection {
    stream: TcpStream,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    fallback_logged: bool,
}

impl Connection {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            fallback_logged: false,
        }
    }

    /// Reads everything available. Returns false when the peer is gone.
    fn pump_read(&mut self) -> bool {
        let mut chunk = [0u8; 16_384];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return false,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(_) => return false,
            }
        }
    }

    /// Flushes buffered writes. Returns false when the peer is gone.
    fn pump_write(&mut self) -> bool {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return false,
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(_) => return false,
            }
        }
        true
    }
}

/// Server side of the stream transport.
pub struct StreamServerTransport {
    listener: TcpListener,
    connections: HashMap<PeerId, Connection>,
    next_peer: PeerId,
}

impl StreamServerTransport {
    /// Binds the listener.
    pub fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener, connections: HashMap::new(), next_peer: 1 })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }
}

impl Transport for StreamServerTransport {
    fn poll(&mut self, _now_ms: u64) -> Vec<TransportEvent> {
        let mut events = Vec::new();

        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    if stream.set_nonblocking(true).is_err() {
                        continue;
                    }
                    let peer = self.next_peer;
                    self.next_peer += 1;
                    self.connections.insert(peer, Connection::new(stream));
                    events.push(TransportEvent::Connected { peer });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }

        let mut gone = Vec::new();
        for (&peer, conn) in &mut self.connections {
            if !conn.pump_read() || !conn.pump_write() {
                gone.push(peer);
                continue;
            }
            match drain_frames(&mut conn.read_buf) {
                Ok(frames) => {
                    for (channel, payload) in frames {
                        events.push(TransportEvent::Message { peer, channel, payload });
                    }
                }
                Err(_) => gone.push(peer),
            }
        }
        for peer in gone {
            self.connections.remove(&peer);
            events.push(TransportEvent::Disconnected { peer });
        }
        events
    }

    fn send(
        &mut self,
        peer: PeerId,
        channel: ChannelKind,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let conn = self
            .connections
            .get_mut(&peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        if channel == ChannelKind::Entities && !conn.fallback_logged {
            conn.fallback_logged = true;
            debug!(peer, "stream transport has no unreliable path; entities ride the stream");
        }
        conn.write_buf.extend_from_slice(&encode_frame(channel, payload));
        if conn.pump_write() {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }

    fn disconnect(&mut self, peer: PeerId) {
        self.connections.remove(&peer);
    }
}

/// Client side of the stream transport.
pub struct StreamClientTransport {
    conn: Connection,
    closed: bool,
}

impl StreamClientTransport {
    /// Connects to a server.
    pub fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self { conn: Connection::new(stream), closed: false })
    }
}

impl ClientTransport for StreamClientTransport {
    fn poll(&mut self, _now_ms: u64) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        if self.closed {
            return events;
        }
        if !self.conn.pump_read() || !self.conn.pump_write() {
            self.closed = true;
            events.push(ClientEvent::Disconnected);
            return events;
        }
        match drain_frames(&mut self.conn.read_buf) {
            Ok(frames) => {
                for (channel, payload) in frames {
                    events.push(ClientEvent::Message { channel, payload });
                }
            }
            Err(_) => {
                self.closed = true;
                events.push(ClientEvent::Disconnected);
            }
        }
        events
    }

    fn send(&mut self, channel: ChannelKind, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Disconnected);
        }
        self.conn
            .write_buf
            .extend_from_slice(&encode_frame(channel, payload));
        if self.conn.pump_write() {
            Ok(())
        } else {
            self.closed = true;
            Err(TransportError::Disconnected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_roundtrip_over_localhost() {
        let mut server = StreamServerTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr().unwrap();
        let mut client = StreamClientTransport::connect(addr).unwrap();

        let mut peer = None;
        for _ in 0..100 {
            for event in server.poll(0) {
                if let TransportEvent::Connected { peer: p } = event {
                    peer = Some(p);
                }
            }
            if peer.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let peer = peer.expect("accepted");

        client.send(ChannelKind::Sync, b"one").unwrap();
        client.send(ChannelKind::Sync, b"two").unwrap();

        let mut got = Vec::new();
        for _ in 0..100 {
            for event in server.poll(0) {
                if let TransportEvent::Message { payload, .. } = event {
                    got.push(payload);
                }
            }
            if got.len() == 2 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(got, vec![b"one".to_vec(), b"two".to_vec()]);

        // Entities preference falls back to the stream and still arrives
        // labeled entities.
        server.send(peer, ChannelKind::Entities, b"frame").unwrap();
        let mut frame = None;
        for _ in 0..100 {
            for event in client.poll(0) {
                if let ClientEvent::Message { channel, payload } = event {
                    frame = Some((channel, payload));
                }
            }
            if frame.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let (channel, payload) = frame.unwrap();
        assert_eq!(channel, ChannelKind::Entities);
        assert_eq!(payload, b"frame");
    }

    #[test]
    fn test_partial_frame_buffered() {
        let mut buf = encode_frame(ChannelKind::Sync, b"hello");
        let tail = buf.split_off(4);

        let mut acc = buf;
        assert!(drain_frames(&mut acc).unwrap().is_empty());
        acc.extend_from_slice(&tail);
        let frames = drain_frames(&mut acc).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1, b"hello");
        assert!(acc.is_empty());
    }
}
