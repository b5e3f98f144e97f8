//! In-process loopback transport.
//!
//! Both channels collapse to direct queues: lossless, ordered, zero
//! latency. Used by the embedded single-player path and the end-to-end
//! tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::{
    ChannelKind, ClientEvent, ClientTransport, PeerId, Transport, TransportError, TransportEvent,
};

enum HubInbound {
    Connect { peer: PeerId, to_client: Sender<(ChannelKind, Vec<u8>)> },
    Data { peer: PeerId, channel: ChannelKind, payload: Vec<u8> },
    Disconnect { peer: PeerId },
}

/// Server end of the loopback: implements [`Transport`].
pub struct LoopbackHub {
    inbound_rx: Receiver<HubInbound>,
    peers: std::collections::HashMap<PeerId, Sender<(ChannelKind, Vec<u8>)>>,
    pending_disconnects: Vec<PeerId>,
}

/// Cloneable handle that opens client connections into a [`LoopbackHub`].
#[derive(Clone)]
pub struct LoopbackConnector {
    inbound_tx: Sender<HubInbound>,
    next_peer: Arc<AtomicU64>,
}

/// Client end of one loopback connection: implements [`ClientTransport`].
pub struct LoopbackClient {
    peer: PeerId,
    to_hub: Sender<HubInbound>,
    from_hub: Receiver<(ChannelKind, Vec<u8>)>,
    closed: bool,
}

/// Creates a hub and a connector for it.
#[must_use]
pub fn loopback() -> (LoopbackHub, LoopbackConnector) {
    let (inbound_tx, inbound_rx) = unbounded();
    (
        LoopbackHub {
            inbound_rx,
            peers: std::collections::HashMap::new(),
            pending_disconnects: Vec::new(),
        },
        LoopbackConnector { inbound_tx, next_peer: Arc::new(AtomicU64::new(1)) },
    )
}

impl LoopbackConnector {
    /// Opens a new client connection.
    #[must_use]
    pub fn connect(&self) -> LoopbackClient {
        let peer = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let (to_client, from_hub) = unbounded();
        // The hub sees the connect on its next poll.
        let _ = self.inbound_tx.send(HubInbound::Connect { peer, to_client });
        LoopbackClient { peer, to_hub: self.inbound_tx.clone(), from_hub, closed: false }
    }
}

impl Transport for LoopbackHub {
    fn poll(&mut self, _now_ms: u64) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        for peer in self.pending_disconnects.drain(..) {
            events.push(TransportEvent::Disconnected { peer });
        }
        while let Ok(msg) = self.inbound_rx.try_recv() {
            match msg {
                HubInbound::Connect { peer, to_client } => {
                    self.peers.insert(peer, to_client);
                    events.push(TransportEvent::Connected { peer });
                }
                HubInbound::Data { peer, channel, payload } => {
                    events.push(TransportEvent::Message { peer, channel, payload });
                }
                HubInbound::Disconnect { peer } => {
                    self.peers.remove(&peer);
                    events.push(TransportEvent::Disconnected { peer });
                }
            }
        }
        events
    }

    fn send(
        &mut self,
        peer: PeerId,
        channel: ChannelKind,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let sender = self.peers.get(&peer).ok_or(TransportError::UnknownPeer(peer))?;
        sender
            .send((channel, payload.to_vec()))
            .map_err(|_| TransportError::Disconnected)
    }

    fn disconnect(&mut self, peer: PeerId) {
        if self.peers.remove(&peer).is_some() {
            self.pending_disconnects.push(peer);
        }
    }
}

impl ClientTransport for LoopbackClient {
    fn poll(&mut self, _now_ms: u64) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        loop {
            match self.from_hub.try_recv() {
                Ok((channel, payload)) => events.push(ClientEvent::Message { channel, payload }),
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    if !self.closed {
                        self.closed = true;
                        events.push(ClientEvent::Disconnected);
                    }
                    break;
                }
            }
        }
        events
    }

    fn send(&mut self, channel: ChannelKind, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Disconnected);
        }
        self.to_hub
            .send(HubInbound::Data { peer: self.peer, channel, payload: payload.to_vec() })
            .map_err(|_| TransportError::Disconnected)
    }
}

impl Drop for LoopbackClient {
    fn drop(&mut self) {
        let _ = self.to_hub.send(HubInbound::Disconnect { peer: self.peer });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_send_receive() {
        let (mut hub, connector) = loopback();
        let mut client = connector.connect();

        let events = hub.poll(0);
        let TransportEvent::Connected { peer } = events[0] else {
            panic!("expected connect");
        };

        client.send(ChannelKind::Sync, b"hi").unwrap();
        let events = hub.poll(0);
        assert!(matches!(
            &events[0],
            TransportEvent::Message { channel: ChannelKind::Sync, payload, .. } if payload == b"hi"
        ));

        hub.send(peer, ChannelKind::Entities, b"frame").unwrap();
        let events = client.poll(0);
        assert!(matches!(
            &events[0],
            ClientEvent::Message { channel: ChannelKind::Entities, payload } if payload == b"frame"
        ));
    }

    #[test]
    fn test_client_drop_disconnects() {
        let (mut hub, connector) = loopback();
        let client = connector.connect();
        let _ = hub.poll(0);
        drop(client);
        let events = hub.poll(0);
        assert!(events
            .iter()
            .any(|e| matches!(e, TransportEvent::Disconnected { .. })));
    }

    #[test]
    fn test_server_disconnect_unknown_after() {
        let (mut hub, connector) = loopback();
        let _client = connector.connect();
        let events = hub.poll(0);
        let TransportEvent::Connected { peer } = events[0] else {
            panic!("expected connect");
        };
        hub.disconnect(peer);
        assert!(hub.send(peer, ChannelKind::Sync, b"x").is_err());
    }
}
