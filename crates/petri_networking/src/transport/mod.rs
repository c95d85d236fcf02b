//! # Transport
//!
//! Datagram plumbing under the message layer: a thin framing scheme,
//! a per-peer reliability state machine, and a non-blocking UDP
//! endpoint that pumps both into channel events.
//!
//! ## Frame layout
//!
//! ```text
//! Reliable:    [0x00][seq hi][seq lo][message bytes...]
//! Unreliable:  [0x01][message bytes...]
//! Ack:         [0x02][seq hi][seq lo]
//! ```
//!
//! Reliable frames are resent every 100 ms until acked and delivered
//! to the application in sequence order. A frame that exhausts its
//! resend budget marks the whole link dead: a gap in the reliable
//! stream can never be skipped over, so the peer is disconnected
//! rather than left permanently stalled. Unreliable frames are handed
//! up as they arrive; the per-tick stream tolerates the losses.
//!
//! The endpoint is connectionless at the socket level: the first
//! datagram from an unknown address implicitly opens a peer link, and
//! five silent seconds close it.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use petri_shared::constants::MAX_PACKET_SIZE;

use crate::protocol::Channel;

const FRAME_RELIABLE: u8 = 0;
const FRAME_UNRELIABLE: u8 = 1;
const FRAME_ACK: u8 = 2;

/// Frame kind byte plus a big-endian sequence number.
const RELIABLE_HEADER: usize = 3;

/// How long an unacked reliable frame waits before retransmission.
const RESEND_INTERVAL_MS: u64 = 100;

/// Resend attempts before the link is declared dead.
const MAX_RESENDS: u8 = 10;

/// Out-of-order frames buffered per peer while waiting for a gap.
const AHEAD_LIMIT: usize = 64;

/// Milliseconds of silence before a peer link is closed.
const PEER_TIMEOUT_MS: u64 = 5000;

/// Transport failures.
#[derive(Debug, Error)]
pub enum NetError {
    /// The socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that was requested.
        addr: String,
        /// The underlying socket error.
        source: io::Error,
    },
    /// A socket operation failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    /// A message did not fit in a single frame.
    #[error("payload of {0} bytes exceeds frame capacity")]
    PayloadTooLarge(usize),
    /// The configuration could not be parsed.
    #[error("bad config: {0}")]
    Config(String),
}

/// What the transport reports up to the session layer.
#[derive(Clone, Copy, Debug)]
pub enum TransportEvent {
    /// First contact from a new address.
    Connected {
        /// The peer's address.
        addr: SocketAddr,
    },
    /// The peer went silent past the timeout.
    Disconnected {
        /// The peer's address.
        addr: SocketAddr,
    },
    /// A message payload arrived.
    Message {
        /// The sending peer.
        addr: SocketAddr,
        /// Delivery mode the payload travelled on.
        channel: Channel,
        /// Payload bytes; only the first `len` are valid.
        data: [u8; MAX_PACKET_SIZE],
        /// Number of valid payload bytes.
        len: usize,
    },
}

/// An encoded message waiting to leave through the endpoint.
#[derive(Clone, Copy, Debug)]
pub struct OutgoingPacket {
    /// Destination peer.
    pub addr: SocketAddr,
    /// Delivery mode to frame the payload with.
    pub channel: Channel,
    /// Payload bytes; only the first `len` are valid.
    pub data: [u8; MAX_PACKET_SIZE],
    /// Number of valid payload bytes.
    pub len: usize,
}

/// A fully framed datagram, ready for the socket.
#[derive(Clone, Copy)]
pub struct FrameBytes {
    data: [u8; MAX_PACKET_SIZE],
    len: usize,
}

impl FrameBytes {
    fn from_slice(bytes: &[u8]) -> Self {
        let mut data = [0u8; MAX_PACKET_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        Self {
            data,
            len: bytes.len(),
        }
    }

    /// The valid bytes of the frame.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

fn build_reliable(seq: u16, payload: &[u8]) -> FrameBytes {
    let mut data = [0u8; MAX_PACKET_SIZE];
    data[0] = FRAME_RELIABLE;
    data[1..RELIABLE_HEADER].copy_from_slice(&seq.to_be_bytes());
    data[RELIABLE_HEADER..RELIABLE_HEADER + payload.len()].copy_from_slice(payload);
    FrameBytes {
        data,
        len: RELIABLE_HEADER + payload.len(),
    }
}

fn build_unreliable(payload: &[u8]) -> FrameBytes {
    let mut data = [0u8; MAX_PACKET_SIZE];
    data[0] = FRAME_UNRELIABLE;
    data[1..1 + payload.len()].copy_from_slice(payload);
    FrameBytes {
        data,
        len: 1 + payload.len(),
    }
}

fn build_ack(seq: u16) -> FrameBytes {
    let mut data = [0u8; MAX_PACKET_SIZE];
    data[0] = FRAME_ACK;
    data[1..RELIABLE_HEADER].copy_from_slice(&seq.to_be_bytes());
    FrameBytes {
        data,
        len: RELIABLE_HEADER,
    }
}

/// `true` when `a` is ahead of `b` in wrapping sequence space.
#[allow(clippy::cast_possible_wrap)]
fn seq_newer(a: u16, b: u16) -> bool {
    a.wrapping_sub(b) as i16 > 0
}

struct InFlight {
    seq: u16,
    frame: FrameBytes,
    sent_at_ms: u64,
    resends: u8,
}

/// Ordered-and-retransmitted delivery over one peer link.
///
/// Pure state machine: the caller owns the clock and the socket, this
/// type only decides which bytes go out and which payloads come up.
pub struct ReliableChannel {
    next_seq: u16,
    in_flight: VecDeque<InFlight>,
    expected_seq: u16,
    ahead: Vec<(u16, FrameBytes)>,
}

impl ReliableChannel {
    /// A fresh link; both directions start at sequence zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            in_flight: VecDeque::new(),
            expected_seq: 0,
            ahead: Vec::new(),
        }
    }

    /// Frames a payload for transmission and remembers it for resend.
    /// Returns the frame to put on the wire.
    pub fn send(&mut self, payload: &[u8], now_ms: u64) -> Result<FrameBytes, NetError> {
        if payload.len() > MAX_PACKET_SIZE - RELIABLE_HEADER {
            return Err(NetError::PayloadTooLarge(payload.len()));
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let frame = build_reliable(seq, payload);
        self.in_flight.push_back(InFlight {
            seq,
            frame,
            sent_at_ms: now_ms,
            resends: 0,
        });
        Ok(frame)
    }

    /// Processes an incoming reliable frame, appending any payloads
    /// that are now deliverable in order.
    ///
    /// Returns `true` when the frame is accounted for and may be acked:
    /// delivered now, buffered ahead, or a duplicate of something we
    /// already have. Returns `false` when the ahead buffer had no room;
    /// the frame must stay unacked so the peer keeps resending it until
    /// the gap clears.
    pub fn receive(&mut self, seq: u16, payload: &[u8], deliver: &mut Vec<FrameBytes>) -> bool {
        if seq == self.expected_seq {
            deliver.push(FrameBytes::from_slice(payload));
            self.expected_seq = self.expected_seq.wrapping_add(1);
            // Drain buffered frames the gap was holding back.
            loop {
                let Some(pos) = self
                    .ahead
                    .iter()
                    .position(|(buffered, _)| *buffered == self.expected_seq)
                else {
                    break;
                };
                let (_, frame) = self.ahead.swap_remove(pos);
                deliver.push(frame);
                self.expected_seq = self.expected_seq.wrapping_add(1);
            }
            true
        } else if seq_newer(seq, self.expected_seq) {
            if self.ahead.iter().any(|(buffered, _)| *buffered == seq) {
                return true;
            }
            if self.ahead.len() >= AHEAD_LIMIT {
                return false;
            }
            self.ahead.push((seq, FrameBytes::from_slice(payload)));
            true
        } else {
            // Older than expected: a duplicate of delivered data. Ack
            // it so the peer stops resending.
            true
        }
    }

    /// Clears a frame the peer confirmed.
    pub fn on_ack(&mut self, seq: u16) {
        self.in_flight.retain(|entry| entry.seq != seq);
    }

    /// Collects frames due for retransmission.
    ///
    /// Returns `true` when a frame has exhausted its resend budget.
    /// The receiver cannot skip over the gap that frame would leave,
    /// so the link is dead and the caller should drop the peer.
    pub fn due_resends(&mut self, now_ms: u64, out: &mut Vec<FrameBytes>) -> bool {
        let mut exhausted = false;
        self.in_flight.retain_mut(|entry| {
            if now_ms.saturating_sub(entry.sent_at_ms) < RESEND_INTERVAL_MS {
                return true;
            }
            if entry.resends >= MAX_RESENDS {
                exhausted = true;
                return false;
            }
            entry.resends += 1;
            entry.sent_at_ms = now_ms;
            out.push(entry.frame);
            true
        });
        exhausted
    }

    /// Frames sent but not yet acked.
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

impl Default for ReliableChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters the endpoint keeps about its socket traffic.
#[derive(Clone, Copy, Debug, Default)]
pub struct EndpointStats {
    /// Datagrams written to the socket.
    pub packets_sent: u64,
    /// Datagrams read from the socket.
    pub packets_received: u64,
    /// Bytes written to the socket.
    pub bytes_sent: u64,
    /// Bytes read from the socket.
    pub bytes_received: u64,
    /// Reliable frames retransmitted.
    pub frames_resent: u64,
}

struct PeerLink {
    addr: SocketAddr,
    reliable: ReliableChannel,
    last_recv_ms: u64,
}

/// Non-blocking UDP endpoint.
///
/// [`pump`](Self::pump) drains the socket into transport events;
/// [`flush`](Self::flush) frames queued packets onto the wire. Both
/// are polled from the owner's loop, so the endpoint needs no thread
/// of its own.
pub struct UdpEndpoint {
    socket: UdpSocket,
    peers: Vec<PeerLink>,
    started: Instant,
    stats: EndpointStats,
}

impl UdpEndpoint {
    /// Binds a non-blocking socket on `addr`.
    pub fn bind(addr: &str) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(addr).map_err(|source| NetError::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            peers: Vec::new(),
            started: Instant::now(),
            stats: EndpointStats::default(),
        })
    }

    /// The address the socket actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.socket.local_addr()?)
    }

    /// Number of peers with an open link.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Traffic counters since bind.
    #[must_use]
    pub const fn stats(&self) -> &EndpointStats {
        &self.stats
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Drains the socket, raising connect, message and disconnect
    /// events, and retransmits overdue reliable frames.
    pub fn pump(&mut self, events: &Sender<TransportEvent>) {
        let now_ms = self.now_ms();
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, addr)) => {
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += len as u64;
                    self.handle_datagram(&buf[..len], addr, now_ms, events);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => {
                    tracing::warn!("UDP recv error: {}", error);
                    break;
                }
            }
        }
        self.resend_overdue(now_ms, events);
        self.sweep_silent_peers(now_ms, events);
    }

    /// Frames and transmits everything queued on `outgoing`.
    pub fn flush(&mut self, outgoing: &Receiver<OutgoingPacket>) {
        let now_ms = self.now_ms();
        while let Ok(packet) = outgoing.try_recv() {
            match packet.channel {
                Channel::Reliable => {
                    // An outbound-initiated link (the client side)
                    // may not have a peer entry yet.
                    let index = self.find_or_create_link(packet.addr, now_ms);
                    let framed = self.peers[index]
                        .reliable
                        .send(&packet.data[..packet.len], now_ms);
                    match framed {
                        Ok(frame) => self.transmit(&frame, packet.addr),
                        Err(error) => {
                            tracing::warn!("Cannot frame packet for {}: {}", packet.addr, error);
                        }
                    }
                }
                Channel::Unreliable => {
                    if packet.len > MAX_PACKET_SIZE - 1 {
                        tracing::warn!(
                            "Cannot frame packet for {}: {}",
                            packet.addr,
                            NetError::PayloadTooLarge(packet.len)
                        );
                        continue;
                    }
                    let frame = build_unreliable(&packet.data[..packet.len]);
                    self.transmit(&frame, packet.addr);
                }
            }
        }
    }

    fn find_link(&self, addr: SocketAddr) -> Option<usize> {
        self.peers.iter().position(|link| link.addr == addr)
    }

    fn find_or_create_link(&mut self, addr: SocketAddr, now_ms: u64) -> usize {
        if let Some(index) = self.find_link(addr) {
            return index;
        }
        self.peers.push(PeerLink {
            addr,
            reliable: ReliableChannel::new(),
            last_recv_ms: now_ms,
        });
        self.peers.len() - 1
    }

    fn handle_datagram(
        &mut self,
        datagram: &[u8],
        addr: SocketAddr,
        now_ms: u64,
        events: &Sender<TransportEvent>,
    ) {
        let Some((&kind, body)) = datagram.split_first() else {
            return;
        };

        if self.find_link(addr).is_none() {
            tracing::debug!("New peer link: {}", addr);
            push_event(events, TransportEvent::Connected { addr });
        }
        let index = self.find_or_create_link(addr, now_ms);
        self.peers[index].last_recv_ms = now_ms;

        match kind {
            FRAME_RELIABLE if body.len() >= 2 => {
                let seq = u16::from_be_bytes([body[0], body[1]]);
                let mut deliverable = Vec::new();
                let accepted = self.peers[index]
                    .reliable
                    .receive(seq, &body[2..], &mut deliverable);
                // Ack anything accepted, duplicates included: the peer
                // resent because our previous ack was lost. A frame
                // refused for lack of buffer room stays unacked so the
                // peer tries again once the gap clears.
                if accepted {
                    let ack = build_ack(seq);
                    self.transmit(&ack, addr);
                }
                for frame in deliverable {
                    push_event(
                        events,
                        TransportEvent::Message {
                            addr,
                            channel: Channel::Reliable,
                            data: frame.data,
                            len: frame.len,
                        },
                    );
                }
            }
            FRAME_UNRELIABLE => {
                let frame = FrameBytes::from_slice(body);
                push_event(
                    events,
                    TransportEvent::Message {
                        addr,
                        channel: Channel::Unreliable,
                        data: frame.data,
                        len: frame.len,
                    },
                );
            }
            FRAME_ACK if body.len() >= 2 => {
                let seq = u16::from_be_bytes([body[0], body[1]]);
                self.peers[index].reliable.on_ack(seq);
            }
            _ => {
                tracing::debug!("Unknown frame kind {} from {}", kind, addr);
            }
        }
    }

    fn resend_overdue(&mut self, now_ms: u64, events: &Sender<TransportEvent>) {
        let mut due = Vec::new();
        let mut index = 0;
        while index < self.peers.len() {
            due.clear();
            let exhausted = self.peers[index].reliable.due_resends(now_ms, &mut due);
            if exhausted {
                let addr = self.peers[index].addr;
                tracing::warn!("Reliable delivery to {} failed, closing the link", addr);
                self.peers.swap_remove(index);
                push_event(events, TransportEvent::Disconnected { addr });
                continue;
            }
            let addr = self.peers[index].addr;
            for frame in &due {
                self.stats.frames_resent += 1;
                self.transmit(frame, addr);
            }
            index += 1;
        }
    }

    fn sweep_silent_peers(&mut self, now_ms: u64, events: &Sender<TransportEvent>) {
        let mut index = 0;
        while index < self.peers.len() {
            if now_ms.saturating_sub(self.peers[index].last_recv_ms) > PEER_TIMEOUT_MS {
                let addr = self.peers[index].addr;
                tracing::info!("Peer link timed out: {}", addr);
                self.peers.swap_remove(index);
                push_event(events, TransportEvent::Disconnected { addr });
            } else {
                index += 1;
            }
        }
    }

    fn transmit(&mut self, frame: &FrameBytes, addr: SocketAddr) {
        match self.socket.send_to(frame.as_slice(), addr) {
            Ok(sent) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += sent as u64;
            }
            Err(error) => {
                tracing::warn!("UDP send to {} failed: {}", addr, error);
            }
        }
    }
}

fn push_event(events: &Sender<TransportEvent>, event: TransportEvent) {
    if events.try_send(event).is_err() {
        tracing::warn!("Transport event queue full, dropping event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_frame_layouts() {
        let reliable = build_reliable(0x0102, b"abc");
        assert_eq!(reliable.as_slice(), &[0, 0x01, 0x02, b'a', b'b', b'c']);

        let unreliable = build_unreliable(b"xy");
        assert_eq!(unreliable.as_slice(), &[1, b'x', b'y']);

        let ack = build_ack(0xBEEF);
        assert_eq!(ack.as_slice(), &[2, 0xBE, 0xEF]);
    }

    #[test]
    fn test_sequence_wraparound_compare() {
        assert!(seq_newer(1, 65534));
        assert!(!seq_newer(65534, 1));
        assert!(seq_newer(5, 4));
        assert!(!seq_newer(4, 4));
    }

    #[test]
    fn test_in_order_delivery() {
        let mut channel = ReliableChannel::new();
        let mut delivered = Vec::new();
        channel.receive(0, b"first", &mut delivered);
        channel.receive(1, b"second", &mut delivered);
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].as_slice(), b"first");
        assert_eq!(delivered[1].as_slice(), b"second");
    }

    #[test]
    fn test_out_of_order_frames_wait_for_the_gap() {
        let mut channel = ReliableChannel::new();
        let mut delivered = Vec::new();

        channel.receive(1, b"second", &mut delivered);
        channel.receive(2, b"third", &mut delivered);
        assert!(delivered.is_empty());

        channel.receive(0, b"first", &mut delivered);
        assert_eq!(delivered.len(), 3);
        assert_eq!(delivered[0].as_slice(), b"first");
        assert_eq!(delivered[1].as_slice(), b"second");
        assert_eq!(delivered[2].as_slice(), b"third");
    }

    #[test]
    fn test_duplicate_frames_deliver_once_but_still_ack() {
        let mut channel = ReliableChannel::new();
        let mut delivered = Vec::new();
        assert!(channel.receive(0, b"only", &mut delivered));
        // The duplicate is ackable too: the peer resent because our
        // first ack was lost.
        assert!(channel.receive(0, b"only", &mut delivered));
        assert_eq!(delivered.len(), 1);
    }

    #[test]
    fn test_ack_clears_resend_queue() {
        let mut channel = ReliableChannel::new();
        channel.send(b"payload", 0).unwrap();
        assert_eq!(channel.in_flight_len(), 1);

        channel.on_ack(0);
        assert_eq!(channel.in_flight_len(), 0);

        let mut due = Vec::new();
        channel.due_resends(1000, &mut due);
        assert!(due.is_empty());
    }

    #[test]
    fn test_exhausted_resend_budget_kills_the_link() {
        let mut channel = ReliableChannel::new();
        channel.send(b"stubborn", 0).unwrap();

        let mut due = Vec::new();
        assert!(!channel.due_resends(50, &mut due));
        assert!(due.is_empty()); // not overdue yet

        let mut now = 0;
        for attempt in 1..=u64::from(MAX_RESENDS) {
            now = attempt * (RESEND_INTERVAL_MS + 1);
            due.clear();
            assert!(!channel.due_resends(now, &mut due), "attempt {attempt}");
            assert_eq!(due.len(), 1, "attempt {attempt}");
        }

        // Budget exhausted: the frame can never be delivered and the
        // gap never skipped, so the sweep reports the link dead.
        due.clear();
        assert!(channel.due_resends(now + RESEND_INTERVAL_MS + 1, &mut due));
        assert!(due.is_empty());
        assert_eq!(channel.in_flight_len(), 0);
    }

    #[test]
    fn test_full_ahead_buffer_refuses_instead_of_acking() {
        let mut channel = ReliableChannel::new();
        let mut delivered = Vec::new();

        // Fill the ahead buffer while seq 0 is missing.
        let limit = u16::try_from(AHEAD_LIMIT).unwrap();
        for seq in 1..=limit {
            assert!(channel.receive(seq, b"future", &mut delivered));
        }
        assert!(delivered.is_empty());
        assert_eq!(channel.ahead.len(), AHEAD_LIMIT);

        // No room left: refused, so the peer keeps resending instead
        // of taking an ack for a frame we threw away.
        assert!(!channel.receive(200, b"overflow", &mut delivered));

        // A frame already buffered is ackable without a second copy.
        assert!(channel.receive(1, b"future", &mut delivered));
        assert_eq!(channel.ahead.len(), AHEAD_LIMIT);

        // The missing head unblocks everything that was buffered.
        assert!(channel.receive(0, b"head", &mut delivered));
        assert_eq!(delivered.len(), 1 + AHEAD_LIMIT);
    }

    #[test]
    fn test_endpoints_exchange_frames_over_loopback() {
        let mut alice = UdpEndpoint::bind("127.0.0.1:0").unwrap();
        let mut bob = UdpEndpoint::bind("127.0.0.1:0").unwrap();
        let bob_addr = bob.local_addr().unwrap();

        let (out_tx, out_rx) = bounded(16);
        let mut data = [0u8; MAX_PACKET_SIZE];
        data[..5].copy_from_slice(b"hello");
        out_tx
            .send(OutgoingPacket {
                addr: bob_addr,
                channel: Channel::Reliable,
                data,
                len: 5,
            })
            .unwrap();
        alice.flush(&out_rx);

        let (event_tx, event_rx) = bounded(16);
        // Loopback delivery is fast but not instant.
        let mut received = None;
        for _ in 0..50 {
            bob.pump(&event_tx);
            let message = event_rx.try_iter().find_map(|event| match event {
                TransportEvent::Message {
                    channel, data, len, ..
                } => Some((channel, data, len)),
                TransportEvent::Connected { .. } | TransportEvent::Disconnected { .. } => None,
            });
            if let Some(found) = message {
                received = Some(found);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let (channel, data, len) = received.expect("frame should arrive over loopback");
        assert_eq!(channel, Channel::Reliable);
        assert_eq!(&data[..len], b"hello");
        assert_eq!(bob.peer_count(), 1);

        // Bob acked; alice's pump should clear her resend queue.
        let (alice_tx, _alice_rx) = bounded(16);
        std::thread::sleep(std::time::Duration::from_millis(5));
        alice.pump(&alice_tx);
        let pending: usize = alice
            .peers
            .iter()
            .map(|link| link.reliable.in_flight_len())
            .sum();
        assert_eq!(pending, 0);
    }
}
