//! # Peer Connections
//!
//! Per-peer bookkeeping: which entity a connection drives, the queue
//! of inputs waiting to be stepped through the world, and the receipt
//! clock the timeout sweep reads.
//!
//! ## Design
//!
//! - Fixed-size connection slots (no allocations after startup)
//! - Input ids are client ticks: strictly increasing, gaps mean loss
//! - A stale or duplicate input is dropped at the door, never queued

use std::collections::VecDeque;
use std::net::SocketAddr;

use petri_shared::entity::EntityId;

/// Unique identifier for a connection slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// Invalid/null connection ID.
    pub const NULL: Self = Self(u32::MAX);

    /// Returns true if this is the null sentinel.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::NULL
    }
}

/// State of a connection slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Slot is free.
    #[default]
    Disconnected = 0,
    /// Peer is exchanging traffic with us.
    Connected = 1,
}

/// One client input waiting to be consumed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingInput {
    /// Client tick that produced the input; doubles as the input id.
    pub id: u32,
    /// Throttle at wire precision.
    pub throttle: f32,
    /// Steer at wire precision.
    pub steer: f32,
}

/// Server-side state for one connected peer.
#[derive(Clone, Debug)]
pub struct PeerConnection {
    /// Slot ID.
    pub id: ConnectionId,
    /// Connection state.
    pub state: ConnectionState,
    /// Peer's network address.
    pub addr: SocketAddr,
    /// Entity this peer drives (`INVALID` until it joins).
    pub entity: EntityId,
    /// Highest input id this peer has consumed through the world.
    pub last_consumed: u32,
    /// Server tick of the last packet from this peer.
    pub last_recv_tick: u32,
    /// Inputs waiting to be consumed, ascending by id.
    pending: VecDeque<PendingInput>,
    /// Highest input id ever accepted from this peer.
    watermark: u32,
}

impl PeerConnection {
    /// Creates a disconnected slot.
    #[must_use]
    pub fn new_empty() -> Self {
        Self {
            id: ConnectionId::NULL,
            state: ConnectionState::Disconnected,
            addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            entity: EntityId::INVALID,
            last_consumed: 0,
            last_recv_tick: 0,
            pending: VecDeque::with_capacity(8),
            watermark: 0,
        }
    }

    /// Initializes this slot for a newly seen peer.
    pub fn init(&mut self, id: ConnectionId, addr: SocketAddr, tick: u32) {
        self.id = id;
        self.state = ConnectionState::Connected;
        self.addr = addr;
        self.entity = EntityId::INVALID;
        self.last_consumed = 0;
        self.last_recv_tick = tick;
        self.pending.clear();
        self.watermark = 0;
    }

    /// Resets this slot to the disconnected state.
    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.id = ConnectionId::NULL;
        self.entity = EntityId::INVALID;
        self.pending.clear();
    }

    /// Returns true if this slot is in use.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    /// Queues an arriving input.
    ///
    /// An id at or below the watermark is a duplicate or a straggler
    /// that arrived behind a newer input; either way the newer state
    /// already supersedes it, so it is dropped and `false` returned.
    /// `reference_id` is the client's own obsolescence mark: anything
    /// still queued below it is trimmed away.
    pub fn push_input(&mut self, input: PendingInput, reference_id: u32) -> bool {
        if input.id <= self.watermark {
            return false;
        }
        self.watermark = input.id;
        self.pending.push_back(input);

        while self
            .pending
            .front()
            .is_some_and(|queued| queued.id < reference_id)
        {
            self.pending.pop_front();
        }
        true
    }

    /// Number of inputs waiting to be consumed.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Controls of the newest queued input, if any. Idle-repeat inputs
    /// resolve against these.
    #[must_use]
    pub fn newest_controls(&self) -> Option<(f32, f32)> {
        self.pending
            .back()
            .map(|queued| (queued.throttle, queued.steer))
    }

    /// Hands the queued inputs to the consumer, oldest first.
    pub fn drain_pending(&mut self) -> impl Iterator<Item = PendingInput> + '_ {
        self.pending.drain(..)
    }

    /// Records packet receipt for the timeout sweep.
    pub fn record_recv(&mut self, tick: u32) {
        self.last_recv_tick = tick;
    }

    /// Checks whether this peer has gone quiet for too long.
    #[must_use]
    pub fn is_timed_out(&self, current_tick: u32, timeout_ticks: u32) -> bool {
        current_tick.saturating_sub(self.last_recv_tick) > timeout_ticks
    }
}

impl Default for PeerConnection {
    fn default() -> Self {
        Self::new_empty()
    }
}
