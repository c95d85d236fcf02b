//! # Petri Server
//!
//! The authoritative side of the protocol: one process owns the dish,
//! consumes everyone's inputs, and tells each peer what actually
//! happened.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       PETRI SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐    │
//! │  │ Transport    │──▶│ Tick         │──▶│ Snapshot     │    │
//! │  │ events (in)  │   │ (fixed rate) │   │ fan-out (out)│    │
//! │  └──────────────┘   └──────────────┘   └──────────────┘    │
//! │         │                  │                                │
//! │         ▼                  ▼                                │
//! │  ┌──────────────┐   ┌──────────────┐                       │
//! │  │ Connections  │   │ World        │                       │
//! │  │ input queues │   │ (the dish)   │                       │
//! │  └──────────────┘   └──────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The server never touches a socket: transport events arrive on a
//! channel and outgoing packets leave on another. The UDP endpoint
//! and the in-memory simulation link both speak this seam.

mod connection;
mod tick;
mod world;

pub use connection::{ConnectionId, ConnectionState, PeerConnection, PendingInput};
pub use tick::{TickPacer, TickStats};
pub use world::World;

use std::net::SocketAddr;

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Deserialize;

use petri_shared::constants::{AI_COUNT, MAX_CLIENTS, MAX_PACKET_SIZE, SERVER_PORT, TICK_RATE};
use petri_shared::entity::EntityId;

use crate::protocol::{EntitySpawn, InputMessage, Message, SnapshotMessage};
use crate::transport::{NetError, OutgoingPacket, TransportEvent};

/// Depth of the event and outgoing queues.
const CHANNEL_DEPTH: usize = 10_000;

/// Seconds of silence before a peer is dropped.
const TIMEOUT_SECONDS: u32 = 5;

/// Server configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Simulation rate in ticks per second.
    pub tick_rate: u32,
    /// Maximum number of concurrent peers.
    pub max_clients: usize,
    /// UDP port to bind.
    pub port: u16,
    /// Host part of the bind address.
    pub bind_host: String,
    /// AI cells seeded into a fresh dish.
    pub ai_count: usize,
    /// World seed; a fixed seed replays the same dish.
    pub seed: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: TICK_RATE,
            max_clients: MAX_CLIENTS,
            port: SERVER_PORT,
            bind_host: "0.0.0.0".to_owned(),
            ai_count: AI_COUNT,
            seed: 0,
        }
    }
}

impl ServerConfig {
    /// Parses a configuration from TOML text. Missing fields fall back
    /// to their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, NetError> {
        toml::from_str(text).map_err(|error| NetError::Config(error.to_string()))
    }

    /// The full address to bind.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

/// The authoritative server.
///
/// Drives the world at a fixed tick rate, consuming transport events
/// and emitting packets; call [`tick`](Self::tick) once per simulation
/// tick.
pub struct PetriServer {
    config: ServerConfig,
    world: World,
    connections: Box<[PeerConnection]>,
    event_rx: Receiver<TransportEvent>,
    outgoing_tx: Sender<OutgoingPacket>,
    tick_dt: f32,
    timeout_ticks: u32,
}

impl PetriServer {
    /// Creates a server plus the channel endpoints the transport pumps.
    ///
    /// The returned sender feeds transport events in; the receiver
    /// carries encoded packets out.
    #[must_use]
    pub fn new(config: ServerConfig) -> (Self, Sender<TransportEvent>, Receiver<OutgoingPacket>) {
        let (event_tx, event_rx) = bounded(CHANNEL_DEPTH);
        let (outgoing_tx, outgoing_rx) = bounded(CHANNEL_DEPTH);

        let connections: Vec<PeerConnection> = (0..config.max_clients)
            .map(|_| PeerConnection::new_empty())
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let tick_dt = 1.0 / config.tick_rate as f32;
        let timeout_ticks = config.tick_rate * TIMEOUT_SECONDS;

        let server = Self {
            world: World::new(config.seed, config.ai_count),
            connections: connections.into_boxed_slice(),
            event_rx,
            outgoing_tx,
            tick_dt,
            timeout_ticks,
            config,
        };
        (server, event_tx, outgoing_rx)
    }

    /// The configuration this server was built with.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The authoritative dish.
    #[must_use]
    pub const fn world(&self) -> &World {
        &self.world
    }

    /// Number of peers currently connected.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connections
            .iter()
            .filter(|connection| connection.is_active())
            .count()
    }

    /// Runs one server tick: drain events, consume inputs, step the
    /// dish, fan out snapshots.
    pub fn tick(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_event(event);
        }
        self.consume_inputs();
        self.sweep_timeouts();
        self.world.step(self.tick_dt);
        self.send_collision_corrections();
        self.broadcast_snapshots();
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { addr } => self.handle_connect(addr),
            TransportEvent::Disconnected { addr } => {
                if let Some(slot) = self.find_connection_by_addr(addr) {
                    // The entity stays in the dish; the protocol has no
                    // despawn message.
                    tracing::info!("Peer {} disconnected", addr);
                    self.connections[slot].disconnect();
                }
            }
            TransportEvent::Message {
                addr, data, len, ..
            } => {
                if let Some(slot) = self.find_connection_by_addr(addr) {
                    self.connections[slot].record_recv(self.world.tick());
                }
                match Message::decode(&data[..len]) {
                    Ok(Message::Join) => self.handle_join(addr),
                    Ok(Message::Input(input)) => self.handle_input(addr, input),
                    Ok(other) => {
                        tracing::debug!("Unexpected {:?} from {}", other.tag(), addr);
                    }
                    Err(error) => {
                        tracing::warn!("Malformed packet from {}: {}", addr, error);
                    }
                }
            }
        }
    }

    fn handle_connect(&mut self, addr: SocketAddr) {
        if self.find_connection_by_addr(addr).is_some() {
            return; // duplicate connect notification
        }
        let tick = self.world.tick();
        let Some(slot) = self
            .connections
            .iter()
            .position(|connection| !connection.is_active())
        else {
            tracing::warn!("Connection table full, ignoring {}", addr);
            return;
        };
        self.connections[slot].init(ConnectionId(slot as u32), addr, tick);
        tracing::info!("Peer {} connected (slot {})", addr, slot);
    }

    /// Join flow: replay the population, spawn the player, announce it
    /// to everyone, then tell the joiner which entity is theirs.
    fn handle_join(&mut self, addr: SocketAddr) {
        let Some(slot) = self.find_connection_by_addr(addr) else {
            tracing::debug!("Join from unknown peer {}", addr);
            return;
        };
        if !self.connections[slot].entity.is_invalid() {
            tracing::debug!("Duplicate Join from {}", addr);
            return;
        }

        for index in 0..self.world.entities().len() {
            let spawn = EntitySpawn::of(&self.world.entities()[index]);
            self.send_message(addr, &Message::NewEntity(spawn));
        }

        let id = self.world.spawn_player();
        self.connections[slot].entity = id;

        let spawn = match self.world.entity(id) {
            Some(entity) => EntitySpawn::of(entity),
            None => return,
        };
        for peer in 0..self.connections.len() {
            if self.connections[peer].is_active() {
                let peer_addr = self.connections[peer].addr;
                self.send_message(peer_addr, &Message::NewEntity(spawn));
            }
        }
        self.send_message(addr, &Message::SetControlledEntity(id));
        tracing::info!("Peer {} joined as entity {}", addr, id);
    }

    fn handle_input(&mut self, addr: SocketAddr, message: InputMessage) {
        let Some(slot) = self.find_connection_by_addr(addr) else {
            tracing::debug!("Input from unknown peer {}", addr);
            return;
        };
        if self.connections[slot].entity != message.entity_id {
            tracing::debug!(
                "Peer {} sent input for entity {} it does not control",
                addr,
                message.entity_id
            );
            return;
        }

        // Idle-repeat resolves against the newest queued input, or the
        // last controls the entity actually applied.
        let fallback = self.connections[slot]
            .newest_controls()
            .or_else(|| {
                self.world
                    .entity(message.entity_id)
                    .map(|entity| (entity.throttle, entity.steer))
            })
            .unwrap_or((0.0, 0.0));
        let (throttle, steer) = message.controls.unwrap_or(fallback);

        self.connections[slot].push_input(
            PendingInput {
                id: message.input_id,
                throttle,
                steer,
            },
            message.reference_id,
        );
        self.send_message(addr, &Message::InputAck(message.input_id));
    }

    /// Steps every queued input through the world, filling loss gaps
    /// by repeating the arriving input's controls across the missing
    /// ids.
    fn consume_inputs(&mut self) {
        for slot in 0..self.connections.len() {
            if !self.connections[slot].is_active() || self.connections[slot].entity.is_invalid() {
                continue;
            }
            let entity_id = self.connections[slot].entity;
            let mut last = self.connections[slot].last_consumed;

            let connection = &mut self.connections[slot];
            for input in connection.drain_pending() {
                while last < input.id {
                    last += 1;
                    self.world
                        .consume_input(entity_id, input.throttle, input.steer, last);
                }
            }
            connection.last_consumed = last;
        }
    }

    fn sweep_timeouts(&mut self) {
        let tick = self.world.tick();
        for slot in 0..self.connections.len() {
            if self.connections[slot].is_active()
                && self.connections[slot].is_timed_out(tick, self.timeout_ticks)
            {
                tracing::info!("Peer {} timed out", self.connections[slot].addr);
                self.connections[slot].disconnect();
            }
        }
    }

    /// Out-of-band corrections: a player entity mutated by absorption
    /// gets a fresh snapshot straight to its owner.
    fn send_collision_corrections(&mut self) {
        for index in 0..self.world.collision_hits().len() {
            let entity_id = self.world.collision_hits()[index];
            let message = match self.world.entity(entity_id) {
                Some(entity) => Message::Snapshot(SnapshotMessage::capture(entity)),
                None => continue,
            };
            let Some(slot) = self.find_connection_by_entity(entity_id) else {
                continue;
            };
            let addr = self.connections[slot].addr;
            self.send_message(addr, &message);
        }
    }

    /// Regular fan-out: every entity's snapshot to every peer except
    /// the one that owns it.
    fn broadcast_snapshots(&mut self) {
        for index in 0..self.world.entities().len() {
            let entity = self.world.entities()[index];
            let message = Message::Snapshot(SnapshotMessage::capture(&entity));
            for slot in 0..self.connections.len() {
                if !self.connections[slot].is_active()
                    || self.connections[slot].entity == entity.id
                {
                    continue;
                }
                let addr = self.connections[slot].addr;
                self.send_message(addr, &message);
            }
        }
    }

    fn find_connection_by_addr(&self, addr: SocketAddr) -> Option<usize> {
        self.connections
            .iter()
            .position(|connection| connection.is_active() && connection.addr == addr)
    }

    fn find_connection_by_entity(&self, id: EntityId) -> Option<usize> {
        self.connections
            .iter()
            .position(|connection| connection.is_active() && connection.entity == id)
    }

    fn send_message(&mut self, addr: SocketAddr, message: &Message) {
        let mut data = [0u8; MAX_PACKET_SIZE];
        match message.encode(&mut data) {
            Ok(len) => {
                let packet = OutgoingPacket {
                    addr,
                    channel: message.channel(),
                    data,
                    len,
                };
                if self.outgoing_tx.try_send(packet).is_err() {
                    tracing::warn!("Outgoing queue full, dropping {:?} for {}", message.tag(), addr);
                }
            }
            Err(error) => {
                tracing::warn!("Failed to encode {:?}: {}", message.tag(), error);
            }
        }
    }
}
