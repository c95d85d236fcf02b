//! # Simulation Harness
//!
//! A server and a swarm of bot clients wired together through an
//! in-memory link, with latency, jitter and loss injected between
//! them. No sockets, no wall clock: time is a counter and every random
//! draw comes from one seeded generator, so a run is reproducible down
//! to the last bit.
//!
//! The link models what the real transport provides: reliable-channel
//! messages always arrive, in order, delayed by latency; unreliable
//! messages can be dropped and reordered by jitter. Everything above
//! the link is the production code path, the same [`PetriServer`]
//! and [`PetriClient`] the binaries run.

use std::net::SocketAddr;

use crossbeam_channel::{Receiver, Sender};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use petri_shared::constants::MAX_PACKET_SIZE;

use crate::client::{ClientState, PetriClient};
use crate::protocol::{Channel, Message};
use crate::server::{PetriServer, ServerConfig};
use crate::transport::{OutgoingPacket, TransportEvent};

/// First port of the synthetic bot address range.
const BOT_PORT_BASE: u16 = 40000;

/// Bots re-roll their sticks after at least this many milliseconds.
const CONTROL_HOLD_MIN_MS: u64 = 500;
/// Upper bound of the stick re-roll interval.
const CONTROL_HOLD_MAX_MS: u64 = 2000;

/// Network quality injected by the link.
#[derive(Clone, Copy, Debug)]
pub struct LinkConditions {
    /// Fixed one-way delay, milliseconds.
    pub latency_ms: u64,
    /// Extra random delay in `0..=jitter_ms` per packet.
    pub jitter_ms: u64,
    /// Percentage of unreliable packets that vanish.
    pub loss_percent: u8,
}

impl LinkConditions {
    /// Zero delay, zero loss. Every divergence is a logic bug.
    pub const PERFECT: Self = Self {
        latency_ms: 0,
        jitter_ms: 0,
        loss_percent: 0,
    };
    /// A wired LAN.
    pub const GOOD: Self = Self {
        latency_ms: 20,
        jitter_ms: 5,
        loss_percent: 0,
    };
    /// A decent home connection.
    pub const AVERAGE: Self = Self {
        latency_ms: 60,
        jitter_ms: 15,
        loss_percent: 2,
    };
    /// Congested wifi.
    pub const POOR: Self = Self {
        latency_ms: 150,
        jitter_ms: 40,
        loss_percent: 10,
    };
}

/// Counters a swarm run accumulates.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimStats {
    /// Link steps executed.
    pub ticks: u64,
    /// Messages the link scheduled for delivery, both directions.
    pub messages_sent: u64,
    /// Unreliable messages the link swallowed.
    pub messages_dropped: u64,
    /// Largest server/client position disagreement seen.
    pub max_position_error: f32,
    /// Sum of sampled position errors.
    pub total_position_error: f64,
    /// Number of error samples taken.
    pub error_samples: u64,
}

impl SimStats {
    /// Mean position error across the run.
    #[must_use]
    pub fn avg_position_error(&self) -> f32 {
        if self.error_samples == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let avg = (self.total_position_error / self.error_samples as f64) as f32;
        avg
    }
}

struct Scheduled<T> {
    deliver_at_ms: u64,
    seq: u64,
    payload: T,
}

/// Removes entries due at `now_ms`, ordered by delivery time then
/// enqueue order.
fn take_ready<T>(queue: &mut Vec<Scheduled<T>>, now_ms: u64) -> Vec<Scheduled<T>> {
    let mut ready = Vec::new();
    let mut index = 0;
    while index < queue.len() {
        if queue[index].deliver_at_ms <= now_ms {
            ready.push(queue.swap_remove(index));
        } else {
            index += 1;
        }
    }
    ready.sort_unstable_by_key(|entry| (entry.deliver_at_ms, entry.seq));
    ready
}

struct BotPeer {
    addr: SocketAddr,
    client: PetriClient,
    controls: (f32, f32),
    next_control_change_ms: u64,
    linked: bool,
    up: Vec<Scheduled<TransportEvent>>,
    down: Vec<Scheduled<Message>>,
    last_up_reliable_ms: u64,
    last_down_reliable_ms: u64,
}

/// A full dish under synthetic load: one authoritative server, a swarm
/// of predicted bot clients, and a lossy link in between.
pub struct BotSwarm {
    server: PetriServer,
    event_tx: Sender<TransportEvent>,
    outgoing_rx: Receiver<OutgoingPacket>,
    bots: Vec<BotPeer>,
    conditions: LinkConditions,
    rng: ChaCha8Rng,
    clock_ms: u64,
    step_ms: u64,
    frame_dt: f32,
    next_seq: u64,
    stats: SimStats,
}

impl BotSwarm {
    /// Builds the swarm and queues every bot's join handshake.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        bot_count: usize,
        conditions: LinkConditions,
        seed: u64,
    ) -> Self {
        let tick_rate = config.tick_rate;
        let (server, event_tx, outgoing_rx) = PetriServer::new(config);

        #[allow(clippy::cast_precision_loss)]
        let frame_dt = 1.0 / tick_rate as f32;
        let step_ms = 1000 / u64::from(tick_rate);

        let mut swarm = Self {
            server,
            event_tx,
            outgoing_rx,
            bots: Vec::with_capacity(bot_count),
            conditions,
            rng: ChaCha8Rng::seed_from_u64(seed),
            clock_ms: 0,
            step_ms,
            frame_dt,
            next_seq: 0,
            stats: SimStats::default(),
        };

        for index in 0..bot_count {
            #[allow(clippy::cast_possible_truncation)]
            let port = BOT_PORT_BASE + index as u16;
            let addr = SocketAddr::from(([127, 0, 0, 1], port));
            swarm.bots.push(BotPeer {
                addr,
                client: PetriClient::new(),
                controls: (0.0, 0.0),
                next_control_change_ms: 0,
                linked: false,
                up: Vec::new(),
                down: Vec::new(),
                last_up_reliable_ms: 0,
                last_down_reliable_ms: 0,
            });
            let join = swarm.bots[index].client.begin_join();
            swarm.queue_up(index, &join);
        }
        swarm
    }

    /// The authoritative side.
    #[must_use]
    pub const fn server(&self) -> &PetriServer {
        &self.server
    }

    /// One bot's session.
    #[must_use]
    pub fn bot(&self, index: usize) -> &PetriClient {
        &self.bots[index].client
    }

    /// Number of bots in the swarm.
    #[must_use]
    pub fn bot_count(&self) -> usize {
        self.bots.len()
    }

    /// Counters accumulated so far.
    #[must_use]
    pub const fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// The synthetic clock, milliseconds since start.
    #[must_use]
    pub const fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    /// Total resimulations across every bot.
    #[must_use]
    pub fn corrections_total(&self) -> u32 {
        self.bots.iter().map(|bot| bot.client.corrections()).sum()
    }

    /// Pins every bot's sticks, suspending the random re-rolls.
    pub fn hold_controls(&mut self, throttle: f32, steer: f32) {
        for bot in &mut self.bots {
            bot.controls = (throttle, steer);
            bot.next_control_change_ms = u64::MAX;
        }
    }

    /// Runs `steps` link steps.
    pub fn run(&mut self, steps: u64) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// One link step: bots predict and send, the server ticks, and
    /// due packets cross the link in both directions.
    pub fn step(&mut self) {
        self.clock_ms += self.step_ms;

        // Bots steer and predict.
        for index in 0..self.bots.len() {
            if self.clock_ms >= self.bots[index].next_control_change_ms {
                let throttle = self.rng.gen_range(-0.3..1.0f32);
                let steer = self.rng.gen_range(-1.0..1.0f32);
                self.bots[index].controls = (throttle, steer);
                self.bots[index].next_control_change_ms =
                    self.clock_ms + self.rng.gen_range(CONTROL_HOLD_MIN_MS..CONTROL_HOLD_MAX_MS);
            }
            let (throttle, steer) = self.bots[index].controls;
            let mut outbox = Vec::new();
            self.bots[index]
                .client
                .advance(self.frame_dt, throttle, steer, &mut outbox);
            for message in &outbox {
                self.queue_up(index, message);
            }
        }

        // Due uplink packets reach the server.
        for index in 0..self.bots.len() {
            let ready = take_ready(&mut self.bots[index].up, self.clock_ms);
            if !ready.is_empty() && !self.bots[index].linked {
                self.bots[index].linked = true;
                let addr = self.bots[index].addr;
                if self
                    .event_tx
                    .try_send(TransportEvent::Connected { addr })
                    .is_err()
                {
                    tracing::warn!("Sim link dropped a connect event");
                }
            }
            for entry in ready {
                if self.event_tx.try_send(entry.payload).is_err() {
                    tracing::warn!("Sim link dropped an uplink event");
                }
            }
        }

        self.server.tick();

        // Server output enters the downlink queues.
        while let Ok(packet) = self.outgoing_rx.try_recv() {
            let Some(index) = self.bots.iter().position(|bot| bot.addr == packet.addr) else {
                continue;
            };
            match Message::decode(&packet.data[..packet.len]) {
                Ok(message) => self.queue_down(index, message),
                Err(error) => tracing::warn!("Sim link failed to decode: {}", error),
            }
        }

        // Due downlink packets reach the bots.
        for index in 0..self.bots.len() {
            let ready = take_ready(&mut self.bots[index].down, self.clock_ms);
            for entry in ready {
                self.bots[index]
                    .client
                    .handle_message(&entry.payload, self.clock_ms);
            }
        }

        self.sample_errors();
        self.stats.ticks += 1;
    }

    fn queue_up(&mut self, index: usize, message: &Message) {
        let channel = message.channel();
        if self.swallows(channel) {
            return;
        }
        let mut data = [0u8; MAX_PACKET_SIZE];
        let len = match message.encode(&mut data) {
            Ok(len) => len,
            Err(error) => {
                tracing::warn!("Sim link failed to encode: {}", error);
                return;
            }
        };

        let mut deliver_at_ms = self.delivery_time();
        if channel == Channel::Reliable {
            deliver_at_ms = deliver_at_ms.max(self.bots[index].last_up_reliable_ms);
            self.bots[index].last_up_reliable_ms = deliver_at_ms;
        }

        let addr = self.bots[index].addr;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.messages_sent += 1;
        self.bots[index].up.push(Scheduled {
            deliver_at_ms,
            seq,
            payload: TransportEvent::Message {
                addr,
                channel,
                data,
                len,
            },
        });
    }

    fn queue_down(&mut self, index: usize, message: Message) {
        let channel = message.channel();
        if self.swallows(channel) {
            return;
        }

        let mut deliver_at_ms = self.delivery_time();
        if channel == Channel::Reliable {
            deliver_at_ms = deliver_at_ms.max(self.bots[index].last_down_reliable_ms);
            self.bots[index].last_down_reliable_ms = deliver_at_ms;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.messages_sent += 1;
        self.bots[index].down.push(Scheduled {
            deliver_at_ms,
            seq,
            payload: message,
        });
    }

    /// Rolls the loss die; reliable traffic never loses (the real
    /// transport retransmits until acked).
    fn swallows(&mut self, channel: Channel) -> bool {
        if channel == Channel::Reliable || self.conditions.loss_percent == 0 {
            return false;
        }
        if self.rng.gen_range(0u8..100) < self.conditions.loss_percent {
            self.stats.messages_dropped += 1;
            return true;
        }
        false
    }

    fn delivery_time(&mut self) -> u64 {
        let jitter = if self.conditions.jitter_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..=self.conditions.jitter_ms)
        };
        self.clock_ms + self.conditions.latency_ms + jitter
    }

    fn sample_errors(&mut self) {
        for bot in &self.bots {
            if bot.client.state() != ClientState::Active {
                continue;
            }
            let id = bot.client.controlled();
            let (Some(server_entity), Some(client_entity)) =
                (self.server.world().entity(id), bot.client.entity(id))
            else {
                continue;
            };
            let error = server_entity.position.distance(client_entity.position);
            self.stats.max_position_error = self.stats.max_position_error.max(error);
            self.stats.total_position_error += f64::from(error);
            self.stats.error_samples += 1;
        }
    }
}
