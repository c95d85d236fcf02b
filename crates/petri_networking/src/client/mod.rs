//! # Client Session
//!
//! The client-side half of the protocol: join handshake, fixed-rate
//! input prediction for the controlled cell, and delayed interpolation
//! for everything else.
//!
//! A connected client maintains two different views of the dish:
//!
//! ```text
//!                   ┌─ own cell ────── predicted NOW, corrected by
//!                   │                  reconciliation on snapshots
//!   dish mirror ────┤
//!                   └─ remote cells ── rendered ~100 ms in the past,
//!                                      blended between snapshots
//! ```
//!
//! The session layer stays transport-agnostic: [`PetriClient`] turns
//! frames into [`Message`]s to send and consumes decoded messages,
//! leaving sockets to the endpoint.

use petri_shared::constants::{CLIENT_TICK_SECONDS, INTERPOLATION_DELAY_MS};
use petri_shared::entity::{Entity, EntityId};

use crate::interpolation::EntityInterpolator;
use crate::prediction::{Predictor, ReconcileOutcome};
use crate::protocol::{stable_axis, InputMessage, Message, SnapshotMessage};

/// Upper bound on banked frame time, so a stall does not burst
/// thousands of prediction ticks.
const MAX_ACCUMULATED_SECONDS: f32 = 0.25;

/// Where the session is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientState {
    /// No join attempted yet.
    #[default]
    Disconnected,
    /// `Join` sent, waiting for `SetControlledEntity`.
    Joining,
    /// Controlling an entity and predicting.
    Active,
}

/// A predicted, interpolating mirror of the dish.
#[derive(Default)]
pub struct PetriClient {
    state: ClientState,
    controlled: EntityId,
    entities: Vec<Entity>,
    interpolators: Vec<(EntityId, EntityInterpolator)>,
    predictor: Predictor,
    accumulator: f32,
    last_sent_codes: Option<(u8, u8)>,
    last_change_id: u32,
    corrections: u32,
}

impl PetriClient {
    /// A fresh, disconnected session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ClientState {
        self.state
    }

    /// The entity this session controls; invalid until the server
    /// assigns one.
    #[must_use]
    pub const fn controlled(&self) -> EntityId {
        self.controlled
    }

    /// Every entity the session knows about.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Looks up a known entity.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    /// How many snapshots forced a resimulation so far.
    #[must_use]
    pub const fn corrections(&self) -> u32 {
        self.corrections
    }

    /// Starts the handshake. The returned message goes to the server
    /// on the reliable channel.
    pub fn begin_join(&mut self) -> Message {
        self.state = ClientState::Joining;
        Message::Join
    }

    /// Advances local time by one render frame, predicting the
    /// controlled cell at the fixed client rate and appending the
    /// input messages to send.
    ///
    /// Controls are snapped to wire precision before they are applied,
    /// so the server decodes exactly the values the prediction used.
    pub fn advance(&mut self, frame_dt: f32, throttle: f32, steer: f32, out: &mut Vec<Message>) {
        if self.state != ClientState::Active {
            return;
        }
        self.accumulator = (self.accumulator + frame_dt).min(MAX_ACCUMULATED_SECONDS);

        while self.accumulator >= CLIENT_TICK_SECONDS {
            self.accumulator -= CLIENT_TICK_SECONDS;

            let (throttle_code, throttle_value) = stable_axis(throttle);
            let (steer_code, steer_value) = stable_axis(steer);
            let Some(index) = self.entity_index(self.controlled) else {
                break;
            };
            let input_id =
                self.predictor
                    .predict(&mut self.entities[index], throttle_value, steer_value);

            // A change rides quantized on every input until one of
            // those inputs is acked; a lost datagram then costs one
            // resend, not seconds of stale controls. Once the server
            // has confirmed the values, repeats ride as an empty
            // header byte and it replays them from its end.
            let codes = (throttle_code, steer_code);
            let changed = self.last_sent_codes != Some(codes);
            self.last_sent_codes = Some(codes);
            if changed {
                self.last_change_id = input_id;
            }
            let controls = if changed || self.predictor.reference_id() < self.last_change_id {
                Some((throttle_value, steer_value))
            } else {
                None
            };

            out.push(Message::Input(InputMessage {
                entity_id: self.controlled,
                input_id,
                reference_id: self.predictor.reference_id(),
                controls,
            }));
        }
    }

    /// Feeds one decoded server message into the session. `now_ms` is
    /// the client clock used for interpolation scheduling.
    pub fn handle_message(&mut self, message: &Message, now_ms: u64) {
        match message {
            Message::NewEntity(spawn) => {
                if self.entity_index(spawn.id).is_some() {
                    tracing::debug!("Duplicate NewEntity for {}", spawn.id);
                    return;
                }
                let entity = spawn.into_entity();
                self.interpolators
                    .push((entity.id, EntityInterpolator::new(entity.pose())));
                self.entities.push(entity);
            }
            Message::SetControlledEntity(id) => {
                self.controlled = *id;
                self.state = ClientState::Active;
                self.accumulator = 0.0;
                self.last_sent_codes = None;
                self.last_change_id = 0;
                tracing::info!("Controlling entity {}", id);
            }
            Message::Snapshot(snapshot) => self.handle_snapshot(*snapshot, now_ms),
            Message::InputAck(id) => self.predictor.acknowledge(*id),
            Message::Join | Message::Input(_) => {
                tracing::debug!("Ignoring client-bound {:?}", message.tag());
            }
        }
    }

    fn handle_snapshot(&mut self, snapshot: SnapshotMessage, now_ms: u64) {
        if snapshot.entity_id == self.controlled {
            let Some(index) = self.entity_index(snapshot.entity_id) else {
                return;
            };
            let outcome =
                self.predictor
                    .reconcile(&mut self.entities[index], snapshot.tick, snapshot.pose);
            if let ReconcileOutcome::Resimulated { replayed, error } = outcome {
                self.corrections += 1;
                tracing::debug!("Correction: replayed {} inputs, error {:.3}", replayed, error);
            }
            return;
        }

        let Some((_, interpolator)) = self
            .interpolators
            .iter_mut()
            .find(|(id, _)| *id == snapshot.entity_id)
        else {
            tracing::debug!("Snapshot for unknown entity {}", snapshot.entity_id);
            return;
        };
        interpolator.push(now_ms + INTERPOLATION_DELAY_MS, snapshot.pose);
    }

    /// The dish as it should be drawn at `now_ms`: the controlled cell
    /// at its predicted pose, every other cell at its interpolated
    /// delayed pose.
    pub fn render_entities(&mut self, now_ms: u64) -> Vec<Entity> {
        let mut out = Vec::with_capacity(self.entities.len());
        for entity in &self.entities {
            if entity.id == self.controlled {
                out.push(*entity);
                continue;
            }
            let mut shown = *entity;
            if let Some((_, interpolator)) = self
                .interpolators
                .iter_mut()
                .find(|(id, _)| *id == entity.id)
            {
                shown.set_pose(interpolator.sample(now_ms));
            }
            out.push(shown);
        }
        out
    }

    fn entity_index(&self, id: EntityId) -> Option<usize> {
        self.entities.iter().position(|entity| entity.id == id)
    }
}
