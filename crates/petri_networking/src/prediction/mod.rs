//! # Client-Side Prediction
//!
//! The locally controlled cell never waits for the server. Each client
//! tick applies the sampled input immediately and remembers both the
//! input and the pose it produced; when an authoritative snapshot
//! arrives for a tick still in the buffer, the two poses are compared
//! and, on divergence, the entity is rewound and the buffered inputs
//! replayed.
//!
//! ## How It Works
//!
//! ```text
//! tick:      41      42      43      44      45
//! input:     I41     I42     I43     I44     I45      (buffered)
//! pose:      P41     P42     P43     P44     P45      (buffered)
//!                     ▲
//!            snapshot(tick=42, pose=A42) arrives
//!
//!   1. drop samples with tick < 42
//!   2. A42 == P42 (at wire precision)?  yes → done, nothing moved
//!   3. no → entity := A42, replay I43, I44, I45
//!           P43..P45 rewritten with the corrected poses
//! ```
//!
//! The comparison happens at wire precision: the predicted pose is
//! passed through the same quantizer the snapshot encoder uses, so a
//! client that is genuinely in sync sees bit-equal poses and never
//! resimulates. Speed is not part of a snapshot and is deliberately not
//! rewound; both simulations chase the same throttle target, so a speed
//! discrepancy decays on its own.

use std::collections::VecDeque;

use petri_shared::constants::CLIENT_TICK_SECONDS;
use petri_shared::entity::{Entity, Pose};

use crate::protocol::quantize_pose;

/// One predicted pose, keyed by the tick whose input produced it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseSample {
    /// Client tick
    pub tick: u32,
    /// Pose after applying that tick's input
    pub pose: Pose,
}

/// One sampled input, keyed by the tick it was applied on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputSample {
    /// Client tick
    pub tick: u32,
    /// Throttle in `[-1, 1]`, wire precision
    pub throttle: f32,
    /// Steer in `[-1, 1]`, wire precision
    pub steer: f32,
}

/// What a reconciliation pass decided.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReconcileOutcome {
    /// Authoritative pose matched the prediction at wire precision.
    InSync,
    /// Divergence: the entity was rewound and inputs replayed.
    Resimulated {
        /// Buffered inputs replayed after the reset.
        replayed: usize,
        /// Positional error that triggered the reset.
        error: f32,
    },
    /// The snapshot's tick is not in the buffer; nothing was touched.
    Stale,
}

/// Ticks of history kept while waiting for a corrective snapshot.
/// Four seconds at the client rate; anything older than that can only
/// produce a correction the player would no longer recognize.
const HISTORY_CAP: usize = 512;

/// Input and pose histories for the locally controlled cell.
///
/// Histories are trimmed by authoritative snapshots, not by acks: under
/// loss the snapshot tick is the only thing that says which inputs are
/// finally accounted for. A hard cap covers the quiet stretches where
/// no correction arrives at all.
pub struct Predictor {
    poses: VecDeque<PoseSample>,
    inputs: VecDeque<InputSample>,
    tick: u32,
    last_acked: u32,
}

impl Predictor {
    /// Creates an empty predictor; the first predicted tick will be 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poses: VecDeque::with_capacity(128),
            inputs: VecDeque::with_capacity(128),
            tick: 0,
            last_acked: 0,
        }
    }

    /// Last predicted tick (0 before the first prediction).
    #[inline]
    #[must_use]
    pub const fn current_tick(&self) -> u32 {
        self.tick
    }

    /// Highest input id the server has acknowledged.
    #[inline]
    #[must_use]
    pub const fn reference_id(&self) -> u32 {
        self.last_acked
    }

    /// Buffered, not-yet-confirmed ticks.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.inputs.len()
    }

    /// Applies one tick of input to the entity and buffers the result.
    ///
    /// Returns the new tick id, which doubles as the input id on the
    /// wire. `throttle` and `steer` must already be at wire precision
    /// (pass them through the axis quantizer first) or the server will
    /// simulate slightly different values than we predicted with.
    pub fn predict(&mut self, entity: &mut Entity, throttle: f32, steer: f32) -> u32 {
        entity.apply_input(throttle, steer, CLIENT_TICK_SECONDS);
        self.tick += 1;
        entity.last_tick = self.tick;

        if self.poses.len() == HISTORY_CAP {
            self.poses.pop_front();
            self.inputs.pop_front();
        }
        self.poses.push_back(PoseSample {
            tick: self.tick,
            pose: entity.pose(),
        });
        self.inputs.push_back(InputSample {
            tick: self.tick,
            throttle,
            steer,
        });
        self.tick
    }

    /// Records an `InputAck`. Acks only raise the reference id echoed
    /// back to the server; history trimming is driven by snapshots.
    pub fn acknowledge(&mut self, id: u32) {
        if id > self.last_acked {
            self.last_acked = id;
        }
    }

    /// Reconciles the entity against an authoritative pose at `tick`.
    ///
    /// `authoritative` is the pose as decoded from the wire.
    pub fn reconcile(
        &mut self,
        entity: &mut Entity,
        tick: u32,
        authoritative: Pose,
    ) -> ReconcileOutcome {
        debug_assert_eq!(self.poses.len(), self.inputs.len());

        // Everything before the authoritative tick is settled.
        while self.poses.front().is_some_and(|sample| sample.tick < tick) {
            self.poses.pop_front();
            self.inputs.pop_front();
        }

        let Some(front) = self.poses.front() else {
            return ReconcileOutcome::Stale;
        };
        if front.tick != tick {
            return ReconcileOutcome::Stale;
        }

        let predicted = quantize_pose(front.pose);
        if predicted == authoritative {
            return ReconcileOutcome::InSync;
        }

        let error = predicted.position.distance(authoritative.position);
        entity.set_pose(authoritative);
        self.poses[0] = PoseSample {
            tick,
            pose: authoritative,
        };

        let mut replayed = 0;
        for index in 1..self.inputs.len() {
            let input = self.inputs[index];
            entity.apply_input(input.throttle, input.steer, CLIENT_TICK_SECONDS);
            self.poses[index] = PoseSample {
                tick: input.tick,
                pose: entity.pose(),
            };
            replayed += 1;
        }

        ReconcileOutcome::Resimulated { replayed, error }
    }
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new()
    }
}
