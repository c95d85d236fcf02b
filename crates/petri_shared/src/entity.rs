//! The entity model: cells in the dish.
//!
//! An [`Entity`] is one simulated object. AI cells wander between random
//! targets; player cells integrate a bicycle-style motion model from the
//! throttle/steer inputs their owner sends. The motion step lives here,
//! in the shared crate, because the server and every predicting client
//! must run the exact same code: prediction works by replaying inputs
//! through [`Entity::apply_input`] and trusting the result to match the
//! server bit-for-bit.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::constants::{PLAYER_SPAWN_SIZE, SIZE_TO_EXTENT};
use crate::math::{move_toward, sign, wrap_angle, Vec2};

/// Throttle is clamped to this band before scaling: full forward,
/// limited reverse.
const THROTTLE_MIN: f32 = -0.3;
/// Upper throttle clamp.
const THROTTLE_MAX: f32 = 1.0;
/// Speed a full-throttle cell converges toward, units per second.
const TOP_SPEED: f32 = 10.0;
/// Acceleration when throttle and velocity agree.
const ACCEL_RATE: f32 = 3.0;
/// Acceleration when throttle opposes velocity (braking).
const BRAKE_RATE: f32 = 12.0;
/// Steering gain.
const TURN_RATE: f32 = 0.3;
/// Speed contribution to turning saturates at this magnitude.
const TURN_SPEED_LIMIT: f32 = 2.0;

/// Identifier of a live entity, unique within a world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u16);

impl EntityId {
    /// Sentinel meaning "no entity".
    pub const INVALID: Self = Self(u16::MAX);

    /// Returns true if this is the "no entity" sentinel.
    #[inline]
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 == u16::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What drives an entity. Fixed at creation.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// Inert cell, neither simulated nor owned.
    #[default]
    Default = 0,
    /// Server-driven wanderer.
    Ai = 1,
    /// Client-owned, input-driven.
    Player = 2,
}

impl EntityKind {
    /// Wire byte for this kind.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a wire byte; `None` for anything outside the catalog.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Default),
            1 => Some(Self::Ai),
            2 => Some(Self::Player),
            _ => None,
        }
    }
}

/// RGBA cell color.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Color {
    /// Red channel
    pub r: u8,
    /// Green channel
    pub g: u8,
    /// Blue channel
    pub b: u8,
    /// Alpha channel
    pub a: u8,
}

impl Color {
    /// Creates a new color
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque white
    pub const WHITE: Self = Self::new(255, 255, 255, 255);
}

/// A positional sample of one entity: where it is and which way it faces.
///
/// This is what snapshots carry and what prediction histories store.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Pose {
    /// Position in the dish
    pub position: Vec2,
    /// Heading in radians
    pub orientation: f32,
}

impl Pose {
    /// Creates a new pose
    #[must_use]
    pub const fn new(position: Vec2, orientation: f32) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Linear blend toward `other`; `t` is not clamped.
    ///
    /// Orientation turns along the shortest arc: a blend from one side
    /// of the `±PI` seam to the other crosses the seam instead of
    /// sweeping the long way around.
    #[must_use]
    pub fn lerp(self, other: Self, t: f32) -> Self {
        let turn = wrap_angle(other.orientation - self.orientation);
        Self {
            position: self.position.lerp(other.position, t),
            orientation: wrap_angle(self.orientation + turn * t),
        }
    }
}

/// One simulated cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Entity {
    /// Unique id within the world
    pub id: EntityId,
    /// What drives this cell (fixed at creation)
    pub kind: EntityKind,
    /// Render color
    pub color: Color,
    /// Position in the dish
    pub position: Vec2,
    /// Heading in radians, kept in `[-PI, PI)`
    pub orientation: f32,
    /// Growth metric; collision extent is `size * SIZE_TO_EXTENT`
    pub size: f32,
    /// Signed scalar speed along the heading (player cells)
    pub speed: f32,
    /// Last applied throttle in `[-1, 1]`
    pub throttle: f32,
    /// Last applied steer in `[-1, 1]`
    pub steer: f32,
    /// Tick of the last applied input (player) or simulation step (AI)
    pub last_tick: u32,
}

impl Entity {
    /// Creates an AI cell.
    #[must_use]
    pub fn ai(id: EntityId, position: Vec2, size: f32, color: Color) -> Self {
        Self {
            id,
            kind: EntityKind::Ai,
            color,
            position,
            orientation: 0.0,
            size,
            speed: 0.0,
            throttle: 0.0,
            steer: 0.0,
            last_tick: 0,
        }
    }

    /// Creates a player cell at spawn size.
    #[must_use]
    pub fn player(id: EntityId, position: Vec2, color: Color) -> Self {
        Self {
            id,
            kind: EntityKind::Player,
            color,
            position,
            orientation: 0.0,
            size: PLAYER_SPAWN_SIZE,
            speed: 0.0,
            throttle: 0.0,
            steer: 0.0,
            last_tick: 0,
        }
    }

    /// Current pose.
    #[inline]
    #[must_use]
    pub const fn pose(&self) -> Pose {
        Pose {
            position: self.position,
            orientation: self.orientation,
        }
    }

    /// Overwrites position and orientation, leaving speed untouched.
    ///
    /// Used by reconciliation: snapshots do not carry speed, and the
    /// speed integrator converges on its own because both sides chase
    /// the same throttle target.
    #[inline]
    pub fn set_pose(&mut self, pose: Pose) {
        self.position = pose.position;
        self.orientation = pose.orientation;
    }

    /// World-space extent: a player square's full side, an AI circle's
    /// diameter.
    #[inline]
    #[must_use]
    pub fn extent(&self) -> f32 {
        self.size * SIZE_TO_EXTENT
    }

    /// The dimension absorption compares: radius-equivalent for AI,
    /// full side for players. Raw size units, so the comparison is
    /// independent of the extent mapping.
    #[inline]
    #[must_use]
    pub fn collision_span(&self) -> f32 {
        match self.kind {
            EntityKind::Ai => self.size * 0.5,
            EntityKind::Default | EntityKind::Player => self.size,
        }
    }

    /// Advances the player motion model by one step of `dt` seconds.
    ///
    /// The evaluation order is load-bearing: the braking test reads the
    /// pre-update speed, turning reads the post-update speed, and the
    /// position integral reads the post-update orientation. Reordering
    /// any of these desynchronizes prediction.
    pub fn apply_input(&mut self, throttle: f32, steer: f32, dt: f32) {
        self.throttle = throttle;
        self.steer = steer;

        let braking = sign(throttle) != 0.0 && sign(throttle) != sign(self.speed);
        let accel = if braking { BRAKE_RATE } else { ACCEL_RATE };
        let target = throttle.clamp(THROTTLE_MIN, THROTTLE_MAX) * TOP_SPEED;
        self.speed = move_toward(self.speed, target, accel * dt);

        self.orientation = wrap_angle(
            self.orientation
                + steer * dt * self.speed.clamp(-TURN_SPEED_LIMIT, TURN_SPEED_LIMIT) * TURN_RATE,
        );

        self.position.x += self.orientation.cos() * self.speed * dt;
        self.position.y += self.orientation.sin() * self.speed * dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const DT: f32 = 1.0 / 128.0;

    fn test_player() -> Entity {
        Entity::player(EntityId(7), Vec2::ZERO, Color::WHITE)
    }

    #[test]
    fn test_kind_wire_bytes_round_trip() {
        for kind in [EntityKind::Default, EntityKind::Ai, EntityKind::Player] {
            assert_eq!(EntityKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(EntityKind::from_u8(3), None);
        assert_eq!(EntityKind::from_u8(255), None);
    }

    #[test]
    fn test_motion_is_deterministic() {
        let mut a = test_player();
        let mut b = test_player();

        for i in 0..500 {
            let throttle = if i % 3 == 0 { 1.0 } else { 0.4 };
            let steer = if i % 7 == 0 { -0.8 } else { 0.2 };
            a.apply_input(throttle, steer, DT);
            b.apply_input(throttle, steer, DT);
        }

        assert_eq!(a.position.x.to_bits(), b.position.x.to_bits());
        assert_eq!(a.position.y.to_bits(), b.position.y.to_bits());
        assert_eq!(a.orientation.to_bits(), b.orientation.to_bits());
        assert_eq!(a.speed.to_bits(), b.speed.to_bits());
    }

    #[test]
    fn test_braking_decelerates_faster_than_coasting() {
        let mut braking = test_player();
        braking.speed = 5.0;
        braking.apply_input(-1.0, 0.0, DT);

        let mut coasting = test_player();
        coasting.speed = 5.0;
        coasting.apply_input(0.0, 0.0, DT);

        // Opposing throttle sheds more speed than zero throttle.
        assert!(braking.speed < coasting.speed);
        assert!((5.0 - braking.speed - BRAKE_RATE * DT).abs() < 1e-6);
        assert!((5.0 - coasting.speed - ACCEL_RATE * DT).abs() < 1e-6);
    }

    #[test]
    fn test_reverse_throttle_is_limited() {
        let mut cell = test_player();
        for _ in 0..2000 {
            cell.apply_input(-1.0, 0.0, DT);
        }
        // Reverse converges to 30% of top speed, not -TOP_SPEED.
        assert!((cell.speed - THROTTLE_MIN * TOP_SPEED).abs() < 1e-4);
    }

    #[test]
    fn test_orientation_stays_wrapped() {
        let mut cell = test_player();
        for _ in 0..20_000 {
            cell.apply_input(1.0, 1.0, DT);
        }
        assert!(cell.orientation >= -PI && cell.orientation < PI);
    }

    #[test]
    fn test_idle_cell_does_not_move() {
        let mut cell = test_player();
        cell.apply_input(0.0, 0.0, DT);
        assert_eq!(cell.position, Vec2::ZERO);
        assert_eq!(cell.speed, 0.0);
    }

    #[test]
    fn test_pose_lerp_turns_through_the_seam() {
        // 3.0 rad to -3.0 rad is 0.28 rad across the seam, not 6.0
        // back through zero.
        let a = Pose::new(Vec2::ZERO, 3.0);
        let b = Pose::new(Vec2::ZERO, -3.0);

        let mid = a.lerp(b, 0.5);
        assert!(wrap_angle(mid.orientation - a.orientation).abs() < 0.15);

        let end = a.lerp(b, 1.0);
        assert!((end.orientation - b.orientation).abs() < 1e-5);
    }

    #[test]
    fn test_pose_lerp_result_stays_wrapped() {
        let a = Pose::new(Vec2::ZERO, 3.1);
        let b = Pose::new(Vec2::ZERO, -3.1);
        for step in 0_u8..=10 {
            let t = f32::from(step) / 10.0;
            let blended = a.lerp(b, t).orientation;
            assert!(blended >= -PI && blended < PI, "unwrapped at t={t}: {blended}");
        }
    }

    #[test]
    fn test_collision_span_by_kind() {
        let ai = Entity::ai(EntityId(1), Vec2::ZERO, 8.0, Color::WHITE);
        let player = test_player();
        assert_eq!(ai.collision_span(), 4.0);
        assert_eq!(player.collision_span(), PLAYER_SPAWN_SIZE);
    }
}
