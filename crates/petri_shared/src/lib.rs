//! # PETRI Shared
//!
//! Common types used by both client and server.
//!
//! ## CRITICAL RULE
//!
//! Everything in this crate runs on both sides of the wire. The player
//! motion model in particular must produce bit-identical results on the
//! server and on every predicting client, so:
//!
//! - No platform-dependent math (`f32` ops only, fixed evaluation order)
//! - No randomness
//! - No ambient state
//!
//! If you need wire encodings or sockets, put them in `petri_networking`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod entity;
pub mod math;

pub use constants::{
    CLIENT_TICK_RATE, CLIENT_TICK_SECONDS, DISH_MAX, DISH_MIN, MAX_CLIENTS, MAX_PACKET_SIZE,
    SERVER_BIND, SERVER_PORT, SIZE_MAX, SIZE_MIN, TICK_RATE,
};
pub use entity::{Color, Entity, EntityId, EntityKind, Pose};
pub use math::{lerp, move_toward, sign, wrap_angle, Vec2};
