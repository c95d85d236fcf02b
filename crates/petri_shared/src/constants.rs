//! # Simulation & Network Constants
//!
//! Canonical configuration shared by the PETRI server and every client.
//!
//! **CRITICAL:** These values are baked into both binaries. The motion
//! model constants and the dish bounds take part in prediction, so a
//! mismatch between peers desynchronizes the whole session. Changes
//! require rebuilding client and server together.

use crate::math::Vec2;

// =============================================================================
// NETWORK CONFIGURATION
// =============================================================================

/// Server port for game traffic
pub const SERVER_PORT: u16 = 7777;

/// Server bind address (accepts datagrams from all interfaces)
pub const SERVER_BIND: &str = "0.0.0.0:7777";

/// Authoritative simulation and broadcast rate (ticks per second)
pub const TICK_RATE: u32 = 60;

/// Client prediction rate (ticks per second).
///
/// Deliberately faster than the server broadcast rate: the client
/// simulates and sends one input per prediction tick, and the server
/// steps player entities once per received input at this rate.
pub const CLIENT_TICK_RATE: u32 = 128;

/// Duration of one client prediction tick in seconds
#[allow(clippy::cast_precision_loss)]
pub const CLIENT_TICK_SECONDS: f32 = 1.0 / CLIENT_TICK_RATE as f32;

/// Maximum clients per server
pub const MAX_CLIENTS: usize = 32;

/// Maximum packet size (MTU-safe)
pub const MAX_PACKET_SIZE: usize = 1200;

/// Interpolation delay applied to remote-entity snapshots, milliseconds.
///
/// Remote poses are rendered this far in the past so that the playback
/// cursor almost always has two buffered samples to blend between.
pub const INTERPOLATION_DELAY_MS: u64 = 100;

// =============================================================================
// THE DISH
// =============================================================================

/// Lower-left corner of the world rectangle
pub const DISH_MIN: Vec2 = Vec2::new(-16.0, -8.0);

/// Upper-right corner of the world rectangle
pub const DISH_MAX: Vec2 = Vec2::new(16.0, 8.0);

/// Smallest cell size; absorption losers never shrink below this
pub const SIZE_MIN: f32 = 4.0;

/// Largest cell size; absorption winners never grow beyond this
pub const SIZE_MAX: f32 = 40.0;

/// Maps a raw cell size onto its world-space extent.
///
/// A player cell is a square with side `size * SIZE_TO_EXTENT`; an AI
/// cell is a circle with diameter `size * SIZE_TO_EXTENT`.
pub const SIZE_TO_EXTENT: f32 = 0.1;

/// Number of AI cells seeded into the dish at server startup
pub const AI_COUNT: usize = 10;

/// Constant wander speed of AI cells, units per second
pub const AI_WANDER_SPEED: f32 = 10.0;

/// An AI cell closer than this to its wander target picks a new one
pub const AI_ARRIVE_DISTANCE: f32 = 1.0;

/// Size assigned to every freshly joined player cell
pub const PLAYER_SPAWN_SIZE: f32 = 10.0;
