//! # Wire Protocol
//!
//! The byte-exact message catalog spoken between dish server and
//! clients.
//!
//! ## Message Structure
//!
//! ```text
//! ┌─────────┬──────────────────────────────────────────────┐
//! │ Tag (1B)│ Payload (fixed layout per tag)               │
//! └─────────┴──────────────────────────────────────────────┘
//!
//! Snapshot payload:
//! ┌────────────┬─────────────┬──────────────────┬──────────┐
//! │ entity u16 │ tick packed │ position u32     │ orient.  │
//! │            │ (1-4B)      │ (11b x | 10b y)  │ u8       │
//! └────────────┴─────────────┴──────────────────┴──────────┘
//! ```
//!
//! Multi-byte fields are big-endian on the wire. There is no length
//! prefix and no version field: encoder and decoder must agree on every
//! layout byte-for-byte, and an unknown leading tag is a decode error,
//! never a guess.
//!
//! ## Modules
//!
//! - `codec`: bounds-checked big-endian cursors + packed varints
//! - `quantize`: lossy bounded-float compression
//! - `messages`: the closed message catalog

mod codec;
mod messages;
mod quantize;

pub use codec::{WireError, WireReader, WireWriter};
pub use messages::{
    pack_axis, quantize_pose, stable_axis, unpack_axis, Channel, EntitySpawn, InputMessage,
    Message, MessageTag, SnapshotMessage, AXIS_NEUTRAL_CODE,
};
pub use quantize::{pack_float, unpack_float, Packed2, Packed3};
