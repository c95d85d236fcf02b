//! # PETRI Networking
//!
//! Real-time entity replication for the dish: an authoritative server,
//! predicted clients, and a loss-tolerant snapshot protocol over UDP.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────┐        ┌────────────────────────────┐
//! │          SERVER            │        │          CLIENT            │
//! │                            │        │                            │
//! │  World ──┐                 │  snap  │        ┌── Prediction      │
//! │  (AI,    │   Message       │ ─────► │ Message│   (own cell:      │
//! │  physics,├──►Layer         │        │ Layer ─┤    replay inputs) │
//! │  absorb) │   (tag+payload) │ ◄───── │        └── Interpolation   │
//! │          │                 │ inputs │            (remote cells)  │
//! │  per-peer input queues     │        │                            │
//! └────────────────────────────┘        └────────────────────────────┘
//!          ▲                                       ▲
//!          └──────────── transport ────────────────┘
//!            channel 0: reliable-ordered (joins, spawns)
//!            channel 1: unreliable      (inputs, acks, snapshots)
//! ```
//!
//! ## Design
//!
//! - The server is the only truth. Clients send intent (throttle/steer),
//!   never state.
//! - Snapshots are lossy by construction: positions ride in 21 bits,
//!   orientation in 8. Prediction compares at wire precision, so the
//!   quantizer never manufactures corrections on a clean link.
//! - Everything the wire carries is encoded field by field through
//!   [`protocol`]; no struct is ever punned to bytes.
//!
//! ## Performance
//!
//! - Fixed buffers in the packet path, no allocation per message
//! - Single-threaded tick loops; queues only at the transport boundary

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod client;
pub mod interpolation;
pub mod prediction;
pub mod protocol;
pub mod server;
pub mod simulation;
pub mod transport;

pub use client::{ClientState, PetriClient};
pub use interpolation::EntityInterpolator;
pub use prediction::{Predictor, ReconcileOutcome};
pub use protocol::{Channel, Message, MessageTag, WireError, WireReader, WireWriter};
pub use server::{PetriServer, ServerConfig};
pub use transport::{NetError, OutgoingPacket, TransportEvent, UdpEndpoint};

pub use petri_shared::constants::MAX_PACKET_SIZE;
