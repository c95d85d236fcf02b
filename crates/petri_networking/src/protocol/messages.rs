//! The closed message catalog.
//!
//! Every datagram payload starts with a [`MessageTag`] byte; the rest is
//! a fixed layout per tag, written field by field through the codec.
//! Decoding validates the tag first and refuses anything outside the
//! catalog; there is no length prefix, so dispatching on a wrong tag
//! would read garbage.

use std::f32::consts::PI;

use petri_shared::constants::{DISH_MAX, DISH_MIN};
use petri_shared::entity::{Color, Entity, EntityId, EntityKind, Pose};
use petri_shared::math::Vec2;

use super::codec::{WireError, WireReader, WireWriter};
use super::quantize::{pack_float, unpack_float, Packed2};

/// Position rides in 21 bits: 11 for x across 32 units, 10 for y across
/// 16, giving both axes the same step of ~0.016 units.
type DishPosition = Packed2<11, 10>;

/// Orientation bit budget over `[-PI, PI]`.
const ORIENTATION_BITS: u32 = 8;

/// Bit budget per input axis over `[-1, 1]`.
const AXIS_BITS: u32 = 4;

/// The code a zero axis packs to. Decoded specially so an idle stick
/// reads back as exactly `0.0`, not as the nearest code step.
pub const AXIS_NEUTRAL_CODE: u8 = 7;

/// Input header bit: a quantized axis byte follows.
const INPUT_FLAG_QUANTIZED: u8 = 0x80;

/// Leading byte of every message.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageTag {
    /// Client asks to enter the dish. Tag only.
    Join = 0,
    /// Full-precision spawn state of one entity.
    NewEntity = 1,
    /// Tells a client which entity id it owns.
    SetControlledEntity = 2,
    /// One tick of client intent (throttle/steer).
    Input = 3,
    /// The server has seen inputs through this id.
    InputAck = 4,
    /// Authoritative quantized pose sample.
    Snapshot = 5,
}

impl MessageTag {
    /// Parses a tag byte; `None` for anything outside the catalog.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Join),
            1 => Some(Self::NewEntity),
            2 => Some(Self::SetControlledEntity),
            3 => Some(Self::Input),
            4 => Some(Self::InputAck),
            5 => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// The delivery mode this message kind rides on.
    #[must_use]
    pub const fn channel(self) -> Channel {
        match self {
            Self::Join | Self::NewEntity | Self::SetControlledEntity => Channel::Reliable,
            Self::Input | Self::InputAck | Self::Snapshot => Channel::Unreliable,
        }
    }
}

/// Transport delivery modes.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Ordered and retransmitted. Joins and spawns: state the receiver
    /// cannot reconstruct if a datagram dies.
    Reliable = 0,
    /// Best-effort. The per-tick stream: the next tick supersedes
    /// whatever was lost.
    Unreliable = 1,
}

/// Quantizes one input axis from `[-1, 1]` into a 4-bit code.
#[must_use]
pub fn pack_axis(value: f32) -> u8 {
    pack_float(value, -1.0, 1.0, AXIS_BITS) as u8
}

/// Inverse of [`pack_axis`]; the neutral code decodes to exactly zero.
#[must_use]
pub fn unpack_axis(code: u8) -> f32 {
    if code == AXIS_NEUTRAL_CODE {
        0.0
    } else {
        unpack_float(u32::from(code), -1.0, 1.0, AXIS_BITS)
    }
}

/// Quantizes an axis and settles on a code that survives an encode
/// round trip unchanged, returning the code and its decoded value.
///
/// Truncation can nudge `pack_axis(unpack_axis(code))` one step down.
/// A predicting client must apply the exact value the server will
/// decode, so it snaps its stick reading to the fixed point before
/// either using or sending it.
#[must_use]
pub fn stable_axis(value: f32) -> (u8, f32) {
    let mut code = pack_axis(value);
    loop {
        let decoded = unpack_axis(code);
        let recoded = pack_axis(decoded);
        if recoded == code {
            return (code, decoded);
        }
        code = recoded;
    }
}

/// Rounds a pose to exactly what the snapshot encoding preserves.
///
/// Prediction compares its local pose against incoming snapshots at
/// this precision: a client that is genuinely in sync then sees
/// bit-equal poses and never resimulates.
#[must_use]
pub fn quantize_pose(pose: Pose) -> Pose {
    let position_code = DishPosition::pack(pose.position, DISH_MIN, DISH_MAX);
    let orientation_code = pack_float(pose.orientation, -PI, PI, ORIENTATION_BITS);
    Pose::new(
        DishPosition::unpack(position_code, DISH_MIN, DISH_MAX),
        unpack_float(orientation_code, -PI, PI, ORIENTATION_BITS),
    )
}

/// Full-precision spawn state, as `NewEntity` carries it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntitySpawn {
    /// Entity id
    pub id: EntityId,
    /// What drives the entity
    pub kind: EntityKind,
    /// Render color
    pub color: Color,
    /// Spawn position
    pub position: Vec2,
    /// Spawn heading
    pub orientation: f32,
    /// Spawn size
    pub size: f32,
    /// Spawn speed
    pub speed: f32,
}

impl EntitySpawn {
    /// Captures an entity's spawn state.
    #[must_use]
    pub fn of(entity: &Entity) -> Self {
        Self {
            id: entity.id,
            kind: entity.kind,
            color: entity.color,
            position: entity.position,
            orientation: entity.orientation,
            size: entity.size,
            speed: entity.speed,
        }
    }

    /// Materializes the entity a client mirrors from this spawn.
    #[must_use]
    pub fn into_entity(self) -> Entity {
        Entity {
            id: self.id,
            kind: self.kind,
            color: self.color,
            position: self.position,
            orientation: self.orientation,
            size: self.size,
            speed: self.speed,
            throttle: 0.0,
            steer: 0.0,
            last_tick: 0,
        }
    }
}

/// One tick of client intent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputMessage {
    /// The entity this input drives
    pub entity_id: EntityId,
    /// Client tick that produced this input; strictly increasing
    pub input_id: u32,
    /// Highest `InputAck` id the client has seen
    pub reference_id: u32,
    /// Wire-precision `(throttle, steer)`, or `None` to repeat the
    /// previous input's controls (idle-repeat)
    pub controls: Option<(f32, f32)>,
}

/// Authoritative pose sample for one entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SnapshotMessage {
    /// The sampled entity
    pub entity_id: EntityId,
    /// Last consumed input id (player) or server tick (AI)
    pub tick: u32,
    /// The pose; wire-precision after decode, full precision before
    /// encode
    pub pose: Pose,
}

impl SnapshotMessage {
    /// Samples an entity at its last simulated tick.
    #[must_use]
    pub fn capture(entity: &Entity) -> Self {
        Self {
            entity_id: entity.id,
            tick: entity.last_tick,
            pose: entity.pose(),
        }
    }
}

/// A decoded protocol message.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Message {
    /// Client asks to enter the dish.
    Join,
    /// Spawn state of a new or replayed entity.
    NewEntity(EntitySpawn),
    /// Which entity the receiving client controls.
    SetControlledEntity(EntityId),
    /// One tick of client intent.
    Input(InputMessage),
    /// Inputs seen through this id.
    InputAck(u32),
    /// Authoritative pose sample.
    Snapshot(SnapshotMessage),
}

impl Message {
    /// This message's wire tag.
    #[must_use]
    pub const fn tag(&self) -> MessageTag {
        match self {
            Self::Join => MessageTag::Join,
            Self::NewEntity(_) => MessageTag::NewEntity,
            Self::SetControlledEntity(_) => MessageTag::SetControlledEntity,
            Self::Input(_) => MessageTag::Input,
            Self::InputAck(_) => MessageTag::InputAck,
            Self::Snapshot(_) => MessageTag::Snapshot,
        }
    }

    /// The delivery mode this message rides on.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.tag().channel()
    }

    /// Encodes into `buffer`, returning the number of bytes written.
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, WireError> {
        let mut writer = WireWriter::new(buffer);
        writer.write_u8(self.tag() as u8)?;

        match self {
            Self::Join => {}
            Self::NewEntity(spawn) => {
                writer.write_u16(spawn.id.0)?;
                writer.write_u8(spawn.kind.as_u8())?;
                writer.write_u8(spawn.color.r)?;
                writer.write_u8(spawn.color.g)?;
                writer.write_u8(spawn.color.b)?;
                writer.write_u8(spawn.color.a)?;
                writer.write_f32(spawn.position.x)?;
                writer.write_f32(spawn.position.y)?;
                writer.write_f32(spawn.orientation)?;
                writer.write_f32(spawn.size)?;
                writer.write_f32(spawn.speed)?;
            }
            Self::SetControlledEntity(id) => {
                writer.write_u16(id.0)?;
            }
            Self::Input(input) => {
                writer.write_u16(input.entity_id.0)?;
                writer.write_packed_u32(input.input_id)?;
                writer.write_packed_u32(input.reference_id)?;
                match input.controls {
                    Some((throttle, steer)) => {
                        writer.write_u8(INPUT_FLAG_QUANTIZED)?;
                        writer.write_u8(pack_axis(throttle) << 4 | pack_axis(steer))?;
                    }
                    None => writer.write_u8(0)?,
                }
            }
            Self::InputAck(id) => {
                writer.write_packed_u32(*id)?;
            }
            Self::Snapshot(snapshot) => {
                writer.write_u16(snapshot.entity_id.0)?;
                writer.write_packed_u32(snapshot.tick)?;
                writer.write_u32(DishPosition::pack(
                    snapshot.pose.position,
                    DISH_MIN,
                    DISH_MAX,
                ))?;
                writer.write_u8(pack_float(
                    snapshot.pose.orientation,
                    -PI,
                    PI,
                    ORIENTATION_BITS,
                ) as u8)?;
            }
        }

        Ok(writer.position())
    }

    /// Decodes one message from `buffer`.
    pub fn decode(buffer: &[u8]) -> Result<Self, WireError> {
        let mut reader = WireReader::new(buffer);
        let tag_byte = reader.read_u8()?;
        let Some(tag) = MessageTag::from_u8(tag_byte) else {
            return Err(WireError::UnknownTag { tag: tag_byte });
        };

        match tag {
            MessageTag::Join => Ok(Self::Join),
            MessageTag::NewEntity => {
                let id = EntityId(reader.read_u16()?);
                let kind_byte = reader.read_u8()?;
                let Some(kind) = EntityKind::from_u8(kind_byte) else {
                    return Err(WireError::BadKind { kind: kind_byte });
                };
                let color = Color::new(
                    reader.read_u8()?,
                    reader.read_u8()?,
                    reader.read_u8()?,
                    reader.read_u8()?,
                );
                let position = Vec2::new(reader.read_f32()?, reader.read_f32()?);
                let orientation = reader.read_f32()?;
                let size = reader.read_f32()?;
                let speed = reader.read_f32()?;
                Ok(Self::NewEntity(EntitySpawn {
                    id,
                    kind,
                    color,
                    position,
                    orientation,
                    size,
                    speed,
                }))
            }
            MessageTag::SetControlledEntity => {
                Ok(Self::SetControlledEntity(EntityId(reader.read_u16()?)))
            }
            MessageTag::Input => {
                let entity_id = EntityId(reader.read_u16()?);
                let input_id = reader.read_packed_u32()?;
                let reference_id = reader.read_packed_u32()?;
                let header = reader.read_u8()?;
                let controls = if header & INPUT_FLAG_QUANTIZED == 0 {
                    None
                } else {
                    let axes = reader.read_u8()?;
                    Some((unpack_axis(axes >> 4), unpack_axis(axes & 0x0F)))
                };
                Ok(Self::Input(InputMessage {
                    entity_id,
                    input_id,
                    reference_id,
                    controls,
                }))
            }
            MessageTag::InputAck => Ok(Self::InputAck(reader.read_packed_u32()?)),
            MessageTag::Snapshot => {
                let entity_id = EntityId(reader.read_u16()?);
                let tick = reader.read_packed_u32()?;
                let position = DishPosition::unpack(reader.read_u32()?, DISH_MIN, DISH_MAX);
                let orientation = unpack_float(
                    u32::from(reader.read_u8()?),
                    -PI,
                    PI,
                    ORIENTATION_BITS,
                );
                Ok(Self::Snapshot(SnapshotMessage {
                    entity_id,
                    tick,
                    pose: Pose::new(position, orientation),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petri_shared::constants::MAX_PACKET_SIZE;

    fn round_trip(message: Message) -> Message {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let len = message.encode(&mut buf).unwrap();
        Message::decode(&buf[..len]).unwrap()
    }

    #[test]
    fn test_tag_bytes_round_trip() {
        for tag in [
            MessageTag::Join,
            MessageTag::NewEntity,
            MessageTag::SetControlledEntity,
            MessageTag::Input,
            MessageTag::InputAck,
            MessageTag::Snapshot,
        ] {
            assert_eq!(MessageTag::from_u8(tag as u8), Some(tag));
        }
        assert_eq!(MessageTag::from_u8(6), None);
    }

    #[test]
    fn test_unknown_tag_is_refused() {
        assert_eq!(
            Message::decode(&[0xAB, 0, 0, 0]),
            Err(WireError::UnknownTag { tag: 0xAB })
        );
        assert_eq!(Message::decode(&[]), Err(WireError::UnexpectedEnd));
    }

    #[test]
    fn test_join_is_tag_only() {
        let mut buf = [0u8; 8];
        assert_eq!(Message::Join.encode(&mut buf).unwrap(), 1);
        assert_eq!(round_trip(Message::Join), Message::Join);
    }

    #[test]
    fn test_new_entity_round_trip() {
        let spawn = EntitySpawn {
            id: EntityId(42),
            kind: EntityKind::Player,
            color: Color::new(10, 200, 255, 255),
            position: Vec2::new(-3.5, 6.25),
            orientation: 1.5,
            size: 10.0,
            speed: 0.0,
        };
        assert_eq!(round_trip(Message::NewEntity(spawn)), Message::NewEntity(spawn));
    }

    #[test]
    fn test_bad_entity_kind_is_refused() {
        let spawn = EntitySpawn {
            id: EntityId(1),
            kind: EntityKind::Ai,
            color: Color::WHITE,
            position: Vec2::ZERO,
            orientation: 0.0,
            size: 4.0,
            speed: 0.0,
        };
        let mut buf = [0u8; 64];
        let len = Message::NewEntity(spawn).encode(&mut buf).unwrap();
        buf[3] = 9; // corrupt the kind byte
        assert_eq!(
            Message::decode(&buf[..len]),
            Err(WireError::BadKind { kind: 9 })
        );
    }

    #[test]
    fn test_input_round_trips_at_id_width_boundaries() {
        for id in [0u32, 127, 128, 16_383, 16_384, 1_073_741_823] {
            let input = InputMessage {
                entity_id: EntityId(3),
                input_id: id,
                reference_id: id / 2,
                controls: None,
            };
            assert_eq!(round_trip(Message::Input(input)), Message::Input(input));
        }
    }

    #[test]
    fn test_input_controls_survive_the_nibbles() {
        let sent = Message::Input(InputMessage {
            entity_id: EntityId(3),
            input_id: 900,
            reference_id: 870,
            controls: Some((unpack_axis(pack_axis(-1.0)), unpack_axis(pack_axis(0.6)))),
        });
        // Controls already at wire precision round-trip exactly.
        assert_eq!(round_trip(sent), sent);
    }

    #[test]
    fn test_stable_axis_values_reencode_to_their_own_code() {
        let mut raw = -1.0f32;
        while raw <= 1.0 {
            let (code, value) = stable_axis(raw);
            assert_eq!(pack_axis(value), code, "raw={raw}");
            // Truncation plus the fixed-point settle is under two steps.
            assert!((value - raw).abs() < 4.0 / 15.0, "raw={raw}");
            raw += 0.01;
        }
        // Neutral sticks decode to exactly zero.
        assert_eq!(stable_axis(0.0), (AXIS_NEUTRAL_CODE, 0.0));
    }

    #[test]
    fn test_negative_axes_do_not_sign_extend() {
        let decoded = round_trip(Message::Input(InputMessage {
            entity_id: EntityId(1),
            input_id: 1,
            reference_id: 0,
            controls: Some((-1.0, -1.0)),
        }));
        let Message::Input(input) = decoded else {
            panic!("wrong message kind");
        };
        let (throttle, steer) = input.controls.unwrap();
        assert_eq!(throttle, -1.0);
        assert_eq!(steer, -1.0);
    }

    #[test]
    fn test_idle_repeat_is_one_byte_shorter() {
        let mut buf = [0u8; 64];
        let idle = Message::Input(InputMessage {
            entity_id: EntityId(2),
            input_id: 10,
            reference_id: 9,
            controls: None,
        });
        let full = Message::Input(InputMessage {
            entity_id: EntityId(2),
            input_id: 10,
            reference_id: 9,
            controls: Some((1.0, 0.0)),
        });
        let idle_len = idle.encode(&mut buf).unwrap();
        let full_len = full.encode(&mut buf).unwrap();
        assert_eq!(full_len, idle_len + 1);
        assert_eq!(round_trip(idle), idle);
    }

    #[test]
    fn test_neutral_axis_decodes_to_exact_zero() {
        assert_eq!(pack_axis(0.0), AXIS_NEUTRAL_CODE);
        assert_eq!(unpack_axis(AXIS_NEUTRAL_CODE), 0.0);
    }

    #[test]
    fn test_snapshot_pose_lands_within_quantizer_steps() {
        let sent = SnapshotMessage {
            entity_id: EntityId(9),
            tick: 5000,
            pose: Pose::new(Vec2::new(7.3, -2.9), 2.2),
        };
        let Message::Snapshot(received) = round_trip(Message::Snapshot(sent)) else {
            panic!("wrong message kind");
        };

        assert_eq!(received.entity_id, sent.entity_id);
        assert_eq!(received.tick, sent.tick);
        assert!((received.pose.position.x - 7.3).abs() < 32.0 / 2047.0);
        assert!((received.pose.position.y - (-2.9)).abs() < 16.0 / 1023.0);
        assert!((received.pose.orientation - 2.2).abs() < (2.0 * PI) / 255.0);
        // And the decoded pose is exactly the quantized original.
        assert_eq!(received.pose, quantize_pose(sent.pose));
    }

    #[test]
    fn test_truncated_payload_is_refused() {
        let snapshot = Message::Snapshot(SnapshotMessage {
            entity_id: EntityId(9),
            tick: 5000,
            pose: Pose::default(),
        });
        let mut buf = [0u8; 64];
        let len = snapshot.encode(&mut buf).unwrap();
        for cut in 1..len {
            assert_eq!(
                Message::decode(&buf[..cut]),
                Err(WireError::UnexpectedEnd),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn test_channel_assignment() {
        assert_eq!(MessageTag::Join.channel(), Channel::Reliable);
        assert_eq!(MessageTag::NewEntity.channel(), Channel::Reliable);
        assert_eq!(MessageTag::SetControlledEntity.channel(), Channel::Reliable);
        assert_eq!(MessageTag::Input.channel(), Channel::Unreliable);
        assert_eq!(MessageTag::InputAck.channel(), Channel::Unreliable);
        assert_eq!(MessageTag::Snapshot.channel(), Channel::Unreliable);
    }
}
