use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Participants only meet others speaking the same protocol version.
pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_MAX_PARTICIPANTS: u8 = 4;

pub const HEALTH_FLOOR: f32 = 0.0;
pub const HEALTH_CEILING: f32 = 1.0;
pub const BEAM_HIT_DAMAGE: f32 = 0.1;

pub const SAFE_SPAWN_POINT: Position = Position {
    x: 0.0,
    y: 5.0,
    z: 0.0,
};
pub const GROUND_PROBE_DISTANCE: f32 = 5.0;
pub const ARENA_HALF_EXTENT_PER_PARTICIPANT: f32 = 10.0;

/// Size of the entity id block reserved for each participant.
pub const ENTITY_IDS_PER_PARTICIPANT: u32 = 1000;

/// Longest display name in bytes. A full room snapshot has to fit one datagram.
pub const MAX_NICKNAME_LEN: usize = 32;

pub const LEVEL_LABEL_PREFIX: &str = "Room for ";
pub const LAUNCHER_LEVEL: &str = "Launcher";

/// Failure codes reported by the matchmaker.
pub mod codes {
    pub const OPERATION_NOT_ALLOWED: i16 = -3;
    pub const GAME_DOES_NOT_EXIST: i16 = 32758;
    pub const NO_RANDOM_MATCH_FOUND: i16 = 32760;
    pub const GAME_FULL: i16 = 32765;
    pub const GAME_ID_ALREADY_EXISTS: i16 = 32766;
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(pub u32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl EntityId {
    /// Builds the `sequence`-th id inside the block owned by `participant`.
    pub fn allocate(participant: ParticipantId, sequence: u32) -> Self {
        EntityId(participant.0 * ENTITY_IDS_PER_PARTICIPANT + sequence)
    }

    /// The participant whose id block contains this entity.
    pub fn creator(&self) -> ParticipantId {
        ParticipantId(self.0 / ENTITY_IDS_PER_PARTICIPANT)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity-{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Rotation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Rotation {
    pub const IDENTITY: Rotation = Rotation {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

/// Prefab spawned for an entity.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Player,
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "player" => Ok(EntityKind::Player),
            other => Err(format!("unknown prefab '{}'", other)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub nickname: String,
    /// Monotonic stamp taken when the participant entered its room.
    pub join_order: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub entity: EntityId,
    pub owner: ParticipantId,
    pub kind: EntityKind,
    pub position: Position,
    pub rotation: Rotation,
    /// Last replication tuple the owner sent, if any.
    pub state: Option<Vec<u8>>,
}

/// Everything a participant needs when it enters a room.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub name: String,
    pub max_participants: u8,
    pub members: Vec<ParticipantInfo>,
    pub level: Option<String>,
    pub entities: Vec<EntitySnapshot>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
        nickname: String,
    },
    SetNickname {
        nickname: String,
    },
    JoinRandomRoom,
    CreateRoom {
        name: Option<String>,
        max_participants: u8,
    },
    LeaveRoom,
    LoadLevel {
        label: String,
    },
    Instantiate {
        entity: EntityId,
        kind: EntityKind,
        position: Position,
        rotation: Rotation,
    },
    TransferOwnership {
        entity: EntityId,
        new_owner: ParticipantId,
    },
    Heartbeat,
    Disconnect,

    Connected {
        participant_id: ParticipantId,
    },
    JoinRandomFailed {
        code: i16,
        message: String,
    },
    CreateRoomFailed {
        code: i16,
        message: String,
    },
    JoinedRoom {
        room: RoomSnapshot,
    },
    ParticipantEntered {
        participant: ParticipantInfo,
    },
    ParticipantLeft {
        participant: ParticipantInfo,
    },
    LeftRoom,
    LevelLoaded {
        label: String,
    },
    EntitySpawned {
        entity: EntityId,
        owner: ParticipantId,
        kind: EntityKind,
        position: Position,
        rotation: Rotation,
    },
    EntityRemoved {
        entity: EntityId,
    },
    OwnershipChanged {
        entity: EntityId,
        owner: ParticipantId,
    },
    Disconnected {
        reason: String,
    },

    EntityState {
        entity: EntityId,
        payload: Vec<u8>,
    },
}

/// The master is the member that joined earliest and is still present.
pub fn master_of(members: &[ParticipantInfo]) -> Option<ParticipantId> {
    members
        .iter()
        .min_by_key(|member| member.join_order)
        .map(|member| member.id)
}

pub fn level_label_for(participant_count: usize) -> String {
    format!("{}{}", LEVEL_LABEL_PREFIX, participant_count)
}

/// Cuts a display name to [`MAX_NICKNAME_LEN`] bytes on a char boundary.
pub fn clamp_nickname(name: &str) -> &str {
    if name.len() <= MAX_NICKNAME_LEN {
        return name;
    }
    let mut end = MAX_NICKNAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Recovers the participant count a level label was derived from.
pub fn participant_count_of(label: &str) -> Option<usize> {
    label
        .strip_prefix(LEVEL_LABEL_PREFIX)
        .and_then(|count| count.trim().parse().ok())
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("state tuple has {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("state tuple is malformed: {0}")]
    Malformed(String),
    #[error("state tuple carries non-finite health {0}")]
    NonFiniteHealth(f32),
}

/// Replicated fields of an entity.
///
/// The wire order is part of the protocol: the flag first, then health.
/// Participants on different builds must agree on it, so it is never
/// reordered and carries no version tag.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct EntityState {
    pub active_effect: bool,
    pub health: f32,
}

impl EntityState {
    /// Encoded size: one flag byte plus a little-endian f32.
    pub const ENCODED_LEN: usize = 5;

    pub fn new() -> Self {
        Self {
            active_effect: false,
            health: HEALTH_CEILING,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.health <= HEALTH_FLOOR
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(&(self.active_effect, self.health))
            .map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(ProtocolError::LengthMismatch {
                expected: Self::ENCODED_LEN,
                actual: bytes.len(),
            });
        }

        let (active_effect, health): (bool, f32) =
            bincode::deserialize(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        if !health.is_finite() {
            return Err(ProtocolError::NonFiniteHealth(health));
        }

        Ok(Self {
            active_effect,
            health,
        })
    }
}

impl Default for EntityState {
    fn default() -> Self {
        Self::new()
    }
}
