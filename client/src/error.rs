//! Error types for the session core

use shared::{EntityId, ParticipantId};
use thiserror::Error;

pub use shared::ProtocolError;

/// Setup preconditions. The session cannot operate without them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing player prefab reference")]
    MissingPrefab,
    #[error("room capacity must be at least 1")]
    ZeroCapacity,
    #[error("tick rate must be at least 1")]
    ZeroTickRate,
}

/// Rejected user input. Nothing is mutated when these are returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("player name is empty")]
    EmptyName,
    #[error("player name is {len} bytes, at most {max} allowed")]
    NameTooLong { len: usize, max: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("trying to load level '{label}' but we are not the master")]
    NotMaster { label: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OwnershipError {
    #[error("{entity} is owned by {owner}, not {requester}")]
    NotOwner {
        entity: EntityId,
        owner: ParticipantId,
        requester: ParticipantId,
    },
    #[error("{0} is not known locally")]
    UnknownEntity(EntityId),
    #[error("{0} is owned locally, remote state refused")]
    OwnedLocally(EntityId),
    #[error("cannot hand {entity} to {target}, not in the room")]
    NotMember {
        entity: EntityId,
        target: ParticipantId,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpawnError {
    #[error("local primary entity {0} already exists")]
    AlreadySpawned(EntityId),
    #[error("not in a room")]
    NotInRoom,
}

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("preferences file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("preferences file is corrupt: {0}")]
    Corrupt(#[from] bincode::Error),
}
