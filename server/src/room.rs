//! Rooms, their members and the entities spawned in them

use log::{debug, info};
use shared::{
    codes, master_of, EntityId, EntityKind, EntitySnapshot, EntityState, ParticipantId,
    ParticipantInfo, Position, RoomSnapshot, Rotation,
};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("room '{0}' does not exist")]
    NotFound(String),
    #[error("room '{0}' already exists")]
    AlreadyExists(String),
    #[error("room '{0}' is full")]
    Full(String),
    #[error("{0} is not in this room")]
    NotMember(ParticipantId),
    #[error("{0} is not the master")]
    NotMaster(ParticipantId),
    #[error("{entity} does not belong to the id range of {sender}")]
    ForeignEntityId {
        entity: EntityId,
        sender: ParticipantId,
    },
    #[error("{0} already exists")]
    EntityExists(EntityId),
    #[error("{0} does not exist")]
    UnknownEntity(EntityId),
    #[error("{entity} is not owned by {requester}")]
    NotOwner {
        entity: EntityId,
        requester: ParticipantId,
    },
    #[error("malformed state for {0}")]
    MalformedState(EntityId),
}

impl RoomError {
    /// Failure code reported to the client.
    pub fn code(&self) -> i16 {
        match self {
            RoomError::NotFound(_) => codes::GAME_DOES_NOT_EXIST,
            RoomError::AlreadyExists(_) => codes::GAME_ID_ALREADY_EXISTS,
            RoomError::Full(_) => codes::GAME_FULL,
            _ => codes::OPERATION_NOT_ALLOWED,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomEntity {
    pub id: EntityId,
    pub owner: ParticipantId,
    pub kind: EntityKind,
    pub position: Position,
    pub rotation: Rotation,
    /// Last tuple the owner sent.
    pub last_state: Option<Vec<u8>>,
    dirty: bool,
}

#[derive(Debug)]
pub struct Room {
    name: String,
    max_participants: u8,
    /// Ordered by join order.
    members: Vec<ParticipantInfo>,
    level: Option<String>,
    entities: BTreeMap<EntityId, RoomEntity>,
}

impl Room {
    pub fn new(name: &str, max_participants: u8) -> Self {
        Self {
            name: name.to_string(),
            max_participants,
            members: Vec::new(),
            level: None,
            entities: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_participants(&self) -> u8 {
        self.max_participants
    }

    pub fn members(&self) -> &[ParticipantInfo] {
        &self.members
    }

    pub fn member_ids(&self) -> Vec<ParticipantId> {
        self.members.iter().map(|m| m.id).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_participants as usize
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    pub fn master(&self) -> Option<ParticipantId> {
        master_of(&self.members)
    }

    pub fn level(&self) -> Option<&str> {
        self.level.as_deref()
    }

    pub fn entity(&self, entity: EntityId) -> Option<&RoomEntity> {
        self.entities.get(&entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn add_member(&mut self, participant: ParticipantInfo) -> Result<(), RoomError> {
        if self.is_full() {
            return Err(RoomError::Full(self.name.clone()));
        }
        if self.contains(participant.id) {
            return Ok(());
        }

        self.members.push(participant);
        self.members.sort_by_key(|m| m.join_order);
        Ok(())
    }

    pub fn remove_member(&mut self, id: ParticipantId) -> Option<ParticipantInfo> {
        let index = self.members.iter().position(|m| m.id == id)?;
        Some(self.members.remove(index))
    }

    pub fn rename_member(&mut self, id: ParticipantId, nickname: &str) {
        if let Some(member) = self.members.iter_mut().find(|m| m.id == id) {
            member.nickname = nickname.to_string();
        }
    }

    /// Records the level the master switched the room to.
    pub fn set_level(&mut self, requester: ParticipantId, label: &str) -> Result<(), RoomError> {
        if self.master() != Some(requester) {
            return Err(RoomError::NotMaster(requester));
        }

        self.level = Some(label.to_string());
        Ok(())
    }

    pub fn spawn(
        &mut self,
        requester: ParticipantId,
        entity: EntityId,
        kind: EntityKind,
        position: Position,
        rotation: Rotation,
    ) -> Result<(), RoomError> {
        if !self.contains(requester) {
            return Err(RoomError::NotMember(requester));
        }
        if entity.creator() != requester {
            return Err(RoomError::ForeignEntityId {
                entity,
                sender: requester,
            });
        }
        if self.entities.contains_key(&entity) {
            return Err(RoomError::EntityExists(entity));
        }

        self.entities.insert(
            entity,
            RoomEntity {
                id: entity,
                owner: requester,
                kind,
                position,
                rotation,
                last_state: None,
                dirty: false,
            },
        );
        Ok(())
    }

    /// Stores the owner's latest tuple for relay on the next flush.
    pub fn update_state(
        &mut self,
        requester: ParticipantId,
        entity: EntityId,
        payload: Vec<u8>,
    ) -> Result<(), RoomError> {
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(RoomError::UnknownEntity(entity))?;
        if record.owner != requester {
            return Err(RoomError::NotOwner { entity, requester });
        }
        if EntityState::decode(&payload).is_err() {
            return Err(RoomError::MalformedState(entity));
        }

        record.last_state = Some(payload);
        record.dirty = true;
        Ok(())
    }

    pub fn transfer(
        &mut self,
        requester: ParticipantId,
        entity: EntityId,
        new_owner: ParticipantId,
    ) -> Result<(), RoomError> {
        if !self.contains(new_owner) {
            return Err(RoomError::NotMember(new_owner));
        }
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(RoomError::UnknownEntity(entity))?;
        if record.owner != requester {
            return Err(RoomError::NotOwner { entity, requester });
        }

        record.owner = new_owner;
        Ok(())
    }

    /// Drops every entity owned by `owner` and returns their ids.
    pub fn remove_entities_of(&mut self, owner: ParticipantId) -> Vec<EntityId> {
        let removed: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.owner == owner)
            .map(|e| e.id)
            .collect();
        for entity in &removed {
            self.entities.remove(entity);
        }
        removed
    }

    /// Tuples received since the last call, with their owners.
    pub fn take_dirty_states(&mut self) -> Vec<(EntityId, ParticipantId, Vec<u8>)> {
        self.entities
            .values_mut()
            .filter(|e| e.dirty)
            .filter_map(|e| {
                e.dirty = false;
                e.last_state.clone().map(|state| (e.id, e.owner, state))
            })
            .collect()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            name: self.name.clone(),
            max_participants: self.max_participants,
            members: self.members.clone(),
            level: self.level.clone(),
            entities: self
                .entities
                .values()
                .map(|e| EntitySnapshot {
                    entity: e.id,
                    owner: e.owner,
                    kind: e.kind,
                    position: e.position,
                    rotation: e.rotation,
                    state: e.last_state.clone(),
                })
                .collect(),
        }
    }
}

/// All open rooms, by name.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: &str, max_participants: u8) -> Result<&mut Room, RoomError> {
        if self.rooms.contains_key(name) {
            return Err(RoomError::AlreadyExists(name.to_string()));
        }

        info!("Room '{}' created for {} participants", name, max_participants);
        Ok(self
            .rooms
            .entry(name.to_string())
            .or_insert_with(|| Room::new(name, max_participants)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rooms.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Room, RoomError> {
        self.rooms
            .get_mut(name)
            .ok_or_else(|| RoomError::NotFound(name.to_string()))
    }

    /// Destroys the room if nobody is left in it.
    pub fn remove_if_empty(&mut self, name: &str) -> bool {
        if self.rooms.get(name).map(Room::is_empty).unwrap_or(false) {
            self.rooms.remove(name);
            info!("Room '{}' closed", name);
            true
        } else {
            false
        }
    }

    /// Names of rooms with a free slot, sorted.
    pub fn open_rooms(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .rooms
            .values()
            .filter(|room| !room.is_full())
            .map(|room| room.name.clone())
            .collect();
        open.sort();
        debug!("{} of {} rooms open", open.len(), self.rooms.len());
        open
    }

    pub fn rooms_mut(&mut self) -> impl Iterator<Item = &mut Room> {
        self.rooms.values_mut()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
