//! Per-entity write authority
//!
//! Every entity has exactly one owner. Only the owner mutates the
//! replicated fields; everybody else keeps a read-only mirror that the
//! synchronizer overwrites from inbound tuples.

use crate::error::{OwnershipError, SpawnError};
use crate::lifecycle::LifecycleManager;
use crate::transport::Transport;
use log::{debug, info, warn};
use shared::{
    EntityId, EntityKind, EntityState, ParticipantId, Position, Rotation, HEALTH_CEILING,
    HEALTH_FLOOR,
};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id: EntityId,
    pub owner: ParticipantId,
    pub kind: EntityKind,
    pub position: Position,
    pub rotation: Rotation,
    pub state: EntityState,
}

#[derive(Debug, Default)]
pub struct OwnershipRegistry {
    entities: HashMap<EntityId, EntityRecord>,
}

impl OwnershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the local participant's primary entity.
    ///
    /// Skipped when a primary entity already exists: it survived a level
    /// transition and is reused, so spawning happens once per session.
    /// The record is inserted already owned by the spawner.
    pub fn spawn(
        &mut self,
        transport: &mut dyn Transport,
        lifecycle: &mut LifecycleManager,
        kind: EntityKind,
        position: Position,
        rotation: Rotation,
    ) -> Result<EntityId, SpawnError> {
        if let Some(existing) = lifecycle.local_primary() {
            info!("Ignoring spawn, {} survived the level load", existing);
            return Err(SpawnError::AlreadySpawned(existing));
        }

        let owner = transport.local_participant().ok_or(SpawnError::NotInRoom)?;
        let entity = transport
            .instantiate(kind, position, rotation)
            .ok_or(SpawnError::NotInRoom)?;

        info!("Instantiated {:?} {} owned by {}", kind, entity, owner);
        self.entities.insert(
            entity,
            EntityRecord {
                id: entity,
                owner,
                kind,
                position,
                rotation,
                state: EntityState::new(),
            },
        );
        lifecycle.mark_spawned(entity);
        lifecycle.register_observer(entity);

        Ok(entity)
    }

    /// Adds a read-only copy of an entity spawned elsewhere.
    pub fn insert_mirror(
        &mut self,
        lifecycle: &mut LifecycleManager,
        entity: EntityId,
        owner: ParticipantId,
        kind: EntityKind,
        position: Position,
        rotation: Rotation,
    ) -> bool {
        if self.entities.contains_key(&entity) {
            debug!("{} already known, ignoring spawn broadcast", entity);
            return false;
        }

        self.entities.insert(
            entity,
            EntityRecord {
                id: entity,
                owner,
                kind,
                position,
                rotation,
                state: EntityState::new(),
            },
        );
        lifecycle.register_observer(entity);
        true
    }

    pub fn remove(
        &mut self,
        lifecycle: &mut LifecycleManager,
        entity: EntityId,
    ) -> Option<EntityRecord> {
        let record = self.entities.remove(&entity)?;
        lifecycle.unregister_observer(entity);
        lifecycle.forget_primary(entity);
        Some(record)
    }

    /// Drops every entity, owned ones included. Outbound sync stops with it.
    pub fn clear(&mut self, lifecycle: &mut LifecycleManager) {
        let ids: Vec<EntityId> = self.entities.keys().copied().collect();
        for entity in ids {
            self.remove(lifecycle, entity);
        }
    }

    pub fn get(&self, entity: EntityId) -> Option<&EntityRecord> {
        self.entities.get(&entity)
    }

    pub fn owner_of(&self, entity: EntityId) -> Option<ParticipantId> {
        self.entities.get(&entity).map(|record| record.owner)
    }

    pub fn is_owned_by(&self, entity: EntityId, participant: ParticipantId) -> bool {
        self.owner_of(entity) == Some(participant)
    }

    /// Entities `participant` may write, in id order.
    pub fn owned_by(&self, participant: ParticipantId) -> Vec<EntityId> {
        let mut owned: Vec<EntityId> = self
            .entities
            .values()
            .filter(|record| record.owner == participant)
            .map(|record| record.id)
            .collect();
        owned.sort();
        owned
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn owned_record_mut(
        &mut self,
        entity: EntityId,
        requester: ParticipantId,
    ) -> Result<&mut EntityRecord, OwnershipError> {
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(OwnershipError::UnknownEntity(entity))?;

        if record.owner != requester {
            warn!(
                "{} tried to write {} owned by {}, ignored",
                requester, entity, record.owner
            );
            return Err(OwnershipError::NotOwner {
                entity,
                owner: record.owner,
                requester,
            });
        }

        Ok(record)
    }

    /// Applies a local write to the replicated fields. Health is kept
    /// within the floor and ceiling.
    pub fn mutate_state(
        &mut self,
        entity: EntityId,
        requester: ParticipantId,
        mutate: impl FnOnce(&mut EntityState),
    ) -> Result<EntityState, OwnershipError> {
        let record = self.owned_record_mut(entity, requester)?;
        mutate(&mut record.state);
        record.state.health = record.state.health.clamp(HEALTH_FLOOR, HEALTH_CEILING);
        Ok(record.state)
    }

    pub fn set_position(
        &mut self,
        entity: EntityId,
        requester: ParticipantId,
        position: Position,
    ) -> Result<(), OwnershipError> {
        self.owned_record_mut(entity, requester)?.position = position;
        Ok(())
    }

    /// Asks the substrate to hand write authority to another member.
    ///
    /// The local owner stays in place until the substrate confirms with
    /// an ownership change, which swaps it in one assignment. A refused
    /// transfer comes back as a change to the unchanged owner.
    pub fn transfer(
        &mut self,
        transport: &mut dyn Transport,
        entity: EntityId,
        new_owner: ParticipantId,
    ) -> Result<(), OwnershipError> {
        let requester = transport
            .local_participant()
            .ok_or(OwnershipError::UnknownEntity(entity))?;
        self.owned_record_mut(entity, requester)?;

        let is_member = transport
            .current_room()
            .map(|room| room.contains(new_owner))
            .unwrap_or(false);
        if !is_member {
            warn!("Refusing to hand {} to {}, not in the room", entity, new_owner);
            return Err(OwnershipError::NotMember {
                entity,
                target: new_owner,
            });
        }

        info!("Requesting transfer of {} from {} to {}", entity, requester, new_owner);
        transport.transfer_ownership(entity, new_owner);
        Ok(())
    }

    /// Applies an ownership change confirmed by the substrate.
    pub fn apply_owner_change(&mut self, entity: EntityId, owner: ParticipantId) -> bool {
        match self.entities.get_mut(&entity) {
            Some(record) => {
                debug!("{} now owned by {}", entity, owner);
                record.owner = owner;
                true
            }
            None => false,
        }
    }

    /// Overwrites a mirror with the owner's latest tuple.
    pub fn apply_remote_state(
        &mut self,
        entity: EntityId,
        local: Option<ParticipantId>,
        state: EntityState,
    ) -> Result<(), OwnershipError> {
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(OwnershipError::UnknownEntity(entity))?;

        if Some(record.owner) == local {
            return Err(OwnershipError::OwnedLocally(entity));
        }

        record.state = state;
        Ok(())
    }
}
