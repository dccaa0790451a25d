//! Spawn-once bookkeeping and level-transition handling for entities

use crate::level::LevelGeometry;
use crate::ownership::OwnershipRegistry;
use log::{error, info};
use shared::{EntityId, ParticipantId, Position, GROUND_PROBE_DISTANCE, SAFE_SPAWN_POINT};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Tracks the local primary entity and the level observers of every
/// known entity.
///
/// The primary marker is set on first spawn and survives level
/// transitions; it is only cleared when that entity is destroyed.
#[derive(Debug)]
pub struct LifecycleManager {
    local_primary: Option<EntityId>,
    observers: HashMap<EntityId, ObserverId>,
    next_observer: u64,
    safe_spawn: Position,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            local_primary: None,
            observers: HashMap::new(),
            next_observer: 1,
            safe_spawn: SAFE_SPAWN_POINT,
        }
    }

    pub fn local_primary(&self) -> Option<EntityId> {
        self.local_primary
    }

    pub fn has_spawned(&self) -> bool {
        self.local_primary.is_some()
    }

    pub fn safe_spawn(&self) -> Position {
        self.safe_spawn
    }

    pub(crate) fn mark_spawned(&mut self, entity: EntityId) {
        info!("Local primary entity is {}", entity);
        self.local_primary = Some(entity);
    }

    pub(crate) fn forget_primary(&mut self, entity: EntityId) {
        if self.local_primary == Some(entity) {
            info!("Local primary entity {} destroyed", entity);
            self.local_primary = None;
        }
    }

    /// Subscribes an entity to level transitions. Each entity registers
    /// once for its lifetime; a second registration is refused.
    pub fn register_observer(&mut self, entity: EntityId) -> Option<ObserverId> {
        if self.observers.contains_key(&entity) {
            error!("Level observer for {} is already registered", entity);
            return None;
        }

        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.insert(entity, id);
        Some(id)
    }

    pub fn unregister_observer(&mut self, entity: EntityId) -> bool {
        self.observers.remove(&entity).is_some()
    }

    pub fn is_observing(&self, entity: EntityId) -> bool {
        self.observers.contains_key(&entity)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Runs after every level load. Locally owned entities that have no
    /// ground below them are moved back to the safe spawn point; stale
    /// coordinates from a differently sized arena end up here.
    pub fn on_level_loaded(
        &self,
        registry: &mut OwnershipRegistry,
        local: ParticipantId,
        geometry: &dyn LevelGeometry,
    ) -> Vec<EntityId> {
        let mut observed: Vec<EntityId> = self.observers.keys().copied().collect();
        observed.sort();

        let mut relocated = Vec::new();
        for entity in observed {
            let Some(record) = registry.get(entity) else {
                continue;
            };
            if record.owner != local {
                continue;
            }
            if geometry.ground_below(record.position, GROUND_PROBE_DISTANCE) {
                continue;
            }

            info!(
                "{} is outside the arena at ({:.1}, {:.1}, {:.1}), moving to safe spawn",
                entity, record.position.x, record.position.y, record.position.z
            );
            if registry.set_position(entity, local, self.safe_spawn).is_ok() {
                relocated.push(entity);
            }
        }

        relocated
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::{ArenaGeometry, LevelContext};
    use crate::transport::mock::{info as member, MockTransport};
    use shared::{EntityKind, Rotation};

    #[test]
    fn test_observer_registered_once() {
        let mut lifecycle = LifecycleManager::new();
        let entity = EntityId(1001);

        assert!(lifecycle.register_observer(entity).is_some());
        assert!(lifecycle.register_observer(entity).is_none());
        assert_eq!(lifecycle.observer_count(), 1);

        assert!(lifecycle.unregister_observer(entity));
        assert!(!lifecycle.unregister_observer(entity));
        assert_eq!(lifecycle.observer_count(), 0);
    }

    #[test]
    fn test_observer_ids_are_unique() {
        let mut lifecycle = LifecycleManager::new();
        let a = lifecycle.register_observer(EntityId(1)).unwrap();
        let b = lifecycle.register_observer(EntityId(2)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_primary_marker_cleared_only_for_primary() {
        let mut lifecycle = LifecycleManager::new();
        lifecycle.mark_spawned(EntityId(1001));

        lifecycle.forget_primary(EntityId(2001));
        assert!(lifecycle.has_spawned());

        lifecycle.forget_primary(EntityId(1001));
        assert!(!lifecycle.has_spawned());
    }

    #[test]
    fn test_level_load_relocates_stranded_owned_entity() {
        let mut lifecycle = LifecycleManager::new();
        let mut registry = OwnershipRegistry::new();
        let mut transport = MockTransport::in_room(1, vec![member(1, 1), member(2, 2)]);

        let entity = registry
            .spawn(
                &mut transport,
                &mut lifecycle,
                EntityKind::Player,
                Position::new(35.0, 1.0, 0.0),
                Rotation::IDENTITY,
            )
            .unwrap();

        let geometry = ArenaGeometry::for_level(&LevelContext::arena_for(2));
        let relocated = lifecycle.on_level_loaded(&mut registry, ParticipantId(1), &geometry);

        assert_eq!(relocated, vec![entity]);
        assert_eq!(registry.get(entity).unwrap().position, SAFE_SPAWN_POINT);
    }

    #[test]
    fn test_level_load_keeps_grounded_entity_and_ignores_mirrors() {
        let mut lifecycle = LifecycleManager::new();
        let mut registry = OwnershipRegistry::new();
        let mut transport = MockTransport::in_room(1, vec![member(1, 1), member(2, 2)]);

        let grounded = Position::new(3.0, 1.0, -2.0);
        let own = registry
            .spawn(
                &mut transport,
                &mut lifecycle,
                EntityKind::Player,
                grounded,
                Rotation::IDENTITY,
            )
            .unwrap();
        let stranded_mirror = Position::new(500.0, 1.0, 0.0);
        registry.insert_mirror(
            &mut lifecycle,
            EntityId(2001),
            ParticipantId(2),
            EntityKind::Player,
            stranded_mirror,
            Rotation::IDENTITY,
        );

        let geometry = ArenaGeometry::for_level(&LevelContext::arena_for(2));
        let relocated = lifecycle.on_level_loaded(&mut registry, ParticipantId(1), &geometry);

        assert!(relocated.is_empty());
        assert_eq!(registry.get(own).unwrap().position, grounded);
        assert_eq!(
            registry.get(EntityId(2001)).unwrap().position,
            stranded_mirror
        );
    }
}
