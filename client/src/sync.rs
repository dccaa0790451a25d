//! Per-tick replication of entity fields
//!
//! Outbound: every tick, each locally owned entity's `(flag, health)`
//! tuple is encoded in its fixed order and handed to the transport.
//!
//! Inbound: tuples for entities owned elsewhere overwrite the local
//! mirror unconditionally. Only the owner ever writes, so the latest
//! tuple received is always the authoritative one and dropped updates
//! are simply superseded by the next.

use crate::error::{OwnershipError, ProtocolError};
use crate::ownership::OwnershipRegistry;
use crate::transport::Transport;
use log::{debug, error, info, warn};
use shared::{EntityId, EntityState, ParticipantId};

/// What happened to an inbound tuple that decoded cleanly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Received {
    /// The mirror now holds this state.
    Applied(EntityState),
    /// Unknown entity, or one we own. Nothing changed.
    Dropped,
}

#[derive(Debug, Default)]
pub struct StateSynchronizer {
    exit_requested: bool,
    tuples_sent: u64,
    tuples_applied: u64,
    tuples_rejected: u64,
}

impl StateSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends the current tuple of every entity the local participant owns.
    /// Returns how many were sent.
    pub fn flush(&mut self, transport: &mut dyn Transport, registry: &OwnershipRegistry) -> usize {
        let Some(local) = transport.local_participant() else {
            return 0;
        };

        let mut sent = 0;
        for entity in registry.owned_by(local) {
            let Some(record) = registry.get(entity) else {
                continue;
            };
            match record.state.encode() {
                Ok(payload) => {
                    transport.send_state(entity, payload);
                    sent += 1;
                }
                Err(e) => error!("Failed to encode state of {}: {}", entity, e),
            }
        }

        self.tuples_sent += sent as u64;
        sent
    }

    /// Applies an inbound tuple to a mirror.
    ///
    /// Malformed tuples are dropped and the stale mirror kept. Tuples for
    /// an entity we own are refused: only the owner writes.
    pub fn receive(
        &mut self,
        registry: &mut OwnershipRegistry,
        local: Option<ParticipantId>,
        entity: EntityId,
        payload: &[u8],
    ) -> Result<Received, ProtocolError> {
        let state = match EntityState::decode(payload) {
            Ok(state) => state,
            Err(e) => {
                warn!("Dropping state for {}: {}", entity, e);
                self.tuples_rejected += 1;
                return Err(e);
            }
        };

        match registry.apply_remote_state(entity, local, state) {
            Ok(()) => {
                self.tuples_applied += 1;
                Ok(Received::Applied(state))
            }
            Err(OwnershipError::OwnedLocally(_)) => {
                warn!("Ignoring remote write to locally owned {}", entity);
                self.tuples_rejected += 1;
                Ok(Received::Dropped)
            }
            Err(e) => {
                debug!("State not applied: {}", e);
                Ok(Received::Dropped)
            }
        }
    }

    /// True exactly once after the local primary entity's health reaches
    /// the floor while we still own it. The caller turns that into a
    /// leave-room request.
    pub fn take_exit_request(
        &mut self,
        registry: &OwnershipRegistry,
        local: Option<ParticipantId>,
        primary: Option<EntityId>,
    ) -> bool {
        if self.exit_requested {
            return false;
        }
        let Some(local) = local else {
            return false;
        };

        let destroyed = primary
            .and_then(|entity| registry.get(entity))
            .filter(|record| record.owner == local)
            .map(|record| record.state.is_destroyed())
            .unwrap_or(false);

        if destroyed {
            info!("Local entity health depleted, leaving room");
            self.exit_requested = true;
        }
        destroyed
    }

    /// Re-arms the exit latch for a new room.
    pub fn reset(&mut self) {
        self.exit_requested = false;
    }

    pub fn tuples_sent(&self) -> u64 {
        self.tuples_sent
    }

    pub fn tuples_applied(&self) -> u64 {
        self.tuples_applied
    }

    pub fn tuples_rejected(&self) -> u64 {
        self.tuples_rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleManager;
    use crate::transport::mock::{info, Call, MockTransport};
    use assert_approx_eq::assert_approx_eq;
    use shared::{EntityKind, Rotation, SAFE_SPAWN_POINT};

    const LOCAL: Option<ParticipantId> = Some(ParticipantId(1));

    struct Fixture {
        registry: OwnershipRegistry,
        lifecycle: LifecycleManager,
        transport: MockTransport,
        own: EntityId,
        mirror: EntityId,
    }

    fn fixture() -> Fixture {
        let mut registry = OwnershipRegistry::new();
        let mut lifecycle = LifecycleManager::new();
        let mut transport = MockTransport::in_room(1, vec![info(1, 1), info(2, 2)]);
        let own = registry
            .spawn(
                &mut transport,
                &mut lifecycle,
                EntityKind::Player,
                SAFE_SPAWN_POINT,
                Rotation::IDENTITY,
            )
            .unwrap();
        let mirror = EntityId(2001);
        registry.insert_mirror(
            &mut lifecycle,
            mirror,
            ParticipantId(2),
            EntityKind::Player,
            SAFE_SPAWN_POINT,
            Rotation::IDENTITY,
        );
        transport.calls.clear();

        Fixture {
            registry,
            lifecycle,
            transport,
            own,
            mirror,
        }
    }

    fn payload(active_effect: bool, health: f32) -> Vec<u8> {
        EntityState {
            active_effect,
            health,
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn test_flush_sends_only_owned_entities() {
        let mut f = fixture();
        let mut sync = StateSynchronizer::new();

        let sent = sync.flush(&mut f.transport, &f.registry);

        assert_eq!(sent, 1);
        assert_eq!(
            f.transport.calls,
            vec![Call::SendState(f.own, payload(false, 1.0))]
        );
        assert_eq!(sync.tuples_sent(), 1);
    }

    #[test]
    fn test_flush_stops_after_clear() {
        let mut f = fixture();
        let mut sync = StateSynchronizer::new();
        f.registry.clear(&mut f.lifecycle);

        assert_eq!(sync.flush(&mut f.transport, &f.registry), 0);
        assert!(f.transport.calls.is_empty());
    }

    #[test]
    fn test_receive_overwrites_mirror() {
        let mut f = fixture();
        let mut sync = StateSynchronizer::new();

        sync.receive(&mut f.registry, Some(ParticipantId(1)), f.mirror, &payload(true, 0.7))
            .unwrap();
        sync.receive(&mut f.registry, Some(ParticipantId(1)), f.mirror, &payload(false, 0.4))
            .unwrap();

        let mirror = f.registry.get(f.mirror).unwrap();
        assert!(!mirror.state.active_effect);
        assert_approx_eq!(mirror.state.health, 0.4);
        assert_eq!(sync.tuples_applied(), 2);
    }

    #[test]
    fn test_malformed_tuple_keeps_stale_mirror() {
        let mut f = fixture();
        let mut sync = StateSynchronizer::new();
        sync.receive(&mut f.registry, Some(ParticipantId(1)), f.mirror, &payload(true, 0.6))
            .unwrap();

        let result = sync.receive(&mut f.registry, Some(ParticipantId(1)), f.mirror, &[1, 2]);

        assert!(result.is_err());
        let mirror = f.registry.get(f.mirror).unwrap();
        assert!(mirror.state.active_effect);
        assert_approx_eq!(mirror.state.health, 0.6);
        assert_eq!(sync.tuples_rejected(), 1);
    }

    #[test]
    fn test_remote_write_to_owned_entity_is_refused() {
        let mut f = fixture();
        let mut sync = StateSynchronizer::new();

        let received = sync.receive(&mut f.registry, LOCAL, f.own, &payload(true, 0.0));

        assert_eq!(received, Ok(Received::Dropped));

        let own = f.registry.get(f.own).unwrap();
        assert!(!own.state.active_effect);
        assert_approx_eq!(own.state.health, 1.0);
        assert_eq!(sync.tuples_rejected(), 1);
    }

    #[test]
    fn test_health_exit_requested_once() {
        let mut f = fixture();
        let mut sync = StateSynchronizer::new();
        let primary = f.lifecycle.local_primary();

        assert!(!sync.take_exit_request(&f.registry, LOCAL, primary));

        f.registry
            .mutate_state(f.own, ParticipantId(1), |s| s.health = 0.05)
            .unwrap();
        assert!(!sync.take_exit_request(&f.registry, LOCAL, primary));

        f.registry
            .mutate_state(f.own, ParticipantId(1), |s| s.health -= 0.1)
            .unwrap();
        let requests = (0..10)
            .filter(|_| sync.take_exit_request(&f.registry, LOCAL, primary))
            .count();
        assert_eq!(requests, 1);

        sync.reset();
        assert!(sync.take_exit_request(&f.registry, LOCAL, primary));
    }

    #[test]
    fn test_dead_mirror_does_not_trigger_exit() {
        let mut f = fixture();
        let mut sync = StateSynchronizer::new();
        sync.receive(&mut f.registry, Some(ParticipantId(1)), f.mirror, &payload(false, 0.0))
            .unwrap();

        assert!(!sync.take_exit_request(&f.registry, LOCAL, f.lifecycle.local_primary()));
    }

    #[test]
    fn test_handed_over_primary_does_not_trigger_exit() {
        let mut f = fixture();
        let mut sync = StateSynchronizer::new();
        f.registry.apply_owner_change(f.own, ParticipantId(2));

        let received = sync
            .receive(&mut f.registry, LOCAL, f.own, &payload(false, 0.0))
            .unwrap();

        assert_eq!(
            received,
            Received::Applied(EntityState {
                active_effect: false,
                health: 0.0,
            })
        );
        assert!(!sync.take_exit_request(&f.registry, LOCAL, f.lifecycle.local_primary()));
    }

    #[test]
    fn test_tuple_for_unknown_entity_is_dropped() {
        let mut f = fixture();
        let mut sync = StateSynchronizer::new();

        let received = sync
            .receive(&mut f.registry, LOCAL, EntityId(9001), &payload(true, 0.5))
            .unwrap();

        assert_eq!(received, Received::Dropped);
        assert_eq!(sync.tuples_applied(), 0);
    }
}
