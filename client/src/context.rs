//! Session-scoped wiring of the core components
//!
//! A [`SessionContext`] owns one transport and every component that reacts
//! to it. Signals go in through [`SessionContext::handle_signal`], input
//! goes in through [`SessionContext::tick`]; nothing is global.

use crate::authority::AuthorityManager;
use crate::error::{AuthorityError, ConfigError, InputError, OwnershipError};
use crate::input::{apply_edge, EdgeDetector, TickInput};
use crate::level::{ArenaGeometry, LevelContext};
use crate::lifecycle::LifecycleManager;
use crate::ownership::OwnershipRegistry;
use crate::prefs::{self, PrefsStore};
use crate::session::{SessionCoordinator, SessionState};
use crate::sync::StateSynchronizer;
use crate::transport::{dispatch, Signal, Transport};
use log::{debug, error, info, warn};
use shared::{
    EntityId, EntityKind, EntityState, ParticipantId, Rotation, DEFAULT_MAX_PARTICIPANTS,
    SAFE_SPAWN_POINT,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub max_participants: u8,
    pub tick_rate: u32,
    /// Kind spawned as the local primary entity on level load.
    pub player_prefab: Option<EntityKind>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            tick_rate: 30,
            player_prefab: Some(EntityKind::Player),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<EntityKind, ConfigError> {
        if self.max_participants == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        self.player_prefab.ok_or(ConfigError::MissingPrefab)
    }
}

pub struct SessionContext<T: Transport> {
    transport: T,
    config: SessionConfig,
    prefab: EntityKind,
    coordinator: SessionCoordinator,
    authority: AuthorityManager,
    registry: OwnershipRegistry,
    lifecycle: LifecycleManager,
    sync: StateSynchronizer,
    fire: EdgeDetector,
    level: LevelContext,
    ticks: u64,
}

impl<T: Transport> SessionContext<T> {
    pub fn new(transport: T, config: SessionConfig) -> Result<Self, ConfigError> {
        let prefab = match config.validate() {
            Ok(prefab) => prefab,
            Err(e) => {
                error!("Invalid session configuration: {}", e);
                return Err(e);
            }
        };

        Ok(Self {
            transport,
            coordinator: SessionCoordinator::new(config.max_participants),
            config,
            prefab,
            authority: AuthorityManager::new(),
            registry: OwnershipRegistry::new(),
            lifecycle: LifecycleManager::new(),
            sync: StateSynchronizer::new(),
            fire: EdgeDetector::new(),
            level: LevelContext::launcher(),
            ticks: 0,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    pub fn state(&self) -> SessionState {
        self.coordinator.state()
    }

    pub fn authority(&self) -> &AuthorityManager {
        &self.authority
    }

    pub fn registry(&self) -> &OwnershipRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn synchronizer(&self) -> &StateSynchronizer {
        &self.sync
    }

    pub fn level(&self) -> &LevelContext {
        &self.level
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn is_master(&self) -> bool {
        self.authority.is_master(&self.transport)
    }

    pub fn local_primary(&self) -> Option<EntityId> {
        self.lifecycle.local_primary()
    }

    /// Replicated fields of the local primary entity.
    pub fn local_state(&self) -> Option<EntityState> {
        let entity = self.lifecycle.local_primary()?;
        self.registry.get(entity).map(|record| record.state)
    }

    pub fn connect(&mut self) {
        self.coordinator.connect(&mut self.transport);
    }

    pub fn leave_room(&mut self) -> bool {
        self.coordinator.leave_room(&mut self.transport)
    }

    pub fn request_level_load(&mut self, label: &str) -> Result<(), AuthorityError> {
        self.authority.request_level_load(&mut self.transport, label)
    }

    pub fn transfer(&mut self, entity: EntityId, new_owner: ParticipantId) -> Result<(), OwnershipError> {
        self.registry.transfer(&mut self.transport, entity, new_owner)
    }

    pub fn load_player_name(&mut self, prefs: &dyn PrefsStore) -> Option<String> {
        prefs::load_player_name(prefs, &mut self.transport)
    }

    pub fn set_player_name(
        &mut self,
        prefs: &mut dyn PrefsStore,
        name: &str,
    ) -> Result<(), InputError> {
        prefs::set_player_name(prefs, &mut self.transport, name)
    }

    /// Routes one transport signal through the session handlers, then
    /// applies its effect on entities and the level.
    pub fn handle_signal(&mut self, signal: Signal) {
        dispatch(&mut self.coordinator, &mut self.transport, &signal);
        dispatch(&mut self.authority, &mut self.transport, &signal);

        match signal {
            Signal::JoinedRoom => {
                self.sync.reset();
                self.fire.reset();
            }
            Signal::LevelLoaded { label } => self.on_level_loaded(&label),
            Signal::EntitySpawned {
                entity,
                owner,
                kind,
                position,
                rotation,
            } => {
                if Some(owner) == self.transport.local_participant() {
                    debug!("Ignoring spawn broadcast for our own {}", entity);
                    return;
                }
                self.registry.insert_mirror(
                    &mut self.lifecycle,
                    entity,
                    owner,
                    kind,
                    position,
                    rotation,
                );
            }
            Signal::EntityRemoved { entity } => {
                if self.registry.remove(&mut self.lifecycle, entity).is_none() {
                    debug!("Removal of unknown {}", entity);
                }
            }
            Signal::OwnershipChanged { entity, owner } => {
                if !self.registry.apply_owner_change(entity, owner) {
                    debug!("Ownership change for unknown {}", entity);
                }
            }
            Signal::EntityState { entity, payload } => {
                let local = self.transport.local_participant();
                // Malformed tuples are logged inside and the mirror kept.
                let _ = self.sync.receive(&mut self.registry, local, entity, &payload);
            }
            Signal::LeftRoom | Signal::Disconnected { .. } => self.reset_room_state(),
            Signal::ConnectedToMatchmaker
            | Signal::JoinRandomFailed { .. }
            | Signal::CreateRoomFailed { .. }
            | Signal::ParticipantEntered(_)
            | Signal::ParticipantLeft(_) => {}
        }
    }

    pub fn handle_signals(&mut self, signals: impl IntoIterator<Item = Signal>) {
        for signal in signals {
            self.handle_signal(signal);
        }
    }

    /// Runs one fixed-rate tick: samples input into the local primary
    /// entity, streams owned state, then checks for the health exit.
    /// Returns the number of tuples sent.
    pub fn tick(&mut self, input: TickInput) -> usize {
        self.ticks += 1;
        if !self.coordinator.is_in_room() {
            return 0;
        }

        let local = self.transport.local_participant();
        let primary = self.lifecycle.local_primary();
        if let (Some(local), Some(primary)) = (local, primary) {
            if let Some(edge) = self.fire.sample(input.fire_held) {
                let _ = self
                    .registry
                    .mutate_state(primary, local, |state| apply_edge(state, edge));
            }
            if input.damage > 0.0 {
                match self
                    .registry
                    .mutate_state(primary, local, |state| state.health -= input.damage)
                {
                    Ok(state) => debug!("Took {:.2} damage, health {:.2}", input.damage, state.health),
                    Err(e) => warn!("Damage not applied: {}", e),
                }
            }
        }

        let sent = self.sync.flush(&mut self.transport, &self.registry);

        if self.sync.take_exit_request(&self.registry, local, primary) {
            self.coordinator.leave_room(&mut self.transport);
        }

        sent
    }

    fn on_level_loaded(&mut self, label: &str) {
        let room_size = self
            .transport
            .current_room()
            .map(|room| room.participant_count())
            .unwrap_or(0);
        self.level = LevelContext::from_label(label, room_size);
        info!("Level '{}' loaded", self.level.label);

        if self.level.is_launcher() {
            return;
        }

        if !self.lifecycle.has_spawned() {
            match self.registry.spawn(
                &mut self.transport,
                &mut self.lifecycle,
                self.prefab,
                SAFE_SPAWN_POINT,
                Rotation::IDENTITY,
            ) {
                Ok(entity) => info!("Spawned local {:?} {}", self.prefab, entity),
                Err(e) => warn!("Local entity not spawned: {}", e),
            }
        }

        let Some(local) = self.transport.local_participant() else {
            return;
        };
        let geometry = ArenaGeometry::for_level(&self.level);
        self.lifecycle
            .on_level_loaded(&mut self.registry, local, &geometry);
    }

    fn reset_room_state(&mut self) {
        self.registry.clear(&mut self.lifecycle);
        self.sync.reset();
        self.fire.reset();
        self.level = LevelContext::launcher();
    }
}
