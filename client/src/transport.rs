//! Transport adapter interface and the signals it delivers to the session core
//!
//! The core never talks to sockets. Everything it needs from the networking
//! substrate goes through [`Transport`], which is fire-and-forget: requests
//! return immediately and their outcome arrives later as a [`Signal`].
//! Signals are routed to named handler methods on [`SessionCallbacks`] by
//! [`dispatch`].

use shared::{
    master_of, EntityId, EntityKind, ParticipantId, ParticipantInfo, Position, RoomSnapshot,
    Rotation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomOptions {
    pub max_participants: u8,
}

/// Read-only projection of the current room, maintained by the adapter
/// from the substrate's membership broadcasts.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomView {
    pub name: String,
    pub max_participants: u8,
    pub level: Option<String>,
    members: Vec<ParticipantInfo>,
}

impl RoomView {
    pub fn new(name: &str, max_participants: u8, members: Vec<ParticipantInfo>) -> Self {
        let mut view = Self {
            name: name.to_string(),
            max_participants,
            level: None,
            members,
        };
        view.members.sort_by_key(|m| m.join_order);
        view
    }

    pub fn from_snapshot(snapshot: &RoomSnapshot) -> Self {
        let mut view = Self::new(
            &snapshot.name,
            snapshot.max_participants,
            snapshot.members.clone(),
        );
        view.level = snapshot.level.clone();
        view
    }

    pub fn members(&self) -> &[ParticipantInfo] {
        &self.members
    }

    pub fn participant_count(&self) -> usize {
        self.members.len()
    }

    pub fn master(&self) -> Option<ParticipantId> {
        master_of(&self.members)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    pub(crate) fn add_member(&mut self, participant: ParticipantInfo) {
        if self.contains(participant.id) {
            return;
        }
        self.members.push(participant);
        self.members.sort_by_key(|m| m.join_order);
    }

    pub(crate) fn remove_member(&mut self, id: ParticipantId) -> Option<ParticipantInfo> {
        let index = self.members.iter().position(|m| m.id == id)?;
        Some(self.members.remove(index))
    }
}

/// Requests the core issues to the networking substrate.
pub trait Transport {
    /// Starts the matchmaker handshake. Completion arrives as
    /// [`Signal::ConnectedToMatchmaker`].
    fn connect_using_settings(&mut self) -> bool;

    fn is_connected(&self) -> bool;

    fn join_random_room(&mut self);

    fn create_room(&mut self, name: Option<String>, options: RoomOptions);

    fn leave_room(&mut self);

    /// Broadcasts a level change to every room member, sender included.
    fn load_level(&mut self, label: &str);

    /// Allocates an entity owned by the local participant.
    fn instantiate(
        &mut self,
        kind: EntityKind,
        position: Position,
        rotation: Rotation,
    ) -> Option<EntityId>;

    fn send_state(&mut self, entity: EntityId, payload: Vec<u8>);

    fn transfer_ownership(&mut self, entity: EntityId, new_owner: ParticipantId);

    fn set_nickname(&mut self, nickname: &str);

    fn local_participant(&self) -> Option<ParticipantId>;

    fn current_room(&self) -> Option<&RoomView>;

    fn is_master(&self) -> bool {
        match (self.local_participant(), self.current_room()) {
            (Some(local), Some(room)) => room.master() == Some(local),
            _ => false,
        }
    }
}

/// Asynchronous notifications delivered by the substrate.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    ConnectedToMatchmaker,
    JoinRandomFailed {
        code: i16,
        message: String,
    },
    CreateRoomFailed {
        code: i16,
        message: String,
    },
    JoinedRoom,
    Disconnected {
        cause: String,
    },
    ParticipantEntered(ParticipantInfo),
    ParticipantLeft(ParticipantInfo),
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
    EntityState {
        entity: EntityId,
        payload: Vec<u8>,
    },
}

/// Named handlers for session and membership signals.
///
/// Every method defaults to a no-op so implementors only override what
/// they react to.
pub trait SessionCallbacks {
    fn on_connected_to_matchmaker(&mut self, _transport: &mut dyn Transport) {}

    fn on_join_random_failed(&mut self, _transport: &mut dyn Transport, _code: i16, _message: &str) {
    }

    fn on_create_room_failed(&mut self, _transport: &mut dyn Transport, _code: i16, _message: &str) {
    }

    fn on_joined_room(&mut self, _transport: &mut dyn Transport) {}

    fn on_disconnected(&mut self, _transport: &mut dyn Transport, _cause: &str) {}

    fn on_participant_entered(
        &mut self,
        _transport: &mut dyn Transport,
        _participant: &ParticipantInfo,
    ) {
    }

    fn on_participant_left(
        &mut self,
        _transport: &mut dyn Transport,
        _participant: &ParticipantInfo,
    ) {
    }

    fn on_left_room(&mut self, _transport: &mut dyn Transport) {}
}

/// Routes a signal to the matching handler. Entity and level signals are
/// not session callbacks and are ignored here.
pub fn dispatch(handler: &mut dyn SessionCallbacks, transport: &mut dyn Transport, signal: &Signal) {
    match signal {
        Signal::ConnectedToMatchmaker => handler.on_connected_to_matchmaker(transport),
        Signal::JoinRandomFailed { code, message } => {
            handler.on_join_random_failed(transport, *code, message)
        }
        Signal::CreateRoomFailed { code, message } => {
            handler.on_create_room_failed(transport, *code, message)
        }
        Signal::JoinedRoom => handler.on_joined_room(transport),
        Signal::Disconnected { cause } => handler.on_disconnected(transport, cause),
        Signal::ParticipantEntered(participant) => {
            handler.on_participant_entered(transport, participant)
        }
        Signal::ParticipantLeft(participant) => handler.on_participant_left(transport, participant),
        Signal::LeftRoom => handler.on_left_room(transport),
        Signal::LevelLoaded { .. }
        | Signal::EntitySpawned { .. }
        | Signal::EntityRemoved { .. }
        | Signal::OwnershipChanged { .. }
        | Signal::EntityState { .. } => {}
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Connect,
        JoinRandom,
        CreateRoom {
            name: Option<String>,
            max_participants: u8,
        },
        LeaveRoom,
        LoadLevel(String),
        Instantiate(EntityId),
        SendState(EntityId, Vec<u8>),
        Transfer(EntityId, ParticipantId),
        SetNickname(String),
    }

    /// Records every request and lets tests script the room projection.
    #[derive(Debug, Default)]
    pub struct MockTransport {
        pub calls: Vec<Call>,
        pub connected: bool,
        pub connect_result: bool,
        pub local: Option<ParticipantId>,
        pub room: Option<RoomView>,
        next_sequence: u32,
    }

    pub fn info(id: u32, join_order: u64) -> ParticipantInfo {
        ParticipantInfo {
            id: ParticipantId(id),
            nickname: format!("player-{}", id),
            join_order,
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                connect_result: true,
                ..Default::default()
            }
        }

        /// Connected as `local`, sitting in a room with `members`.
        pub fn in_room(local: u32, members: Vec<ParticipantInfo>) -> Self {
            let mut transport = Self::new();
            transport.connected = true;
            transport.local = Some(ParticipantId(local));
            transport.room = Some(RoomView::new("room", 4, members));
            transport
        }

        pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| predicate(c)).count()
        }

        pub fn room_mut(&mut self) -> &mut RoomView {
            self.room.as_mut().expect("mock room not set")
        }
    }

    impl Transport for MockTransport {
        fn connect_using_settings(&mut self) -> bool {
            self.calls.push(Call::Connect);
            self.connect_result
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn join_random_room(&mut self) {
            self.calls.push(Call::JoinRandom);
        }

        fn create_room(&mut self, name: Option<String>, options: RoomOptions) {
            self.calls.push(Call::CreateRoom {
                name,
                max_participants: options.max_participants,
            });
        }

        fn leave_room(&mut self) {
            self.calls.push(Call::LeaveRoom);
        }

        fn load_level(&mut self, label: &str) {
            self.calls.push(Call::LoadLevel(label.to_string()));
        }

        fn instantiate(
            &mut self,
            _kind: EntityKind,
            _position: Position,
            _rotation: Rotation,
        ) -> Option<EntityId> {
            let local = self.local?;
            self.room.as_ref()?;
            self.next_sequence += 1;
            let entity = EntityId::allocate(local, self.next_sequence);
            self.calls.push(Call::Instantiate(entity));
            Some(entity)
        }

        fn send_state(&mut self, entity: EntityId, payload: Vec<u8>) {
            self.calls.push(Call::SendState(entity, payload));
        }

        fn transfer_ownership(&mut self, entity: EntityId, new_owner: ParticipantId) {
            self.calls.push(Call::Transfer(entity, new_owner));
        }

        fn set_nickname(&mut self, nickname: &str) {
            self.calls.push(Call::SetNickname(nickname.to_string()));
        }

        fn local_participant(&self) -> Option<ParticipantId> {
            self.local
        }

        fn current_room(&self) -> Option<&RoomView> {
            self.room.as_ref()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{info, MockTransport};
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<&'static str>,
    }

    impl SessionCallbacks for Recorder {
        fn on_joined_room(&mut self, _transport: &mut dyn Transport) {
            self.seen.push("joined");
        }

        fn on_participant_left(
            &mut self,
            _transport: &mut dyn Transport,
            _participant: &ParticipantInfo,
        ) {
            self.seen.push("left");
        }
    }

    #[test]
    fn test_room_view_orders_by_join() {
        let view = RoomView::new("r", 4, vec![info(9, 3), info(2, 1), info(5, 2)]);
        let ids: Vec<u32> = view.members().iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![2, 5, 9]);
        assert_eq!(view.master(), Some(ParticipantId(2)));
    }

    #[test]
    fn test_room_view_membership_changes() {
        let mut view = RoomView::new("r", 4, vec![info(1, 1)]);
        view.add_member(info(2, 2));
        view.add_member(info(2, 2));
        assert_eq!(view.participant_count(), 2);

        let removed = view.remove_member(ParticipantId(1));
        assert_eq!(removed.map(|p| p.id), Some(ParticipantId(1)));
        assert_eq!(view.master(), Some(ParticipantId(2)));
        assert!(view.remove_member(ParticipantId(1)).is_none());
    }

    #[test]
    fn test_is_master_requires_room() {
        let mut transport = MockTransport::new();
        transport.local = Some(ParticipantId(1));
        assert!(!transport.is_master());

        let transport = MockTransport::in_room(1, vec![info(1, 1), info(2, 2)]);
        assert!(transport.is_master());

        let transport = MockTransport::in_room(2, vec![info(1, 1), info(2, 2)]);
        assert!(!transport.is_master());
    }

    #[test]
    fn test_dispatch_routes_named_handlers() {
        let mut recorder = Recorder::default();
        let mut transport = MockTransport::new();

        dispatch(&mut recorder, &mut transport, &Signal::JoinedRoom);
        dispatch(
            &mut recorder,
            &mut transport,
            &Signal::ParticipantLeft(info(3, 3)),
        );
        dispatch(
            &mut recorder,
            &mut transport,
            &Signal::LevelLoaded {
                label: "Room for 1".to_string(),
            },
        );

        assert_eq!(recorder.seen, vec!["joined", "left"]);
    }
}
