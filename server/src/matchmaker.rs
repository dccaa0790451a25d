//! Matchmaking and room relay, independent of any socket
//!
//! [`Matchmaker::handle_packet`] takes a packet from a known participant
//! and returns the packets to send in response, addressed by participant
//! id. The network layer owns addresses and delivery.

use crate::room::{RoomError, RoomRegistry};
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::{
    clamp_nickname, codes, EntityId, EntityKind, Packet, ParticipantId, ParticipantInfo, Position,
    Rotation, PROTOCOL_VERSION,
};
use std::collections::HashMap;

/// A packet addressed to one participant.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: ParticipantId,
    pub packet: Packet,
}

impl Outbound {
    pub fn new(to: ParticipantId, packet: Packet) -> Self {
        Self { to, packet }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchmakerSettings {
    /// Upper bound on the capacity a client may request.
    pub max_room_size: u8,
    /// Length of generated room names.
    pub room_name_length: usize,
}

impl Default for MatchmakerSettings {
    fn default() -> Self {
        Self {
            max_room_size: 16,
            room_name_length: 8,
        }
    }
}

#[derive(Debug)]
struct Member {
    nickname: String,
    room: Option<String>,
}

pub struct Matchmaker {
    settings: MatchmakerSettings,
    participants: HashMap<ParticipantId, Member>,
    rooms: RoomRegistry,
    next_join_order: u64,
    rng: StdRng,
}

impl Matchmaker {
    pub fn new(settings: MatchmakerSettings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Deterministic room choice and naming, for tests.
    pub fn with_seed(settings: MatchmakerSettings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: MatchmakerSettings, rng: StdRng) -> Self {
        Self {
            settings,
            participants: HashMap::new(),
            rooms: RoomRegistry::new(),
            next_join_order: 1,
            rng,
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    pub fn is_registered(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    pub fn room_of(&self, id: ParticipantId) -> Option<&str> {
        self.participants.get(&id)?.room.as_deref()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Registers a participant after its handshake. A client speaking
    /// another protocol version is turned away.
    pub fn connect(
        &mut self,
        id: ParticipantId,
        client_version: u32,
        nickname: &str,
    ) -> Vec<Outbound> {
        if client_version != PROTOCOL_VERSION {
            warn!(
                "{} uses protocol version {}, expected {}",
                id, client_version, PROTOCOL_VERSION
            );
            return vec![Outbound::new(
                id,
                Packet::Disconnected {
                    reason: format!(
                        "Protocol version mismatch: server {}, client {}",
                        PROTOCOL_VERSION, client_version
                    ),
                },
            )];
        }

        let mut out = Vec::new();
        if self.is_registered(id) {
            out.extend(self.disconnect(id));
        }

        self.participants.insert(
            id,
            Member {
                nickname: clamp_nickname(nickname).to_string(),
                room: None,
            },
        );
        out.push(Outbound::new(id, Packet::Connected { participant_id: id }));
        out
    }

    /// Forgets a participant, leaving its room without a `LeftRoom` reply.
    pub fn disconnect(&mut self, id: ParticipantId) -> Vec<Outbound> {
        let out = self.depart(id, false);
        self.participants.remove(&id);
        out
    }

    pub fn handle_packet(&mut self, from: ParticipantId, packet: Packet) -> Vec<Outbound> {
        if let Packet::Connect {
            client_version,
            nickname,
        } = packet
        {
            return self.connect(from, client_version, &nickname);
        }

        if !self.is_registered(from) {
            warn!("Packet from unregistered {}", from);
            return Vec::new();
        }

        match packet {
            Packet::SetNickname { nickname } => {
                self.set_nickname(from, &nickname);
                Vec::new()
            }
            Packet::JoinRandomRoom => self.join_random(from),
            Packet::CreateRoom {
                name,
                max_participants,
            } => self.create_room(from, name, max_participants),
            Packet::LeaveRoom => self.depart(from, true),
            Packet::LoadLevel { label } => self.load_level(from, &label),
            Packet::Instantiate {
                entity,
                kind,
                position,
                rotation,
            } => self.instantiate(from, entity, kind, position, rotation),
            Packet::EntityState { entity, payload } => {
                self.update_state(from, entity, payload);
                Vec::new()
            }
            Packet::TransferOwnership { entity, new_owner } => {
                self.transfer(from, entity, new_owner)
            }
            Packet::Heartbeat => Vec::new(),
            Packet::Disconnect => self.disconnect(from),
            other => {
                warn!("Unexpected packet from {}: {:?}", from, other);
                Vec::new()
            }
        }
    }

    /// Relays every tuple received since the last flush to the other
    /// members of its room.
    pub fn flush_tick(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        for room in self.rooms.rooms_mut() {
            let members = room.member_ids();
            for (entity, owner, payload) in room.take_dirty_states() {
                for member in members.iter().filter(|m| **m != owner) {
                    out.push(Outbound::new(
                        *member,
                        Packet::EntityState {
                            entity,
                            payload: payload.clone(),
                        },
                    ));
                }
            }
        }
        out
    }

    fn set_nickname(&mut self, id: ParticipantId, nickname: &str) {
        let nickname = clamp_nickname(nickname);
        let Some(member) = self.participants.get_mut(&id) else {
            return;
        };
        member.nickname = nickname.to_string();
        if let Some(name) = member.room.clone() {
            if let Ok(room) = self.rooms.get_mut(&name) {
                room.rename_member(id, nickname);
            }
        }
    }

    fn join_random(&mut self, id: ParticipantId) -> Vec<Outbound> {
        if self.room_of(id).is_some() {
            return vec![Outbound::new(
                id,
                Packet::JoinRandomFailed {
                    code: codes::OPERATION_NOT_ALLOWED,
                    message: "Already in a room".to_string(),
                },
            )];
        }

        let open = self.rooms.open_rooms();
        let Some(name) = open.choose(&mut self.rng).cloned() else {
            debug!("No open room for {}", id);
            return vec![Outbound::new(
                id,
                Packet::JoinRandomFailed {
                    code: codes::NO_RANDOM_MATCH_FOUND,
                    message: "No match found".to_string(),
                },
            )];
        };

        match self.join(id, &name) {
            Ok(out) => out,
            Err(e) => vec![Outbound::new(
                id,
                Packet::JoinRandomFailed {
                    code: e.code(),
                    message: e.to_string(),
                },
            )],
        }
    }

    fn create_room(
        &mut self,
        id: ParticipantId,
        name: Option<String>,
        max_participants: u8,
    ) -> Vec<Outbound> {
        let fail = |code: i16, message: String| {
            vec![Outbound::new(id, Packet::CreateRoomFailed { code, message })]
        };

        if self.room_of(id).is_some() {
            return fail(codes::OPERATION_NOT_ALLOWED, "Already in a room".to_string());
        }
        if max_participants == 0 {
            return fail(
                codes::OPERATION_NOT_ALLOWED,
                "Room capacity must be at least 1".to_string(),
            );
        }

        let capacity = max_participants.min(self.settings.max_room_size);
        let name = match name {
            Some(name) => name,
            None => self.generate_room_name(),
        };

        if let Err(e) = self.rooms.create(&name, capacity) {
            return fail(e.code(), e.to_string());
        }

        match self.join(id, &name) {
            Ok(out) => out,
            Err(e) => {
                self.rooms.remove_if_empty(&name);
                fail(e.code(), e.to_string())
            }
        }
    }

    fn generate_room_name(&mut self) -> String {
        loop {
            let name: String = (&mut self.rng)
                .sample_iter(&Alphanumeric)
                .take(self.settings.room_name_length)
                .map(char::from)
                .collect();
            if !self.rooms.contains(&name) {
                return name;
            }
        }
    }

    fn join(&mut self, id: ParticipantId, name: &str) -> Result<Vec<Outbound>, RoomError> {
        let nickname = self
            .participants
            .get(&id)
            .map(|m| m.nickname.clone())
            .unwrap_or_default();
        let info = ParticipantInfo {
            id,
            nickname,
            join_order: self.next_join_order,
        };

        let room = self.rooms.get_mut(name)?;
        room.add_member(info.clone())?;
        self.next_join_order += 1;

        info!(
            "{} joined room '{}' ({}/{})",
            id,
            name,
            room.len(),
            room.max_participants()
        );

        let mut out = vec![Outbound::new(
            id,
            Packet::JoinedRoom {
                room: room.snapshot(),
            },
        )];
        for member in room.member_ids().into_iter().filter(|m| *m != id) {
            out.push(Outbound::new(
                member,
                Packet::ParticipantEntered {
                    participant: info.clone(),
                },
            ));
        }

        if let Some(member) = self.participants.get_mut(&id) {
            member.room = Some(name.to_string());
        }
        Ok(out)
    }

    /// Takes `id` out of its room. The room's other members learn which
    /// entities went with it and that it left.
    fn depart(&mut self, id: ParticipantId, reply: bool) -> Vec<Outbound> {
        let Some(name) = self
            .participants
            .get_mut(&id)
            .and_then(|member| member.room.take())
        else {
            if reply {
                debug!("{} asked to leave but is not in a room", id);
            }
            return Vec::new();
        };

        let mut out = Vec::new();
        if let Ok(room) = self.rooms.get_mut(&name) {
            if let Some(info) = room.remove_member(id) {
                let removed = room.remove_entities_of(id);
                let remaining = room.member_ids();
                for member in &remaining {
                    for entity in &removed {
                        out.push(Outbound::new(
                            *member,
                            Packet::EntityRemoved { entity: *entity },
                        ));
                    }
                    out.push(Outbound::new(
                        *member,
                        Packet::ParticipantLeft {
                            participant: info.clone(),
                        },
                    ));
                }
                info!("{} left room '{}'", id, name);
            }
        }
        self.rooms.remove_if_empty(&name);

        if reply {
            out.push(Outbound::new(id, Packet::LeftRoom));
        }
        out
    }

    fn load_level(&mut self, id: ParticipantId, label: &str) -> Vec<Outbound> {
        let Some(name) = self.room_of(id).map(str::to_string) else {
            warn!("{} tried to load '{}' outside a room", id, label);
            return Vec::new();
        };
        let Ok(room) = self.rooms.get_mut(&name) else {
            return Vec::new();
        };

        if let Err(e) = room.set_level(id, label) {
            warn!("Level load '{}' refused: {}", label, e);
            return Vec::new();
        }

        info!("Room '{}' switching to '{}'", name, label);
        room.member_ids()
            .into_iter()
            .map(|member| {
                Outbound::new(
                    member,
                    Packet::LevelLoaded {
                        label: label.to_string(),
                    },
                )
            })
            .collect()
    }

    fn instantiate(
        &mut self,
        id: ParticipantId,
        entity: EntityId,
        kind: EntityKind,
        position: Position,
        rotation: Rotation,
    ) -> Vec<Outbound> {
        let Some(name) = self.room_of(id).map(str::to_string) else {
            warn!("{} tried to instantiate {} outside a room", id, entity);
            return Vec::new();
        };
        let Ok(room) = self.rooms.get_mut(&name) else {
            return Vec::new();
        };

        if let Err(e) = room.spawn(id, entity, kind, position, rotation) {
            warn!("Instantiate refused: {}", e);
            return Vec::new();
        }

        debug!("{} spawned {:?} {}", id, kind, entity);
        room.member_ids()
            .into_iter()
            .filter(|member| *member != id)
            .map(|member| {
                Outbound::new(
                    member,
                    Packet::EntitySpawned {
                        entity,
                        owner: id,
                        kind,
                        position,
                        rotation,
                    },
                )
            })
            .collect()
    }

    fn update_state(&mut self, id: ParticipantId, entity: EntityId, payload: Vec<u8>) {
        let Some(name) = self.room_of(id).map(str::to_string) else {
            return;
        };
        if let Ok(room) = self.rooms.get_mut(&name) {
            if let Err(e) = room.update_state(id, entity, payload) {
                warn!("State from {} dropped: {}", id, e);
            }
        }
    }

    fn transfer(
        &mut self,
        id: ParticipantId,
        entity: EntityId,
        new_owner: ParticipantId,
    ) -> Vec<Outbound> {
        let Some(name) = self.room_of(id).map(str::to_string) else {
            return Vec::new();
        };
        let Ok(room) = self.rooms.get_mut(&name) else {
            return Vec::new();
        };

        if let Err(e) = room.transfer(id, entity, new_owner) {
            warn!("Ownership transfer refused: {}", e);
            // Tell the requester who really owns it so it can re-sync.
            return room
                .entity(entity)
                .map(|record| {
                    vec![Outbound::new(
                        id,
                        Packet::OwnershipChanged {
                            entity,
                            owner: record.owner,
                        },
                    )]
                })
                .unwrap_or_default();
        }

        info!("{} handed {} to {}", id, entity, new_owner);
        room.member_ids()
            .into_iter()
            .map(|member| {
                Outbound::new(
                    member,
                    Packet::OwnershipChanged {
                        entity,
                        owner: new_owner,
                    },
                )
            })
            .collect()
    }
}
