use crate::console::Command;
use crate::context::{SessionConfig, SessionContext};
use crate::input::TickInput;
use crate::prefs::FilePrefs;
use crate::session::SessionState;
use crate::transport::{RoomOptions, RoomView, Signal, Transport};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{
    EntityId, EntityKind, Packet, ParticipantId, Position, Rotation, BEAM_HIT_DAMAGE,
    ENTITY_IDS_PER_PARTICIPANT, PROTOCOL_VERSION,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

/// [`Transport`] over `shared::Packet`s.
///
/// Requests are queued as outbound packets for the socket loop to send.
/// Inbound packets are turned into [`Signal`]s by [`apply_packet`], which
/// also keeps the room projection current before the signal is raised.
///
/// [`apply_packet`]: PacketTransport::apply_packet
#[derive(Debug, Default)]
pub struct PacketTransport {
    nickname: String,
    participant_id: Option<ParticipantId>,
    handshake_pending: bool,
    room: Option<RoomView>,
    next_sequence: u32,
    outbound: VecDeque<Packet>,
}

impl PacketTransport {
    pub fn new(nickname: &str) -> Self {
        Self {
            nickname: nickname.to_string(),
            ..Default::default()
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Takes every packet queued since the last call, oldest first.
    pub fn drain_outbound(&mut self) -> Vec<Packet> {
        self.outbound.drain(..).collect()
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Tells the substrate we are going away and forgets the session.
    pub fn disconnect(&mut self) {
        if self.participant_id.is_some() {
            self.outbound.push_back(Packet::Disconnect);
        }
        self.forget_session();
    }

    /// Entity ids are only unique within a room, so the sequence starts over
    /// whenever the room is gone.
    fn forget_room(&mut self) {
        self.room = None;
        self.next_sequence = 0;
    }

    fn forget_session(&mut self) {
        self.participant_id = None;
        self.handshake_pending = false;
        self.forget_room();
    }

    pub fn heartbeat(&mut self) {
        if self.participant_id.is_some() {
            self.outbound.push_back(Packet::Heartbeat);
        }
    }

    /// Applies one substrate packet and returns the signals it raises.
    pub fn apply_packet(&mut self, packet: Packet) -> Vec<Signal> {
        match packet {
            Packet::Connected { participant_id } => {
                info!("Connected as {}", participant_id);
                self.forget_room();
                self.participant_id = Some(participant_id);
                self.handshake_pending = false;
                vec![Signal::ConnectedToMatchmaker]
            }

            Packet::JoinRandomFailed { code, message } => {
                vec![Signal::JoinRandomFailed { code, message }]
            }

            Packet::CreateRoomFailed { code, message } => {
                vec![Signal::CreateRoomFailed { code, message }]
            }

            Packet::JoinedRoom { room } => {
                info!(
                    "Joined room '{}' ({}/{})",
                    room.name,
                    room.members.len(),
                    room.max_participants
                );
                self.room = Some(RoomView::from_snapshot(&room));

                let mut signals = vec![Signal::JoinedRoom];
                if let Some(label) = room.level {
                    signals.push(Signal::LevelLoaded { label });
                }
                for snapshot in room.entities {
                    signals.push(Signal::EntitySpawned {
                        entity: snapshot.entity,
                        owner: snapshot.owner,
                        kind: snapshot.kind,
                        position: snapshot.position,
                        rotation: snapshot.rotation,
                    });
                    if let Some(payload) = snapshot.state {
                        signals.push(Signal::EntityState {
                            entity: snapshot.entity,
                            payload,
                        });
                    }
                }
                signals
            }

            Packet::ParticipantEntered { participant } => match self.room.as_mut() {
                Some(room) => {
                    room.add_member(participant.clone());
                    vec![Signal::ParticipantEntered(participant)]
                }
                None => {
                    debug!("Participant entered while not in a room");
                    Vec::new()
                }
            },

            Packet::ParticipantLeft { participant } => match self.room.as_mut() {
                Some(room) => {
                    room.remove_member(participant.id);
                    vec![Signal::ParticipantLeft(participant)]
                }
                None => Vec::new(),
            },

            Packet::LeftRoom => {
                self.forget_room();
                vec![Signal::LeftRoom]
            }

            Packet::LevelLoaded { label } => {
                if let Some(room) = self.room.as_mut() {
                    room.level = Some(label.clone());
                }
                vec![Signal::LevelLoaded { label }]
            }

            Packet::EntitySpawned {
                entity,
                owner,
                kind,
                position,
                rotation,
            } => vec![Signal::EntitySpawned {
                entity,
                owner,
                kind,
                position,
                rotation,
            }],

            Packet::EntityRemoved { entity } => vec![Signal::EntityRemoved { entity }],

            Packet::OwnershipChanged { entity, owner } => {
                vec![Signal::OwnershipChanged { entity, owner }]
            }

            Packet::EntityState { entity, payload } => vec![Signal::EntityState { entity, payload }],

            Packet::Disconnected { reason } => {
                self.forget_session();
                vec![Signal::Disconnected { cause: reason }]
            }

            other => {
                warn!("Unexpected packet from server: {:?}", other);
                Vec::new()
            }
        }
    }
}

impl Transport for PacketTransport {
    fn connect_using_settings(&mut self) -> bool {
        if self.participant_id.is_some() || self.handshake_pending {
            return true;
        }

        info!("Connecting to matchmaker as '{}'", self.nickname);
        self.handshake_pending = true;
        self.outbound.push_back(Packet::Connect {
            client_version: PROTOCOL_VERSION,
            nickname: self.nickname.clone(),
        });
        true
    }

    fn is_connected(&self) -> bool {
        self.participant_id.is_some()
    }

    fn join_random_room(&mut self) {
        self.outbound.push_back(Packet::JoinRandomRoom);
    }

    fn create_room(&mut self, name: Option<String>, options: RoomOptions) {
        self.outbound.push_back(Packet::CreateRoom {
            name,
            max_participants: options.max_participants,
        });
    }

    fn leave_room(&mut self) {
        self.outbound.push_back(Packet::LeaveRoom);
    }

    fn load_level(&mut self, label: &str) {
        self.outbound.push_back(Packet::LoadLevel {
            label: label.to_string(),
        });
    }

    fn instantiate(
        &mut self,
        kind: EntityKind,
        position: Position,
        rotation: Rotation,
    ) -> Option<EntityId> {
        let local = self.participant_id?;
        if self.room.is_none() {
            warn!("Cannot instantiate outside of a room");
            return None;
        }
        if self.next_sequence + 1 >= ENTITY_IDS_PER_PARTICIPANT {
            error!("Entity id range of {} exhausted", local);
            return None;
        }

        self.next_sequence += 1;
        let entity = EntityId::allocate(local, self.next_sequence);
        self.outbound.push_back(Packet::Instantiate {
            entity,
            kind,
            position,
            rotation,
        });
        Some(entity)
    }

    fn send_state(&mut self, entity: EntityId, payload: Vec<u8>) {
        self.outbound.push_back(Packet::EntityState { entity, payload });
    }

    fn transfer_ownership(&mut self, entity: EntityId, new_owner: ParticipantId) {
        self.outbound
            .push_back(Packet::TransferOwnership { entity, new_owner });
    }

    fn set_nickname(&mut self, nickname: &str) {
        self.nickname = nickname.to_string();
        if self.participant_id.is_some() {
            self.outbound.push_back(Packet::SetNickname {
                nickname: nickname.to_string(),
            });
        }
    }

    fn local_participant(&self) -> Option<ParticipantId> {
        self.participant_id
    }

    fn current_room(&self) -> Option<&RoomView> {
        self.room.as_ref()
    }
}

/// Console client: one UDP socket, one session, one task.
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    fake_ping_ms: u64,
    session: SessionContext<PacketTransport>,
    prefs: FilePrefs,
    fire_held: bool,
    pending_damage: f32,
    last_status: Option<(SessionState, bool)>,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        fake_ping_ms: u64,
        config: SessionConfig,
        prefs: FilePrefs,
        name_override: Option<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        let mut session = SessionContext::new(PacketTransport::new("player"), config)?;
        let mut prefs = prefs;
        match name_override {
            Some(name) => session.set_player_name(&mut prefs, &name)?,
            None => {
                if session.load_player_name(&prefs).is_none() {
                    info!("No stored player name, using '{}'", session.transport().nickname());
                }
            }
        }

        Ok(Client {
            socket,
            server_addr,
            fake_ping_ms,
            session,
            prefs,
            fire_held: false,
            pending_damage: 0.0,
            last_status: None,
        })
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn flush_outbound(&mut self) {
        let packets = self.session.transport_mut().drain_outbound();
        for packet in packets {
            if let Err(e) = self.send_packet(&packet).await {
                error!("Error sending packet: {}", e);
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) {
        let signals = self.session.transport_mut().apply_packet(packet);
        self.session.handle_signals(signals);
    }

    /// Returns false when the client should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect => self.session.connect(),
            Command::Leave => {
                if !self.session.leave_room() {
                    println!("Not in a room");
                }
            }
            Command::Name(name) => {
                if let Err(e) = self.session.set_player_name(&mut self.prefs, &name) {
                    println!("Name not changed: {}", e);
                }
            }
            Command::Fire => self.fire_held = true,
            Command::Release => self.fire_held = false,
            Command::Hit => self.pending_damage += BEAM_HIT_DAMAGE,
            Command::Status => self.print_status(),
            Command::Quit => return false,
        }
        true
    }

    fn print_status(&self) {
        let ui = self.session.coordinator().ui();
        println!("State: {:?}", self.session.state());
        if ui.control_panel_visible {
            println!("  [control panel] type 'connect' to play");
        }
        if ui.progress_visible {
            println!("  Connecting...");
        }
        if let Some(cause) = &ui.status_cause {
            println!("  Last issue: {}", cause);
        }
        println!("  Level: {}", self.session.level().label);

        if let Some(room) = self.session.transport().current_room() {
            println!(
                "  Room '{}' {}/{}{}",
                room.name,
                room.participant_count(),
                room.max_participants,
                if self.session.is_master() { " (master)" } else { "" }
            );
            for member in room.members() {
                println!("    {} {}", member.id, member.nickname);
            }
        }

        if let Some(state) = self.session.local_state() {
            println!(
                "  Health {:.2}{}",
                state.health,
                if state.active_effect { ", beams on" } else { "" }
            );
        }
        println!("  Entities known: {}", self.session.registry().len());
    }

    fn report_status_change(&mut self) {
        let status = (self.session.state(), self.session.is_master());
        if self.last_status != Some(status) {
            self.last_status = Some(status);
            self.print_status();
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let tick_ms = (1000 / self.session.config().tick_rate.max(1)).max(1) as u64;
        let mut tick_interval = interval(Duration::from_millis(tick_ms));
        let mut heartbeat_interval = interval(Duration::from_secs(1));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut buffer = [0u8; 2048];

        self.report_status_change();

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) => {
                            if addr != self.server_addr {
                                debug!("Ignoring packet from {}", addr);
                                continue;
                            }
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => self.handle_packet(packet),
                                Err(e) => warn!("Dropping undecodable packet: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    let input = TickInput {
                        fire_held: self.fire_held,
                        damage: std::mem::take(&mut self.pending_damage),
                    };
                    self.session.tick(input);
                },

                _ = heartbeat_interval.tick() => {
                    self.session.transport_mut().heartbeat();
                },

                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => match Command::parse(&line) {
                            Some(command) => {
                                if !self.handle_command(command) {
                                    break;
                                }
                            }
                            None => println!("{}", Command::HELP),
                        },
                        Ok(None) => break,
                        Err(e) => {
                            error!("Error reading stdin: {}", e);
                            break;
                        }
                    }
                },
            }

            self.flush_outbound().await;
            self.report_status_change();
        }

        self.session.transport_mut().disconnect();
        self.flush_outbound().await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{codes, EntitySnapshot, EntityState, ParticipantInfo, RoomSnapshot};

    fn member(id: u32, join_order: u64) -> ParticipantInfo {
        ParticipantInfo {
            id: ParticipantId(id),
            nickname: format!("p{}", id),
            join_order,
        }
    }

    fn connected(id: u32) -> PacketTransport {
        let mut transport = PacketTransport::new("tester");
        transport.connect_using_settings();
        transport.apply_packet(Packet::Connected {
            participant_id: ParticipantId(id),
        });
        transport.drain_outbound();
        transport
    }

    #[test]
    fn test_handshake_queues_connect_once() {
        let mut transport = PacketTransport::new("Ada");

        assert!(transport.connect_using_settings());
        assert!(transport.connect_using_settings());

        let packets = transport.drain_outbound();
        assert_eq!(packets.len(), 1);
        assert!(matches!(
            &packets[0],
            Packet::Connect { client_version, nickname }
                if *client_version == PROTOCOL_VERSION && nickname == "Ada"
        ));
        assert!(!transport.is_connected());

        let signals = transport.apply_packet(Packet::Connected {
            participant_id: ParticipantId(3),
        });
        assert_eq!(signals, vec![Signal::ConnectedToMatchmaker]);
        assert_eq!(transport.local_participant(), Some(ParticipantId(3)));
    }

    #[test]
    fn test_joined_room_replays_level_and_entities() {
        let mut transport = connected(2);
        let existing = EntityId(1001);
        let state = EntityState::new().encode().unwrap();

        let signals = transport.apply_packet(Packet::JoinedRoom {
            room: RoomSnapshot {
                name: "abc".to_string(),
                max_participants: 4,
                members: vec![member(1, 1), member(2, 2)],
                level: Some("Room for 2".to_string()),
                entities: vec![EntitySnapshot {
                    entity: existing,
                    owner: ParticipantId(1),
                    kind: EntityKind::Player,
                    position: Position::new(0.0, 5.0, 0.0),
                    rotation: Rotation::IDENTITY,
                    state: Some(state.clone()),
                }],
            },
        });

        assert_eq!(signals.len(), 4);
        assert_eq!(signals[0], Signal::JoinedRoom);
        assert_eq!(
            signals[1],
            Signal::LevelLoaded {
                label: "Room for 2".to_string()
            }
        );
        assert!(matches!(signals[2], Signal::EntitySpawned { entity, .. } if entity == existing));
        assert_eq!(
            signals[3],
            Signal::EntityState {
                entity: existing,
                payload: state
            }
        );

        let room = transport.current_room().unwrap();
        assert_eq!(room.participant_count(), 2);
        assert_eq!(room.master(), Some(ParticipantId(1)));
        assert!(!transport.is_master());
    }

    #[test]
    fn test_membership_updates_projection_before_signal() {
        let mut transport = connected(1);
        transport.apply_packet(Packet::JoinedRoom {
            room: RoomSnapshot {
                name: "abc".to_string(),
                max_participants: 4,
                members: vec![member(1, 1)],
                level: None,
                entities: Vec::new(),
            },
        });

        transport.apply_packet(Packet::ParticipantEntered {
            participant: member(2, 2),
        });
        assert_eq!(transport.current_room().unwrap().participant_count(), 2);

        let signals = transport.apply_packet(Packet::ParticipantLeft {
            participant: member(2, 2),
        });
        assert_eq!(signals, vec![Signal::ParticipantLeft(member(2, 2))]);
        assert_eq!(transport.current_room().unwrap().participant_count(), 1);
        assert!(transport.is_master());
    }

    #[test]
    fn test_instantiate_allocates_from_own_range() {
        let mut transport = connected(7);
        assert_eq!(
            transport.instantiate(EntityKind::Player, Position::new(0.0, 0.0, 0.0), Rotation::IDENTITY),
            None
        );

        transport.apply_packet(Packet::JoinedRoom {
            room: RoomSnapshot {
                name: "abc".to_string(),
                max_participants: 4,
                members: vec![member(7, 1)],
                level: None,
                entities: Vec::new(),
            },
        });
        let first = transport
            .instantiate(EntityKind::Player, Position::new(0.0, 0.0, 0.0), Rotation::IDENTITY)
            .unwrap();
        let second = transport
            .instantiate(EntityKind::Player, Position::new(0.0, 0.0, 0.0), Rotation::IDENTITY)
            .unwrap();

        assert_eq!(first, EntityId(7001));
        assert_eq!(second, EntityId(7002));
        assert_eq!(first.creator(), ParticipantId(7));
        assert_eq!(transport.drain_outbound().len(), 2);
    }

    #[test]
    fn test_entity_sequence_restarts_in_next_room() {
        let mut transport = connected(7);
        let join = |transport: &mut PacketTransport| {
            transport.apply_packet(Packet::JoinedRoom {
                room: RoomSnapshot {
                    name: "abc".to_string(),
                    max_participants: 4,
                    members: vec![member(7, 1)],
                    level: None,
                    entities: Vec::new(),
                },
            });
        };
        let spawn = |transport: &mut PacketTransport| {
            transport
                .instantiate(EntityKind::Player, Position::new(0.0, 0.0, 0.0), Rotation::IDENTITY)
                .unwrap()
        };

        join(&mut transport);
        spawn(&mut transport);
        assert_eq!(spawn(&mut transport), EntityId(7002));

        transport.apply_packet(Packet::LeftRoom);
        join(&mut transport);
        assert_eq!(spawn(&mut transport), EntityId(7001));

        transport.apply_packet(Packet::Disconnected {
            reason: "timed out".to_string(),
        });
        transport.connect_using_settings();
        transport.apply_packet(Packet::Connected {
            participant_id: ParticipantId(7),
        });
        join(&mut transport);
        assert_eq!(spawn(&mut transport), EntityId(7001));
    }

    #[test]
    fn test_server_disconnect_resets_session() {
        let mut transport = connected(1);

        let signals = transport.apply_packet(Packet::Disconnected {
            reason: "timed out".to_string(),
        });

        assert_eq!(
            signals,
            vec![Signal::Disconnected {
                cause: "timed out".to_string()
            }]
        );
        assert!(!transport.is_connected());
        assert!(transport.current_room().is_none());
    }

    #[test]
    fn test_failures_become_signals() {
        let mut transport = connected(1);
        let signals = transport.apply_packet(Packet::JoinRandomFailed {
            code: codes::NO_RANDOM_MATCH_FOUND,
            message: "No match found".to_string(),
        });
        assert_eq!(
            signals,
            vec![Signal::JoinRandomFailed {
                code: codes::NO_RANDOM_MATCH_FOUND,
                message: "No match found".to_string()
            }]
        );

        assert!(transport.apply_packet(Packet::Heartbeat).is_empty());
    }

    #[tokio::test]
    async fn test_client_binds_and_loads_name() {
        let path = std::env::temp_dir().join(format!(
            "room-sync-client-test-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let prefs = FilePrefs::open(&path).unwrap();

        let client = Client::new(
            "127.0.0.1:8080",
            0,
            SessionConfig::default(),
            prefs,
            Some("Ada".to_string()),
        )
        .await
        .unwrap();

        assert_eq!(client.session.transport().nickname(), "Ada");
        assert_eq!(client.session.state(), SessionState::Idle);
        let _ = std::fs::remove_file(&path);
    }
}
