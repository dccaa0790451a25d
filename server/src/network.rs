//! Server network layer handling UDP communications and the relay tick

use crate::client_manager::ClientManager;
use crate::matchmaker::{Matchmaker, MatchmakerSettings, Outbound};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, ParticipantId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        participant: ParticipantId,
    },
}

/// Reason sent to peers the server no longer knows, usually after a timeout.
pub const UNKNOWN_CLIENT_REASON: &str = "Not connected (timed out?), reconnect";

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    /// Reply to a raw address, for peers that never got an id.
    SendPacket { packet: Packet, addr: SocketAddr },
    /// Deliver to a registered participant.
    SendTo { packet: Packet, to: ParticipantId },
}

pub struct ServerConfig {
    pub tick_duration: Duration,
    pub max_clients: usize,
    pub client_timeout: Duration,
    pub matchmaker: MatchmakerSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_millis(33),
            max_clients: 64,
            client_timeout: Duration::from_secs(5),
            matchmaker: MatchmakerSettings::default(),
        }
    }
}

/// Matchmaking server: UDP front end around a [`Matchmaker`]
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    matchmaker: Matchmaker,
    tick_duration: Duration,
    tick: u64,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(addr: &str, config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.client_timeout,
            ))),
            matchmaker: Matchmaker::new(config.matchmaker),
            tick_duration: config.tick_duration,
            tick: 0,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::SendTo { packet, to } => {
                        let addr = {
                            let clients_guard = clients.read().await;
                            clients_guard.addr_of(to)
                        };

                        let Some(addr) = addr else {
                            debug!("Dropping packet for departed client {}", to);
                            continue;
                        };
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send to client {}: {}", to, e);
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for participant in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { participant }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn deliver(&self, outbound: Vec<Outbound>) {
        for Outbound { to, packet } in outbound {
            if let Err(e) = self.game_tx.send(GameMessage::SendTo { packet, to }) {
                error!("Failed to queue packet for {}: {}", to, e);
            }
        }
    }

    /// Resolves the sender and hands the packet to the matchmaker
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if let Packet::Connect {
            client_version,
            nickname,
        } = &packet
        {
            info!(
                "Client connecting from {} (version: {})",
                addr, client_version
            );

            // Remove existing connection if present
            let existing = {
                let clients = self.clients.read().await;
                clients.find_client_by_addr(addr)
            };
            if let Some(existing) = existing {
                info!("Removing existing client {} from {}", existing, addr);
                let outbound = self.matchmaker.disconnect(existing);
                self.deliver(outbound);
                self.clients.write().await.remove_client(&existing);
            }

            let participant = {
                let mut clients = self.clients.write().await;
                clients.add_client(addr, nickname)
            };

            let Some(participant) = participant else {
                self.send_packet(
                    Packet::Disconnected {
                        reason: "Server full".to_string(),
                    },
                    addr,
                );
                return;
            };

            let outbound = self
                .matchmaker
                .connect(participant, *client_version, nickname);
            if self.matchmaker.is_registered(participant) {
                self.deliver(outbound);
            } else {
                // Rejected handshakes are answered by address, the id is gone.
                self.clients.write().await.remove_client(&participant);
                for Outbound { packet, .. } in outbound {
                    self.send_packet(packet, addr);
                }
            }
            return;
        }

        let participant = {
            let mut clients = self.clients.write().await;
            let participant = clients.find_client_by_addr(addr);
            if let Some(participant) = participant {
                clients.touch(participant);
                if let Packet::SetNickname { nickname } = &packet {
                    clients.set_nickname(participant, nickname);
                }
            }
            participant
        };

        let Some(participant) = participant else {
            warn!("Packet from unknown client at {}", addr);
            // Timed-out peers are told to reconnect.
            if !matches!(packet, Packet::Disconnect) {
                self.send_packet(
                    Packet::Disconnected {
                        reason: UNKNOWN_CLIENT_REASON.to_string(),
                    },
                    addr,
                );
            }
            return;
        };

        let disconnecting = matches!(packet, Packet::Disconnect);
        let outbound = self.matchmaker.handle_packet(participant, packet);
        self.deliver(outbound);

        if disconnecting {
            self.clients.write().await.remove_client(&participant);
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.tick_duration);

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { participant }) => {
                            info!("Client {} timed out", participant);
                            let outbound = self.matchmaker.disconnect(participant);
                            self.deliver(outbound);
                        },
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Relay replicated state once per tick
                _ = tick_interval.tick() => {
                    self.tick += 1;
                    let outbound = self.matchmaker.flush_tick();
                    self.deliver(outbound);

                    if self.tick % 300 == 0 {
                        let client_count = {
                            let clients = self.clients.read().await;
                            clients.len()
                        };

                        if client_count > 0 {
                            debug!("Tick {}: {} clients, {} rooms",
                                   self.tick, client_count, self.matchmaker.rooms().len());
                        }
                    }
                },
            }
        }

        Ok(())
    }
}
