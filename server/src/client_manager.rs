//! Connected participant tracking for the matchmaking server
//!
//! This module handles the server-side bookkeeping of network peers:
//! - Participant id assignment on connect
//! - Address lookup for routing inbound packets and outbound replies
//! - Connection health monitoring and timeout cleanup
//! - Server capacity enforcement
//!
//! Room membership lives in the matchmaker; this table only knows who is
//! connected and where to reach them.

use log::info;
use shared::ParticipantId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected peer
#[derive(Debug)]
pub struct Client {
    /// Participant id assigned by the server
    pub id: ParticipantId,
    /// Network address replies are sent to
    pub addr: SocketAddr,
    /// Name announced in the handshake
    pub nickname: String,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(id: ParticipantId, addr: SocketAddr, nickname: &str) -> Self {
        Self {
            id,
            addr,
            nickname: nickname.to_string(),
            last_seen: Instant::now(),
        }
    }

    /// Marks the client as alive. Any packet counts, heartbeats included.
    pub fn refresh_last_seen(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing was received within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients
///
/// Ids start at 1 and are never reused while the server runs, so entity
/// id blocks derived from them stay unique too.
pub struct ClientManager {
    /// Connected clients indexed by their participant id
    clients: HashMap<ParticipantId, Client>,
    /// Next id handed out on connect
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
    /// Silence after which a client is dropped
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns the assigned id, or None if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr, nickname: &str) -> Option<ParticipantId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let id = ParticipantId(self.next_client_id);
        self.next_client_id += 1;

        info!("Client {} ('{}') connected from {}", id, nickname, addr);
        self.clients.insert(id, Client::new(id, addr, nickname));

        Some(id)
    }

    /// Removes a client. Returns false if it was already gone.
    pub fn remove_client(&mut self, id: &ParticipantId) -> bool {
        if let Some(client) = self.clients.remove(id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    /// Finds the client connected from `addr`.
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ParticipantId> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.id)
    }

    pub fn addr_of(&self, id: ParticipantId) -> Option<SocketAddr> {
        self.clients.get(&id).map(|client| client.addr)
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// Refreshes the activity timestamp. Returns false for unknown ids.
    pub fn touch(&mut self, id: ParticipantId) -> bool {
        match self.clients.get_mut(&id) {
            Some(client) => {
                client.refresh_last_seen();
                true
            }
            None => false,
        }
    }

    pub fn set_nickname(&mut self, id: ParticipantId, nickname: &str) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.nickname = nickname.to_string();
        }
    }

    /// Checks for and removes timed-out clients
    ///
    /// Returns the removed ids so their rooms can be cleaned up.
    pub fn check_timeouts(&mut self) -> Vec<ParticipantId> {
        let timeout = self.timeout;
        let mut timed_out: Vec<ParticipantId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.id)
            .collect();
        timed_out.sort();

        for id in &timed_out {
            self.remove_client(id);
        }

        timed_out
    }

    /// All client ids with their addresses.
    pub fn get_client_addrs(&self) -> Vec<(ParticipantId, SocketAddr)> {
        self.clients
            .values()
            .map(|client| (client.id, client.addr))
            .collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
