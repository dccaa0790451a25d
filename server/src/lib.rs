//! # Matchmaking Server Library
//!
//! This library provides the matchmaking and relay service the room clients
//! connect to. It assigns participant ids, groups participants into rooms,
//! and relays level loads, spawns, ownership changes and replicated entity
//! state between room members.
//!
//! ## Core Responsibilities
//!
//! ### Matchmaking
//! A connected participant either joins a random room with free seats or
//! creates a room of its own with a requested capacity. Failures are
//! reported with the numeric codes in [`shared::codes`].
//!
//! ### Room Relay
//! The server does not simulate anything. Each replicated entity belongs
//! to exactly one participant; only that owner's state updates are
//! accepted and forwarded to the other members once per tick.
//!
//! ### Client Management
//! Handles the lifecycle of network peers:
//! - Id assignment on handshake
//! - Address lookup for routing
//! - Timeout detection and room cleanup
//!
//! ## Module Organization
//!
//! - `client_manager`: connected peers, their addresses and liveness
//! - `room`: a single room's membership, level and entities
//! - `matchmaker`: packet handling without any socket, returning addressed replies
//! - `network`: UDP tasks and the tick loop driving the matchmaker
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         tick_duration: Duration::from_millis(33),
//!         ..ServerConfig::default()
//!     };
//!     let mut server = Server::new("127.0.0.1:8080", config).await?;
//!
//!     // Receives packets, relays state every tick, drops silent clients
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! The server runs three internal tasks next to the main loop:
//! - **Network Receiver**: decodes incoming datagrams
//! - **Network Sender**: resolves participant ids to addresses and sends
//! - **Timeout Checker**: removes clients that went silent

pub mod client_manager;
pub mod matchmaker;
pub mod network;
pub mod room;
