//! # Room Session Client Library
//!
//! Client side of the room session protocol: how a participant finds a
//! room, agrees with everyone else on who the master is, and keeps the
//! state of every entity consistent with its single owner.
//!
//! ## Architecture Overview
//!
//! The core is sans-IO. It talks to the networking substrate only through
//! the [`transport::Transport`] trait and reacts to [`transport::Signal`]s
//! the substrate raises. Everything runs on one task, driven by signals
//! and a fixed-rate tick.
//!
//! ### Session Lifecycle
//! [`session::SessionCoordinator`] walks `Idle -> Connecting ->
//! ConnectedNoRoom -> JoiningRoom -> InRoom -> LeavingRoom -> Idle`. A
//! failed random join falls back to creating a room, exactly once.
//!
//! ### Authority
//! The master is never elected. Each participant computes it from the room
//! membership as the earliest joiner still present, so promotion on leave
//! is deterministic. Only the master broadcasts level changes
//! ([`authority::AuthorityManager`]).
//!
//! ### Ownership and Replication
//! Every entity has exactly one owner ([`ownership::OwnershipRegistry`]).
//! The owner streams a fixed `(flag, health)` tuple each tick; everyone
//! else overwrites a read-only mirror ([`sync::StateSynchronizer`]).
//!
//! ### Entity Lifecycle
//! The local primary entity is spawned once per session and survives level
//! transitions; after each transition it is moved back to the safe spawn
//! point if it is left with no ground below ([`lifecycle::LifecycleManager`]).
//!
//! ## Module Organization
//!
//! - `transport`: adapter trait, signals, named session callbacks
//! - `session`, `authority`, `ownership`, `sync`, `lifecycle`: the core
//! - `level`: level context and ground probe
//! - `context`: wires the core for one session
//! - `input`, `console`: edge detection and console commands
//! - `prefs`: persisted player name
//! - `network`: packet transport and the UDP console client
//!
//! ## Usage Example
//!
//! ```rust
//! use client::context::{SessionConfig, SessionContext};
//! use client::input::TickInput;
//! use client::network::PacketTransport;
//! use client::session::SessionState;
//!
//! let mut session = SessionContext::new(PacketTransport::new("Ada"), SessionConfig::default())
//!     .expect("default configuration is valid");
//!
//! // Queue the handshake; the socket loop sends what the transport drained.
//! session.connect();
//! let outbound = session.transport_mut().drain_outbound();
//! assert_eq!(outbound.len(), 1);
//! assert_eq!(session.state(), SessionState::Connecting);
//!
//! // Packets from the server become signals for the session.
//! // let signals = session.transport_mut().apply_packet(packet);
//! // session.handle_signals(signals);
//!
//! // Nothing is streamed until we are in a room.
//! assert_eq!(session.tick(TickInput::default()), 0);
//! ```

pub mod authority;
pub mod console;
pub mod context;
pub mod error;
pub mod input;
pub mod level;
pub mod lifecycle;
pub mod network;
pub mod ownership;
pub mod prefs;
pub mod session;
pub mod sync;
pub mod transport;
