#![warn(missing_docs)]
//! Authoritative replication server.
//!
//! [`ServerSim`] owns the deterministic tick loop and is driven either by
//! [`MultiplayerServer`] over QUIC or directly by tests.

pub mod ghosts;
pub mod multiplayer;
pub mod sim;

pub use ghosts::{Ghost, GhostArena};
pub use multiplayer::MultiplayerServer;
pub use sim::{Outgoing, ServerConfig, ServerInbound, ServerSim};
