#![warn(missing_docs)]
//! Predicted replication client.
//!
//! [`ClientSim`] owns the join handshake, snapshot decoding and prediction
//! of the controlled ghost; [`MultiplayerClient`] feeds it over QUIC.

pub mod multiplayer;
pub mod sim;

pub use multiplayer::MultiplayerClient;
pub use sim::{ClientConfig, ClientSim, DEFAULT_INPUT_LEAD_TICKS};
