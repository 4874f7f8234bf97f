#![warn(missing_docs)]
//! Replication protocol shared by the client and server.
//!
//! The tick-level pieces (command buffering, ghost serialization, snapshot
//! scheduling, prediction, the join handshake) are transport-agnostic; the
//! QUIC layer in [`transport`], [`channel`] and [`connection`] carries their
//! encoded messages.

pub mod channel;
pub mod codec;
pub mod command;
pub mod connection;
pub mod ghost;
pub mod handshake;
pub mod prediction;
pub mod protocol;
pub mod scheduler;
pub mod snapshot;
pub mod transport;
pub mod wire;

pub use channel::{ChannelManager, ChannelType};
pub use codec::{
    compute_schema_hash, decode_client_message, decode_server_message, encode_client_message,
    encode_server_message,
};
pub use command::{
    decode_command, encode_command, CommandBuffer, CommandStream, InputSource, NeutralInput,
    ScriptedInput, DEFAULT_COMMAND_WINDOW,
};
pub use connection::{ClientConnection, ServerConnection};
pub use ghost::{CubeGhostSerializer, GhostRegistry, GhostSerializer, GhostState};
pub use handshake::{
    ClientSession, ClientSessionState, JoinOutcome, JoinRequest, SessionState, SessionTable,
};
pub use prediction::{PredictedGhost, PredictionMetrics, PredictionPhase, ReconcileOutcome};
pub use protocol::{
    ClientMessage, Disconnect, GhostDespawn, Hello, HelloAck, JoinAccepted, MessageKind,
    ServerMessage, PROTOCOL_VERSION,
};
pub use scheduler::{
    ConnectionReplication, ReplicatedGhost, ScheduledSnapshot, DEFAULT_SNAPSHOT_BUDGET,
};
pub use snapshot::{
    DecodedGhost, DecodedSnapshot, SnapshotHistory, SnapshotPacket, SnapshotReceiver,
    DEFAULT_SNAPSHOT_HISTORY,
};
pub use transport::{ClientEndpoint, ServerEndpoint, TransportSettings};
pub use wire::{WireError, WireReader, WireResult, WireWriter};
