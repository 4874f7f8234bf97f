//! Protocol message definitions for client-server communication.
//!
//! Every message kind is a variant of a closed enum; dispatch is a `match`
//! on the decoded value. Hot-path messages (commands, snapshots, acks) use
//! fixed little-endian layouts, control messages use postcard.

use crate::snapshot::SnapshotPacket;
use ghostnet_core::{Command, GhostId, SimTick};
use serde::{Deserialize, Serialize};

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u16 = 1;

/// Application protocol name negotiated by QUIC.
pub const ALPN_PROTOCOL: &[u8] = b"ghostnet";

/// Maximum frame length (kind byte plus payload).
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Maximum disconnect/rejection reason length (bytes).
pub const MAX_REASON_LEN: usize = 256;

/// Wire tag of every message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Client protocol hello.
    Hello = 0,
    /// Client join request.
    JoinRequest = 1,
    /// Client command for one tick.
    Command = 2,
    /// Client acknowledgement of a snapshot tick.
    SnapshotAck = 3,
    /// Either side closing the session.
    Disconnect = 4,
    /// Server reply to hello.
    HelloAck = 16,
    /// Server accepted the join and spawned a ghost.
    JoinAccepted = 17,
    /// Server snapshot packet.
    Snapshot = 18,
    /// Server removed a ghost.
    GhostDespawn = 19,
}

impl MessageKind {
    /// Every kind in tag order.
    pub const ALL: [MessageKind; 9] = [
        MessageKind::Hello,
        MessageKind::JoinRequest,
        MessageKind::Command,
        MessageKind::SnapshotAck,
        MessageKind::Disconnect,
        MessageKind::HelloAck,
        MessageKind::JoinAccepted,
        MessageKind::Snapshot,
        MessageKind::GhostDespawn,
    ];

    /// Stable name used in logs and the schema hash.
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Hello => "Hello",
            MessageKind::JoinRequest => "JoinRequest",
            MessageKind::Command => "Command",
            MessageKind::SnapshotAck => "SnapshotAck",
            MessageKind::Disconnect => "Disconnect",
            MessageKind::HelloAck => "HelloAck",
            MessageKind::JoinAccepted => "JoinAccepted",
            MessageKind::Snapshot => "Snapshot",
            MessageKind::GhostDespawn => "GhostDespawn",
        }
    }

    /// Whether this kind travels on a reliable stream.
    pub fn is_reliable(self) -> bool {
        !matches!(self, MessageKind::Snapshot | MessageKind::SnapshotAck)
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| *kind as u8 == value)
            .ok_or(value)
    }
}

/// Protocol hello sent before joining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Client protocol version.
    pub version: u16,
    /// Client schema hash.
    pub schema_hash: u64,
}

/// Server answer to [`Hello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloAck {
    /// Whether the client may proceed.
    pub accepted: bool,
    /// Rejection reason.
    pub reason: Option<String>,
}

/// Server confirmation that the join spawned a ghost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinAccepted {
    /// Ghost controlled by the client.
    pub ghost_id: GhostId,
    /// Server tick at the time of the spawn.
    pub server_tick: SimTick,
}

/// Session close notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnect {
    /// Human-readable reason.
    pub reason: String,
}

/// Ghost removal notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhostDespawn {
    /// Removed ghost.
    pub ghost_id: GhostId,
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Protocol hello.
    Hello(Hello),
    /// Request to spawn and bind a controlled ghost.
    JoinRequest {
        /// Opaque request value.
        value: i32,
    },
    /// Input for one tick.
    Command(Command),
    /// Acknowledges a fully decoded snapshot.
    SnapshotAck {
        /// Tick of the acknowledged packet.
        tick: SimTick,
    },
    /// Client disconnect notification.
    Disconnect(Disconnect),
}

impl ClientMessage {
    /// Wire kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            ClientMessage::Hello(_) => MessageKind::Hello,
            ClientMessage::JoinRequest { .. } => MessageKind::JoinRequest,
            ClientMessage::Command(_) => MessageKind::Command,
            ClientMessage::SnapshotAck { .. } => MessageKind::SnapshotAck,
            ClientMessage::Disconnect(_) => MessageKind::Disconnect,
        }
    }

    /// Validate field ranges after decoding.
    pub fn verify(&self) -> Result<(), &'static str> {
        match self {
            ClientMessage::Command(command) => command.verify(),
            ClientMessage::Disconnect(disconnect) if disconnect.reason.len() > MAX_REASON_LEN => {
                Err("Disconnect reason too long")
            }
            _ => Ok(()),
        }
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Answer to the client hello.
    HelloAck(HelloAck),
    /// Join processed and ghost spawned.
    JoinAccepted(JoinAccepted),
    /// Ghost state for one tick.
    Snapshot(SnapshotPacket),
    /// Ghost removed.
    GhostDespawn(GhostDespawn),
    /// Server disconnect notification.
    Disconnect(Disconnect),
}

impl ServerMessage {
    /// Wire kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::HelloAck(_) => MessageKind::HelloAck,
            ServerMessage::JoinAccepted(_) => MessageKind::JoinAccepted,
            ServerMessage::Snapshot(_) => MessageKind::Snapshot,
            ServerMessage::GhostDespawn(_) => MessageKind::GhostDespawn,
            ServerMessage::Disconnect(_) => MessageKind::Disconnect,
        }
    }

    /// Validate field ranges after decoding.
    pub fn verify(&self) -> Result<(), &'static str> {
        match self {
            ServerMessage::HelloAck(HelloAck {
                reason: Some(reason),
                ..
            }) if reason.len() > MAX_REASON_LEN => Err("Rejection reason too long"),
            ServerMessage::Disconnect(disconnect) if disconnect.reason.len() > MAX_REASON_LEN => {
                Err("Disconnect reason too long")
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_roundtrip() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::try_from(kind as u8), Ok(kind));
        }
        assert_eq!(MessageKind::try_from(5), Err(5));
        assert_eq!(MessageKind::try_from(255), Err(255));
    }

    #[test]
    fn only_snapshots_and_acks_are_unreliable() {
        let unreliable: Vec<_> = MessageKind::ALL
            .into_iter()
            .filter(|kind| !kind.is_reliable())
            .collect();
        assert_eq!(unreliable, vec![MessageKind::SnapshotAck, MessageKind::Snapshot]);
    }

    #[test]
    fn verify_rejects_out_of_range_command() {
        let msg = ClientMessage::Command(Command {
            tick: SimTick(4),
            horizontal: 2,
            vertical: 0,
        });
        assert!(msg.verify().is_err());
        let ok = ClientMessage::Command(Command::neutral(SimTick(4)));
        assert!(ok.verify().is_ok());
    }

    #[test]
    fn verify_rejects_long_reasons() {
        let reason = "x".repeat(MAX_REASON_LEN + 1);
        assert!(ClientMessage::Disconnect(Disconnect {
            reason: reason.clone()
        })
        .verify()
        .is_err());
        assert!(ServerMessage::HelloAck(HelloAck {
            accepted: false,
            reason: Some(reason),
        })
        .verify()
        .is_err());
    }
}
