//! Message encoding and decoding with framing.
//!
//! Frame format: `[length: u32][kind: u8][payload]`, where `length` counts
//! the kind byte and the payload. One frame travels per reliable stream or
//! per datagram.

use crate::command::{read_command, write_command, COMMAND_PAYLOAD_SIZE};
use crate::ghost::GhostRegistry;
use crate::protocol::{
    ClientMessage, MessageKind, ServerMessage, ALPN_PROTOCOL, MAX_FRAME_LEN, PROTOCOL_VERSION,
};
use crate::snapshot::SnapshotPacket;
use crate::wire::{WireError, WireReader, WireResult, WireWriter};
use ghostnet_core::SimTick;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Bytes before the payload: length prefix and kind.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Encoded size of a command frame.
pub const COMMAND_FRAME_SIZE: usize = FRAME_HEADER_SIZE + 4 + COMMAND_PAYLOAD_SIZE;

/// Compute schema hash from the protocol definition and registered ghost types.
///
/// Client and server must agree on this value before joining.
pub fn compute_schema_hash(registry: &GhostRegistry) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&PROTOCOL_VERSION.to_le_bytes());
    hasher.update(ALPN_PROTOCOL);
    for kind in MessageKind::ALL {
        hasher.update(&[kind as u8]);
        hasher.update(kind.name().as_bytes());
    }
    for (index, name) in registry.names().enumerate() {
        hasher.update(&(index as u32).to_le_bytes());
        hasher.update(name.as_bytes());
    }

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Encode a client message into one frame.
pub fn encode_client_message(msg: &ClientMessage) -> WireResult<Vec<u8>> {
    let mut payload = WireWriter::new();
    match msg {
        ClientMessage::Hello(hello) => write_postcard(&mut payload, hello)?,
        ClientMessage::JoinRequest { value } => payload.write_i32(*value),
        ClientMessage::Command(command) => {
            payload.write_u32(command.tick.0);
            write_command(command, &mut payload);
        }
        ClientMessage::SnapshotAck { tick } => payload.write_u32(tick.0),
        ClientMessage::Disconnect(disconnect) => write_postcard(&mut payload, disconnect)?,
    }
    frame(msg.kind(), payload.as_slice())
}

/// Encode a server message into one frame.
pub fn encode_server_message(msg: &ServerMessage) -> WireResult<Vec<u8>> {
    let mut payload = WireWriter::new();
    match msg {
        ServerMessage::HelloAck(ack) => write_postcard(&mut payload, ack)?,
        ServerMessage::JoinAccepted(accepted) => write_postcard(&mut payload, accepted)?,
        ServerMessage::Snapshot(packet) => {
            payload.write_u32(packet.tick.0);
            payload.write_bytes(&packet.records);
        }
        ServerMessage::GhostDespawn(despawn) => write_postcard(&mut payload, despawn)?,
        ServerMessage::Disconnect(disconnect) => write_postcard(&mut payload, disconnect)?,
    }
    frame(msg.kind(), payload.as_slice())
}

/// Decode one client frame.
pub fn decode_client_message(data: &[u8]) -> WireResult<ClientMessage> {
    let (kind, payload) = unframe(data)?;
    let mut reader = WireReader::new(payload);
    let msg = match kind {
        MessageKind::Hello => ClientMessage::Hello(read_postcard(&mut reader)?),
        MessageKind::JoinRequest => ClientMessage::JoinRequest {
            value: reader.read_i32()?,
        },
        MessageKind::Command => {
            let tick = SimTick(reader.read_u32()?);
            ClientMessage::Command(read_command(&mut reader, tick)?)
        }
        MessageKind::SnapshotAck => ClientMessage::SnapshotAck {
            tick: SimTick(reader.read_u32()?),
        },
        MessageKind::Disconnect => ClientMessage::Disconnect(read_postcard(&mut reader)?),
        other => return Err(WireError::UnknownMessageKind(other as u8)),
    };
    reader.finish()?;
    msg.verify().map_err(WireError::InvalidValue)?;
    Ok(msg)
}

/// Decode one server frame.
pub fn decode_server_message(data: &[u8]) -> WireResult<ServerMessage> {
    let (kind, payload) = unframe(data)?;
    let mut reader = WireReader::new(payload);
    let msg = match kind {
        MessageKind::HelloAck => ServerMessage::HelloAck(read_postcard(&mut reader)?),
        MessageKind::JoinAccepted => ServerMessage::JoinAccepted(read_postcard(&mut reader)?),
        MessageKind::Snapshot => {
            let tick = SimTick(reader.read_u32()?);
            ServerMessage::Snapshot(SnapshotPacket {
                tick,
                records: reader.read_rest().to_vec(),
            })
        }
        MessageKind::GhostDespawn => ServerMessage::GhostDespawn(read_postcard(&mut reader)?),
        MessageKind::Disconnect => ServerMessage::Disconnect(read_postcard(&mut reader)?),
        other => return Err(WireError::UnknownMessageKind(other as u8)),
    };
    reader.finish()?;
    msg.verify().map_err(WireError::InvalidValue)?;
    Ok(msg)
}

/// Kind of a frame without decoding its payload.
pub fn peek_kind(data: &[u8]) -> WireResult<MessageKind> {
    unframe(data).map(|(kind, _)| kind)
}

fn frame(kind: MessageKind, payload: &[u8]) -> WireResult<Vec<u8>> {
    let length = 1 + payload.len();
    if length > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(length));
    }
    let mut frame = WireWriter::with_capacity(4 + length);
    frame.write_u32(length as u32);
    frame.write_u8(kind as u8);
    frame.write_bytes(payload);
    Ok(frame.into_inner())
}

fn unframe(data: &[u8]) -> WireResult<(MessageKind, &[u8])> {
    let mut reader = WireReader::new(data);
    let length = reader.read_u32()? as usize;
    if length > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(length));
    }
    if length == 0 {
        return Err(WireError::InvalidValue("Empty frame"));
    }
    let body = reader.read_bytes(length)?;
    reader.finish()?;

    let tag = body[0];
    let kind = MessageKind::try_from(tag).map_err(WireError::UnknownMessageKind)?;
    Ok((kind, &body[1..]))
}

fn write_postcard<T: Serialize>(writer: &mut WireWriter, value: &T) -> WireResult<()> {
    writer.write_bytes(&postcard::to_allocvec(value)?);
    Ok(())
}

fn read_postcard<T: DeserializeOwned>(reader: &mut WireReader<'_>) -> WireResult<T> {
    let bytes = reader.read_rest();
    let (value, rest) = postcard::take_from_bytes(bytes)?;
    if !rest.is_empty() {
        return Err(WireError::TrailingBytes(rest.len()));
    }
    Ok(value)
}
