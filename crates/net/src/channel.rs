//! Channel multiplexing for different message kinds over QUIC.
//!
//! Reliable channels open one unidirectional stream per message; the
//! unreliable channel uses datagrams. Every payload is prefixed with its
//! channel byte.

use crate::protocol::{MessageKind, MAX_FRAME_LEN};
use crate::wire::WireError;
use anyhow::{Context, Result};
use quinn::{Connection, ReadError, ReadToEndError};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Channel type identifier for message routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelType {
    /// Hello, join, despawn and disconnect messages (reliable).
    Session = 0,
    /// Per-tick commands (reliable).
    Command = 1,
    /// Snapshots and their acks (unreliable).
    Snapshot = 2,
}

impl ChannelType {
    /// Channel carrying messages of `kind`.
    pub fn for_kind(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Command => ChannelType::Command,
            MessageKind::Snapshot | MessageKind::SnapshotAck => ChannelType::Snapshot,
            MessageKind::Hello
            | MessageKind::JoinRequest
            | MessageKind::Disconnect
            | MessageKind::HelloAck
            | MessageKind::JoinAccepted
            | MessageKind::GhostDespawn => ChannelType::Session,
        }
    }

    /// Check if this channel type should use reliable delivery.
    pub fn is_reliable(&self) -> bool {
        !self.is_unreliable()
    }

    /// Check if this channel type should use unreliable delivery.
    pub fn is_unreliable(&self) -> bool {
        matches!(self, ChannelType::Snapshot)
    }
}

impl TryFrom<u8> for ChannelType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(ChannelType::Session),
            1 => Ok(ChannelType::Command),
            2 => Ok(ChannelType::Snapshot),
            _ => Err(WireError::InvalidValue("channel type")),
        }
    }
}

/// Split the channel byte off a received payload.
///
/// Framing faults are `WireError`s so readers drop the payload and keep the
/// connection.
fn split_channel(bytes: &[u8]) -> Result<(ChannelType, &[u8]), WireError> {
    let (&channel_byte, data) = bytes
        .split_first()
        .ok_or(WireError::InvalidValue("empty channel payload"))?;
    Ok((ChannelType::try_from(channel_byte)?, data))
}

/// Multiplexed channel manager for QUIC connections.
#[derive(Clone)]
pub struct ChannelManager {
    connection: Connection,
}

impl ChannelManager {
    /// Create a new channel manager for the given connection.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Send a message on a reliable channel (QUIC stream).
    ///
    /// Opens a new unidirectional stream for each message.
    pub async fn send_reliable(&self, channel: ChannelType, data: &[u8]) -> Result<()> {
        debug_assert!(
            channel.is_reliable(),
            "Channel {:?} is not reliable",
            channel
        );

        let mut send_stream = self
            .connection
            .open_uni()
            .await
            .context("Failed to open unidirectional stream")?;

        send_stream
            .write_all(&[channel as u8])
            .await
            .context("Failed to write channel type")?;
        send_stream
            .write_all(data)
            .await
            .context("Failed to write data")?;
        send_stream.finish().context("Failed to finish stream")?;

        trace!("Sent {} bytes on reliable {:?}", data.len(), channel);
        Ok(())
    }

    /// Send a message on an unreliable channel (QUIC datagram).
    pub fn send_unreliable(&self, channel: ChannelType, data: &[u8]) -> Result<()> {
        debug_assert!(
            channel.is_unreliable(),
            "Channel {:?} is not unreliable",
            channel
        );

        let mut datagram = Vec::with_capacity(1 + data.len());
        datagram.push(channel as u8);
        datagram.extend_from_slice(data);

        self.connection
            .send_datagram(datagram.into())
            .context("Failed to send datagram")?;

        trace!("Sent {} bytes on unreliable {:?}", data.len(), channel);
        Ok(())
    }

    /// Receive the next message on a reliable channel (QUIC stream).
    ///
    /// Returns the channel type and message data.
    pub async fn recv_reliable(&self) -> Result<(ChannelType, Vec<u8>)> {
        let mut recv_stream = self
            .connection
            .accept_uni()
            .await
            .context("Failed to accept unidirectional stream")?;

        // Channel byte plus a length-prefixed frame.
        let limit = 1 + 4 + MAX_FRAME_LEN;
        let bytes = match recv_stream.read_to_end(limit).await {
            Ok(bytes) => bytes,
            Err(ReadToEndError::TooLong) => return Err(WireError::FrameTooLarge(limit).into()),
            Err(ReadToEndError::Read(ReadError::Reset(code))) => {
                debug!(%code, "Peer reset a reliable stream");
                return Err(WireError::InvalidValue("stream reset by peer").into());
            }
            Err(e) => return Err(e).context("Failed to read stream"),
        };

        let (channel, data) = split_channel(&bytes)?;

        trace!("Received {} bytes on reliable {:?}", data.len(), channel);
        Ok((channel, data.to_vec()))
    }

    /// Receive the next message on an unreliable channel (QUIC datagram).
    ///
    /// Returns the channel type and message data.
    pub async fn recv_unreliable(&self) -> Result<(ChannelType, Vec<u8>)> {
        let datagram = self
            .connection
            .read_datagram()
            .await
            .context("Failed to read datagram")?;

        let (channel, data) = split_channel(&datagram)?;

        trace!("Received {} bytes on unreliable {:?}", data.len(), channel);
        Ok((channel, data.to_vec()))
    }

    /// Largest datagram the path currently allows, if datagrams are supported.
    pub fn max_datagram_size(&self) -> Option<usize> {
        self.connection.max_datagram_size()
    }

    /// Get the remote address of this connection.
    pub fn remote_address(&self) -> std::net::SocketAddr {
        self.connection.remote_address()
    }

    /// Close the connection gracefully.
    pub fn close(&self, reason: &str) {
        self.connection.close(0u32.into(), reason.as_bytes());
    }
}
