//! High-level connection management integrating transport, channels, and protocol.
//!
//! Provides a unified interface for sending/receiving typed messages.

use crate::channel::{ChannelManager, ChannelType};
use crate::codec::{
    compute_schema_hash, decode_client_message, decode_server_message, encode_client_message,
    encode_server_message,
};
use crate::ghost::GhostRegistry;
use crate::protocol::{ClientMessage, Hello, HelloAck, ServerMessage, PROTOCOL_VERSION};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// Client-side connection wrapping QUIC transport and protocol handling.
#[derive(Clone)]
pub struct ClientConnection {
    channel_manager: ChannelManager,
    schema_hash: u64,
}

impl ClientConnection {
    /// Create a new client connection from a QUIC connection.
    pub fn new(connection: quinn::Connection, registry: &GhostRegistry) -> Self {
        Self {
            channel_manager: ChannelManager::new(connection),
            schema_hash: compute_schema_hash(registry),
        }
    }

    /// Exchange protocol hellos with the server.
    pub async fn hello(&self) -> Result<()> {
        info!("Sending hello to {}", self.remote_address());

        self.send(ClientMessage::Hello(Hello {
            version: PROTOCOL_VERSION,
            schema_hash: self.schema_hash,
        }))
        .await?;

        match self.recv_reliable().await? {
            ServerMessage::HelloAck(HelloAck { accepted: true, .. }) => {
                info!("Hello accepted");
                Ok(())
            }
            ServerMessage::HelloAck(HelloAck { reason, .. }) => {
                let reason = reason.unwrap_or_else(|| "Unknown reason".to_string());
                Err(anyhow::anyhow!("Hello rejected: {}", reason))
            }
            msg => Err(anyhow::anyhow!("Expected HelloAck, got {:?}", msg.kind())),
        }
    }

    /// Send a client message on the appropriate channel.
    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        let channel = ChannelType::for_kind(msg.kind());
        let data = encode_client_message(&msg).context("Failed to encode client message")?;

        if channel.is_reliable() {
            self.channel_manager.send_reliable(channel, &data).await
        } else {
            self.channel_manager.send_unreliable(channel, &data)
        }
    }

    /// Receive the next server message on reliable channels.
    pub async fn recv_reliable(&self) -> Result<ServerMessage> {
        let (_channel, data) = self.channel_manager.recv_reliable().await?;
        decode_server_message(&data).context("Failed to decode server message")
    }

    /// Receive the next server message on unreliable channels.
    pub async fn recv_unreliable(&self) -> Result<ServerMessage> {
        let (_channel, data) = self.channel_manager.recv_unreliable().await?;
        decode_server_message(&data).context("Failed to decode server message")
    }

    /// Schema hash sent in the hello.
    pub fn schema_hash(&self) -> u64 {
        self.schema_hash
    }

    /// Get the remote server address.
    pub fn remote_address(&self) -> SocketAddr {
        self.channel_manager.remote_address()
    }

    /// Close the connection gracefully.
    pub fn close(&self, reason: &str) {
        info!("Closing connection: {}", reason);
        self.channel_manager.close(reason);
    }
}

/// Server-side connection wrapping QUIC transport and protocol handling.
#[derive(Clone)]
pub struct ServerConnection {
    channel_manager: ChannelManager,
    schema_hash: u64,
}

impl ServerConnection {
    /// Create a new server connection from a QUIC connection.
    pub fn new(connection: quinn::Connection, registry: &GhostRegistry) -> Self {
        Self {
            channel_manager: ChannelManager::new(connection),
            schema_hash: compute_schema_hash(registry),
        }
    }

    /// Wait for and validate the client hello, answering with a [`HelloAck`].
    pub async fn accept_hello(&self) -> Result<()> {
        debug!("Waiting for hello from {}", self.remote_address());

        let hello = match self.recv_reliable().await? {
            ClientMessage::Hello(hello) => hello,
            msg => {
                warn!("Expected Hello, got {:?}", msg.kind());
                self.reject("Expected hello message").await?;
                return Err(anyhow::anyhow!("Expected Hello, got {:?}", msg.kind()));
            }
        };

        debug!(
            "Received hello: version={}, schema_hash={:016x}",
            hello.version, hello.schema_hash
        );

        if hello.version != PROTOCOL_VERSION {
            warn!(
                "Protocol version mismatch: client={}, server={}",
                hello.version, PROTOCOL_VERSION
            );
            self.reject(&format!(
                "Protocol version mismatch: server uses v{}",
                PROTOCOL_VERSION
            ))
            .await?;
            return Err(anyhow::anyhow!(
                "Protocol version mismatch: {} != {}",
                hello.version,
                PROTOCOL_VERSION
            ));
        }

        if hello.schema_hash != self.schema_hash {
            warn!(
                "Schema hash mismatch: client={:016x}, server={:016x}",
                hello.schema_hash, self.schema_hash
            );
            self.reject("Schema mismatch: incompatible ghost types").await?;
            return Err(anyhow::anyhow!(
                "Schema hash mismatch: {:016x} != {:016x}",
                hello.schema_hash,
                self.schema_hash
            ));
        }

        self.send(ServerMessage::HelloAck(HelloAck {
            accepted: true,
            reason: None,
        }))
        .await
    }

    async fn reject(&self, reason: &str) -> Result<()> {
        self.send(ServerMessage::HelloAck(HelloAck {
            accepted: false,
            reason: Some(reason.to_string()),
        }))
        .await
    }

    /// Send a server message on the appropriate channel.
    pub async fn send(&self, msg: ServerMessage) -> Result<()> {
        let channel = ChannelType::for_kind(msg.kind());
        let data = encode_server_message(&msg).context("Failed to encode server message")?;

        if channel.is_reliable() {
            self.channel_manager.send_reliable(channel, &data).await
        } else {
            self.channel_manager.send_unreliable(channel, &data)
        }
    }

    /// Receive the next client message on reliable channels.
    pub async fn recv_reliable(&self) -> Result<ClientMessage> {
        let (_channel, data) = self.channel_manager.recv_reliable().await?;
        decode_client_message(&data).context("Failed to decode client message")
    }

    /// Receive the next client message on unreliable channels.
    pub async fn recv_unreliable(&self) -> Result<ClientMessage> {
        let (_channel, data) = self.channel_manager.recv_unreliable().await?;
        decode_client_message(&data).context("Failed to decode client message")
    }

    /// Largest datagram the path allows, if datagrams are supported.
    pub fn max_datagram_size(&self) -> Option<usize> {
        self.channel_manager.max_datagram_size()
    }

    /// Get the remote client address.
    pub fn remote_address(&self) -> SocketAddr {
        self.channel_manager.remote_address()
    }

    /// Close the connection gracefully.
    pub fn close(&self, reason: &str) {
        info!("Closing connection: {}", reason);
        self.channel_manager.close(reason);
    }
}
