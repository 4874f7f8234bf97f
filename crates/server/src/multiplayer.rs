//! Multiplayer server with network replication.

use crate::sim::{Outgoing, ServerConfig, ServerInbound, ServerSim};
use anyhow::{Context, Result};
use ghostnet_core::ConnectionId;
use ghostnet_net::{
    ChannelType, ClientMessage, GhostRegistry, ServerConnection, ServerEndpoint,
    TransportSettings, WireError,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, trace, warn};

/// Channel byte plus frame header carried in every snapshot datagram.
const DATAGRAM_OVERHEAD: usize = 1 + ghostnet_net::codec::FRAME_HEADER_SIZE;

/// Events produced by the connection tasks.
enum NetworkEvent {
    Accepted(ConnectionId, ServerConnection),
    Message(ConnectionId, ClientMessage),
    Closed(ConnectionId),
}

/// Multiplayer server with networking.
pub struct MultiplayerServer {
    sim: ServerSim,
    endpoint: Arc<ServerEndpoint>,
    clients: HashMap<ConnectionId, ServerConnection>,
    events: mpsc::UnboundedReceiver<NetworkEvent>,
    accept_task: JoinHandle<()>,
}

impl MultiplayerServer {
    /// Create a new multiplayer server bound to the specified address.
    pub fn bind(
        addr: SocketAddr,
        config: ServerConfig,
        transport: &TransportSettings,
    ) -> Result<Self> {
        let endpoint = Arc::new(
            ServerEndpoint::bind(addr, transport).context("Failed to bind server endpoint")?,
        );
        info!("Multiplayer server bound to {}", endpoint.local_addr());

        let (tx, events) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(accept_loop(Arc::clone(&endpoint), tx));

        Ok(Self {
            sim: ServerSim::new(config),
            endpoint,
            clients: HashMap::new(),
            events,
            accept_task,
        })
    }

    /// Run the tick loop, forever or for `ticks` ticks.
    pub async fn run(&mut self, ticks: Option<u64>) -> Result<()> {
        let mut interval = tokio::time::interval(self.sim.tick_duration());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut ran = 0u64;
        while ticks.map_or(true, |limit| ran < limit) {
            interval.tick().await;
            self.drain_network();
            let outgoing = self.sim.tick();
            self.dispatch(outgoing).await;
            ran += 1;
        }

        info!(ticks = ran, tick = %self.sim.current_tick(), "Server tick loop finished");
        Ok(())
    }

    /// Close every connection and stop accepting.
    pub fn shutdown(&mut self) {
        for connection in self.clients.values() {
            connection.close("Server shutting down");
        }
        self.clients.clear();
        self.accept_task.abort();
        self.endpoint.close();
    }

    /// Authoritative simulation.
    pub fn sim(&self) -> &ServerSim {
        &self.sim
    }

    /// Get number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Get local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    fn drain_network(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                NetworkEvent::Accepted(id, connection) => {
                    let max_datagram = connection.max_datagram_size();
                    self.clients.insert(id, connection);
                    self.sim.handle(ServerInbound::Connected(id));
                    if let Some(max) = max_datagram {
                        self.sim
                            .limit_budget(id, max.saturating_sub(DATAGRAM_OVERHEAD));
                    }
                }
                NetworkEvent::Message(id, message) => {
                    self.sim.handle(ServerInbound::Message(id, message));
                }
                NetworkEvent::Closed(id) => {
                    self.clients.remove(&id);
                    self.sim.handle(ServerInbound::Disconnected(id));
                }
            }
        }
    }

    #[instrument(skip_all, fields(messages = outgoing.len()))]
    async fn dispatch(&mut self, outgoing: Vec<Outgoing>) {
        for Outgoing {
            connection,
            message,
        } in outgoing
        {
            let Some(client) = self.clients.get(&connection) else {
                continue;
            };
            if ChannelType::for_kind(message.kind()).is_reliable() {
                let client = client.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.send(message).await {
                        warn!(connection = %connection, "Failed to send reliable message: {:#}", e);
                    }
                });
            } else if let Err(e) = client.send(message).await {
                // Datagrams may be refused under congestion; the next tick resends.
                debug!(connection = %connection, "Failed to send snapshot: {:#}", e);
            }
        }
    }
}

impl Drop for MultiplayerServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(endpoint: Arc<ServerEndpoint>, events: mpsc::UnboundedSender<NetworkEvent>) {
    let registry = Arc::new(GhostRegistry::with_cube());
    let mut next_id = 1u32;

    while let Some(incoming) = endpoint.accept().await {
        let id = ConnectionId(next_id);
        next_id = next_id.saturating_add(1);
        let addr = incoming.remote_address();
        info!(connection = %id, "New connection from {}", addr);

        let events = events.clone();
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let quinn_connection = match incoming.await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("Failed to establish connection from {}: {}", addr, e);
                    return;
                }
            };
            let connection = ServerConnection::new(quinn_connection, &registry);
            if let Err(e) = connection.accept_hello().await {
                warn!(connection = %id, "Hello failed for {}: {:#}", addr, e);
                connection.close("Hello failed");
                return;
            }
            if events
                .send(NetworkEvent::Accepted(id, connection.clone()))
                .is_err()
            {
                return;
            }
            tokio::spawn(read_loop(id, connection.clone(), events.clone(), true));
            tokio::spawn(read_loop(id, connection, events, false));
        });
    }
    debug!("Accept loop finished");
}

async fn read_loop(
    id: ConnectionId,
    connection: ServerConnection,
    events: mpsc::UnboundedSender<NetworkEvent>,
    reliable: bool,
) {
    loop {
        let received = if reliable {
            connection.recv_reliable().await
        } else {
            connection.recv_unreliable().await
        };
        match received {
            Ok(message) => {
                trace!(connection = %id, kind = ?message.kind(), "Received message");
                if events.send(NetworkEvent::Message(id, message)).is_err() {
                    return;
                }
            }
            Err(e) if e.downcast_ref::<WireError>().is_some() => {
                warn!(connection = %id, "Dropping malformed message: {:#}", e);
            }
            Err(e) => {
                // Both readers report; the second close is a no-op in the sim.
                info!(connection = %id, "Connection closed: {:#}", e);
                let _ = events.send(NetworkEvent::Closed(id));
                return;
            }
        }
    }
}
