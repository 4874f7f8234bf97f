//! Multiplayer client with prediction and reconciliation.

use crate::sim::{ClientConfig, ClientSim};
use anyhow::{Context, Result};
use ghostnet_net::{
    ChannelType, ClientConnection, ClientEndpoint, ClientMessage, Disconnect, InputSource,
    ServerMessage, TransportSettings, WireError,
};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

enum NetworkEvent {
    Message(ServerMessage),
    Closed(String),
}

/// Multiplayer client with networking and prediction.
pub struct MultiplayerClient<I> {
    sim: ClientSim<I>,
    endpoint: ClientEndpoint,
    connection: ClientConnection,
    events: mpsc::UnboundedReceiver<NetworkEvent>,
    readers: Vec<JoinHandle<()>>,
    closed: Option<String>,
}

impl<I: InputSource> MultiplayerClient<I> {
    /// Connect to a server and complete the protocol hello.
    pub async fn connect(
        server_addr: SocketAddr,
        input: I,
        config: ClientConfig,
        transport: &TransportSettings,
    ) -> Result<Self> {
        info!("Connecting to server at {}", server_addr);
        let sim = ClientSim::new(input, config);

        let endpoint = ClientEndpoint::new(transport).context("Failed to create client endpoint")?;
        let quinn_connection = endpoint
            .connect(server_addr)
            .await
            .context("Failed to connect to server")?;
        let connection = ClientConnection::new(quinn_connection, sim.registry());
        connection.hello().await.context("Hello failed")?;

        let (tx, events) = mpsc::unbounded_channel();
        let readers = vec![
            tokio::spawn(read_loop(connection.clone(), tx.clone(), true)),
            tokio::spawn(read_loop(connection.clone(), tx, false)),
        ];

        Ok(Self {
            sim,
            endpoint,
            connection,
            events,
            readers,
            closed: None,
        })
    }

    /// Run the tick loop, forever or for `ticks` ticks, until the connection closes.
    pub async fn run(&mut self, ticks: Option<u64>) -> Result<()> {
        let mut interval = tokio::time::interval(self.sim.tick_duration());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut ran = 0u64;
        while ticks.map_or(true, |limit| ran < limit) {
            interval.tick().await;
            self.drain_network();
            if let Some(reason) = &self.closed {
                info!(reason = %reason, "Connection closed, stopping client");
                break;
            }
            let outgoing = self.sim.tick();
            self.dispatch(outgoing).await;
            ran += 1;
        }

        if let Some(predicted) = self.sim.predicted() {
            let metrics = predicted.metrics();
            info!(
                ticks = ran,
                predictions = metrics.predictions,
                matches = metrics.matches,
                reconciliations = metrics.reconciliations,
                replayed_ticks = metrics.replayed_ticks,
                neutral_fallbacks = metrics.neutral_fallbacks,
                "Client tick loop finished"
            );
        }
        Ok(())
    }

    /// Tell the server we are leaving and close the connection.
    pub async fn disconnect(&mut self, reason: &str) -> Result<()> {
        if self.closed.is_none() {
            let msg = ClientMessage::Disconnect(Disconnect {
                reason: reason.to_string(),
            });
            if let Err(e) = self.connection.send(msg).await {
                warn!("Failed to send disconnect: {:#}", e);
            }
        }
        self.connection.close(reason);
        self.endpoint.close();
        self.closed = Some(reason.to_string());
        info!("Disconnected from server");
        Ok(())
    }

    /// Predicted client simulation.
    pub fn sim(&self) -> &ClientSim<I> {
        &self.sim
    }

    /// Whether the connection is still open.
    pub fn is_connected(&self) -> bool {
        self.closed.is_none()
    }

    fn drain_network(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                NetworkEvent::Message(message) => self.sim.handle(message),
                NetworkEvent::Closed(reason) => {
                    self.closed.get_or_insert(reason);
                }
            }
        }
    }

    async fn dispatch(&mut self, outgoing: Vec<ClientMessage>) {
        for message in outgoing {
            if ChannelType::for_kind(message.kind()).is_reliable() {
                let connection = self.connection.clone();
                tokio::spawn(async move {
                    if let Err(e) = connection.send(message).await {
                        warn!("Failed to send reliable message: {:#}", e);
                    }
                });
            } else if let Err(e) = self.connection.send(message).await {
                debug!("Failed to send ack: {:#}", e);
            }
        }
    }
}

impl<I> Drop for MultiplayerClient<I> {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

async fn read_loop(
    connection: ClientConnection,
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
                trace!(kind = ?message.kind(), "Received message");
                if events.send(NetworkEvent::Message(message)).is_err() {
                    return;
                }
            }
            Err(e) if e.downcast_ref::<WireError>().is_some() => {
                warn!("Dropping malformed message: {:#}", e);
            }
            Err(e) => {
                let _ = events.send(NetworkEvent::Closed(format!("{:#}", e)));
                return;
            }
        }
    }
}
