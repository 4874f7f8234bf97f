//! Transport-agnostic authoritative tick loop.
//!
//! Inbound messages are handed to [`ServerSim::handle`] as they are drained
//! from the network; [`ServerSim::tick`] then processes queued joins,
//! advances every ghost with its owner's command for the tick, and builds
//! one snapshot per in-game connection.

use crate::ghosts::{Ghost, GhostArena};
use ghostnet_core::{
    advance_cube, tick_duration, Command, ConnectionId, CubeState, GhostId, GhostTypeId, SimTick,
    DEFAULT_TICK_RATE,
};
use ghostnet_net::{
    ClientMessage, CommandBuffer, ConnectionReplication, GhostDespawn, GhostRegistry, GhostState,
    JoinAccepted, JoinOutcome, JoinRequest, ReplicatedGhost, ServerMessage, SessionState,
    SessionTable, DEFAULT_COMMAND_WINDOW, DEFAULT_SNAPSHOT_BUDGET, DEFAULT_SNAPSHOT_HISTORY,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

/// Tunables of the authoritative simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Simulation rate in ticks per second.
    pub tick_rate: u32,
    /// Per-connection per-tick snapshot byte budget.
    pub snapshot_budget: usize,
    /// Ticks of commands retained per connection.
    pub command_window: usize,
    /// Ticks a delta baseline stays usable.
    pub snapshot_history: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            snapshot_budget: DEFAULT_SNAPSHOT_BUDGET,
            command_window: DEFAULT_COMMAND_WINDOW,
            snapshot_history: DEFAULT_SNAPSHOT_HISTORY,
        }
    }
}

/// An event delivered to the simulation by the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerInbound {
    /// A connection completed its hello.
    Connected(ConnectionId),
    /// A decoded message from a connection.
    Message(ConnectionId, ClientMessage),
    /// A connection closed or timed out.
    Disconnected(ConnectionId),
}

/// A message the simulation wants delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Recipient.
    pub connection: ConnectionId,
    /// Message to send.
    pub message: ServerMessage,
}

struct ClientSlot {
    commands: CommandBuffer,
    replication: ConnectionReplication,
}

/// Authoritative server simulation.
pub struct ServerSim {
    config: ServerConfig,
    dt: Duration,
    tick: SimTick,
    registry: GhostRegistry,
    cube_type: GhostTypeId,
    sessions: SessionTable,
    clients: BTreeMap<ConnectionId, ClientSlot>,
    pending_joins: Vec<JoinRequest>,
    ghosts: GhostArena,
    outbox: Vec<Outgoing>,
}

impl ServerSim {
    /// Create a simulation with the cube ghost type registered.
    pub fn new(config: ServerConfig) -> Self {
        let registry = GhostRegistry::with_cube();
        Self {
            config,
            dt: tick_duration(config.tick_rate),
            tick: SimTick::ZERO,
            registry,
            cube_type: GhostTypeId(0),
            sessions: SessionTable::new(),
            clients: BTreeMap::new(),
            pending_joins: Vec::new(),
            ghosts: GhostArena::new(),
            outbox: Vec::new(),
        }
    }

    /// Apply one inbound event. Join requests are queued until the next tick.
    pub fn handle(&mut self, inbound: ServerInbound) {
        match inbound {
            ServerInbound::Connected(connection) => self.connect(connection),
            ServerInbound::Disconnected(connection) => self.disconnect(connection),
            ServerInbound::Message(connection, message) => self.handle_message(connection, message),
        }
    }

    /// Advance one tick and return the messages to send.
    #[instrument(skip(self))]
    pub fn tick(&mut self) -> Vec<Outgoing> {
        self.tick = self.tick.next();
        let tick = self.tick;

        self.process_joins();
        self.advance_ghosts();

        for (connection, client) in &mut self.clients {
            if !self.sessions.state(*connection).is_some_and(|s| s.is_in_game()) {
                continue;
            }
            let ghosts = self.ghosts.iter().map(|ghost| ReplicatedGhost {
                id: ghost.id(),
                type_id: ghost.type_id(),
                state: &ghost.state,
            });
            let scheduled = client.replication.build_snapshot(tick, &self.registry, ghosts);
            if !scheduled.deferred.is_empty() {
                debug!(
                    connection = %connection,
                    deferred = scheduled.deferred.len(),
                    "Snapshot budget exhausted"
                );
            }
            if !scheduled.is_empty() {
                self.outbox.push(Outgoing {
                    connection: *connection,
                    message: ServerMessage::Snapshot(scheduled.packet),
                });
            }
        }

        std::mem::take(&mut self.outbox)
    }

    /// Ghost by id.
    pub fn ghost(&self, id: GhostId) -> Option<&Ghost> {
        self.ghosts.get(id)
    }

    /// Live ghosts in id order.
    pub fn ghosts(&self) -> impl Iterator<Item = &Ghost> {
        self.ghosts.iter()
    }

    /// Handshake state of `connection`.
    pub fn session_state(&self, connection: ConnectionId) -> Option<SessionState> {
        self.sessions.state(connection)
    }

    /// Ghost controlled by `connection`.
    pub fn ghost_of(&self, connection: ConnectionId) -> Option<GhostId> {
        self.sessions.ghost_of(connection)
    }

    /// Last simulated tick.
    pub fn current_tick(&self) -> SimTick {
        self.tick
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Registered ghost types.
    pub fn registry(&self) -> &GhostRegistry {
        &self.registry
    }

    /// Fixed tick duration.
    pub fn tick_duration(&self) -> Duration {
        self.dt
    }

    /// Lower the snapshot budget of one connection, e.g. to the path's datagram size.
    pub fn limit_budget(&mut self, connection: ConnectionId, max_bytes: usize) {
        if let Some(client) = self.clients.get_mut(&connection) {
            let budget = client.replication.budget().min(max_bytes);
            client.replication.set_budget(budget);
        }
    }

    fn connect(&mut self, connection: ConnectionId) {
        if self.clients.contains_key(&connection) {
            warn!(connection = %connection, "Duplicate connect ignored");
            return;
        }
        // Cube state carries the owner as i32.
        if i32::try_from(connection.0).is_err() {
            warn!(connection = %connection, "Connection id does not fit a ghost owner, ignoring");
            return;
        }
        self.sessions.connect(connection);
        self.clients.insert(
            connection,
            ClientSlot {
                commands: CommandBuffer::new(self.config.command_window),
                replication: ConnectionReplication::new(
                    self.config.snapshot_budget,
                    self.config.snapshot_history,
                ),
            },
        );
        info!(connection = %connection, "Client connected");
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        if self.clients.remove(&connection).is_none() {
            return;
        }
        self.pending_joins.retain(|request| request.connection != connection);
        let ghost = self.sessions.disconnect(connection);
        info!(connection = %connection, ghost = ?ghost, "Client disconnected");

        let Some(ghost) = ghost else {
            return;
        };
        self.ghosts.despawn(ghost);
        for (other, client) in &mut self.clients {
            client.replication.forget_ghost(ghost);
            self.outbox.push(Outgoing {
                connection: *other,
                message: ServerMessage::GhostDespawn(GhostDespawn { ghost_id: ghost }),
            });
        }
    }

    fn handle_message(&mut self, connection: ConnectionId, message: ClientMessage) {
        let Some(client) = self.clients.get_mut(&connection) else {
            debug!(connection = %connection, kind = ?message.kind(), "Message from unknown connection");
            return;
        };

        match message {
            ClientMessage::JoinRequest { value } => {
                if let Some(request) = self.sessions.queue_join(connection, value) {
                    self.pending_joins.push(request);
                }
            }
            ClientMessage::Command(command) => {
                let ahead = command.tick.since(self.tick) as usize;
                if ahead > self.config.command_window {
                    warn!(
                        connection = %connection,
                        tick = %command.tick,
                        current = %self.tick,
                        "Dropping command beyond the command window"
                    );
                    return;
                }
                if command.tick <= self.tick {
                    debug!(
                        connection = %connection,
                        tick = %command.tick,
                        current = %self.tick,
                        "Late command"
                    );
                }
                client.commands.insert(command);
            }
            ClientMessage::SnapshotAck { tick } => {
                let promoted = client.replication.acknowledge(tick);
                trace!(connection = %connection, tick = %tick, promoted, "Snapshot acked");
            }
            ClientMessage::Hello(_) => {
                debug!(connection = %connection, "Ignoring hello after handshake");
            }
            ClientMessage::Disconnect(disconnect) => {
                info!(connection = %connection, reason = %disconnect.reason, "Client requested disconnect");
                self.disconnect(connection);
            }
        }
    }

    fn process_joins(&mut self) {
        let tick = self.tick;
        for request in std::mem::take(&mut self.pending_joins) {
            let connection = request.connection;
            let Ok(owner_tag) = i32::try_from(connection.0) else {
                warn!(connection = %connection, "Join from connection id outside ghost owner range");
                continue;
            };
            let cube_type = self.cube_type;
            let ghosts = &mut self.ghosts;
            let outcome = self.sessions.process_join(request, |owner| {
                let state = GhostState::Cube(CubeState::spawned_by(owner_tag));
                ghosts.spawn(cube_type, owner, tick, state)
            });
            if let JoinOutcome::Spawned(ghost_id) = outcome {
                self.outbox.push(Outgoing {
                    connection,
                    message: ServerMessage::JoinAccepted(JoinAccepted {
                        ghost_id,
                        server_tick: tick,
                    }),
                });
            }
        }
    }

    fn advance_ghosts(&mut self) {
        let tick = self.tick;
        let dt = self.dt;
        for ghost in self.ghosts.iter_mut() {
            if ghost.spawn_tick() >= tick {
                continue;
            }
            let owner = ghost.owner();
            let command = match self.clients.get(&owner).and_then(|c| c.commands.get(tick)) {
                Some(command) => command,
                None => {
                    warn!(
                        connection = %owner,
                        tick = %tick,
                        "No command buffered for tick, simulating neutral input"
                    );
                    Command::neutral(tick)
                }
            };
            let GhostState::Cube(cube) = &mut ghost.state;
            *cube = advance_cube(*cube, &command, dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostnet_net::{SnapshotReceiver, SnapshotPacket};

    fn cmd(tick: u32, horizontal: i32, vertical: i32) -> Command {
        Command {
            tick: SimTick(tick),
            horizontal,
            vertical,
        }
    }

    fn joined(sim: &mut ServerSim, connection: ConnectionId) -> GhostId {
        sim.handle(ServerInbound::Connected(connection));
        sim.handle(ServerInbound::Message(
            connection,
            ClientMessage::JoinRequest { value: 0 },
        ));
        sim.tick();
        sim.ghost_of(connection).unwrap()
    }

    fn snapshots(out: &[Outgoing], connection: ConnectionId) -> Vec<SnapshotPacket> {
        out.iter()
            .filter(|o| o.connection == connection)
            .filter_map(|o| match &o.message {
                ServerMessage::Snapshot(packet) => Some(packet.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn join_spawns_and_replies_once() {
        let mut sim = ServerSim::new(ServerConfig::default());
        let conn = ConnectionId(1);
        sim.handle(ServerInbound::Connected(conn));
        for _ in 0..2 {
            sim.handle(ServerInbound::Message(conn, ClientMessage::JoinRequest { value: 0 }));
        }
        assert_eq!(sim.session_state(conn), Some(SessionState::JoinRequested));

        let out = sim.tick();
        let accepted: Vec<_> = out
            .iter()
            .filter(|o| matches!(o.message, ServerMessage::JoinAccepted(_)))
            .collect();
        assert_eq!(accepted.len(), 1);
        assert_eq!(sim.ghosts().count(), 1);

        let ghost = sim.ghost_of(conn).unwrap();
        assert_eq!(sim.ghost(ghost).unwrap().owner(), conn);

        // A retransmitted request after the spawn changes nothing.
        sim.handle(ServerInbound::Message(conn, ClientMessage::JoinRequest { value: 0 }));
        sim.tick();
        assert_eq!(sim.ghosts().count(), 1);
    }

    #[test]
    fn missing_command_simulates_neutral() {
        let mut sim = ServerSim::new(ServerConfig::default());
        let conn = ConnectionId(1);
        let ghost = joined(&mut sim, conn);
        assert_eq!(sim.current_tick(), SimTick(1));

        // Commands for ticks 2..=5, tick 4 lost.
        for tick in [2, 3, 5] {
            sim.handle(ServerInbound::Message(conn, ClientMessage::Command(cmd(tick, 1, 0))));
        }
        let mut xs = Vec::new();
        for _ in 2..=5 {
            sim.tick();
            let GhostState::Cube(cube) = sim.ghost(ghost).unwrap().state;
            xs.push(cube.x);
        }
        assert_eq!(xs, vec![16, 32, 32, 48]);
    }

    #[test]
    fn far_future_command_does_not_block_input() {
        let mut sim = ServerSim::new(ServerConfig::default());
        let conn = ConnectionId(1);
        let ghost = joined(&mut sim, conn);

        let window = ServerConfig::default().command_window as u32;
        for tick in [u32::MAX, 1 + window + 1] {
            sim.handle(ServerInbound::Message(conn, ClientMessage::Command(cmd(tick, -1, 0))));
        }
        // A command at the edge of the window is still accepted.
        sim.handle(ServerInbound::Message(
            conn,
            ClientMessage::Command(cmd(1 + window, 0, 1)),
        ));
        for tick in 2..=4 {
            sim.handle(ServerInbound::Message(conn, ClientMessage::Command(cmd(tick, 1, 0))));
        }
        for _ in 2..=4 {
            sim.tick();
        }
        let GhostState::Cube(cube) = sim.ghost(ghost).unwrap().state;
        assert_eq!(cube.x, 48);
        assert_eq!(cube.z, 0);
    }

    #[test]
    fn connection_ids_beyond_owner_range_are_refused() {
        let mut sim = ServerSim::new(ServerConfig::default());
        let conn = ConnectionId(i32::MAX as u32 + 1);
        sim.handle(ServerInbound::Connected(conn));
        sim.handle(ServerInbound::Message(conn, ClientMessage::JoinRequest { value: 0 }));
        sim.tick();
        assert_eq!(sim.client_count(), 0);
        assert_eq!(sim.ghosts().count(), 0);

        let ok = ConnectionId(i32::MAX as u32);
        let ghost = joined(&mut sim, ok);
        let GhostState::Cube(cube) = sim.ghost(ghost).unwrap().state;
        assert_eq!(cube.owner, i32::MAX);
    }

    #[test]
    fn snapshots_follow_in_game_clients() {
        let mut sim = ServerSim::new(ServerConfig::default());
        let a = ConnectionId(1);
        let b = ConnectionId(2);
        joined(&mut sim, a);
        sim.handle(ServerInbound::Connected(b));

        let out = sim.tick();
        assert_eq!(snapshots(&out, a).len(), 1);
        // Connected but not in game: no snapshots.
        assert!(snapshots(&out, b).is_empty());

        let registry = GhostRegistry::with_cube();
        let mut receiver = SnapshotReceiver::new(32);
        let decoded = receiver.decode_packet(&registry, &snapshots(&out, a)[0]).unwrap();
        assert_eq!(decoded.ghosts.len(), 1);
    }

    #[test]
    fn disconnect_despawns_and_broadcasts() {
        let mut sim = ServerSim::new(ServerConfig::default());
        let a = ConnectionId(1);
        let b = ConnectionId(2);
        let ghost_a = joined(&mut sim, a);
        joined(&mut sim, b);
        assert_eq!(sim.ghosts().count(), 2);

        sim.handle(ServerInbound::Disconnected(a));
        let out = sim.tick();
        assert!(sim.ghost(ghost_a).is_none());
        assert_eq!(sim.session_state(a), None);
        assert!(out.iter().any(|o| o.connection == b
            && o.message
                == ServerMessage::GhostDespawn(GhostDespawn { ghost_id: ghost_a })));
        assert_eq!(sim.client_count(), 1);
    }

    #[test]
    fn messages_from_unknown_connections_are_ignored() {
        let mut sim = ServerSim::new(ServerConfig::default());
        sim.handle(ServerInbound::Message(
            ConnectionId(7),
            ClientMessage::JoinRequest { value: 0 },
        ));
        sim.tick();
        assert_eq!(sim.ghosts().count(), 0);
    }

    #[test]
    fn budget_below_packet_header_sends_no_snapshot() {
        let config = ServerConfig {
            snapshot_budget: 2,
            ..ServerConfig::default()
        };
        let mut sim = ServerSim::new(config);
        let conn = ConnectionId(1);
        joined(&mut sim, conn);
        let out = sim.tick();
        assert!(snapshots(&out, conn).is_empty());
    }

    #[test]
    fn budget_limit_defers_ghosts() {
        let config = ServerConfig {
            snapshot_budget: 4 + 28,
            ..ServerConfig::default()
        };
        let mut sim = ServerSim::new(config);
        let a = ConnectionId(1);
        joined(&mut sim, a);
        joined(&mut sim, ConnectionId(2));

        let out = sim.tick();
        let packet = &snapshots(&out, a)[0];
        assert_eq!(packet.encoded_len(), 32);

        sim.limit_budget(a, 8);
        let out = sim.tick();
        assert!(snapshots(&out, a).is_empty());
    }
}
