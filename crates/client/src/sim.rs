//! Transport-agnostic predicted client.
//!
//! Server messages are applied with [`ClientSim::handle`] as they arrive;
//! [`ClientSim::tick`] samples input for the next tick, advances the
//! prediction and returns the messages to send.

use ghostnet_core::{tick_duration, CubeState, GhostId, SimTick, DEFAULT_TICK_RATE};
use ghostnet_net::{
    ClientMessage, ClientSession, ClientSessionState, CommandStream, DecodedGhost, GhostRegistry,
    GhostState, InputSource, JoinAccepted, PredictedGhost, ServerMessage, SnapshotPacket,
    SnapshotReceiver, DEFAULT_COMMAND_WINDOW, DEFAULT_SNAPSHOT_HISTORY,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

/// Ticks the client runs ahead of the server tick it joined on.
pub const DEFAULT_INPUT_LEAD_TICKS: u32 = 2;

/// Tunables of the predicted client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Simulation rate in ticks per second; must match the server.
    pub tick_rate: u32,
    /// Ticks of local commands retained for replay.
    pub command_window: usize,
    /// Ticks of decoded states retained as delta baselines.
    pub snapshot_history: u32,
    /// Ticks ahead of the join tick at which input sampling starts.
    pub input_lead_ticks: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            command_window: DEFAULT_COMMAND_WINDOW,
            snapshot_history: DEFAULT_SNAPSHOT_HISTORY,
            input_lead_ticks: DEFAULT_INPUT_LEAD_TICKS,
        }
    }
}

/// Predicted client simulation.
pub struct ClientSim<I> {
    config: ClientConfig,
    dt: Duration,
    session: ClientSession,
    commands: CommandStream<I>,
    registry: GhostRegistry,
    receiver: SnapshotReceiver,
    ghosts: BTreeMap<GhostId, (SimTick, GhostState)>,
    predicted: Option<PredictedGhost>,
    last_sampled: SimTick,
    outbox: Vec<ClientMessage>,
    disconnect_reason: Option<String>,
}

impl<I: InputSource> ClientSim<I> {
    /// Create a client sampling `input`.
    pub fn new(input: I, config: ClientConfig) -> Self {
        Self {
            config,
            dt: tick_duration(config.tick_rate),
            session: ClientSession::new(),
            commands: CommandStream::new(input, config.command_window),
            registry: GhostRegistry::with_cube(),
            receiver: SnapshotReceiver::new(config.snapshot_history),
            ghosts: BTreeMap::new(),
            predicted: None,
            last_sampled: SimTick::ZERO,
            outbox: Vec::new(),
            disconnect_reason: None,
        }
    }

    /// Apply one server message.
    pub fn handle(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::JoinAccepted(accepted) => self.on_join_accepted(accepted),
            ServerMessage::Snapshot(packet) => self.on_snapshot(&packet),
            ServerMessage::GhostDespawn(despawn) => {
                let ghost = despawn.ghost_id;
                if Some(ghost) == self.session.ghost() {
                    warn!(ghost = %ghost, "Server despawned the controlled ghost");
                    self.predicted = None;
                }
                self.ghosts.remove(&ghost);
                self.receiver.forget_ghost(ghost);
                debug!(ghost = %ghost, "Ghost despawned");
            }
            ServerMessage::Disconnect(disconnect) => {
                info!(reason = %disconnect.reason, "Server closed the session");
                self.disconnect_reason = Some(disconnect.reason);
            }
            ServerMessage::HelloAck(_) => {
                debug!("Ignoring hello ack after handshake");
            }
        }
    }

    /// Advance one client tick and return the messages to send.
    #[instrument(skip(self), fields(tick = self.last_sampled.0))]
    pub fn tick(&mut self) -> Vec<ClientMessage> {
        match self.session.state() {
            ClientSessionState::Connected => {
                if let Some(value) = self.session.request_join(0) {
                    self.outbox.push(ClientMessage::JoinRequest { value });
                }
            }
            ClientSessionState::JoinRequested => {}
            ClientSessionState::InGame { .. } => {
                let tick = self.last_sampled.next();
                let command = self.commands.sample(tick);
                self.last_sampled = tick;
                if let Some(predicted) = &mut self.predicted {
                    predicted.predict(&command);
                }
                self.outbox.extend(
                    self.commands
                        .drain_outbox()
                        .into_iter()
                        .map(ClientMessage::Command),
                );
            }
        }
        std::mem::take(&mut self.outbox)
    }

    /// Prediction of the controlled ghost, once its first snapshot arrived.
    pub fn predicted(&self) -> Option<&PredictedGhost> {
        self.predicted.as_ref()
    }

    /// Newest authoritative state of `ghost` and its tick.
    pub fn ghost(&self, ghost: GhostId) -> Option<(SimTick, GhostState)> {
        self.ghosts.get(&ghost).copied()
    }

    /// Every ghost with a known authoritative state.
    pub fn ghosts(&self) -> impl Iterator<Item = (GhostId, SimTick, GhostState)> + '_ {
        self.ghosts
            .iter()
            .map(|(id, (tick, state))| (*id, *tick, *state))
    }

    /// Join handshake state.
    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// Tick of the newest sampled command.
    pub fn current_tick(&self) -> SimTick {
        self.last_sampled
    }

    /// Registered ghost types.
    pub fn registry(&self) -> &GhostRegistry {
        &self.registry
    }

    /// Fixed tick duration.
    pub fn tick_duration(&self) -> Duration {
        self.dt
    }

    /// Reason given by the server, once it closed the session.
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    fn on_join_accepted(&mut self, accepted: JoinAccepted) {
        if !self.session.on_join_accepted(accepted.ghost_id) {
            return;
        }
        // Sampling starts at server_tick + lead.
        self.last_sampled = accepted
            .server_tick
            .advance(self.config.input_lead_ticks.saturating_sub(1));
        info!(
            ghost = %accepted.ghost_id,
            server_tick = %accepted.server_tick,
            first_command = %self.last_sampled.next(),
            "Join accepted"
        );
    }

    fn on_snapshot(&mut self, packet: &SnapshotPacket) {
        let Some(decoded) = self.receiver.decode_or_drop(&self.registry, packet) else {
            return;
        };
        if decoded.is_complete() {
            self.outbox
                .push(ClientMessage::SnapshotAck { tick: packet.tick });
        } else {
            trace!(tick = %packet.tick, skipped = decoded.skipped, "Partial snapshot not acked");
        }

        let own = self.session.ghost();
        for DecodedGhost {
            ghost_id,
            tick,
            state,
            ..
        } in decoded.ghosts
        {
            let newer = self
                .ghosts
                .get(&ghost_id)
                .map_or(true, |(known, _)| tick > *known);
            if newer {
                self.ghosts.insert(ghost_id, (tick, state));
            }
            if Some(ghost_id) == own {
                let GhostState::Cube(cube) = state;
                self.confirm_own(ghost_id, tick, cube);
            }
        }
    }

    fn confirm_own(&mut self, ghost: GhostId, tick: SimTick, state: CubeState) {
        let commands = self.commands.buffer();
        match &mut self.predicted {
            Some(predicted) => {
                let outcome = predicted.reconcile(tick, state, commands);
                trace!(ghost = %ghost, tick = %tick, ?outcome, "Reconciled");
            }
            None => {
                let mut predicted = PredictedGhost::new(ghost, tick, state, self.dt);
                let replayed = predicted.fast_forward(commands, self.last_sampled);
                debug!(ghost = %ghost, tick = %tick, replayed, "Prediction started");
                self.predicted = Some(predicted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostnet_core::{Command, GhostTypeId, MoveInput};
    use ghostnet_net::{
        ConnectionReplication, GhostDespawn, PredictionPhase, ReplicatedGhost, ScriptedInput,
    };

    fn right(n: usize) -> ScriptedInput {
        let step = MoveInput {
            horizontal: 1,
            vertical: 0,
        };
        ScriptedInput::new(std::iter::repeat(step).take(n))
    }

    fn snapshot(
        replication: &mut ConnectionReplication,
        tick: u32,
        ghosts: &[(GhostId, GhostState)],
    ) -> SnapshotPacket {
        let registry = GhostRegistry::with_cube();
        let scheduled = replication.build_snapshot(
            SimTick(tick),
            &registry,
            ghosts.iter().map(|(id, state)| ReplicatedGhost {
                id: *id,
                type_id: GhostTypeId(0),
                state,
            }),
        );
        scheduled.packet
    }

    fn joined(input: ScriptedInput) -> ClientSim<ScriptedInput> {
        let mut sim = ClientSim::new(input, ClientConfig::default());
        let out = sim.tick();
        assert_eq!(out, vec![ClientMessage::JoinRequest { value: 0 }]);
        sim.handle(ServerMessage::JoinAccepted(JoinAccepted {
            ghost_id: GhostId(1),
            server_tick: SimTick(10),
        }));
        sim
    }

    #[test]
    fn join_is_requested_once() {
        let mut sim = ClientSim::new(right(0), ClientConfig::default());
        assert_eq!(sim.tick().len(), 1);
        assert!(sim.tick().is_empty());
        assert_eq!(sim.session().state(), ClientSessionState::JoinRequested);
    }

    #[test]
    fn sampling_starts_at_join_tick_plus_lead() {
        let mut sim = joined(right(1));
        let out = sim.tick();
        assert_eq!(
            out,
            vec![ClientMessage::Command(Command {
                tick: SimTick(12),
                horizontal: 1,
                vertical: 0,
            })]
        );
        assert_eq!(sim.current_tick(), SimTick(12));
    }

    #[test]
    fn complete_snapshots_are_acked_and_start_prediction() {
        let mut sim = joined(right(3));
        for _ in 0..3 {
            sim.tick();
        }

        let mut replication = ConnectionReplication::default();
        let spawn = GhostState::Cube(CubeState::spawned_by(1));
        let packet = snapshot(&mut replication, 10, &[(GhostId(1), spawn)]);
        sim.handle(ServerMessage::Snapshot(packet));

        let out = sim.tick();
        assert!(out.contains(&ClientMessage::SnapshotAck { tick: SimTick(10) }));

        // Tick 11 had no command and replays neutral; 12..=14 move right.
        let predicted = sim.predicted().unwrap();
        assert_eq!(predicted.predicted_tick(), SimTick(15));
        assert_eq!(predicted.state().x, 48);
        assert_eq!(sim.ghost(GhostId(1)), Some((SimTick(10), spawn)));
    }

    #[test]
    fn matching_confirmation_keeps_prediction() {
        let mut sim = joined(right(4));
        for _ in 0..4 {
            sim.tick();
        }
        let mut replication = ConnectionReplication::default();
        let spawn = GhostState::Cube(CubeState::spawned_by(1));
        sim.handle(ServerMessage::Snapshot(snapshot(
            &mut replication,
            11,
            &[(GhostId(1), spawn)],
        )));
        let before = sim.predicted().unwrap().state();

        let moved = GhostState::Cube(CubeState {
            owner: 1,
            x: 16,
            z: 0,
        });
        sim.handle(ServerMessage::Snapshot(snapshot(
            &mut replication,
            12,
            &[(GhostId(1), moved)],
        )));
        let predicted = sim.predicted().unwrap();
        assert_eq!(predicted.state(), before);
        assert_eq!(predicted.metrics().matches, 1);
        assert_eq!(predicted.phase(), PredictionPhase::Predicting);
    }

    #[test]
    fn remote_ghosts_track_newest_state_and_despawn() {
        let mut sim = joined(right(0));
        let mut replication = ConnectionReplication::default();
        let other = |x| GhostState::Cube(CubeState { owner: 2, x, z: 0 });

        let newer = snapshot(&mut replication, 12, &[(GhostId(2), other(32))]);
        let older = snapshot(&mut ConnectionReplication::default(), 11, &[(GhostId(2), other(16))]);
        sim.handle(ServerMessage::Snapshot(newer));
        sim.handle(ServerMessage::Snapshot(older));
        assert_eq!(sim.ghost(GhostId(2)), Some((SimTick(12), other(32))));

        sim.handle(ServerMessage::GhostDespawn(GhostDespawn { ghost_id: GhostId(2) }));
        assert!(sim.ghost(GhostId(2)).is_none());
    }

    #[test]
    fn partial_snapshot_is_not_acked() {
        let mut sim = joined(right(0));
        let mut replication = ConnectionReplication::default();
        let state = GhostState::Cube(CubeState::spawned_by(2));

        // Baseline acked on the server but never received by this client.
        snapshot(&mut replication, 11, &[(GhostId(2), state)]);
        replication.acknowledge(SimTick(11));
        let delta = snapshot(&mut replication, 12, &[(GhostId(2), state)]);

        sim.handle(ServerMessage::Snapshot(delta));
        let out = sim.tick();
        assert!(!out
            .iter()
            .any(|m| matches!(m, ClientMessage::SnapshotAck { .. })));
        assert!(sim.ghost(GhostId(2)).is_none());
    }
}
