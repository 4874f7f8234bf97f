//! Server-side snapshot scheduling and per-connection baselines.
//!
//! Each tick the scheduler ranks every visible ghost, then writes records in
//! rank order until the next record would overflow the connection's byte
//! budget. Ranking multiplies the serializer's importance by the number of
//! ticks since the ghost was last sent to this connection, so deferred ghosts
//! rise in rank until they fit.

use crate::ghost::{GhostRegistry, GhostSerializer, GhostState};
use crate::snapshot::{
    RecordHeader, SnapshotPacket, DEFAULT_SNAPSHOT_HISTORY, SNAPSHOT_PACKET_HEADER_SIZE,
    SNAPSHOT_RECORD_HEADER_SIZE,
};
use crate::wire::WireWriter;
use ghostnet_core::{GhostId, GhostTypeId, SimTick};
use std::collections::{HashMap, VecDeque};
use tracing::{trace, warn};

/// Default per-connection per-tick byte budget.
pub const DEFAULT_SNAPSHOT_BUDGET: usize = 1200;

/// A ghost offered to the scheduler for one tick.
#[derive(Debug, Clone, Copy)]
pub struct ReplicatedGhost<'a> {
    /// Ghost id.
    pub id: GhostId,
    /// Registered type.
    pub type_id: GhostTypeId,
    /// Current authoritative state.
    pub state: &'a GhostState,
}

/// Output of one scheduling pass.
#[derive(Debug, Clone)]
pub struct ScheduledSnapshot {
    /// Packet to send unreliably.
    pub packet: SnapshotPacket,
    /// Ghosts written this tick, in rank order.
    pub included: Vec<GhostId>,
    /// Ghosts that did not fit the budget.
    pub deferred: Vec<GhostId>,
}

impl ScheduledSnapshot {
    /// Whether no ghost was written.
    pub fn is_empty(&self) -> bool {
        self.included.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Baseline {
    tick: SimTick,
    state: GhostState,
}

#[derive(Debug, Clone)]
struct SentSnapshot {
    tick: SimTick,
    ghosts: Vec<(GhostId, GhostState)>,
}

/// Replication state the server keeps for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionReplication {
    budget: usize,
    history: u32,
    baselines: HashMap<GhostId, Baseline>,
    last_sent: HashMap<GhostId, SimTick>,
    in_flight: VecDeque<SentSnapshot>,
}

impl ConnectionReplication {
    /// Replication with a per-tick `budget` and a baseline lifetime of `history` ticks.
    ///
    /// `history` must not exceed the client's snapshot history, otherwise
    /// deltas may reference states the client has already evicted.
    pub fn new(budget: usize, history: u32) -> Self {
        Self {
            budget,
            history: history.max(1),
            baselines: HashMap::new(),
            last_sent: HashMap::new(),
            in_flight: VecDeque::new(),
        }
    }

    /// Per-tick byte budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Change the per-tick byte budget.
    pub fn set_budget(&mut self, budget: usize) {
        self.budget = budget;
    }

    /// Rank `ghosts` and serialize as many as fit the budget for `tick`.
    pub fn build_snapshot<'a>(
        &mut self,
        tick: SimTick,
        registry: &GhostRegistry,
        ghosts: impl IntoIterator<Item = ReplicatedGhost<'a>>,
    ) -> ScheduledSnapshot {
        let mut ranked: Vec<(i64, ReplicatedGhost<'a>, &dyn GhostSerializer)> = Vec::new();
        for ghost in ghosts {
            match registry.get(ghost.type_id) {
                Ok(serializer) => {
                    let priority =
                        self.priority(tick, ghost.id, serializer.importance(ghost.state));
                    ranked.push((priority, ghost, serializer));
                }
                Err(err) => warn!(ghost = %ghost.id, "Skipping ghost: {}", err),
            }
        }
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.id.cmp(&b.1.id)));

        let mut writer = WireWriter::with_capacity(self.budget);
        let mut included = Vec::new();
        let mut deferred = Vec::new();
        let mut sent = Vec::new();

        let mut ranked = ranked.into_iter();
        for (_, ghost, serializer) in ranked.by_ref() {
            let size = serializer.snapshot_size();
            let cost = SNAPSHOT_RECORD_HEADER_SIZE + size;
            if SNAPSHOT_PACKET_HEADER_SIZE + writer.len() + cost > self.budget {
                deferred.push(ghost.id);
                break;
            }

            let baseline = self.usable_baseline(tick, ghost.id);
            let start = writer.len();
            RecordHeader {
                type_id: ghost.type_id,
                tick,
                ghost_id: ghost.id,
                baseline_tick: baseline.map_or(SimTick::ZERO, |b| b.tick),
            }
            .write(&mut writer);

            let result = serializer.serialize(
                ghost.state,
                baseline.as_ref().map(|b| &b.state),
                &mut writer,
            );
            let written = writer.len() - start - SNAPSHOT_RECORD_HEADER_SIZE;
            match result {
                Ok(()) if written == size => {
                    included.push(ghost.id);
                    sent.push((ghost.id, *ghost.state));
                }
                Ok(()) => {
                    warn!(
                        ghost = %ghost.id,
                        serializer = serializer.name(),
                        written,
                        expected = size,
                        "Serializer wrote wrong size, skipping ghost"
                    );
                    writer.truncate(start);
                }
                Err(err) => {
                    warn!(ghost = %ghost.id, "Failed to serialize ghost: {}", err);
                    writer.truncate(start);
                }
            }
        }
        deferred.extend(ranked.map(|(_, ghost, _)| ghost.id));

        for id in &included {
            self.last_sent.insert(*id, tick);
        }
        self.record_sent(tick, sent);

        trace!(
            tick = %tick,
            included = included.len(),
            deferred = deferred.len(),
            bytes = SNAPSHOT_PACKET_HEADER_SIZE + writer.len(),
            "Built snapshot"
        );

        ScheduledSnapshot {
            packet: SnapshotPacket {
                tick,
                records: writer.into_inner(),
            },
            included,
            deferred,
        }
    }

    /// Promote the states sent at `tick` to baselines.
    ///
    /// Baselines only move forward; an ack older than a ghost's current
    /// baseline leaves it untouched. Returns the number of ghosts promoted.
    pub fn acknowledge(&mut self, tick: SimTick) -> usize {
        let Some(index) = self.in_flight.iter().position(|sent| sent.tick == tick) else {
            trace!(tick = %tick, "Ack for unknown or expired snapshot");
            return 0;
        };
        let Some(sent) = self.in_flight.remove(index) else {
            return 0;
        };

        let mut promoted = 0;
        for (ghost, state) in sent.ghosts {
            let newer = self
                .baselines
                .get(&ghost)
                .map_or(true, |baseline| baseline.tick < tick);
            if newer {
                self.baselines.insert(ghost, Baseline { tick, state });
                promoted += 1;
            }
        }
        promoted
    }

    /// Acknowledged baseline of `ghost`.
    pub fn baseline(&self, ghost: GhostId) -> Option<(SimTick, &GhostState)> {
        self.baselines
            .get(&ghost)
            .map(|baseline| (baseline.tick, &baseline.state))
    }

    /// Drop everything tracked for a despawned ghost.
    pub fn forget_ghost(&mut self, ghost: GhostId) {
        self.baselines.remove(&ghost);
        self.last_sent.remove(&ghost);
        for sent in &mut self.in_flight {
            sent.ghosts.retain(|(id, _)| *id != ghost);
        }
    }

    fn priority(&self, tick: SimTick, ghost: GhostId, importance: i32) -> i64 {
        let age = match self.last_sent.get(&ghost) {
            Some(last) => tick.since(*last),
            None => tick.0,
        }
        .max(1);
        i64::from(importance).saturating_mul(i64::from(age))
    }

    fn usable_baseline(&self, tick: SimTick, ghost: GhostId) -> Option<Baseline> {
        self.baselines
            .get(&ghost)
            .filter(|baseline| {
                baseline.tick != SimTick::ZERO && tick.since(baseline.tick) < self.history
            })
            .copied()
    }

    fn record_sent(&mut self, tick: SimTick, ghosts: Vec<(GhostId, GhostState)>) {
        self.in_flight.retain(|sent| sent.tick != tick);
        self.in_flight.push_back(SentSnapshot { tick, ghosts });
        while let Some(oldest) = self.in_flight.front() {
            if tick.since(oldest.tick) >= self.history {
                self.in_flight.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for ConnectionReplication {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_BUDGET, DEFAULT_SNAPSHOT_HISTORY)
    }
}
