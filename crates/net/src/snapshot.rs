//! Snapshot wire records and the client-side baseline history.
//!
//! A snapshot packet is `[tick: u32]` followed by records of
//! `[ghost_type: i32][tick: u32][ghost_id: u32][baseline_tick: u32][payload]`,
//! where the payload length is the registered snapshot size of the type.

use crate::ghost::{GhostRegistry, GhostState};
use crate::wire::{WireError, WireReader, WireResult, WireWriter};
use ghostnet_core::{GhostId, GhostTypeId, SimTick};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace, warn};

/// Bytes of the packet prefix (`tick`).
pub const SNAPSHOT_PACKET_HEADER_SIZE: usize = 4;

/// Bytes of a record header.
pub const SNAPSHOT_RECORD_HEADER_SIZE: usize = 16;

/// Default number of ticks a baseline stays usable.
pub const DEFAULT_SNAPSHOT_HISTORY: u32 = 32;

/// Serialized ghost records for one tick and one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPacket {
    /// Server tick the records describe.
    pub tick: SimTick,
    /// Concatenated records.
    pub records: Vec<u8>,
}

impl SnapshotPacket {
    /// Total encoded size including the tick prefix.
    pub fn encoded_len(&self) -> usize {
        SNAPSHOT_PACKET_HEADER_SIZE + self.records.len()
    }
}

/// Header preceding every ghost payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Registered serializer.
    pub type_id: GhostTypeId,
    /// Tick of the encoded state.
    pub tick: SimTick,
    /// Ghost the record describes.
    pub ghost_id: GhostId,
    /// Tick of the baseline the delta is relative to; zero for a full encode.
    pub baseline_tick: SimTick,
}

impl RecordHeader {
    /// Append this header to `writer`.
    pub fn write(&self, writer: &mut WireWriter) {
        writer.write_i32(self.type_id.0);
        writer.write_u32(self.tick.0);
        writer.write_u32(self.ghost_id.0);
        writer.write_u32(self.baseline_tick.0);
    }

    /// Read a header from `reader`.
    pub fn read(reader: &mut WireReader<'_>) -> WireResult<Self> {
        Ok(Self {
            type_id: GhostTypeId(reader.read_i32()?),
            tick: SimTick(reader.read_u32()?),
            ghost_id: GhostId(reader.read_u32()?),
            baseline_tick: SimTick(reader.read_u32()?),
        })
    }
}

/// Recently received states of one ghost, used to resolve delta baselines.
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    entries: VecDeque<(SimTick, GhostState)>,
    window: u32,
}

impl SnapshotHistory {
    /// History retaining states up to `window` ticks behind the newest.
    pub fn new(window: u32) -> Self {
        Self {
            entries: VecDeque::new(),
            window: window.max(1),
        }
    }

    /// Record `state` at `tick`, replacing any state already held for that tick.
    pub fn insert(&mut self, tick: SimTick, state: GhostState) {
        match self.entries.binary_search_by_key(&tick, |(t, _)| *t) {
            Ok(index) => self.entries[index].1 = state,
            Err(index) => self.entries.insert(index, (tick, state)),
        }
        if let Some(newest) = self.latest().map(|(t, _)| t) {
            while let Some(&(oldest, _)) = self.entries.front() {
                if newest.since(oldest) >= self.window {
                    self.entries.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// State held for exactly `tick`.
    pub fn get(&self, tick: SimTick) -> Option<&GhostState> {
        self.entries
            .binary_search_by_key(&tick, |(t, _)| *t)
            .ok()
            .map(|index| &self.entries[index].1)
    }

    /// Newest held state.
    pub fn latest(&self) -> Option<(SimTick, &GhostState)> {
        self.entries.back().map(|(tick, state)| (*tick, state))
    }

    /// Number of held states.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A ghost state decoded from a snapshot record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedGhost {
    /// Ghost id.
    pub ghost_id: GhostId,
    /// Ghost type.
    pub type_id: GhostTypeId,
    /// Tick of the state.
    pub tick: SimTick,
    /// Decoded state.
    pub state: GhostState,
}

/// Result of decoding one packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedSnapshot {
    /// Ghost states successfully decoded.
    pub ghosts: Vec<DecodedGhost>,
    /// Records skipped because their baseline is no longer held.
    pub skipped: usize,
}

impl DecodedSnapshot {
    /// Whether every record decoded, so the packet may be acknowledged.
    pub fn is_complete(&self) -> bool {
        self.skipped == 0
    }
}

/// Client-side per-ghost baseline store.
#[derive(Debug, Clone)]
pub struct SnapshotReceiver {
    histories: HashMap<GhostId, SnapshotHistory>,
    window: u32,
}

impl SnapshotReceiver {
    /// Receiver retaining baselines for `window` ticks.
    pub fn new(window: u32) -> Self {
        Self {
            histories: HashMap::new(),
            window,
        }
    }

    /// Decode a packet against held baselines and record the results.
    ///
    /// An unknown ghost type or a malformed record rejects the whole packet
    /// without touching any history. A missing baseline only skips that record.
    pub fn decode_packet(
        &mut self,
        registry: &GhostRegistry,
        packet: &SnapshotPacket,
    ) -> WireResult<DecodedSnapshot> {
        let mut reader = WireReader::new(&packet.records);
        let mut decoded = DecodedSnapshot::default();

        while !reader.is_empty() {
            let header = RecordHeader::read(&mut reader)?;
            let serializer = registry.get(header.type_id)?;
            let payload = reader.read_bytes(serializer.snapshot_size())?;

            let baseline = if header.baseline_tick == SimTick::ZERO {
                None
            } else {
                match self.baseline(header.ghost_id, header.baseline_tick) {
                    Some(state) => Some(state),
                    None => {
                        debug!(
                            ghost = %header.ghost_id,
                            baseline = %header.baseline_tick,
                            "Skipping record with missing baseline"
                        );
                        decoded.skipped += 1;
                        continue;
                    }
                }
            };

            let mut payload_reader = WireReader::new(payload);
            let state = serializer.deserialize(&mut payload_reader, baseline.as_ref())?;
            payload_reader.finish()?;

            decoded.ghosts.push(DecodedGhost {
                ghost_id: header.ghost_id,
                type_id: header.type_id,
                tick: header.tick,
                state,
            });
        }

        for ghost in &decoded.ghosts {
            self.histories
                .entry(ghost.ghost_id)
                .or_insert_with(|| SnapshotHistory::new(self.window))
                .insert(ghost.tick, ghost.state);
        }

        trace!(
            tick = %packet.tick,
            ghosts = decoded.ghosts.len(),
            skipped = decoded.skipped,
            "Decoded snapshot packet"
        );
        Ok(decoded)
    }

    /// Decode and log failures, returning `None` when the packet is dropped.
    pub fn decode_or_drop(
        &mut self,
        registry: &GhostRegistry,
        packet: &SnapshotPacket,
    ) -> Option<DecodedSnapshot> {
        match self.decode_packet(registry, packet) {
            Ok(decoded) => Some(decoded),
            Err(err @ WireError::UnknownGhostType(_)) => {
                warn!(tick = %packet.tick, "Dropping snapshot: {}", err);
                None
            }
            Err(err) => {
                debug!(tick = %packet.tick, "Dropping malformed snapshot: {}", err);
                None
            }
        }
    }

    /// Held state of `ghost` at `tick`.
    pub fn baseline(&self, ghost: GhostId, tick: SimTick) -> Option<GhostState> {
        self.histories.get(&ghost)?.get(tick).copied()
    }

    /// History of `ghost`.
    pub fn history(&self, ghost: GhostId) -> Option<&SnapshotHistory> {
        self.histories.get(&ghost)
    }

    /// Drop everything held for `ghost`.
    pub fn forget_ghost(&mut self, ghost: GhostId) {
        self.histories.remove(&ghost);
    }
}

impl Default for SnapshotReceiver {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_HISTORY)
    }
}
