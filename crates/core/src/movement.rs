//! Deterministic per-tick movement rule for the controlled cube.
//!
//! Positions are fixed-point integers so prediction replays are bit-identical
//! to the authoritative simulation.

use crate::command::Command;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default simulation rate in ticks per second.
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Position units per world unit (1/1000 unit precision).
pub const UNITS_PER_WORLD_UNIT: i64 = 1000;

/// Cube speed in world units per second.
const CUBE_SPEED: i64 = 1;

/// Replicated state of a cube ghost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CubeState {
    /// Network id of the owning player.
    pub owner: i32,
    /// X position in 1/1000 units.
    pub x: i32,
    /// Z position in 1/1000 units.
    pub z: i32,
}

impl CubeState {
    /// Cube at the origin owned by `owner`.
    pub fn spawned_by(owner: i32) -> Self {
        Self { owner, x: 0, z: 0 }
    }

    /// Position as floating-point world units (presentation only).
    pub fn to_f32(&self) -> (f32, f32) {
        (
            self.x as f32 / UNITS_PER_WORLD_UNIT as f32,
            self.z as f32 / UNITS_PER_WORLD_UNIT as f32,
        )
    }
}

/// Fixed tick duration for a tick rate (clamped to at least 1 TPS).
pub fn tick_duration(tick_rate: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(tick_rate.max(1)))
}

/// Advance a cube by one tick.
///
/// Pure: the result depends only on `state`, `command` and `dt`.
pub fn advance_cube(state: CubeState, command: &Command, dt: Duration) -> CubeState {
    let step = (CUBE_SPEED * UNITS_PER_WORLD_UNIT * dt.as_micros() as i64 / 1_000_000) as i32;
    let mut next = state;
    next.x = next.x.wrapping_add(command.horizontal.signum().wrapping_mul(step));
    next.z = next.z.wrapping_add(command.vertical.signum().wrapping_mul(step));
    next
}
