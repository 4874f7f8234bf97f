#![warn(missing_docs)]
//! Core primitives shared across the workspace.

pub mod command;
pub mod movement;

use serde::{Deserialize, Serialize};
use std::fmt;

// Re-export commonly used types
pub use command::{Command, MoveInput};
pub use movement::{advance_cube, tick_duration, CubeState, DEFAULT_TICK_RATE};

/// Fixed simulation tick (60 TPS by default).
///
/// Tick 0 is reserved as "no tick"; the first simulated tick is 1.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SimTick(pub u32);

impl SimTick {
    /// Sentinel before any simulated tick.
    pub const ZERO: Self = Self(0);

    /// Advance by `delta` ticks.
    pub fn advance(self, delta: u32) -> Self {
        Self(self.0.saturating_add(delta))
    }

    /// The tick immediately after this one.
    pub fn next(self) -> Self {
        self.advance(1)
    }

    /// Number of ticks from `earlier` to `self`, zero if `earlier` is newer.
    pub fn since(self, earlier: SimTick) -> u32 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for SimTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque session identifier assigned by the server on accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Stable arena index of a replicated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GhostId(pub u32);

impl fmt::Display for GhostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ghost#{}", self.0)
    }
}

/// Dense registry index of a ghost serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GhostTypeId(pub i32);
