//! Per-tick input commands.

use crate::SimTick;
use serde::{Deserialize, Serialize};

/// Input command for one simulation tick.
///
/// `horizontal` and `vertical` are each one of `-1`, `0` or `1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    /// Tick this command drives.
    pub tick: SimTick,
    /// Left (-1) / right (+1).
    pub horizontal: i32,
    /// Back (-1) / forward (+1).
    pub vertical: i32,
}

impl Command {
    /// The neutral `{0,0}` command used whenever no command was recorded.
    pub fn neutral(tick: SimTick) -> Self {
        Self {
            tick,
            horizontal: 0,
            vertical: 0,
        }
    }

    /// Whether this command carries no movement.
    pub fn is_neutral(&self) -> bool {
        self.horizontal == 0 && self.vertical == 0
    }

    /// Verify axis values are in range.
    pub fn verify(&self) -> Result<(), &'static str> {
        if !(-1..=1).contains(&self.horizontal) {
            return Err("Invalid horizontal axis value");
        }
        if !(-1..=1).contains(&self.vertical) {
            return Err("Invalid vertical axis value");
        }
        Ok(())
    }
}

/// Raw sampled input, before it is bound to a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveInput {
    /// Left (-1) / right (+1).
    pub horizontal: i32,
    /// Back (-1) / forward (+1).
    pub vertical: i32,
}

impl MoveInput {
    /// Tag this input with a tick, clamping both axes into `-1..=1`.
    pub fn into_command(self, tick: SimTick) -> Command {
        Command {
            tick,
            horizontal: self.horizontal.signum(),
            vertical: self.vertical.signum(),
        }
    }
}
