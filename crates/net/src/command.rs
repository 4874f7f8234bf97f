//! Command stream: per-tick input encoding and tick-indexed buffering.
//!
//! The client samples one [`Command`] per tick through an injected
//! [`InputSource`], keeps it locally for prediction replay, and queues it for
//! sending. The server stores received commands in a per-connection
//! [`CommandBuffer`] and consumes the entry for the tick being simulated.

use crate::wire::{WireReader, WireResult, WireWriter};
use ghostnet_core::{Command, MoveInput, SimTick};
use std::collections::VecDeque;
use tracing::{trace, warn};

/// Encoded size of a command body (horizontal + vertical).
pub const COMMAND_PAYLOAD_SIZE: usize = 8;

/// Default number of ticks a command buffer retains.
pub const DEFAULT_COMMAND_WINDOW: usize = 64;

/// Append the fixed-layout command body to `writer`.
///
/// The tick is not part of the body; it travels in the message header.
pub fn write_command(command: &Command, writer: &mut WireWriter) {
    writer.write_i32(command.horizontal);
    writer.write_i32(command.vertical);
}

/// Encode a command body.
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut writer = WireWriter::with_capacity(COMMAND_PAYLOAD_SIZE);
    write_command(command, &mut writer);
    writer.into_inner()
}

/// Read a command body from `reader`, tagging it with the externally supplied tick.
pub fn read_command(reader: &mut WireReader<'_>, tick: SimTick) -> WireResult<Command> {
    let horizontal = reader.read_i32()?;
    let vertical = reader.read_i32()?;
    Ok(Command {
        tick,
        horizontal,
        vertical,
    })
}

/// Decode a command body.
pub fn decode_command(bytes: &[u8], tick: SimTick) -> WireResult<Command> {
    let mut reader = WireReader::new(bytes);
    let command = read_command(&mut reader, tick)?;
    reader.finish()?;
    Ok(command)
}

/// Ring buffer of commands keyed by tick.
///
/// Each tick maps to one slot (`tick % window`). Inserting overwrites any
/// entry already stored for the same tick; entries older than the window
/// behind the newest tick are evicted.
#[derive(Debug, Clone)]
pub struct CommandBuffer {
    slots: Vec<Option<Command>>,
    newest: Option<SimTick>,
}

impl CommandBuffer {
    /// Create a buffer retaining `window` ticks (at least one).
    pub fn new(window: usize) -> Self {
        Self {
            slots: vec![None; window.max(1)],
            newest: None,
        }
    }

    /// Number of ticks retained.
    pub fn window(&self) -> usize {
        self.slots.len()
    }

    /// Store a command, replacing any existing command for its tick.
    ///
    /// Returns `false` if the command is already older than the retained window.
    pub fn insert(&mut self, command: Command) -> bool {
        if let Some(newest) = self.newest {
            if newest.since(command.tick) as usize >= self.window() {
                trace!(tick = %command.tick, newest = %newest, "Dropping command outside window");
                return false;
            }
        }
        let index = self.slot(command.tick);
        self.slots[index] = Some(command);
        if self.newest.map_or(true, |newest| command.tick > newest) {
            self.newest = Some(command.tick);
        }
        true
    }

    /// Command recorded for `tick`, if still retained.
    pub fn get(&self, tick: SimTick) -> Option<Command> {
        let newest = self.newest?;
        if tick > newest || newest.since(tick) as usize >= self.window() {
            return None;
        }
        self.slots[self.slot(tick)].filter(|cmd| cmd.tick == tick)
    }

    /// Command for `tick`, or the neutral command when none was recorded.
    ///
    /// A missing command is a desync, not an error; it is logged and simulated as `{0,0}`.
    pub fn command_or_neutral(&self, tick: SimTick) -> Command {
        match self.get(tick) {
            Some(command) => command,
            None => {
                warn!(tick = %tick, "No command buffered for tick, using neutral input");
                Command::neutral(tick)
            }
        }
    }

    /// Newest tick ever inserted.
    pub fn newest_tick(&self) -> Option<SimTick> {
        self.newest
    }

    /// Number of retained commands.
    pub fn len(&self) -> usize {
        match self.newest {
            Some(newest) => self
                .slots
                .iter()
                .flatten()
                .filter(|cmd| newest.since(cmd.tick) < self.window() as u32)
                .count(),
            None => 0,
        }
    }

    /// Whether no commands are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every command.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.newest = None;
    }

    fn slot(&self, tick: SimTick) -> usize {
        tick.0 as usize % self.slots.len()
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_WINDOW)
    }
}

/// Injected input capability; the concrete device binding lives outside the core.
pub trait InputSource {
    /// Sample the current input state.
    fn poll_input(&mut self) -> MoveInput;
}

/// Input source that never moves.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeutralInput;

impl InputSource for NeutralInput {
    fn poll_input(&mut self) -> MoveInput {
        MoveInput::default()
    }
}

/// Input source replaying a fixed sequence, then holding neutral.
#[derive(Debug, Default, Clone)]
pub struct ScriptedInput {
    steps: VecDeque<MoveInput>,
}

impl ScriptedInput {
    /// Replay `steps` one per poll.
    pub fn new(steps: impl IntoIterator<Item = MoveInput>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    /// Polls left before the script runs out.
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl InputSource for ScriptedInput {
    fn poll_input(&mut self) -> MoveInput {
        self.steps.pop_front().unwrap_or_default()
    }
}

impl<T: InputSource + ?Sized> InputSource for Box<T> {
    fn poll_input(&mut self) -> MoveInput {
        (**self).poll_input()
    }
}

/// Client side of the command stream.
pub struct CommandStream<I> {
    input: I,
    buffer: CommandBuffer,
    outbox: Vec<Command>,
}

impl<I: InputSource> CommandStream<I> {
    /// Create a stream sampling from `input`, retaining `window` ticks locally.
    pub fn new(input: I, window: usize) -> Self {
        Self {
            input,
            buffer: CommandBuffer::new(window),
            outbox: Vec::new(),
        }
    }

    /// Sample input for `tick`, record it locally and queue it for sending.
    pub fn sample(&mut self, tick: SimTick) -> Command {
        let command = self.input.poll_input().into_command(tick);
        self.buffer.insert(command);
        self.outbox.push(command);
        command
    }

    /// Take every command queued since the last drain.
    pub fn drain_outbox(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.outbox)
    }

    /// Locally issued commands, used for resimulation.
    pub fn buffer(&self) -> &CommandBuffer {
        &self.buffer
    }
}
