//! Join handshake: binds a connection to exactly one spawned ghost.
//!
//! The server keeps a [`SessionTable`] keyed by connection. Join requests are
//! queued as they arrive and processed once per tick; a connection that is
//! already in game ignores further requests, so duplicates and retransmits
//! never produce a second spawn.

use ghostnet_core::{ConnectionId, GhostId};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Server-side state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport connected, no join seen yet.
    Connected,
    /// A join request is queued.
    JoinRequested,
    /// Bound to its controlled ghost.
    InGame {
        /// Ghost spawned for this connection.
        ghost: GhostId,
    },
}

impl SessionState {
    /// Whether the connection has been bound to a ghost.
    pub fn is_in_game(&self) -> bool {
        matches!(self, SessionState::InGame { .. })
    }
}

/// A join request awaiting processing. Consumed by [`SessionTable::process_join`].
#[derive(Debug, PartialEq, Eq)]
pub struct JoinRequest {
    /// Requesting connection.
    pub connection: ConnectionId,
    /// Opaque value carried by the request.
    pub value: i32,
}

/// Result of processing one join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A ghost was spawned and bound.
    Spawned(GhostId),
    /// The connection was already in game; nothing happened.
    AlreadyInGame(GhostId),
    /// The connection is not (or no longer) known.
    UnknownConnection,
}

/// Session state for every connection on the server.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<ConnectionId, SessionState>,
}

impl SessionTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted connection.
    pub fn connect(&mut self, connection: ConnectionId) {
        if self.sessions.contains_key(&connection) {
            warn!(connection = %connection, "Connection registered twice");
            return;
        }
        self.sessions.insert(connection, SessionState::Connected);
        debug!(connection = %connection, "Connection registered");
    }

    /// Release a connection, returning the ghost it controlled.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Option<GhostId> {
        match self.sessions.remove(&connection)? {
            SessionState::InGame { ghost } => Some(ghost),
            _ => None,
        }
    }

    /// Record that a join request arrived, returning the request to process.
    ///
    /// The request is returned even for connections already in game; the
    /// duplicate is discarded when processed.
    pub fn queue_join(&mut self, connection: ConnectionId, value: i32) -> Option<JoinRequest> {
        let state = self.sessions.get_mut(&connection)?;
        if *state == SessionState::Connected {
            *state = SessionState::JoinRequested;
        }
        Some(JoinRequest { connection, value })
    }

    /// Process a join request, calling `spawn` at most once per connection.
    pub fn process_join(
        &mut self,
        request: JoinRequest,
        spawn: impl FnOnce(ConnectionId) -> GhostId,
    ) -> JoinOutcome {
        let Some(state) = self.sessions.get_mut(&request.connection) else {
            debug!(connection = %request.connection, "Join request from unknown connection");
            return JoinOutcome::UnknownConnection;
        };

        if let SessionState::InGame { ghost } = *state {
            debug!(
                connection = %request.connection,
                ghost = %ghost,
                "Ignoring duplicate join request"
            );
            return JoinOutcome::AlreadyInGame(ghost);
        }

        let ghost = spawn(request.connection);
        *state = SessionState::InGame { ghost };
        info!(
            connection = %request.connection,
            ghost = %ghost,
            value = request.value,
            "Connection in game"
        );
        JoinOutcome::Spawned(ghost)
    }

    /// State of `connection`.
    pub fn state(&self, connection: ConnectionId) -> Option<SessionState> {
        self.sessions.get(&connection).copied()
    }

    /// Ghost controlled by `connection`.
    pub fn ghost_of(&self, connection: ConnectionId) -> Option<GhostId> {
        match self.state(connection)? {
            SessionState::InGame { ghost } => Some(ghost),
            _ => None,
        }
    }

    /// Known connections in ascending order.
    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut connections: Vec<_> = self.sessions.keys().copied().collect();
        connections.sort();
        connections
    }

    /// Number of known connections.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no connections are known.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Client-side state of the join handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientSessionState {
    /// Connected, join not yet sent.
    #[default]
    Connected,
    /// Join sent, awaiting acceptance.
    JoinRequested,
    /// Server bound a ghost to this client.
    InGame {
        /// Controlled ghost.
        ghost: GhostId,
    },
}

/// Client side of the join handshake.
#[derive(Debug, Default)]
pub struct ClientSession {
    state: ClientSessionState,
}

impl ClientSession {
    /// Fresh session in the connected state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the join value to send, only on the first call.
    pub fn request_join(&mut self, value: i32) -> Option<i32> {
        match self.state {
            ClientSessionState::Connected => {
                self.state = ClientSessionState::JoinRequested;
                Some(value)
            }
            _ => None,
        }
    }

    /// Record the server's acceptance. Returns `false` if already in game.
    pub fn on_join_accepted(&mut self, ghost: GhostId) -> bool {
        match self.state {
            ClientSessionState::InGame { ghost: existing } => {
                if existing != ghost {
                    warn!(existing = %existing, ghost = %ghost, "Second join acceptance ignored");
                }
                false
            }
            _ => {
                self.state = ClientSessionState::InGame { ghost };
                info!(ghost = %ghost, "Joined game");
                true
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> ClientSessionState {
        self.state
    }

    /// Controlled ghost once in game.
    pub fn ghost(&self) -> Option<GhostId> {
        match self.state {
            ClientSessionState::InGame { ghost } => Some(ghost),
            _ => None,
        }
    }
}
