//! Arena of server-authoritative ghosts.
//!
//! Ghost ids are arena indices plus one and are never reused, so a despawned
//! id can never alias a later ghost in a client's baseline history.

use ghostnet_core::{ConnectionId, GhostId, GhostTypeId, SimTick};
use ghostnet_net::GhostState;

/// A replicated entity owned by one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ghost {
    id: GhostId,
    type_id: GhostTypeId,
    owner: ConnectionId,
    spawn_tick: SimTick,
    /// Latest authoritative state.
    pub state: GhostState,
}

impl Ghost {
    /// Arena id.
    pub fn id(&self) -> GhostId {
        self.id
    }

    /// Registered type; fixed at spawn.
    pub fn type_id(&self) -> GhostTypeId {
        self.type_id
    }

    /// Owning connection; fixed at spawn.
    pub fn owner(&self) -> ConnectionId {
        self.owner
    }

    /// Tick the ghost was spawned on.
    pub fn spawn_tick(&self) -> SimTick {
        self.spawn_tick
    }
}

/// Ghost storage indexed by [`GhostId`].
#[derive(Debug, Default)]
pub struct GhostArena {
    slots: Vec<Option<Ghost>>,
    live: usize,
}

impl GhostArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a ghost and return its id.
    pub fn spawn(
        &mut self,
        type_id: GhostTypeId,
        owner: ConnectionId,
        spawn_tick: SimTick,
        state: GhostState,
    ) -> GhostId {
        let id = GhostId(self.slots.len() as u32 + 1);
        self.slots.push(Some(Ghost {
            id,
            type_id,
            owner,
            spawn_tick,
            state,
        }));
        self.live += 1;
        id
    }

    /// Remove a ghost, returning it if it was live.
    pub fn despawn(&mut self, id: GhostId) -> Option<Ghost> {
        let ghost = self.slot_mut(id)?.take()?;
        self.live -= 1;
        Some(ghost)
    }

    /// Ghost by id.
    pub fn get(&self, id: GhostId) -> Option<&Ghost> {
        let index = (id.0 as usize).checked_sub(1)?;
        self.slots.get(index)?.as_ref()
    }

    /// Mutable ghost by id.
    pub fn get_mut(&mut self, id: GhostId) -> Option<&mut Ghost> {
        self.slot_mut(id)?.as_mut()
    }

    /// Live ghosts in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Ghost> {
        self.slots.iter().flatten()
    }

    /// Live ghosts in ascending id order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Ghost> {
        self.slots.iter_mut().flatten()
    }

    /// Number of live ghosts.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether no ghost is live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn slot_mut(&mut self, id: GhostId) -> Option<&mut Option<Ghost>> {
        let index = (id.0 as usize).checked_sub(1)?;
        self.slots.get_mut(index)
    }
}
