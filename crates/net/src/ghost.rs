//! Ghost registry: per-type importance, snapshot size and delta codecs.
//!
//! Type identifiers are dense indices handed out at registration, so lookup
//! is a bounds-checked `Vec` index.

use crate::wire::{WireError, WireReader, WireResult, WireWriter};
use ghostnet_core::{CubeState, GhostTypeId};

/// Replicated state of a ghost, one variant per simulated archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GhostState {
    /// A player-controlled cube.
    Cube(CubeState),
}

impl GhostState {
    /// The cube state, if this ghost is a cube.
    pub fn as_cube(&self) -> Option<&CubeState> {
        match self {
            GhostState::Cube(cube) => Some(cube),
        }
    }
}

/// Codec and priority policy for one ghost type.
pub trait GhostSerializer: Send + Sync {
    /// Human-readable type name used in logs and the schema hash.
    fn name(&self) -> &'static str;

    /// Transmission priority; higher is sent first.
    fn importance(&self, state: &GhostState) -> i32;

    /// Exact encoded payload size in bytes.
    fn snapshot_size(&self) -> usize;

    /// Write `state` as a delta against `baseline` (zero state when `None`).
    ///
    /// Must write exactly [`snapshot_size`](Self::snapshot_size) bytes.
    fn serialize(
        &self,
        state: &GhostState,
        baseline: Option<&GhostState>,
        writer: &mut WireWriter,
    ) -> WireResult<()>;

    /// Read a delta written by [`serialize`](Self::serialize) against the same baseline.
    fn deserialize(
        &self,
        reader: &mut WireReader<'_>,
        baseline: Option<&GhostState>,
    ) -> WireResult<GhostState>;
}

/// Cube serializer: owner id raw, position as wrapping deltas.
#[derive(Debug, Clone, Copy)]
pub struct CubeGhostSerializer {
    importance: i32,
}

impl CubeGhostSerializer {
    /// Encoded size: owner + dx + dz.
    pub const SNAPSHOT_SIZE: usize = 12;

    /// Cube serializer with the default importance of 1.
    pub fn new() -> Self {
        Self::with_importance(1)
    }

    /// Cube serializer with a fixed importance score.
    pub fn with_importance(importance: i32) -> Self {
        Self { importance }
    }
}

impl Default for CubeGhostSerializer {
    fn default() -> Self {
        Self::new()
    }
}

fn cube_baseline(baseline: Option<&GhostState>) -> WireResult<CubeState> {
    match baseline {
        None => Ok(CubeState::default()),
        Some(GhostState::Cube(cube)) => Ok(*cube),
    }
}

impl GhostSerializer for CubeGhostSerializer {
    fn name(&self) -> &'static str {
        "CubeGhostSerializer"
    }

    fn importance(&self, _state: &GhostState) -> i32 {
        self.importance
    }

    fn snapshot_size(&self) -> usize {
        Self::SNAPSHOT_SIZE
    }

    fn serialize(
        &self,
        state: &GhostState,
        baseline: Option<&GhostState>,
        writer: &mut WireWriter,
    ) -> WireResult<()> {
        let GhostState::Cube(cube) = state;
        let base = cube_baseline(baseline)?;
        writer.write_i32(cube.owner);
        writer.write_i32(cube.x.wrapping_sub(base.x));
        writer.write_i32(cube.z.wrapping_sub(base.z));
        Ok(())
    }

    fn deserialize(
        &self,
        reader: &mut WireReader<'_>,
        baseline: Option<&GhostState>,
    ) -> WireResult<GhostState> {
        let base = cube_baseline(baseline)?;
        let owner = reader.read_i32()?;
        let dx = reader.read_i32()?;
        let dz = reader.read_i32()?;
        Ok(GhostState::Cube(CubeState {
            owner,
            x: base.x.wrapping_add(dx),
            z: base.z.wrapping_add(dz),
        }))
    }
}

/// Dense table of ghost serializers indexed by [`GhostTypeId`].
#[derive(Default)]
pub struct GhostRegistry {
    serializers: Vec<Box<dyn GhostSerializer>>,
}

impl GhostRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the cube type registered as type 0.
    pub fn with_cube() -> Self {
        let mut registry = Self::new();
        registry.register(CubeGhostSerializer::new());
        registry
    }

    /// Register a serializer, returning its dense type id.
    pub fn register<S: GhostSerializer + 'static>(&mut self, serializer: S) -> GhostTypeId {
        let id = GhostTypeId(self.serializers.len() as i32);
        self.serializers.push(Box::new(serializer));
        id
    }

    /// Serializer for `id`.
    pub fn get(&self, id: GhostTypeId) -> WireResult<&dyn GhostSerializer> {
        usize::try_from(id.0)
            .ok()
            .and_then(|index| self.serializers.get(index))
            .map(|serializer| serializer.as_ref())
            .ok_or(WireError::UnknownGhostType(id))
    }

    /// Payload size for `id`.
    pub fn snapshot_size(&self, id: GhostTypeId) -> WireResult<usize> {
        Ok(self.get(id)?.snapshot_size())
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.serializers.len()
    }

    /// Whether no types are registered.
    pub fn is_empty(&self) -> bool {
        self.serializers.is_empty()
    }

    /// Registered type names in id order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.serializers.iter().map(|serializer| serializer.name())
    }
}

impl std::fmt::Debug for GhostRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(owner: i32, x: i32, z: i32) -> GhostState {
        GhostState::Cube(CubeState { owner, x, z })
    }

    fn roundtrip(state: &GhostState, baseline: Option<&GhostState>) -> (Vec<u8>, GhostState) {
        let serializer = CubeGhostSerializer::new();
        let mut writer = WireWriter::new();
        serializer.serialize(state, baseline, &mut writer).unwrap();
        let bytes = writer.into_inner();
        let mut reader = WireReader::new(&bytes);
        let decoded = serializer.deserialize(&mut reader, baseline).unwrap();
        assert!(reader.is_empty());
        (bytes, decoded)
    }

    #[test]
    fn registration_assigns_dense_ids() {
        let mut registry = GhostRegistry::new();
        let a = registry.register(CubeGhostSerializer::with_importance(10));
        let b = registry.register(CubeGhostSerializer::with_importance(5));
        assert_eq!(a, GhostTypeId(0));
        assert_eq!(b, GhostTypeId(1));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(b).unwrap().importance(&cube(0, 0, 0)), 5);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry = GhostRegistry::with_cube();
        assert!(matches!(
            registry.get(GhostTypeId(3)),
            Err(WireError::UnknownGhostType(GhostTypeId(3)))
        ));
        assert!(registry.get(GhostTypeId(-1)).is_err());
        assert!(registry.snapshot_size(GhostTypeId(7)).is_err());
    }

    #[test]
    fn serialize_writes_exactly_snapshot_size() {
        let (bytes, _) = roundtrip(&cube(4, 1_000, -2_000), None);
        assert_eq!(bytes.len(), CubeGhostSerializer::SNAPSHOT_SIZE);
    }

    #[test]
    fn full_encode_is_delta_against_zero() {
        let state = cube(2, 160, -32);
        let (bytes, decoded) = roundtrip(&state, None);
        assert_eq!(decoded, state);
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_i32().unwrap(), 2);
        assert_eq!(reader.read_i32().unwrap(), 160);
        assert_eq!(reader.read_i32().unwrap(), -32);
    }

    #[test]
    fn delta_against_baseline_encodes_difference() {
        let baseline = cube(2, 100, 100);
        let state = cube(2, 116, 84);
        let (bytes, decoded) = roundtrip(&state, Some(&baseline));
        assert_eq!(decoded, state);
        let mut reader = WireReader::new(&bytes[4..]);
        assert_eq!(reader.read_i32().unwrap(), 16);
        assert_eq!(reader.read_i32().unwrap(), -16);
    }

    #[test]
    fn delta_wraps_at_extremes() {
        let baseline = cube(1, i32::MIN, i32::MAX);
        let state = cube(1, i32::MAX, i32::MIN);
        let (_, decoded) = roundtrip(&state, Some(&baseline));
        assert_eq!(decoded, state);
    }

    #[test]
    fn registry_debug_lists_names() {
        let registry = GhostRegistry::with_cube();
        assert_eq!(format!("{registry:?}"), "[\"CubeGhostSerializer\"]");
    }
}
