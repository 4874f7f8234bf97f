//! Fuzz-style property tests for the network codec and replication.
//!
//! These tests validate that decoders handle arbitrary network input
//! gracefully and that scheduling and prediction hold their guarantees.

use ghostnet_core::{advance_cube, tick_duration, Command, CubeState, GhostId, GhostTypeId, SimTick};
use ghostnet_net::{
    decode_client_message, decode_command, decode_server_message, encode_client_message,
    encode_command, ClientMessage, CommandBuffer, ConnectionReplication, CubeGhostSerializer,
    GhostRegistry, GhostState, PredictedGhost, ReplicatedGhost, SnapshotPacket, SnapshotReceiver,
};
use proptest::prelude::*;

fn axis() -> impl Strategy<Value = i32> {
    prop_oneof![Just(-1), Just(0), Just(1)]
}

fn command_strategy() -> impl Strategy<Value = Command> {
    (any::<u32>(), axis(), axis()).prop_map(|(tick, horizontal, vertical)| Command {
        tick: SimTick(tick),
        horizontal,
        vertical,
    })
}

proptest! {
    /// Property: Arbitrary bytes don't crash client decoder
    #[test]
    fn arbitrary_bytes_dont_crash_client(
        random_bytes in prop::collection::vec(any::<u8>(), 0..2000),
    ) {
        let _result = decode_client_message(&random_bytes);
    }

    /// Property: Arbitrary bytes don't crash server decoder
    #[test]
    fn arbitrary_bytes_dont_crash_server(
        random_bytes in prop::collection::vec(any::<u8>(), 0..2000),
    ) {
        let _result = decode_server_message(&random_bytes);
    }

    /// Property: Arbitrary snapshot records don't crash the receiver
    #[test]
    fn arbitrary_records_dont_crash_receiver(
        tick in any::<u32>(),
        records in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let registry = GhostRegistry::with_cube();
        let mut receiver = SnapshotReceiver::new(32);
        let packet = SnapshotPacket { tick: SimTick(tick), records };
        let _result = receiver.decode_packet(&registry, &packet);
    }

    /// Property: Valid commands survive the body codec and the full frame
    #[test]
    fn commands_roundtrip(command in command_strategy()) {
        let body = encode_command(&command);
        prop_assert_eq!(decode_command(&body, command.tick).unwrap(), command);

        let msg = ClientMessage::Command(command);
        let frame = encode_client_message(&msg).unwrap();
        prop_assert_eq!(decode_client_message(&frame).unwrap(), msg);
    }

    /// Property: The scheduler never writes more than the budget
    #[test]
    fn snapshot_never_exceeds_budget(
        budget in 4usize..600,
        positions in prop::collection::vec((any::<i32>(), any::<i32>()), 0..60),
        ticks in 1u32..6,
    ) {
        let mut registry = GhostRegistry::new();
        registry.register(CubeGhostSerializer::with_importance(3));
        registry.register(CubeGhostSerializer::with_importance(7));

        let states: Vec<_> = positions
            .iter()
            .enumerate()
            .map(|(i, (x, z))| GhostState::Cube(CubeState { owner: i as i32, x: *x, z: *z }))
            .collect();
        let mut replication = ConnectionReplication::new(budget, 32);

        for tick in 1..=ticks {
            let ghosts = states.iter().enumerate().map(|(i, state)| ReplicatedGhost {
                id: GhostId(i as u32 + 1),
                type_id: GhostTypeId((i % 2) as i32),
                state,
            });
            let scheduled = replication.build_snapshot(SimTick(tick), &registry, ghosts);
            prop_assert!(scheduled.packet.encoded_len() <= budget);
            prop_assert_eq!(scheduled.included.len() + scheduled.deferred.len(), states.len());
            replication.acknowledge(SimTick(tick));
        }
    }

    /// Property: Decoding the same packet twice yields the same states
    #[test]
    fn snapshot_decode_is_idempotent(
        first in prop::collection::vec((any::<i32>(), any::<i32>()), 1..20),
        moves in prop::collection::vec((-64i32..64, -64i32..64), 1..20),
    ) {
        let registry = GhostRegistry::with_cube();
        let mut replication = ConnectionReplication::new(1200, 32);
        let mut receiver = SnapshotReceiver::new(32);

        let mut states: Vec<_> = first
            .iter()
            .map(|(x, z)| GhostState::Cube(CubeState { owner: 0, x: *x, z: *z }))
            .collect();
        let offer = |states: &[GhostState]| -> Vec<(GhostId, GhostState)> {
            states.iter().enumerate().map(|(i, s)| (GhostId(i as u32 + 1), *s)).collect()
        };

        let initial = offer(&states);
        let scheduled = replication.build_snapshot(
            SimTick(1),
            &registry,
            initial.iter().map(|(id, state)| ReplicatedGhost { id: *id, type_id: GhostTypeId(0), state }),
        );
        receiver.decode_packet(&registry, &scheduled.packet).unwrap();
        replication.acknowledge(SimTick(1));

        for (state, (dx, dz)) in states.iter_mut().zip(moves.iter().cycle()) {
            let GhostState::Cube(cube) = state;
            cube.x = cube.x.wrapping_add(*dx);
            cube.z = cube.z.wrapping_add(*dz);
        }
        let moved = offer(&states);
        let scheduled = replication.build_snapshot(
            SimTick(2),
            &registry,
            moved.iter().map(|(id, state)| ReplicatedGhost { id: *id, type_id: GhostTypeId(0), state }),
        );

        let once = receiver.decode_packet(&registry, &scheduled.packet).unwrap();
        let twice = receiver.decode_packet(&registry, &scheduled.packet).unwrap();
        prop_assert_eq!(&once, &twice);
        for ghost in &once.ghosts {
            let expected = moved.iter().find(|(id, _)| *id == ghost.ghost_id).map(|(_, s)| *s);
            prop_assert_eq!(Some(ghost.state), expected);
        }
    }

    /// Property: Replay from a restored baseline matches uninterrupted simulation
    #[test]
    fn prediction_converges(
        inputs in prop::collection::vec((axis(), axis()), 2..80),
        split in any::<prop::sample::Index>(),
    ) {
        let dt = tick_duration(60);
        let start = CubeState::spawned_by(1);
        let mut buffer = CommandBuffer::new(128);
        let mut predicted = PredictedGhost::with_window(GhostId(1), SimTick(0), start, dt, 128);

        let mut authoritative = Vec::new();
        let mut state = start;
        for (i, (horizontal, vertical)) in inputs.iter().enumerate() {
            let command = Command { tick: SimTick(i as u32 + 1), horizontal: *horizontal, vertical: *vertical };
            buffer.insert(command);
            predicted.predict(&command);
            state = advance_cube(state, &command, dt);
            authoritative.push(state);
        }
        let uninterrupted = predicted.state();

        // Knock the prediction off, then restore the true state at a random tick.
        let split = split.index(inputs.len() - 1) + 1;
        predicted.reconcile(SimTick(split as u32), CubeState::spawned_by(99), &buffer);
        predicted.reconcile(SimTick(split as u32 + 1), authoritative[split], &buffer);

        prop_assert_eq!(predicted.state(), uninterrupted);
        prop_assert_eq!(uninterrupted, state);
    }

    /// Property: A tick with no buffered command simulates as neutral
    #[test]
    fn missing_command_is_neutral(
        present in prop::collection::btree_set(1u32..64, 0..32),
        lookup in 1u32..64,
    ) {
        let mut buffer = CommandBuffer::new(64);
        for tick in &present {
            buffer.insert(Command { tick: SimTick(*tick), horizontal: 1, vertical: 1 });
        }
        let command = buffer.command_or_neutral(SimTick(lookup));
        if present.contains(&lookup) {
            prop_assert_eq!(command.horizontal, 1);
        } else {
            prop_assert!(command.is_neutral());
            prop_assert_eq!(command.tick, SimTick(lookup));
        }
    }
}
