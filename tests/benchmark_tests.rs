//! Performance benchmarks for the replication hot paths

use bincode::{deserialize, serialize};
use client::console::Command;
use server::matchmaker::{Matchmaker, MatchmakerSettings};
use shared::{
    master_of, EntityId, EntityKind, EntitySnapshot, EntityState, Packet, ParticipantId,
    ParticipantInfo, Position, RoomSnapshot, Rotation, MAX_NICKNAME_LEN, PROTOCOL_VERSION,
};
use std::time::Instant;

fn members(count: u32) -> Vec<ParticipantInfo> {
    (0..count)
        .map(|i| ParticipantInfo {
            id: ParticipantId(i + 1),
            nickname: format!("{:>width$}", i, width = MAX_NICKNAME_LEN),
            join_order: u64::from(count - i),
        })
        .collect()
}

/// Benchmarks the state tuple codec
#[test]
fn benchmark_state_tuple_codec() {
    let state = EntityState {
        active_effect: true,
        health: 0.75,
    };

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = state.encode().unwrap();
        let decoded = EntityState::decode(&bytes).unwrap();
        assert_eq!(decoded.active_effect, state.active_effect);
    }

    let duration = start.elapsed();
    println!(
        "State tuple codec: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks master evaluation over a full room
#[test]
fn benchmark_master_evaluation() {
    let room = members(16);

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        assert_eq!(master_of(&room), Some(ParticipantId(16)));
    }

    let duration = start.elapsed();
    println!(
        "Master evaluation: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 500);
}

/// Benchmarks serialization of the largest packet, a full room snapshot
/// with every nickname at its length limit
#[test]
fn benchmark_room_snapshot_serialization() {
    let state = EntityState::new().encode().unwrap();
    let snapshot = RoomSnapshot {
        name: "bench".to_string(),
        max_participants: 16,
        members: members(16),
        level: Some("Room for 16".to_string()),
        entities: (1..=16)
            .map(|i| EntitySnapshot {
                entity: EntityId::allocate(ParticipantId(i), 1),
                owner: ParticipantId(i),
                kind: EntityKind::Player,
                position: Position::new(i as f32, 1.0, 0.0),
                rotation: Rotation::IDENTITY,
                state: Some(state.clone()),
            })
            .collect(),
    };
    let packet = Packet::JoinedRoom { room: snapshot };

    let iterations = 10_000;
    let start = Instant::now();
    let mut size = 0;

    for _ in 0..iterations {
        let bytes = serialize(&packet).unwrap();
        size = bytes.len();
        let _: Packet = deserialize(&bytes).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Room snapshot: {} bytes, {} iterations in {:?} ({:.2} μs/iter)",
        size,
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Must fit the receive buffer on both ends
    assert!(size < 2048);
    assert!(duration.as_millis() < 2000);
}

/// Stress test: sixteen rooms of four streaming state every tick
#[test]
fn stress_test_relay_ticks() {
    let mut matchmaker = Matchmaker::with_seed(MatchmakerSettings::default(), 1);
    let participants: Vec<ParticipantId> = (1..=64).map(ParticipantId).collect();

    for (index, id) in participants.iter().enumerate() {
        matchmaker.connect(*id, PROTOCOL_VERSION, "bench");
        if index % 4 == 0 {
            matchmaker.handle_packet(
                *id,
                Packet::CreateRoom {
                    name: Some(format!("room{}", index / 4)),
                    max_participants: 4,
                },
            );
        } else {
            matchmaker.handle_packet(*id, Packet::JoinRandomRoom);
        }
        matchmaker.handle_packet(
            *id,
            Packet::Instantiate {
                entity: EntityId::allocate(*id, 1),
                kind: EntityKind::Player,
                position: Position::new(0.0, 1.0, 0.0),
                rotation: Rotation::IDENTITY,
            },
        );
    }

    let payload = EntityState::new().encode().unwrap();
    let ticks = 1000;
    let start = Instant::now();
    let mut relayed = 0;

    for _ in 0..ticks {
        for id in &participants {
            matchmaker.handle_packet(
                *id,
                Packet::EntityState {
                    entity: EntityId::allocate(*id, 1),
                    payload: payload.clone(),
                },
            );
        }
        relayed += matchmaker.flush_tick().len();
    }

    let duration = start.elapsed();
    println!(
        "Relay: {} ticks, {} packets relayed in {:?} ({:.2} μs/tick)",
        ticks,
        relayed,
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    assert_eq!(matchmaker.participant_count(), 64);
    assert_eq!(relayed, ticks * 64 * 3);
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks console command parsing
#[test]
fn benchmark_command_parsing() {
    let lines = ["connect", "FIRE", "release", "hit", "name Ada", "status", "bogus"];

    let iterations = 10_000;
    let start = Instant::now();
    let mut recognized = 0;

    for _ in 0..iterations {
        for line in &lines {
            if Command::parse(line).is_some() {
                recognized += 1;
            }
        }
    }

    let duration = start.elapsed();
    println!(
        "Command parsing: {} lines in {:?}",
        iterations * lines.len(),
        duration
    );

    assert_eq!(recognized, iterations * (lines.len() - 1));
    assert_eq!(Command::parse("quit"), Some(Command::Quit));
    assert!(duration.as_millis() < 1000);
}
