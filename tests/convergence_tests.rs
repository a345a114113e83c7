//! Randomized convergence tests
//!
//! Each run drives a room through a seeded random mix of joins, leaves,
//! score awards, start requests and clock ticks, with deliveries between
//! replicas interleaved at random. At every quiet point all replicas must
//! agree on the replicated state and no color or spawn point may be held
//! twice.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::loopback::LoopbackRoom;
use shared::{ColorToken, MatchConfig, MatchSnapshot, ParticipantId};
use std::collections::HashSet;

const RUNS: u64 = 40;
const STEPS: usize = 60;

/// The replicated state without the round timer, which late joiners run
/// on their own clock
fn replicated(snapshot: &MatchSnapshot) -> MatchSnapshot {
    MatchSnapshot {
        running: false,
        ..snapshot.clone()
    }
}

fn check_exclusivity(snapshot: &MatchSnapshot) {
    let mut colors = HashSet::new();
    for participant in &snapshot.roster {
        if let Some(color) = participant.color {
            assert!(colors.insert(color), "color {:?} held twice", color);
            assert!(!snapshot.free_colors.contains(&color));
        }
    }
    assert_eq!(
        colors.len() + snapshot.free_colors.len(),
        ColorToken::ALL.len()
    );

    let mut holders = HashSet::new();
    for (_, holder, _) in &snapshot.spawns {
        if let Some(holder) = holder {
            assert!(holders.insert(*holder), "{} holds two spawn points", holder);
        }
    }
}

fn check_room(room: &LoopbackRoom) {
    let ids = room.ids();
    let Some(first) = ids.first() else {
        return;
    };

    let reference = room.session(*first).unwrap().controller().snapshot();
    check_exclusivity(&reference);

    for id in &ids {
        let snapshot = room.session(*id).unwrap().controller().snapshot();
        check_exclusivity(&snapshot);
        assert_eq!(
            replicated(&snapshot),
            replicated(&reference),
            "replica {} diverged from {}",
            id,
            first
        );
        let roster: Vec<ParticipantId> = snapshot.roster.iter().map(|p| p.id).collect();
        assert_eq!(roster, ids, "roster of {} out of step with the room", id);
    }
}

fn random_member(room: &LoopbackRoom, rng: &mut StdRng) -> Option<ParticipantId> {
    let ids = room.ids();
    if ids.is_empty() {
        None
    } else {
        Some(ids[rng.gen_range(0..ids.len())])
    }
}

/// Applies a few deliveries to random replicas, leaving the rest in flight
fn deliver_some(room: &mut LoopbackRoom, rng: &mut StdRng) {
    for _ in 0..rng.gen_range(0..6) {
        room.flush();
        if let Some(id) = random_member(room, rng) {
            room.deliver_one(id);
        }
    }
}

fn random_action(room: &mut LoopbackRoom, rng: &mut StdRng, joined: &mut usize) {
    match rng.gen_range(0..10) {
        0..=2 => {
            *joined += 1;
            room.join(&format!("p{}", joined));
        }
        3 => {
            if room.ids().len() > 1 {
                // the authority leaves as often as everyone else together
                let leaver = if rng.gen_bool(0.5) {
                    room.authority()
                } else {
                    random_member(room, rng)
                };
                if let Some(id) = leaver {
                    room.leave(id);
                }
            }
        }
        4..=5 => {
            if let (Some(from), Some(to)) = (random_member(room, rng), random_member(room, rng)) {
                let delta = rng.gen_range(-3..=5);
                room.session_mut(from).unwrap().award_score(to, delta);
            }
        }
        6 => {
            if let Some(id) = random_member(room, rng) {
                room.session_mut(id).unwrap().request_start();
            }
        }
        _ => {
            let dt = rng.gen_range(0.1..2.5);
            room.tick_all(dt);
        }
    }
}

fn run_scenario(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let config = MatchConfig::default().with_duration(4.0);
    let mut room = LoopbackRoom::new(config, seed);
    let mut joined = 0;

    for _ in 0..STEPS {
        for _ in 0..rng.gen_range(1..=3) {
            random_action(&mut room, &mut rng, &mut joined);
            deliver_some(&mut room, &mut rng);
        }

        room.pump_interleaved(&mut rng);
        room.pump();
        check_room(&room);
    }
}

#[test]
fn random_interleavings_converge() {
    for seed in 0..RUNS {
        run_scenario(seed);
    }
}

/// The authority starts a round and leaves while its start and spawn
/// traffic are only partly delivered
#[test]
fn authority_leaves_with_round_in_flight() {
    for seed in 0..RUNS {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut room = LoopbackRoom::new(MatchConfig::default(), seed);
        for name in ["a", "b", "c", "d"] {
            room.join(name);
        }
        room.pump_interleaved(&mut rng);
        room.pump();

        let authority = room.authority().unwrap();
        room.session_mut(authority).unwrap().request_start();
        room.tick_all(0.1);
        deliver_some(&mut room, &mut rng);
        room.leave(authority);
        deliver_some(&mut room, &mut rng);

        room.pump_interleaved(&mut rng);
        room.pump();
        check_room(&room);

        // whoever ran the round has every survivor placed
        let ids = room.ids();
        let session = room.session(ids[0]).unwrap();
        if session.is_running() {
            for id in &ids {
                assert!(
                    session.spawn_assignment(*id).is_some(),
                    "seed {}: {} was never spawned",
                    seed,
                    id
                );
            }
        }
    }
}

/// Late joiners arriving after every kind of traffic rebuild the same state
#[test]
fn late_joiners_converge_after_rounds() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut room = LoopbackRoom::new(MatchConfig::default().with_duration(3.0), 7);

    let a = room.join("a").unwrap();
    let b = room.join("b").unwrap();
    room.pump_interleaved(&mut rng);
    room.pump();

    for round in 0..3 {
        room.session_mut(b).unwrap().request_start();
        room.pump();
        room.tick_all(0.5);
        room.pump_interleaved(&mut rng);
        room.pump();

        room.session_mut(a).unwrap().award_score(b, round + 1);
        room.session_mut(b).unwrap().award_score(a, 2);
        room.tick_all(5.0);
        room.pump_interleaved(&mut rng);
        room.pump();
    }

    let late = room.join("late").unwrap();
    room.pump_interleaved(&mut rng);
    room.pump();

    check_room(&room);
    let session = room.session(late).unwrap();
    assert!(!session.is_running());
    assert_eq!(session.score(a), Some(2));
    assert_eq!(session.score(b), Some(3));
}
