//! # Arena match replication core
//!
//! Everything every replica of the arena match agrees on lives here: the
//! color pool, the participant roster, spawn point assignment, the match
//! lifecycle and the invocations that carry changes between replicas.
//!
//! Replicas never share memory. Each one owns a [`session::Session`] that
//! applies delivered [`protocol::Invocation`]s in order and hands its own
//! outgoing invocations to a [`gateway::ReplicationGateway`]. Exactly one
//! replica is the authority; only it originates roster, start, spawn and
//! game-over changes, and everyone (the authority included) applies the
//! resulting broadcasts the same way.
//!
//! [`room::RoomState`] holds the delivery rules of a room (membership,
//! authority election, the buffered log replayed to late joiners) and is
//! shared by the UDP relay and the in-process [`loopback::LoopbackRoom`].

use serde::{Deserialize, Serialize};

pub mod controller;
pub mod gateway;
pub mod loopback;
pub mod pool;
pub mod protocol;
pub mod room;
pub mod roster;
pub mod session;
pub mod spawn;

pub use controller::{
    MatchController, MatchEvent, MatchPhase, MatchSnapshot, ReplicaContext, SpawnAssignment,
};
pub use protocol::{Invocation, Member, Outbound, Packet, Target};
pub use session::Session;

pub type ParticipantId = u32;
pub type SpawnPointId = u32;

pub const CLIENT_VERSION: u32 = 1;
pub const DEFAULT_CAPACITY: usize = 4;
pub const DEFAULT_MATCH_SECONDS: f32 = 15.0;
pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;
pub const MEMBER_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorToken {
    Red,
    Blue,
    Green,
    Yellow,
}

impl ColorToken {
    pub const ALL: [ColorToken; 4] = [
        ColorToken::Red,
        ColorToken::Blue,
        ColorToken::Green,
        ColorToken::Yellow,
    ];

    pub fn rgb(&self) -> (f32, f32, f32) {
        match self {
            ColorToken::Red => (1.0, 0.0, 0.0),
            ColorToken::Blue => (0.0, 0.0, 1.0),
            ColorToken::Green => (0.0, 1.0, 0.0),
            ColorToken::Yellow => (1.0, 0.92, 0.016),
        }
    }

    pub fn hex(&self) -> &'static str {
        match self {
            ColorToken::Red => "ff0000",
            ColorToken::Blue => "0000ff",
            ColorToken::Green => "00ff00",
            ColorToken::Yellow => "ffeb04",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Match rules every replica of a room must agree on
#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    pub capacity: usize,
    /// Round length in seconds
    pub match_duration: f32,
    pub palette: Vec<ColorToken>,
    pub spawn_layout: Vec<(SpawnPointId, Position)>,
}

impl MatchConfig {
    pub fn with_duration(mut self, seconds: f32) -> Self {
        self.match_duration = seconds;
        self
    }

    pub fn with_spawn_layout(mut self, layout: Vec<(SpawnPointId, Position)>) -> Self {
        self.spawn_layout = layout;
        self
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            match_duration: DEFAULT_MATCH_SECONDS,
            palette: ColorToken::ALL.to_vec(),
            // one point per arena corner
            spawn_layout: vec![
                (1, Position::new(-8.0, 1.0, -8.0)),
                (2, Position::new(8.0, 1.0, -8.0)),
                (3, Position::new(-8.0, 1.0, 8.0)),
                (4, Position::new(8.0, 1.0, 8.0)),
            ],
        }
    }
}
