//! Replicated invocations and the relay wire format

use crate::{ColorToken, ParticipantId, Position, SpawnPointId};
use serde::{Deserialize, Serialize};

/// A state change every addressed replica applies on receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Invocation {
    AddParticipant {
        id: ParticipantId,
        name: String,
    },
    RemoveParticipant {
        id: ParticipantId,
    },
    LevelLoaded {
        id: ParticipantId,
    },
    RequestStart,
    StartMatch,
    AssignSpawn {
        point: SpawnPointId,
        participant: ParticipantId,
        color: Option<ColorToken>,
    },
    FreeSpawn {
        point: SpawnPointId,
    },
    SpawnPlayer {
        position: Position,
        color: Option<ColorToken>,
    },
    AdjustScore {
        id: ParticipantId,
        delta: i32,
    },
    SetScore {
        id: ParticipantId,
        value: i32,
    },
    GameOver,
}

impl Invocation {
    /// Invocations only the authority may originate
    pub fn requires_authority(&self) -> bool {
        matches!(
            self,
            Invocation::AddParticipant { .. }
                | Invocation::RemoveParticipant { .. }
                | Invocation::StartMatch
                | Invocation::AssignSpawn { .. }
                | Invocation::FreeSpawn { .. }
                | Invocation::SpawnPlayer { .. }
                | Invocation::SetScore { .. }
                | Invocation::GameOver
        )
    }

    /// Whether replaying `earlier` before `self` is redundant for a late
    /// joiner
    ///
    /// A start resets every spawn point and score, so the previous round's
    /// spawn traffic, scores and end are covered by it. A score total covers
    /// older totals for the same participant. Roster invocations are never
    /// superseded: the order colors return to the pool depends on them.
    pub fn supersedes(&self, earlier: &Invocation) -> bool {
        match self {
            Invocation::StartMatch => matches!(
                earlier,
                Invocation::StartMatch
                    | Invocation::GameOver
                    | Invocation::AssignSpawn { .. }
                    | Invocation::FreeSpawn { .. }
                    | Invocation::SetScore { .. }
            ),
            Invocation::SetScore { id, .. } => {
                matches!(earlier, Invocation::SetScore { id: other, .. } if other == id)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// Applied by the sender only, never leaves the process
    Local,
    /// Every connected replica, the sender included
    All,
    Participant(ParticipantId),
}

/// An invocation on its way out of a replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    pub invocation: Invocation,
    pub target: Target,
    pub buffered: bool,
}

impl Outbound {
    pub fn buffered(invocation: Invocation, target: Target) -> Self {
        Self {
            invocation,
            target,
            buffered: true,
        }
    }

    pub fn transient(invocation: Invocation, target: Target) -> Self {
        Self {
            invocation,
            target,
            buffered: false,
        }
    }
}

/// Room member as reported by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: ParticipantId,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Join {
        client_version: u32,
        name: String,
    },
    Invoke {
        target: Target,
        buffered: bool,
        invocation: Invocation,
    },
    Heartbeat,
    Leave,

    Joined {
        participant_id: ParticipantId,
    },
    Rejected {
        reason: String,
    },
    Membership {
        authority: Option<ParticipantId>,
        members: Vec<Member>,
    },
    Deliver {
        sender: ParticipantId,
        invocation: Invocation,
    },
}
