//! Delivery rules of a room, independent of any socket
//!
//! A room hands out increasing participant ids, elects the lowest connected
//! id as authority, decides who receives each invocation and keeps the
//! buffered log that late joiners replay. It never looks inside the match
//! state it carries; the log is compacted by invocation kind alone.

use crate::protocol::{Invocation, Member, Target};
use crate::ParticipantId;
use log::{debug, info};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("room is full")]
    Full,
    #[error("participant {0} is not a member of the room")]
    UnknownSender(ParticipantId),
    #[error("participant {0} may not send authority-only invocations")]
    NotAuthority(ParticipantId),
}

/// An invocation kept for replay, with the member that emitted it
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedInvocation {
    pub sender: ParticipantId,
    pub invocation: Invocation,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    capacity: usize,
    next_id: ParticipantId,
    members: BTreeMap<ParticipantId, Member>,
    log: Vec<BufferedInvocation>,
}

impl RoomState {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: 1,
            members: BTreeMap::new(),
            log: Vec::new(),
        }
    }

    pub fn join(&mut self, name: impl Into<String>) -> Result<ParticipantId, RoomError> {
        if self.members.len() >= self.capacity {
            return Err(RoomError::Full);
        }

        let id = self.next_id;
        self.next_id += 1;
        let name = name.into();
        info!("{} joined the room as participant {}", name, id);
        self.members.insert(id, Member { id, name });

        Ok(id)
    }

    /// Removes a member; the buffered log dies with the last one
    pub fn leave(&mut self, id: ParticipantId) -> bool {
        if self.members.remove(&id).is_none() {
            return false;
        }

        info!("Participant {} left the room", id);
        if self.members.is_empty() {
            debug!("Room empty, dropping {} buffered invocations", self.log.len());
            self.log.clear();
        }
        true
    }

    pub fn authority(&self) -> Option<ParticipantId> {
        self.members.keys().next().copied()
    }

    pub fn members(&self) -> Vec<Member> {
        self.members.values().cloned().collect()
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.members.contains_key(&id)
    }

    /// Works out the recipients of an invocation and records it for replay
    ///
    /// `Local` resolves to the sender alone. Only broadcasts are buffered: a
    /// targeted invocation has no meaning for someone who joins later.
    pub fn route(
        &mut self,
        sender: ParticipantId,
        target: Target,
        buffered: bool,
        invocation: &Invocation,
    ) -> Result<Vec<ParticipantId>, RoomError> {
        if !self.contains(sender) {
            return Err(RoomError::UnknownSender(sender));
        }
        if invocation.requires_authority() && self.authority() != Some(sender) {
            return Err(RoomError::NotAuthority(sender));
        }

        let recipients = match target {
            Target::All => self.members.keys().copied().collect(),
            Target::Participant(id) if self.contains(id) => vec![id],
            Target::Participant(_) => Vec::new(),
            Target::Local => vec![sender],
        };

        if buffered && target == Target::All {
            self.record(sender, invocation);
        }

        Ok(recipients)
    }

    /// Appends to the replay log, dropping whatever the new entry makes
    /// redundant
    ///
    /// Keeps the log bounded by the roster history plus one round of spawn
    /// and score traffic.
    fn record(&mut self, sender: ParticipantId, invocation: &Invocation) {
        let before = self.log.len();
        self.log.retain(|entry| !invocation.supersedes(&entry.invocation));
        if self.log.len() < before {
            debug!("Compacted {} buffered invocations", before - self.log.len());
        }

        self.log.push(BufferedInvocation {
            sender,
            invocation: invocation.clone(),
        });
    }

    /// Buffered invocations in emission order
    pub fn replay_log(&self) -> &[BufferedInvocation] {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_assigns_increasing_ids() {
        let mut room = RoomState::new(4);

        assert_eq!(room.join("a"), Ok(1));
        assert_eq!(room.join("b"), Ok(2));
        room.leave(1);
        assert_eq!(room.join("c"), Ok(3));
        assert_eq!(room.len(), 2);
    }

    #[test]
    fn test_room_capacity() {
        let mut room = RoomState::new(1);
        room.join("a").unwrap();
        assert_eq!(room.join("b"), Err(RoomError::Full));
    }

    #[test]
    fn test_authority_is_oldest_member() {
        let mut room = RoomState::new(4);
        assert_eq!(room.authority(), None);

        room.join("a").unwrap();
        room.join("b").unwrap();
        room.join("c").unwrap();
        assert_eq!(room.authority(), Some(1));

        room.leave(1);
        assert_eq!(room.authority(), Some(2));
    }

    #[test]
    fn test_route_targets() {
        let mut room = RoomState::new(4);
        room.join("a").unwrap();
        room.join("b").unwrap();
        let score = Invocation::AdjustScore { id: 2, delta: 1 };

        assert_eq!(room.route(1, Target::All, false, &score), Ok(vec![1, 2]));
        assert_eq!(
            room.route(1, Target::Participant(2), false, &score),
            Ok(vec![2])
        );
        assert_eq!(
            room.route(1, Target::Participant(9), false, &score),
            Ok(vec![])
        );
        assert_eq!(room.route(2, Target::Local, false, &score), Ok(vec![2]));
        assert!(room.replay_log().is_empty());
    }

    #[test]
    fn test_only_buffered_broadcasts_are_logged() {
        let mut room = RoomState::new(4);
        room.join("a").unwrap();
        room.join("b").unwrap();

        room.route(1, Target::All, true, &Invocation::StartMatch).unwrap();
        room.route(2, Target::All, true, &Invocation::LevelLoaded { id: 2 })
            .unwrap();
        room.route(
            1,
            Target::Participant(2),
            true,
            &Invocation::SetScore { id: 2, value: 0 },
        )
        .unwrap();

        let log = room.replay_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].invocation, Invocation::StartMatch);
        assert_eq!(log[1].sender, 2);
    }

    #[test]
    fn test_authority_only_invocations_are_refused() {
        let mut room = RoomState::new(4);
        room.join("a").unwrap();
        room.join("b").unwrap();

        assert_eq!(
            room.route(2, Target::All, true, &Invocation::StartMatch),
            Err(RoomError::NotAuthority(2))
        );
        assert_eq!(
            room.route(7, Target::All, false, &Invocation::RequestStart),
            Err(RoomError::UnknownSender(7))
        );
        assert!(room.replay_log().is_empty());
    }

    #[test]
    fn test_log_dropped_when_room_empties() {
        let mut room = RoomState::new(4);
        room.join("a").unwrap();
        room.route(1, Target::All, true, &Invocation::StartMatch).unwrap();

        assert!(room.leave(1));
        assert!(!room.leave(1));
        assert!(room.replay_log().is_empty());
    }

    #[test]
    fn test_log_stays_bounded_across_rounds() {
        let mut room = RoomState::new(4);
        room.join("a").unwrap();
        room.join("b").unwrap();
        let roster = [
            Invocation::AddParticipant {
                id: 1,
                name: "a".into(),
            },
            Invocation::AddParticipant {
                id: 2,
                name: "b".into(),
            },
            Invocation::LevelLoaded { id: 1 },
        ];
        for invocation in &roster {
            room.route(1, Target::All, true, invocation).unwrap();
        }

        for round in 0..50 {
            let rounds = vec![
                Invocation::StartMatch,
                Invocation::AssignSpawn {
                    point: 1,
                    participant: 1,
                    color: None,
                },
                Invocation::AssignSpawn {
                    point: 2,
                    participant: 2,
                    color: None,
                },
                Invocation::SetScore { id: 1, value: 0 },
                Invocation::SetScore { id: 2, value: 0 },
                Invocation::SetScore { id: 1, value: round },
                Invocation::SetScore { id: 2, value: round * 2 },
                Invocation::GameOver,
            ];
            for invocation in &rounds {
                room.route(1, Target::All, true, invocation).unwrap();
            }
        }

        let log: Vec<Invocation> = room
            .replay_log()
            .iter()
            .map(|entry| entry.invocation.clone())
            .collect();
        assert_eq!(log.len(), roster.len() + 6);
        assert_eq!(&log[..3], &roster);
        assert_eq!(log[3], Invocation::StartMatch);
        assert!(log.contains(&Invocation::SetScore { id: 1, value: 49 }));
        assert!(log.contains(&Invocation::SetScore { id: 2, value: 98 }));
        assert_eq!(log.last(), Some(&Invocation::GameOver));
    }

    #[test]
    fn test_next_start_drops_previous_round() {
        let mut room = RoomState::new(4);
        room.join("a").unwrap();
        room.route(1, Target::All, true, &Invocation::StartMatch).unwrap();
        room.route(
            1,
            Target::All,
            true,
            &Invocation::AssignSpawn {
                point: 3,
                participant: 2,
                color: None,
            },
        )
        .unwrap();
        room.route(1, Target::All, true, &Invocation::FreeSpawn { point: 3 })
            .unwrap();
        room.route(1, Target::All, true, &Invocation::RemoveParticipant { id: 2 })
            .unwrap();
        assert_eq!(room.replay_log().len(), 4);

        room.route(1, Target::All, true, &Invocation::StartMatch).unwrap();

        let log: Vec<&Invocation> = room.replay_log().iter().map(|e| &e.invocation).collect();
        assert_eq!(
            log,
            vec![
                &Invocation::RemoveParticipant { id: 2 },
                &Invocation::StartMatch
            ]
        );
    }
}
