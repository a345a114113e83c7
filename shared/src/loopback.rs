//! In-process room that wires several sessions together
//!
//! Uses the same [`RoomState`] rules as the UDP relay, but delivers by
//! moving invocations between per-replica inboxes. Membership changes travel
//! through the same inboxes, so a replica hears about a join or leave only
//! after everything routed to it before. Handy for running a whole room
//! inside one test, and for choosing the delivery interleaving.

use crate::gateway::Outbox;
use crate::protocol::{Invocation, Member};
use crate::room::RoomState;
use crate::session::Session;
use crate::{MatchConfig, ParticipantId};
use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, VecDeque};

const MAX_PUMP_ROUNDS: usize = 10_000;

#[derive(Debug, Clone)]
enum Delivery {
    Invoke(Invocation),
    Membership {
        authority: Option<ParticipantId>,
        members: Vec<Member>,
    },
}

pub struct LoopbackRoom {
    config: MatchConfig,
    room: RoomState,
    replicas: BTreeMap<ParticipantId, Session<Outbox>>,
    inboxes: BTreeMap<ParticipantId, VecDeque<Delivery>>,
    seed: u64,
}

impl LoopbackRoom {
    /// `seed` makes every replica's spawn choices reproducible
    pub fn new(config: MatchConfig, seed: u64) -> Self {
        Self {
            room: RoomState::new(config.capacity),
            config,
            replicas: BTreeMap::new(),
            inboxes: BTreeMap::new(),
            seed,
        }
    }

    /// Connects a new replica; it receives the buffered log before any live
    /// traffic
    pub fn join(&mut self, name: &str) -> Option<ParticipantId> {
        let id = match self.room.join(name) {
            Ok(id) => id,
            Err(e) => {
                warn!("{} could not join: {}", name, e);
                return None;
            }
        };

        let mut outbox = Outbox::new();
        outbox.set_local_id(Some(id));
        let rng = StdRng::seed_from_u64(self.seed.wrapping_add(u64::from(id)));
        let mut session = Session::with_rng(self.config.clone(), outbox, rng);
        session.on_room_joined();

        let replay = self
            .room
            .replay_log()
            .iter()
            .map(|buffered| Delivery::Invoke(buffered.invocation.clone()))
            .collect();
        self.inboxes.insert(id, replay);
        self.replicas.insert(id, session);

        self.announce_membership();
        Some(id)
    }

    /// Disconnects a replica; undelivered traffic for it is dropped
    pub fn leave(&mut self, id: ParticipantId) -> bool {
        if !self.room.leave(id) {
            return false;
        }

        if let Some(mut session) = self.replicas.remove(&id) {
            session.on_room_left();
        }
        self.inboxes.remove(&id);
        self.announce_membership();
        true
    }

    fn announce_membership(&mut self) {
        let announcement = Delivery::Membership {
            authority: self.room.authority(),
            members: self.room.members(),
        };

        for inbox in self.inboxes.values_mut() {
            inbox.push_back(announcement.clone());
        }
    }

    /// Routes everything the replicas have sent into the recipients' inboxes
    pub fn flush(&mut self) {
        for (&sender, session) in self.replicas.iter_mut() {
            for outbound in session.gateway_mut().drain() {
                match self.room.route(
                    sender,
                    outbound.target,
                    outbound.buffered,
                    &outbound.invocation,
                ) {
                    Ok(recipients) => {
                        for recipient in recipients {
                            if let Some(inbox) = self.inboxes.get_mut(&recipient) {
                                inbox.push_back(Delivery::Invoke(outbound.invocation.clone()));
                            }
                        }
                    }
                    Err(e) => warn!("Dropped {:?}: {}", outbound.invocation, e),
                }
            }
        }
    }

    /// Applies the oldest pending delivery of one replica, either an
    /// invocation or a membership change
    pub fn deliver_one(&mut self, id: ParticipantId) -> bool {
        let Some(delivery) = self.inboxes.get_mut(&id).and_then(|inbox| inbox.pop_front())
        else {
            return false;
        };

        let Some(session) = self.replicas.get_mut(&id) else {
            return true;
        };
        match delivery {
            Delivery::Invoke(invocation) => session.receive(invocation),
            Delivery::Membership { authority, members } => {
                session.gateway_mut().set_authority(authority);
                session.on_membership_changed(&members);
            }
        }
        true
    }

    /// Delivers until nothing is in flight, replica by replica
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;

        for _ in 0..MAX_PUMP_ROUNDS {
            self.flush();
            let ids: Vec<ParticipantId> = self.inboxes.keys().copied().collect();

            let mut progressed = false;
            for id in ids {
                while self.deliver_one(id) {
                    delivered += 1;
                    progressed = true;
                }
            }

            if !progressed {
                return delivered;
            }
        }

        warn!("Room did not settle after {} rounds", MAX_PUMP_ROUNDS);
        delivered
    }

    /// Delivers until quiet, picking the next recipient at random
    ///
    /// Each replica still sees its own inbox in order; only the interleaving
    /// between replicas changes.
    pub fn pump_interleaved<R: Rng + ?Sized>(&mut self, rng: &mut R) -> usize {
        let mut delivered = 0;

        loop {
            self.flush();
            let waiting: Vec<ParticipantId> = self
                .inboxes
                .iter()
                .filter(|(_, inbox)| !inbox.is_empty())
                .map(|(&id, _)| id)
                .collect();
            if waiting.is_empty() || delivered >= MAX_PUMP_ROUNDS * 10 {
                return delivered;
            }

            let id = waiting[rng.gen_range(0..waiting.len())];
            self.deliver_one(id);
            delivered += 1;
        }
    }

    pub fn tick_all(&mut self, dt: f32) {
        for session in self.replicas.values_mut() {
            session.tick(dt);
        }
    }

    pub fn pending(&self, id: ParticipantId) -> usize {
        self.inboxes.get(&id).map_or(0, VecDeque::len)
    }

    pub fn authority(&self) -> Option<ParticipantId> {
        self.room.authority()
    }

    pub fn session(&self, id: ParticipantId) -> Option<&Session<Outbox>> {
        self.replicas.get(&id)
    }

    pub fn session_mut(&mut self, id: ParticipantId) -> Option<&mut Session<Outbox>> {
        self.replicas.get_mut(&id)
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        self.replicas.keys().copied().collect()
    }

    pub fn room(&self) -> &RoomState {
        &self.room
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ReplicationGateway;

    #[test]
    fn test_first_member_becomes_authority() {
        let mut room = LoopbackRoom::new(MatchConfig::default(), 1);
        let a = room.join("a").unwrap();
        room.pump();

        assert_eq!(room.authority(), Some(a));
        let session = room.session(a).unwrap();
        assert!(session.is_authority());
        assert_eq!(session.controller().registry().ids(), vec![a]);
        assert!(session.is_ready(a));
    }

    #[test]
    fn test_room_rejects_beyond_capacity() {
        let mut room = LoopbackRoom::new(MatchConfig::default(), 1);
        for name in ["a", "b", "c", "d"] {
            assert!(room.join(name).is_some());
        }
        assert!(room.join("e").is_none());
    }

    #[test]
    fn test_targeted_delivery_stays_with_target() {
        let mut room = LoopbackRoom::new(MatchConfig::default(), 1);
        let a = room.join("a").unwrap();
        let b = room.join("b").unwrap();
        room.pump();

        room.session_mut(a)
            .unwrap()
            .gateway_mut()
            .send(crate::Outbound::transient(
                Invocation::SpawnPlayer {
                    position: crate::Position::new(0.0, 0.0, 0.0),
                    color: None,
                },
                crate::Target::Participant(b),
            ));
        room.flush();

        assert_eq!(room.pending(a), 0);
        assert_eq!(room.pending(b), 1);
    }

    #[test]
    fn test_membership_waits_behind_earlier_traffic() {
        let mut room = LoopbackRoom::new(MatchConfig::default(), 1);
        let a = room.join("a").unwrap();
        room.pump();
        let replayed = room.room().replay_log().len();

        let b = room.join("b").unwrap();
        assert_eq!(room.pending(b), replayed + 1);
        assert_eq!(room.session(b).unwrap().gateway().current_authority(), None);

        room.pump();
        assert_eq!(
            room.session(b).unwrap().gateway().current_authority(),
            Some(a)
        );
        assert_eq!(room.session(b).unwrap().controller().registry().ids(), vec![a, b]);
    }
}
