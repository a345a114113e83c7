//! One replica's view of the room it has joined

use crate::controller::{MatchController, MatchEvent, ReplicaContext, SpawnAssignment};
use crate::gateway::{Outbox, ReplicationGateway};
use crate::protocol::{Invocation, Member, Outbound, Target};
use crate::{MatchConfig, MatchPhase, ParticipantId};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;

/// Owns the match state of a single room and the gateway it talks through
///
/// Every mutation enters through [`Session::receive`], [`Session::tick`] or one
/// of the intent methods; anything the controller wants sent goes out through
/// the gateway. Invocations addressed to [`Target::Local`] are applied on the
/// spot and never reach the gateway.
pub struct Session<G: ReplicationGateway = Outbox> {
    gateway: G,
    controller: MatchController,
    rng: StdRng,
    in_room: bool,
    members: Vec<Member>,
    last_authority: Option<ParticipantId>,
}

impl<G: ReplicationGateway> Session<G> {
    pub fn new(config: MatchConfig, gateway: G) -> Self {
        Self::with_rng(config, gateway, StdRng::from_entropy())
    }

    pub fn with_rng(config: MatchConfig, gateway: G, rng: StdRng) -> Self {
        Self {
            gateway,
            controller: MatchController::new(config),
            rng,
            in_room: false,
            members: Vec::new(),
            last_authority: None,
        }
    }

    pub fn on_room_joined(&mut self) {
        info!("Joined room as {:?}", self.gateway.local_id());
        self.controller.reset();
        self.in_room = true;
        self.members.clear();
        self.last_authority = None;
    }

    pub fn on_room_left(&mut self) {
        info!("Left room");
        self.controller.reset();
        self.in_room = false;
        self.members.clear();
        self.last_authority = None;
    }

    /// Room membership changed; the authority turns the change into roster
    /// broadcasts
    ///
    /// The gateway must already report the authority that came with the
    /// change. A replica that has just taken over also checkpoints scores and
    /// spawns a running round its predecessor never organized.
    pub fn on_membership_changed(&mut self, members: &[Member]) {
        debug!("Room now has {} members", members.len());
        self.members = members.to_vec();

        let ctx = self.context();
        let out = self.controller.reconcile_membership(members, &ctx);
        self.dispatch(out);

        let took_over = ctx.is_authority() && self.last_authority != ctx.authority;
        self.last_authority = ctx.authority;
        if took_over {
            let mut out = self.controller.checkpoint_scores(&ctx);
            out.extend(
                self.controller
                    .resume_spawning(&self.members, &ctx, &mut self.rng),
            );
            self.dispatch(out);
        }
    }

    /// Applies an invocation delivered by the gateway
    pub fn receive(&mut self, invocation: Invocation) {
        let ctx = self.context();
        let freed_full_roster = matches!(invocation, Invocation::RemoveParticipant { .. })
            && self.controller.registry().is_full();
        let joined = match &invocation {
            Invocation::AddParticipant { id, .. }
                if self.controller.registry().find(*id).is_none() =>
            {
                Some(*id)
            }
            _ => None,
        };

        let out = self.controller.apply(invocation, &ctx, &mut self.rng);
        self.dispatch(out);

        // a join can land after the member already left the room
        if let Some(id) = joined {
            let out = self.controller.prune_departed(id, &self.members, &ctx);
            self.dispatch(out);
        }
        if freed_full_roster {
            let out = self.controller.readmit(&self.members, &ctx);
            self.dispatch(out);
        }
    }

    pub fn tick(&mut self, dt: f32) {
        let ctx = self.context();
        let out = self.controller.tick(dt, &ctx);
        self.dispatch(out);
    }

    pub fn request_start(&mut self) {
        let ctx = self.context();
        let out = self.controller.request_start(&ctx);
        self.dispatch(out);
    }

    /// Score change for `id`; deltas are not replayed to late joiners, the
    /// authority's follow-up total is
    pub fn award_score(&mut self, id: ParticipantId, delta: i32) {
        self.dispatch(vec![Outbound::transient(
            Invocation::AdjustScore { id, delta },
            Target::All,
        )]);
    }

    fn dispatch(&mut self, out: Vec<Outbound>) {
        let mut pending: VecDeque<Outbound> = out.into();

        while let Some(outbound) = pending.pop_front() {
            if outbound.target == Target::Local {
                let ctx = self.context();
                let more = self.controller.apply(outbound.invocation, &ctx, &mut self.rng);
                pending.extend(more);
            } else {
                self.gateway.send(outbound);
            }
        }
    }

    pub fn context(&self) -> ReplicaContext {
        ReplicaContext {
            local_id: self.gateway.local_id(),
            authority: self.gateway.current_authority(),
        }
    }

    pub fn is_authority(&self) -> bool {
        self.context().is_authority()
    }

    pub fn in_room(&self) -> bool {
        self.in_room
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    pub fn phase(&self) -> MatchPhase {
        self.controller.phase()
    }

    pub fn is_ready(&self, id: ParticipantId) -> bool {
        self.controller.is_ready(id)
    }

    pub fn score(&self, id: ParticipantId) -> Option<i32> {
        self.controller.score(id)
    }

    pub fn spawn_assignment(&self, id: ParticipantId) -> Option<SpawnAssignment> {
        self.controller.spawn_assignment(id)
    }

    pub fn display_lines(&self) -> Vec<String> {
        self.controller.display_lines(&self.context())
    }

    pub fn controller(&self) -> &MatchController {
        &self.controller
    }

    pub fn drain_events(&mut self) -> Vec<MatchEvent> {
        self.controller.drain_events()
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(local: ParticipantId, authority: ParticipantId) -> Session {
        let mut outbox = Outbox::new();
        outbox.set_local_id(Some(local));
        outbox.set_authority(Some(authority));
        let mut session = Session::with_rng(
            MatchConfig::default(),
            outbox,
            StdRng::seed_from_u64(5),
        );
        session.on_room_joined();
        session
    }

    fn member(id: ParticipantId) -> Member {
        Member {
            id,
            name: format!("p{}", id),
        }
    }

    #[test]
    fn test_authority_broadcasts_joins() {
        let mut session = session(1, 1);

        session.on_membership_changed(&[member(1), member(2)]);

        // the second change repeats the join still in flight
        let sent = session.gateway_mut().drain();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|o| o.buffered && o.target == Target::All));
        // nothing is applied until the broadcasts come back
        assert!(session.controller().registry().is_empty());
    }

    #[test]
    fn test_replica_does_not_reconcile() {
        let mut session = session(2, 1);

        session.on_membership_changed(&[member(1), member(2)]);

        assert!(session.gateway().is_empty());
    }

    #[test]
    fn test_award_score_is_transient_broadcast() {
        let mut session = session(2, 1);

        session.award_score(1, 4);

        assert_eq!(
            session.gateway_mut().drain(),
            vec![Outbound::transient(
                Invocation::AdjustScore { id: 1, delta: 4 },
                Target::All
            )]
        );
    }

    #[test]
    fn test_local_target_never_reaches_gateway() {
        let mut session = session(1, 1);
        session.receive(Invocation::AddParticipant {
            id: 2,
            name: "p2".into(),
        });
        session.gateway_mut().drain();

        session.dispatch(vec![Outbound::transient(
            Invocation::SetScore { id: 2, value: 12 },
            Target::Local,
        )]);

        assert!(session.gateway().is_empty());
        assert_eq!(session.score(2), Some(12));
    }

    #[test]
    fn test_join_of_departed_member_is_undone() {
        let mut session = session(1, 1);
        session.on_membership_changed(&[member(1), member(2)]);
        session.on_membership_changed(&[member(1)]);
        // the second change repeats the join still in flight
        let sent = session.gateway_mut().drain();
        assert_eq!(sent.len(), 3);

        for outbound in sent {
            session.receive(outbound.invocation);
        }

        let sent = session.gateway_mut().drain();
        assert!(sent.contains(&Outbound::buffered(
            Invocation::RemoveParticipant { id: 2 },
            Target::All
        )));
        assert!(!sent.iter().any(|o| matches!(
            o.invocation,
            Invocation::RemoveParticipant { id: 1 }
        )));
    }

    #[test]
    fn test_join_refused_by_stale_entry_is_retried() {
        let mut session = session(1, 1);
        let first: Vec<Member> = (1..=3).map(member).collect();
        session.on_membership_changed(&first);
        for outbound in session.gateway_mut().drain() {
            session.receive(outbound.invocation);
        }
        session.gateway_mut().drain();

        session.on_membership_changed(&[member(1), member(2), member(3), member(4)]);
        let join_four = session.gateway_mut().drain();
        session.on_membership_changed(&first);
        session.on_membership_changed(&[member(1), member(2), member(3), member(5)]);
        let join_five = session.gateway_mut().drain();

        // 4 fills the roster although it already left
        for outbound in join_four {
            session.receive(outbound.invocation);
        }
        let removal = session.gateway_mut().drain();
        assert_eq!(
            removal,
            vec![Outbound::buffered(
                Invocation::RemoveParticipant { id: 4 },
                Target::All
            )]
        );
        for outbound in join_five {
            session.receive(outbound.invocation);
        }
        assert!(session.controller().registry().find(5).is_none());

        for outbound in removal {
            session.receive(outbound.invocation);
        }
        assert_eq!(
            session.gateway_mut().drain(),
            vec![Outbound::buffered(
                Invocation::AddParticipant {
                    id: 5,
                    name: "p5".into()
                },
                Target::All
            )]
        );
    }

    #[test]
    fn test_takeover_spawns_unorganized_round() {
        let mut session = session(2, 1);
        session.on_membership_changed(&[member(1), member(2), member(3)]);
        for id in [1, 2, 3] {
            session.receive(Invocation::AddParticipant {
                id,
                name: format!("p{}", id),
            });
        }
        session.receive(Invocation::StartMatch);
        session.receive(Invocation::RemoveParticipant { id: 1 });
        session.gateway_mut().drain();

        session.gateway_mut().set_authority(Some(2));
        session.on_membership_changed(&[member(2), member(3)]);

        let sent = session.gateway_mut().drain();
        let assigns = sent
            .iter()
            .filter(|o| matches!(o.invocation, Invocation::AssignSpawn { .. }))
            .count();
        assert_eq!(assigns, 2);
        assert!(sent.contains(&Outbound::buffered(
            Invocation::SetScore { id: 3, value: 0 },
            Target::All
        )));

        // a later membership change does not organize the round again
        session.on_membership_changed(&[member(2), member(3), member(4)]);
        assert!(!session
            .gateway_mut()
            .drain()
            .iter()
            .any(|o| matches!(o.invocation, Invocation::AssignSpawn { .. })));
    }

    #[test]
    fn test_room_left_clears_state() {
        let mut session = session(1, 1);
        session.receive(Invocation::AddParticipant {
            id: 1,
            name: "p1".into(),
        });

        session.on_room_left();

        assert!(!session.in_room());
        assert!(session.controller().registry().is_empty());
    }
}
