//! Match lifecycle state machine
//!
//! The controller is a pure replica: it changes state only when an
//! invocation is applied or a tick elapses, and it reports what should be
//! sent as a list of [`Outbound`] invocations instead of sending anything
//! itself. Authority-only decisions are gated on the [`ReplicaContext`]
//! handed in by the caller.

use crate::protocol::{Invocation, Member, Outbound, Target};
use crate::roster::{Participant, ParticipantRegistry, RosterError};
use crate::spawn::{SpawnAllocator, SpawnError};
use crate::{ColorToken, MatchConfig, ParticipantId, Position, SpawnPointId};
use log::{debug, error, info, warn};
use rand::Rng;

/// Who this replica is and who currently holds authority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaContext {
    pub local_id: Option<ParticipantId>,
    pub authority: Option<ParticipantId>,
}

impl ReplicaContext {
    pub fn new(local_id: ParticipantId, authority: ParticipantId) -> Self {
        Self {
            local_id: Some(local_id),
            authority: Some(authority),
        }
    }

    pub fn is_authority(&self) -> bool {
        self.local_id.is_some() && self.local_id == self.authority
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Lobby,
    Starting,
    Running,
}

/// Effects for the collaborators outside the match layer
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    RosterChanged,
    Started,
    SpawnLocal {
        position: Position,
        color: Option<ColorToken>,
    },
    ScoreChanged {
        id: ParticipantId,
        score: i32,
    },
    ScorePopup {
        delta: i32,
    },
    Ended,
    DespawnAll,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnAssignment {
    pub point: SpawnPointId,
    pub position: Position,
    pub color: Option<ColorToken>,
}

/// The replicated part of a controller, comparable across replicas
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSnapshot {
    pub roster: Vec<Participant>,
    pub free_colors: Vec<ColorToken>,
    pub spawns: Vec<(SpawnPointId, Option<ParticipantId>, Option<ColorToken>)>,
    pub running: bool,
}

#[derive(Debug, Clone)]
pub struct MatchController {
    config: MatchConfig,
    registry: ParticipantRegistry,
    spawns: SpawnAllocator,
    phase: MatchPhase,
    start_requested: bool,
    remaining: f32,
    events: Vec<MatchEvent>,
}

impl MatchController {
    pub fn new(config: MatchConfig) -> Self {
        let registry = ParticipantRegistry::new(config.capacity, &config.palette);
        let spawns = SpawnAllocator::new(config.spawn_layout.iter().copied());
        let remaining = config.match_duration;

        Self {
            config,
            registry,
            spawns,
            phase: MatchPhase::Lobby,
            start_requested: false,
            remaining,
            events: Vec::new(),
        }
    }

    /// Back to an empty lobby, as on entering a fresh room
    pub fn reset(&mut self) {
        self.registry = ParticipantRegistry::new(self.config.capacity, &self.config.palette);
        self.spawns.reset();
        self.phase = MatchPhase::Lobby;
        self.start_requested = false;
        self.remaining = self.config.match_duration;
        self.events.push(MatchEvent::RosterChanged);
    }

    /// Asks for the next round to begin once everyone has loaded
    pub fn request_start(&mut self, ctx: &ReplicaContext) -> Vec<Outbound> {
        if self.is_running() {
            debug!("Start requested while a match is running, ignoring");
            return Vec::new();
        }

        if ctx.is_authority() {
            self.start_requested = true;
            self.phase = MatchPhase::Starting;
            return Vec::new();
        }

        match ctx.authority {
            Some(authority) => vec![Outbound::transient(
                Invocation::RequestStart,
                Target::Participant(authority),
            )],
            None => {
                warn!("Start requested but no authority is known yet");
                Vec::new()
            }
        }
    }

    /// Advances the round timer and, on the authority, resolves start requests
    pub fn tick(&mut self, dt: f32, ctx: &ReplicaContext) -> Vec<Outbound> {
        let mut out = Vec::new();

        if self.is_running() {
            self.remaining -= dt;
            if self.remaining <= 0.0 {
                self.remaining = 0.0;
                self.finish_round();
                if ctx.is_authority() {
                    info!("Match time is up, ending round");
                    out.push(Outbound::buffered(Invocation::GameOver, Target::All));
                }
            }
        } else if ctx.is_authority() && self.start_requested && self.all_ready() {
            info!("All {} participants ready, starting match", self.registry.len());
            out.push(Outbound::buffered(Invocation::StartMatch, Target::All));
            self.start_requested = false;
        }

        out
    }

    /// Applies one delivered invocation
    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        invocation: Invocation,
        ctx: &ReplicaContext,
        rng: &mut R,
    ) -> Vec<Outbound> {
        let mut out = Vec::new();

        match invocation {
            Invocation::AddParticipant { id, name } => match self.registry.add(id, name) {
                Ok(participant) => {
                    info!(
                        "{} joined the match as {:?}",
                        participant.name, participant.color
                    );
                    self.events.push(MatchEvent::RosterChanged);

                    // Reported only after our own join is applied, so the
                    // readiness flag always lands on an existing entry.
                    if ctx.local_id == Some(id) {
                        out.push(Outbound::buffered(
                            Invocation::LevelLoaded { id },
                            Target::All,
                        ));
                    }
                }
                Err(RosterError::Duplicate(id)) => {
                    debug!("Participant {} already registered", id);
                }
                Err(e) => warn!("Could not add participant {}: {}", id, e),
            },

            Invocation::RemoveParticipant { id } => {
                if let Some(participant) = self.registry.remove(id) {
                    info!("{} left the match", participant.name);
                    self.events.push(MatchEvent::RosterChanged);
                }
            }

            Invocation::LevelLoaded { id } => {
                if let Some(participant) = self.registry.find_mut(id) {
                    debug!("Loading finished by {} [{}]", participant.name, id);
                    participant.level_loaded = true;
                    self.events.push(MatchEvent::RosterChanged);
                }
            }

            Invocation::RequestStart => {
                if ctx.is_authority() && !self.is_running() {
                    self.start_requested = true;
                    self.phase = MatchPhase::Starting;
                }
            }

            Invocation::StartMatch => {
                info!("Match started");
                self.phase = MatchPhase::Running;
                self.start_requested = false;
                self.remaining = self.config.match_duration;
                self.spawns.reset();

                for participant in self.registry.ids() {
                    self.set_score(participant, 0);
                }
                self.events.push(MatchEvent::Started);

                if ctx.is_authority() {
                    out.extend(self.organize_spawning(rng));
                }
            }

            Invocation::AssignSpawn {
                point,
                participant,
                color,
            } => {
                if let Err(e) = self.spawns.assign(point, participant, color) {
                    warn!("Spawn assignment for {} rejected: {}", participant, e);
                }
            }

            Invocation::FreeSpawn { point } => match self.spawns.free(point) {
                Ok(holder) => debug!("Spawn point {} released by {}", point, holder),
                Err(SpawnError::AlreadyFree(point)) => {
                    error!("Spawn point {} freed twice", point);
                }
                Err(e) => warn!("Could not free spawn point: {}", e),
            },

            Invocation::SpawnPlayer { position, color } => {
                info!("Spawning local player at {:?}", position);
                self.events.push(MatchEvent::SpawnLocal { position, color });
            }

            Invocation::AdjustScore { id, delta } => {
                let Some(participant) = self.registry.find_mut(id) else {
                    return out;
                };
                participant.score = participant.score.saturating_add(delta);
                let total = participant.score;

                self.events.push(MatchEvent::ScoreChanged { id, score: total });
                if ctx.local_id == Some(id) {
                    self.events.push(MatchEvent::ScorePopup { delta });
                }
                if ctx.is_authority() {
                    out.push(Outbound::buffered(
                        Invocation::SetScore { id, value: total },
                        Target::All,
                    ));
                }
            }

            Invocation::SetScore { id, value } => self.set_score(id, value),

            Invocation::GameOver => {
                if self.is_running() {
                    self.finish_round();
                }
                self.remaining = 0.0;
                self.events.push(MatchEvent::DespawnAll);
            }
        }

        out
    }

    /// Broadcasts the roster changes needed to match the room's member list
    ///
    /// Only the authority reconciles; everyone else returns nothing and waits
    /// for the authority's broadcasts.
    pub fn reconcile_membership(&self, members: &[Member], ctx: &ReplicaContext) -> Vec<Outbound> {
        if !ctx.is_authority() {
            return Vec::new();
        }

        let mut out = Vec::new();

        for participant in self.registry.all() {
            if !members.iter().any(|m| m.id == participant.id) {
                out.extend(self.departure(participant.id));
            }
        }

        out.extend(self.admissions(members));
        out
    }

    /// Joins again the members missing from the roster, for when a join was
    /// refused because departed participants still filled it
    pub fn readmit(&self, members: &[Member], ctx: &ReplicaContext) -> Vec<Outbound> {
        if !ctx.is_authority() {
            return Vec::new();
        }
        self.admissions(members)
    }

    fn admissions(&self, members: &[Member]) -> Vec<Outbound> {
        members
            .iter()
            .filter(|member| self.registry.find(member.id).is_none())
            .map(|member| {
                Outbound::buffered(
                    Invocation::AddParticipant {
                        id: member.id,
                        name: member.name.clone(),
                    },
                    Target::All,
                )
            })
            .collect()
    }

    /// Removes a participant whose join landed after they had already left
    /// the room
    pub fn prune_departed(
        &self,
        id: ParticipantId,
        members: &[Member],
        ctx: &ReplicaContext,
    ) -> Vec<Outbound> {
        if !ctx.is_authority()
            || self.registry.find(id).is_none()
            || members.iter().any(|m| m.id == id)
        {
            return Vec::new();
        }

        info!("Participant {} left before their join was applied", id);
        self.departure(id)
    }

    /// Spawns the roster for a round whose previous authority left before
    /// organizing it
    ///
    /// Called when this replica has just taken over. A round with any
    /// assignment already applied was organized and is left alone.
    pub fn resume_spawning<R: Rng + ?Sized>(
        &self,
        members: &[Member],
        ctx: &ReplicaContext,
        rng: &mut R,
    ) -> Vec<Outbound> {
        if !ctx.is_authority()
            || !self.is_running()
            || self.registry.is_empty()
            || self.spawns.free_count() < self.spawns.len()
        {
            return Vec::new();
        }

        info!("Taking over a round nobody was spawned for");
        let present: Vec<ParticipantId> = self
            .registry
            .ids()
            .into_iter()
            .filter(|id| members.iter().any(|m| m.id == *id))
            .collect();
        self.spawn_roster(&present, rng)
    }

    /// Re-broadcasts every score total so late joiners see deltas whose
    /// follow-up left with the previous authority
    pub fn checkpoint_scores(&self, ctx: &ReplicaContext) -> Vec<Outbound> {
        if !ctx.is_authority() {
            return Vec::new();
        }

        self.registry
            .all()
            .iter()
            .map(|p| {
                Outbound::buffered(
                    Invocation::SetScore {
                        id: p.id,
                        value: p.score,
                    },
                    Target::All,
                )
            })
            .collect()
    }

    fn departure(&self, id: ParticipantId) -> Vec<Outbound> {
        let mut out = Vec::with_capacity(2);
        if let Some(point) = self.spawns.assignment_of(id) {
            out.push(Outbound::buffered(
                Invocation::FreeSpawn { point: point.id },
                Target::All,
            ));
        }
        out.push(Outbound::buffered(
            Invocation::RemoveParticipant { id },
            Target::All,
        ));
        out
    }

    fn organize_spawning<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Outbound> {
        let roster = self.registry.ids();
        let mut out = self.spawn_roster(&roster, rng);

        for participant in roster {
            out.push(Outbound::buffered(
                Invocation::SetScore {
                    id: participant,
                    value: 0,
                },
                Target::All,
            ));
        }

        out
    }

    fn spawn_roster<R: Rng + ?Sized>(
        &self,
        roster: &[ParticipantId],
        rng: &mut R,
    ) -> Vec<Outbound> {
        let plan = self.spawns.plan(roster, rng);
        let mut out = Vec::with_capacity(plan.len() * 2);

        for (participant, point) in plan {
            let color = self.registry.find(participant).and_then(|p| p.color);
            let Some(position) = self.spawns.get(point).map(|p| p.position) else {
                continue;
            };

            out.push(Outbound::buffered(
                Invocation::AssignSpawn {
                    point,
                    participant,
                    color,
                },
                Target::All,
            ));
            out.push(Outbound::transient(
                Invocation::SpawnPlayer { position, color },
                Target::Participant(participant),
            ));
        }

        out
    }

    /// Running folds straight back into the lobby; the end of a round is
    /// only visible as a [`MatchEvent::Ended`].
    fn finish_round(&mut self) {
        self.phase = MatchPhase::Lobby;
        self.events.push(MatchEvent::Ended);
    }

    fn set_score(&mut self, id: ParticipantId, value: i32) {
        if let Some(participant) = self.registry.find_mut(id) {
            participant.score = value;
            self.events.push(MatchEvent::ScoreChanged { id, score: value });
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == MatchPhase::Running
    }

    pub fn start_requested(&self) -> bool {
        self.start_requested
    }

    pub fn all_ready(&self) -> bool {
        self.registry.all_ready()
    }

    pub fn is_ready(&self, id: ParticipantId) -> bool {
        self.registry.find(id).is_some_and(|p| p.level_loaded)
    }

    pub fn score(&self, id: ParticipantId) -> Option<i32> {
        self.registry.find(id).map(|p| p.score)
    }

    pub fn spawn_assignment(&self, id: ParticipantId) -> Option<SpawnAssignment> {
        self.spawns.assignment_of(id).map(|point| SpawnAssignment {
            point: point.id,
            position: point.position,
            color: point.color(),
        })
    }

    pub fn remaining_time(&self) -> f32 {
        self.remaining
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn spawns(&self) -> &SpawnAllocator {
        &self.spawns
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Roster as shown in the lobby, one line per participant
    pub fn display_lines(&self, ctx: &ReplicaContext) -> Vec<String> {
        self.registry
            .all()
            .iter()
            .map(|p| {
                let color = p.color.map(|c| c.hex()).unwrap_or("ffffff");
                let mut line = format!("[{}]{} : ({})", color, p.name, p.score);
                if ctx.authority == Some(p.id) {
                    line.push_str(" (Master)");
                }
                line
            })
            .collect()
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot {
            roster: self.registry.all().to_vec(),
            free_colors: self.registry.colors().free_tokens().to_vec(),
            spawns: self
                .spawns
                .points()
                .map(|p| (p.id, p.assigned_participant(), p.color()))
                .collect(),
            running: self.is_running(),
        }
    }

    pub fn drain_events(&mut self) -> Vec<MatchEvent> {
        std::mem::take(&mut self.events)
    }
}
