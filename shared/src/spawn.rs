//! Exclusive spawn points and the per-round assignment plan

use crate::{ColorToken, ParticipantId, Position, SpawnPointId};
use log::warn;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    #[error("spawn point {0} does not exist")]
    UnknownPoint(SpawnPointId),
    #[error("spawn point {point} is already assigned to participant {holder}")]
    AlreadyAssigned {
        point: SpawnPointId,
        holder: ParticipantId,
    },
    #[error("spawn point {0} is already free")]
    AlreadyFree(SpawnPointId),
    #[error("participant {participant} already holds spawn point {point}")]
    AlreadyHolding {
        participant: ParticipantId,
        point: SpawnPointId,
    },
}

/// A spawn location; free exactly when nobody is assigned to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub id: SpawnPointId,
    pub position: Position,
    assigned: Option<ParticipantId>,
    color: Option<ColorToken>,
}

impl SpawnPoint {
    pub fn new(id: SpawnPointId, position: Position) -> Self {
        Self {
            id,
            position,
            assigned: None,
            color: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.assigned.is_none()
    }

    pub fn assigned_participant(&self) -> Option<ParticipantId> {
        self.assigned
    }

    pub fn color(&self) -> Option<ColorToken> {
        self.color
    }

    fn assign(
        &mut self,
        participant: ParticipantId,
        color: Option<ColorToken>,
    ) -> Result<(), SpawnError> {
        if let Some(holder) = self.assigned {
            return Err(SpawnError::AlreadyAssigned {
                point: self.id,
                holder,
            });
        }
        self.assigned = Some(participant);
        self.color = color;
        Ok(())
    }

    fn set_free(&mut self) -> Result<ParticipantId, SpawnError> {
        let holder = self.assigned.take().ok_or(SpawnError::AlreadyFree(self.id))?;
        self.color = None;
        Ok(holder)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpawnAllocator {
    points: BTreeMap<SpawnPointId, SpawnPoint>,
}

impl SpawnAllocator {
    pub fn new(layout: impl IntoIterator<Item = (SpawnPointId, Position)>) -> Self {
        let points = layout
            .into_iter()
            .map(|(id, position)| (id, SpawnPoint::new(id, position)))
            .collect();
        Self { points }
    }

    /// Picks one free point per participant, uniformly at random
    ///
    /// Only reads the allocator: the plan takes effect when the matching
    /// assignments are applied. Participants past the number of free points
    /// are left out of the plan.
    pub fn plan<R: Rng + ?Sized>(
        &self,
        participants: &[ParticipantId],
        rng: &mut R,
    ) -> Vec<(ParticipantId, SpawnPointId)> {
        let mut candidates: Vec<SpawnPointId> = self
            .points
            .values()
            .filter(|p| p.is_free())
            .map(|p| p.id)
            .collect();

        if candidates.len() < participants.len() {
            warn!(
                "Only {} free spawn points for {} participants, {} will not spawn this round",
                candidates.len(),
                participants.len(),
                participants.len() - candidates.len()
            );
        }

        let mut plan = Vec::with_capacity(participants.len().min(candidates.len()));
        for &participant in participants {
            let Some(&point) = candidates.choose(rng) else {
                break;
            };
            candidates.retain(|&id| id != point);
            plan.push((participant, point));
        }

        plan
    }

    pub fn assign(
        &mut self,
        point: SpawnPointId,
        participant: ParticipantId,
        color: Option<ColorToken>,
    ) -> Result<(), SpawnError> {
        if let Some(held) = self.assignment_of(participant) {
            return Err(SpawnError::AlreadyHolding {
                participant,
                point: held.id,
            });
        }
        self.points
            .get_mut(&point)
            .ok_or(SpawnError::UnknownPoint(point))?
            .assign(participant, color)
    }

    pub fn free(&mut self, point: SpawnPointId) -> Result<ParticipantId, SpawnError> {
        self.points
            .get_mut(&point)
            .ok_or(SpawnError::UnknownPoint(point))?
            .set_free()
    }

    pub fn reset(&mut self) {
        for point in self.points.values_mut() {
            point.assigned = None;
            point.color = None;
        }
    }

    pub fn assignment_of(&self, participant: ParticipantId) -> Option<&SpawnPoint> {
        self.points
            .values()
            .find(|p| p.assigned == Some(participant))
    }

    pub fn get(&self, point: SpawnPointId) -> Option<&SpawnPoint> {
        self.points.get(&point)
    }

    /// Points ordered by id
    pub fn points(&self) -> impl Iterator<Item = &SpawnPoint> {
        self.points.values()
    }

    pub fn free_count(&self) -> usize {
        self.points.values().filter(|p| p.is_free()).count()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
