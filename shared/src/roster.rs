//! Participant registry: the ordered roster plus the color pool
//!
//! Every lookup goes through the participant id. Roster order is join order
//! and is only used when the roster is shown to a player.

use crate::pool::ResourcePool;
use crate::{ColorToken, ParticipantId};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    #[error("roster is full ({capacity} participants)")]
    Full { capacity: usize },
    #[error("participant {0} is already in the roster")]
    Duplicate(ParticipantId),
    #[error("no free color left for participant {0}")]
    ColorsExhausted(ParticipantId),
}

/// One connected client as seen by the match layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub color: Option<ColorToken>,
    pub score: i32,
    pub level_loaded: bool,
}

impl Participant {
    pub fn new(id: ParticipantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: None,
            score: 0,
            level_loaded: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParticipantRegistry {
    roster: Vec<Participant>,
    colors: ResourcePool<ColorToken>,
    capacity: usize,
}

impl ParticipantRegistry {
    pub fn new(capacity: usize, palette: &[ColorToken]) -> Self {
        Self {
            roster: Vec::new(),
            colors: ResourcePool::new(palette.iter().copied()),
            capacity,
        }
    }

    /// Appends a participant and hands it the first free color
    ///
    /// Nothing changes when the roster is full, the id is already present
    /// or the palette has run dry.
    pub fn add(
        &mut self,
        id: ParticipantId,
        name: impl Into<String>,
    ) -> Result<&Participant, RosterError> {
        if self.is_full() {
            return Err(RosterError::Full {
                capacity: self.capacity,
            });
        }
        if self.find(id).is_some() {
            return Err(RosterError::Duplicate(id));
        }

        let color = self
            .colors
            .allocate(id)
            .ok_or(RosterError::ColorsExhausted(id))?;

        let mut participant = Participant::new(id, name);
        participant.color = Some(color);
        debug!("Registered participant {} with color {:?}", id, color);

        self.roster.push(participant);
        Ok(&self.roster[self.roster.len() - 1])
    }

    /// Removes a participant and returns its color to the pool
    pub fn remove(&mut self, id: ParticipantId) -> Option<Participant> {
        let position = self.roster.iter().position(|p| p.id == id)?;
        let participant = self.roster.remove(position);

        if let Some(color) = participant.color {
            if let Err(e) = self.colors.release(color) {
                warn!("Color {:?} of participant {} not held: {}", color, id, e);
            }
        }

        Some(participant)
    }

    pub fn find(&self, id: ParticipantId) -> Option<&Participant> {
        self.roster.iter().find(|p| p.id == id)
    }

    pub fn find_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.roster.iter_mut().find(|p| p.id == id)
    }

    /// Participants in join order
    pub fn all(&self) -> &[Participant] {
        &self.roster
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        self.roster.iter().map(|p| p.id).collect()
    }

    /// True when every participant finished loading, and for an empty roster
    pub fn all_ready(&self) -> bool {
        self.roster.iter().all(|p| p.level_loaded)
    }

    pub fn colors(&self) -> &ResourcePool<ColorToken> {
        &self.colors
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.roster.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }
}
