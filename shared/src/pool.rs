//! Finite token allocator shared by every replica
//!
//! The pool partitions a fixed universe of tokens into a free list and a
//! used map. Allocation always takes the first free token, so two replicas
//! that apply the same allocations in the same order end up with the same
//! assignments.

use crate::ParticipantId;
use std::collections::HashMap;
use std::hash::Hash;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("token is not currently held by anyone")]
    InvalidToken,
}

#[derive(Debug, Clone)]
pub struct ResourcePool<T> {
    free: Vec<T>,
    used: HashMap<T, ParticipantId>,
    capacity: usize,
}

impl<T> ResourcePool<T>
where
    T: Copy + Eq + Hash,
{
    /// Creates a pool whose universe is `tokens`, all initially free
    ///
    /// Duplicate tokens are collapsed so the universe stays a set.
    pub fn new(tokens: impl IntoIterator<Item = T>) -> Self {
        let mut free: Vec<T> = Vec::new();
        for token in tokens {
            if !free.contains(&token) {
                free.push(token);
            }
        }

        let capacity = free.len();
        Self {
            free,
            used: HashMap::new(),
            capacity,
        }
    }

    /// Hands the first free token to `holder`, or None when exhausted
    pub fn allocate(&mut self, holder: ParticipantId) -> Option<T> {
        if self.free.is_empty() {
            return None;
        }

        let token = self.free.remove(0);
        self.used.insert(token, holder);
        Some(token)
    }

    /// Returns a held token to the end of the free list
    pub fn release(&mut self, token: T) -> Result<ParticipantId, PoolError> {
        let holder = self.used.remove(&token).ok_or(PoolError::InvalidToken)?;
        self.free.push(token);
        Ok(holder)
    }

    pub fn holder_of(&self, token: T) -> Option<ParticipantId> {
        self.used.get(&token).copied()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    /// Free tokens in allocation order
    pub fn free_tokens(&self) -> &[T] {
        &self.free
    }
}
