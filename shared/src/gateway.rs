//! Boundary between a replica and whatever delivers its invocations

use crate::protocol::Outbound;
use crate::ParticipantId;
use std::collections::VecDeque;

/// Delivery capability a [`crate::Session`] sends through
///
/// Implementations promise the room guarantees: targeted invocations reach
/// only their target, `All` reaches every member including the sender,
/// buffered invocations are replayed in emission order to later joiners, and
/// one sender's invocations arrive in the order they were sent.
pub trait ReplicationGateway {
    fn local_id(&self) -> Option<ParticipantId>;

    fn current_authority(&self) -> Option<ParticipantId>;

    fn send(&mut self, outbound: Outbound);
}

/// Gateway that queues outgoing invocations for a transport to pick up
///
/// The owner of the transport keeps the identity and authority fields up to
/// date from the room's membership notifications.
#[derive(Debug, Default)]
pub struct Outbox {
    local_id: Option<ParticipantId>,
    authority: Option<ParticipantId>,
    queue: VecDeque<Outbound>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local_id(&mut self, id: Option<ParticipantId>) {
        self.local_id = id;
    }

    pub fn set_authority(&mut self, authority: Option<ParticipantId>) {
        self.authority = authority;
    }

    /// Takes everything queued since the last drain, oldest first
    pub fn drain(&mut self) -> Vec<Outbound> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl ReplicationGateway for Outbox {
    fn local_id(&self) -> Option<ParticipantId> {
        self.local_id
    }

    fn current_authority(&self) -> Option<ParticipantId> {
        self.authority
    }

    fn send(&mut self, outbound: Outbound) {
        self.queue.push_back(outbound);
    }
}
