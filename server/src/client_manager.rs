//! Connected replicas and the room they share
//!
//! This module handles the relay-side bookkeeping for every connection:
//! - Join/leave/timeout lifecycle, keyed by participant id
//! - Address tracking for routing deliveries back to each replica
//! - Room rules (capacity, authority election, buffered replay log)
//!
//! The delivery rules themselves live in [`shared::room::RoomState`]; the
//! client manager adds the network side of each member.

use log::info;
use shared::room::{BufferedInvocation, RoomError, RoomState};
use shared::{Invocation, Member, ParticipantId, Target};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected replica as the relay sees it
#[derive(Debug)]
pub struct Client {
    /// Participant id handed out on join
    pub id: ParticipantId,
    pub name: String,
    /// Network address deliveries are sent to
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(id: ParticipantId, name: String, addr: SocketAddr) -> Self {
        Self {
            id,
            name,
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// True when nothing arrived from this client within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients and the room they are in
///
/// Capacity and authority come from the room: the oldest connected member
/// holds authority, and invocations that need authority are refused from
/// anyone else.
pub struct ClientManager {
    clients: HashMap<ParticipantId, Client>,
    room: RoomState,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            room: RoomState::new(max_clients),
            timeout,
        }
    }

    /// Admits a new client, or reports why the room refused it
    pub fn add_client(&mut self, addr: SocketAddr, name: String) -> Result<ParticipantId, RoomError> {
        let client_id = self.room.join(name.clone())?;

        info!("Client {} ({}) connected from {}", client_id, name, addr);
        self.clients
            .insert(client_id, Client::new(client_id, name, addr));

        Ok(client_id)
    }

    /// Removes a client; returns false if they were already gone
    pub fn remove_client(&mut self, client_id: &ParticipantId) -> bool {
        self.room.leave(*client_id);
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} ({}) disconnected", client.id, client.name);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ParticipantId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Records activity from a client; false if the id is unknown
    pub fn touch(&mut self, client_id: ParticipantId) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.touch();
            true
        } else {
            false
        }
    }

    /// Resolves the recipients of an invocation to their addresses
    pub fn route(
        &mut self,
        sender: ParticipantId,
        target: Target,
        buffered: bool,
        invocation: &Invocation,
    ) -> Result<Vec<(ParticipantId, SocketAddr)>, RoomError> {
        let recipients = self.room.route(sender, target, buffered, invocation)?;

        Ok(recipients
            .into_iter()
            .filter_map(|id| self.clients.get(&id).map(|client| (id, client.addr)))
            .collect())
    }

    /// Buffered invocations a newcomer must replay, in emission order
    pub fn replay_log(&self) -> Vec<BufferedInvocation> {
        self.room.replay_log().to_vec()
    }

    pub fn authority(&self) -> Option<ParticipantId> {
        self.room.authority()
    }

    pub fn members(&self) -> Vec<Member> {
        self.room.members()
    }

    /// Removes clients that went silent and returns their ids
    pub fn check_timeouts(&mut self) -> Vec<ParticipantId> {
        let timed_out: Vec<ParticipantId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(self.timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    /// All client ids and addresses, for broadcasting
    pub fn get_client_addrs(&self) -> Vec<(ParticipantId, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
