//! # Arena Room Relay
//!
//! This library provides the room relay every arena replica connects to. The
//! relay is the delivery substrate of the match layer: it knows who is in the
//! room and who holds authority, and it moves invocations between replicas.
//! It never interprets match state itself.
//!
//! ## Core Responsibilities
//!
//! ### Room Membership
//! Replicas join with a display name and receive a participant id. Ids grow
//! monotonically, so the lowest connected id is always the longest-standing
//! member. Every change in membership is announced to all members together
//! with the current authority.
//!
//! ### Authority Election
//! The oldest connected member is the authority. When it leaves or times
//! out, the next oldest takes over and the new membership announcement tells
//! everyone, including the new authority itself.
//!
//! ### Delivery
//! Invocations arrive with a target and a buffered flag:
//! - `All` goes to every member, the sender included
//! - `Participant(id)` goes to that member only
//! - buffered broadcasts are kept and replayed, in emission order, to every
//!   member that joins later
//!
//! Authority-only invocations from anyone but the authority are dropped.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! All packets are handled sequentially by one loop, so every member sees
//! deliveries in one global order. Socket reads, socket writes and timeout
//! checks run as separate tasks connected to the loop through channels.
//!
//! ### UDP-Based Communication
//! Packets are bincode-encoded and sent over UDP. Members send heartbeats
//! and are dropped after a period of silence.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Connected members, their addresses and activity timestamps, and the room
//! rules shared with the in-process loopback room.
//!
//! ### Network Module (`network`)
//! Socket tasks, packet handling, membership announcements and routing.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Room for 4 replicas, dropping members silent for 5 seconds
//!     let mut server = Server::new("127.0.0.1:8080", 4, Duration::from_secs(5)).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod network;
