//! # Arena Replica Client
//!
//! A headless replica of the arena match. It joins a room relay, keeps its
//! own copy of the match state in a [`shared::Session`], and lets the local
//! player drive the match from the terminal.
//!
//! ## Architecture Overview
//!
//! The client owns no authority of its own. Whether it may originate roster,
//! start, spawn or game-over changes depends only on the membership the relay
//! announces: while this replica is the oldest member it acts as the
//! authority, and the moment an older member appears or it loses that role,
//! it goes back to applying what it receives.
//!
//! ### Replication Loop
//! Every packet, tick and console command is handled on one task. After each
//! step the client prints the events the match layer produced and sends the
//! invocations the session queued, in the order they were queued.
//!
//! ## Module Organization
//!
//! ### Commands Module (`commands`)
//! Parsing of the console commands `start`, `score <id> <delta>`, `roster`
//! and `quit`.
//!
//! ### HUD Module (`hud`)
//! Terminal output for match events, the round countdown and the roster.
//!
//! ### Network Module (`network`)
//! UDP socket handling, the join handshake, heartbeats and the main loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ClientOptions {
//!         name: "alice".to_string(),
//!         auto_start: true,
//!         ..ClientOptions::default()
//!     };
//!
//!     let mut client = Client::new(options).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod hud;
pub mod network;
