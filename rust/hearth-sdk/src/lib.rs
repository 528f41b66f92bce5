//! # hearth-sdk
//!
//! Rust client SDK for Home-Assistant-compatible home-automation hubs.
//!
//! The crate keeps a local mirror of the hub's entity state, synchronized
//! over the hub's real-time WebSocket event feed, and issues commands through
//! its REST interface with optimistic local updates.
//!
//! ## Example
//!
//! ```rust,ignore
//! use hearth_sdk::{Channel, HearthClient, HearthConfig, Intent};
//! use url::Url;
//!
//! let client = HearthClient::new(
//!     "ws://hub:8123/api/websocket",
//!     Url::parse("http://hub:8123/api")?,
//!     access_token,
//!     HearthConfig::default(),
//! );
//! client.init().await?;
//!
//! let lights = client.store().all_in_domain("light").await;
//!
//! client.router().subscribe(Channel::AllChanges, |change| {
//!     println!("{} changed", change.entity_id);
//! });
//!
//! client
//!     .dispatcher()
//!     .execute("light.kitchen", Intent::TurnOn { brightness: Some(80), hs_color: None })
//!     .await?;
//! ```
//!
//! ## Synchronization model
//!
//! - **Hydration** — `GET /states` loads the full entity set after connect
//!   and after every poll cycle.
//! - **Events** — `state_changed` notifications merge into the store in
//!   arrival order and fan out to subscribed listeners.
//! - **Commands** — applied optimistically before the remote call, kept on
//!   success (the authoritative event converges later), rolled back on
//!   failure.
//! - **Fallback** — if the feed cannot be (re)established, periodic REST
//!   polling takes over through the same merge path, and stops the moment
//!   the feed comes back.

mod client;
mod command;
mod config;
mod connection;
mod entity;
mod error;
mod poll;
mod protocol;
mod rest;
mod router;
mod store;

pub use client::HearthClient;
pub use command::{ArmMode, BulkOutcome, CommandDispatcher, Intent};
pub use config::{ConnectionConfig, HearthConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use entity::{domain_of, EntityPatch, EntityState};
pub use error::HearthError;
pub use poll::PollingFallback;
pub use protocol::{
    ClientMessage, EventEnvelope, ServerMessage, StateChange, STATE_CHANGED,
};
pub use rest::RestClient;
pub use router::{Channel, EventCallback, SubscriptionHandle, SubscriptionRouter};
pub use store::{CommandSnapshot, EntityStore};

pub use serde_json::Value;
