//! Iceworld client core - peer-to-peer state synchronization for the
//! Iceworld multiplayer playground
//!
//! The crate keeps a small group of directly-connected replicas in
//! agreement without a central authority:
//! - a replicated document carries the durable chat log and the per-peer
//!   resolution mailboxes used for client-side collision resolution,
//! - an awareness channel broadcasts ephemeral presence (position,
//!   animation, chat bubble, audio mute) and retracts it on departure,
//! - a per-tick reconciliation loop publishes local state, drains the own
//!   mailbox and applies remote state to local avatars.
//!
//! The rendering engine, the UI and the actual data channels stay outside;
//! they plug in through [`game::stage::Stage`], the session observers and
//! [`net::transport::TransportConnector`].

pub mod config;
pub mod game;
pub mod net;
pub mod session;
pub mod sync;
pub mod util;

pub use config::Config;
pub use game::{LocalTickInput, ReconciliationLoop};
pub use net::protocol::{
    ChatEntry, Frame, PeerId, PresenceState, ResolutionMessage, Vec2,
};
pub use session::{SessionContext, SharedSession};
