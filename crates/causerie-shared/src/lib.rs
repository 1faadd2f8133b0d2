//! # causerie-shared
//!
//! Domain types, persisted document models and constants shared by every
//! Causerie crate.
//!
//! Causerie is the messaging core of a client/operator support chat: exactly
//! two participants per conversation, per-recipient encrypted content,
//! heartbeat-based presence and ephemeral typing state.  The structs in
//! [`models`] are the logical schema of the backing document store; they
//! serialize to camelCase JSON so the documents look the same regardless of
//! which store implementation backs them.

pub mod constants;
pub mod models;
pub mod types;

mod error;

pub use error::ModelError;
pub use models::*;
pub use types::{MessageKind, MessageStatus, Role, UserId};
