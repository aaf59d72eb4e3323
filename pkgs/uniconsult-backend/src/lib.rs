//! UniConsult backend seam - table access and change feeds
//!
//! The hosted backend exposes filtered table queries and per-filter
//! change-feed subscriptions. This crate defines the client-side seam to
//! that surface:
//!
//! - **Row types**: profiles, conversations, participants, messages
//! - **Backend trait**: the operations the stores need, object-safe so the
//!   stores can hold `Arc<dyn Backend>`
//! - **MemoryBackend**: in-memory implementation backing tests and local
//!   development, with `tokio::sync::broadcast` channels standing in for the
//!   hosted pub/sub
//!
//! The backend, not the client, is the source of truth for message ordering:
//! `messages_of` returns rows ascending by creation time and the stores only
//! append on top of that.

pub mod backend;
pub mod error;
pub mod memory;
pub mod types;

pub use backend::Backend;
pub use error::{BackendError, Result};
pub use memory::MemoryBackend;
pub use types::{
    ChangeEvent, ConversationKind, ConversationRow, MessageRow, ParticipantRow, Profile, Role,
};

/// Capacity of the broadcast channels carrying change-feed events.
pub const CHANGE_FEED_CAPACITY: usize = 64;
