//! Conversation memory: short-term turn history and long-term facts.
//!
//! - [`store`]: `MemoryStore`, per-session turn logs with FIFO eviction and
//!   per-owner fact maps
//!
//! Long-term facts are keyed by an *owner key* (see
//! [`owner_key`](crate::types::owner_key)); a fact is unique per key and a
//! re-assertion overwrites it.

pub mod store;

pub use store::{ConversationContext, MemoryStore, SessionLog};
