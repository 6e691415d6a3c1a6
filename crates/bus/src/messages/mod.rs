//! Payload types and topic names carried by [`Message`](crate::Message) envelopes.

pub mod events;
pub mod topics;

pub use events::*;
