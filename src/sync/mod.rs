//! Replicated state: the shared document, the mailbox protocol layered on
//! top of it, and the ephemeral awareness channel

pub mod awareness;
pub mod doc;
pub mod mailbox;

pub use awareness::{AwarenessChannel, PresenceRecord};
pub use doc::SharedDocument;
