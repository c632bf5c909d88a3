//! Mailbox protocol
//!
//! Every peer owns one slot in the shared peer-state map, keyed by its own
//! identity. Any replica may append a resolution message to another peer's
//! slot; only the owner drains and clears its own slot, once per
//! reconciliation tick. Appends are fire-and-forget over the eventually
//! consistent document; there is no acknowledgment and no retry.
//!
//! A message that lands between the owner's drain snapshot and its clear is
//! wiped by the clear and never processed. The window is one tick at most
//! and the effects carried here (velocity nudges, projectile events) are
//! small and self-correcting, so the race is documented and tolerated
//! rather than defended against.

use tracing::debug;

use crate::net::protocol::{MailboxState, PeerId, ResolutionMessage};

use super::doc::SharedDocument;

impl SharedDocument {
    /// Fire-and-forget append to the target peer's queue
    pub fn deliver(&mut self, target: PeerId, message: ResolutionMessage) {
        debug!(
            target = target,
            message_id = message.message_id(),
            "queueing resolution message"
        );
        self.append_to_peer_mailbox(target, message);
    }

    /// Snapshot of the owner's current queue. Does not clear: the caller
    /// finishes applying every message before committing the clear.
    pub fn drain_own_mailbox(&self) -> Vec<ResolutionMessage> {
        self.my_mailbox()
            .map(|state| state.messages)
            .unwrap_or_default()
    }

    /// Overwrite the owner's queue with empty. Skips the document write
    /// entirely when the queue is already empty.
    pub fn clear_own_mailbox(&mut self) {
        match self.my_mailbox() {
            Some(state) if !state.messages.is_empty() => {
                self.set_my_mailbox(MailboxState::default());
            }
            _ => {}
        }
    }
}
