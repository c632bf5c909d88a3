//! Awareness channel
//!
//! Ephemeral per-peer presence: broadcast every tick, never persisted, and
//! retracted automatically when a peer's transport channel closes. The
//! durable document is the source of truth for everything else; awareness
//! only ever carries transient animation, position and bubble state.

use std::collections::HashMap;

use tracing::debug;

use crate::net::protocol::{
    AudioContent, Frame, InputContent, PeerId, PresenceState, TextContent, UsernameContent, Vec2,
};
use crate::util::time::CHAT_BUBBLE_MS;

/// Locally cached record for one remote replica. Departure is tracked with
/// a tag instead of deleting the record, so the reconciliation loop can run
/// one final cleanup pass before the record is forgotten.
#[derive(Debug, Clone, Default)]
pub struct PresenceRecord {
    pub state: Option<PresenceState>,
    pub removed: bool,
}

pub struct AwarenessChannel {
    local_id: PeerId,
    enabled: bool,
    local: PresenceState,
    /// Deadline for the live chat bubble; re-armed by newer text,
    /// consumed exactly once on expiry
    text_deadline: Option<u64>,
    peers: HashMap<PeerId, PresenceRecord>,
}

impl AwarenessChannel {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            enabled: false,
            local: PresenceState::default(),
            text_deadline: None,
            peers: HashMap::new(),
        }
    }

    /// Activate the channel. Idempotent: calling it again is a no-op.
    pub fn enable(&mut self) {
        if !self.enabled {
            self.enabled = true;
            debug!(client_id = self.local_id, "awareness enabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn local_state(&self) -> &PresenceState {
        &self.local
    }

    // --- staging the local state ---

    pub fn set_username(&mut self, username: UsernameContent) {
        self.local.username = Some(username);
    }

    pub fn set_position(&mut self, position: Vec2) {
        self.local.position = Some(position);
    }

    pub fn set_input(&mut self, input: InputContent) {
        self.local.input = Some(input);
    }

    pub fn set_audio(&mut self, audio: AudioContent) {
        self.local.audio = Some(audio);
    }

    /// Stage chat text and arm the auto-expiry deadline. Newer text re-arms
    /// the deadline; the superseded timer never fires.
    pub fn set_text(&mut self, text: TextContent, now_ms: u64) {
        self.local.text = Some(text);
        self.text_deadline = Some(now_ms + CHAT_BUBBLE_MS);
    }

    /// Clear the live text once its deadline has passed. Returns `true`
    /// exactly once per armed deadline, so the caller can append the soft
    /// retraction marker to the durable log.
    pub fn take_expired_text(&mut self, now_ms: u64) -> bool {
        match self.text_deadline {
            Some(deadline) if now_ms >= deadline => {
                self.text_deadline = None;
                self.local.text = Some(TextContent {
                    text: String::new(),
                    timestamp: 0,
                });
                true
            }
            _ => false,
        }
    }

    // --- broadcast ---

    /// Wholesale overwrite of the advertised presence. Publishing before
    /// `enable` is a no-op by contract.
    pub fn publish(&self) -> Option<Frame> {
        if !self.enabled {
            return None;
        }
        Some(Frame::Awareness {
            from: self.local_id,
            state: Some(self.local.clone()),
        })
    }

    /// Frame advertised on teardown: an empty state retracts our presence
    pub fn retract(&self) -> Frame {
        Frame::Awareness {
            from: self.local_id,
            state: None,
        }
    }

    // --- remote records ---

    /// Apply one remote awareness frame. The local identity is always
    /// filtered out; a peer echoing our id never shows up as a peer.
    pub fn apply_remote(&mut self, from: PeerId, state: Option<PresenceState>) {
        if from == self.local_id {
            return;
        }
        match state {
            Some(state) => {
                let record = self.peers.entry(from).or_default();
                record.state = Some(state);
            }
            None => self.mark_removed(from),
        }
    }

    /// Departure detected by the transport layer. Unknown peers are
    /// ignored: there is nothing to clean up for a peer never seen.
    pub fn mark_removed(&mut self, peer: PeerId) {
        if let Some(record) = self.peers.get_mut(&peer) {
            record.removed = true;
        }
    }

    /// Final cleanup: evict the record after departure handling ran
    pub fn forget(&mut self, peer: PeerId) {
        self.peers.remove(&peer);
    }

    /// Known remote replicas; never contains the local identity
    pub fn peers(&self) -> &HashMap<PeerId, PresenceRecord> {
        &self.peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence_at(x: f32, y: f32) -> PresenceState {
        PresenceState {
            position: Some(Vec2::new(x, y)),
            ..PresenceState::default()
        }
    }

    #[test]
    fn publish_before_enable_is_a_no_op() {
        let mut aware = AwarenessChannel::new(7);
        aware.set_position(Vec2::new(1.0, 2.0));
        assert!(aware.publish().is_none());

        aware.enable();
        aware.enable(); // idempotent
        let frame = aware.publish().expect("enabled channel publishes");
        match frame {
            Frame::Awareness { from, state } => {
                assert_eq!(from, 7);
                assert_eq!(state.unwrap().position, Some(Vec2::new(1.0, 2.0)));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn self_identity_is_filtered_out() {
        let mut aware = AwarenessChannel::new(7);
        aware.apply_remote(7, Some(presence_at(0.0, 0.0)));
        assert!(aware.peers().is_empty());

        aware.apply_remote(8, Some(presence_at(5.0, 5.0)));
        assert_eq!(aware.peers().len(), 1);
    }

    #[test]
    fn removal_is_tagged_not_deleted() {
        let mut aware = AwarenessChannel::new(7);
        aware.apply_remote(8, Some(presence_at(5.0, 5.0)));

        aware.mark_removed(8);
        let record = aware.peers().get(&8).expect("record survives removal");
        assert!(record.removed);
        assert!(record.state.is_some());

        aware.forget(8);
        assert!(aware.peers().is_empty());

        // removal of a never-seen peer is ignored
        aware.mark_removed(99);
        assert!(aware.peers().is_empty());
    }

    #[test]
    fn retraction_frame_carries_no_state() {
        let aware = AwarenessChannel::new(7);
        assert!(matches!(
            aware.retract(),
            Frame::Awareness { from: 7, state: None }
        ));
    }

    #[test]
    fn text_expires_exactly_once() {
        let mut aware = AwarenessChannel::new(7);
        aware.set_text(
            TextContent {
                text: "hello".into(),
                timestamp: 1_000,
            },
            1_000,
        );

        assert!(!aware.take_expired_text(1_000 + CHAT_BUBBLE_MS - 1));
        assert!(aware.take_expired_text(1_000 + CHAT_BUBBLE_MS));
        assert_eq!(aware.local_state().text.as_ref().unwrap().text, "");

        // the consumed deadline never fires again
        assert!(!aware.take_expired_text(1_000 + 2 * CHAT_BUBBLE_MS));
    }

    #[test]
    fn newer_text_supersedes_the_armed_deadline() {
        let mut aware = AwarenessChannel::new(7);
        aware.set_text(
            TextContent {
                text: "first".into(),
                timestamp: 1_000,
            },
            1_000,
        );
        aware.set_text(
            TextContent {
                text: "second".into(),
                timestamp: 4_000,
            },
            4_000,
        );

        // the first deadline would have fired here; it was cancelled
        assert!(!aware.take_expired_text(1_000 + CHAT_BUBBLE_MS));
        assert_eq!(aware.local_state().text.as_ref().unwrap().text, "second");

        assert!(aware.take_expired_text(4_000 + CHAT_BUBBLE_MS));
    }
}
