//! Wire protocol message definitions
//! These are the JSON types exchanged between directly-connected peers and
//! the values stored inside the replicated document

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Replica identity assigned by the shared document session.
/// Stable for the session lifetime; self-reported and unauthenticated.
pub type PeerId = u64;

/// 2D vector used for positions and velocities
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Pressed-key snapshot replayed on remote avatars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CursorSnapshot {
    pub left: bool,
    pub right: bool,
    pub space: bool,
}

/// Display name advertised to peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameContent {
    pub username: String,
}

/// Input state for one tick, replayed to drive remote animation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputContent {
    pub cursor: CursorSnapshot,
    /// Animation state machine name ("walk", "idle", ...)
    pub state_name: String,
    pub dt: f32,
}

/// Live chat bubble text; empty text clears the bubble
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
    pub timestamp: u64,
}

/// Audio playback control for one media stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioContent {
    pub stream_id: String,
    pub muted: bool,
}

/// Ephemeral per-peer presence, overwritten wholesale on every publish.
/// All field groups are absent until first set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceState {
    pub username: Option<UsernameContent>,
    pub position: Option<Vec2>,
    pub input: Option<InputContent>,
    pub text: Option<TextContent>,
    pub audio: Option<AudioContent>,
}

/// One entry of the shared append-only chat log. Entries are never removed;
/// an empty-text entry is a soft retraction marker for display purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub author_id: PeerId,
    pub username: String,
    pub text: String,
    pub timestamp: u64,
}

impl ChatEntry {
    pub fn is_retraction(&self) -> bool {
        self.text.is_empty()
    }
}

/// Projectile lifecycle instruction carried by a resolution message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectileEvent {
    Spawn,
    Despawn,
}

/// Instruction queued for a specific peer to apply to its own simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionMessage {
    /// Apply a velocity nudge (collision response)
    Velocity {
        message_id: u64,
        object_id: u64,
        update: Vec2,
    },

    /// Snap position
    Position {
        message_id: u64,
        object_id: u64,
        update: Vec2,
    },

    /// Create or destroy a projectile locally
    Projectile {
        message_id: u64,
        object_id: u64,
        event: ProjectileEvent,
        position: Vec2,
        velocity: Vec2,
    },
}

impl ResolutionMessage {
    pub fn message_id(&self) -> u64 {
        match self {
            Self::Velocity { message_id, .. }
            | Self::Position { message_id, .. }
            | Self::Projectile { message_id, .. } => *message_id,
        }
    }
}

/// Message id derived from a timestamp and a peer identity. Collisions are
/// possible and forged ids are not detectable; the scheme is kept as-is.
pub fn derive_message_id(now_ms: u64, peer: PeerId) -> u64 {
    now_ms.wrapping_mul(peer)
}

/// Durable per-peer document entry: the presence field groups plus the
/// multi-writer/single-reader resolution message queue.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxState {
    #[serde(flatten)]
    pub presence: PresenceState,
    pub messages: Vec<ResolutionMessage>,
}

/// Transport envelope for everything sent over the peer data channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// High-frequency input replay frame
    Input { from: PeerId, content: InputContent },

    /// High-frequency position frame
    Position { from: PeerId, content: Vec2 },

    /// Low-frequency direct chat/emote frame
    Message { from: PeerId, content: String },

    /// Shared whiteboard link
    Whiteboard { from: PeerId, content: String },

    /// Document sync request carrying our state vector (base64)
    SyncStep1 { from: PeerId, state_vector: String },

    /// Document sync reply carrying the missing update (base64)
    SyncStep2 { update: String },

    /// Incremental document update broadcast (base64)
    DocUpdate { update: String },

    /// Ephemeral presence broadcast; `state: None` retracts the presence
    Awareness {
        from: PeerId,
        state: Option<PresenceState>,
    },
}

impl Frame {
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Base64-encode a binary CRDT payload for transport inside a JSON frame
pub fn encode_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 CRDT payload received in a JSON frame
pub fn decode_payload(raw: &str) -> Result<Vec<u8>, FrameError> {
    Ok(STANDARD.decode(raw)?)
}

/// Frame parse failures; always recoverable, never surfaced to the tick loop
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("malformed binary payload: {0}")]
    Payload(#[from] base64::DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let frame = Frame::Position {
            from: 7,
            content: Vec2::new(5.0, 5.0),
        };
        let raw = frame.encode().unwrap();
        assert_eq!(Frame::decode(&raw).unwrap(), frame);
    }

    #[test]
    fn unknown_frame_tag_is_recoverable() {
        let err = Frame::decode(r#"{"type":"teleport","content":{}}"#);
        assert!(matches!(err, Err(FrameError::Malformed(_))));
    }

    #[test]
    fn resolution_message_tags_are_closed() {
        let raw = r#"{"kind":"velocity","message_id":1,"object_id":2,"update":{"x":6.0,"y":0.0}}"#;
        let msg: ResolutionMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.message_id(), 1);

        let unknown = serde_json::from_str::<ResolutionMessage>(r#"{"kind":"explode"}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn presence_fields_default_to_absent() {
        let state: PresenceState = serde_json::from_str("{}").unwrap();
        assert_eq!(state, PresenceState::default());

        let mailbox: MailboxState = serde_json::from_str("{}").unwrap();
        assert!(mailbox.messages.is_empty());
    }

    #[test]
    fn payload_round_trip() {
        let bytes = vec![0u8, 1, 2, 254];
        assert_eq!(decode_payload(&encode_payload(&bytes)).unwrap(), bytes);
        assert!(decode_payload("not base64!!!").is_err());
    }

    #[test]
    fn message_id_derivation_wraps() {
        // the known-weak timestamp * identity scheme, kept on purpose
        assert_eq!(derive_message_id(1_000, 3), 3_000);
        let _ = derive_message_id(u64::MAX, u64::MAX);
    }
}
