//! Rendering and media seam
//!
//! The sprite engine, physics bodies and audio elements live in the host;
//! the reconciliation loop only drives them through these traits.

use crate::net::protocol::Vec2;

/// One penguin on stage. Local and remote avatars share this capability
/// set; only the input source differs (live controls vs replicated state).
pub trait Avatar: Send {
    fn move_to(&mut self, x: f32, y: f32);
    fn play_animation_state(&mut self, name: &str);
    /// Show (or clear, for empty text) the speech bubble
    fn show_text(&mut self, text: &str);
    fn apply_impulse(&mut self, vx: f32, vy: f32);
    fn set_velocity(&mut self, vx: f32, vy: f32);
    fn position(&self) -> Vec2;
    fn destroy(&mut self);
}

/// A thrown object owned by the stage
pub trait ProjectileSprite: Send {
    fn position(&self) -> Vec2;
    fn destroy(&mut self);
}

/// Peer arrival/departure notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPresence {
    Joined,
    Left,
}

/// The host engine surface consumed by the reconciliation loop
pub trait Stage: Send {
    fn create_avatar(&mut self, username: &str) -> Box<dyn Avatar>;
    fn spawn_projectile(&mut self, position: Vec2, velocity: Vec2) -> Box<dyn ProjectileSprite>;
    /// Mute or unmute the playback element for one remote media stream
    fn set_stream_muted(&mut self, stream_id: &str, muted: bool);
    fn set_whiteboard_link(&mut self, url: &str);
    fn announce_presence(&mut self, username: &str, presence: PeerPresence);
}
