//! Headless stage
//!
//! A sprite-less [`Stage`] implementation that records what the loop asked
//! it to do. The sandbox binary runs on it, and the tests inspect it
//! through the shared probe handle.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::net::protocol::Vec2;

use super::stage::{Avatar, PeerPresence, ProjectileSprite, Stage};

/// Everything the stage was asked to do, observable from outside
#[derive(Default)]
pub struct StageLog {
    /// Avatars in creation order; index 0 is the local avatar
    pub avatars: Vec<Arc<Mutex<AvatarState>>>,
    pub projectiles: Vec<Arc<Mutex<ProjectileState>>>,
    pub whiteboard: Option<String>,
    pub muted_streams: Vec<(String, bool)>,
    pub presence: Vec<(String, PeerPresence)>,
}

#[derive(Debug, Clone, Default)]
pub struct AvatarState {
    pub username: String,
    pub position: Vec2,
    pub velocity: Vec2,
    pub animation: String,
    pub bubble: Option<String>,
    pub impulses: Vec<Vec2>,
    pub destroyed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectileState {
    pub position: Vec2,
    pub velocity: Vec2,
    pub destroyed: bool,
}

pub struct HeadlessStage {
    log: Arc<Mutex<StageLog>>,
}

impl HeadlessStage {
    /// The stage and a probe handle into everything it records
    pub fn new() -> (Self, Arc<Mutex<StageLog>>) {
        let log = Arc::new(Mutex::new(StageLog::default()));
        (Self { log: log.clone() }, log)
    }
}

impl Stage for HeadlessStage {
    fn create_avatar(&mut self, username: &str) -> Box<dyn Avatar> {
        let state = Arc::new(Mutex::new(AvatarState {
            username: username.to_string(),
            ..AvatarState::default()
        }));
        self.log.lock().avatars.push(state.clone());
        debug!(username = username, "avatar created");
        Box::new(HeadlessAvatar { state })
    }

    fn spawn_projectile(&mut self, position: Vec2, velocity: Vec2) -> Box<dyn ProjectileSprite> {
        let state = Arc::new(Mutex::new(ProjectileState {
            position,
            velocity,
            destroyed: false,
        }));
        self.log.lock().projectiles.push(state.clone());
        debug!(x = position.x, y = position.y, "projectile spawned");
        Box::new(HeadlessProjectile { state })
    }

    fn set_stream_muted(&mut self, stream_id: &str, muted: bool) {
        self.log
            .lock()
            .muted_streams
            .push((stream_id.to_string(), muted));
    }

    fn set_whiteboard_link(&mut self, url: &str) {
        self.log.lock().whiteboard = Some(url.to_string());
    }

    fn announce_presence(&mut self, username: &str, presence: PeerPresence) {
        debug!(username = username, presence = ?presence, "peer presence");
        self.log
            .lock()
            .presence
            .push((username.to_string(), presence));
    }
}

struct HeadlessAvatar {
    state: Arc<Mutex<AvatarState>>,
}

impl Avatar for HeadlessAvatar {
    fn move_to(&mut self, x: f32, y: f32) {
        self.state.lock().position = Vec2::new(x, y);
    }

    fn play_animation_state(&mut self, name: &str) {
        self.state.lock().animation = name.to_string();
    }

    fn show_text(&mut self, text: &str) {
        let mut state = self.state.lock();
        state.bubble = if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        };
    }

    fn apply_impulse(&mut self, vx: f32, vy: f32) {
        let mut state = self.state.lock();
        state.impulses.push(Vec2::new(vx, vy));
        state.velocity.x += vx;
        state.velocity.y += vy;
    }

    fn set_velocity(&mut self, vx: f32, vy: f32) {
        self.state.lock().velocity = Vec2::new(vx, vy);
    }

    fn position(&self) -> Vec2 {
        self.state.lock().position
    }

    fn destroy(&mut self) {
        self.state.lock().destroyed = true;
    }
}

struct HeadlessProjectile {
    state: Arc<Mutex<ProjectileState>>,
}

impl ProjectileSprite for HeadlessProjectile {
    fn position(&self) -> Vec2 {
        self.state.lock().position
    }

    fn destroy(&mut self) {
        self.state.lock().destroyed = true;
    }
}
