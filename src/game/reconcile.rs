//! Reconciliation loop
//!
//! Runs once per simulation tick in a fixed order: pump the transport queue
//! (the boundary where remote changes become visible), publish local state,
//! drain-and-apply the own mailbox, reconcile remote avatars from
//! awareness, detect and resolve overlaps, prune expired projectiles.
//! Nothing in a tick blocks and nothing is retried: presence heals itself
//! on the next publish, and a lost mailbox append is accepted loss.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::net::protocol::{
    derive_message_id, InputContent, PeerId, ProjectileEvent, ResolutionMessage, Vec2,
};
use crate::session::{DirectEvent, SessionContext, SharedSession};
use crate::util::time::{unix_millis, PROJECTILE_TTL_MS};

use super::collision::{overlaps, resolve_overlap, FORCE_SCALE};
use super::stage::{Avatar, PeerPresence, ProjectileSprite, Stage};
use super::{spawn_position, LocalTickInput};

struct RemotePeer {
    avatar: Box<dyn Avatar>,
    username: String,
}

struct ActiveProjectile {
    sprite: Box<dyn ProjectileSprite>,
    expires_at: u64,
}

pub struct ReconciliationLoop {
    session: SharedSession,
    stage: Box<dyn Stage>,
    local: Box<dyn Avatar>,
    remotes: HashMap<PeerId, RemotePeer>,
    /// Local projectile instances keyed by object id; the key is the
    /// idempotent-spawn guard
    projectiles: HashMap<u64, ActiveProjectile>,
    ticks: u64,
}

impl ReconciliationLoop {
    pub fn new(session: SharedSession, mut stage: Box<dyn Stage>) -> Self {
        let (client_id, username) = {
            let session = session.lock();
            (session.local_identity(), session.username().to_string())
        };

        let mut local = stage.create_avatar(&username);
        let spawn = spawn_position(client_id);
        local.move_to(spawn.x, spawn.y);
        info!(
            client_id = client_id,
            x = spawn.x,
            y = spawn.y,
            "local avatar spawned"
        );

        Self {
            session,
            stage,
            local,
            remotes: HashMap::new(),
            projectiles: HashMap::new(),
            ticks: 0,
        }
    }

    /// Handle for the UI layer; the loop keeps its own clone
    pub fn session(&self) -> SharedSession {
        self.session.clone()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Teleport the local avatar (spawn points, map transitions)
    pub fn set_local_position(&mut self, x: f32, y: f32) {
        self.local.move_to(x, y);
    }

    /// One reconciliation pass
    pub fn tick(&mut self, input: LocalTickInput) {
        let now = unix_millis();
        self.ticks += 1;

        let session = Arc::clone(&self.session);
        let mut session = session.lock();

        // remote updates land here, between ticks, never mid-read
        let direct = session.pump();
        self.apply_direct_events(direct);

        // 1. publish local state
        let position = self.local.position();
        session.publish_local(
            position,
            InputContent {
                cursor: input.cursor,
                state_name: input.state_name,
                dt: input.dt,
            },
            now,
        );

        // 2. drain and apply own mailbox, then clear
        let inbound = session.drain_own_mailbox();
        for message in inbound {
            self.apply_resolution(message);
        }
        session.clear_own_mailbox();

        // 3. reconcile remote avatars from awareness
        self.reconcile_peers(&mut session);

        // 4. detect overlaps and queue resolutions
        self.resolve_collisions(&mut session, now);

        // 5. housekeeping
        self.prune_projectiles(now);
    }

    fn apply_direct_events(&mut self, events: Vec<DirectEvent>) {
        for event in events {
            match event {
                DirectEvent::Input { from, content } => {
                    if let Some(peer) = self.remotes.get_mut(&from) {
                        peer.avatar.play_animation_state(&content.state_name);
                    }
                }
                DirectEvent::Position { from, content } => {
                    if let Some(peer) = self.remotes.get_mut(&from) {
                        peer.avatar.move_to(content.x, content.y);
                    }
                }
                DirectEvent::Message { from, content } => {
                    if let Some(peer) = self.remotes.get_mut(&from) {
                        peer.avatar.show_text(&content);
                    }
                }
                DirectEvent::Whiteboard { content } => {
                    self.stage.set_whiteboard_link(&content);
                }
            }
        }
    }

    /// Apply one drained resolution message to the local simulation
    fn apply_resolution(&mut self, message: ResolutionMessage) {
        match message {
            ResolutionMessage::Velocity { update, .. } => {
                self.local
                    .apply_impulse(update.x / FORCE_SCALE, update.y / FORCE_SCALE);
            }
            ResolutionMessage::Position { update, .. } => {
                self.local.move_to(update.x, update.y);
            }
            ResolutionMessage::Projectile {
                object_id,
                event: ProjectileEvent::Spawn,
                position,
                velocity,
                ..
            } => {
                self.spawn_projectile_local(object_id, position, velocity);
            }
            ResolutionMessage::Projectile {
                object_id,
                event: ProjectileEvent::Despawn,
                ..
            } => {
                self.despawn_projectile_local(object_id);
            }
        }
    }

    fn spawn_projectile_local(&mut self, object_id: u64, position: Vec2, velocity: Vec2) {
        // duplicate SPAWNs for a known id are dropped
        if self.projectiles.contains_key(&object_id) {
            return;
        }
        let sprite = self.stage.spawn_projectile(position, velocity);
        self.projectiles.insert(
            object_id,
            ActiveProjectile {
                sprite,
                expires_at: unix_millis() + PROJECTILE_TTL_MS,
            },
        );
    }

    fn despawn_projectile_local(&mut self, object_id: u64) {
        // unknown ids are a no-op, not an error
        if let Some(mut projectile) = self.projectiles.remove(&object_id) {
            projectile.sprite.destroy();
        }
    }

    fn reconcile_peers(&mut self, session: &mut SessionContext) {
        for (peer_id, record) in session.presence_snapshot() {
            if record.removed {
                if let Some(mut peer) = self.remotes.remove(&peer_id) {
                    info!(peer_id = peer_id, username = %peer.username, "peer left");
                    self.stage
                        .announce_presence(&peer.username, PeerPresence::Left);
                    peer.avatar.destroy();
                }
                session.forget_peer(peer_id);
                continue;
            }

            let Some(state) = record.state else { continue };

            if !self.remotes.contains_key(&peer_id) {
                let username = state
                    .username
                    .as_ref()
                    .map(|u| u.username.clone())
                    .unwrap_or_default();
                let avatar = self.stage.create_avatar(&username);
                self.stage
                    .announce_presence(&username, PeerPresence::Joined);
                info!(peer_id = peer_id, username = %username, "peer joined");
                self.remotes.insert(peer_id, RemotePeer { avatar, username });
            }
            let Some(peer) = self.remotes.get_mut(&peer_id) else {
                continue;
            };

            if let Some(position) = state.position {
                peer.avatar.move_to(position.x, position.y);
            }
            if let Some(input) = &state.input {
                peer.avatar.play_animation_state(&input.state_name);
            }
            if let Some(text) = &state.text {
                peer.avatar.show_text(&text.text);
            }
            if let Some(audio) = &state.audio {
                if !audio.stream_id.is_empty() {
                    self.stage.set_stream_muted(&audio.stream_id, audio.muted);
                }
            }
        }
    }

    fn resolve_collisions(&mut self, session: &mut SessionContext, now: u64) {
        let my_position = self.local.position();

        for (peer_id, record) in session.presence_snapshot() {
            if record.removed {
                continue;
            }
            let Some(their_position) = record.state.as_ref().and_then(|s| s.position) else {
                continue;
            };
            if !overlaps(my_position, their_position) {
                continue;
            }

            debug!(peer_id = peer_id, "avatar overlap detected");
            let (mine, theirs) = resolve_overlap(my_position, their_position);

            // our half is applied immediately, no mailbox hop for self
            self.local.set_velocity(mine.x, mine.y);

            // their half rides the mailbox; the peer applies it on its own
            // next drain. Both sides detecting the same pair is expected.
            session.deliver(
                peer_id,
                ResolutionMessage::Velocity {
                    message_id: derive_message_id(now, peer_id),
                    object_id: peer_id,
                    update: theirs,
                },
            );
        }
    }

    fn prune_projectiles(&mut self, now: u64) {
        let expired: Vec<u64> = self
            .projectiles
            .iter()
            .filter(|(_, projectile)| now >= projectile.expires_at)
            .map(|(id, _)| *id)
            .collect();
        for object_id in expired {
            self.despawn_projectile_local(object_id);
        }
    }

    // --- game events feeding the mailbox ---

    /// Throw a projectile from the local avatar: spawn it immediately, then
    /// queue a durable SPAWN for every currently known peer. Returns the
    /// object id so the host can report impacts.
    pub fn throw_projectile(&mut self, velocity: Vec2) -> u64 {
        let origin = self.local.position();
        let session = Arc::clone(&self.session);
        let mut session = session.lock();

        let object_id = derive_message_id(unix_millis(), session.local_identity());
        self.spawn_projectile_local(object_id, origin, velocity);

        let message = ResolutionMessage::Projectile {
            message_id: object_id,
            object_id,
            event: ProjectileEvent::Spawn,
            position: origin,
            velocity,
        };
        for peer_id in session.known_peers().keys() {
            session.deliver(*peer_id, message.clone());
        }
        object_id
    }

    /// A locally detected projectile impact: destroy the local copy
    /// immediately, then queue a DESPAWN for every currently known peer.
    pub fn projectile_hit(&mut self, object_id: u64) {
        self.despawn_projectile_local(object_id);

        let session = Arc::clone(&self.session);
        let mut session = session.lock();
        let message = ResolutionMessage::Projectile {
            message_id: object_id,
            object_id,
            event: ProjectileEvent::Despawn,
            position: Vec2::default(),
            velocity: Vec2::default(),
        };
        for peer_id in session.known_peers().keys() {
            session.deliver(*peer_id, message.clone());
        }
    }

    /// Durable chat send plus the local speech bubble
    pub fn send_chat(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.session.lock().send_chat(text);
        self.local.show_text(text);
    }

    /// Share a whiteboard link with every directly-connected peer
    pub fn share_whiteboard_link(&mut self, url: &str) {
        self.session.lock().broadcast_whiteboard(url);
    }

    /// Drive the loop at the given tick rate until the input source returns
    /// `None`. Missed ticks are skipped, not bunched.
    pub async fn run(
        mut self,
        tick_rate: u32,
        mut input_source: impl FnMut(u64) -> Option<LocalTickInput>,
    ) {
        let mut ticker = interval(Duration::from_micros(
            1_000_000 / u64::from(tick_rate.max(1)),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let Some(input) = input_source(self.ticks) else {
                break;
            };
            self.tick(input);
        }
        info!(ticks = self.ticks, "reconciliation loop stopped");
    }
}
