//! Avatar overlap detection and client-side collision resolution
//!
//! Both sides of a colliding pair run this detection independently and each
//! queues a resolution for the other; the redundant double-delivery is
//! deliberate, the nudges are small and bounded.

use crate::net::protocol::Vec2;

/// Square hitbox dimension for the overlap test, matching the avatar
/// display width; both axes are symmetric.
pub const AVATAR_HITBOX_DIM: f32 = 64.0;

/// Restitution-like coefficient scaling the normalized displacement vector
pub const RESOLVE_VEL_COEF: f32 = 6.0;

/// Velocity updates arriving via the mailbox are divided by this before
/// being applied as an impulse
pub const FORCE_SCALE: f32 = 100.0;

/// Axis-aligned box overlap between two avatars
pub fn overlaps(mine: Vec2, theirs: Vec2) -> bool {
    let dx = (mine.x - theirs.x).abs();
    let dy = (mine.y - theirs.y).abs();
    dx <= AVATAR_HITBOX_DIM && dy <= AVATAR_HITBOX_DIM
}

/// Velocity nudges resolving an overlap: the first is applied to the local
/// avatar immediately, the second is queued for the peer. The displacement
/// vector runs from the peer to us; two avatars on the exact same point
/// fall back to a unit denominator instead of dividing by zero.
pub fn resolve_overlap(mine: Vec2, theirs: Vec2) -> (Vec2, Vec2) {
    let dx = mine.x - theirs.x;
    let dy = mine.y - theirs.y;
    let distance = (dx * dx + dy * dy).sqrt();
    let denom = if distance == 0.0 { 1.0 } else { distance };

    let nudge = Vec2::new(dx / denom * RESOLVE_VEL_COEF, dy / denom * RESOLVE_VEL_COEF);
    (nudge, Vec2::new(-nudge.x, -nudge.y))
}
