//! Time utilities for the simulation tick loop

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Default simulation tick rate
pub const SIMULATION_TPS: u32 = 30; // 30 ticks per second

/// Chat bubbles auto-expire after this long without a newer message
pub const CHAT_BUBBLE_MS: u64 = 5_000;

/// Locally spawned projectiles are pruned after this lifetime
pub const PROJECTILE_TTL_MS: u64 = 1_000;

/// Calculate delta time for one simulation tick (in seconds)
pub fn tick_delta(tick_rate: u32) -> f32 {
    1.0 / tick_rate.max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_delta_matches_rate() {
        assert_eq!(tick_delta(30), 1.0 / 30.0);
        assert_eq!(tick_delta(0), 1.0);
    }
}
