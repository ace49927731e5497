pub const TICK_RATE: u32 = 20;
pub const TICK_MS: u64 = 1000 / TICK_RATE as u64;

pub const DEFAULT_SOLO_TIMEOUT_SECS: u32 = 30;
pub const DEFAULT_GROUP_TIMEOUT_SECS: u32 = 300;
pub const MAX_DOWNED_TIMEOUT_SECS: u32 = 3_600;

pub const REVIVAL_DURATION_TICKS: u32 = 60;
pub const REVIVAL_RANGE: f64 = 4.0;
pub const REVIVAL_BROADCAST_RANGE: f64 = 16.0;

pub const CRAWL_MODIFIER_ID: &str = "crawl_penalty";
pub const CRAWL_SPEED_MODIFIER: f32 = -0.9;
pub const DOWNED_MIN_VITALITY: f32 = 1.0;

pub const CINEMATIC_DURATION_TICKS: u32 = 90;
pub const ATTACKER_DEPARTURE_DELAY_TICKS: u32 = 100;
pub const CONSEQUENCE_DELAY_TICKS: u32 = 20;
pub const SYNC_INTERVAL_TICKS: u64 = TICK_RATE as u64;

pub const RECONNECT_PENALTY_VITALITY: f32 = 4.0;
pub const RECONNECT_IMMUNITY_TICKS: u32 = 60;

pub const TIMEOUT_WEAKNESS_TICKS: u32 = 20 * 60;
pub const TIMEOUT_WEAKNESS_AMPLIFIER: u8 = 1;
pub const TIMEOUT_SLOWNESS_TICKS: u32 = 20 * 30;
pub const TIMEOUT_SLOWNESS_AMPLIFIER: u8 = 0;

pub const DEFAULT_MAX_VITALITY: f32 = 20.0;

pub fn seconds_to_ticks(seconds: u32) -> u32 {
    seconds.saturating_mul(TICK_RATE)
}

/// Ceiling-divided seconds so the display never reads 0 while ticks remain.
pub fn ticks_to_display_seconds(ticks: u32) -> u32 {
    ticks.div_ceil(TICK_RATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_seconds_round_up() {
        assert_eq!(ticks_to_display_seconds(301), 16);
        assert_eq!(ticks_to_display_seconds(300), 15);
        assert_eq!(ticks_to_display_seconds(1), 1);
        assert_eq!(ticks_to_display_seconds(0), 0);
    }

    #[test]
    fn seconds_to_ticks_saturates() {
        assert_eq!(seconds_to_ticks(30), 600);
        assert_eq!(seconds_to_ticks(u32::MAX), u32::MAX);
    }
}
