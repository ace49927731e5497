use std::collections::BTreeMap;

use crate::types::AttackerId;

/// Handle on the hostile entity. Its AI is owned elsewhere.
pub trait AttackerProxy {
    fn schedule_departure(&mut self, attacker_id: &str, delay_ticks: u32);
    fn is_still_present(&self, attacker_id: &str) -> bool;
}

#[derive(Clone, Debug, Default)]
struct AttackerState {
    departing_in: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct AttackerRoster {
    attackers: BTreeMap<AttackerId, AttackerState>,
}

impl AttackerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, attacker_id: &str) {
        self.attackers
            .entry(attacker_id.to_string())
            .or_default();
    }

    pub fn len(&self) -> usize {
        self.attackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attackers.is_empty()
    }

    pub fn tick(&mut self) -> Vec<AttackerId> {
        let mut departed = Vec::new();
        for (attacker_id, state) in self.attackers.iter_mut() {
            let Some(remaining) = state.departing_in else {
                continue;
            };
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                departed.push(attacker_id.clone());
            } else {
                state.departing_in = Some(remaining);
            }
        }
        for attacker_id in &departed {
            self.attackers.remove(attacker_id);
            tracing::debug!(attacker_id = %attacker_id, "attacker departed");
        }
        departed
    }
}

impl AttackerProxy for AttackerRoster {
    fn schedule_departure(&mut self, attacker_id: &str, delay_ticks: u32) {
        let Some(state) = self.attackers.get_mut(attacker_id) else {
            return;
        };
        let delay_ticks = delay_ticks.max(1);
        state.departing_in = Some(match state.departing_in {
            Some(current) => current.min(delay_ticks),
            None => delay_ticks,
        });
    }

    fn is_still_present(&self, attacker_id: &str) -> bool {
        self.attackers.contains_key(attacker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn departure_happens_after_delay() {
        let mut roster = AttackerRoster::new();
        roster.spawn("dread_1");
        roster.schedule_departure("dread_1", 3);
        assert!(roster.tick().is_empty());
        assert!(roster.tick().is_empty());
        assert_eq!(roster.tick(), vec!["dread_1".to_string()]);
        assert!(!roster.is_still_present("dread_1"));
    }

    #[test]
    fn rescheduling_keeps_earliest_departure() {
        let mut roster = AttackerRoster::new();
        roster.spawn("dread_1");
        roster.schedule_departure("dread_1", 2);
        roster.schedule_departure("dread_1", 10);
        roster.tick();
        assert_eq!(roster.tick(), vec!["dread_1".to_string()]);
    }

    #[test]
    fn unknown_attacker_is_ignored() {
        let mut roster = AttackerRoster::new();
        roster.schedule_departure("missing", 1);
        assert!(roster.tick().is_empty());
        assert!(roster.is_empty());
    }
}
