use std::collections::BTreeMap;

use crate::types::{AttackerId, PlayerId};

#[derive(Clone, Debug, PartialEq, Eq)]
struct GateEntry {
    attacker_id: AttackerId,
    remaining_ticks: u32,
}

#[derive(Clone, Debug, Default)]
pub struct CinematicGate {
    playing: BTreeMap<PlayerId, GateEntry>,
}

impl CinematicGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, player_id: &str, attacker_id: &str, hold_ticks: u32) {
        self.playing.insert(
            player_id.to_string(),
            GateEntry {
                attacker_id: attacker_id.to_string(),
                remaining_ticks: hold_ticks.max(1),
            },
        );
    }

    pub fn is_playing(&self, player_id: &str) -> bool {
        self.playing.contains_key(player_id)
    }

    pub fn attacker_of(&self, player_id: &str) -> Option<&str> {
        self.playing
            .get(player_id)
            .map(|entry| entry.attacker_id.as_str())
    }

    pub fn finish(&mut self, player_id: &str) -> bool {
        self.playing.remove(player_id).is_some()
    }

    pub fn clear(&mut self, player_id: &str) {
        self.playing.remove(player_id);
    }

    /// Counts every hold down by one tick. `still_present` reports whether the
    /// attacker is still around; once it has left the hold ends immediately.
    pub fn tick<F>(&mut self, mut still_present: F) -> Vec<PlayerId>
    where
        F: FnMut(&str) -> bool,
    {
        let mut finished = Vec::new();
        for (player_id, entry) in self.playing.iter_mut() {
            entry.remaining_ticks = entry.remaining_ticks.saturating_sub(1);
            if entry.remaining_ticks == 0 || !still_present(&entry.attacker_id) {
                finished.push(player_id.clone());
            }
        }
        for player_id in &finished {
            self.playing.remove(player_id);
        }
        finished
    }
}
