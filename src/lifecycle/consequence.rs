use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::LifecycleError;
use crate::incapacitation_store::IncapacitationStore;
use crate::presentation::PresentationSink;
use crate::revival::RevivalCoordinator;
use crate::types::{GameRole, PlayMode, PlayerId, Posture};
use crate::world::World;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Consequence {
    Death,
    Observer,
}

impl Consequence {
    pub fn for_mode(mode: PlayMode) -> Self {
        match mode {
            PlayMode::Solo => Self::Death,
            PlayMode::Group => Self::Observer,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingConsequence {
    pub player_id: PlayerId,
    pub consequence: Consequence,
    pub remaining_ticks: u32,
}

#[derive(Clone, Debug, Default)]
pub struct PendingConsequences {
    entries: BTreeMap<PlayerId, PendingConsequence>,
}

impl PendingConsequences {
    pub fn schedule(&mut self, player_id: &str, consequence: Consequence, delay_ticks: u32) {
        self.entries
            .entry(player_id.to_string())
            .or_insert(PendingConsequence {
                player_id: player_id.to_string(),
                consequence,
                remaining_ticks: delay_ticks.max(1),
            });
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.entries.contains_key(player_id)
    }

    pub fn get(&self, player_id: &str) -> Option<&PendingConsequence> {
        self.entries.get(player_id)
    }

    pub fn cancel(&mut self, player_id: &str) -> bool {
        self.entries.remove(player_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tick(&mut self) -> Vec<PendingConsequence> {
        let mut due = Vec::new();
        for entry in self.entries.values_mut() {
            entry.remaining_ticks = entry.remaining_ticks.saturating_sub(1);
            if entry.remaining_ticks == 0 {
                due.push(entry.clone());
            }
        }
        for entry in &due {
            self.entries.remove(&entry.player_id);
        }
        due
    }
}

pub fn succumbed_message(name: &str) -> String {
    format!("{name} succumbed to the Dread")
}

/// Applies the consequence. The client is told to drop its downed effects
/// before the death or role change is finalized.
pub fn apply(
    pending: &PendingConsequence,
    world: &mut World,
    store: &mut IncapacitationStore,
    revival: &RevivalCoordinator,
    sink: &mut dyn PresentationSink,
) -> Result<(), LifecycleError> {
    let player_id = pending.player_id.as_str();
    let Some(record) = store.record(player_id) else {
        return Err(LifecycleError::NotDowned(player_id.to_string()));
    };
    let is_solo = record.mode == PlayMode::Solo;
    let Some(participant) = world.online_mut(player_id) else {
        store.remove_downed(player_id);
        return Err(LifecycleError::PlayerUnavailable(player_id.to_string()));
    };

    participant.posture = Posture::Standing;
    revival.remove_movement_penalty(participant);
    let name = participant.name.clone();
    if pending.consequence == Consequence::Death {
        store.mark_died_from_timeout(player_id);
    }
    store.remove_downed(player_id);
    world.broadcast(succumbed_message(&name));

    sink.send_remove_downed_effects(player_id);
    sink.send_downed_state_update(player_id, false, 0, is_solo);

    let Some(participant) = world.participant_mut(player_id) else {
        return Err(LifecycleError::PlayerUnavailable(player_id.to_string()));
    };
    match pending.consequence {
        Consequence::Death => {
            participant.vitality = 0.0;
            participant.alive = false;
        }
        Consequence::Observer => {
            participant.role = GameRole::Spectator;
            participant.vitality = participant.max_vitality;
        }
    }
    participant.helping = false;
    tracing::info!(
        player_id,
        consequence = ?pending.consequence,
        "downed timeout consequence applied"
    );
    Ok(())
}
