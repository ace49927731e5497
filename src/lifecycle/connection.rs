use serde::Serialize;

use crate::constants::{
    RECONNECT_IMMUNITY_TICKS, RECONNECT_PENALTY_VITALITY, TIMEOUT_SLOWNESS_AMPLIFIER,
    TIMEOUT_SLOWNESS_TICKS, TIMEOUT_WEAKNESS_AMPLIFIER, TIMEOUT_WEAKNESS_TICKS,
};
use crate::incapacitation_store::IncapacitationStore;
use crate::play_mode;
use crate::revival::RevivalCoordinator;
use crate::types::{EffectKind, PlayMode, PlayerId, Posture, StatusEffect};
use crate::world::World;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Joined {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
    },
    Left {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
    },
    Respawned {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
    },
}

#[derive(Clone, Debug)]
pub struct ReconnectOptions {
    pub penalty_vitality: f32,
    pub immunity_ticks: u32,
    pub weakness: StatusEffect,
    pub slowness: StatusEffect,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            penalty_vitality: RECONNECT_PENALTY_VITALITY,
            immunity_ticks: RECONNECT_IMMUNITY_TICKS,
            weakness: StatusEffect {
                kind: EffectKind::Weakness,
                amplifier: TIMEOUT_WEAKNESS_AMPLIFIER,
                remaining_ticks: TIMEOUT_WEAKNESS_TICKS,
            },
            slowness: StatusEffect {
                kind: EffectKind::Slowness,
                amplifier: TIMEOUT_SLOWNESS_AMPLIFIER,
                remaining_ticks: TIMEOUT_SLOWNESS_TICKS,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JoinOutcome {
    pub penalized: bool,
    /// A downed record survived (e.g. restored from disk) and must be re-presented.
    pub still_downed: bool,
    pub rescaled: usize,
}

pub fn escaped_message(name: &str) -> String {
    format!("{name} narrowly escaped the Dread")
}

#[derive(Clone, Debug, Default)]
pub struct ConnectionLifecycleHandler {
    options: ReconnectOptions,
}

impl ConnectionLifecycleHandler {
    pub fn on_disconnect(
        &self,
        world: &mut World,
        store: &mut IncapacitationStore,
        revival: &RevivalCoordinator,
        player_id: &str,
    ) -> bool {
        if let Some(participant) = world.participant_mut(player_id) {
            participant.connected = false;
            participant.helping = false;
        }

        let escaped = store.is_downed(player_id);
        if escaped {
            store.mark_escaped(player_id);
            store.remove_downed(player_id);
            if let Some(participant) = world.participant_mut(player_id) {
                participant.posture = Posture::Standing;
                revival.remove_movement_penalty(participant);
            }
            tracing::info!(player_id, "player escaped while downed");
        }

        let rescaled = sync_modes(world, store, PlayMode::Group, PlayMode::Solo);
        if rescaled > 0 {
            tracing::info!(player_id, rescaled, "disconnect changed play mode");
        }
        escaped
    }

    pub fn on_join(
        &self,
        world: &mut World,
        store: &mut IncapacitationStore,
        player_id: &str,
    ) -> JoinOutcome {
        let mut outcome = JoinOutcome::default();
        let Some(participant) = world.participant_mut(player_id) else {
            tracing::warn!(player_id, "join for unknown participant");
            return outcome;
        };
        participant.connected = true;

        if store.clear_escaped(player_id) {
            participant.vitality = self.options.penalty_vitality.min(participant.max_vitality);
            participant.damage_immunity_ticks = self.options.immunity_ticks;
            let message = escaped_message(&participant.name);
            world.broadcast(message);
            tracing::info!(player_id, "reconnect penalty applied");
            outcome.penalized = true;
        }

        outcome.still_downed = store.is_downed(player_id);
        outcome.rescaled = sync_modes(world, store, PlayMode::Solo, PlayMode::Group);
        if outcome.rescaled > 0 {
            tracing::info!(player_id, rescaled = outcome.rescaled, "join changed play mode");
        }
        outcome
    }

    pub fn on_respawn(
        &self,
        world: &mut World,
        store: &mut IncapacitationStore,
        player_id: &str,
    ) -> bool {
        let Some(participant) = world.online_mut(player_id) else {
            return false;
        };
        participant.alive = true;
        if !store.clear_died_from_timeout(player_id) {
            return false;
        }
        participant.add_effect(self.options.weakness);
        participant.add_effect(self.options.slowness);
        tracing::info!(player_id, "timeout respawn debuff applied");
        true
    }
}

/// Moves `from` records to `to`, only when the session now implies `to`.
/// A leave can only shrink a session and a join can only grow it.
fn sync_modes(
    world: &World,
    store: &mut IncapacitationStore,
    from: PlayMode,
    to: PlayMode,
) -> usize {
    if play_mode::detect(world.session_context()) != to {
        return 0;
    }
    let mut rescaled = 0;
    for player_id in store.downed_ids() {
        let current = store.record(&player_id).map(|record| record.mode);
        if current == Some(from) && store.transition_mode(&player_id, to) {
            rescaled += 1;
        }
    }
    rescaled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownedConfig;
    use crate::constants::CRAWL_MODIFIER_ID;
    use crate::types::{SessionTopology, Vec3};

    fn local_world(ids: &[&str]) -> World {
        let mut world = World::new(SessionTopology::Local);
        for id in ids {
            world.ensure_participant(id, &id.to_uppercase(), Vec3::default());
        }
        world
    }

    #[test]
    fn disconnect_marks_escape_and_restores_posture() {
        let mut world = local_world(&["a", "b"]);
        let mut store = IncapacitationStore::new(DownedConfig::default());
        let revival = RevivalCoordinator::default();
        let context = world.session_context();
        store
            .set_downed("a", Vec3::default(), context)
            .expect("down succeeds");
        {
            let a = world.participant_mut("a").expect("a exists");
            a.posture = Posture::Prone;
            revival.apply_movement_penalty(a);
        }

        let handler = ConnectionLifecycleHandler::default();
        assert!(handler.on_disconnect(&mut world, &mut store, &revival, "a"));
        assert!(!store.is_downed("a"));
        assert!(store.was_escaped("a"));
        let a = world.participant("a").expect("a exists");
        assert!(!a.connected);
        assert_eq!(a.posture, Posture::Standing);
        assert!(!a.has_movement_modifier(CRAWL_MODIFIER_ID));
    }

    #[test]
    fn reconnect_penalty_applies_once() {
        let mut world = local_world(&["a", "b"]);
        let mut store = IncapacitationStore::new(DownedConfig::default());
        store.mark_escaped("a");
        world.participant_mut("a").expect("a exists").connected = false;

        let handler = ConnectionLifecycleHandler::default();
        let outcome = handler.on_join(&mut world, &mut store, "a");
        assert!(outcome.penalized);
        let a = world.participant("a").expect("a exists");
        assert_eq!(a.vitality, RECONNECT_PENALTY_VITALITY);
        assert_eq!(a.damage_immunity_ticks, RECONNECT_IMMUNITY_TICKS);
        assert_eq!(world.drain_broadcasts(), vec![escaped_message("A")]);

        assert!(!handler.on_join(&mut world, &mut store, "a").penalized);
    }

    #[test]
    fn respawn_debuff_only_after_timeout_death() {
        let mut world = local_world(&["a"]);
        let mut store = IncapacitationStore::new(DownedConfig::default());
        let handler = ConnectionLifecycleHandler::default();
        assert!(!handler.on_respawn(&mut world, &mut store, "a"));

        store.mark_died_from_timeout("a");
        assert!(handler.on_respawn(&mut world, &mut store, "a"));
        let a = world.participant("a").expect("a exists");
        let weakness = a.effect(EffectKind::Weakness).expect("weakness applied");
        assert_eq!((weakness.amplifier, weakness.remaining_ticks), (1, 1200));
        let slowness = a.effect(EffectKind::Slowness).expect("slowness applied");
        assert_eq!((slowness.amplifier, slowness.remaining_ticks), (0, 600));
        assert!(!handler.on_respawn(&mut world, &mut store, "a"));
    }

    #[test]
    fn leaving_to_one_local_participant_rescales_to_solo() {
        let mut world = local_world(&["a", "b", "c"]);
        let mut store = IncapacitationStore::new(DownedConfig::default());
        let revival = RevivalCoordinator::default();
        let context = world.session_context();
        store
            .set_downed("b", Vec3::default(), context)
            .expect("down succeeds");
        let handler = ConnectionLifecycleHandler::default();

        handler.on_disconnect(&mut world, &mut store, &revival, "c");
        assert_eq!(store.record("b").map(|r| r.mode), Some(PlayMode::Group));

        handler.on_disconnect(&mut world, &mut store, &revival, "a");
        let record = store.record("b").expect("record exists");
        assert_eq!(record.mode, PlayMode::Solo);
        assert_eq!(record.remaining_ticks, 600);

        handler.on_join(&mut world, &mut store, "a");
        let record = store.record("b").expect("record exists");
        assert_eq!(record.mode, PlayMode::Group);
        assert_eq!(record.remaining_ticks, 6_000);
    }

    #[test]
    fn first_local_join_keeps_restored_group_record() {
        let mut world = local_world(&["a", "b"]);
        world.participant_mut("a").expect("a exists").connected = false;
        world.participant_mut("b").expect("b exists").connected = false;
        let mut store = IncapacitationStore::new(DownedConfig::default());
        let group_context = crate::play_mode::SessionContext {
            topology: SessionTopology::Dedicated,
            connected_participants: 2,
        };
        store
            .set_downed("a", Vec3::default(), group_context)
            .expect("down succeeds");

        let handler = ConnectionLifecycleHandler::default();
        let outcome = handler.on_join(&mut world, &mut store, "b");
        assert_eq!(outcome.rescaled, 0);
        let record = store.record("a").expect("record exists");
        assert_eq!(record.mode, PlayMode::Group);
        assert_eq!(record.remaining_ticks, 6_000);
    }

    #[test]
    fn last_local_leave_keeps_solo_record() {
        let mut world = local_world(&["a", "b"]);
        world.participant_mut("a").expect("a exists").connected = false;
        let mut store = IncapacitationStore::new(DownedConfig::default());
        let revival = RevivalCoordinator::default();
        let context = world.session_context();
        store
            .set_downed("a", Vec3::default(), context)
            .expect("down succeeds");
        assert_eq!(store.record("a").map(|r| r.mode), Some(PlayMode::Solo));

        let handler = ConnectionLifecycleHandler::default();
        handler.on_disconnect(&mut world, &mut store, &revival, "b");
        assert_eq!(world.connected_count(), 0);
        let record = store.record("a").expect("record exists");
        assert_eq!(record.mode, PlayMode::Solo);
        assert_eq!(record.remaining_ticks, 600);
    }
}
