pub mod connection;
pub mod consequence;

use std::collections::VecDeque;

use crate::attacker::AttackerProxy;
use crate::cinematic::CinematicGate;
use crate::config::DownedConfig;
use crate::constants::{
    ATTACKER_DEPARTURE_DELAY_TICKS, CINEMATIC_DURATION_TICKS, CONSEQUENCE_DELAY_TICKS,
    DOWNED_MIN_VITALITY, SYNC_INTERVAL_TICKS,
};
use crate::error::LifecycleError;
use crate::incapacitation_store::IncapacitationStore;
use crate::presentation::PresentationSink;
use crate::revival::RevivalCoordinator;
use crate::types::{
    DamageCause, DownedView, GameRole, HitOutcome, PlayMode, PlayerAction, Posture,
};
use crate::world::World;

use self::connection::{ConnectionEvent, ConnectionLifecycleHandler};
use self::consequence::{Consequence, PendingConsequences};

pub struct LifecycleController {
    store: IncapacitationStore,
    gate: CinematicGate,
    revival: RevivalCoordinator,
    connections: ConnectionLifecycleHandler,
    pending: PendingConsequences,
    events: VecDeque<ConnectionEvent>,
    tick: u64,
}

impl LifecycleController {
    pub fn new(config: DownedConfig) -> Self {
        Self::from_store(IncapacitationStore::new(config))
    }

    pub fn from_store(store: IncapacitationStore) -> Self {
        Self {
            store,
            gate: CinematicGate::new(),
            revival: RevivalCoordinator::default(),
            connections: ConnectionLifecycleHandler::default(),
            pending: PendingConsequences::default(),
            events: VecDeque::new(),
            tick: 0,
        }
    }

    pub fn with_revival(mut self, revival: RevivalCoordinator) -> Self {
        self.revival = revival;
        self
    }

    pub fn config(&self) -> &DownedConfig {
        self.store.config()
    }

    pub fn store(&self) -> &IncapacitationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut IncapacitationStore {
        &mut self.store
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn is_downed(&self, player_id: &str) -> bool {
        self.store.is_downed(player_id)
    }

    pub fn is_cinematic_playing(&self, player_id: &str) -> bool {
        self.gate.is_playing(player_id)
    }

    pub fn pending_consequence(&self, player_id: &str) -> Option<Consequence> {
        self.pending.get(player_id).map(|entry| entry.consequence)
    }

    pub fn enqueue(&mut self, event: ConnectionEvent) {
        self.events.push_back(event);
    }

    pub fn on_lethal_hit(
        &mut self,
        world: &mut World,
        sink: &mut dyn PresentationSink,
        attackers: &mut dyn AttackerProxy,
        player_id: &str,
        cause: DamageCause,
    ) -> HitOutcome {
        if !self.store.config().enabled {
            return HitOutcome::AllowDeath;
        }
        if world.online(player_id).is_none() {
            self.clear_downed_state(world, sink, player_id);
            return HitOutcome::AllowDeath;
        }
        if cause.bypasses_downed() {
            if self.clear_downed_state(world, sink, player_id) {
                tracing::info!(player_id, ?cause, "lethal cause bypassed downed state");
            }
            return HitOutcome::AllowDeath;
        }

        let context = world.session_context();
        let Some(participant) = world.online_mut(player_id) else {
            return HitOutcome::AllowDeath;
        };
        if self.store.is_downed(player_id) {
            participant.vitality = DOWNED_MIN_VITALITY;
            return HitOutcome::Absorbed;
        }
        let DamageCause::Attacker { attacker_id } = cause else {
            return HitOutcome::AllowDeath;
        };
        if participant.role.overrides_downed() {
            return HitOutcome::AllowDeath;
        }

        let (remaining_seconds, mode) =
            match self.store.set_downed(player_id, participant.position, context) {
                Ok(record) => (record.remaining_seconds(), record.mode),
                Err(LifecycleError::AlreadyDowned(_)) => return HitOutcome::Absorbed,
                Err(error) => {
                    tracing::warn!(player_id, %error, "failed to down player");
                    return HitOutcome::AllowDeath;
                }
            };
        participant.vitality = DOWNED_MIN_VITALITY;
        participant.posture = Posture::Prone;
        participant.helping = false;
        self.revival.apply_movement_penalty(participant);
        let position = participant.position;

        if !self.store.config().skip_death_cinematic {
            self.gate.start(player_id, &attacker_id, CINEMATIC_DURATION_TICKS);
            sink.send_cinematic_trigger(player_id, &attacker_id, position);
        }
        attackers.schedule_departure(&attacker_id, ATTACKER_DEPARTURE_DELAY_TICKS);
        sink.send_downed_state_update(
            player_id,
            true,
            remaining_seconds,
            mode == PlayMode::Solo,
        );
        tracing::info!(
            player_id,
            attacker_id = %attacker_id,
            mode = mode.as_str(),
            remaining_seconds,
            "player downed"
        );
        HitOutcome::Downed
    }

    pub fn apply_role_change(
        &mut self,
        world: &mut World,
        sink: &mut dyn PresentationSink,
        player_id: &str,
        role: GameRole,
    ) -> bool {
        let Some(participant) = world.participant_mut(player_id) else {
            return false;
        };
        participant.role = role;
        if !role.overrides_downed() {
            return false;
        }
        let cleared = self.clear_downed_state(world, sink, player_id);
        if cleared {
            tracing::info!(player_id, ?role, "role change cleared downed state");
        }
        cleared
    }

    pub fn mark_cinematic_finished(&mut self, player_id: &str) -> bool {
        self.gate.finish(player_id)
    }

    pub fn permits_action(&self, player_id: &str, action: PlayerAction) -> bool {
        !self.store.is_downed(player_id) || action == PlayerAction::StopSprint
    }

    pub fn downed_views(&self) -> Vec<DownedView> {
        self.store
            .records()
            .map(|record| DownedView {
                player_id: record.player_id.clone(),
                position: record.position,
                remaining_seconds: record.remaining_seconds(),
                mode: record.mode,
                revival_progress: self.store.ritual(&record.player_id).map(|r| r.progress()),
                cinematic_playing: self.gate.is_playing(&record.player_id),
                pending_consequence: self.pending.contains(&record.player_id),
            })
            .collect()
    }

    pub fn step(
        &mut self,
        world: &mut World,
        sink: &mut dyn PresentationSink,
        attackers: &dyn AttackerProxy,
    ) {
        self.tick += 1;
        self.process_events(world, sink);

        for player_id in self.gate.tick(|attacker_id| attackers.is_still_present(attacker_id)) {
            tracing::debug!(player_id = %player_id, "cinematic gate released");
        }

        self.apply_due_consequences(world, sink);
        self.advance_timers(world);
        self.advance_revivals(world, sink);

        if self.tick % SYNC_INTERVAL_TICKS == 0 {
            self.sync_clients(world, sink);
        }
    }

    fn process_events(&mut self, world: &mut World, sink: &mut dyn PresentationSink) {
        while let Some(event) = self.events.pop_front() {
            match event {
                ConnectionEvent::Left { player_id } => {
                    self.connections.on_disconnect(
                        world,
                        &mut self.store,
                        &self.revival,
                        &player_id,
                    );
                    self.gate.clear(&player_id);
                    self.pending.cancel(&player_id);
                }
                ConnectionEvent::Joined { player_id } => {
                    let outcome = self.connections.on_join(world, &mut self.store, &player_id);
                    if outcome.still_downed {
                        report("restore", self.present_restored(world, sink, &player_id));
                    }
                }
                ConnectionEvent::Respawned { player_id } => {
                    self.connections.on_respawn(world, &mut self.store, &player_id);
                }
            }
        }
    }

    fn advance_timers(&mut self, world: &World) {
        for player_id in self.store.downed_ids() {
            if self.gate.is_playing(&player_id)
                || self.store.is_being_revived(&player_id)
                || self.pending.contains(&player_id)
            {
                continue;
            }
            // Restored records wait until their player is back.
            if world.online(&player_id).is_none() {
                continue;
            }
            if self.store.decrement_timer(&player_id) < 0 {
                continue;
            }
            let Some(record) = self.store.record(&player_id) else {
                continue;
            };
            if record.remaining_ticks > 0 {
                continue;
            }
            let consequence = Consequence::for_mode(record.mode);
            self.pending
                .schedule(&player_id, consequence, CONSEQUENCE_DELAY_TICKS);
            tracing::info!(
                player_id = %player_id,
                ?consequence,
                "downed timer expired"
            );
        }
    }

    fn advance_revivals(&mut self, world: &mut World, sink: &mut dyn PresentationSink) {
        for downed_id in self.store.tick_revivals() {
            let result = self
                .revival
                .complete_revival(world, &mut self.store, sink, &downed_id);
            self.gate.clear(&downed_id);
            self.pending.cancel(&downed_id);
            report("revival", result);
        }

        let gate = &self.gate;
        let pending = &self.pending;
        self.revival.scan_for_helpers(world, &mut self.store, |downed_id| {
            !gate.is_playing(downed_id) && !pending.contains(downed_id)
        });
        self.revival.broadcast_active(world, &self.store, sink);
    }

    fn apply_due_consequences(&mut self, world: &mut World, sink: &mut dyn PresentationSink) {
        for due in self.pending.tick() {
            let result = consequence::apply(&due, world, &mut self.store, &self.revival, sink);
            self.gate.clear(&due.player_id);
            report("consequence", result);
        }
    }

    fn sync_clients(&self, world: &World, sink: &mut dyn PresentationSink) {
        for record in self.store.records() {
            if world.online(&record.player_id).is_none() {
                continue;
            }
            sink.send_downed_state_update(
                &record.player_id,
                true,
                record.remaining_seconds(),
                record.mode == PlayMode::Solo,
            );
        }
    }

    fn present_restored(
        &self,
        world: &mut World,
        sink: &mut dyn PresentationSink,
        player_id: &str,
    ) -> Result<(), LifecycleError> {
        let Some(record) = self.store.record(player_id) else {
            return Err(LifecycleError::NotDowned(player_id.to_string()));
        };
        let Some(participant) = world.online_mut(player_id) else {
            return Err(LifecycleError::PlayerUnavailable(player_id.to_string()));
        };
        participant.vitality = DOWNED_MIN_VITALITY;
        participant.posture = Posture::Prone;
        participant.position = record.position;
        self.revival.apply_movement_penalty(participant);
        sink.send_downed_state_update(
            player_id,
            true,
            record.remaining_seconds(),
            record.mode == PlayMode::Solo,
        );
        tracing::info!(player_id, "restored downed state on join");
        Ok(())
    }

    fn clear_downed_state(
        &mut self,
        world: &mut World,
        sink: &mut dyn PresentationSink,
        player_id: &str,
    ) -> bool {
        let is_solo = self
            .store
            .record(player_id)
            .is_some_and(|record| record.mode == PlayMode::Solo);
        let was_downed = self.store.remove_downed(player_id);
        let was_pending = self.pending.cancel(player_id);
        self.gate.clear(player_id);
        if !was_downed && !was_pending {
            return false;
        }
        if let Some(participant) = world.participant_mut(player_id) {
            participant.posture = Posture::Standing;
            self.revival.remove_movement_penalty(participant);
            if participant.connected {
                sink.send_remove_downed_effects(player_id);
                sink.send_downed_state_update(player_id, false, 0, is_solo);
            }
        }
        true
    }
}

fn report(stage: &'static str, result: Result<(), LifecycleError>) {
    if let Err(error) = result {
        tracing::warn!(stage, %error, "life-cycle step skipped player");
    }
}
