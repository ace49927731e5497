use crate::constants::{
    CRAWL_MODIFIER_ID, CRAWL_SPEED_MODIFIER, REVIVAL_BROADCAST_RANGE, REVIVAL_RANGE,
};
use crate::error::LifecycleError;
use crate::incapacitation_store::IncapacitationStore;
use crate::presentation::PresentationSink;
use crate::types::{PlayMode, PlayerId, Posture, Vec3};
use crate::world::{Participant, World};

#[derive(Clone, Debug)]
pub struct RevivalOptions {
    pub helper_range: f64,
    pub broadcast_range: f64,
    pub crawl_speed_modifier: f32,
}

impl Default for RevivalOptions {
    fn default() -> Self {
        Self {
            helper_range: REVIVAL_RANGE,
            broadcast_range: REVIVAL_BROADCAST_RANGE,
            crawl_speed_modifier: CRAWL_SPEED_MODIFIER,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RitualStart {
    pub downed_id: PlayerId,
    pub helper_id: PlayerId,
}

/// Finds helpers, drives progress broadcasts and finalizes finished rituals.
/// Ritual state itself lives in [`IncapacitationStore`].
#[derive(Clone, Debug, Default)]
pub struct RevivalCoordinator {
    options: RevivalOptions,
}

impl RevivalCoordinator {
    pub fn new(options: RevivalOptions) -> Self {
        Self { options }
    }

    /// Starts a ritual for every eligible downed player that has a helper in
    /// range. The first qualifying candidate wins.
    pub fn scan_for_helpers<F>(
        &self,
        world: &World,
        store: &mut IncapacitationStore,
        mut eligible: F,
    ) -> Vec<RitualStart>
    where
        F: FnMut(&str) -> bool,
    {
        let mut started = Vec::new();
        for downed_id in store.downed_ids() {
            if store.is_being_revived(&downed_id) || !eligible(&downed_id) {
                continue;
            }
            let Some(downed) = world.online(&downed_id) else {
                continue;
            };
            let helper = world.connected().find(|candidate| {
                candidate.id != downed_id
                    && candidate.can_be_helper()
                    && !store.is_downed(&candidate.id)
                    && candidate
                        .position
                        .within(&downed.position, self.options.helper_range)
            });
            let Some(helper) = helper else {
                continue;
            };
            if store.start_revival(&downed_id, &helper.id) {
                tracing::info!(
                    downed_id = %downed_id,
                    helper_id = %helper.id,
                    "revival ritual started"
                );
                started.push(RitualStart {
                    downed_id,
                    helper_id: helper.id.clone(),
                });
            }
        }
        started
    }

    /// Restores the downed player and removes their record. An offline player
    /// only has the record dropped.
    pub fn complete_revival(
        &self,
        world: &mut World,
        store: &mut IncapacitationStore,
        sink: &mut dyn PresentationSink,
        downed_id: &str,
    ) -> Result<(), LifecycleError> {
        let Some(record) = store.record(downed_id) else {
            return Err(LifecycleError::NotDowned(downed_id.to_string()));
        };
        let is_solo = record.mode == PlayMode::Solo;
        let Some(participant) = world.online_mut(downed_id) else {
            store.remove_downed(downed_id);
            return Err(LifecycleError::PlayerUnavailable(downed_id.to_string()));
        };

        participant.vitality = participant.max_vitality;
        participant.posture = Posture::Standing;
        self.remove_movement_penalty(participant);
        let position = participant.position;
        store.remove_downed(downed_id);

        sink.send_remove_downed_effects(downed_id);
        sink.send_downed_state_update(downed_id, false, 0, is_solo);
        self.broadcast_progress(world, sink, downed_id, position, 1.0, false);
        tracing::info!(downed_id, "revival completed");
        Ok(())
    }

    pub fn apply_movement_penalty(&self, participant: &mut Participant) {
        participant.set_movement_modifier(CRAWL_MODIFIER_ID, self.options.crawl_speed_modifier);
        participant.sprinting = false;
    }

    pub fn remove_movement_penalty(&self, participant: &mut Participant) -> bool {
        participant.remove_movement_modifier(CRAWL_MODIFIER_ID)
    }

    /// Sends progress to every connected participant near `origin`, the
    /// downed player included.
    pub fn broadcast_progress(
        &self,
        world: &World,
        sink: &mut dyn PresentationSink,
        downed_id: &str,
        origin: Vec3,
        progress: f32,
        active: bool,
    ) {
        let recipients: Vec<PlayerId> = world
            .connected()
            .filter(|p| p.position.within(&origin, self.options.broadcast_range))
            .map(|p| p.id.clone())
            .collect();
        if recipients.is_empty() {
            return;
        }
        sink.send_revival_progress(&recipients, downed_id, active, progress);
    }

    pub fn broadcast_active(
        &self,
        world: &World,
        store: &IncapacitationStore,
        sink: &mut dyn PresentationSink,
    ) {
        for ritual in store.rituals() {
            let Some(downed) = world.online(&ritual.downed_id) else {
                continue;
            };
            self.broadcast_progress(
                world,
                sink,
                &ritual.downed_id,
                downed.position,
                ritual.progress(),
                true,
            );
        }
    }
}
