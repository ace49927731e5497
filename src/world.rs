use std::collections::BTreeMap;

use crate::constants::DEFAULT_MAX_VITALITY;
use crate::play_mode::SessionContext;
use crate::types::{EffectKind, GameRole, PlayerId, Posture, SessionTopology, StatusEffect, Vec3};

#[derive(Clone, Debug)]
pub struct Participant {
    pub id: PlayerId,
    pub name: String,
    pub position: Vec3,
    pub connected: bool,
    pub alive: bool,
    pub vitality: f32,
    pub max_vitality: f32,
    pub role: GameRole,
    pub posture: Posture,
    pub helping: bool,
    pub sprinting: bool,
    pub damage_immunity_ticks: u32,
    movement_modifiers: BTreeMap<String, f32>,
    effects: Vec<StatusEffect>,
}

impl Participant {
    pub fn new(id: &str, name: &str, position: Vec3) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            position,
            connected: true,
            alive: true,
            vitality: DEFAULT_MAX_VITALITY,
            max_vitality: DEFAULT_MAX_VITALITY,
            role: GameRole::Survival,
            posture: Posture::Standing,
            helping: false,
            sprinting: false,
            damage_immunity_ticks: 0,
            movement_modifiers: BTreeMap::new(),
            effects: Vec::new(),
        }
    }

    pub fn set_movement_modifier(&mut self, key: &str, value: f32) {
        self.movement_modifiers.insert(key.to_string(), value);
    }

    pub fn remove_movement_modifier(&mut self, key: &str) -> bool {
        self.movement_modifiers.remove(key).is_some()
    }

    pub fn has_movement_modifier(&self, key: &str) -> bool {
        self.movement_modifiers.contains_key(key)
    }

    pub fn movement_multiplier(&self) -> f32 {
        self.movement_modifiers
            .values()
            .fold(1.0, |acc, modifier| acc * (1.0 + modifier))
            .max(0.0)
    }

    pub fn add_effect(&mut self, effect: StatusEffect) {
        self.effects.retain(|existing| existing.kind != effect.kind);
        self.effects.push(effect);
    }

    pub fn effect(&self, kind: EffectKind) -> Option<&StatusEffect> {
        self.effects.iter().find(|effect| effect.kind == kind)
    }

    pub fn effects(&self) -> &[StatusEffect] {
        &self.effects
    }

    pub fn can_be_helper(&self) -> bool {
        self.connected && self.alive && self.helping && !self.role.overrides_downed()
    }

    fn tick_effects(&mut self) {
        self.damage_immunity_ticks = self.damage_immunity_ticks.saturating_sub(1);
        for effect in &mut self.effects {
            effect.remaining_ticks = effect.remaining_ticks.saturating_sub(1);
        }
        self.effects.retain(|effect| effect.remaining_ticks > 0);
    }
}

#[derive(Clone, Debug)]
pub struct World {
    pub topology: SessionTopology,
    participants: BTreeMap<PlayerId, Participant>,
    broadcasts: Vec<String>,
}

impl World {
    pub fn new(topology: SessionTopology) -> Self {
        Self {
            topology,
            participants: BTreeMap::new(),
            broadcasts: Vec::new(),
        }
    }

    pub fn ensure_participant(&mut self, id: &str, name: &str, position: Vec3) -> &mut Participant {
        self.participants
            .entry(id.to_string())
            .or_insert_with(|| Participant::new(id, name, position))
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn participant_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.participants.get_mut(id)
    }

    pub fn online(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id).filter(|p| p.connected)
    }

    pub fn online_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.participants.get_mut(id).filter(|p| p.connected)
    }

    pub fn connected(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values().filter(|p| p.connected)
    }

    pub fn connected_count(&self) -> usize {
        self.connected().count()
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            topology: self.topology,
            connected_participants: self.connected_count(),
        }
    }

    pub fn broadcast(&mut self, message: String) {
        self.broadcasts.push(message);
    }

    pub fn drain_broadcasts(&mut self) -> Vec<String> {
        std::mem::take(&mut self.broadcasts)
    }

    pub fn tick_status_effects(&mut self) {
        for participant in self.participants.values_mut() {
            participant.tick_effects();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_modifier_replaces_and_removes() {
        let mut participant = Participant::new("p1", "P1", Vec3::default());
        participant.set_movement_modifier("crawl", -0.9);
        participant.set_movement_modifier("crawl", -0.9);
        assert!((participant.movement_multiplier() - 0.1).abs() < 1e-6);
        assert!(participant.remove_movement_modifier("crawl"));
        assert!(!participant.remove_movement_modifier("crawl"));
        assert_eq!(participant.movement_multiplier(), 1.0);
    }

    #[test]
    fn effects_expire_and_same_kind_is_replaced() {
        let mut world = World::new(SessionTopology::Dedicated);
        let participant = world.ensure_participant("p1", "P1", Vec3::default());
        participant.damage_immunity_ticks = 1;
        participant.add_effect(StatusEffect {
            kind: EffectKind::Slowness,
            amplifier: 0,
            remaining_ticks: 5,
        });
        participant.add_effect(StatusEffect {
            kind: EffectKind::Slowness,
            amplifier: 0,
            remaining_ticks: 2,
        });
        assert_eq!(participant.effects().len(), 1);

        world.tick_status_effects();
        world.tick_status_effects();
        let participant = world.participant("p1").expect("participant exists");
        assert_eq!(participant.damage_immunity_ticks, 0);
        assert!(participant.effect(EffectKind::Slowness).is_none());
    }

    #[test]
    fn session_context_counts_connected_only() {
        let mut world = World::new(SessionTopology::Local);
        world.ensure_participant("p1", "P1", Vec3::default());
        world.ensure_participant("p2", "P2", Vec3::default()).connected = false;
        let context = world.session_context();
        assert_eq!(context.connected_participants, 1);
        assert!(world.online("p2").is_none());
        assert!(world.participant("p2").is_some());
    }
}
