use serde::Serialize;

use crate::types::{AttackerId, PlayerId, Vec3};

/// Client-bound synchronization messages. Delivery is best-effort; senders
/// never wait for acknowledgement.
pub trait PresentationSink {
    fn send_cinematic_trigger(&mut self, player_id: &str, attacker_id: &str, down_pos: Vec3);
    fn send_downed_state_update(
        &mut self,
        player_id: &str,
        is_downed: bool,
        remaining_seconds: u32,
        is_solo_mode: bool,
    );
    fn send_remove_downed_effects(&mut self, player_id: &str);
    fn send_revival_progress(
        &mut self,
        recipients: &[PlayerId],
        downed_id: &str,
        active: bool,
        progress: f32,
    );
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CinematicTrigger {
        #[serde(rename = "attackerId")]
        attacker_id: AttackerId,
        #[serde(rename = "downPos")]
        down_pos: Vec3,
    },
    DownedStateUpdate {
        #[serde(rename = "isDowned")]
        is_downed: bool,
        #[serde(rename = "remainingSeconds")]
        remaining_seconds: u32,
        #[serde(rename = "isSoloMode")]
        is_solo_mode: bool,
    },
    RemoveDownedEffects,
    RevivalProgress {
        #[serde(rename = "downedId")]
        downed_id: PlayerId,
        active: bool,
        progress: f32,
    },
}

#[derive(Clone, Debug, Default)]
pub struct Outbox {
    messages: Vec<(PlayerId, ClientMessage)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&mut self) -> Vec<(PlayerId, ClientMessage)> {
        std::mem::take(&mut self.messages)
    }

    pub fn messages(&self) -> &[(PlayerId, ClientMessage)] {
        &self.messages
    }

    pub fn messages_for<'a>(
        &'a self,
        player_id: &'a str,
    ) -> impl Iterator<Item = &'a ClientMessage> + 'a {
        self.messages
            .iter()
            .filter(move |(recipient, _)| recipient == player_id)
            .map(|(_, message)| message)
    }

    fn push(&mut self, player_id: &str, message: ClientMessage) {
        self.messages.push((player_id.to_string(), message));
    }
}

impl PresentationSink for Outbox {
    fn send_cinematic_trigger(&mut self, player_id: &str, attacker_id: &str, down_pos: Vec3) {
        self.push(
            player_id,
            ClientMessage::CinematicTrigger {
                attacker_id: attacker_id.to_string(),
                down_pos,
            },
        );
    }

    fn send_downed_state_update(
        &mut self,
        player_id: &str,
        is_downed: bool,
        remaining_seconds: u32,
        is_solo_mode: bool,
    ) {
        self.push(
            player_id,
            ClientMessage::DownedStateUpdate {
                is_downed,
                remaining_seconds,
                is_solo_mode,
            },
        );
    }

    fn send_remove_downed_effects(&mut self, player_id: &str) {
        self.push(player_id, ClientMessage::RemoveDownedEffects);
    }

    fn send_revival_progress(
        &mut self,
        recipients: &[PlayerId],
        downed_id: &str,
        active: bool,
        progress: f32,
    ) {
        let message = ClientMessage::RevivalProgress {
            downed_id: downed_id.to_string(),
            active,
            progress: progress.clamp(0.0, 1.0),
        };
        for recipient in recipients {
            self.push(recipient, message.clone());
        }
    }
}
