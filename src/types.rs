use serde::{Deserialize, Serialize};

pub type PlayerId = String;
pub type AttackerId = String;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_squared(&self, other: &Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    pub fn within(&self, other: &Vec3, radius: f64) -> bool {
        self.distance_squared(other) <= radius * radius
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayMode {
    Solo,
    Group,
}

impl PlayMode {
    /// Unknown or missing tags fall back to `Group`, the stricter ceiling.
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value.map(|raw| raw.trim().to_ascii_lowercase()) {
            Some(tag) if tag == "solo" => Self::Solo,
            _ => Self::Group,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Group => "group",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTopology {
    Local,
    Dedicated,
}

impl SessionTopology {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "dedicated" => Some(Self::Dedicated),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameRole {
    Survival,
    Adventure,
    Creative,
    Spectator,
}

impl GameRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "survival" => Some(Self::Survival),
            "adventure" => Some(Self::Adventure),
            "creative" => Some(Self::Creative),
            "spectator" => Some(Self::Spectator),
            _ => None,
        }
    }

    /// Omniscient or non-corporeal roles cannot be downed.
    pub fn overrides_downed(self) -> bool {
        matches!(self, Self::Creative | Self::Spectator)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    Standing,
    Prone,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DamageCause {
    Attacker { attacker_id: AttackerId },
    OutOfWorld,
    Command,
    Other,
}

impl DamageCause {
    pub fn bypasses_downed(&self) -> bool {
        matches!(self, Self::OutOfWorld | Self::Command)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Weakness,
    Slowness,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StatusEffect {
    pub kind: EffectKind,
    pub amplifier: u8,
    #[serde(rename = "remainingTicks")]
    pub remaining_ticks: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerAction {
    Melee,
    RangedWeapon,
    StartSprint,
    StopSprint,
    Jump,
    Interact,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HitOutcome {
    /// Host must not apply the death; the player is now downed.
    Downed,
    /// Host must not apply the death; the hit was absorbed.
    Absorbed,
    /// Host applies its ordinary death path.
    AllowDeath,
}

#[derive(Clone, Debug, Serialize)]
pub struct DownedView {
    #[serde(rename = "playerId")]
    pub player_id: PlayerId,
    pub position: Vec3,
    #[serde(rename = "remainingSeconds")]
    pub remaining_seconds: u32,
    pub mode: PlayMode,
    #[serde(rename = "revivalProgress")]
    pub revival_progress: Option<f32>,
    #[serde(rename = "cinematicPlaying")]
    pub cinematic_playing: bool,
    #[serde(rename = "pendingConsequence")]
    pub pending_consequence: bool,
}
