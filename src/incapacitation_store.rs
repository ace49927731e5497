use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DownedConfig;
use crate::constants::{ticks_to_display_seconds, REVIVAL_DURATION_TICKS};
use crate::error::{LifecycleError, StoreError};
use crate::play_mode::{self, SessionContext};
use crate::types::{PlayMode, PlayerId, Vec3};

const STORE_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq)]
pub struct IncapacitationRecord {
    pub player_id: PlayerId,
    pub position: Vec3,
    pub remaining_ticks: u32,
    pub mode: PlayMode,
}

impl IncapacitationRecord {
    pub fn remaining_seconds(&self) -> u32 {
        ticks_to_display_seconds(self.remaining_ticks)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RevivalRitual {
    pub downed_id: PlayerId,
    pub helper_id: PlayerId,
    pub remaining_ticks: u32,
    duration_ticks: u32,
}

impl RevivalRitual {
    pub fn new(downed_id: PlayerId, helper_id: PlayerId, duration_ticks: u32) -> Self {
        let duration_ticks = duration_ticks.max(1);
        Self {
            downed_id,
            helper_id,
            remaining_ticks: duration_ticks,
            duration_ticks,
        }
    }

    pub fn progress(&self) -> f32 {
        1.0 - self.remaining_ticks as f32 / self.duration_ticks as f32
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_ticks == 0
    }

    fn tick(&mut self) {
        self.remaining_ticks = self.remaining_ticks.saturating_sub(1);
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(rename = "playerId", alias = "player_id")]
    player_id: String,
    position: Vec3,
    #[serde(rename = "remainingTicks", alias = "remaining_ticks")]
    remaining_ticks: i64,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
struct StoreFile {
    version: u8,
    #[serde(rename = "savedAtIso")]
    saved_at_iso: String,
    downed: Vec<StoredRecord>,
}

#[derive(Clone, Debug, Deserialize)]
struct StoreFileRaw {
    version: u8,
    #[serde(default)]
    downed: Vec<serde_json::Value>,
}

pub struct IncapacitationStore {
    config: DownedConfig,
    records: BTreeMap<PlayerId, IncapacitationRecord>,
    rituals: BTreeMap<PlayerId, RevivalRitual>,
    ritual_duration_ticks: u32,
    escaped_while_downed: HashSet<PlayerId>,
    died_from_timeout: HashSet<PlayerId>,
    dirty: bool,
}

impl IncapacitationStore {
    pub fn new(config: DownedConfig) -> Self {
        Self {
            config,
            records: BTreeMap::new(),
            rituals: BTreeMap::new(),
            ritual_duration_ticks: REVIVAL_DURATION_TICKS,
            escaped_while_downed: HashSet::new(),
            died_from_timeout: HashSet::new(),
            dirty: false,
        }
    }

    pub fn with_ritual_duration(mut self, ticks: u32) -> Self {
        self.ritual_duration_ticks = ticks.max(1);
        self
    }

    pub fn config(&self) -> &DownedConfig {
        &self.config
    }

    pub fn set_downed(
        &mut self,
        player_id: &str,
        position: Vec3,
        context: SessionContext,
    ) -> Result<&IncapacitationRecord, LifecycleError> {
        if self.records.contains_key(player_id) {
            return Err(LifecycleError::AlreadyDowned(player_id.to_string()));
        }
        let mode = play_mode::detect(context);
        let remaining_ticks = self.config.timeout_ticks(mode).max(1);
        self.dirty = true;
        Ok(self
            .records
            .entry(player_id.to_string())
            .or_insert(IncapacitationRecord {
                player_id: player_id.to_string(),
                position,
                remaining_ticks,
                mode,
            }))
    }

    pub fn is_downed(&self, player_id: &str) -> bool {
        self.records.contains_key(player_id)
    }

    pub fn record(&self, player_id: &str) -> Option<&IncapacitationRecord> {
        self.records.get(player_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &IncapacitationRecord> {
        self.records.values()
    }

    pub fn downed_ids(&self) -> Vec<PlayerId> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn decrement_timer(&mut self, player_id: &str) -> i64 {
        let Some(record) = self.records.get_mut(player_id) else {
            return -1;
        };
        if record.remaining_ticks > 0 {
            record.remaining_ticks -= 1;
            self.dirty = true;
        }
        record.remaining_seconds() as i64
    }

    pub fn remove_downed(&mut self, player_id: &str) -> bool {
        let removed = self.records.remove(player_id).is_some();
        self.rituals.remove(player_id);
        if removed {
            self.dirty = true;
        }
        removed
    }

    pub fn start_revival(&mut self, downed_id: &str, helper_id: &str) -> bool {
        if !self.records.contains_key(downed_id) || self.rituals.contains_key(downed_id) {
            return false;
        }
        self.rituals.insert(
            downed_id.to_string(),
            RevivalRitual::new(
                downed_id.to_string(),
                helper_id.to_string(),
                self.ritual_duration_ticks,
            ),
        );
        true
    }

    pub fn is_being_revived(&self, downed_id: &str) -> bool {
        self.rituals.contains_key(downed_id)
    }

    pub fn ritual(&self, downed_id: &str) -> Option<&RevivalRitual> {
        self.rituals.get(downed_id)
    }

    pub fn rituals(&self) -> impl Iterator<Item = &RevivalRitual> {
        self.rituals.values()
    }

    pub fn tick_revivals(&mut self) -> Vec<PlayerId> {
        let mut completed = Vec::new();
        for (downed_id, ritual) in self.rituals.iter_mut() {
            ritual.tick();
            if ritual.is_complete() {
                completed.push(downed_id.clone());
            }
        }
        for downed_id in &completed {
            self.rituals.remove(downed_id);
        }
        completed
    }

    pub fn transition_mode(&mut self, player_id: &str, new_mode: PlayMode) -> bool {
        let solo_ceiling = self.config.timeout_ticks(PlayMode::Solo);
        let group_ceiling = self.config.timeout_ticks(PlayMode::Group);
        let Some(record) = self.records.get_mut(player_id) else {
            return false;
        };
        if record.mode == new_mode {
            return false;
        }
        let (from_ceiling, to_ceiling) = match new_mode {
            PlayMode::Group => (solo_ceiling, group_ceiling),
            PlayMode::Solo => (group_ceiling, solo_ceiling),
        };
        let rescaled = rescale_ticks(record.remaining_ticks, from_ceiling, to_ceiling);
        tracing::info!(
            player_id,
            from = record.mode.as_str(),
            to = new_mode.as_str(),
            before = record.remaining_ticks,
            after = rescaled,
            "rescaled downed timer for mode change"
        );
        record.remaining_ticks = rescaled;
        record.mode = new_mode;
        self.dirty = true;
        true
    }

    pub fn mark_escaped(&mut self, player_id: &str) {
        self.escaped_while_downed.insert(player_id.to_string());
    }

    pub fn was_escaped(&self, player_id: &str) -> bool {
        self.escaped_while_downed.contains(player_id)
    }

    pub fn clear_escaped(&mut self, player_id: &str) -> bool {
        self.escaped_while_downed.remove(player_id)
    }

    pub fn mark_died_from_timeout(&mut self, player_id: &str) {
        self.died_from_timeout.insert(player_id.to_string());
    }

    pub fn died_from_timeout(&self, player_id: &str) -> bool {
        self.died_from_timeout.contains(player_id)
    }

    pub fn clear_died_from_timeout(&mut self, player_id: &str) -> bool {
        self.died_from_timeout.remove(player_id)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn load(path: &Path, config: DownedConfig) -> Self {
        let mut store = Self::new(config);
        match read_records(path) {
            Ok(records) => {
                for record in records {
                    store.records.insert(record.player_id.clone(), record);
                }
                if !store.records.is_empty() {
                    tracing::info!(
                        path = %path.display(),
                        count = store.records.len(),
                        "restored downed players"
                    );
                }
            }
            Err(error) => {
                tracing::error!(%error, "failed to restore downed players, starting empty");
            }
        }
        store
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload = StoreFile {
            version: STORE_VERSION,
            saved_at_iso: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            downed: self
                .records
                .values()
                .map(|record| StoredRecord {
                    player_id: record.player_id.clone(),
                    position: record.position,
                    remaining_ticks: record.remaining_ticks as i64,
                    mode: Some(record.mode.as_str().to_string()),
                })
                .collect(),
        };
        let text = serde_json::to_string_pretty(&payload).map_err(StoreError::Serialize)?;
        fs::write(path, text).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn flush(&mut self, path: &Path) -> Result<bool, StoreError> {
        if !self.dirty {
            return Ok(false);
        }
        self.save(path)?;
        self.dirty = false;
        Ok(true)
    }
}

pub fn default_store_path() -> PathBuf {
    std::env::var("DOWNED_STORE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".data/downed.json"))
}

fn rescale_ticks(remaining: u32, from_ceiling: u32, to_ceiling: u32) -> u32 {
    let from_ceiling = from_ceiling.max(1) as u64;
    let scaled = remaining as u64 * to_ceiling as u64 / from_ceiling;
    scaled.clamp(1, u32::MAX as u64) as u32
}

fn read_records(path: &Path) -> Result<Vec<IncapacitationRecord>, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let parsed: StoreFileRaw =
        serde_json::from_str(&text).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    if parsed.version != STORE_VERSION {
        return Err(StoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            version: parsed.version,
        });
    }

    let mut records = Vec::new();
    for raw_value in parsed.downed {
        let stored: StoredRecord = match serde_json::from_value(raw_value) {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "skipping unreadable downed entry");
                continue;
            }
        };
        if let Some(record) = sanitize_stored_record(stored) {
            records.push(record);
        }
    }
    Ok(records)
}

fn sanitize_stored_record(value: StoredRecord) -> Option<IncapacitationRecord> {
    let player_id = value.player_id.trim().to_string();
    if player_id.is_empty() || value.remaining_ticks < 0 {
        return None;
    }
    let position = value.position;
    if !position.x.is_finite() || !position.y.is_finite() || !position.z.is_finite() {
        return None;
    }
    // Expired-but-unapplied records get one tick so the expiry path still runs.
    let remaining_ticks = value.remaining_ticks.clamp(1, u32::MAX as i64) as u32;
    Some(IncapacitationRecord {
        player_id,
        position,
        remaining_ticks,
        mode: PlayMode::parse_lenient(value.mode.as_deref()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionTopology;

    fn local(connected_participants: usize) -> SessionContext {
        SessionContext {
            topology: SessionTopology::Local,
            connected_participants,
        }
    }

    fn dedicated() -> SessionContext {
        SessionContext {
            topology: SessionTopology::Dedicated,
            connected_participants: 4,
        }
    }

    fn temp_file(name: &str) -> PathBuf {
        let unique = format!(
            "{}-{}-{}",
            name,
            std::process::id(),
            rand::random::<u32>()
        );
        std::env::temp_dir().join(unique).join("downed.json")
    }

    #[test]
    fn set_then_remove_clears_downed() {
        let mut store = IncapacitationStore::new(DownedConfig::default());
        store
            .set_downed("p1", Vec3::default(), dedicated())
            .expect("first down succeeds");
        assert!(store.is_downed("p1"));
        assert!(store.remove_downed("p1"));
        assert!(!store.is_downed("p1"));
        assert!(!store.remove_downed("p1"));
    }

    #[test]
    fn second_down_is_rejected_and_keeps_countdown() {
        let mut store = IncapacitationStore::new(DownedConfig::default());
        store
            .set_downed("p1", Vec3::default(), dedicated())
            .expect("first down succeeds");
        for _ in 0..40 {
            store.decrement_timer("p1");
        }
        let before = store.record("p1").expect("record exists").remaining_ticks;

        let result = store.set_downed("p1", Vec3::new(9.0, 9.0, 9.0), local(1));
        assert_eq!(result, Err(LifecycleError::AlreadyDowned("p1".to_string())));
        let record = store.record("p1").expect("record exists");
        assert_eq!(record.remaining_ticks, before);
        assert_eq!(record.mode, PlayMode::Group);
        assert_eq!(record.position, Vec3::default());
    }

    #[test]
    fn mode_picks_timeout_ceiling() {
        let mut store = IncapacitationStore::new(DownedConfig::default());
        let solo = store
            .set_downed("solo", Vec3::default(), local(1))
            .expect("down succeeds")
            .clone();
        let group = store
            .set_downed("group", Vec3::default(), local(2))
            .expect("down succeeds")
            .clone();
        assert_eq!(solo.mode, PlayMode::Solo);
        assert_eq!(solo.remaining_ticks, 600);
        assert_eq!(group.mode, PlayMode::Group);
        assert_eq!(group.remaining_ticks, 6_000);
    }

    #[test]
    fn decrement_reports_ceiling_seconds_and_floors_at_zero() {
        let mut store = IncapacitationStore::new(DownedConfig {
            solo_downed_timeout_secs: 1,
            ..DownedConfig::default()
        });
        assert_eq!(store.decrement_timer("ghost"), -1);

        store
            .set_downed("p1", Vec3::default(), local(1))
            .expect("down succeeds");
        assert_eq!(store.decrement_timer("p1"), 1);
        for _ in 0..18 {
            store.decrement_timer("p1");
        }
        assert_eq!(store.record("p1").map(|r| r.remaining_ticks), Some(1));
        assert_eq!(store.decrement_timer("p1"), 0);
        assert_eq!(store.decrement_timer("p1"), 0);
        assert_eq!(store.record("p1").map(|r| r.remaining_ticks), Some(0));
    }

    #[test]
    fn ritual_progress_is_monotonic_and_completes_after_duration() {
        let mut store = IncapacitationStore::new(DownedConfig::default());
        store
            .set_downed("down", Vec3::default(), dedicated())
            .expect("down succeeds");
        assert!(!store.start_revival("nobody", "helper"));
        assert!(store.start_revival("down", "helper"));
        assert!(!store.start_revival("down", "other"));
        assert_eq!(store.ritual("down").map(|r| r.helper_id.as_str()), Some("helper"));

        let mut last = store.ritual("down").expect("ritual exists").progress();
        assert_eq!(last, 0.0);
        for tick in 1..REVIVAL_DURATION_TICKS {
            assert!(store.tick_revivals().is_empty(), "completed early at {tick}");
            let progress = store.ritual("down").expect("ritual exists").progress();
            assert!(progress > last);
            last = progress;
        }
        assert_eq!(store.tick_revivals(), vec!["down".to_string()]);
        assert!(!store.is_being_revived("down"));
        assert!(store.is_downed("down"));
    }

    #[test]
    fn removing_record_cancels_ritual() {
        let mut store = IncapacitationStore::new(DownedConfig::default());
        store
            .set_downed("down", Vec3::default(), dedicated())
            .expect("down succeeds");
        store.start_revival("down", "helper");
        for _ in 0..30 {
            store.tick_revivals();
        }
        store.remove_downed("down");
        for _ in 0..60 {
            assert!(store.tick_revivals().is_empty());
        }
    }

    #[test]
    fn transition_is_proportional() {
        let mut store = IncapacitationStore::new(DownedConfig::default());
        store
            .set_downed("p1", Vec3::default(), dedicated())
            .expect("down succeeds");
        for _ in 0..3_000 {
            store.decrement_timer("p1");
        }
        assert!(store.transition_mode("p1", PlayMode::Solo));
        let record = store.record("p1").expect("record exists");
        assert_eq!(record.mode, PlayMode::Solo);
        assert_eq!(record.remaining_ticks, 300);
        assert_eq!(record.remaining_seconds(), 15);

        assert!(!store.transition_mode("p1", PlayMode::Solo));
        assert!(store.transition_mode("p1", PlayMode::Group));
        assert_eq!(store.record("p1").map(|r| r.remaining_ticks), Some(3_000));
    }

    #[test]
    fn transition_never_drops_to_zero() {
        let mut store = IncapacitationStore::new(DownedConfig::default());
        store
            .set_downed("p1", Vec3::default(), dedicated())
            .expect("down succeeds");
        for _ in 0..5_995 {
            store.decrement_timer("p1");
        }
        assert!(store.transition_mode("p1", PlayMode::Solo));
        assert_eq!(store.record("p1").map(|r| r.remaining_ticks), Some(1));
    }

    #[test]
    fn transient_flags_are_idempotent() {
        let mut store = IncapacitationStore::new(DownedConfig::default());
        store.mark_escaped("p1");
        store.mark_escaped("p1");
        assert!(store.was_escaped("p1"));
        assert!(store.clear_escaped("p1"));
        assert!(!store.clear_escaped("p1"));

        store.mark_died_from_timeout("p2");
        assert!(store.died_from_timeout("p2"));
        assert!(store.clear_died_from_timeout("p2"));
        assert!(!store.died_from_timeout("p2"));
        assert!(!store.is_dirty());
    }

    #[test]
    fn snapshot_restores_records_but_not_rituals_or_flags() {
        let path = temp_file("downed-store-roundtrip");
        let mut store = IncapacitationStore::new(DownedConfig::default());
        store
            .set_downed("p1", Vec3::new(1.5, 64.0, -3.0), dedicated())
            .expect("down succeeds");
        store
            .set_downed("p2", Vec3::new(0.0, 70.0, 0.0), local(1))
            .expect("down succeeds");
        store.decrement_timer("p1");
        store.start_revival("p1", "helper");
        store.mark_escaped("p3");
        assert!(store.flush(&path).expect("flush succeeds"));
        assert!(!store.flush(&path).expect("flush succeeds"));

        let restored = IncapacitationStore::load(&path, DownedConfig::default());
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.record("p1"), store.record("p1"));
        assert_eq!(restored.record("p2"), store.record("p2"));
        assert!(!restored.is_being_revived("p1"));
        assert!(!restored.was_escaped("p3"));
        assert!(!restored.is_dirty());

        let _ = fs::remove_dir_all(path.parent().expect("parent exists"));
    }

    #[test]
    fn load_defaults_unknown_mode_to_group_and_skips_bad_entries() {
        let path = temp_file("downed-store-lenient");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        let raw = r#"{
  "version": 1,
  "downed": [
    { "playerId": "legacy", "position": { "x": 0.0, "y": 64.0, "z": 0.0 }, "remainingTicks": 120 },
    { "playerId": "odd", "position": { "x": 0.0, "y": 64.0, "z": 0.0 }, "remainingTicks": 40, "mode": "MERCY" },
    { "playerId": "solo", "position": { "x": 0.0, "y": 64.0, "z": 0.0 }, "remainingTicks": 0, "mode": "solo" },
    { "playerId": "negative", "position": { "x": 0.0, "y": 64.0, "z": 0.0 }, "remainingTicks": -5, "mode": "solo" },
    { "playerId": "broken" }
  ]
}"#;
        fs::write(&path, raw).expect("write file");

        let store = IncapacitationStore::load(&path, DownedConfig::default());
        assert_eq!(store.len(), 3);
        assert_eq!(store.record("legacy").map(|r| r.mode), Some(PlayMode::Group));
        assert_eq!(store.record("odd").map(|r| r.mode), Some(PlayMode::Group));
        assert_eq!(store.record("solo").map(|r| r.mode), Some(PlayMode::Solo));
        assert_eq!(store.record("solo").map(|r| r.remaining_ticks), Some(1));
        assert!(!store.is_downed("negative"));

        let _ = fs::remove_dir_all(&parent);
    }

    #[test]
    fn unsupported_version_starts_empty() {
        let path = temp_file("downed-store-version");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        fs::write(&path, r#"{ "version": 9, "downed": [] }"#).expect("write file");

        let store = IncapacitationStore::load(&path, DownedConfig::default());
        assert!(store.is_empty());

        let _ = fs::remove_dir_all(&parent);
    }
}
