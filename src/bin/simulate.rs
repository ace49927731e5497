use clap::{Parser, ValueEnum};
use dread_downed_server::attacker::AttackerRoster;
use dread_downed_server::config::DownedConfig;
use dread_downed_server::constants::TICK_MS;
use dread_downed_server::incapacitation_store::IncapacitationStore;
use dread_downed_server::lifecycle::connection::ConnectionEvent;
use dread_downed_server::lifecycle::LifecycleController;
use dread_downed_server::presentation::{ClientMessage, Outbox};
use dread_downed_server::revival::{RevivalCoordinator, RevivalOptions};
use dread_downed_server::types::{
    DamageCause, EffectKind, GameRole, HitOutcome, PlayMode, SessionTopology, Vec3,
};
use dread_downed_server::world::World;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::filter::EnvFilter;

const ATTACKER_ID: &str = "dread_1";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Run only these scenarios (default: all).
    #[arg(long, value_enum)]
    scenario: Vec<ScenarioKind>,
    #[arg(long)]
    solo_timeout_secs: Option<u32>,
    #[arg(long)]
    group_timeout_secs: Option<u32>,
    #[arg(long)]
    skip_cinematic: bool,
    #[arg(long)]
    ritual_ticks: Option<u32>,
    #[arg(long)]
    helper_range: Option<f64>,
    #[arg(long, default_value_t = 20 * 60 * 60)]
    max_ticks: u64,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ScenarioKind {
    SoloTimeout,
    GroupRevival,
    GroupObserver,
    EscapeReconnect,
    ModeRescale,
}

impl ScenarioKind {
    const ALL: [ScenarioKind; 5] = [
        ScenarioKind::SoloTimeout,
        ScenarioKind::GroupRevival,
        ScenarioKind::GroupObserver,
        ScenarioKind::EscapeReconnect,
        ScenarioKind::ModeRescale,
    ];
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioResultLine {
    scenario: ScenarioKind,
    outcome: String,
    ticks: u64,
    #[serde(rename = "simulatedMs")]
    simulated_ms: u64,
    downs: u32,
    revivals: u32,
    #[serde(rename = "effectsCleared")]
    effects_cleared: u32,
    messages: u32,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "runId")]
    run_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "scenarioCount")]
    scenario_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "outcomeCounts")]
    outcome_counts: BTreeMap<String, usize>,
    scenarios: Vec<ScenarioResultLine>,
}

#[derive(Clone, Debug, Default)]
struct Tuning {
    config: DownedConfig,
    ritual_ticks: Option<u32>,
    helper_range: Option<f64>,
}

impl Tuning {
    fn controller(&self) -> LifecycleController {
        let mut store = IncapacitationStore::new(self.config.clone());
        if let Some(ticks) = self.ritual_ticks {
            store = store.with_ritual_duration(ticks);
        }
        let mut options = RevivalOptions::default();
        if let Some(range) = self.helper_range {
            options.helper_range = range;
        }
        LifecycleController::from_store(store).with_revival(RevivalCoordinator::new(options))
    }
}

struct Sim {
    controller: LifecycleController,
    world: World,
    outbox: Outbox,
    attackers: AttackerRoster,
    downs: u32,
    revivals: u32,
    effects_cleared: u32,
    messages: u32,
    anomalies: Vec<String>,
    anomaly_seen: HashSet<String>,
}

impl Sim {
    fn new(topology: SessionTopology, ids: &[(&str, Vec3)], tuning: &Tuning) -> Self {
        let mut world = World::new(topology);
        for (id, position) in ids {
            world.ensure_participant(id, &id.to_uppercase(), *position);
        }
        Self {
            controller: tuning.controller(),
            world,
            outbox: Outbox::new(),
            attackers: AttackerRoster::new(),
            downs: 0,
            revivals: 0,
            effects_cleared: 0,
            messages: 0,
            anomalies: Vec::new(),
            anomaly_seen: HashSet::new(),
        }
    }

    fn tick(&self) -> u64 {
        self.controller.tick_count()
    }

    fn down(&mut self, player_id: &str) {
        self.attackers.spawn(ATTACKER_ID);
        let outcome = self.controller.on_lethal_hit(
            &mut self.world,
            &mut self.outbox,
            &mut self.attackers,
            player_id,
            DamageCause::Attacker {
                attacker_id: ATTACKER_ID.to_string(),
            },
        );
        if outcome == HitOutcome::Downed {
            self.downs += 1;
        } else {
            self.anomaly(format!("{player_id} was not downed: {outcome:?}"));
        }
        self.collect();
    }

    fn leave(&mut self, player_id: &str) {
        if let Some(participant) = self.world.participant_mut(player_id) {
            participant.connected = false;
        }
        self.controller.enqueue(ConnectionEvent::Left {
            player_id: player_id.to_string(),
        });
    }

    fn join(&mut self, player_id: &str) {
        if let Some(participant) = self.world.participant_mut(player_id) {
            participant.connected = true;
        }
        self.controller.enqueue(ConnectionEvent::Joined {
            player_id: player_id.to_string(),
        });
    }

    fn step(&mut self) {
        self.attackers.tick();
        self.world.tick_status_effects();
        self.controller
            .step(&mut self.world, &mut self.outbox, &self.attackers);
        self.collect();
    }

    /// Steps until `done` holds; false when `max_ticks` ran out first.
    fn run_until<F>(&mut self, max_ticks: u64, mut done: F) -> bool
    where
        F: FnMut(&Sim) -> bool,
    {
        let limit = self.tick() + max_ticks;
        while self.tick() < limit {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    fn collect(&mut self) {
        for (recipient, message) in self.outbox.drain() {
            self.messages += 1;
            match message {
                ClientMessage::RevivalProgress {
                    active: false,
                    downed_id,
                    ..
                } if downed_id == recipient => self.revivals += 1,
                ClientMessage::RemoveDownedEffects => self.effects_cleared += 1,
                _ => {}
            }
        }
    }

    fn anomaly(&mut self, message: String) {
        push_anomaly(
            &mut self.anomalies,
            &mut self.anomaly_seen,
            self.controller.tick_count(),
            message,
        );
    }

    fn check(&mut self, condition: bool, message: &str) {
        if !condition {
            self.anomaly(message.to_string());
        }
    }

    fn finish(self, scenario: ScenarioKind, outcome: &str) -> ScenarioResultLine {
        let ticks = self.tick();
        ScenarioResultLine {
            scenario,
            outcome: outcome.to_string(),
            ticks,
            simulated_ms: ticks * TICK_MS,
            downs: self.downs,
            revivals: self.revivals,
            effects_cleared: self.effects_cleared,
            messages: self.messages,
            anomalies: self.anomalies,
        }
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let tuning = Tuning {
        config: resolve_config(&cli),
        ritual_ticks: cli.ritual_ticks,
        helper_range: cli.helper_range,
    };
    let scenarios = if cli.scenario.is_empty() {
        ScenarioKind::ALL.to_vec()
    } else {
        cli.scenario.clone()
    };
    let run_started_at_ms = now_ms();
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| default_run_id(run_started_at_ms));

    let mut results = Vec::new();
    for scenario in scenarios {
        tracing::info!(run_id = %run_id, ?scenario, "scenario started");
        let result = run_scenario(scenario, &tuning, cli.max_ticks);
        for anomaly in &result.anomalies {
            tracing::warn!(run_id = %run_id, ?scenario, %anomaly, "anomaly detected");
        }
        tracing::info!(
            run_id = %run_id,
            ?scenario,
            outcome = %result.outcome,
            ticks = result.ticks,
            "scenario finished"
        );
        match serde_json::to_string(&result) {
            Ok(line) => println!("{line}"),
            Err(error) => tracing::error!(%error, "failed to encode scenario result"),
        }
        results.push(result);
    }

    let summary = build_run_summary(run_id.clone(), run_started_at_ms, now_ms(), results);
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            tracing::error!(path = %path.display(), %error, "summary write failed");
            std::process::exit(2);
        }
    }
    tracing::info!(
        run_id = %run_id,
        scenarios = summary.scenario_count,
        anomalies = summary.anomaly_count,
        "run finished"
    );

    if summary.anomaly_count > 0 {
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn resolve_config(cli: &Cli) -> DownedConfig {
    let defaults = DownedConfig::default();
    DownedConfig {
        skip_death_cinematic: cli.skip_cinematic,
        solo_downed_timeout_secs: cli
            .solo_timeout_secs
            .unwrap_or(defaults.solo_downed_timeout_secs),
        group_downed_timeout_secs: cli
            .group_timeout_secs
            .unwrap_or(defaults.group_downed_timeout_secs),
        ..defaults
    }
    .validated()
}

fn run_scenario(
    scenario: ScenarioKind,
    tuning: &Tuning,
    max_ticks: u64,
) -> ScenarioResultLine {
    match scenario {
        ScenarioKind::SoloTimeout => solo_timeout(tuning, max_ticks),
        ScenarioKind::GroupRevival => group_revival(tuning, max_ticks),
        ScenarioKind::GroupObserver => group_observer(tuning, max_ticks),
        ScenarioKind::EscapeReconnect => escape_reconnect(tuning, max_ticks),
        ScenarioKind::ModeRescale => mode_rescale(tuning, max_ticks),
    }
}

fn solo_timeout(tuning: &Tuning, max_ticks: u64) -> ScenarioResultLine {
    let mut sim = Sim::new(
        SessionTopology::Local,
        &[("player_1", Vec3::new(0.0, 64.0, 0.0))],
        tuning,
    );
    sim.down("player_1");
    let mode = sim.controller.store().record("player_1").map(|r| r.mode);
    sim.check(mode == Some(PlayMode::Solo), "local single player was not solo");

    let died = sim.run_until(max_ticks, |sim| {
        sim.world
            .participant("player_1")
            .is_some_and(|participant| !participant.alive)
    });
    sim.check(died, "solo player never died");
    sim.check(sim.effects_cleared > 0, "downed effects were never cleared");

    if let Some(participant) = sim.world.participant_mut("player_1") {
        participant.vitality = participant.max_vitality;
    }
    sim.controller.enqueue(ConnectionEvent::Respawned {
        player_id: "player_1".to_string(),
    });
    sim.step();
    let debuffed = sim.world.participant("player_1").is_some_and(|participant| {
        participant.effect(EffectKind::Weakness).is_some()
            && participant.effect(EffectKind::Slowness).is_some()
    });
    sim.check(debuffed, "timeout respawn debuff missing");
    sim.finish(ScenarioKind::SoloTimeout, if died { "death" } else { "pending" })
}

fn group_revival(tuning: &Tuning, max_ticks: u64) -> ScenarioResultLine {
    let mut sim = Sim::new(
        SessionTopology::Dedicated,
        &[
            ("player_1", Vec3::new(0.0, 64.0, 0.0)),
            ("player_2", Vec3::new(2.5, 64.0, 1.0)),
            ("player_3", Vec3::new(9.0, 64.0, 0.0)),
        ],
        tuning,
    );
    sim.down("player_1");
    if let Some(helper) = sim.world.participant_mut("player_2") {
        helper.helping = true;
    }
    let resolved = sim.run_until(max_ticks, |sim| !sim.controller.is_downed("player_1"));
    let revived = resolved && sim.revivals == 1;
    let observer = sim
        .world
        .participant("player_1")
        .is_some_and(|participant| participant.role == GameRole::Spectator);
    let restored = sim.world.participant("player_1").is_some_and(|participant| {
        participant.alive && participant.vitality >= participant.max_vitality
    });
    sim.check(revived && restored, "group player was not revived");
    let outcome = if revived {
        "revived"
    } else if observer {
        "observer"
    } else {
        "downed"
    };
    sim.finish(ScenarioKind::GroupRevival, outcome)
}

fn group_observer(tuning: &Tuning, max_ticks: u64) -> ScenarioResultLine {
    let mut sim = Sim::new(
        SessionTopology::Dedicated,
        &[
            ("player_1", Vec3::new(0.0, 64.0, 0.0)),
            ("player_2", Vec3::new(100.0, 64.0, 0.0)),
        ],
        tuning,
    );
    sim.down("player_1");
    let observed = sim.run_until(max_ticks, |sim| {
        sim.world
            .participant("player_1")
            .is_some_and(|participant| participant.role == GameRole::Spectator)
    });
    sim.check(observed, "group player never became an observer");
    sim.check(
        !sim.controller.is_downed("player_1"),
        "observer still has a downed record",
    );
    sim.finish(
        ScenarioKind::GroupObserver,
        if observed { "observer" } else { "downed" },
    )
}

fn escape_reconnect(tuning: &Tuning, max_ticks: u64) -> ScenarioResultLine {
    let mut sim = Sim::new(
        SessionTopology::Dedicated,
        &[
            ("player_1", Vec3::new(0.0, 64.0, 0.0)),
            ("player_2", Vec3::new(40.0, 64.0, 0.0)),
        ],
        tuning,
    );
    sim.down("player_1");
    sim.run_until(max_ticks.min(40), |_| false);
    sim.leave("player_1");
    sim.step();
    sim.check(
        sim.controller.store().was_escaped("player_1"),
        "escape flag not set on disconnect",
    );
    sim.check(!sim.controller.is_downed("player_1"), "record survived disconnect");

    sim.join("player_1");
    sim.step();
    let penalized = sim.world.participant("player_1").is_some_and(|participant| {
        participant.damage_immunity_ticks > 0 && participant.vitality < participant.max_vitality
    });
    sim.check(penalized, "reconnect penalty missing");
    let broadcasts = sim.world.drain_broadcasts();
    sim.check(
        broadcasts.iter().any(|line| line.contains("narrowly escaped")),
        "escape broadcast missing",
    );
    sim.finish(
        ScenarioKind::EscapeReconnect,
        if penalized { "escaped" } else { "unknown" },
    )
}

fn mode_rescale(tuning: &Tuning, max_ticks: u64) -> ScenarioResultLine {
    let mut sim = Sim::new(
        SessionTopology::Local,
        &[
            ("player_1", Vec3::new(0.0, 64.0, 0.0)),
            ("player_2", Vec3::new(50.0, 64.0, 0.0)),
            ("player_3", Vec3::new(100.0, 64.0, 0.0)),
        ],
        tuning,
    );
    sim.down("player_2");
    sim.run_until(max_ticks.min(120), |_| false);
    let before = sim.controller.store().record("player_2").cloned();

    sim.leave("player_3");
    sim.leave("player_1");
    sim.step();
    let solo = sim.controller.store().record("player_2").cloned();
    match (&before, &solo) {
        (Some(before), Some(solo)) => {
            sim.check(solo.mode == PlayMode::Solo, "did not rescale to solo");
            let expected = u64::from(before.remaining_ticks)
                * u64::from(tuning.config.timeout_ticks(PlayMode::Solo))
                / u64::from(tuning.config.timeout_ticks(before.mode).max(1));
            // The step that rescales also runs one countdown tick.
            let actual = u64::from(solo.remaining_ticks);
            sim.check(
                actual + 1 >= expected && actual <= expected.max(1),
                "solo rescale was not proportional",
            );
        }
        _ => sim.anomaly("downed record missing around rescale".to_string()),
    }

    sim.join("player_1");
    sim.step();
    let group = sim.controller.store().record("player_2").map(|r| r.mode);
    sim.check(group == Some(PlayMode::Group), "did not rescale back to group");
    sim.finish(ScenarioKind::ModeRescale, "rescaled")
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_seen: &mut HashSet<String>,
    tick: u64,
    message: String,
) {
    tracing::debug!(tick, %message, "anomaly");
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_run_id(timestamp_ms: u64) -> String {
    format!("sim-{timestamp_ms}")
}

fn build_run_summary(
    run_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    scenarios: Vec<ScenarioResultLine>,
) -> RunSummary {
    let mut outcome_counts: BTreeMap<String, usize> = BTreeMap::new();
    for scenario in &scenarios {
        *outcome_counts.entry(scenario.outcome.clone()).or_insert(0) += 1;
    }
    RunSummary {
        run_id,
        started_at_ms,
        finished_at_ms,
        scenario_count: scenarios.len(),
        anomaly_count: scenarios.iter().map(|s| s.anomalies.len()).sum(),
        outcome_counts,
        scenarios,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}
