use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use dread_downed_server::attacker::AttackerRoster;
use dread_downed_server::config::{config_path_from_env, DownedConfig};
use dread_downed_server::constants::{SYNC_INTERVAL_TICKS, TICK_MS, TICK_RATE};
use dread_downed_server::incapacitation_store::{default_store_path, IncapacitationStore};
use dread_downed_server::lifecycle::connection::ConnectionEvent;
use dread_downed_server::lifecycle::LifecycleController;
use dread_downed_server::presentation::{ClientMessage, Outbox};
use dread_downed_server::server_protocol::{parse_client_message, ParsedClientMessage};
use dread_downed_server::server_utils::{
    admin_token_matches, parse_port, parse_topology, player_order_key, sanitize_name,
    sanitize_position,
};
use dread_downed_server::types::{DamageCause, HitOutcome, PlayerAction, Vec3};
use dread_downed_server::world::World;
use futures_util::{SinkExt, StreamExt};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::filter::EnvFilter;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

const SAVE_INTERVAL_TICKS: u64 = TICK_RATE as u64 * 5;

type SharedState = Arc<Mutex<ServerState>>;

#[derive(Clone)]
struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
    player_id: Option<String>,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

struct ServerState {
    clients: HashMap<String, ClientContext>,
    active_client_by_player_id: HashMap<String, String>,
    player_by_token: HashMap<String, String>,
    world: World,
    controller: LifecycleController,
    attackers: AttackerRoster,
    outbox: Outbox,
    store_path: PathBuf,
    admin_token: Option<String>,
}

impl ServerState {
    fn new(world: World, controller: LifecycleController, store_path: PathBuf) -> Self {
        Self {
            clients: HashMap::new(),
            active_client_by_player_id: HashMap::new(),
            player_by_token: HashMap::new(),
            world,
            controller,
            attackers: AttackerRoster::new(),
            outbox: Outbox::new(),
            store_path,
            admin_token: std::env::var("DREAD_ADMIN_TOKEN").ok(),
        }
    }

    fn player_for_client(&self, client_id: &str) -> Option<String> {
        self.clients
            .get(client_id)
            .and_then(|ctx| ctx.player_id.clone())
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    let port = parse_port(std::env::var("PORT").ok().as_deref());
    let topology = parse_topology(std::env::var("DREAD_TOPOLOGY").ok().as_deref());
    let config = DownedConfig::load_or_default(&config_path_from_env());
    let store_path = default_store_path();
    let store = IncapacitationStore::load(&store_path, config);

    let state = Arc::new(Mutex::new(ServerState::new(
        World::new(topology),
        LifecycleController::from_store(store),
        store_path,
    )));
    start_tick_loop(state.clone());

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/downed", get(downed_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %bind_addr, "failed to bind server socket");
            return;
        }
    };

    tracing::info!(port, ?topology, "listening");
    if let Err(error) = axum::serve(listener, app).await {
        tracing::error!(%error, "server runtime failed");
    }
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn downed_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let guard = state.lock().await;
    Json(json!({
        "tick": guard.controller.tick_count(),
        "downed": guard.controller.downed_views(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let client_id = make_id("client");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);

    {
        let mut guard = state.lock().await;
        guard.clients.insert(
            client_id.clone(),
            ClientContext {
                tx: tx.clone(),
                player_id: None,
            },
        );
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(&state, &client_id, raw.as_str()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(&state, &client_id, &text).await;
                } else {
                    let mut guard = state.lock().await;
                    send_error(&mut guard, &client_id, "invalid utf8 message");
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    {
        let mut guard = state.lock().await;
        disconnect_client_internal(&mut guard, &client_id);
    }
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: &SharedState, client_id: &str, raw: &str) {
    let mut guard = state.lock().await;
    let state = &mut *guard;
    let Some(message) = parse_client_message(raw) else {
        send_error(state, client_id, "invalid message");
        return;
    };

    let message = match message {
        ParsedClientMessage::Hello {
            name,
            reconnect_token,
            position,
        } => {
            handle_hello(state, client_id, &name, reconnect_token, position);
            return;
        }
        ParsedClientMessage::Ping { t } => {
            send_to_client(
                state,
                client_id,
                &json!({ "type": "pong", "t": t }),
                QueuePolicy::DisconnectOnFull,
            );
            return;
        }
        other => other,
    };

    let Some(player_id) = state.player_for_client(client_id) else {
        send_error(state, client_id, "send hello first");
        return;
    };

    match message {
        ParsedClientMessage::Move { position } => {
            if let Some(participant) = state.world.online_mut(&player_id) {
                participant.position = sanitize_position(position);
            }
        }
        ParsedClientMessage::Gesture { helping } => {
            let downed = state.controller.is_downed(&player_id);
            if let Some(participant) = state.world.online_mut(&player_id) {
                participant.helping = helping && !downed;
            }
        }
        ParsedClientMessage::Action { action } => {
            let allowed = state.controller.permits_action(&player_id, action);
            if allowed {
                if let Some(participant) = state.world.online_mut(&player_id) {
                    match action {
                        PlayerAction::StartSprint => participant.sprinting = true,
                        PlayerAction::StopSprint => participant.sprinting = false,
                        _ => {}
                    }
                }
            }
            send_to_client(
                state,
                client_id,
                &json!({ "type": "action_result", "allowed": allowed }),
                QueuePolicy::DisconnectOnFull,
            );
        }
        ParsedClientMessage::CinematicDone => {
            state.controller.mark_cinematic_finished(&player_id);
        }
        ParsedClientMessage::Respawn => {
            let respawned = match state.world.online_mut(&player_id) {
                Some(participant) if !participant.alive => {
                    participant.alive = true;
                    participant.vitality = participant.max_vitality;
                    true
                }
                _ => false,
            };
            if respawned {
                state.controller.enqueue(ConnectionEvent::Respawned {
                    player_id: player_id.clone(),
                });
            }
        }
        ParsedClientMessage::LethalHit { cause } => {
            if let DamageCause::Attacker { attacker_id } = &cause {
                state.attackers.spawn(attacker_id);
            }
            let outcome = state.controller.on_lethal_hit(
                &mut state.world,
                &mut state.outbox,
                &mut state.attackers,
                &player_id,
                cause,
            );
            if outcome == HitOutcome::AllowDeath {
                if let Some(participant) = state.world.participant_mut(&player_id) {
                    participant.vitality = 0.0;
                    participant.alive = false;
                }
            }
            send_to_client(
                state,
                client_id,
                &json!({ "type": "hit_result", "outcome": outcome_tag(outcome) }),
                QueuePolicy::DisconnectOnFull,
            );
            route_outbox(state);
        }
        ParsedClientMessage::AdminRole {
            target_id,
            role,
            token,
        } => {
            if !admin_token_matches(state.admin_token.as_deref(), &token) {
                tracing::warn!(player_id = %player_id, "rejected admin role change");
                send_error(state, client_id, "not authorized");
                return;
            }
            state
                .controller
                .apply_role_change(&mut state.world, &mut state.outbox, &target_id, role);
            route_outbox(state);
        }
        ParsedClientMessage::Hello { .. } | ParsedClientMessage::Ping { .. } => {}
    }
}

fn handle_hello(
    state: &mut ServerState,
    client_id: &str,
    requested_name: &str,
    reconnect_token: Option<String>,
    position: Option<Vec3>,
) {
    let name = sanitize_name(requested_name);
    let known = reconnect_token
        .as_deref()
        .and_then(|token| state.player_by_token.get(token).cloned());
    let (player_id, token) = match (known, reconnect_token) {
        (Some(player_id), Some(token)) => (player_id, token),
        _ => {
            let token = make_reconnect_token();
            let player_id = make_id("player");
            state
                .player_by_token
                .insert(token.clone(), player_id.clone());
            (player_id, token)
        }
    };

    bind_client_to_player(state, client_id, &player_id);
    let participant = state.world.ensure_participant(
        &player_id,
        &name,
        sanitize_position(position.unwrap_or_default()),
    );
    participant.name = name;
    participant.connected = true;
    state.controller.enqueue(ConnectionEvent::Joined {
        player_id: player_id.clone(),
    });
    tracing::info!(player_id = %player_id, client_id, "player joined");

    send_to_client(
        state,
        client_id,
        &json!({
            "type": "welcome",
            "playerId": player_id,
            "reconnectToken": token,
        }),
        QueuePolicy::DisconnectOnFull,
    );
}

fn bind_client_to_player(state: &mut ServerState, client_id: &str, player_id: &str) {
    if let Some(old_client_id) = state.active_client_by_player_id.get(player_id).cloned() {
        if old_client_id != client_id {
            if let Some(old_client) = state.clients.get_mut(&old_client_id) {
                old_client.player_id = None;
                let _ = old_client.tx.try_send(OutboundMessage::Close {
                    code: 4001,
                    reason: "superseded by new connection".to_string(),
                });
            }
        }
    }

    if let Some(ctx) = state.clients.get_mut(client_id) {
        ctx.player_id = Some(player_id.to_string());
    }
    state
        .active_client_by_player_id
        .insert(player_id.to_string(), client_id.to_string());
}

fn disconnect_client_internal(state: &mut ServerState, client_id: &str) {
    let Some(context) = state.clients.remove(client_id) else {
        return;
    };
    let Some(bound_player_id) = context.player_id else {
        return;
    };
    if state
        .active_client_by_player_id
        .get(&bound_player_id)
        .map(|active| active != client_id)
        .unwrap_or(true)
    {
        return;
    }
    state.active_client_by_player_id.remove(&bound_player_id);

    if let Some(participant) = state.world.participant_mut(&bound_player_id) {
        participant.connected = false;
        participant.helping = false;
    }
    state.controller.enqueue(ConnectionEvent::Left {
        player_id: bound_player_id.clone(),
    });
    tracing::info!(player_id = %bound_player_id, client_id, "player left");
}

fn start_tick_loop(state: SharedState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(TICK_MS));
        loop {
            interval.tick().await;
            let mut guard = state.lock().await;
            tick_world(&mut guard);
        }
    });
}

fn tick_world(state: &mut ServerState) {
    state.attackers.tick();
    state.world.tick_status_effects();
    state
        .controller
        .step(&mut state.world, &mut state.outbox, &state.attackers);
    route_outbox(state);

    for message in state.world.drain_broadcasts() {
        broadcast(
            state,
            &json!({ "type": "chat", "message": message }),
            QueuePolicy::DropOnFull,
        );
    }

    let tick = state.controller.tick_count();
    if tick % SYNC_INTERVAL_TICKS == 0 {
        let mut views = state.controller.downed_views();
        views.sort_by_key(|view| player_order_key(&view.player_id));
        broadcast(
            state,
            &json!({ "type": "downed_players", "players": views }),
            QueuePolicy::DropOnFull,
        );
    }
    if tick % SAVE_INTERVAL_TICKS == 0 {
        let path = state.store_path.clone();
        if let Err(error) = state.controller.store_mut().flush(&path) {
            tracing::error!(%error, "failed to save downed players");
        }
    }
}

fn route_outbox(state: &mut ServerState) {
    for (player_id, message) in state.outbox.drain() {
        let Some(client_id) = state.active_client_by_player_id.get(&player_id).cloned() else {
            continue;
        };
        let policy = match message {
            ClientMessage::RevivalProgress { .. } | ClientMessage::DownedStateUpdate { .. } => {
                QueuePolicy::DropOnFull
            }
            _ => QueuePolicy::DisconnectOnFull,
        };
        match serde_json::to_value(&message) {
            Ok(payload) => send_to_client(state, &client_id, &payload, policy),
            Err(error) => {
                tracing::warn!(player_id = %player_id, %error, "failed to encode client message")
            }
        }
    }
}

fn send_to_client(state: &mut ServerState, client_id: &str, message: &Value, policy: QueuePolicy) {
    let send_failed = if let Some(client) = state.clients.get(client_id) {
        client
            .tx
            .try_send(OutboundMessage::Text(message.to_string()))
            .is_err()
    } else {
        false
    };
    if send_failed && policy == QueuePolicy::DisconnectOnFull {
        disconnect_client_internal(state, client_id);
    }
}

fn broadcast(state: &mut ServerState, message: &Value, policy: QueuePolicy) {
    let payload = message.to_string();
    let client_ids: Vec<String> = state.active_client_by_player_id.values().cloned().collect();
    let mut failed_clients = Vec::new();
    for client_id in client_ids {
        let Some(client) = state.clients.get(&client_id) else {
            continue;
        };
        if client
            .tx
            .try_send(OutboundMessage::Text(payload.clone()))
            .is_err()
            && policy == QueuePolicy::DisconnectOnFull
        {
            failed_clients.push(client_id);
        }
    }
    for client_id in failed_clients {
        disconnect_client_internal(state, &client_id);
    }
}

fn send_error(state: &mut ServerState, client_id: &str, message: &str) {
    send_to_client(
        state,
        client_id,
        &json!({ "type": "error", "message": message }),
        QueuePolicy::DisconnectOnFull,
    );
}

fn outcome_tag(outcome: HitOutcome) -> &'static str {
    match outcome {
        HitOutcome::Downed => "downed",
        HitOutcome::Absorbed => "absorbed",
        HitOutcome::AllowDeath => "allow_death",
    }
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

fn make_reconnect_token() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}
