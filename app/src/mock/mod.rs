//! Mock battle server: the `matching` and `user` namespaces over WebSocket
//! plus a small REST surface, driven by a scripted bot opponent.

pub mod script;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use matchsync::{ApiResponse, Frame, MatchSummary, Namespace, Page, ServerStatus, events};
use script::{MockMatch, MockTiming, Scheduled};

#[derive(Debug, Clone, Default)]
pub struct MockSettings {
    pub rounds: u32,
    pub timing: MockTiming,
}

/// Shared state for all connections.
struct MockState {
    settings: MockSettings,
    connections: AtomicUsize,
    queued: AtomicUsize,
    matches: Mutex<HashMap<String, MatchSummary>>,
}

impl MockState {
    fn new(settings: MockSettings) -> Self {
        Self {
            settings,
            connections: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            matches: Mutex::new(HashMap::new()),
        }
    }

    fn track(&self, frame: &Frame) {
        let mut matches = self.matches.lock().unwrap_or_else(|e| e.into_inner());
        script::track(&mut matches, frame);
    }

    fn forget(&self, match_id: &str) {
        self.matches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(match_id);
    }

    fn set_waiting(&self, was: bool, now: bool) {
        match (was, now) {
            (false, true) => {
                self.queued.fetch_add(1, Ordering::Relaxed);
            }
            (true, false) => {
                self.queued.fetch_sub(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/matching", get(matching_ws))
        .route("/user", get(user_ws))
        .route("/api/status", get(get_status))
        .route("/api/matches", get(get_matches))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    settings: MockSettings,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(
        "mock: listening on {addr} ({} round(s) per match)",
        settings.rounds.max(1)
    );
    let app = router(Arc::new(MockState::new(settings)));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("mock server failed")?;
    tracing::info!("mock: stopped");
    Ok(())
}

/// Bind `bind` and serve until Ctrl-C.
pub async fn run(bind: &str, settings: MockSettings) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    serve(listener, settings, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

// ---------------------------------------------------------------------------
// REST
// ---------------------------------------------------------------------------

/// GET /api/status
async fn get_status(State(state): State<Arc<MockState>>) -> Json<ApiResponse<ServerStatus>> {
    let active_matches = state
        .matches
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .len();
    Json(ApiResponse::ok(ServerStatus {
        queued: state.queued.load(Ordering::Relaxed),
        active_matches,
        connections: state.connections.load(Ordering::Relaxed),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageQuery {
    #[serde(default = "first_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}

fn first_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

/// GET /api/matches?page=1&pageSize=20
async fn get_matches(
    State(state): State<Arc<MockState>>,
    Query(query): Query<PageQuery>,
) -> Json<ApiResponse<Page<MatchSummary>>> {
    let mut all: Vec<MatchSummary> = state
        .matches
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .values()
        .cloned()
        .collect();
    all.sort_by(|a, b| a.match_id.cmp(&b.match_id));
    Json(ApiResponse::ok(Page::slice(&all, query.page, query.page_size)))
}

// ---------------------------------------------------------------------------
// WebSocket namespaces
// ---------------------------------------------------------------------------

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// GET /matching: upgrade to the matching namespace.
async fn matching_ws(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, &headers, ws, Namespace::Matching)
}

/// GET /user: upgrade to the user namespace.
async fn user_ws(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, &headers, ws, Namespace::User)
}

fn upgrade(
    state: Arc<MockState>,
    headers: &HeaderMap,
    ws: WebSocketUpgrade,
    namespace: Namespace,
) -> Response {
    let Some(user) = bearer(headers).map(str::to_string) else {
        tracing::warn!("mock: rejected {namespace} upgrade without bearer token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error(401, "missing bearer token")),
        )
            .into_response();
    };
    let locale = headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    tracing::debug!("mock: {namespace} upgrade for {user} (locale {locale})");
    ws.on_upgrade(move |socket| handle_ws(socket, state, namespace, user))
}

/// Scheduled deliveries for one connection. Dropping aborts them.
#[derive(Default)]
struct Pending(Vec<JoinHandle<()>>);

impl Pending {
    fn abort_all(&mut self) {
        for task in self.0.drain(..) {
            task.abort();
        }
    }

    /// Deliver `frames` in order, each at its offset from now. A frame is
    /// sent under the script lock and only while the script is still at
    /// `generation`, so a cancel can never overtake what it cancels.
    fn schedule(
        &mut self,
        frames: Vec<Scheduled>,
        out: &mpsc::UnboundedSender<Frame>,
        script: &Arc<Mutex<MockMatch>>,
        generation: u64,
    ) {
        self.0.retain(|task| !task.is_finished());
        if frames.is_empty() {
            return;
        }
        let out = out.clone();
        let script = Arc::clone(script);
        let start = tokio::time::Instant::now();
        self.0.push(tokio::spawn(async move {
            for Scheduled { after, frame } in frames {
                tokio::time::sleep_until(start + after).await;
                let sent = {
                    let mut script = script.lock().unwrap_or_else(|e| e.into_inner());
                    if script.generation() != generation {
                        false
                    } else {
                        script.announce(&frame);
                        out.send(frame).is_ok()
                    }
                };
                if !sent {
                    break;
                }
            }
        }));
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        self.abort_all();
    }
}

async fn handle_ws(socket: WebSocket, state: Arc<MockState>, namespace: Namespace, user: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let script = Arc::new(Mutex::new(MockMatch::new(
        state.settings.rounds,
        state.settings.timing.clone(),
    )));

    state.connections.fetch_add(1, Ordering::Relaxed);
    tracing::info!("mock: {user} connected to {namespace}");

    let tracker = Arc::clone(&state);
    let mut send_task = tokio::spawn(async move {
        while let Some(mut frame) = out_rx.recv().await {
            if frame.event == events::ROUND_STARTING {
                frame.data["serverTimestamp"] = json!(Utc::now().timestamp_millis());
            }
            tracker.track(&frame);
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if ws_tx.send(Message::text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_state = Arc::clone(&state);
    let recv_script = Arc::clone(&script);
    let recv_user = user.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut pending = Pending::default();
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => handle_command(
                        &recv_state,
                        &recv_script,
                        &recv_user,
                        namespace,
                        &frame,
                        &out_tx,
                        &mut pending,
                    ),
                    Err(e) => tracing::warn!("mock: malformed frame from {recv_user}: {e}"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.connections.fetch_sub(1, Ordering::Relaxed);
    {
        let script = script.lock().unwrap_or_else(|e| e.into_inner());
        state.set_waiting(script.is_waiting(), false);
        if let Some(match_id) = script.match_id() {
            state.forget(match_id);
        }
    }
    tracing::info!("mock: {user} disconnected from {namespace}");
}

fn handle_command(
    state: &MockState,
    script: &Arc<Mutex<MockMatch>>,
    user: &str,
    namespace: Namespace,
    frame: &Frame,
    out: &mpsc::UnboundedSender<Frame>,
    pending: &mut Pending,
) {
    tracing::debug!("mock: {user} -> {namespace}/{}", frame.event);
    match namespace {
        Namespace::User => {
            if frame.event == events::JOIN_USER_ROOM {
                let welcome = script::welcome(uuid::Uuid::new_v4().to_string(), user);
                let _ = out.send(welcome);
            }
        }
        Namespace::Matching => {
            let mut game = script.lock().unwrap_or_else(|e| e.into_inner());
            let was_waiting = game.is_waiting();
            let previous = game.match_id().map(str::to_string);
            let reply = game.handle(frame, || uuid::Uuid::new_v4().to_string());
            state.set_waiting(was_waiting, game.is_waiting());

            if reply.cancel_pending {
                pending.abort_all();
                if let Some(match_id) = previous {
                    state.forget(&match_id);
                }
            }
            pending.schedule(reply.frames, out, script, game.generation());
        }
    }
}
