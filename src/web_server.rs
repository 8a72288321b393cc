use anyhow::{Context, Result};
use axum::{
    extract::{Form, Json, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    serve, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::constants::{SESSION_COOKIE, SESSION_TTL};
use crate::turn::TurnHandler;
use crate::{ConversationSession, Message};

pub type SharedSession = Arc<Mutex<ConversationSession>>;

struct SessionEntry {
    session: SharedSession,
    last_seen: Instant,
}

/// Live sessions keyed by session id. The map lock is held only for lookups;
/// a turn holds its own session's lock for the whole request. Sessions idle
/// longer than the TTL are dropped.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Looks up a live session and marks it as seen. An expired session is
    /// dropped and reported as unknown.
    pub async fn get(&self, session_id: &str) -> Option<SharedSession> {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        let entry = sessions.get_mut(session_id)?;
        if now.duration_since(entry.last_seen) <= self.ttl {
            entry.last_seen = now;
            return Some(entry.session.clone());
        }
        sessions.remove(session_id);
        info!(session_id = %session_id, "Session expired");
        None
    }

    pub async fn create(&self) -> (String, SharedSession) {
        let session = ConversationSession::new();
        let id = session.session_id().to_string();
        let shared = Arc::new(Mutex::new(session));

        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_seen) <= self.ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, "Dropped idle sessions");
        }
        sessions.insert(
            id.clone(),
            SessionEntry {
                session: shared.clone(),
                last_seen: now,
            },
        );
        info!(session_id = %id, "Session started");
        (id, shared)
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(session_id).is_some();
        if removed {
            info!(session_id = %session_id, "Session ended");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SESSION_TTL)
    }
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
    pub title: String,
}

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    sessions: SessionStore,
    handler: Arc<TurnHandler>,
    title: Arc<str>,
}

impl AppState {
    pub fn new(handler: TurnHandler, templates_dir: &Path, title: &str) -> Self {
        Self {
            templates: Arc::new(create_minijinja_env(templates_dir)),
            sessions: SessionStore::default(),
            handler: Arc::new(handler),
            title: Arc::from(title),
        }
    }

    /// Replaces the session store, e.g. to use a different idle TTL.
    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}

// Templates are reloaded from disk whenever a file in the directory changes.
fn create_minijinja_env(templates_dir: &Path) -> AutoReloader {
    let dir = templates_dir.to_path_buf();
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(dir.clone()));
        notifier.watch_path(dir.as_path(), true);
        Ok(env)
    })
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SessionView {
    pub session_id: String,
    pub token_count: u64,
    pub transcript: Vec<Message>,
}

impl From<&ConversationSession> for SessionView {
    fn from(session: &ConversationSession) -> Self {
        Self {
            session_id: session.session_id().to_string(),
            token_count: session.token_count(),
            transcript: session.transcript().to_vec(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct ChatForm {
    #[serde(default)]
    pub human_prompt: String,
}

#[derive(Deserialize, Debug)]
pub struct TurnRequest {
    pub utterance: String,
}

fn session_cookie(session_id: String, ttl: Duration) -> Cookie<'static> {
    // Round up so a sub-second TTL does not become Max-Age=0.
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    let max_age = i64::try_from(secs).unwrap_or(i64::MAX);
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .max_age(time::Duration::seconds(max_age))
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Finds the session named by the cookie, or starts a new one and sets the cookie.
async fn resolve_session(state: &AppState, jar: CookieJar) -> (CookieJar, SharedSession) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(session) = state.sessions.get(cookie.value()).await {
            return (jar, session);
        }
        warn!(session_id = %cookie.value(), "Unknown session cookie, starting a new session");
    }
    let (id, session) = state.sessions.create().await;
    (jar.add(session_cookie(id, state.sessions.ttl())), session)
}

fn render_page(state: &AppState, session: &ConversationSession, error: Option<&str>) -> Response {
    // Acquire env, get template, and render within the same block
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                tmpl.render(minijinja::context! {
                    title => state.title.as_ref(),
                    messages => session.transcript(),
                    token_count => session.token_count(),
                    pending_input => &session.pending_input,
                    error => error,
                })
            })
        })
        .map(|html| Html(html).into_response())
        .unwrap_or_else(|e| {
            error!("Failed to get or render template: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Internal Server Error: {}", e)),
            )
                .into_response()
        })
}

async fn index_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (jar, shared) = resolve_session(&state, jar).await;
    let session = shared.lock().await;
    (jar, render_page(&state, &session, None)).into_response()
}

async fn chat_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<ChatForm>,
) -> Response {
    let (jar, shared) = resolve_session(&state, jar).await;
    let mut session = shared.lock().await;
    session.pending_input = form.human_prompt.clone();

    match state.handler.submit_turn(&form.human_prompt, &mut session).await {
        Ok(_) => (jar, Redirect::to("/")).into_response(),
        Err(e) => {
            error!("Turn failed: {}", e);
            let mut page = render_page(&state, &session, Some(&e.to_string()));
            if page.status().is_success() {
                *page.status_mut() = StatusCode::BAD_GATEWAY;
            }
            (jar, page).into_response()
        }
    }
}

async fn reset_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.remove(cookie.value()).await;
    }
    let (id, _) = state.sessions.create().await;
    (jar.add(session_cookie(id, state.sessions.ttl())), Redirect::to("/")).into_response()
}

async fn session_api_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (jar, shared) = resolve_session(&state, jar).await;
    let session = shared.lock().await;
    (jar, Json(SessionView::from(&*session))).into_response()
}

async fn turn_api_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<TurnRequest>,
) -> Response {
    let (jar, shared) = resolve_session(&state, jar).await;
    let mut session = shared.lock().await;
    session.pending_input = request.utterance.clone();

    match state.handler.submit_turn(&request.utterance, &mut session).await {
        Ok(_) => (jar, Json(SessionView::from(&*session))).into_response(),
        Err(e) => {
            error!("Turn failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                jar,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

pub fn build_router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/chat", post(chat_handler))
        .route("/reset", post(reset_handler))
        .route("/api/session", get(session_api_handler))
        .route("/api/turn", post(turn_api_handler))
        .nest_service("/static", ServeDir::new(static_dir))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http())) // Add request logging
}

pub async fn start_web_server(config: WebConfig, handler: TurnHandler) -> Result<()> {
    let state = AppState::new(handler, &config.templates_dir, &config.title);
    let app = build_router(state, &config.static_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server failed")?;

    info!("Web server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, initiating shutdown...");
}
