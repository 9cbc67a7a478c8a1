use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::auth::{self, LoginRequest, RegisterRequest, SessionStore};
use super::db::DbHandle;
#[cfg(test)]
use super::db::ConsoleDb;
use super::models::{GameDate, GameRecordDetail, HistoryEntry, NewGameDecision, PublicUser, file_basename};
use super::relay::RelayBridge;
use super::supervisor::{ProcessStatus, ProcessSupervisor};
use crate::config::AnalyzerSection;
use crate::errors::ConsoleError;

/// Unfiltered history is capped at this many rows.
pub const RECENT_HISTORY_LIMIT: i64 = 20;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub supervisor: ProcessSupervisor,
    pub relay: RelayBridge,
    pub sessions: SessionStore,
    /// Screenshots referenced by history records must live here.
    pub captures_dir: PathBuf,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the supervisor to the relay it reports through.
    pub fn new(db: DbHandle, analyzer: AnalyzerSection, captures_dir: PathBuf) -> Self {
        let relay = RelayBridge::new();
        let supervisor = ProcessSupervisor::new(analyzer, relay.clone());
        Self {
            db,
            supervisor,
            relay,
            sessions: SessionStore::new(),
            captures_dir,
        }
    }
}

// ── Request / response payload types ──────────────────────────────────

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub date: Option<String>,
}

#[derive(Serialize)]
pub struct SystemStatus {
    #[serde(flatten)]
    pub process: ProcessStatus,
    pub client_connected: bool,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal { message: String, error: String },
}

impl ApiError {
    /// Map a domain error, using `fallback` as the message for internal failures.
    pub fn from_console(err: ConsoleError, fallback: &str) -> Self {
        match err {
            ConsoleError::EmailTaken { .. } => ApiError::BadRequest("此email已被註冊".to_string()),
            ConsoleError::InvalidCredentials => {
                ApiError::Unauthorized("帳號或密碼錯誤".to_string())
            }
            ConsoleError::NotAuthenticated => ApiError::Unauthorized("請先登入".to_string()),
            ConsoleError::NotFound(what) => ApiError::NotFound(format!("{} 不存在", what)),
            ConsoleError::AlreadyRunning => ApiError::BadRequest("系統已在運行中".to_string()),
            ConsoleError::NotRunning => ApiError::BadRequest("系統未運行".to_string()),
            ConsoleError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            other => {
                tracing::error!(error = %other, "{}", fallback);
                ApiError::Internal {
                    message: fallback.to_string(),
                    error: other.to_string(),
                }
            }
        }
    }

    fn database(err: anyhow::Error, fallback: &str) -> Self {
        Self::from_console(ConsoleError::Database(err), fallback)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, serde_json::json!({"message": msg})),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, serde_json::json!({"message": msg}))
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({"message": msg})),
            ApiError::Internal { message, error } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"message": message, "error": error}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/api/me", get(current_user))
        .route("/api/game-dates", get(list_game_dates))
        .route("/api/game-history", get(list_game_history))
        .route("/api/game-history/{id}", get(get_game_record))
        .route("/api/game-decision", post(record_game_decision))
        .route("/api/test-connection", post(test_connection))
        .route("/api/start-system", post(start_system))
        .route("/api/stop-system", post(stop_system))
        .route("/api/system-status", get(system_status))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn register(
    State(state): State<SharedState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = auth::register(&state.db, req)
        .await
        .map_err(|e| ApiError::from_console(e, "註冊失敗"))?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"message": "註冊成功", "userId": user.id})),
    ))
}

async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = auth::login(&state.db, req)
        .await
        .map_err(|e| ApiError::from_console(e, "伺服器錯誤"))?;
    let token = state.sessions.create(user.clone());
    tracing::info!(user_id = user.id, "User logged in");
    Ok((
        [(SET_COOKIE, auth::session_cookie(&token))],
        Json(serde_json::json!({"message": "登入成功", "user": user})),
    ))
}

async fn logout(State(state): State<SharedState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = auth::session_token(&headers) {
        state.sessions.remove(&token);
    }
    (
        [(SET_COOKIE, auth::expired_session_cookie())],
        Json(serde_json::json!({"message": "已登出"})),
    )
}

async fn current_user(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<PublicUser>, ApiError> {
    state
        .sessions
        .user_for(&headers)
        .map(Json)
        .ok_or_else(|| ApiError::from_console(ConsoleError::NotAuthenticated, "伺服器錯誤"))
}

async fn list_game_dates(State(state): State<SharedState>) -> Result<Json<Vec<GameDate>>, ApiError> {
    let dates = state
        .db
        .call(|db| db.list_game_dates())
        .await
        .map_err(|e| ApiError::database(e, "獲取日期列表失敗"))?;
    Ok(Json(dates))
}

async fn list_game_history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let date = query.date.filter(|d| !d.trim().is_empty());
    let entries = match date {
        Some(date) => {
            let date = date.trim().to_string();
            if chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
                return Err(ApiError::BadRequest(format!("日期格式錯誤: {}", date)));
            }
            state.db.call(move |db| db.list_history_for_date(&date)).await
        }
        None => {
            state
                .db
                .call(|db| db.list_recent_history(RECENT_HISTORY_LIMIT))
                .await
        }
    }
    .map_err(|e| ApiError::database(e, "獲取歷史記錄失敗"))?;
    Ok(Json(entries))
}

async fn get_game_record(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<GameRecordDetail>, ApiError> {
    let record = state
        .db
        .call(move |db| db.get_game_record(id))
        .await
        .map_err(|e| ApiError::database(e, "獲取記錄失敗"))?
        .ok_or_else(|| {
            ApiError::from_console(ConsoleError::NotFound(format!("記錄 {}", id)), "獲取記錄失敗")
        })?;
    Ok(Json(GameRecordDetail::from(record)))
}

async fn record_game_decision(
    State(state): State<SharedState>,
    Json(req): Json<NewGameDecision>,
) -> Result<impl IntoResponse, ApiError> {
    let screenshot = file_basename(&req.screenshot_path).to_string();
    let in_captures = !screenshot.is_empty()
        && tokio::fs::metadata(state.captures_dir.join(&screenshot))
            .await
            .is_ok_and(|m| m.is_file());
    if !in_captures {
        return Err(ApiError::BadRequest(format!(
            "截圖不在截圖目錄中: {}",
            req.screenshot_path
        )));
    }

    let user_id = req.user_id;
    let record_id = state
        .db
        .call(move |db| {
            if db.get_user(req.user_id)?.is_none() {
                return Ok(None);
            }
            db.insert_game_decision(&req).map(Some)
        })
        .await
        .map_err(|e| ApiError::database(e, "保存決策失敗"))?
        .ok_or_else(|| ApiError::BadRequest(format!("用戶 {} 不存在", user_id)))?;

    tracing::info!(record_id, user_id, "Recorded game decision");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"message": "決策記錄已保存", "record_id": record_id})),
    ))
}

async fn test_connection(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(|db| db.ping())
        .await
        .map_err(|e| ApiError::database(e, "測試失敗"))?;
    Ok(Json(serde_json::json!({"message": "連接測試成功", "database": "OK"})))
}

async fn start_system(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let launch_path = state
        .supervisor
        .start()
        .await
        .map_err(|e| ApiError::from_console(e, "系統啟動失敗"))?;
    Ok(Json(serde_json::json!({
        "message": "系統已啟動",
        "pythonPath": launch_path.to_string_lossy(),
    })))
}

async fn stop_system(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    state
        .supervisor
        .stop()
        .await
        .map_err(|e| ApiError::from_console(e, "系統停止失敗"))?;
    Ok(Json(serde_json::json!({"message": "系統已停止"})))
}

async fn system_status(State(state): State<SharedState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        process: state.supervisor.status().await,
        client_connected: state.relay.is_connected(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::collections::BTreeMap;
    use std::sync::OnceLock;
    use tower::ServiceExt;

    static CAPTURES: OnceLock<tempfile::TempDir> = OnceLock::new();

    /// Shared capture directory holding the screenshots the tests refer to.
    fn test_captures_dir() -> PathBuf {
        CAPTURES
            .get_or_init(|| {
                let dir = tempfile::tempdir().unwrap();
                for name in ["a.png", "poker_20240501_101010.png"] {
                    std::fs::write(dir.path().join(name), b"\x89PNG fake").unwrap();
                }
                dir
            })
            .path()
            .to_path_buf()
    }

    fn test_state_with(analyzer: AnalyzerSection) -> SharedState {
        let db = ConsoleDb::new_in_memory().unwrap();
        Arc::new(AppState::new(DbHandle::new(db), analyzer, test_captures_dir()))
    }

    fn test_app() -> (Router, SharedState) {
        let state = test_state_with(AnalyzerSection::default());
        (api_router().with_state(state.clone()), state)
    }

    fn sleeping_analyzer(dir: &std::path::Path) -> AnalyzerSection {
        let script = dir.join("main.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        AnalyzerSection {
            program: "sh".to_string(),
            script: Some(script),
            args: Vec::new(),
            module_path: PathBuf::from("core"),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_empty(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn register_ann(app: &Router) -> i64 {
        let response = app
            .clone()
            .oneshot(post_json(
                "/register",
                serde_json::json!({"name": "Ann", "email": "ann@example.com", "password": "pw123"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = body_json(response.into_body()).await;
        body["userId"].as_i64().unwrap()
    }

    fn decision_body(user_id: i64, screenshot: &str) -> serde_json::Value {
        serde_json::json!({
            "user_id": user_id,
            "session_id": "test_session",
            "screenshot_path": screenshot,
            "game_state": {"stage": "flop"},
            "player_cards": "Ah Kd",
            "board_cards": "Qs Jh 2c",
            "position": "BTN",
            "pot_size": 150,
            "action_taken": "raise",
            "action_amount": 50,
            "ai_decision": {"action": "raise", "amount": 50}
        })
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = test_app();
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_register_returns_created_with_user_id() {
        let (app, _) = test_app();
        let user_id = register_ann(&app).await;
        assert!(user_id > 0);
    }

    #[tokio::test]
    async fn test_register_duplicate_email_is_bad_request() {
        let (app, state) = test_app();
        register_ann(&app).await;
        let response = app
            .oneshot(post_json(
                "/register",
                serde_json::json!({"name": "Again", "email": "ann@example.com", "password": "x"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["message"], "此email已被註冊");
        assert_eq!(state.db.call(|db| db.count_users()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_register_missing_fields_is_bad_request() {
        let (app, _) = test_app();
        let response = app
            .oneshot(post_json(
                "/register",
                serde_json::json!({"name": "NoPass", "email": "np@example.com"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_success_returns_public_user_and_cookie() {
        let (app, _) = test_app();
        let user_id = register_ann(&app).await;
        let response = app
            .oneshot(post_json(
                "/login",
                serde_json::json!({"email": "ann@example.com", "password": "pw123"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("console_session="));

        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["message"], "登入成功");
        assert_eq!(
            body["user"],
            serde_json::json!({"id": user_id, "name": "Ann", "email": "ann@example.com"})
        );
    }

    #[tokio::test]
    async fn test_login_failures_are_unauthorized() {
        let (app, _) = test_app();
        register_ann(&app).await;
        for body in [
            serde_json::json!({"email": "ann@example.com", "password": "wrong"}),
            serde_json::json!({"email": "ghost@example.com", "password": "pw123"}),
        ] {
            let response = app.clone().oneshot(post_json("/login", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let body: serde_json::Value = body_json(response.into_body()).await;
            assert_eq!(body["message"], "帳號或密碼錯誤");
        }
    }

    #[tokio::test]
    async fn test_me_and_logout_follow_session() {
        let (app, _) = test_app();
        register_ann(&app).await;
        let login = app
            .clone()
            .oneshot(post_json(
                "/login",
                serde_json::json!({"email": "ann@example.com", "password": "pw123"}),
            ))
            .await
            .unwrap();
        let cookie = login.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        let pair = cookie.split(';').next().unwrap().to_string();

        let me = Request::builder()
            .uri("/api/me")
            .header("cookie", &pair)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(me).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let user: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(user["name"], "Ann");

        let logout = Request::builder()
            .method("POST")
            .uri("/logout")
            .header("cookie", &pair)
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.clone().oneshot(logout).await.unwrap().status(), StatusCode::OK);

        let me_again = Request::builder()
            .uri("/api/me")
            .header("cookie", &pair)
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            app.oneshot(me_again).await.unwrap().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_game_decision_appears_in_history() {
        let (app, _) = test_app();
        let user_id = register_ann(&app).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/game-decision",
                decision_body(user_id, "/home/op/poker_captures/poker_20240501_101010.png"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["message"], "決策記錄已保存");
        let record_id = body["record_id"].as_i64().unwrap();

        let response = app.oneshot(get("/api/game-history")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let rows: Vec<serde_json::Value> = body_json(response.into_body()).await;
        let row = rows
            .iter()
            .find(|r| r["id"].as_i64() == Some(record_id))
            .expect("new record should be listed");
        assert_eq!(row["screenshot_url"], "/poker_captures/poker_20240501_101010.png");
        assert_eq!(row["username"], "Ann");
        assert_eq!(row["pot_size"], 150.0);
        assert_eq!(row["action_taken"], "raise");
    }

    #[tokio::test]
    async fn test_game_decision_screenshot_must_be_in_capture_dir() {
        let (app, _) = test_app();
        let user_id = register_ann(&app).await;

        for screenshot in ["missing.png", "/etc/passwd", ""] {
            let response = app
                .clone()
                .oneshot(post_json("/api/game-decision", decision_body(user_id, screenshot)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{screenshot}");
        }
        let response = app.oneshot(get("/api/game-history")).await.unwrap();
        let rows: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_game_record_detail_and_not_found() {
        let (app, _) = test_app();
        let user_id = register_ann(&app).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/game-decision",
                decision_body(user_id, "/home/op/poker_captures/a.png"),
            ))
            .await
            .unwrap();
        let body: serde_json::Value = body_json(response.into_body()).await;
        let record_id = body["record_id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(get(&format!("/api/game-history/{}", record_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(record["id"], record_id);
        assert_eq!(record["user_id"], user_id);
        assert_eq!(record["screenshot_url"], "/poker_captures/a.png");
        assert!(record.get("screenshot_path").is_none());
        assert_eq!(record["game_state"], serde_json::json!({"stage": "flop"}));
        assert_eq!(record["ai_decision"]["action"], "raise");

        let response = app
            .oneshot(get(&format!("/api/game-history/{}", record_id + 100)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert!(body["message"].as_str().unwrap().contains("不存在"));
    }

    #[tokio::test]
    async fn test_game_decision_unknown_user_is_bad_request() {
        let (app, _) = test_app();
        let response = app
            .oneshot(post_json("/api/game-decision", decision_body(42, "a.png")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_history_date_filter_and_dates() {
        let (app, state) = test_app();
        let user_id = register_ann(&app).await;
        state
            .db
            .call(move |db| {
                let mut req: NewGameDecision =
                    serde_json::from_value(decision_body(user_id, "a.png"))?;
                db.insert_game_decision_at(&req, Some("2024-05-01 08:00:00"))?;
                req.screenshot_path = "b.png".to_string();
                db.insert_game_decision_at(&req, Some("2024-05-02 09:00:00"))?;
                req.screenshot_path = "c.png".to_string();
                db.insert_game_decision_at(&req, Some("2024-05-02 21:00:00"))?;
                Ok(())
            })
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(get("/api/game-history?date=2024-05-02"))
            .await
            .unwrap();
        let rows: Vec<serde_json::Value> = body_json(response.into_body()).await;
        let urls: Vec<&str> = rows.iter().map(|r| r["screenshot_url"].as_str().unwrap()).collect();
        assert_eq!(urls, vec!["/poker_captures/c.png", "/poker_captures/b.png"]);

        let response = app.clone().oneshot(get("/api/game-dates")).await.unwrap();
        let dates: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[0]["date"], "2024-05-02");
        assert_eq!(dates[0]["formatted_date"], "2024年05月02日");

        let response = app
            .oneshot(get("/api/game-history?date=May-2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_game_dates_empty() {
        let (app, _) = test_app();
        let response = app.oneshot(get("/api/game-dates")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let dates: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert!(dates.is_empty());
    }

    #[tokio::test]
    async fn test_test_connection() {
        let (app, _) = test_app();
        let response = app.oneshot(post_empty("/api/test-connection")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["database"], "OK");
    }

    #[tokio::test]
    async fn test_start_stop_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = sleeping_analyzer(dir.path());
        let script = analyzer.script.clone().unwrap();
        let state = test_state_with(analyzer);
        let app = api_router().with_state(state.clone());

        let response = app.clone().oneshot(post_empty("/api/stop-system")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["message"], "系統未運行");

        let response = app.clone().oneshot(post_empty("/api/start-system")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["message"], "系統已啟動");
        assert_eq!(body["pythonPath"], &*script.to_string_lossy());

        let response = app.clone().oneshot(post_empty("/api/start-system")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["message"], "系統已在運行中");

        let response = app.clone().oneshot(get("/api/system-status")).await.unwrap();
        let status: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(status["running"], true);
        assert_eq!(status["client_connected"], false);

        let response = app.clone().oneshot(post_empty("/api/stop-system")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(post_empty("/api/stop-system")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        state.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_with_missing_program_is_internal_error() {
        let state = test_state_with(AnalyzerSection {
            program: "/nonexistent/analyzer".to_string(),
            script: None,
            ..AnalyzerSection::default()
        });
        let app = api_router().with_state(state);
        let response = app.oneshot(post_empty("/api/start-system")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["message"], "系統啟動失敗");
        assert!(body["error"].as_str().unwrap().contains("/nonexistent/analyzer"));
    }
}
