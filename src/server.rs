//! 🌐 HTTP surface: webhook intake, operator endpoints and health.

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::battle::BattleEngine;
use crate::db::BattleSummary;
use crate::error::{BattleError, SyncError};
use crate::sync::SyncOrchestrator;
use crate::types::{BattleStatus, Network};

#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<SyncOrchestrator>,
    pub battles: Arc<BattleEngine>,
    pub default_network: Network,
    pub secret: Option<String>,
    pub max_batch_events: usize,
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/events", post(webhook_events))
        .route("/admin/resync", post(admin_resync))
        .route("/admin/scan", post(admin_scan))
        .route("/battles", get(list_battles))
        .route("/battles/match", post(match_battle))
        .route("/battles/detect-winners", post(detect_winners))
        .route("/battles/complete-listing", post(complete_listing))
        .route("/battles/confirm-pool", post(confirm_pool))
        .with_state(state)
}

/// Serve until `shutdown` fires.
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", bind))?;
    info!("🌐 HTTP server listening on {}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")
}

struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "success": false, "error": self.kind, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            SyncError::NotFound { .. } => StatusCode::NOT_FOUND,
            SyncError::Malformed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SyncError::Rejected { .. } => StatusCode::CONFLICT,
            SyncError::PersistFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Fetch { .. } => StatusCode::BAD_GATEWAY,
            SyncError::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<BattleError> for ApiError {
    fn from(err: BattleError) -> Self {
        let (status, kind) = match &err {
            BattleError::UnknownToken { .. } => (StatusCode::NOT_FOUND, "unknown_token"),
            BattleError::WrongStatus { .. } => (StatusCode::CONFLICT, "wrong_status"),
            BattleError::NoTier(_) => (StatusCode::BAD_REQUEST, "no_tier"),
            BattleError::External(_) => (StatusCode::BAD_GATEWAY, "external_call_failed"),
            BattleError::Reconcile(e) if !e.is_retryable() => (StatusCode::CONFLICT, "rejected"),
            BattleError::Reconcile(_) | BattleError::Persistence(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "persist_failed")
            }
        };
        Self::new(status, kind, err.to_string())
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(secret) = &state.secret else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented != Some(secret.as_str()) {
        warn!("⚠️  Rejected request with missing or wrong bearer secret");
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", "bad bearer secret"));
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct NetworkQuery {
    network: Option<String>,
    status: Option<String>,
}

fn parse_network(raw: Option<&str>, default: Network) -> Result<Network, ApiError> {
    match raw {
        Some(raw) => Network::from_str(raw).map_err(ApiError::bad_request),
        None => Ok(default),
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "networks": state.sync.networks(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn webhook_events(
    State(state): State<AppState>,
    Query(query): Query<NetworkQuery>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let network = parse_network(query.network.as_deref(), state.default_network)?;

    let items = match body {
        Value::Array(items) if !items.is_empty() => items,
        _ => return Err(ApiError::bad_request("expected a non-empty array of events")),
    };
    if items.len() > state.max_batch_events {
        return Err(ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "batch_too_large",
            format!("{} events exceeds the limit of {}", items.len(), state.max_batch_events),
        ));
    }

    let report = state
        .sync
        .ingest_events(network, items, &state.shutdown)
        .await;
    let success = report.tally.failures.is_empty() && report.rejected.is_empty();
    Ok(Json(json!({ "success": success, "report": report })))
}

#[derive(Debug, Deserialize)]
struct ResyncRequest {
    mint: String,
    network: Option<String>,
}

async fn admin_resync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ResyncRequest>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let network = parse_network(req.network.as_deref(), state.default_network)?;
    let results = state.sync.resync(network, &req.mint).await?;
    let records: Vec<Value> = results
        .iter()
        .map(|r| json!({ "identity": r.identity, "kind": r.kind, "outcome": r.outcome }))
        .collect();
    Ok(Json(json!({ "success": true, "network": network, "records": records })))
}

async fn admin_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let report = state.sync.full_scan(&state.shutdown).await;
    Ok(Json(json!({ "success": !report.cancelled, "report": report })))
}

async fn list_battles(
    State(state): State<AppState>,
    Query(query): Query<NetworkQuery>,
) -> Result<Json<Vec<BattleSummary>>, ApiError> {
    let network = parse_network(query.network.as_deref(), state.default_network)?;
    let status = match query.status.as_deref() {
        None => BattleStatus::InBattle,
        Some(raw) => raw
            .parse::<u8>()
            .ok()
            .and_then(BattleStatus::from_ordinal)
            .ok_or_else(|| ApiError::bad_request(format!("unknown battle status {:?}", raw)))?,
    };
    let rows = state
        .battles
        .list(network, status)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(rows.iter().map(BattleSummary::from).collect()))
}

#[derive(Debug, Deserialize)]
struct MatchRequest {
    mint: String,
    opponent: Option<String>,
    network: Option<String>,
}

fn parse_mint(raw: &str) -> Result<Pubkey, ApiError> {
    Pubkey::from_str(raw.trim()).map_err(|_| ApiError::bad_request(format!("invalid mint {:?}", raw)))
}

async fn match_battle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MatchRequest>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let network = parse_network(req.network.as_deref(), state.default_network)?;
    let mint = parse_mint(&req.mint)?;

    let opponent = match req.opponent.as_deref() {
        Some(raw) => parse_mint(raw)?,
        None => match state.battles.find_opponent(network, &mint).await? {
            Some(row) => *row.mint(),
            None => {
                return Ok(Json(json!({ "success": false, "error": "no_opponent" })));
            }
        },
    };

    state.battles.start_battle(network, &mint, &opponent).await?;
    Ok(Json(json!({
        "success": true,
        "network": network,
        "mint": mint.to_string(),
        "opponent": opponent.to_string(),
    })))
}

#[derive(Debug, Deserialize)]
struct MintRequest {
    mint: String,
    network: Option<String>,
}

/// Pool creation finished out of band: VictoryPending → Listed.
async fn complete_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MintRequest>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let network = parse_network(req.network.as_deref(), state.default_network)?;
    let mint = parse_mint(&req.mint)?;
    state.battles.complete_listing(network, &mint).await?;
    Ok(Json(json!({ "success": true, "network": network, "mint": mint.to_string(), "status": "Listed" })))
}

async fn confirm_pool(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MintRequest>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let network = parse_network(req.network.as_deref(), state.default_network)?;
    let mint = parse_mint(&req.mint)?;
    state.battles.confirm_pool(network, &mint).await?;
    Ok(Json(json!({ "success": true, "network": network, "mint": mint.to_string(), "status": "PoolCreated" })))
}

async fn detect_winners(
    State(state): State<AppState>,
    Query(query): Query<NetworkQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let networks = match query.network.as_deref() {
        Some(raw) => vec![Network::from_str(raw).map_err(ApiError::bad_request)?],
        None => state.sync.networks(),
    };

    let mut scans = Vec::new();
    for network in networks {
        match state.battles.detect_winners(network).await {
            Ok(scan) => scans.push(json!({ "success": true, "scan": scan })),
            Err(e) => {
                warn!("⚠️  Victory scan on {} failed: {}", network, e);
                scans.push(json!({ "success": false, "network": network, "error": e.to_string() }));
            }
        }
    }
    Ok(Json(json!({ "scans": scans })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::decoder::encode::encode_battle;
    use crate::pda::ProgramIds;
    use crate::reconciler::Reconciler;
    use crate::sync::SyncSettings;
    use crate::testing::{
        battle_record, test_tier, FixedPrice, MemoryAccounts, RecordingFinalizer,
        RecordingNotifier,
    };
    use std::collections::HashMap;
    use std::time::Duration;

    const SECRET: &str = "hunter2";

    async fn spawn_server() -> (String, Arc<MemoryAccounts>, ProgramIds, CancellationToken) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let reconciler = Arc::new(Reconciler::new(
            db,
            notifier.clone(),
            HashMap::from([(Network::Devnet, test_tier())]),
            Duration::from_secs(5),
        ));
        let ids = ProgramIds {
            battle: Pubkey::new_unique(),
            launch: Pubkey::new_unique(),
        };
        let accounts = Arc::new(MemoryAccounts::default());
        let price = Arc::new(FixedPrice(Some(100_000_000)));
        let sync = Arc::new(SyncOrchestrator::new(
            accounts.clone(),
            reconciler.clone(),
            price.clone(),
            HashMap::from([(Network::Devnet, ids)]),
            SyncSettings {
                concurrency: 2,
                price_timeout: Duration::from_secs(1),
                retry_attempts: 1,
                retry_backoff: Duration::from_millis(1),
                scan_program_accounts: true,
            },
        ));
        let battles = Arc::new(BattleEngine::new(
            reconciler,
            price,
            Arc::new(RecordingFinalizer::default()),
            notifier,
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let shutdown = CancellationToken::new();
        let state = AppState {
            sync,
            battles,
            default_network: Network::Devnet,
            secret: Some(SECRET.to_string()),
            max_batch_events: 2,
            shutdown: shutdown.clone(),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, router(state))
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .unwrap();
        });
        (format!("http://{}", addr), accounts, ids, shutdown)
    }

    #[tokio::test]
    async fn test_endpoints() {
        let (base, accounts, ids, shutdown) = spawn_server().await;
        let client = reqwest::Client::new();

        let health: Value = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["networks"], json!(["devnet"]));

        let unauthorized = client
            .post(format!("{}/webhooks/events", base))
            .json(&json!([{"signature": "s"}]))
            .send()
            .await
            .unwrap();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

        let too_many = client
            .post(format!("{}/webhooks/events", base))
            .bearer_auth(SECRET)
            .json(&json!([{"signature": "a"}, {"signature": "b"}, {"signature": "c"}]))
            .send()
            .await
            .unwrap();
        assert_eq!(too_many.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let missing = client
            .post(format!("{}/admin/resync", base))
            .bearer_auth(SECRET)
            .json(&json!({"mint": Pubkey::new_unique().to_string()}))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let body: Value = missing.json().await.unwrap();
        assert_eq!(body["error"], "not_found");

        let mint = Pubkey::new_unique();
        let record = battle_record(mint, BattleStatus::Created, 10, 0);
        accounts.put(Network::Devnet, ids.battle_state(&mint), encode_battle(&record), 1);
        let webhook: Value = client
            .post(format!("{}/webhooks/events?network=devnet", base))
            .bearer_auth(SECRET)
            .json(&json!([{"signature": "s", "tokenTransfers": [{"mint": mint.to_string()}]}]))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(webhook["success"], true);
        assert_eq!(webhook["report"]["inserted"], 1);

        let created: Vec<Value> = client
            .get(format!("{}/battles?status=0", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0]["mint"], mint.to_string());

        let bad_network = client
            .post(format!("{}/admin/resync", base))
            .bearer_auth(SECRET)
            .json(&json!({"mint": mint.to_string(), "network": "testnet"}))
            .send()
            .await
            .unwrap();
        assert_eq!(bad_network.status(), StatusCode::BAD_REQUEST);

        let premature = client
            .post(format!("{}/battles/complete-listing", base))
            .bearer_auth(SECRET)
            .json(&json!({"mint": mint.to_string()}))
            .send()
            .await
            .unwrap();
        assert_eq!(premature.status(), StatusCode::CONFLICT);
        let body: Value = premature.json().await.unwrap();
        assert_eq!(body["error"], "wrong_status");

        shutdown.cancel();
    }
}
