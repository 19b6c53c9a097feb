//! The HTTP front.
//!
//! Every response carries the protocol headers (`X-Zold-Version`,
//! `X-Zold-Protocol`, `X-Zold-Score`) plus CORS and no-cache headers. A
//! pre-request gate honors the `?halt=<secret>` shutdown parameter,
//! rejects mismatched network/protocol headers, and validates any
//! `X-Zold-Score` header — registering its sender as a known remote when
//! the score is strong enough.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::get;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use zold_core::constants::PROTOCOL;
use zold_core::error::WalletError;
use zold_core::id::Id;
use zold_core::txn::iso8601;
use zold_farm::Score;

use crate::entrance::PushSource;
use crate::error::NodeError;
use crate::node::NodeContext;

/// Peer scores below this value do not register their sender as a remote.
const MIN_REGISTER_SCORE: usize = 3;

// ── Error mapping ────────────────────────────────────────────────────────────

enum FrontError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for FrontError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            Self::Internal(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, msg).into_response()
            }
        }
    }
}

impl From<WalletError> for FrontError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::NotFound(_) => Self::NotFound(e.to_string()),
            WalletError::BadNetwork(_)
            | WalletError::NetworkMismatch { .. }
            | WalletError::ProtocolMismatch { .. }
            | WalletError::IdMismatch { .. }
            | WalletError::Malformed(_)
            | WalletError::DuplicateTxn { .. }
            | WalletError::DuplicateTax(_)
            | WalletError::Txn(_)
            | WalletError::Id(_) => Self::BadRequest(e.to_string()),
            other => Self::Internal(format!("{other:?}")),
        }
    }
}

impl From<NodeError> for FrontError {
    fn from(e: NodeError) -> Self {
        match e {
            NodeError::Wallet(w) => w.into(),
            NodeError::Score(s) => Self::BadRequest(s.to_string()),
            other => Self::Internal(format!("{other:?}")),
        }
    }
}

type FrontResult<T> = Result<T, FrontError>;

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the full route table over a node context.
pub fn router(ctx: Arc<NodeContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(status))
        .route("/version", get(version))
        .route("/pid", get(pid))
        .route("/score", get(score))
        .route("/remotes", get(remotes))
        .route("/farm", get(farm))
        .route("/metronome", get(metronome))
        .route("/robots.txt", get(robots))
        .route("/favicon.ico", get(favicon))
        .route("/wallet/{id}", get(wallet_get).put(wallet_put))
        .route("/wallet/{id}/balance", get(wallet_balance))
        .route("/wallet/{id}/key", get(wallet_key))
        .route("/wallet/{id}/mtime", get(wallet_mtime))
        .route("/wallet/{id}/digest", get(wallet_digest))
        .layer(middleware::from_fn_with_state(ctx.clone(), gate))
        .layer(cors)
        .with_state(ctx)
}

/// Serve the front until shutdown is requested.
pub async fn serve(
    ctx: Arc<NodeContext>,
    listener: tokio::net::TcpListener,
) -> std::io::Result<()> {
    let app = router(ctx.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { ctx.wait_shutdown().await })
        .await
}

// ── Pre-request gate and response headers ────────────────────────────────────

async fn gate(
    State(ctx): State<Arc<NodeContext>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(query) = request.uri().query() {
        for pair in query.split('&') {
            if let Some(code) = pair.strip_prefix("halt=") {
                if ctx.cfg.halt_code.as_deref() == Some(code) {
                    info!("halt code matched, shutting down");
                    ctx.request_shutdown();
                    return stamped(ctx, (StatusCode::OK, "halting").into_response());
                }
                return stamped(
                    ctx,
                    (StatusCode::BAD_REQUEST, "wrong halt code").into_response(),
                );
            }
        }
    }
    if let Some(rejection) = check_headers(&ctx, request.headers()) {
        return stamped(ctx, rejection);
    }
    let response = next.run(request).await;
    stamped(ctx, response)
}

/// Validate the `X-Zold-*` request headers; `Some` is a 400 rejection.
fn check_headers(ctx: &NodeContext, headers: &HeaderMap) -> Option<Response> {
    let reject =
        |msg: String| Some((StatusCode::BAD_REQUEST, msg).into_response());
    if let Some(network) = headers.get("X-Zold-Network") {
        if network.to_str().ok() != Some(ctx.cfg.network.as_str()) {
            return reject(format!(
                "this node is in the {:?} network",
                ctx.cfg.network
            ));
        }
    }
    if let Some(protocol) = headers.get("X-Zold-Protocol") {
        if protocol.to_str().ok() != Some(PROTOCOL.to_string().as_str()) {
            return reject(format!("this node speaks protocol {PROTOCOL}"));
        }
    }
    if let Some(header) = headers.get("X-Zold-Score") {
        let Ok(text) = header.to_str() else {
            return reject("the score header is not text".to_string());
        };
        let score = match Score::parse_header(text) {
            Ok(score) => score,
            Err(e) => return reject(format!("invalid score header: {e}")),
        };
        if !score.valid() {
            return reject("the score does not add up".to_string());
        }
        if score.strength < ctx.cfg.strength && !ctx.cfg.ignore_score_weakness {
            return reject(format!(
                "the score strength {} is too weak, {} required",
                score.strength, ctx.cfg.strength
            ));
        }
        if score.value() > MIN_REGISTER_SCORE && !score.expired() {
            ctx.remotes.add(&score.host, score.port);
            ctx.remotes
                .rescore(&score.host, score.port, score.value() as u64);
        }
    }
    None
}

/// Attach the protocol response headers every route carries.
fn stamped(ctx: Arc<NodeContext>, mut response: Response) -> Response {
    let headers = response.headers_mut();
    let mut set = |name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    };
    set("X-Zold-Version", env!("CARGO_PKG_VERSION").to_string());
    set("X-Zold-Protocol", PROTOCOL.to_string());
    set("X-Zold-Score", ctx.best_score().to_header());
    set("Access-Control-Allow-Origin", "*".to_string());
    set("Cache-Control", "no-cache".to_string());
    set("Connection", "close".to_string());
    response
}

// ── Node routes ──────────────────────────────────────────────────────────────

async fn status(State(ctx): State<Arc<NodeContext>>) -> FrontResult<Json<serde_json::Value>> {
    let best = ctx.best_score();
    let nscore: u64 = ctx.remotes.all().iter().map(|r| r.score).sum();
    let wallets = ctx.wallets.count().map_err(FrontError::from)?;
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "network": ctx.cfg.network,
        "protocol": PROTOCOL,
        "score": best.to_string(),
        "pid": std::process::id(),
        "cpus": std::thread::available_parallelism().map_or(1, |n| n.get()),
        "threads": ctx.cfg.threads,
        "uptime": ctx.uptime().as_secs(),
        "wallets": wallets,
        "remotes": ctx.remotes.count(),
        "nscore": nscore,
        "farm": ctx.farm.to_json(),
        "entrance": ctx.entrance.to_json(),
        "metronome": ctx.metronome.lock().to_json(),
    })))
}

async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

async fn pid() -> String {
    std::process::id().to_string()
}

async fn score(State(ctx): State<Arc<NodeContext>>) -> String {
    ctx.best_score().to_string()
}

async fn remotes(State(ctx): State<Arc<NodeContext>>) -> Json<serde_json::Value> {
    let all: Vec<_> = ctx
        .remotes
        .all()
        .iter()
        .map(|r| {
            json!({
                "host": r.host,
                "port": r.port,
                "score": r.score,
                "errors": r.errors,
            })
        })
        .collect();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "all": all,
    }))
}

async fn farm(State(ctx): State<Arc<NodeContext>>) -> String {
    ctx.farm.to_text()
}

async fn metronome(State(ctx): State<Arc<NodeContext>>) -> String {
    ctx.metronome.lock().to_text()
}

async fn robots() -> &'static str {
    "User-agent: *"
}

async fn favicon(State(ctx): State<Arc<NodeContext>>) -> Redirect {
    let value = ctx.best_score().value();
    let color = if value >= 16 {
        "green"
    } else if value >= 4 {
        "orange"
    } else {
        "red"
    };
    Redirect::temporary(&format!("https://www.zold.io/images/logo-{color}.png"))
}

// ── Wallet routes ────────────────────────────────────────────────────────────

fn parse_id(raw: &str) -> FrontResult<Id> {
    raw.parse::<Id>()
        .map_err(|e| FrontError::BadRequest(e.to_string()))
}

/// Handle `/wallet/{id}`, `/wallet/{id}.json` and `/wallet/{id}.txt`.
async fn wallet_get(
    State(ctx): State<Arc<NodeContext>>,
    Path(raw): Path<String>,
) -> FrontResult<Response> {
    if let Some(stem) = raw.strip_suffix(".json") {
        return wallet_head(&ctx, parse_id(stem)?).map(IntoResponse::into_response);
    }
    if let Some(stem) = raw.strip_suffix(".txt") {
        return wallet_text(&ctx, parse_id(stem)?).map(IntoResponse::into_response);
    }
    let id = parse_id(&raw)?;
    let wallet = ctx.wallets.find(id);
    let body = wallet.body().map_err(FrontError::from)?;
    Ok(Json(json!({
        "id": id.to_string(),
        "network": body.network,
        "protocol": body.protocol,
        "score": ctx.best_score().to_string(),
        "mtime": iso8601(&wallet.mtime().map_err(FrontError::from)?),
        "digest": wallet.digest().map_err(FrontError::from)?,
        "balance": body.balance().map_err(FrontError::from)?.zents(),
        "txns": body.txns.len(),
        "body": body.render(),
    }))
    .into_response())
}

/// The header-only JSON view.
fn wallet_head(ctx: &NodeContext, id: Id) -> FrontResult<Json<serde_json::Value>> {
    let wallet = ctx.wallets.find(id);
    let body = wallet.body().map_err(FrontError::from)?;
    Ok(Json(json!({
        "id": id.to_string(),
        "network": body.network,
        "protocol": body.protocol,
        "key": body.key.to_text(),
        "balance": body.balance().map_err(FrontError::from)?.zents(),
        "txns": body.txns.len(),
    })))
}

/// The human-readable ledger dump.
fn wallet_text(ctx: &NodeContext, id: Id) -> FrontResult<String> {
    let wallet = ctx.wallets.find(id);
    let body = wallet.body().map_err(FrontError::from)?;
    let mut out = format!(
        "id: {}\nnetwork: {}\nprotocol: {}\nbalance: {}\n\n",
        id,
        body.network,
        body.protocol,
        body.balance().map_err(FrontError::from)?,
    );
    for txn in wallet.txns().map_err(FrontError::from)? {
        out.push_str(&format!(
            "#{:04x} {} {} {} {}\n",
            txn.id,
            iso8601(&txn.date),
            txn.amount,
            txn.bnf,
            txn.details,
        ));
    }
    Ok(out)
}

async fn wallet_balance(
    State(ctx): State<Arc<NodeContext>>,
    Path(raw): Path<String>,
) -> FrontResult<String> {
    let wallet = ctx.wallets.find(parse_id(&raw)?);
    Ok(wallet
        .balance()
        .map_err(FrontError::from)?
        .zents()
        .to_string())
}

async fn wallet_key(
    State(ctx): State<Arc<NodeContext>>,
    Path(raw): Path<String>,
) -> FrontResult<String> {
    let wallet = ctx.wallets.find(parse_id(&raw)?);
    Ok(wallet.key().map_err(FrontError::from)?.to_text())
}

async fn wallet_mtime(
    State(ctx): State<Arc<NodeContext>>,
    Path(raw): Path<String>,
) -> FrontResult<String> {
    let wallet = ctx.wallets.find(parse_id(&raw)?);
    Ok(iso8601(&wallet.mtime().map_err(FrontError::from)?))
}

async fn wallet_digest(
    State(ctx): State<Arc<NodeContext>>,
    Path(raw): Path<String>,
) -> FrontResult<String> {
    let wallet = ctx.wallets.find(parse_id(&raw)?);
    wallet.digest().map_err(FrontError::from)
}

/// PUT a wallet body: store a copy, merge, propagate.
async fn wallet_put(
    State(ctx): State<Arc<NodeContext>>,
    Path(raw): Path<String>,
    headers: HeaderMap,
    body: String,
) -> FrontResult<Response> {
    let id = parse_id(&raw)?;
    let source = headers
        .get("X-Zold-Score")
        .and_then(|h| h.to_str().ok())
        .and_then(|text| Score::parse_header(text).ok())
        .filter(Score::valid)
        .map(|score| PushSource {
            host: score.host.clone(),
            port: score.port,
            score: score.value() as u64,
        });
    let worker = ctx.clone();
    let modified = tokio::task::spawn_blocking(move || worker.entrance.push(id, &body, source))
        .await
        .map_err(|e| {
            warn!(error = %e, "push task failed");
            FrontError::Internal(e.to_string())
        })?
        .map_err(FrontError::from)?;
    if modified.is_empty() {
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }
    let ids: Vec<String> = modified.iter().map(Id::to_string).collect();
    Ok((
        StatusCode::OK,
        Json(json!({
            "id": id.to_string(),
            "modified": ids,
            "score": ctx.best_score().to_string(),
        })),
    )
        .into_response())
}
