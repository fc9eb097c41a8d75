//! bitcoind-compatible JSON-RPC endpoint over the query facade.
//!
//! A single `POST /` route accepts `{"id", "method", "params"}` and replies
//! with `{"result", "error", "id"}`. Error codes follow the daemon's.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::blockchain::{BlockHash, Txid};
use crate::cache::TransactionCache;
use crate::error::{FacadeError, Result};
use crate::facade::{BlockVerbosity, QueryFacade};

pub const RPC_MISC_ERROR: i32 = -1;
pub const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;
pub const RPC_INVALID_PARAMETER: i32 = -8;
pub const RPC_IN_WARMUP: i32 = -28;
pub const RPC_METHOD_NOT_FOUND: i32 = -32601;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub facade: Arc<QueryFacade>,
    pub transactions: Option<TransactionCache>,
}

impl ApiState {
    pub fn new(facade: Arc<QueryFacade>) -> Self {
        Self {
            facade,
            transactions: None,
        }
    }

    pub fn with_transaction_cache(mut self, cache: TransactionCache) -> Self {
        self.transactions = Some(cache);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub result: Value,
    pub error: Option<RpcError>,
    pub id: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn block_not_found() -> Self {
        Self::new(RPC_INVALID_ADDRESS_OR_KEY, "Block not found")
    }

    fn empty_chain() -> Self {
        Self::new(RPC_IN_WARMUP, "Header chain is empty")
    }
}

impl From<FacadeError> for RpcError {
    fn from(err: FacadeError) -> Self {
        let code = match &err {
            FacadeError::InvalidParameter(_) => RPC_INVALID_PARAMETER,
            _ => RPC_MISC_ERROR,
        };
        Self::new(code, err.to_string())
    }
}

/// RPC method name, passed from the handler to the logging middleware.
#[derive(Clone)]
struct RpcMethod(String);

// ============================================================================
// Parameter helpers
// ============================================================================

fn param<T: DeserializeOwned>(params: &[Value], index: usize, name: &str) -> std::result::Result<T, RpcError> {
    optional_param(params, index, name)?.ok_or_else(|| {
        RpcError::new(RPC_INVALID_PARAMETER, format!("Missing parameter {}", name))
    })
}

fn optional_param<T: DeserializeOwned>(
    params: &[Value],
    index: usize,
    name: &str,
) -> std::result::Result<Option<T>, RpcError> {
    match params.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
            RpcError::new(RPC_INVALID_PARAMETER, format!("Invalid parameter {}: {}", name, e))
        }),
    }
}

/// Daemons accept both booleans and integers for verbosity flags.
fn verbosity_param(
    params: &[Value],
    index: usize,
    default: u8,
) -> std::result::Result<u8, RpcError> {
    match params.get(index) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(flag)) => Ok(u8::from(*flag)),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .ok_or_else(|| RpcError::new(RPC_INVALID_PARAMETER, "Invalid verbosity")),
        Some(_) => Err(RpcError::new(RPC_INVALID_PARAMETER, "Invalid verbosity")),
    }
}

fn to_value<T: Serialize>(value: &T) -> std::result::Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::from(FacadeError::from(e)))
}

// ============================================================================
// Dispatch
// ============================================================================

async fn dispatch(
    state: &ApiState,
    method: &str,
    params: &[Value],
) -> Option<std::result::Result<Value, RpcError>> {
    let facade = &state.facade;
    let outcome = match method {
        "getblock" => get_block(facade, params).await,
        "getblockheader" => get_block_header(facade, params).await,
        "getbestblockheader" => {
            let verbose = verbosity_param(params, 0, 1).map(|v| v != 0);
            match verbose {
                Ok(verbose) => match facade.get_best_block_header(verbose).await {
                    Ok(Some(header)) => to_value(&header),
                    Ok(None) => Err(RpcError::empty_chain()),
                    Err(e) => Err(e.into()),
                },
                Err(e) => Err(e),
            }
        }
        "getblockcount" => match facade.get_block_count().await {
            Ok(Some(count)) => Ok(Value::from(count)),
            Ok(None) => Err(RpcError::empty_chain()),
            Err(e) => Err(e.into()),
        },
        "getblockhash" => get_block_hash(facade, params).await,
        "getbestblockhash" => match facade.get_best_block_hash().await {
            Ok(Some(hash)) => to_value(&hash),
            Ok(None) => Err(RpcError::empty_chain()),
            Err(e) => Err(e.into()),
        },
        "getblockchaininfo" => match facade.get_blockchain_info().await {
            Ok(Some(info)) => to_value(&info),
            Ok(None) => Err(RpcError::empty_chain()),
            Err(e) => Err(e.into()),
        },
        "estimatefee" => match param::<u32>(params, 0, "nblocks") {
            Ok(blocks) => facade
                .estimate_fee(blocks)
                .await
                .map(Value::from)
                .map_err(RpcError::from),
            Err(e) => Err(e),
        },
        "getrawtransaction" => get_raw_transaction(state, params).await,
        _ => return None,
    };
    Some(outcome)
}

async fn get_block(facade: &QueryFacade, params: &[Value]) -> std::result::Result<Value, RpcError> {
    let hash: BlockHash = param(params, 0, "blockhash")?;
    let verbosity = BlockVerbosity::try_from(verbosity_param(params, 1, 1)?)?;
    match facade.get_block(&hash, verbosity).await? {
        Some(block) => to_value(&block),
        None => Err(RpcError::block_not_found()),
    }
}

async fn get_block_header(
    facade: &QueryFacade,
    params: &[Value],
) -> std::result::Result<Value, RpcError> {
    let hash: BlockHash = param(params, 0, "blockhash")?;
    let verbose = verbosity_param(params, 1, 1)? != 0;
    match facade.get_block_header(&hash, verbose).await? {
        Some(header) => to_value(&header),
        None => Err(RpcError::block_not_found()),
    }
}

async fn get_block_hash(
    facade: &QueryFacade,
    params: &[Value],
) -> std::result::Result<Value, RpcError> {
    let height: u32 = param(params, 0, "height")?;
    match facade.get_block_hash(height).await? {
        Some(hash) => to_value(&hash),
        None => Err(RpcError::new(RPC_INVALID_PARAMETER, "Block height out of range")),
    }
}

async fn get_raw_transaction(
    state: &ApiState,
    params: &[Value],
) -> std::result::Result<Value, RpcError> {
    let txid: Txid = param(params, 0, "txid")?;
    let verbose = verbosity_param(params, 1, 0)? != 0;

    let facade = state.facade.clone();
    let record = match &state.transactions {
        Some(cache) => {
            cache
                .get_or_resolve(&txid, verbose, || async move {
                    facade.get_raw_transaction(&txid, verbose).await
                })
                .await?
        }
        None => facade.get_raw_transaction(&txid, verbose).await?,
    };

    let not_found = || {
        RpcError::new(
            RPC_INVALID_ADDRESS_OR_KEY,
            "No such mempool or blockchain transaction",
        )
    };
    let record = record.ok_or_else(not_found)?;
    if verbose {
        to_value(&record)
    } else {
        record.rawtx.map(Value::String).ok_or_else(not_found)
    }
}

async fn handle_rpc(State(state): State<ApiState>, Json(request): Json<RpcRequest>) -> Response {
    debug!(method = %request.method, params = request.params.len(), "rpc call");

    let (status, result, error) = match dispatch(&state, &request.method, &request.params).await {
        Some(Ok(result)) => (StatusCode::OK, result, None),
        Some(Err(error)) => (StatusCode::INTERNAL_SERVER_ERROR, Value::Null, Some(error)),
        None => (
            StatusCode::NOT_FOUND,
            Value::Null,
            Some(RpcError::new(RPC_METHOD_NOT_FOUND, "Method not found")),
        ),
    };

    let mut response = (
        status,
        Json(RpcResponse {
            result,
            error,
            id: request.id,
        }),
    )
        .into_response();
    response.extensions_mut().insert(RpcMethod(request.method));
    response
}

async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let height = state.facade.get_block_count().await.ok().flatten();
    let status = if height.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if height.is_some() { "healthy" } else { "warming_up" },
            "height": height,
            "sources": state.facade.registry().len(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

// ============================================================================
// Middleware
// ============================================================================

/// Logs method, path, status, duration and the RPC method when there is one.
async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let duration = start.elapsed();
    let rpc_method = response
        .extensions()
        .get::<RpcMethod>()
        .map(|m| m.0.clone())
        .unwrap_or_else(|| "-".to_string());

    tracing::info!(
        method = %method,
        path = %path,
        rpc_method = %rpc_method,
        status = %response.status().as_u16(),
        duration_ms = %duration.as_millis(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the API router (also used by tests).
pub fn build_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}

pub async fn run_api_server(state: ApiState, addr: SocketAddr) -> Result<()> {
    let app = build_api_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("JSON-RPC server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
