use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::{QuantityDelta, StockKey};
use tower::ServiceBuilder;
use crate::error::InventoryError;
use crate::low_stock::{LowStockItem, LowStockMode};
use crate::merge::{CompactionOutcome, MergeSummary};
use crate::service::InventoryService;
use crate::storage::AppendOutcome;
use crate::view::EffectivePosition;

#[derive(Clone)]
pub struct AppState {
    pub service: InventoryService,
}

#[derive(Debug, Deserialize)]
pub struct AppendDeltaRequest {
    pub quantity_on_hand_delta: i64,
    #[serde(default)]
    pub allocated_quantity_delta: i64,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppendDeltaResponse {
    pub entry_id: Option<i64>,
    pub duplicate: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterCounterRequest {
    #[serde(default)]
    pub initial_quantity_on_hand: i64,
    #[serde(default)]
    pub reorder_minimum: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterCounterResponse {
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct CompactionResponse {
    pub outcome: &'static str,
    pub summary: Option<MergeSummary>,
}

#[derive(Debug, Deserialize)]
pub struct LowStockQuery {
    pub threshold: i64,
    #[serde(default)]
    pub mode: LowStockMode,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: InventoryError) -> ApiError {
    let status = match &e {
        InventoryError::QuantityOverflow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        InventoryError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        InventoryError::LockLost { .. } => StatusCode::CONFLICT,
        InventoryError::DataIntegrity(_) | InventoryError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!("Request failed: {}", e);
    (status, Json(ErrorResponse { error: e.to_string() }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/inventory/low-stock", get(find_low_stock))
        .route("/inventory/reorder", get(find_reorder_candidates))
        .route("/inventory/:sku/:warehouse", get(get_position).put(register_counter))
        .route("/inventory/:sku/:warehouse/deltas", post(append_delta))
        .route("/inventory/:sku/:warehouse/compaction", post(trigger_compaction))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new().layer(
                tower_http::cors::CorsLayer::new()
                    .allow_origin(tower_http::cors::Any)
                    .allow_methods(tower_http::cors::Any)
                    .allow_headers(tower_http::cors::Any),
            ),
        )
}

pub async fn append_delta(
    State(state): State<AppState>,
    Path((sku, warehouse)): Path<(String, i32)>,
    Json(request): Json<AppendDeltaRequest>,
) -> Result<Json<AppendDeltaResponse>, ApiError> {
    let key = StockKey::new(sku, warehouse);
    let delta = QuantityDelta::new(request.quantity_on_hand_delta, request.allocated_quantity_delta);

    let response = match request.idempotency_key {
        Some(token) => match state.service.append_delta_once(&token, &key, delta).await.map_err(api_error)? {
            AppendOutcome::Appended(id) => AppendDeltaResponse { entry_id: Some(id), duplicate: false },
            AppendOutcome::Duplicate => AppendDeltaResponse { entry_id: None, duplicate: true },
        },
        None => {
            let id = state.service.append_delta(&key, delta).await.map_err(api_error)?;
            AppendDeltaResponse { entry_id: Some(id), duplicate: false }
        }
    };
    Ok(Json(response))
}

pub async fn get_position(
    State(state): State<AppState>,
    Path((sku, warehouse)): Path<(String, i32)>,
) -> Result<Json<EffectivePosition>, ApiError> {
    let key = StockKey::new(sku, warehouse);
    let position = state.service.get_effective_position(&key).await.map_err(api_error)?;
    Ok(Json(position))
}

pub async fn register_counter(
    State(state): State<AppState>,
    Path((sku, warehouse)): Path<(String, i32)>,
    Json(request): Json<RegisterCounterRequest>,
) -> Result<Json<RegisterCounterResponse>, ApiError> {
    let key = StockKey::new(sku, warehouse);
    let created = state
        .service
        .register_counter(&key, request.initial_quantity_on_hand, request.reorder_minimum)
        .await
        .map_err(api_error)?;
    if created {
        tracing::info!("Registered counter {}", key);
    }
    Ok(Json(RegisterCounterResponse { created }))
}

pub async fn trigger_compaction(
    State(state): State<AppState>,
    Path((sku, warehouse)): Path<(String, i32)>,
) -> Result<Json<CompactionResponse>, ApiError> {
    let key = StockKey::new(sku, warehouse);
    let response = match state.service.trigger_compaction(&key).await.map_err(api_error)? {
        CompactionOutcome::Merged(summary) => CompactionResponse { outcome: "done", summary: Some(summary) },
        CompactionOutcome::NothingToMerge => CompactionResponse { outcome: "empty", summary: None },
        CompactionOutcome::Busy => CompactionResponse { outcome: "busy", summary: None },
    };
    Ok(Json(response))
}

pub async fn find_low_stock(
    State(state): State<AppState>,
    Query(query): Query<LowStockQuery>,
) -> Result<Json<Vec<LowStockItem>>, ApiError> {
    let items = state
        .service
        .find_low_stock(query.threshold, query.mode)
        .await
        .map_err(api_error)?;
    Ok(Json(items))
}

pub async fn find_reorder_candidates(
    State(state): State<AppState>,
) -> Result<Json<Vec<LowStockItem>>, ApiError> {
    let items = state.service.find_below_reorder_minimum().await.map_err(api_error)?;
    Ok(Json(items))
}

pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let service = InventoryService::new(Arc::new(MemoryStorage::new()), chrono::Duration::seconds(30), None).unwrap();
        create_router(AppState { service })
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn counter_contract_over_http() {
        let app = app();

        let (status, body) = call(
            &app,
            Method::PUT,
            "/inventory/A/1",
            Some(serde_json::json!({"initial_quantity_on_hand": 100, "reorder_minimum": 95})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], true);

        for qoh in [-5, -3, -2] {
            let (status, _) = call(
                &app,
                Method::POST,
                "/inventory/A/1/deltas",
                Some(serde_json::json!({"quantity_on_hand_delta": qoh})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (_, body) = call(&app, Method::GET, "/inventory/A/1", None).await;
        assert_eq!(body["quantity_on_hand"], 90);
        assert_eq!(body["pending_entries"], 3);

        let (_, body) = call(&app, Method::POST, "/inventory/A/1/compaction", None).await;
        assert_eq!(body["outcome"], "done");
        assert_eq!(body["summary"]["merged_entries"], 3);

        let (_, body) = call(&app, Method::POST, "/inventory/A/1/compaction", None).await;
        assert_eq!(body["outcome"], "empty");

        let (_, body) = call(&app, Method::GET, "/inventory/low-stock?threshold=91", None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["quantity_on_hand"], 90);

        let (_, body) = call(&app, Method::GET, "/inventory/reorder", None).await;
        assert_eq!(body[0]["sku_code"], "A");
    }

    #[tokio::test]
    async fn idempotency_key_deduplicates_appends() {
        let app = app();
        let request = serde_json::json!({"quantity_on_hand_delta": 4, "idempotency_key": "receipt-17"});

        let (_, first) = call(&app, Method::POST, "/inventory/B/2/deltas", Some(request.clone())).await;
        let (_, second) = call(&app, Method::POST, "/inventory/B/2/deltas", Some(request)).await;

        assert_eq!(first["duplicate"], false);
        assert_eq!(second["duplicate"], true);
        let (_, body) = call(&app, Method::GET, "/inventory/B/2", None).await;
        assert_eq!(body["quantity_on_hand"], 4);
    }
}
