//! HTTP surface: the reconciliation gateway plus the ledger and
//! market-data routes.
//!
//! The calculate endpoint re-runs the one shared projector and tags the
//! result with an audit id; it never writes to the ledger. Ledger writes
//! state their intent explicitly: `POST /balances` posts a delta,
//! `POST /balances/set` is the admin absolute overwrite.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::{
    next_eligible_cycle, CycleEntry, CycleSchedule, EngineError, ProjectionStage, ProjectionTotals,
    ProjectorConfig,
};
use crate::ledger::{
    Balance, LedgerError, LedgerStore, LedgerTransaction, TransactionKind, TransactionStatus,
};
use crate::market::MarketDataCache;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ledger: LedgerStore,
    pub schedule: Arc<CycleSchedule>,
    pub projector: ProjectorConfig,
    pub market: Arc<MarketDataCache>,
    pub http: reqwest::Client,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/market-data", get(get_market_data))
        .route("/api/investments/calculate", post(post_calculate))
        .route("/api/investments/preview", get(get_preview))
        .route("/balances", get(get_balances).post(post_balance_delta))
        .route("/balances/set", post(post_balance_set))
        .route("/transactions", get(get_transactions).post(post_transaction))
        .route("/transactions/:id/status", post(post_transaction_status))
        .with_state(state)
}

// ===== Route Handlers =====

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_market_data(State(state): State<AppState>) -> Json<crate::market::MarketData> {
    Json(state.market.get_or_fetch(&state.http).await)
}

/// Authoritative recomputation of a client-side projection.
async fn post_calculate(
    State(state): State<AppState>,
    Json(req): Json<CalculateRequest>,
) -> Result<Json<CalculateResponse>, ApiError> {
    let reinvest_percent = validate_calculate(&state.projector, &req)?;
    let projection = state
        .projector
        .project(req.initial_investment, req.cycles, reinvest_percent)?;

    let calculation_id = format!("calc_{}", Uuid::new_v4().simple());
    tracing::info!(
        calculation_id = %calculation_id,
        initial_investment = req.initial_investment,
        cycles = req.cycles,
        reinvestment_enabled = req.reinvestment_enabled,
        reinvestment_percentage = req.reinvestment_percentage,
        final_value = projection.totals.final_value,
        "authoritative projection computed"
    );

    Ok(Json(CalculateResponse {
        success: true,
        calculation_id,
        data: CalculateData {
            input: req,
            stages: projection.stages,
            totals: projection.totals,
        },
    }))
}

/// Dashboard profitability preview: eligible cycles from an activation
/// timestamp, compounded through the rest of the schedule.
async fn get_preview(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let activation = parse_activation(&query.activation_date)?;
    let preview = state
        .projector
        .preview_profit(query.amount, activation, &state.schedule)?;
    let next_cycle = next_eligible_cycle(activation, &state.schedule).copied();

    Ok(Json(PreviewResponse {
        eligible_cycles: preview.eligible_cycles,
        total_balance: preview.total_balance,
        profit: preview.profit,
        next_cycle,
    }))
}

async fn get_balances(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<Balance>>, ApiError> {
    let balances = match query.user_id.as_deref() {
        Some(user_id) => state.ledger.get_balances(user_id).await?,
        None => state.ledger.list_balances(500).await?,
    };
    Ok(Json(balances))
}

/// Delta-based balance adjustment: the caller supplies the change, not the
/// resulting amount, so concurrent writers cannot erase each other.
async fn post_balance_delta(
    State(state): State<AppState>,
    Json(req): Json<BalanceDeltaRequest>,
) -> Result<(StatusCode, Json<BalanceAmountResponse>), ApiError> {
    let amount = state
        .ledger
        .post_delta(&req.user_id, &req.currency, req.delta)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(BalanceAmountResponse {
            user_id: req.user_id,
            currency: req.currency,
            amount,
        }),
    ))
}

/// Admin absolute overwrite. Reconciliation will flag the balance until a
/// matching transaction documents the adjustment.
async fn post_balance_set(
    State(state): State<AppState>,
    Json(req): Json<BalanceSetRequest>,
) -> Result<(StatusCode, Json<BalanceAmountResponse>), ApiError> {
    let amount = state
        .ledger
        .set_absolute(&req.user_id, &req.currency, req.amount)
        .await?;
    tracing::info!(
        user_id = %req.user_id,
        currency = %req.currency,
        amount,
        "balance overwritten by admin request"
    );
    Ok((
        StatusCode::CREATED,
        Json(BalanceAmountResponse {
            user_id: req.user_id,
            currency: req.currency,
            amount,
        }),
    ))
}

async fn get_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionListQuery>,
) -> Result<Json<Vec<LedgerTransaction>>, ApiError> {
    let transactions = state
        .ledger
        .list_transactions(query.user_id.as_deref(), query.limit.unwrap_or(100))
        .await?;
    Ok(Json(transactions))
}

async fn post_transaction(
    State(state): State<AppState>,
    Json(req): Json<TransactionRequest>,
) -> Result<(StatusCode, Json<LedgerTransaction>), ApiError> {
    let tx = state
        .ledger
        .record_transaction(
            &req.user_id,
            req.kind,
            req.currency.as_deref().unwrap_or("USD"),
            req.amount,
            req.status.unwrap_or(TransactionStatus::Pending),
            req.comment.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// Record an externally-decided settlement of a pending transaction.
async fn post_transaction_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<LedgerTransaction>, ApiError> {
    let tx = state.ledger.update_status(&id, req.status).await?;
    Ok(Json(tx))
}

// ===== Request/Response Types =====

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CalculateRequest {
    pub initial_investment: f64,
    pub cycles: u32,
    pub reinvestment_enabled: bool,
    pub reinvestment_percentage: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CalculateResponse {
    success: bool,
    calculation_id: String,
    data: CalculateData,
}

#[derive(Debug, Serialize)]
struct CalculateData {
    input: CalculateRequest,
    stages: Vec<ProjectionStage>,
    #[serde(flatten)]
    totals: ProjectionTotals,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewQuery {
    amount: f64,
    activation_date: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PreviewResponse {
    eligible_cycles: usize,
    total_balance: f64,
    profit: f64,
    next_cycle: Option<CycleEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnerQuery {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BalanceDeltaRequest {
    user_id: String,
    currency: String,
    delta: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BalanceSetRequest {
    user_id: String,
    currency: String,
    amount: f64,
}

#[derive(Debug, Serialize)]
struct BalanceAmountResponse {
    user_id: String,
    currency: String,
    amount: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionListQuery {
    user_id: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TransactionRequest {
    user_id: String,
    #[serde(rename = "type")]
    kind: TransactionKind,
    currency: Option<String>,
    amount: f64,
    status: Option<TransactionStatus>,
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatusRequest {
    status: TransactionStatus,
}

// ===== Validation helpers =====

/// Gateway bounds for the calculate endpoint. The engine allows zero
/// cycles; the HTTP contract requires at least one.
fn validate_calculate(
    projector: &ProjectorConfig,
    req: &CalculateRequest,
) -> Result<f64, ApiError> {
    if req.cycles < 1 {
        return Err(ApiError::Validation {
            field: "cycles",
            message: format!("cycle count must be between 1 and {}", projector.max_cycles),
        });
    }
    projector.validate(
        req.initial_investment,
        req.cycles,
        req.reinvestment_percentage,
    )?;
    Ok(if req.reinvestment_enabled {
        req.reinvestment_percentage
    } else {
        0.0
    })
}

fn parse_activation(raw: &str) -> Result<NaiveDateTime, ApiError> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    Err(ApiError::Validation {
        field: "activationDate",
        message: format!("expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS, got {raw:?}"),
    })
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    Validation {
        field: &'static str,
        message: String,
    },
    Conflict(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation { field, message } => ApiError::Validation { field, message },
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds { .. } => ApiError::Conflict(err.to_string()),
            LedgerError::InvalidStatusTransition { .. } => ApiError::Conflict(err.to_string()),
            LedgerError::TransactionNotFound(_) => ApiError::NotFound(err.to_string()),
            LedgerError::InvalidAmount(message) => ApiError::Validation {
                field: "amount",
                message,
            },
            LedgerError::Malformed(_) => ApiError::Internal(anyhow::Error::new(err)),
            LedgerError::Storage(e) => ApiError::Internal(e.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("invalid {field}: {message}"), "field": field }),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculate_request(amount: f64, cycles: u32) -> CalculateRequest {
        CalculateRequest {
            initial_investment: amount,
            cycles,
            reinvestment_enabled: true,
            reinvestment_percentage: 100.0,
        }
    }

    #[test]
    fn below_minimum_amount_names_the_amount_field() {
        let err = validate_calculate(&ProjectorConfig::default(), &calculate_request(50.0, 3))
            .unwrap_err();
        match err {
            ApiError::Validation { field, .. } => assert_eq!(field, "initialInvestment"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn gateway_requires_at_least_one_cycle() {
        let err = validate_calculate(&ProjectorConfig::default(), &calculate_request(1_000.0, 0))
            .unwrap_err();
        match err {
            ApiError::Validation { field, .. } => assert_eq!(field, "cycles"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn disabled_reinvestment_projects_at_zero_percent() {
        let mut req = calculate_request(1_000.0, 3);
        req.reinvestment_enabled = false;
        req.reinvestment_percentage = 80.0;
        let effective = validate_calculate(&ProjectorConfig::default(), &req).unwrap();
        assert_eq!(effective, 0.0);
    }

    #[test]
    fn disabled_reinvestment_still_validates_the_percentage() {
        let mut req = calculate_request(1_000.0, 3);
        req.reinvestment_enabled = false;
        req.reinvestment_percentage = 150.0;
        assert!(validate_calculate(&ProjectorConfig::default(), &req).is_err());
    }

    #[test]
    fn unknown_request_fields_are_rejected() {
        let raw = r#"{
            "initialInvestment": 1000,
            "cycles": 3,
            "reinvestmentEnabled": true,
            "reinvestmentPercentage": 100,
            "adminOverride": true
        }"#;
        assert!(serde_json::from_str::<CalculateRequest>(raw).is_err());
    }

    #[test]
    fn activation_date_accepts_date_and_datetime() {
        let midnight = parse_activation("2026-02-10").unwrap();
        assert_eq!(midnight.time(), NaiveTime::MIN);

        let exact = parse_activation("2026-02-15T00:00:00").unwrap();
        assert_eq!(exact.date().to_string(), "2026-02-15");

        assert!(parse_activation("15.02.2026").is_err());
        assert!(parse_activation("not-a-date").is_err());
    }

    #[test]
    fn ledger_errors_map_to_conflict_and_not_found() {
        let err: ApiError = LedgerError::InsufficientFunds {
            currency: "USD".into(),
            balance: 10.0,
            delta: -20.0,
        }
        .into();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err: ApiError = LedgerError::TransactionNotFound("tx1".into()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
