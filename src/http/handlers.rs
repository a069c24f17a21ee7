//! Request handlers.
//!
//! Thin adapters: parse the body, build a signer if the call needs one, call
//! the service, wrap the result in the envelope.

use alloy::primitives::TxHash;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::blockchain::types::{unix_now, TxStatus};
use crate::blockchain::wallet::{KeyMaterial, LocalKeySigner, TransactionSigner};
use crate::http::response::{chain_status, ApiError, ApiResponse};
use crate::http::server::AppState;
use crate::withdrawals::service::{WarehouseRequest, WithdrawalRequest};

/// ETH amount given either as a JSON string or a JSON number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    fn into_string(self) -> String {
        match self {
            AmountInput::Text(s) => s,
            AmountInput::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateNonceBody {
    pub address: String,
    pub nonce: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransactionBody {
    pub from_address: String,
    pub to_address: String,
    pub amount_eth: AmountInput,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteWithdrawalBody {
    pub from_address: String,
    pub to_address: String,
    pub amount_eth: AmountInput,
    pub private_key: KeyMaterial,
    #[serde(default = "default_true")]
    pub wait_for_confirmation: bool,
    pub nonce: Option<u64>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct WarehouseWithdrawalBody {
    pub source_address: String,
    pub warehouse_address: Option<String>,
    pub destination_address: String,
    pub amount_eth: AmountInput,
    pub private_key: KeyMaterial,
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Deserialize)]
pub struct SignerBody {
    pub private_key: KeyMaterial,
}

fn default_true() -> bool {
    true
}

fn signer_from(key: KeyMaterial) -> Result<LocalKeySigner, ApiError> {
    LocalKeySigner::from_private_key(key).map_err(ApiError::from)
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub connected: bool,
    pub timestamp: u64,
}

pub async fn health(State(state): State<AppState>) -> Response {
    let connected = state.service.health().await;
    let body = HealthBody {
        status: if connected { "healthy" } else { "unhealthy" },
        connected,
        timestamp: unix_now(),
    };
    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

pub async fn get_nonce(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Response, ApiError> {
    let report = state.service.get_nonce(&address).await?;
    Ok(ApiResponse::ok(report).into_response())
}

pub async fn validate_nonce(
    State(state): State<AppState>,
    Json(body): Json<ValidateNonceBody>,
) -> Result<Response, ApiError> {
    let validation = state.service.validate_nonce(&body.address, body.nonce).await?;
    Ok(ApiResponse::ok(validation).into_response())
}

pub async fn create_transaction(
    State(state): State<AppState>,
    Json(body): Json<CreateTransactionBody>,
) -> Result<Response, ApiError> {
    let summary = state
        .service
        .create_transaction(
            &body.from_address,
            &body.to_address,
            &body.amount_eth.into_string(),
        )
        .await?;
    Ok(ApiResponse::ok(summary).into_response())
}

pub async fn execute_withdrawal(
    State(state): State<AppState>,
    Json(body): Json<ExecuteWithdrawalBody>,
) -> Result<Response, ApiError> {
    let signer = signer_from(body.private_key)?;
    let request = WithdrawalRequest {
        from: body.from_address,
        to: body.to_address,
        amount_eth: body.amount_eth.into_string(),
        nonce: body.nonce,
        wait_for_confirmation: body.wait_for_confirmation,
        timeout: body.timeout_secs.map(Duration::from_secs),
    };

    let outcome = state.service.execute_withdrawal(request, &signer).await?;
    drop(signer);

    let status = match outcome.record.outcome_error() {
        Some(err) => chain_status(&err),
        None => StatusCode::OK,
    };
    let body = match outcome.error.clone() {
        Some(error) if outcome.record.status() != TxStatus::Confirmed => {
            ApiResponse::failed(outcome, error)
        }
        _ => ApiResponse::ok(outcome),
    };
    Ok((status, Json(body)).into_response())
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(hash): Path<TxHash>,
) -> Result<Response, ApiError> {
    let record = state.service.get_transaction(hash).await?;
    Ok(ApiResponse::ok(record).into_response())
}

#[derive(Debug, Serialize)]
struct Reconciled<T: Serialize> {
    outcome: crate::blockchain::tracker::ReconcileOutcome,
    #[serde(flatten)]
    subject: T,
}

pub async fn reconcile_transaction(
    State(state): State<AppState>,
    Path(hash): Path<TxHash>,
) -> Result<Response, ApiError> {
    let (record, outcome) = state.service.reconcile_transaction(hash).await?;
    Ok(ApiResponse::ok(Reconciled {
        outcome,
        subject: record,
    })
    .into_response())
}

pub async fn speed_up(
    State(state): State<AppState>,
    Path(hash): Path<TxHash>,
    Json(body): Json<SignerBody>,
) -> Result<Response, ApiError> {
    let signer = signer_from(body.private_key)?;
    let record = state.service.speed_up(hash, &signer).await?;
    Ok(ApiResponse::ok(record).into_response())
}

pub async fn create_warehouse_withdrawal(
    State(state): State<AppState>,
    Json(body): Json<WarehouseWithdrawalBody>,
) -> Result<Response, ApiError> {
    let signer: Arc<dyn TransactionSigner> = Arc::new(signer_from(body.private_key)?);
    let wait = body.wait;
    let request = WarehouseRequest {
        source: body.source_address,
        warehouse: body.warehouse_address,
        destination: body.destination_address,
        amount_eth: body.amount_eth.into_string(),
        wait,
    };

    let job = state
        .service
        .execute_warehouse_withdrawal(request, signer)
        .await?;
    let status = if wait {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(ApiResponse::ok(job))).into_response())
}

pub async fn list_warehouse_withdrawals(State(state): State<AppState>) -> Response {
    ApiResponse::ok(state.service.list_jobs()).into_response()
}

pub async fn get_warehouse_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let job = state.service.get_job(id)?;
    Ok(ApiResponse::ok(job).into_response())
}

pub async fn resume_warehouse_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SignerBody>,
) -> Result<Response, ApiError> {
    let signer = signer_from(body.private_key)?;
    let job = state.service.resume_job(id, &signer).await?;
    Ok(ApiResponse::ok(job).into_response())
}

pub async fn reconcile_warehouse_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let (job, outcome) = state.service.reconcile_job(id).await?;
    Ok(ApiResponse::ok(Reconciled {
        outcome,
        subject: job,
    })
    .into_response())
}

pub async fn cancel_warehouse_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let job = state.service.cancel_job(id).await?;
    Ok(ApiResponse::ok(job).into_response())
}

pub async fn not_found() -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        message: "Endpoint not found".to_string(),
    }
}
