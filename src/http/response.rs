//! Response envelope and error mapping.
//!
//! Every API response is `{success, data, error}`. Errors keep their full
//! message (address, nonce, tx hash) so an operator can reconcile by hand.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::blockchain::types::BlockchainError;
use crate::observability::metrics;
use crate::withdrawals::types::WithdrawalError;

/// JSON envelope shared by all endpoints.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed operation that still has data worth returning.
    pub fn failed(data: T, error: String) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(error),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Error returned from handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::record_api_error(self.status.as_u16());
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), error = %self.message, "Request failed");
        } else {
            tracing::warn!(status = self.status.as_u16(), error = %self.message, "Request rejected");
        }

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

/// HTTP status for a chain-layer error.
pub fn chain_status(err: &BlockchainError) -> StatusCode {
    match err {
        BlockchainError::InvalidAddress(_)
        | BlockchainError::Resolution { .. }
        | BlockchainError::InvalidAmount(_)
        | BlockchainError::InsufficientBalance { .. }
        | BlockchainError::ChainMismatch { .. }
        | BlockchainError::GasEstimationFailed(_)
        | BlockchainError::Wallet(_)
        | BlockchainError::SignerMismatch { .. } => StatusCode::BAD_REQUEST,
        BlockchainError::NonceStale { .. } | BlockchainError::ReplacementRefused(_) => {
            StatusCode::CONFLICT
        }
        BlockchainError::ChainUnavailable { .. }
        | BlockchainError::SubmissionRejected { .. }
        | BlockchainError::Reverted { .. }
        | BlockchainError::FeeEstimationFailed(_)
        | BlockchainError::GasPriceTooHigh { .. } => StatusCode::BAD_GATEWAY,
        BlockchainError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl From<BlockchainError> for ApiError {
    fn from(err: BlockchainError) -> Self {
        Self {
            status: chain_status(&err),
            message: err.to_string(),
        }
    }
}

impl From<WithdrawalError> for ApiError {
    fn from(err: WithdrawalError) -> Self {
        let status = match &err {
            WithdrawalError::Chain(inner) => chain_status(inner),
            WithdrawalError::JobNotFound(_) | WithdrawalError::TransactionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            WithdrawalError::InvalidTransition { .. }
            | WithdrawalError::NeedsReconciliation { .. }
            | WithdrawalError::AlreadySubmitted { .. }
            | WithdrawalError::InsufficientClaimable { .. }
            | WithdrawalError::NothingToReconcile { .. }
            | WithdrawalError::JobBusy(_)
            | WithdrawalError::JobClosed { .. } => StatusCode::CONFLICT,
            WithdrawalError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}
