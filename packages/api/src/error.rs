use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::models::MatchState;
use shared::services::errors::{
    match_service_errors::MatchServiceError, ticket_service_errors::TicketServiceError,
};
use tracing::{error, warn};

#[derive(Debug)]
pub enum ApiError {
    TicketService(TicketServiceError),
    MatchService(MatchServiceError),
    MissingPlayer,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<MatchState>,
}

impl ErrorResponse {
    fn message(error: impl ToString) -> Self {
        ErrorResponse {
            error: error.to_string(),
            reason: None,
            state: None,
        }
    }
}

impl From<TicketServiceError> for ApiError {
    fn from(error: TicketServiceError) -> Self {
        ApiError::TicketService(error)
    }
}

impl From<MatchServiceError> for ApiError {
    fn from(error: MatchServiceError) -> Self {
        ApiError::MatchService(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::MissingPlayer => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::message("Missing x-player-id header"),
            ),

            ApiError::TicketService(e @ TicketServiceError::NotFound) => {
                (StatusCode::NOT_FOUND, ErrorResponse::message(e))
            }
            ApiError::TicketService(TicketServiceError::Conflict(reason)) => {
                warn!("Ticket conflict: {}", reason);
                (
                    StatusCode::CONFLICT,
                    ErrorResponse {
                        error: "Conflict".to_string(),
                        reason: Some(reason),
                        state: None,
                    },
                )
            }
            ApiError::TicketService(e @ TicketServiceError::ValidationError(_)) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::message(e))
            }
            ApiError::TicketService(e @ TicketServiceError::Unavailable(_)) => {
                error!("{}", e);
                (StatusCode::SERVICE_UNAVAILABLE, ErrorResponse::message(e))
            }

            ApiError::MatchService(e @ (MatchServiceError::NotFound | MatchServiceError::Forbidden)) => {
                let status = match e {
                    MatchServiceError::NotFound => StatusCode::NOT_FOUND,
                    _ => StatusCode::FORBIDDEN,
                };
                (status, ErrorResponse::message(e))
            }
            ApiError::MatchService(MatchServiceError::Conflict(conflict)) => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: "Conflict".to_string(),
                    reason: Some(conflict.reason.to_string()),
                    state: Some(conflict.state),
                },
            ),
            ApiError::MatchService(e @ MatchServiceError::InvalidMove(_)) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::message(e))
            }
            ApiError::MatchService(e @ MatchServiceError::Unavailable(_)) => {
                error!("{}", e);
                (StatusCode::SERVICE_UNAVAILABLE, ErrorResponse::message(e))
            }
        };

        (status, Json(body)).into_response()
    }
}
