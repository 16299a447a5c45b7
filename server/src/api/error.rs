use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use raffle_execution::RaffleError;
use serde::Serialize;
use tracing::error;

/// Seconds a client should wait before retrying a `busy` response.
const RETRY_AFTER_SECS: &str = "1";

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Failure of an HTTP handler.
#[derive(Debug)]
pub(super) enum ApiError {
    Raffle(RaffleError),
    ResultNotFound,
}

impl From<RaffleError> for ApiError {
    fn from(err: RaffleError) -> Self {
        ApiError::Raffle(err)
    }
}

fn status_for(err: &RaffleError) -> StatusCode {
    match err {
        RaffleError::LotteryLocked => StatusCode::FORBIDDEN,
        RaffleError::GiftUnavailable(_)
        | RaffleError::AlreadyDrawn(_)
        | RaffleError::WrongState { .. } => StatusCode::CONFLICT,
        RaffleError::GiftNotFound(_) | RaffleError::NotFound(_) => StatusCode::NOT_FOUND,
        RaffleError::EmptyCart | RaffleError::NoParticipants(_) | RaffleError::BelowMinimum => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RaffleError::Busy => StatusCode::SERVICE_UNAVAILABLE,
        RaffleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::ResultNotFound => {
                let body = ErrorBody {
                    error: "result_not_found",
                    message: "no result has been drawn for this gift".to_string(),
                };
                return (StatusCode::NOT_FOUND, Json(body)).into_response();
            }
            ApiError::Raffle(err) => err,
        };

        let status = status_for(&err);
        let message = match &err {
            RaffleError::Store(inner) => {
                error!(?inner, "store failure");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: err.code(),
            message,
        };
        let mut response = (status, Json(body)).into_response();
        if err.is_retryable() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}
