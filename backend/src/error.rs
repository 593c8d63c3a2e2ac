use std::sync::PoisonError;

use actix_web::{
    error::{BlockingError, ResponseError},
    http::StatusCode,
    HttpResponse,
};
use log::error;

use crate::db::ClaimError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
    #[error("Internal server error")]
    Database(#[from] diesel::result::Error),
    #[error("Internal server error")]
    LockPoisoned,
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) | AppError::Database(_) | AppError::LockPoisoned => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::Internal(e) => error!("Request failed: {e:?}"),
            AppError::Database(e) => error!("Database error: {e}"),
            AppError::LockPoisoned => error!("Database lock poisoned"),
            _ => {}
        }

        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

impl From<ClaimError> for AppError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::NotFound => AppError::NotFound("Invalid or expired code".to_string()),
            ClaimError::Expired => AppError::BadRequest("Code has expired".to_string()),
            ClaimError::AlreadyClaimed => AppError::BadRequest("Code already claimed".to_string()),
            ClaimError::Conflict => {
                AppError::Conflict("Device already registered to another user".to_string())
            }
            ClaimError::Db(e) => AppError::Database(e),
        }
    }
}

impl From<BlockingError> for AppError {
    fn from(err: BlockingError) -> Self {
        AppError::Internal(anyhow::anyhow!("blocking task failed: {err}"))
    }
}

impl<T> From<PoisonError<T>> for AppError {
    fn from(_: PoisonError<T>) -> Self {
        AppError::LockPoisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn internal_details_stay_private() {
        let err = AppError::Internal(anyhow::anyhow!("disk on fire"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "Internal server error" }));
    }

    #[test]
    fn claim_errors_map_to_statuses() {
        let status = |e: ClaimError| AppError::from(e).status_code();
        assert_eq!(status(ClaimError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status(ClaimError::Expired), StatusCode::BAD_REQUEST);
        assert_eq!(status(ClaimError::AlreadyClaimed), StatusCode::BAD_REQUEST);
        assert_eq!(status(ClaimError::Conflict), StatusCode::CONFLICT);
    }
}
