use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use error_types::{error_codes, error_types as kinds, ErrorResponse};

/// Map domain errors to the shared API error body.
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::BadRequest(_) => (kinds::VALIDATION_ERROR, error_codes::INVALID_REQUEST),
        AppError::Unauthorized => (kinds::AUTHENTICATION_ERROR, error_codes::TOKEN_INVALID),
        AppError::Forbidden(_) => (kinds::AUTHORIZATION_ERROR, error_codes::PERMISSION_DENIED),
        AppError::NotFound(what) => (kinds::NOT_FOUND_ERROR, not_found_code(what)),
        AppError::Conflict(_) => (kinds::CONFLICT_ERROR, error_codes::MEMBERSHIP_CONFLICT),
        AppError::VersionConflict { .. } => (kinds::CONFLICT_ERROR, error_codes::VERSION_CONFLICT),
        AppError::InvalidState(_) => (kinds::STATE_ERROR, error_codes::INVALID_STATE),
        AppError::EditWindowExpired { .. } => (kinds::STATE_ERROR, error_codes::EDIT_WINDOW_EXPIRED),
        AppError::ServiceUnavailable(_) => (
            kinds::SERVICE_UNAVAILABLE_ERROR,
            error_codes::SERVICE_UNAVAILABLE,
        ),
        AppError::Database(_) => (kinds::SERVER_ERROR, error_codes::DATABASE_ERROR),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
            (kinds::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR)
        }
    };

    // Storage details stay in the logs.
    let message = match err {
        AppError::Database(detail) => {
            tracing::error!(error = %detail, "database failure");
            "database error".to_string()
        }
        other => other.to_string(),
    };

    let response = ErrorResponse::new(
        status.canonical_reason().unwrap_or("Error"),
        &message,
        status.as_u16(),
        error_type,
        code,
    );

    (status, response)
}

fn not_found_code(what: &str) -> &'static str {
    if what.starts_with("message") || what.starts_with("reaction") {
        error_codes::MESSAGE_NOT_FOUND
    } else if what.starts_with("user") {
        error_codes::USER_NOT_FOUND
    } else if what.starts_with("participant") {
        error_codes::NOT_CONVERSATION_MEMBER
    } else {
        error_codes::CONVERSATION_NOT_FOUND
    }
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, response) = map_error(err);
    HttpResponse::build(status).json(response)
}
