use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::api::error::ErrorKind;
use crate::pipeline::jobs::JobError;

pub const PROCESSING_FAILED_MESSAGE: &str = "AI Processing failed";

pub type ApiObject<T> = (StatusCode, Json<T>);

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    error_kind: ErrorKind,
    error_code: String,
}

pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
    details: Option<String>,
) -> ApiObject<Value> {
    (
        status,
        into_json(ErrorResponse {
            success: false,
            error: message.into(),
            details,
            error_kind: kind,
            error_code: code.into(),
        }),
    )
}

pub fn map_job_error(error: JobError) -> ApiObject<Value> {
    match error {
        JobError::BadRequest(message) => error_response(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            "bad_request",
            message,
            None,
        ),
        JobError::NotFound(message) => error_response(
            StatusCode::NOT_FOUND,
            ErrorKind::Validation,
            "not_found",
            message,
            None,
        ),
        JobError::ProcessingFailed { exit_code, stderr } => {
            warn!(exit_code = ?exit_code, "processing job failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Processing,
                "processing_failed",
                PROCESSING_FAILED_MESSAGE,
                Some(stderr),
            )
        }
        JobError::Storage(source) => internal_error(format!("artifact store error: {source}")),
    }
}

pub fn internal_error(message: impl Into<String>) -> ApiObject<Value> {
    let detail = message.into();
    error!(detail = %detail, kind = ErrorKind::Infra.as_str(), "internal api error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        "Internal server error",
        None,
    )
}

pub fn into_json(payload: impl Serialize) -> Json<Value> {
    Json(serde_json::to_value(payload).unwrap_or_else(|error| {
        error!(error = %error, "api payload failed to serialize");
        json!({ "success": false, "error": "Internal server error" })
    }))
}
