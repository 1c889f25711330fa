use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::header::HOST;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::api::error::ErrorKind;
use crate::api::server::AppState;
use crate::pipeline::jobs::{UploadedFile, MISSING_UPLOAD_MESSAGE};

use super::handler_utils::{error_response, into_json, map_job_error, ApiObject};

const IMAGE_FIELD: &str = "image";
const FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const UPLOAD_TOO_LARGE_MESSAGE: &str = "Uploaded image is too large.";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateInput {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoveBackgroundResponse {
    success: bool,
    image_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    success: bool,
    ad_url: String,
}

pub async fn remove_bg_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiObject<Value> {
    let upload = match multipart {
        Ok(multipart) => match read_image_field(multipart).await {
            Ok(upload) => upload,
            Err(rejected) => {
                let code = match rejected.status {
                    StatusCode::PAYLOAD_TOO_LARGE => "payload_too_large",
                    status if status.is_client_error() => "bad_request",
                    _ => "upload_read_failed",
                };
                return error_response(
                    rejected.status,
                    ErrorKind::Validation,
                    code,
                    rejected.message,
                    None,
                );
            }
        },
        Err(_) => None,
    };

    let base_url = request_base_url(&state, &headers);
    match state.jobs.remove_background(upload, &base_url).await {
        Ok(image_url) => (
            StatusCode::OK,
            into_json(RemoveBackgroundResponse {
                success: true,
                image_url,
            }),
        ),
        Err(error) => map_job_error(error),
    }
}

pub async fn generate_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<GenerateInput>, JsonRejection>,
) -> ApiObject<Value> {
    let input = match payload {
        Ok(Json(input)) => input,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorKind::Validation,
                "bad_request",
                format!("Invalid JSON body: {}", rejection.body_text()),
                None,
            )
        }
    };

    let base_url = request_base_url(&state, &headers);
    match state
        .jobs
        .generate_scene(
            input.image_url.as_deref(),
            input.prompt.as_deref(),
            &base_url,
        )
        .await
    {
        Ok(ad_url) => (
            StatusCode::OK,
            into_json(GenerateResponse {
                success: true,
                ad_url,
            }),
        ),
        Err(error) => map_job_error(error),
    }
}

struct RejectedUpload {
    status: StatusCode,
    message: String,
}

impl From<MultipartError> for RejectedUpload {
    fn from(error: MultipartError) -> Self {
        let status = error.status();
        let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
            String::from(UPLOAD_TOO_LARGE_MESSAGE)
        } else {
            format!("Invalid multipart body: {}", error.body_text())
        };
        Self { status, message }
    }
}

/// Takes the first non-empty `image` field. Other fields are skipped.
async fn read_image_field(
    mut multipart: Multipart,
) -> Result<Option<UploadedFile>, RejectedUpload> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| String::from("upload"));
        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Err(RejectedUpload {
                status: StatusCode::BAD_REQUEST,
                message: String::from(MISSING_UPLOAD_MESSAGE),
            });
        }
        return Ok(Some(UploadedFile {
            file_name,
            bytes: bytes.to_vec(),
        }));
    }
    Ok(None)
}

/// Public URL prefix for artifacts: the configured override, else the
/// request's own scheme and host.
fn request_base_url(state: &AppState, headers: &HeaderMap) -> Url {
    if let Some(url) = state.public_base_url.as_ref() {
        return url.clone();
    }
    let scheme = headers
        .get(FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| matches!(*v, "http" | "https"))
        .unwrap_or("http");
    headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|host| Url::parse(format!("{scheme}://{host}/").as_str()).ok())
        .unwrap_or_else(|| state.fallback_base_url.clone())
}
