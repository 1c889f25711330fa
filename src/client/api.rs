use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const API_URL_ENV: &str = "ADCRAFT_API_URL";
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid api base url '{0}'")]
    InvalidBaseUrl(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{error}")]
    Server {
        status: u16,
        error: String,
        details: Option<String>,
    },
    #[error("unexpected response: {0}")]
    MalformedResponse(String),
    #[error("{0}")]
    Busy(&'static str),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    ad_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    image_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
}

/// HTTP client for the two job endpoints.
#[derive(Debug, Clone)]
pub struct AdCraftApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl AdCraftApiClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url.trim())
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ClientError::InvalidBaseUrl(base_url.to_string()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    /// Uses `ADCRAFT_API_URL` when set, otherwise the local backend.
    pub fn from_env() -> Result<Self, ClientError> {
        let base = std::env::var(API_URL_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| String::from(DEFAULT_API_URL));
        Self::new(base.as_str())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn remove_background(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ClientError> {
        let form = Form::new().part("image", Part::bytes(bytes).file_name(file_name.to_string()));
        let response = self
            .http
            .post(self.endpoint("api/remove-bg")?)
            .multipart(form)
            .send()
            .await?;
        let body = read_job_response(response).await?;
        body.image_url
            .filter(|_| body.success)
            .ok_or_else(|| ClientError::MalformedResponse(String::from("missing imageUrl")))
    }

    pub async fn generate(&self, image_url: &str, prompt: &str) -> Result<String, ClientError> {
        let prompt = Some(prompt.trim()).filter(|v| !v.is_empty());
        let response = self
            .http
            .post(self.endpoint("api/generate")?)
            .json(&GenerateRequest { image_url, prompt })
            .send()
            .await?;
        let body = read_job_response(response).await?;
        body.ad_url
            .filter(|_| body.success)
            .ok_or_else(|| ClientError::MalformedResponse(String::from("missing adUrl")))
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(path.split('/'));
        Ok(url)
    }
}

async fn read_job_response(response: reqwest::Response) -> Result<JobResponse, ClientError> {
    let status = response.status();
    let text = response.text().await?;
    let body = serde_json::from_str::<JobResponse>(text.as_str()).map_err(|error| {
        ClientError::MalformedResponse(format!("{status}: {error}"))
    })?;
    if !status.is_success() {
        return Err(ClientError::Server {
            status: status.as_u16(),
            error: body
                .error
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
            details: body.details,
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_to_base_path() {
        let client = AdCraftApiClient::new("https://api.example.com/adcraft/").expect("client");
        assert_eq!(
            client.endpoint("api/generate").expect("endpoint").as_str(),
            "https://api.example.com/adcraft/api/generate"
        );

        let client = AdCraftApiClient::new("http://localhost:5000").expect("client");
        assert_eq!(
            client.endpoint("api/remove-bg").expect("endpoint").as_str(),
            "http://localhost:5000/api/remove-bg"
        );
    }

    #[test]
    fn rejects_non_url_base() {
        let err = AdCraftApiClient::new("localhost").expect_err("scheme required");
        assert!(matches!(err, ClientError::InvalidBaseUrl(_)));
    }

    #[test]
    fn generate_request_omits_empty_prompt() {
        let body = serde_json::to_value(GenerateRequest {
            image_url: "http://h/uploads/1_a_no_bg.png",
            prompt: None,
        })
        .expect("serialize");
        assert_eq!(body, serde_json::json!({"imageUrl": "http://h/uploads/1_a_no_bg.png"}));
    }
}
