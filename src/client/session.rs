use tracing::warn;

use crate::client::api::{AdCraftApiClient, ClientError};
use crate::client::state::{ClientEvent, ClientViewState};
use crate::pipeline::jobs::strip_query;

/// Drives [`ClientViewState`] through the network calls it implies.
pub struct AdCraftSession {
    api: AdCraftApiClient,
    state: ClientViewState,
    clock: fn() -> i64,
}

impl AdCraftSession {
    pub fn new(api: AdCraftApiClient) -> Self {
        Self {
            api,
            state: ClientViewState::default(),
            clock: now_ms,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> &ClientViewState {
        &self.state
    }

    /// Applies a local-only event (prompt edits, history, reset).
    pub fn dispatch(&mut self, event: ClientEvent) -> &ClientViewState {
        let state = std::mem::take(&mut self.state);
        self.state = state.apply(event);
        &self.state
    }

    pub async fn upload(&mut self, file_name: &str, bytes: Vec<u8>) -> Result<String, ClientError> {
        if !self.state.can_upload() {
            return Err(ClientError::Busy("a job is already in flight"));
        }
        self.dispatch(ClientEvent::UploadStarted);

        match self.api.remove_background(file_name, bytes).await {
            Ok(url) => {
                let at_ms = (self.clock)();
                self.dispatch(ClientEvent::RemovalSucceeded { url, at_ms });
                Ok(self.state.current_artifact_url.clone().unwrap_or_default())
            }
            Err(error) => {
                warn!(error = %error, "background removal failed");
                self.dispatch(ClientEvent::RemovalFailed {
                    message: format!("Background removal failed: {}", describe(&error)),
                });
                Err(error)
            }
        }
    }

    pub async fn generate(&mut self) -> Result<String, ClientError> {
        if !self.state.can_generate() {
            return Err(ClientError::Busy("no ready artifact to generate from"));
        }
        let Some(current) = self.state.current_artifact_url.clone() else {
            return Err(ClientError::Busy("no ready artifact to generate from"));
        };
        let prompt = self.state.prompt.clone();
        self.dispatch(ClientEvent::GenerateRequested);

        match self.api.generate(strip_query(current.as_str()), prompt.as_str()).await {
            Ok(url) => {
                let at_ms = (self.clock)();
                self.dispatch(ClientEvent::GenerationSucceeded { url, at_ms });
                Ok(self.state.current_artifact_url.clone().unwrap_or_default())
            }
            Err(error) => {
                warn!(error = %error, "ad generation failed");
                self.dispatch(ClientEvent::GenerationFailed {
                    message: format!("Ad generation failed: {}", describe(&error)),
                });
                Err(error)
            }
        }
    }
}

fn describe(error: &ClientError) -> String {
    match error {
        ClientError::Server {
            error,
            details: Some(details),
            ..
        } => format!("{error} ({details})"),
        other => other.to_string(),
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
