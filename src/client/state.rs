//! View state of the AdCraft client as a value with pure transitions.
//!
//! The two in-flight phases are advisory: a caller that skips
//! [`ClientViewState::can_upload`] can still fire two jobs, and the server
//! treats them as independent.

use serde::Serialize;

use crate::pipeline::jobs::strip_query;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Idle,
    RemovingBackground,
    Ready,
    Generating,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    UploadStarted,
    RemovalSucceeded { url: String, at_ms: i64 },
    RemovalFailed { message: String },
    GenerateRequested,
    GenerationSucceeded { url: String, at_ms: i64 },
    GenerationFailed { message: String },
    Reset,
    PromptEdited(String),
    SelectHistory(usize),
    DeleteHistory(usize),
    ClearHistory,
    NotificationDismissed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientViewState {
    pub current_artifact_url: Option<String>,
    /// Newest first.
    pub history: Vec<String>,
    pub prompt: String,
    pub phase: Phase,
    pub notification: Option<String>,
}

impl ClientViewState {
    pub fn is_processing(&self) -> bool {
        self.phase == Phase::RemovingBackground
    }

    pub fn is_generating(&self) -> bool {
        self.phase == Phase::Generating
    }

    pub fn can_upload(&self) -> bool {
        matches!(self.phase, Phase::Idle | Phase::Ready)
    }

    pub fn can_generate(&self) -> bool {
        self.phase == Phase::Ready && self.current_artifact_url.is_some()
    }

    /// Applies `event`. Events that are not valid in the current phase,
    /// such as a response landing after a reset, leave the state untouched.
    pub fn apply(self, event: ClientEvent) -> Self {
        transition(self, event)
    }
}

pub fn transition(state: ClientViewState, event: ClientEvent) -> ClientViewState {
    use ClientEvent as E;
    use Phase as P;

    match (state.phase, event) {
        (P::Idle | P::Ready, E::UploadStarted) => ClientViewState {
            phase: P::RemovingBackground,
            current_artifact_url: None,
            notification: None,
            ..state
        },
        (P::RemovingBackground, E::RemovalSucceeded { url, at_ms }) => ClientViewState {
            phase: P::Ready,
            current_artifact_url: Some(cache_bust(url.as_str(), at_ms)),
            ..state
        },
        (P::RemovingBackground, E::RemovalFailed { message }) => ClientViewState {
            phase: P::Idle,
            current_artifact_url: None,
            notification: Some(message),
            ..state
        },
        (P::Ready, E::GenerateRequested) if state.current_artifact_url.is_some() => {
            ClientViewState {
                phase: P::Generating,
                notification: None,
                ..state
            }
        }
        (P::Generating, E::GenerationSucceeded { url, at_ms }) => {
            let busted = cache_bust(url.as_str(), at_ms);
            let mut history = state.history;
            history.insert(0, busted.clone());
            ClientViewState {
                phase: P::Ready,
                current_artifact_url: Some(busted),
                history,
                ..state
            }
        }
        (P::Generating, E::GenerationFailed { message }) => ClientViewState {
            phase: P::Ready,
            notification: Some(message),
            ..state
        },
        (_, E::Reset) => ClientViewState {
            phase: P::Idle,
            current_artifact_url: None,
            prompt: String::new(),
            ..state
        },
        (_, E::PromptEdited(prompt)) => ClientViewState { prompt, ..state },
        (P::Idle | P::Ready, E::SelectHistory(index)) => match state.history.get(index) {
            Some(url) => ClientViewState {
                phase: P::Ready,
                current_artifact_url: Some(url.clone()),
                ..state
            },
            None => state,
        },
        (_, E::DeleteHistory(index)) => {
            let mut history = state.history;
            if index < history.len() {
                history.remove(index);
            }
            ClientViewState { history, ..state }
        }
        (_, E::ClearHistory) => ClientViewState {
            history: Vec::new(),
            ..state
        },
        (_, E::NotificationDismissed) => ClientViewState {
            notification: None,
            ..state
        },
        (_, _) => state,
    }
}

/// Replaces any query on `url` with `?t=<at_ms>` so a reused file name is
/// not served stale from cache.
pub fn cache_bust(url: &str, at_ms: i64) -> String {
    format!("{}?t={at_ms}", strip_query(url))
}
