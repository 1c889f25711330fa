use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::pipeline::runtime::ProcessOutcome;
use crate::storage::ArtifactStore;

pub const SUCCESS_MARKER: &str = "SUCCESS:";
const DIAGNOSTIC_MARKER: &str = "ERROR:";

/// How a routine tells the orchestrator where its artifact went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingConvention {
    /// Exit 0 and leave the predicted file on disk.
    FileExistence,
    /// Exit 0 and print `SUCCESS:<path>` on stdout.
    StdoutMarker,
}

impl ReportingConvention {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileExistence => "file_existence",
            Self::StdoutMarker => "stdout_marker",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFailure {
    pub exit_code: Option<i32>,
    pub details: String,
}

/// Decides whether a finished routine produced its artifact.
pub fn interpret_outcome(
    outcome: &ProcessOutcome,
    convention: ReportingConvention,
    expected: &Path,
    store: &ArtifactStore,
) -> Result<PathBuf, ProcessFailure> {
    let fail = |reason: &str| ProcessFailure {
        exit_code: outcome.exit_code,
        details: failure_details(outcome, reason),
    };

    if !outcome.succeeded() {
        return Err(fail(match outcome.exit_code {
            Some(_) => "routine exited with a failure status",
            None => "routine was terminated by a signal",
        }));
    }

    match convention {
        ReportingConvention::FileExistence => {
            if store.exists(expected) {
                Ok(expected.to_path_buf())
            } else {
                Err(fail("exit 0 but no output produced"))
            }
        }
        ReportingConvention::StdoutMarker => {
            let Some(reported) = parse_success_marker(outcome.stdout.as_str()) else {
                return Err(fail("unexpected output"));
            };
            let name = reported
                .file_name()
                .and_then(|v| v.to_str())
                .unwrap_or_default();
            if expected.file_name().and_then(|v| v.to_str()) != Some(name) {
                return Err(fail("reported output is not the expected artifact"));
            }
            store
                .resolve(name)
                .map_err(|_| fail("reported output does not exist in the artifact store"))
        }
    }
}

pub fn parse_success_marker(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(SUCCESS_MARKER))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn failure_details(outcome: &ProcessOutcome, reason: &str) -> String {
    let stderr = outcome.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    outcome
        .stdout
        .lines()
        .map(str::trim)
        .find(|line| line.contains(DIAGNOSTIC_MARKER))
        .map(str::to_string)
        .unwrap_or_else(|| reason.to_string())
}
