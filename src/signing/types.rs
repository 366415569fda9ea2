//! Signing job types and service wire payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Job state as reported by the signing service.
///
/// Unknown service tokens are kept verbatim in [`JobState::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobState {
    Submitted,
    InProgress,
    Completed,
    Failed,
    Other(String),
}

impl JobState {
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Submitted => "submitted",
            JobState::InProgress => "in_progress",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Other(token) => token,
        }
    }
}

impl From<String> for JobState {
    fn from(token: String) -> Self {
        match token.as_str() {
            "submitted" => JobState::Submitted,
            "in_progress" => JobState::InProgress,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            _ => JobState::Other(token),
        }
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `POST {endpoint}/jobs` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Object-store key of the unsigned bundle
    pub source: String,
    /// Callback/origin reference
    pub origin: String,
}

/// `POST {endpoint}/jobs` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub state: Option<JobState>,
}

/// `GET {endpoint}/jobs/{job_id}` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub state: JobState,
    /// Object-store key of the signed bundle, present once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

/// Submission result: the HTTP status plus whatever the body carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub status: u16,
    pub job_id: Option<String>,
    pub state: Option<JobState>,
}

/// Poll result. `state` is `None` when the service did not answer 2xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReceipt {
    pub status: u16,
    pub state: Option<JobState>,
    pub destination: Option<String>,
}

impl PollReceipt {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One submission to the signing service.
#[derive(Debug, Clone)]
pub struct SigningJob {
    /// Object-store key of the unsigned bundle
    pub source: String,
    pub job_id: String,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub polls: u32,
}

impl SigningJob {
    pub fn new(source: String, job_id: String, state: Option<JobState>) -> Self {
        Self {
            source,
            job_id,
            state: state.unwrap_or(JobState::Submitted),
            submitted_at: Utc::now(),
            polls: 0,
        }
    }
}

/// A bundle that went through the signing service and was downloaded over
/// the local unsigned path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedArtifact {
    pub path: PathBuf,
    /// Object-store key the signed bundle was fetched from
    pub destination: String,
    pub job_id: String,
    pub sha256: String,
    /// Polls it took to reach `completed`
    pub polls: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_tokens() {
        let parsed: PollResponse =
            serde_json::from_str(r#"{"state": "in_progress"}"#).unwrap();
        assert_eq!(parsed.state, JobState::InProgress);
        assert!(parsed.destination.is_none());

        let unknown: PollResponse = serde_json::from_str(r#"{"state": "queued"}"#).unwrap();
        assert_eq!(unknown.state, JobState::Other("queued".into()));
        assert_eq!(unknown.state.to_string(), "queued");
    }

    #[test]
    fn submit_request_wire_format() {
        let body = serde_json::to_value(SubmitRequest {
            source: "unsigned/run/abc/App.zip".into(),
            origin: "Goose".into(),
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"source": "unsigned/run/abc/App.zip", "origin": "Goose"})
        );
    }
}
