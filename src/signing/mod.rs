//! Remote signing client.
//!
//! Uploads the unsigned bundle to the object store, submits it to the
//! signing service, polls under a hard deadline and downloads the signed
//! bundle over the local file. The sequencing lives in the pure
//! [`state::transition`]; [`SigningClient`] only performs the calls.

pub mod clock;
pub mod http;
pub mod state;
mod types;

pub use clock::{Clock, ManualClock, TokioClock};
pub use http::{HttpSigningService, ServiceError, SigningService};
pub use state::{SigningEvent, SigningState, TransitionError, transition};
pub use types::{
    JobState, PollReceipt, PollResponse, SignedArtifact, SigningJob, SubmitReceipt,
    SubmitRequest, SubmitResponse,
};

use crate::bundle::UnsignedArtifact;
use crate::cli::RuntimeConfig;
use crate::config::SigningConfig;
use crate::store::{ObjectStore, StoreError, unsigned_key};
use crate::utils::{checksum, fs::write_atomic};
use bytes::Bytes;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Remote signing errors
#[derive(Error, Debug)]
pub enum SigningError {
    /// The service answered the submission with an unexpected status
    #[error("signing service rejected the submission with HTTP {status}")]
    SubmitRejected { status: u16 },

    /// The submission never reached the service
    #[error("signing service unreachable on submit: {reason}")]
    SubmitUnreachable { reason: String },

    /// The submission was accepted without a job identifier
    #[error("signing service accepted the submission without a job id")]
    MissingJobId,

    /// A poll was answered with a non-success status
    #[error("job {job_id}: poll {polls} rejected with HTTP {status}")]
    PollRejected {
        job_id: String,
        status: u16,
        polls: u32,
    },

    /// A poll never reached the service
    #[error("job {job_id}: poll {polls} failed: {reason}")]
    PollUnreachable {
        job_id: String,
        polls: u32,
        reason: String,
    },

    /// The service reported the job as failed
    #[error("job {job_id} failed after {polls} poll(s)")]
    JobFailed { job_id: String, polls: u32 },

    /// The job did not complete before the deadline
    #[error("job {job_id} timed out after {}s ({polls} poll(s))", .elapsed.as_secs())]
    TimedOut {
        job_id: String,
        elapsed: Duration,
        polls: u32,
    },

    /// The unsigned bundle could not be uploaded
    #[error("failed to upload {key}: {source}")]
    Upload { key: String, source: StoreError },

    /// The signed bundle could not be downloaded
    #[error("failed to download {key}: {source}")]
    Download { key: String, source: StoreError },

    /// The job completed without naming where the signed bundle is
    #[error("job {job_id} completed without a destination")]
    MissingDestination { job_id: String },

    /// Local file access failed
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// The state machine rejected an event
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Drives one bundle through the signing service.
#[derive(Debug, Clone)]
pub struct SigningClient<S, O, C = TokioClock> {
    service: S,
    store: O,
    clock: C,
    config: SigningConfig,
    run_id: String,
    runtime_config: RuntimeConfig,
}

impl<S, O, C> SigningClient<S, O, C>
where
    S: SigningService + Sync,
    O: ObjectStore + Sync,
    C: Clock,
{
    pub fn new(
        service: S,
        store: O,
        clock: C,
        config: &SigningConfig,
        run_id: &str,
        runtime_config: &RuntimeConfig,
    ) -> Self {
        Self {
            service,
            store,
            clock,
            config: config.clone(),
            run_id: run_id.to_string(),
            runtime_config: runtime_config.clone(),
        }
    }

    /// Signs `artifact` and replaces the local file with the signed bytes.
    ///
    /// Exactly one job is submitted. Every failure is fatal; nothing is
    /// retried.
    pub async fn sign(&self, artifact: &UnsignedArtifact) -> Result<SignedArtifact, SigningError> {
        let deadline = self.config.deadline;
        self.runtime_config.section(&format!(
            "Signing {} via {}",
            artifact.path.display(),
            self.config.endpoint
        ));

        // Upload
        let source = unsigned_key(&self.run_id, &artifact.sha256, &artifact.file_name());
        let bytes = tokio::fs::read(&artifact.path)
            .await
            .map_err(|source| SigningError::Io {
                path: artifact.path.clone(),
                source,
            })?;
        self.store
            .put(&source, Bytes::from(bytes))
            .await
            .map_err(|e| SigningError::Upload {
                key: source.clone(),
                source: e,
            })?;
        self.runtime_config
            .progress(&format!("Uploaded unsigned bundle to {}", source));
        let mut state = transition(
            SigningState::Idle,
            SigningEvent::Uploaded {
                source: source.clone(),
            },
            deadline,
        )?;

        // Submit
        let receipt = self
            .service
            .submit(&source, &self.config.origin)
            .await
            .map_err(|e| SigningError::SubmitUnreachable {
                reason: e.to_string(),
            })?;
        let event = if receipt.status == self.config.expected_submit_status {
            SigningEvent::SubmitAccepted {
                job_id: receipt.job_id.clone(),
            }
        } else {
            SigningEvent::SubmitRejected {
                status: receipt.status,
            }
        };
        state = transition(state, event, deadline)?;
        if let Some(error) = state.error() {
            return Err(error);
        }

        let submitted_at = self.clock.now();
        let mut job = SigningJob::new(
            source.clone(),
            receipt.job_id.unwrap_or_default(),
            receipt.state,
        );
        log::info!(
            "Submitted signing job {} for {} at {}",
            job.job_id,
            job.source,
            job.submitted_at.to_rfc3339()
        );
        self.runtime_config
            .progress(&format!("Submitted signing job {}", job.job_id));

        // Poll
        let destination = loop {
            self.clock.sleep(self.config.poll_interval).await;

            let receipt = self
                .service
                .poll(&job.source, &job.job_id)
                .await
                .map_err(|e| SigningError::PollUnreachable {
                    job_id: job.job_id.clone(),
                    polls: job.polls + 1,
                    reason: e.to_string(),
                })?;
            let elapsed = self.clock.now().saturating_duration_since(submitted_at);

            job.polls += 1;
            if let Some(job_state) = &receipt.state {
                job.state = job_state.clone();
            }
            log::info!(
                "Job {} poll {}: HTTP {}, state {}, elapsed {:?}",
                job.job_id,
                job.polls,
                receipt.status,
                job.state,
                elapsed
            );
            self.runtime_config.verbose_println(&format!(
                "Job {} is {} after {}s",
                job.job_id,
                job.state,
                elapsed.as_secs()
            ));

            state = transition(state, SigningEvent::Polled { receipt, elapsed }, deadline)?;
            match &state {
                SigningState::Completed { destination, .. } => break destination.clone(),
                SigningState::Polling { .. } => continue,
                terminal => {
                    let error = terminal.error().ok_or(TransitionError {
                        state: terminal.name(),
                        event: "polled",
                    })?;
                    self.runtime_config.error(&error.to_string());
                    return Err(error);
                }
            }
        };

        // Download
        let signed = self
            .store
            .get(&destination)
            .await
            .map_err(|e| SigningError::Download {
                key: destination.clone(),
                source: e,
            })?;
        let io_err = |source| SigningError::Io {
            path: artifact.path.clone(),
            source,
        };
        write_atomic(&artifact.path, &signed).await.map_err(io_err)?;
        let sha256 = checksum::calculate_sha256(&artifact.path)
            .await
            .map_err(io_err)?;

        self.runtime_config.success(&format!(
            "Signed by job {} after {} poll(s) (sha256 {})",
            job.job_id, job.polls, sha256
        ));

        Ok(SignedArtifact {
            path: artifact.path.clone(),
            destination,
            job_id: job.job_id,
            sha256,
            polls: job.polls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsObjectStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use url::Url;

    const INTERVAL: Duration = Duration::from_secs(30);
    const DESTINATION: &str = "signed/App.zip";

    /// Scripted signing service. The last scripted poll answer repeats.
    struct MockService {
        submit: SubmitReceipt,
        polls: Mutex<VecDeque<PollReceipt>>,
        last: Mutex<Option<PollReceipt>>,
        poll_count: AtomicU32,
        submit_count: AtomicU32,
    }

    impl MockService {
        fn new(submit_status: u16, job_id: Option<&str>, polls: Vec<PollReceipt>) -> Self {
            Self {
                submit: SubmitReceipt {
                    status: submit_status,
                    job_id: job_id.map(str::to_string),
                    state: Some(JobState::Submitted),
                },
                polls: Mutex::new(polls.into()),
                last: Mutex::new(None),
                poll_count: AtomicU32::new(0),
                submit_count: AtomicU32::new(0),
            }
        }

        fn polls(&self) -> u32 {
            self.poll_count.load(Ordering::SeqCst)
        }
    }

    impl SigningService for &MockService {
        async fn submit(&self, _source: &str, _origin: &str) -> Result<SubmitReceipt, ServiceError> {
            self.submit_count.fetch_add(1, Ordering::SeqCst);
            Ok(self.submit.clone())
        }

        async fn poll(&self, _source: &str, _job_id: &str) -> Result<PollReceipt, ServiceError> {
            self.poll_count.fetch_add(1, Ordering::SeqCst);
            let next = self.polls.lock().unwrap().pop_front();
            let mut last = self.last.lock().unwrap();
            if let Some(next) = next {
                *last = Some(next);
            }
            Ok(last.clone().unwrap())
        }
    }

    fn ok(state: JobState, destination: Option<&str>) -> PollReceipt {
        PollReceipt {
            status: 200,
            state: Some(state),
            destination: destination.map(str::to_string),
        }
    }

    fn config(deadline: Duration) -> SigningConfig {
        SigningConfig {
            endpoint: Url::parse("https://signing.invalid/").unwrap(),
            token: None,
            origin: "Goose".into(),
            expected_submit_status: 200,
            poll_interval: INTERVAL,
            deadline,
            request_timeout: Duration::from_secs(5),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: FsObjectStore,
        artifact: UnsignedArtifact,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("App.zip");
        std::fs::write(&path, b"unsigned bundle").unwrap();
        let store = FsObjectStore::new(&dir.path().join("store"));
        store
            .put(DESTINATION, Bytes::from_static(b"signed bundle"))
            .await
            .unwrap();
        let artifact = UnsignedArtifact::from_path(&path).await.unwrap();
        Fixture {
            _dir: dir,
            store,
            artifact,
        }
    }

    fn client<'a>(
        service: &'a MockService,
        fixture: &Fixture,
        clock: &ManualClock,
        deadline: Duration,
    ) -> SigningClient<&'a MockService, FsObjectStore, ManualClock> {
        SigningClient::new(
            service,
            fixture.store.clone(),
            clock.clone(),
            &config(deadline),
            "run-1",
            &RuntimeConfig::quiet(),
        )
    }

    #[tokio::test]
    async fn completes_after_three_in_progress_polls() {
        let fixture = fixture().await;
        let clock = ManualClock::new();
        let service = MockService::new(
            200,
            Some("job-1"),
            vec![
                ok(JobState::InProgress, None),
                ok(JobState::InProgress, None),
                ok(JobState::InProgress, None),
                ok(JobState::Completed, Some(DESTINATION)),
            ],
        );

        let signed = client(&service, &fixture, &clock, Duration::from_secs(900))
            .sign(&fixture.artifact)
            .await
            .unwrap();

        assert_eq!(service.polls(), 4);
        assert_eq!(signed.polls, 4);
        assert_eq!(signed.job_id, "job-1");
        assert_eq!(signed.destination, DESTINATION);
        assert_eq!(std::fs::read(&fixture.artifact.path).unwrap(), b"signed bundle");
        assert_ne!(signed.sha256, fixture.artifact.sha256);
        assert_eq!(clock.elapsed(), INTERVAL * 4);

        // The unsigned bytes were uploaded under a run-scoped key
        let uploaded = fixture
            .store
            .get(&unsigned_key("run-1", &fixture.artifact.sha256, "App.zip"))
            .await
            .unwrap();
        assert_eq!(&uploaded[..], b"unsigned bundle");
    }

    #[tokio::test]
    async fn times_out_after_deadline_without_further_polls() {
        let fixture = fixture().await;
        let clock = ManualClock::new();
        let service = MockService::new(200, Some("job-1"), vec![ok(JobState::InProgress, None)]);

        let err = client(&service, &fixture, &clock, INTERVAL * 2)
            .sign(&fixture.artifact)
            .await
            .unwrap_err();

        match err {
            SigningError::TimedOut {
                job_id,
                elapsed,
                polls,
            } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(elapsed, INTERVAL * 2);
                assert_eq!(polls, 2);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(service.polls(), 2);
        assert_eq!(std::fs::read(&fixture.artifact.path).unwrap(), b"unsigned bundle");
    }

    #[tokio::test]
    async fn rejected_submission_never_polls() {
        let fixture = fixture().await;
        let clock = ManualClock::new();
        let service = MockService::new(500, Some("job-1"), vec![]);

        let err = client(&service, &fixture, &clock, INTERVAL * 10)
            .sign(&fixture.artifact)
            .await
            .unwrap_err();

        assert!(matches!(err, SigningError::SubmitRejected { status: 500 }));
        assert_eq!(service.polls(), 0);
        assert_eq!(service.submit_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_job_id_never_polls() {
        let fixture = fixture().await;
        let clock = ManualClock::new();
        let service = MockService::new(200, None, vec![]);

        let err = client(&service, &fixture, &clock, INTERVAL * 10)
            .sign(&fixture.artifact)
            .await
            .unwrap_err();

        assert!(matches!(err, SigningError::MissingJobId));
        assert_eq!(service.polls(), 0);
    }

    #[tokio::test]
    async fn failed_job_is_reported_distinctly() {
        let fixture = fixture().await;
        let clock = ManualClock::new();
        let service = MockService::new(
            200,
            Some("job-9"),
            vec![ok(JobState::InProgress, None), ok(JobState::Failed, None)],
        );

        let err = client(&service, &fixture, &clock, INTERVAL * 10)
            .sign(&fixture.artifact)
            .await
            .unwrap_err();

        assert!(matches!(err, SigningError::JobFailed { ref job_id, polls: 2 } if job_id == "job-9"));
    }

    #[tokio::test]
    async fn poll_rejection_is_fatal() {
        let fixture = fixture().await;
        let clock = ManualClock::new();
        let service = MockService::new(
            200,
            Some("job-1"),
            vec![PollReceipt {
                status: 404,
                state: None,
                destination: None,
            }],
        );

        let err = client(&service, &fixture, &clock, INTERVAL * 10)
            .sign(&fixture.artifact)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SigningError::PollRejected {
                status: 404,
                polls: 1,
                ..
            }
        ));
        assert_eq!(service.polls(), 1);
    }

    #[tokio::test]
    async fn missing_signed_object_is_a_download_error() {
        let fixture = fixture().await;
        let clock = ManualClock::new();
        let service = MockService::new(
            200,
            Some("job-1"),
            vec![ok(JobState::Completed, Some("signed/elsewhere.zip"))],
        );

        let err = client(&service, &fixture, &clock, INTERVAL * 10)
            .sign(&fixture.artifact)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SigningError::Download {
                source: StoreError::NotFound { .. },
                ..
            }
        ));
        assert_eq!(std::fs::read(&fixture.artifact.path).unwrap(), b"unsigned bundle");
    }
}
