//! Signing state machine.
//!
//! `Idle → Uploaded → Submitted → Polling → {Completed | Failed | TimedOut}`.
//! [`transition`] is pure: the client performs the calls and feeds their
//! results in as [`SigningEvent`]s. Terminal states accept no further events.

use super::SigningError;
use super::types::{JobState, PollReceipt};
use std::time::Duration;
use thiserror::Error;

/// Why a job ended in [`SigningState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    SubmitRejected { status: u16 },
    MissingJobId,
    PollRejected { status: u16 },
    JobFailed,
    MissingDestination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningState {
    Idle,
    Uploaded {
        source: String,
    },
    Submitted {
        source: String,
        job_id: String,
    },
    Polling {
        source: String,
        job_id: String,
        polls: u32,
        elapsed: Duration,
    },
    Completed {
        source: String,
        job_id: String,
        destination: String,
        polls: u32,
    },
    Failed {
        job_id: Option<String>,
        polls: u32,
        failure: Failure,
    },
    TimedOut {
        job_id: String,
        polls: u32,
        elapsed: Duration,
    },
}

impl SigningState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Uploaded { .. } => "uploaded",
            Self::Submitted { .. } => "submitted",
            Self::Polling { .. } => "polling",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::TimedOut { .. } => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::TimedOut { .. }
        )
    }

    /// The error a failed or timed-out state reports; `None` otherwise.
    pub fn error(&self) -> Option<SigningError> {
        match self {
            Self::Failed {
                job_id,
                polls,
                failure,
            } => {
                let job_id = job_id.clone().unwrap_or_default();
                let polls = *polls;
                Some(match failure {
                    Failure::SubmitRejected { status } => {
                        SigningError::SubmitRejected { status: *status }
                    }
                    Failure::MissingJobId => SigningError::MissingJobId,
                    Failure::PollRejected { status } => SigningError::PollRejected {
                        job_id,
                        status: *status,
                        polls,
                    },
                    Failure::JobFailed => SigningError::JobFailed { job_id, polls },
                    Failure::MissingDestination => SigningError::MissingDestination { job_id },
                })
            }
            Self::TimedOut {
                job_id,
                polls,
                elapsed,
            } => Some(SigningError::TimedOut {
                job_id: job_id.clone(),
                elapsed: *elapsed,
                polls: *polls,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningEvent {
    /// The unsigned bundle is in the object store under `source`
    Uploaded { source: String },
    /// The service answered the submission with the expected status
    SubmitAccepted { job_id: Option<String> },
    /// The service answered the submission with another status
    SubmitRejected { status: u16 },
    /// A poll completed; `elapsed` is measured from submission
    Polled {
        receipt: PollReceipt,
        elapsed: Duration,
    },
}

impl SigningEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uploaded { .. } => "uploaded",
            Self::SubmitAccepted { .. } => "submit_accepted",
            Self::SubmitRejected { .. } => "submit_rejected",
            Self::Polled { .. } => "polled",
        }
    }
}

/// An event that is not valid in the current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("event `{event}` is not valid in state `{state}`")]
pub struct TransitionError {
    pub state: &'static str,
    pub event: &'static str,
}

/// Applies `event` to `state`.
///
/// After every non-terminal poll the job times out once the elapsed time
/// reaches `deadline`. Elapsed time never decreases across polls.
pub fn transition(
    state: SigningState,
    event: SigningEvent,
    deadline: Duration,
) -> Result<SigningState, TransitionError> {
    use SigningEvent as E;
    use SigningState as S;

    let invalid = TransitionError {
        state: state.name(),
        event: event.name(),
    };

    match (state, event) {
        (S::Idle, E::Uploaded { source }) => Ok(S::Uploaded { source }),

        (S::Uploaded { source }, E::SubmitAccepted { job_id }) => Ok(match job_id {
            Some(job_id) if !job_id.is_empty() => S::Submitted { source, job_id },
            _ => S::Failed {
                job_id: None,
                polls: 0,
                failure: Failure::MissingJobId,
            },
        }),

        (S::Uploaded { .. }, E::SubmitRejected { status }) => Ok(S::Failed {
            job_id: None,
            polls: 0,
            failure: Failure::SubmitRejected { status },
        }),

        (S::Submitted { source, job_id }, E::Polled { receipt, elapsed }) => Ok(poll(
            source,
            job_id,
            0,
            Duration::ZERO,
            receipt,
            elapsed,
            deadline,
        )),

        (
            S::Polling {
                source,
                job_id,
                polls,
                elapsed: previous,
            },
            E::Polled { receipt, elapsed },
        ) => Ok(poll(
            source, job_id, polls, previous, receipt, elapsed, deadline,
        )),

        _ => Err(invalid),
    }
}

fn poll(
    source: String,
    job_id: String,
    previous_polls: u32,
    previous_elapsed: Duration,
    receipt: PollReceipt,
    elapsed: Duration,
    deadline: Duration,
) -> SigningState {
    let polls = previous_polls + 1;
    let elapsed = elapsed.max(previous_elapsed);

    if !receipt.is_success() {
        return SigningState::Failed {
            job_id: Some(job_id),
            polls,
            failure: Failure::PollRejected {
                status: receipt.status,
            },
        };
    }

    match (receipt.state, receipt.destination) {
        (Some(JobState::Completed), Some(destination)) => SigningState::Completed {
            source,
            job_id,
            destination,
            polls,
        },
        (Some(JobState::Completed), None) => SigningState::Failed {
            job_id: Some(job_id),
            polls,
            failure: Failure::MissingDestination,
        },
        (Some(JobState::Failed), _) => SigningState::Failed {
            job_id: Some(job_id),
            polls,
            failure: Failure::JobFailed,
        },
        _ if elapsed >= deadline => SigningState::TimedOut {
            job_id,
            polls,
            elapsed,
        },
        _ => SigningState::Polling {
            source,
            job_id,
            polls,
            elapsed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_secs(60);

    fn submitted() -> SigningState {
        SigningState::Submitted {
            source: "unsigned/run/abc/App.zip".into(),
            job_id: "job-1".into(),
        }
    }

    fn polled(state: JobState, destination: Option<&str>, secs: u64) -> SigningEvent {
        SigningEvent::Polled {
            receipt: PollReceipt {
                status: 200,
                state: Some(state),
                destination: destination.map(str::to_string),
            },
            elapsed: Duration::from_secs(secs),
        }
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut state = transition(
            SigningState::Idle,
            SigningEvent::Uploaded {
                source: "unsigned/run/abc/App.zip".into(),
            },
            DEADLINE,
        )
        .unwrap();
        state = transition(
            state,
            SigningEvent::SubmitAccepted {
                job_id: Some("job-1".into()),
            },
            DEADLINE,
        )
        .unwrap();
        state = transition(state, polled(JobState::InProgress, None, 10), DEADLINE).unwrap();
        state = transition(
            state,
            polled(JobState::Completed, Some("signed/App.zip"), 20),
            DEADLINE,
        )
        .unwrap();

        assert_eq!(
            state,
            SigningState::Completed {
                source: "unsigned/run/abc/App.zip".into(),
                job_id: "job-1".into(),
                destination: "signed/App.zip".into(),
                polls: 2,
            }
        );
    }

    #[test]
    fn rejected_or_idless_submission_fails_without_polling() {
        let uploaded = SigningState::Uploaded {
            source: "k".into(),
        };
        let rejected = transition(
            uploaded.clone(),
            SigningEvent::SubmitRejected { status: 403 },
            DEADLINE,
        )
        .unwrap();
        assert!(matches!(
            rejected.error(),
            Some(SigningError::SubmitRejected { status: 403 })
        ));

        let no_id = transition(
            uploaded,
            SigningEvent::SubmitAccepted { job_id: None },
            DEADLINE,
        )
        .unwrap();
        assert!(matches!(no_id.error(), Some(SigningError::MissingJobId)));
    }

    #[test]
    fn deadline_is_inclusive() {
        let state = transition(
            submitted(),
            polled(JobState::InProgress, None, 59),
            DEADLINE,
        )
        .unwrap();
        assert_eq!(state.name(), "polling");

        let state = transition(state, polled(JobState::InProgress, None, 60), DEADLINE).unwrap();
        assert!(matches!(
            state,
            SigningState::TimedOut { polls: 2, .. }
        ));
    }

    #[test]
    fn failed_job_is_distinct_from_timeout() {
        // Even past the deadline, a reported failure wins
        let state = transition(submitted(), polled(JobState::Failed, None, 600), DEADLINE).unwrap();
        assert!(matches!(
            state.error(),
            Some(SigningError::JobFailed { polls: 1, .. })
        ));
    }

    #[test]
    fn non_success_poll_is_rejected() {
        let event = SigningEvent::Polled {
            receipt: PollReceipt {
                status: 502,
                state: None,
                destination: None,
            },
            elapsed: Duration::from_secs(1),
        };
        let state = transition(submitted(), event, DEADLINE).unwrap();
        assert!(matches!(
            state.error(),
            Some(SigningError::PollRejected { status: 502, .. })
        ));
    }

    #[test]
    fn completed_without_destination_fails() {
        let state = transition(submitted(), polled(JobState::Completed, None, 5), DEADLINE).unwrap();
        assert!(matches!(
            state.error(),
            Some(SigningError::MissingDestination { .. })
        ));
    }

    #[test]
    fn elapsed_never_decreases() {
        let state = transition(submitted(), polled(JobState::InProgress, None, 30), DEADLINE).unwrap();
        let state = transition(state, polled(JobState::InProgress, None, 10), DEADLINE).unwrap();
        match state {
            SigningState::Polling { elapsed, polls, .. } => {
                assert_eq!(elapsed, Duration::from_secs(30));
                assert_eq!(polls, 2);
            }
            other => panic!("expected polling, got {other:?}"),
        }
    }

    #[test]
    fn unknown_states_keep_polling() {
        let state = transition(
            submitted(),
            polled(JobState::Other("queued".into()), None, 5),
            DEADLINE,
        )
        .unwrap();
        assert_eq!(state.name(), "polling");
    }

    #[test]
    fn terminal_states_reject_events() {
        let completed = SigningState::Completed {
            source: "k".into(),
            job_id: "job-1".into(),
            destination: "signed/App.zip".into(),
            polls: 1,
        };
        let err = transition(completed, polled(JobState::InProgress, None, 1), DEADLINE)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError {
                state: "completed",
                event: "polled"
            }
        );

        let timed_out = SigningState::TimedOut {
            job_id: "job-1".into(),
            polls: 2,
            elapsed: DEADLINE,
        };
        assert!(transition(timed_out, polled(JobState::Completed, Some("d"), 1), DEADLINE).is_err());
    }

    #[test]
    fn polling_before_submission_is_invalid() {
        assert!(transition(SigningState::Idle, polled(JobState::InProgress, None, 1), DEADLINE).is_err());
    }
}
