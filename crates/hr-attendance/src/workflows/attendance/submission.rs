use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::domain::{AttendanceIntent, DailyCycle, Direction, SubmissionPlan};
use crate::remote::{failure_message, Ack, AttendancePayload, HrApi, RemoteError, GENERIC_FAILURE};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionError {
    /// Caught before any request was sent.
    #[error("{message}")]
    Validation { message: String },
    /// The service answered with a 4xx.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    /// Transport failure, 5xx, or an unreadable response.
    #[error("{message}")]
    Network { message: String },
}

impl SubmissionError {
    pub fn user_message(&self) -> &str {
        match self {
            Self::Validation { message }
            | Self::Rejected { message, .. }
            | Self::Network { message } => message,
        }
    }

    fn from_remote(err: RemoteError) -> Self {
        match err {
            RemoteError::Status { status, body } if (400..500).contains(&status) => {
                Self::Rejected {
                    status,
                    message: failure_message(body.as_ref()),
                }
            }
            RemoteError::Status { body, .. } => Self::Network {
                message: failure_message(body.as_ref()),
            },
            RemoteError::Transport(_) | RemoteError::Decode(_) => Self::Network {
                message: GENERIC_FAILURE.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SagaStep {
    pub direction: Direction,
    pub state: StepState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<Ack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SubmissionError>,
}

impl SagaStep {
    fn from_result(direction: Direction, result: Result<Ack, SubmissionError>) -> Self {
        match result {
            Ok(ack) => Self {
                direction,
                state: StepState::Succeeded,
                ack: Some(ack),
                error: None,
            },
            Err(err) => Self {
                direction,
                state: StepState::Failed,
                ack: None,
                error: Some(err),
            },
        }
    }

    fn skipped(direction: Direction) -> Self {
        Self {
            direction,
            state: StepState::Skipped,
            ack: None,
            error: None,
        }
    }

    /// A step recorded by an earlier attempt of the same cycle.
    fn carried_over(direction: Direction) -> Self {
        Self {
            direction,
            state: StepState::Succeeded,
            ack: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == StepState::Succeeded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaOutcome {
    Completed,
    /// The entry row exists remotely but the exit row does not. Nothing is rolled back.
    EntryOnly,
    NothingRecorded,
}

/// Result of one submit: one step per remote write, in the order attempted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceSaga {
    steps: Vec<SagaStep>,
}

impl AttendanceSaga {
    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    pub fn step(&self, direction: Direction) -> Option<&SagaStep> {
        self.steps.iter().find(|step| step.direction == direction)
    }

    pub fn recorded(&self, direction: Direction) -> bool {
        self.step(direction).is_some_and(SagaStep::succeeded)
    }

    pub fn outcome(&self) -> SagaOutcome {
        if self.steps.iter().all(SagaStep::succeeded) {
            SagaOutcome::Completed
        } else if self.steps.len() > 1 && self.recorded(Direction::Entry) {
            SagaOutcome::EntryOnly
        } else {
            SagaOutcome::NothingRecorded
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome() == SagaOutcome::Completed
    }

    pub fn first_error(&self) -> Option<&SubmissionError> {
        self.steps.iter().find_map(|step| step.error.as_ref())
    }

    /// Text shown to the user for this outcome; never empty.
    pub fn user_message(&self) -> String {
        let error = self
            .first_error()
            .map(SubmissionError::user_message)
            .unwrap_or(GENERIC_FAILURE);

        match self.outcome() {
            SagaOutcome::Completed => match self.steps.as_slice() {
                [single] => format!("{} recorded.", single.direction.label()),
                _ => "Entry and exit recorded.".to_string(),
            },
            SagaOutcome::EntryOnly => format!(
                "Entry was recorded but exit failed: {error}. Submit again to record the exit."
            ),
            SagaOutcome::NothingRecorded => error.to_string(),
        }
    }
}

/// Posts intents to the HR service; no automatic retries.
#[derive(Clone)]
pub struct SubmissionCoordinator {
    api: Arc<dyn HrApi>,
}

impl SubmissionCoordinator {
    pub fn new(api: Arc<dyn HrApi>) -> Self {
        Self { api }
    }

    pub async fn submit(&self, intent: &AttendanceIntent) -> Result<Ack, SubmissionError> {
        validate(intent)?;

        let payload = AttendancePayload::from_intent(intent);
        match self.api.record_attendance(intent.direction, &payload).await {
            Ok(ack) => {
                info!(
                    direction = intent.direction.label(),
                    employee = %intent.employee,
                    shift_id = %intent.shift_id,
                    "attendance recorded"
                );
                Ok(ack)
            }
            Err(err) => {
                warn!(
                    direction = intent.direction.label(),
                    employee = %intent.employee,
                    error = %err,
                    "attendance write failed"
                );
                Err(SubmissionError::from_remote(err))
            }
        }
    }

    /// Entry then exit, strictly in sequence. The exit is skipped when the entry fails.
    ///
    /// `entry_recorded` marks an entry written by an earlier attempt, so only the exit is sent.
    pub async fn submit_daily(&self, cycle: &DailyCycle, entry_recorded: bool) -> AttendanceSaga {
        let entry = if entry_recorded {
            info!(employee = %cycle.entry.employee, "entry already recorded; sending exit only");
            SagaStep::carried_over(Direction::Entry)
        } else {
            SagaStep::from_result(Direction::Entry, self.submit(&cycle.entry).await)
        };

        let exit = if entry.succeeded() {
            SagaStep::from_result(Direction::Exit, self.submit(&cycle.exit).await)
        } else {
            SagaStep::skipped(Direction::Exit)
        };

        let saga = AttendanceSaga {
            steps: vec![entry, exit],
        };
        if saga.outcome() == SagaOutcome::EntryOnly {
            warn!(employee = %cycle.entry.employee, date = %cycle.entry.date, "entry recorded without matching exit");
        }
        saga
    }

    pub async fn submit_plan(&self, plan: &SubmissionPlan, entry_recorded: bool) -> AttendanceSaga {
        match plan {
            SubmissionPlan::Single(intent) => AttendanceSaga {
                steps: vec![SagaStep::from_result(
                    intent.direction,
                    self.submit(intent).await,
                )],
            },
            SubmissionPlan::Daily(cycle) => self.submit_daily(cycle, entry_recorded).await,
        }
    }
}

fn validate(intent: &AttendanceIntent) -> Result<(), SubmissionError> {
    if intent.employee.0.trim().is_empty() {
        return Err(SubmissionError::Validation {
            message: "employee identifier is missing".to_string(),
        });
    }
    if intent.shift_id.0.trim().is_empty() {
        return Err(SubmissionError::Validation {
            message: "select a shift".to_string(),
        });
    }
    if intent.direction == Direction::Exit && intent.status.is_none() {
        return Err(SubmissionError::Validation {
            message: "select a check-out status".to_string(),
        });
    }
    Ok(())
}
