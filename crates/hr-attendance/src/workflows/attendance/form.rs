use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::biometric::MatchOutcome;
use super::domain::{
    AttendanceIntent, AttendanceStatus, Coordinates, DailyCycle, Direction, ExitStatus, FlowKind,
    IdentityToken, Punctuality, ShiftCatalog, ShiftId, SubmissionPlan,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormStage {
    Unverified,
    ScannerActive,
    FormVisible,
    Submitting,
    Succeeded,
    Failed,
}

impl FormStage {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unverified => "Awaiting face verification",
            Self::ScannerActive => "Awaiting identity scan",
            Self::FormVisible => "Form ready",
            Self::Submitting => "Submitting",
            Self::Succeeded => "Submitted",
            Self::Failed => "Submission failed",
        }
    }

    /// Whether the user may press submit in this stage.
    pub const fn accepts_submit(self) -> bool {
        matches!(self, Self::FormVisible | Self::Failed)
    }
}

/// Values captured when the form becomes visible; never re-read afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FormMount {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub location: Option<Coordinates>,
    pub shifts: ShiftCatalog,
}

/// Partial update from the user; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FormInput {
    #[serde(default)]
    pub shift_id: Option<ShiftId>,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub punctuality: Option<Punctuality>,
    #[serde(default)]
    pub exit_status: Option<ExitStatus>,
    #[serde(default, deserialize_with = "deserialize_optional_time")]
    pub exit_time: Option<NaiveTime>,
    #[serde(default)]
    pub exit_remark: Option<String>,
}

pub fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|err| format!("failed to parse '{raw}' as HH:MM ({err})"))
}

fn deserialize_optional_time<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    opt.map(|value| parse_time(&value).map_err(serde::de::Error::custom))
        .transpose()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormDraft {
    pub employee: IdentityToken,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub location: Option<Coordinates>,
    pub shifts: ShiftCatalog,
    pub shift_id: Option<ShiftId>,
    pub remark: String,
    pub punctuality: Option<Punctuality>,
    pub exit_status: Option<ExitStatus>,
    pub exit_time: Option<NaiveTime>,
    pub exit_remark: String,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FormError {
    #[error("this step is locked until the previous gate passes (current stage: {})", .current.label())]
    GateLocked { current: FormStage },
    #[error("face did not match; verification gate stays closed")]
    NotMatched,
    #[error("a submission is already in flight")]
    AlreadySubmitting,
    #[error("attendance was already submitted")]
    AlreadySubmitted,
    #[error("select a shift")]
    MissingShift,
    #[error("shift {0} is not an active shift")]
    UnknownShift(ShiftId),
    #[error("select a check-out status")]
    MissingExitStatus,
    #[error("enter a check-out time")]
    MissingExitTime,
    #[error("check-out time {exit} is before check-in time {entry}")]
    ExitBeforeEntry { entry: NaiveTime, exit: NaiveTime },
    #[error("{field} does not apply to a {} flow", .flow.label())]
    NotApplicable { field: &'static str, flow: FlowKind },
    #[error("{field} cannot change after the check-in was recorded")]
    EntryRecorded { field: &'static str },
}

/// Gate-ordered state machine that assembles the submission plan.
#[derive(Debug, Clone)]
pub struct AttendanceForm {
    flow: FlowKind,
    stage: FormStage,
    matched_label: Option<String>,
    draft: Option<FormDraft>,
    entry_recorded: bool,
}

impl AttendanceForm {
    pub fn new(flow: FlowKind) -> Self {
        Self {
            flow,
            stage: FormStage::Unverified,
            matched_label: None,
            draft: None,
            entry_recorded: false,
        }
    }

    pub fn flow(&self) -> FlowKind {
        self.flow
    }

    pub fn stage(&self) -> FormStage {
        self.stage
    }

    pub fn matched_label(&self) -> Option<&str> {
        self.matched_label.as_deref()
    }

    pub fn draft(&self) -> Option<&FormDraft> {
        self.draft.as_ref()
    }

    /// Whether an earlier daily submit already wrote the entry half.
    pub fn entry_recorded(&self) -> bool {
        self.entry_recorded
    }

    /// Freeze the fields the recorded entry shares with the pending exit.
    pub fn record_entry(&mut self) {
        if !self.entry_recorded {
            debug!(flow = ?self.flow, "entry recorded; shared fields frozen");
        }
        self.entry_recorded = true;
    }

    /// `Unverified -> ScannerActive` on a positive match.
    pub fn record_match(&mut self, outcome: &MatchOutcome) -> Result<(), FormError> {
        if self.stage != FormStage::Unverified {
            return Err(FormError::GateLocked {
                current: self.stage,
            });
        }
        if !outcome.matched {
            return Err(FormError::NotMatched);
        }

        self.matched_label = Some(outcome.label.clone());
        self.transition(FormStage::ScannerActive);
        Ok(())
    }

    /// `ScannerActive -> FormVisible` once a token is decoded.
    pub fn record_scan(&mut self, token: IdentityToken, mount: FormMount) -> Result<(), FormError> {
        if self.stage != FormStage::ScannerActive {
            return Err(FormError::GateLocked {
                current: self.stage,
            });
        }

        let FormMount {
            date,
            time,
            location,
            shifts,
        } = mount;

        self.draft = Some(FormDraft {
            employee: token,
            date,
            time,
            location,
            shifts,
            shift_id: None,
            remark: String::new(),
            punctuality: None,
            exit_status: None,
            exit_time: None,
            exit_remark: String::new(),
        });
        self.transition(FormStage::FormVisible);
        Ok(())
    }

    pub fn apply(&mut self, input: FormInput) -> Result<(), FormError> {
        match self.stage {
            FormStage::FormVisible | FormStage::Failed => {}
            FormStage::Submitting => return Err(FormError::AlreadySubmitting),
            FormStage::Succeeded => return Err(FormError::AlreadySubmitted),
            current => return Err(FormError::GateLocked { current }),
        }

        let flow = self.flow;
        if input.punctuality.is_some() && flow == FlowKind::Exit {
            return Err(FormError::NotApplicable {
                field: "punctuality",
                flow,
            });
        }
        if input.exit_status.is_some() && !flow.needs_exit_status() {
            return Err(FormError::NotApplicable {
                field: "exit_status",
                flow,
            });
        }
        if flow != FlowKind::Daily {
            let unused = if input.exit_time.is_some() {
                Some("exit_time")
            } else if input.exit_remark.is_some() {
                Some("exit_remark")
            } else {
                None
            };
            if let Some(field) = unused {
                return Err(FormError::NotApplicable { field, flow });
            }
        }

        let entry_recorded = self.entry_recorded;
        let Some(draft) = self.draft.as_mut() else {
            return Err(FormError::GateLocked {
                current: self.stage,
            });
        };
        if entry_recorded {
            if let Some(field) = changed_entry_field(draft, &input) {
                return Err(FormError::EntryRecorded { field });
            }
        }

        if let Some(shift_id) = input.shift_id {
            draft.shift_id = Some(shift_id);
        }
        if let Some(remark) = input.remark {
            draft.remark = remark;
        }
        if let Some(punctuality) = input.punctuality {
            draft.punctuality = Some(punctuality);
        }
        if let Some(status) = input.exit_status {
            draft.exit_status = Some(status);
        }
        if let Some(exit_time) = input.exit_time {
            draft.exit_time = Some(exit_time);
        }
        if let Some(exit_remark) = input.exit_remark {
            draft.exit_remark = exit_remark;
        }
        debug!("form input applied");
        Ok(())
    }

    /// Validate and move to `Submitting`. Only one submission may be in flight.
    pub fn begin_submit(&mut self) -> Result<SubmissionPlan, FormError> {
        match self.stage {
            FormStage::FormVisible | FormStage::Failed => {}
            FormStage::Submitting => return Err(FormError::AlreadySubmitting),
            FormStage::Succeeded => return Err(FormError::AlreadySubmitted),
            current => return Err(FormError::GateLocked { current }),
        }

        let draft = self.draft.as_ref().ok_or(FormError::GateLocked {
            current: self.stage,
        })?;
        let plan = build_plan(self.flow, draft)?;
        self.transition(FormStage::Submitting);
        Ok(plan)
    }

    /// Close the in-flight submission. The draft is kept so a failed attempt can be retried.
    pub fn finish(&mut self, succeeded: bool) {
        if self.stage != FormStage::Submitting {
            return;
        }
        let next = if succeeded {
            FormStage::Succeeded
        } else {
            FormStage::Failed
        };
        self.transition(next);
    }

    fn transition(&mut self, next: FormStage) {
        info!(from = ?self.stage, to = ?next, flow = ?self.flow, "attendance form transition");
        self.stage = next;
    }
}

fn changed_entry_field(draft: &FormDraft, input: &FormInput) -> Option<&'static str> {
    if input
        .shift_id
        .as_ref()
        .is_some_and(|id| draft.shift_id.as_ref() != Some(id))
    {
        return Some("shift_id");
    }
    if input
        .remark
        .as_deref()
        .is_some_and(|remark| remark.trim() != draft.remark.trim())
    {
        return Some("remark");
    }
    if input
        .punctuality
        .is_some_and(|punctuality| draft.punctuality != Some(punctuality))
    {
        return Some("punctuality");
    }
    None
}

fn build_plan(flow: FlowKind, draft: &FormDraft) -> Result<SubmissionPlan, FormError> {
    let shift_id = draft.shift_id.clone().ok_or(FormError::MissingShift)?;
    if !draft.shifts.contains(&shift_id) {
        return Err(FormError::UnknownShift(shift_id));
    }

    let base = AttendanceIntent {
        employee: draft.employee.clone(),
        shift_id,
        date: draft.date,
        time: draft.time,
        location: draft.location,
        remark: draft.remark.trim().to_string(),
        direction: Direction::Entry,
        status: draft.punctuality.map(AttendanceStatus::Entry),
    };

    match flow {
        FlowKind::Entry => Ok(SubmissionPlan::Single(base)),
        FlowKind::Exit => {
            let status = draft.exit_status.ok_or(FormError::MissingExitStatus)?;
            Ok(SubmissionPlan::Single(AttendanceIntent {
                direction: Direction::Exit,
                status: Some(AttendanceStatus::Exit(status)),
                ..base
            }))
        }
        FlowKind::Daily => {
            let status = draft.exit_status.ok_or(FormError::MissingExitStatus)?;
            let exit_time = draft.exit_time.ok_or(FormError::MissingExitTime)?;
            if exit_time < draft.time {
                return Err(FormError::ExitBeforeEntry {
                    entry: draft.time,
                    exit: exit_time,
                });
            }

            let exit = AttendanceIntent {
                time: exit_time,
                remark: draft.exit_remark.trim().to_string(),
                direction: Direction::Exit,
                status: Some(AttendanceStatus::Exit(status)),
                ..base.clone()
            };
            Ok(SubmissionPlan::Daily(DailyCycle { entry: base, exit }))
        }
    }
}
