use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use super::biometric::{
    BiometricError, BiometricVerifier, FaceEngine, LiveCapture, MatchOutcome, MatchRejection,
    ReferenceCache, ReferenceFace,
};
use super::camera::{CameraArbiter, CameraConsumer, CameraLease, DeviceError};
use super::clock::Clock;
use super::domain::{Coordinates, FlowKind, IdentityToken};
use super::form::{AttendanceForm, FormDraft, FormError, FormInput, FormMount, FormStage};
use super::geolocation::{GeolocationSource, LocationSensor};
use super::scanner::{CodeDecoder, IdentityScanner, ScanError};
use super::shifts::ShiftResolver;
use super::submission::{AttendanceSaga, SagaOutcome, SubmissionCoordinator};
use crate::config::PipelineConfig;
use crate::remote::HrApi;
use crate::session::Session;

static PIPELINE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_pipeline_id() -> u64 {
    PIPELINE_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Collaborators shared by every pipeline a kiosk starts.
#[derive(Clone)]
pub struct PipelineDeps {
    pub api: Arc<dyn HrApi>,
    pub camera: CameraArbiter,
    pub face_engine: Arc<dyn FaceEngine>,
    pub decoder: Arc<dyn CodeDecoder>,
    pub location: Arc<dyn LocationSensor>,
    pub clock: Arc<dyn Clock>,
    pub references: ReferenceCache,
    pub config: PipelineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Biometric(#[from] BiometricError),
    #[error(transparent)]
    Scan(ScanError),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error("attendance flow was cancelled")]
    Cancelled,
    #[error("attendance flow has ended; start a new one")]
    Closed,
}

impl From<ScanError> for PipelineError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Device(device) => Self::Device(device),
            ScanError::Cancelled => Self::Cancelled,
            other => Self::Scan(other),
        }
    }
}

impl PipelineError {
    /// Errors after which the pipeline cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Device(_) | Self::Cancelled | Self::Closed)
    }

    pub fn notification(&self) -> Notification {
        let severity = if self.is_fatal() {
            Severity::Error
        } else {
            Severity::Warning
        };
        let message = match self {
            Self::Device(DeviceError::PermissionDenied) => {
                "Camera access was denied. Allow camera access and start again.".to_string()
            }
            Self::Device(err) => format!("Camera problem: {err}."),
            Self::Biometric(BiometricError::NoFaceDetected { .. }) => {
                "No face was found in your stored photo. Ask HR to update it.".to_string()
            }
            Self::Biometric(BiometricError::MissingPhoto { .. } | BiometricError::Fetch(_)) => {
                "Could not load your stored photo. Check the connection and try again."
                    .to_string()
            }
            other => other.to_string(),
        };
        Notification::new(severity, message)
    }
}

/// Signals cancellation without taking the pipeline lock.
#[derive(Debug, Clone)]
pub struct PipelineCanceller {
    signal: Arc<watch::Sender<bool>>,
}

impl PipelineCanceller {
    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }
}

/// Serializable snapshot for the kiosk UI.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineView {
    pub id: u64,
    pub flow: FlowKind,
    pub stage: FormStage,
    pub stage_label: &'static str,
    pub employee: String,
    pub matched_label: Option<String>,
    pub location: Option<Coordinates>,
    pub camera_held: bool,
    pub closed: bool,
    pub form: Option<FormDraft>,
    pub last_submission: Option<AttendanceSaga>,
    pub notifications: Vec<Notification>,
}

/// One gated check-in/out attempt: face, then identity code, then form, then submit.
pub struct AttendancePipeline {
    id: u64,
    session: Session,
    camera: CameraArbiter,
    clock: Arc<dyn Clock>,
    verifier: BiometricVerifier,
    scanner: IdentityScanner,
    shifts: ShiftResolver,
    submitter: SubmissionCoordinator,
    reference: ReferenceFace,
    form: AttendanceForm,
    location: Option<Coordinates>,
    biometric_lease: Option<CameraLease>,
    cancel: Arc<watch::Sender<bool>>,
    closed: bool,
    last_submission: Option<AttendanceSaga>,
    notifications: Vec<Notification>,
}

impl AttendancePipeline {
    /// Reads the location and loads the reference face concurrently, then takes the
    /// camera for face verification. No pipeline exists if either of the last two fails.
    pub async fn start(
        deps: PipelineDeps,
        session: Session,
        flow: FlowKind,
    ) -> Result<Self, PipelineError> {
        let id = next_pipeline_id();
        info!(pipeline = id, employee = %session.employee_id, flow = flow.label(), "starting attendance pipeline");

        let geolocation = GeolocationSource::new(deps.location, deps.config.geolocation_timeout);
        let verifier = BiometricVerifier::new(
            Arc::clone(&deps.api),
            deps.face_engine,
            deps.config.match_threshold,
            deps.references,
        );

        let ((location, location_error), reference) = tokio::join!(
            geolocation.read(),
            verifier.load_reference(&session.employee_id)
        );
        let reference = reference.inspect_err(|err| {
            warn!(pipeline = id, error = %err, "reference face unavailable");
        })?;

        let lease = deps.camera.acquire(CameraConsumer::Biometric).await?;

        let mut notifications = Vec::new();
        if let Some(err) = location_error {
            notifications.push(Notification::new(
                Severity::Warning,
                format!("Location unavailable ({err}); attendance will be recorded without coordinates."),
            ));
        }
        notifications.push(Notification::new(
            Severity::Info,
            "Look at the camera to verify your face.",
        ));

        let (cancel, _) = watch::channel(false);
        Ok(Self {
            id,
            session,
            camera: deps.camera,
            clock: deps.clock,
            verifier,
            scanner: IdentityScanner::new(deps.decoder, deps.config.scan_interval),
            shifts: ShiftResolver::new(Arc::clone(&deps.api)),
            submitter: SubmissionCoordinator::new(deps.api),
            reference,
            form: AttendanceForm::new(flow),
            location,
            biometric_lease: Some(lease),
            cancel: Arc::new(cancel),
            closed: false,
            last_submission: None,
            notifications,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stage(&self) -> FormStage {
        self.form.stage()
    }

    pub fn location(&self) -> Option<Coordinates> {
        self.location
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn canceller(&self) -> PipelineCanceller {
        PipelineCanceller {
            signal: Arc::clone(&self.cancel),
        }
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn last_notification(&self) -> Option<&Notification> {
        self.notifications.last()
    }

    /// One verify attempt. A non-match is not an error: the outcome is returned and
    /// the gate stays closed.
    pub async fn verify_face(&mut self) -> Result<MatchOutcome, PipelineError> {
        self.ensure_open()?;
        if self.form.stage() != FormStage::Unverified {
            return Err(self.reject(FormError::GateLocked {
                current: self.form.stage(),
            }));
        }

        let Some(lease) = self.biometric_lease.as_ref() else {
            return Err(self.reject(DeviceError::Unavailable("camera not held".to_string())));
        };

        let captured = lease.capture().await;
        let frame = match captured {
            Ok(frame) => frame,
            Err(err) => return Err(self.halt(err)),
        };

        let verified = self
            .verifier
            .verify(LiveCapture::new(frame), &self.reference)
            .await;
        let outcome = match verified {
            Ok(outcome) => outcome,
            Err(err) => return Err(self.reject(err)),
        };

        if outcome.matched {
            self.form.record_match(&outcome)?;
            if let Some(lease) = self.biometric_lease.take() {
                lease.release();
            }
            info!(pipeline = self.id, label = %outcome.label, confidence = outcome.confidence, "face gate passed");
            self.notify(
                Severity::Success,
                format!("Face verified as {}. Scan your identity code.", outcome.label),
            );
        } else {
            let message = match outcome.rejection {
                Some(MatchRejection::NoFaceDetected) => {
                    "No face detected. Look at the camera and try again."
                }
                _ => "Face did not match. Try again.",
            };
            info!(pipeline = self.id, confidence = outcome.confidence, "face gate not passed");
            self.notify(Severity::Warning, message);
        }
        Ok(outcome)
    }

    /// Scan until a code decodes or the pipeline is cancelled, then mount the form.
    pub async fn scan_identity(&mut self) -> Result<IdentityToken, PipelineError> {
        self.ensure_open()?;
        if self.form.stage() != FormStage::ScannerActive {
            return Err(self.reject(FormError::GateLocked {
                current: self.form.stage(),
            }));
        }

        let acquired = self.camera.acquire(CameraConsumer::Scanner).await;
        let lease = match acquired {
            Ok(lease) => lease,
            Err(err) => return Err(self.halt(err)),
        };

        let mut cancel = self.cancel.subscribe();
        let scanned = self.scanner.scan(lease, &mut cancel).await;
        let token = match scanned {
            Ok(token) => token,
            Err(ScanError::Cancelled) => {
                self.close("Attendance cancelled.");
                return Err(PipelineError::Cancelled);
            }
            Err(ScanError::Device(err)) => return Err(self.halt(err)),
            Err(err) => return Err(self.reject(err)),
        };

        let now = self.clock.now();
        let (shifts, shift_error) = self.shifts.list_or_empty(&self.session.company_id).await;
        if shift_error.is_some() {
            self.notify(
                Severity::Warning,
                "Shift list unavailable. Try again later or contact HR.",
            );
        } else if shifts.is_empty() {
            self.notify(Severity::Warning, "No active shifts are configured.");
        }

        self.form.record_scan(
            token.clone(),
            FormMount {
                date: now.date(),
                time: now.time(),
                location: self.location,
                shifts,
            },
        )?;
        info!(pipeline = self.id, token = %token, "identity gate passed");
        self.notify(
            Severity::Info,
            format!("Identity {token} scanned. Complete the form."),
        );
        Ok(token)
    }

    pub fn update_form(&mut self, input: FormInput) -> Result<(), PipelineError> {
        self.ensure_open()?;
        self.form.apply(input).map_err(|err| self.reject(err))
    }

    /// Validate the form and send it. Remote failures are reported through the saga;
    /// only local validation errors come back as `Err`.
    pub async fn submit(&mut self) -> Result<AttendanceSaga, PipelineError> {
        self.ensure_open()?;
        let plan = match self.form.begin_submit() {
            Ok(plan) => plan,
            Err(err) => return Err(self.reject(err)),
        };

        let entry_recorded = self.form.entry_recorded();
        let in_flight = InFlightSubmission {
            form: &mut self.form,
            settled: false,
        };
        let saga = self.submitter.submit_plan(&plan, entry_recorded).await;
        in_flight.settle(saga.is_complete());

        if saga.outcome() == SagaOutcome::EntryOnly {
            self.form.record_entry();
        }
        let severity = match saga.outcome() {
            SagaOutcome::Completed => Severity::Success,
            SagaOutcome::EntryOnly => Severity::Warning,
            SagaOutcome::NothingRecorded => Severity::Error,
        };
        self.notify(severity, saga.user_message());
        self.last_submission = Some(saga.clone());
        Ok(saga)
    }

    /// Release the camera and end the flow. Safe to call more than once.
    pub fn cancel(&mut self) {
        self.cancel.send_replace(true);
        if !self.closed {
            self.close("Attendance cancelled.");
        }
    }

    pub fn view(&self) -> PipelineView {
        PipelineView {
            id: self.id,
            flow: self.form.flow(),
            stage: self.form.stage(),
            stage_label: self.form.stage().label(),
            employee: self.session.match_label().to_string(),
            matched_label: self.form.matched_label().map(str::to_string),
            location: self.location,
            camera_held: self.biometric_lease.is_some() || self.camera.is_held(),
            closed: self.closed,
            form: self.form.draft().cloned(),
            last_submission: self.last_submission.clone(),
            notifications: self.notifications.clone(),
        }
    }

    fn ensure_open(&mut self) -> Result<(), PipelineError> {
        if self.closed {
            return Err(PipelineError::Closed);
        }
        if *self.cancel.borrow() {
            self.close("Attendance cancelled.");
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    fn notify(&mut self, severity: Severity, message: impl Into<String>) {
        self.notifications.push(Notification::new(severity, message));
    }

    /// Recoverable failure: record it and leave the state where it was.
    fn reject(&mut self, err: impl Into<PipelineError>) -> PipelineError {
        let err = err.into();
        warn!(pipeline = self.id, error = %err, "attendance step rejected");
        self.notifications.push(err.notification());
        err
    }

    /// Device failure: release the camera and end the flow.
    fn halt(&mut self, err: DeviceError) -> PipelineError {
        let err = PipelineError::Device(err);
        warn!(pipeline = self.id, error = %err, "camera failure halted attendance pipeline");
        self.biometric_lease = None;
        self.closed = true;
        self.notifications.push(err.notification());
        err
    }

    fn close(&mut self, message: &str) {
        self.biometric_lease = None;
        self.closed = true;
        info!(pipeline = self.id, stage = ?self.form.stage(), "attendance pipeline closed");
        self.notify(Severity::Info, message);
    }
}

/// Puts the form back in `Failed` if the submit future is dropped before the service answers.
struct InFlightSubmission<'a> {
    form: &'a mut AttendanceForm,
    settled: bool,
}

impl InFlightSubmission<'_> {
    fn settle(mut self, succeeded: bool) {
        self.form.finish(succeeded);
        self.settled = true;
    }
}

impl Drop for InFlightSubmission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("submission abandoned before the service answered");
            self.form.finish(false);
        }
    }
}

impl std::fmt::Debug for AttendancePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttendancePipeline")
            .field("id", &self.id)
            .field("flow", &self.form.flow())
            .field("stage", &self.form.stage())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
