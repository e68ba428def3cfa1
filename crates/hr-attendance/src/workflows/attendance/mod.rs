//! Gated attendance check-in/out: face verification, identity scan, form, submission.

pub mod biometric;
pub mod camera;
pub mod clock;
pub mod domain;
pub mod form;
pub mod geolocation;
pub mod pipeline;
pub mod scanner;
pub mod shifts;
pub mod slot;
pub mod submission;

#[cfg(test)]
mod tests;

pub use biometric::{
    BiometricError, BiometricVerifier, EngineError, FaceDescriptor, FaceEngine, LiveCapture,
    MatchOutcome, MatchRejection, ReferenceCache, ReferenceFace, UNKNOWN_LABEL,
};
pub use camera::{CameraArbiter, CameraConsumer, CameraDevice, CameraLease, DeviceError, Frame};
pub use clock::{Clock, SystemClock};
pub use domain::{
    AttendanceIntent, AttendanceStatus, Coordinates, DailyCycle, Direction, EmployeeId,
    ExitStatus, FlowKind, IdentityToken, Punctuality, ShiftCatalog, ShiftDefinition, ShiftId,
    SubmissionPlan,
};
pub use form::{AttendanceForm, FormDraft, FormError, FormInput, FormMount, FormStage};
pub use geolocation::{FixedLocation, GeolocationSource, LocationError, LocationSensor};
pub use pipeline::{
    AttendancePipeline, Notification, PipelineCanceller, PipelineDeps, PipelineError,
    PipelineView, Severity,
};
pub use scanner::{CodeDecoder, DecodeError, IdentityScanner, ScanError, ScanEvent, ScanSession};
pub use shifts::ShiftResolver;
pub use slot::{PipelineHandle, PipelineSlot, SlotError};
pub use submission::{
    AttendanceSaga, SagaOutcome, SagaStep, StepState, SubmissionCoordinator, SubmissionError,
};
