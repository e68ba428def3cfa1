use std::time::Duration;

use serde_json::json;

use super::common::*;
use crate::workflows::attendance::{
    AttendancePipeline, BiometricError, DeviceError, Direction, ExitStatus, FlowKind, FormError,
    FormInput, FormStage, IdentityToken, MatchRejection, PipelineError, SagaOutcome, Severity,
    ShiftDefinition, ShiftId,
};

async fn started(harness: &Harness, flow: FlowKind) -> AttendancePipeline {
    AttendancePipeline::start(harness.deps.clone(), session(), flow)
        .await
        .expect("pipeline starts")
}

fn shift_one() -> FormInput {
    FormInput {
        shift_id: Some(ShiftId("1".to_string())),
        ..FormInput::default()
    }
}

#[tokio::test]
async fn matching_face_opens_the_scanner_and_releases_the_camera() {
    let harness = harness();
    harness.camera.queue(FACE_AYU);
    let mut pipeline = started(&harness, FlowKind::Entry).await;
    assert!(harness.deps.camera.is_held());

    let outcome = pipeline.verify_face().await.expect("verify runs");

    assert!(outcome.matched);
    assert_eq!(outcome.label, "Ayu");
    assert!(outcome.confidence > 0.8);
    assert_eq!(pipeline.stage(), FormStage::ScannerActive);
    assert!(!harness.deps.camera.is_held());
    assert!(harness.camera.is_released());
    assert_eq!(
        pipeline.last_notification().map(|n| n.severity),
        Some(Severity::Success)
    );
}

#[tokio::test]
async fn stored_photo_without_a_face_produces_no_pipeline() {
    let harness = harness();
    harness.api.set_photo(PHOTO_WITHOUT_FACE);

    let result = AttendancePipeline::start(harness.deps.clone(), session(), FlowKind::Entry).await;

    assert!(matches!(
        result,
        Err(PipelineError::Biometric(BiometricError::NoFaceDetected { .. }))
    ));
    assert_eq!(harness.camera.opens(), 0);
}

#[tokio::test]
async fn unreachable_hr_service_produces_no_pipeline() {
    let harness = harness();
    harness.api.fail_employee_lookup();

    let result = AttendancePipeline::start(harness.deps.clone(), session(), FlowKind::Entry).await;

    match result {
        Err(err @ PipelineError::Biometric(BiometricError::Fetch(_))) => {
            assert!(err.notification().message.contains("stored photo"));
        }
        other => panic!("expected fetch failure, got {other:?}"),
    }
    assert_eq!(harness.camera.opens(), 0);
}

#[tokio::test]
async fn denied_camera_halts_before_any_gate() {
    let harness = harness();
    harness.camera.deny();

    let result = AttendancePipeline::start(harness.deps.clone(), session(), FlowKind::Entry).await;

    match result {
        Err(err @ PipelineError::Device(DeviceError::PermissionDenied)) => {
            assert!(err.is_fatal());
            assert_eq!(err.notification().severity, Severity::Error);
        }
        other => panic!("expected camera denial, got {other:?}"),
    }
    assert!(harness.camera.is_released());
    assert!(!harness.deps.camera.is_held());
}

#[tokio::test]
async fn non_matching_face_keeps_the_gate_closed() {
    let harness = harness();
    harness.camera.queue(FACE_STRANGER);
    harness.camera.queue(NO_FACE);
    harness.camera.queue(FACE_AYU);
    let mut pipeline = started(&harness, FlowKind::Entry).await;

    let stranger = pipeline.verify_face().await.expect("verify runs");
    assert!(!stranger.matched);
    assert!(matches!(
        stranger.rejection,
        Some(MatchRejection::DistanceAboveThreshold { .. })
    ));
    assert_eq!(pipeline.stage(), FormStage::Unverified);
    assert!(harness.deps.camera.is_held());

    assert!(matches!(
        pipeline.scan_identity().await,
        Err(PipelineError::Form(FormError::GateLocked {
            current: FormStage::Unverified
        }))
    ));

    let blank = pipeline.verify_face().await.expect("verify runs");
    assert_eq!(blank.rejection, Some(MatchRejection::NoFaceDetected));
    assert!(pipeline
        .last_notification()
        .is_some_and(|n| n.message.contains("No face detected")));

    assert!(pipeline.verify_face().await.expect("verify runs").matched);
    assert_eq!(pipeline.stage(), FormStage::ScannerActive);
}

#[tokio::test]
async fn full_entry_flow_records_attendance() {
    let harness = harness();
    harness.camera.queue(FACE_AYU);
    harness.camera.queue(BLURRY);
    harness.camera.queue(CODE_EMP_9);
    let mut pipeline = started(&harness, FlowKind::Entry).await;

    pipeline.verify_face().await.expect("verify");
    let token = pipeline.scan_identity().await.expect("scan");
    assert_eq!(token, IdentityToken("EMP-9".to_string()));
    assert!(harness.camera.is_released());

    let view = pipeline.view();
    assert_eq!(view.stage, FormStage::FormVisible);
    let draft = view.form.expect("form mounted");
    assert_eq!(draft.time, mounted_at().time());
    assert_eq!(draft.shifts.shifts().len(), 1);
    assert_eq!(draft.location, Some(kiosk_location()));

    pipeline.update_form(shift_one()).expect("form accepts shift");
    let saga = pipeline.submit().await.expect("submit runs");

    assert_eq!(saga.outcome(), SagaOutcome::Completed);
    assert_eq!(pipeline.stage(), FormStage::Succeeded);
    let writes = harness.api.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].1.employee_id, "EMP-9");
    assert_eq!(writes[0].1.time, "08:05");

    assert!(matches!(
        pipeline.submit().await,
        Err(PipelineError::Form(FormError::AlreadySubmitted))
    ));
    assert_eq!(harness.api.writes().len(), 1);
}

#[tokio::test]
async fn denied_location_still_allows_submission() {
    let harness = harness_with_sensor(std::sync::Arc::new(DeniedSensor));
    harness.camera.queue(FACE_AYU);
    harness.camera.queue(CODE_EMP_9);
    let mut pipeline = started(&harness, FlowKind::Entry).await;

    assert!(pipeline.location().is_none());
    assert!(pipeline
        .notifications()
        .iter()
        .any(|n| n.severity == Severity::Warning && n.message.contains("Location unavailable")));

    pipeline.verify_face().await.expect("verify");
    pipeline.scan_identity().await.expect("scan");
    pipeline.update_form(shift_one()).expect("shift");
    let saga = pipeline.submit().await.expect("submit");

    assert!(saga.is_complete());
    let writes = harness.api.writes();
    assert_eq!(writes[0].1.latitude, "");
    assert_eq!(writes[0].1.longitude, "");
}

#[tokio::test]
async fn daily_flow_surfaces_dangling_entry_and_resends_only_the_exit() {
    let harness = harness();
    harness.camera.queue(FACE_AYU);
    harness.camera.queue(CODE_EMP_9);
    harness.api.reply(
        Direction::Exit,
        Reply::Status(422, json!({ "message": { "time": ["Exit time is invalid"] } })),
    );
    let mut pipeline = started(&harness, FlowKind::Daily).await;

    pipeline.verify_face().await.expect("verify");
    pipeline.scan_identity().await.expect("scan");
    pipeline
        .update_form(FormInput {
            shift_id: Some(ShiftId("1".to_string())),
            exit_status: Some(ExitStatus::RegularDeparture),
            exit_time: Some(chrono::NaiveTime::from_hms_opt(17, 0, 0).expect("time")),
            ..FormInput::default()
        })
        .expect("form input");

    let saga = pipeline.submit().await.expect("submit runs");
    assert_eq!(saga.outcome(), SagaOutcome::EntryOnly);
    assert_eq!(pipeline.stage(), FormStage::Failed);
    let notice = pipeline.last_notification().expect("notice");
    assert_eq!(notice.severity, Severity::Warning);
    assert!(notice.message.contains("Exit time is invalid"));

    let retry = pipeline.submit().await.expect("resubmit runs");
    assert_eq!(retry.outcome(), SagaOutcome::Completed);
    assert_eq!(pipeline.stage(), FormStage::Succeeded);

    let directions: Vec<Direction> = harness
        .api
        .writes()
        .into_iter()
        .map(|(direction, _)| direction)
        .collect();
    assert_eq!(
        directions,
        vec![Direction::Entry, Direction::Exit, Direction::Exit]
    );
}

#[tokio::test]
async fn exit_resend_keeps_the_shift_of_the_recorded_entry() {
    let harness = harness();
    harness.api.set_shifts(vec![
        office_shift(),
        ShiftDefinition {
            id: ShiftId("2".to_string()),
            name: "Night".to_string(),
            start_time: Some("20:00".to_string()),
            end_time: None,
        },
    ]);
    harness.camera.queue(FACE_AYU);
    harness.camera.queue(CODE_EMP_9);
    harness.api.reply(
        Direction::Exit,
        Reply::Status(422, json!({ "message": { "time": ["Exit time is invalid"] } })),
    );
    let mut pipeline = started(&harness, FlowKind::Daily).await;
    pipeline.verify_face().await.expect("verify");
    pipeline.scan_identity().await.expect("scan");
    pipeline
        .update_form(FormInput {
            shift_id: Some(ShiftId("1".to_string())),
            exit_status: Some(ExitStatus::RegularDeparture),
            exit_time: Some(chrono::NaiveTime::from_hms_opt(17, 0, 0).expect("time")),
            ..FormInput::default()
        })
        .expect("form input");
    let saga = pipeline.submit().await.expect("submit runs");
    assert_eq!(saga.outcome(), SagaOutcome::EntryOnly);

    let changed = pipeline.update_form(FormInput {
        shift_id: Some(ShiftId("2".to_string())),
        ..FormInput::default()
    });
    assert!(matches!(
        changed,
        Err(PipelineError::Form(FormError::EntryRecorded { field: "shift_id" }))
    ));

    let retry = pipeline.submit().await.expect("resubmit runs");
    assert_eq!(retry.outcome(), SagaOutcome::Completed);
    let shifts: Vec<(Direction, String)> = harness
        .api
        .writes()
        .into_iter()
        .map(|(direction, payload)| (direction, payload.shift_id))
        .collect();
    assert_eq!(
        shifts,
        vec![
            (Direction::Entry, "1".to_string()),
            (Direction::Exit, "1".to_string()),
            (Direction::Exit, "1".to_string()),
        ]
    );
}

#[tokio::test]
async fn reference_face_is_fetched_once_per_employee() {
    let harness = harness();
    let mut first = started(&harness, FlowKind::Entry).await;
    first.cancel();

    let mut second = started(&harness, FlowKind::Exit).await;
    second.cancel();

    assert_eq!(harness.api.photo_fetches(), 1);
    assert_eq!(harness.deps.references.len(), 1);
    assert!(harness.camera.is_released());
}

#[tokio::test]
async fn missing_shift_list_leaves_the_selector_empty() {
    let harness = harness();
    harness.api.fail_shifts();
    harness.camera.queue(FACE_AYU);
    harness.camera.queue(CODE_EMP_9);
    let mut pipeline = started(&harness, FlowKind::Entry).await;

    pipeline.verify_face().await.expect("verify");
    pipeline.scan_identity().await.expect("scan still mounts the form");

    let view = pipeline.view();
    assert!(view.form.expect("form").shifts.is_empty());
    assert!(view
        .notifications
        .iter()
        .any(|n| n.message.contains("Shift list unavailable")));

    pipeline.update_form(shift_one()).expect("shift");
    assert!(matches!(
        pipeline.submit().await,
        Err(PipelineError::Form(FormError::UnknownShift(_)))
    ));
    assert!(harness.api.writes().is_empty());
}

#[tokio::test]
async fn capture_failure_releases_the_camera_and_ends_the_flow() {
    let harness = harness();
    harness
        .camera
        .queue_error(DeviceError::CaptureFailed("usb reset".to_string()));
    let mut pipeline = started(&harness, FlowKind::Entry).await;

    assert!(matches!(
        pipeline.verify_face().await,
        Err(PipelineError::Device(DeviceError::CaptureFailed(_)))
    ));
    assert!(pipeline.is_closed());
    assert!(harness.camera.is_released());
    assert!(matches!(
        pipeline.verify_face().await,
        Err(PipelineError::Closed)
    ));
}

#[tokio::test]
async fn cancel_releases_the_camera() {
    let harness = harness();
    let mut pipeline = started(&harness, FlowKind::Exit).await;
    assert!(harness.deps.camera.is_held());

    pipeline.cancel();
    pipeline.cancel();

    assert!(pipeline.is_closed());
    assert!(harness.camera.is_released());
    assert!(!harness.deps.camera.is_held());
    assert!(matches!(
        pipeline.verify_face().await,
        Err(PipelineError::Closed)
    ));
}

#[tokio::test]
async fn dropping_the_pipeline_releases_the_camera() {
    let harness = harness();
    let pipeline = started(&harness, FlowKind::Entry).await;
    drop(pipeline);
    assert!(harness.camera.is_released());
}

#[tokio::test(start_paused = true)]
async fn canceller_interrupts_a_running_scan() {
    let mut harness = harness();
    harness.deps.config.scan_interval = Duration::from_millis(50);
    harness.camera.queue(FACE_AYU);
    let mut pipeline = started(&harness, FlowKind::Entry).await;
    pipeline.verify_face().await.expect("verify");

    let canceller = pipeline.canceller();
    let cancel = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(420)).await;
        canceller.cancel();
    });

    assert!(matches!(
        pipeline.scan_identity().await,
        Err(PipelineError::Cancelled)
    ));
    cancel.await.expect("cancel task");

    assert!(pipeline.is_closed());
    assert!(harness.camera.is_released());
    assert_eq!(pipeline.stage(), FormStage::ScannerActive);
    assert!(pipeline.view().form.is_none());
}
