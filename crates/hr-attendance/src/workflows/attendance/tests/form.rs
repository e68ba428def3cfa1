use chrono::NaiveTime;

use super::common::*;
use crate::workflows::attendance::{
    AttendanceForm, AttendanceStatus, Direction, ExitStatus, FlowKind, FormError, FormInput,
    FormMount, FormStage, IdentityToken, MatchOutcome, MatchRejection, Punctuality,
    ShiftCatalog, ShiftId, SubmissionPlan, UNKNOWN_LABEL,
};

fn matched() -> MatchOutcome {
    MatchOutcome {
        matched: true,
        label: "Ayu".to_string(),
        confidence: 0.9,
        rejection: None,
    }
}

fn mount() -> FormMount {
    FormMount {
        date: mounted_at().date(),
        time: mounted_at().time(),
        location: Some(kiosk_location()),
        shifts: ShiftCatalog::new(vec![office_shift()]),
    }
}

fn visible_form(flow: FlowKind) -> AttendanceForm {
    let mut form = AttendanceForm::new(flow);
    form.record_match(&matched()).expect("match opens scanner");
    form.record_scan(IdentityToken("EMP-9".to_string()), mount())
        .expect("scan mounts form");
    form
}

fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
}

#[test]
fn scan_gate_is_unreachable_without_a_match() {
    let mut form = AttendanceForm::new(FlowKind::Entry);
    assert_eq!(
        form.record_scan(IdentityToken("EMP-9".to_string()), mount()),
        Err(FormError::GateLocked {
            current: FormStage::Unverified
        })
    );

    let rejected = MatchOutcome {
        matched: false,
        label: UNKNOWN_LABEL.to_string(),
        confidence: 0.1,
        rejection: Some(MatchRejection::DistanceAboveThreshold {
            distance: 0.9,
            threshold: 0.6,
        }),
    };
    assert_eq!(form.record_match(&rejected), Err(FormError::NotMatched));
    assert_eq!(form.stage(), FormStage::Unverified);
    assert!(form.draft().is_none());
}

#[test]
fn form_is_unreachable_until_a_code_is_decoded() {
    let mut form = AttendanceForm::new(FlowKind::Entry);
    form.record_match(&matched()).expect("match");
    assert_eq!(form.stage(), FormStage::ScannerActive);
    assert_eq!(form.matched_label(), Some("Ayu"));

    assert!(matches!(
        form.apply(FormInput::default()),
        Err(FormError::GateLocked {
            current: FormStage::ScannerActive
        })
    ));
    assert!(matches!(
        form.begin_submit(),
        Err(FormError::GateLocked { .. })
    ));
}

#[test]
fn entry_plan_carries_mount_time_and_location() {
    let mut form = visible_form(FlowKind::Entry);
    form.apply(FormInput {
        shift_id: Some(ShiftId("1".to_string())),
        remark: Some("  on site  ".to_string()),
        punctuality: Some(Punctuality::OnTime),
        ..FormInput::default()
    })
    .expect("input applies");

    let SubmissionPlan::Single(intent) = form.begin_submit().expect("plan") else {
        panic!("entry flow yields a single intent");
    };
    assert_eq!(intent.direction, Direction::Entry);
    assert_eq!(intent.employee, IdentityToken("EMP-9".to_string()));
    assert_eq!(intent.time, mounted_at().time());
    assert_eq!(intent.location, Some(kiosk_location()));
    assert_eq!(intent.remark, "on site");
    assert_eq!(
        intent.status,
        Some(AttendanceStatus::Entry(Punctuality::OnTime))
    );
    assert_eq!(form.stage(), FormStage::Submitting);
}

#[test]
fn shift_outside_the_catalog_is_rejected_before_submission() {
    let mut form = visible_form(FlowKind::Entry);
    assert_eq!(form.begin_submit(), Err(FormError::MissingShift));

    form.apply(FormInput {
        shift_id: Some(ShiftId("99".to_string())),
        ..FormInput::default()
    })
    .expect("input applies");
    assert_eq!(
        form.begin_submit(),
        Err(FormError::UnknownShift(ShiftId("99".to_string())))
    );
    assert_eq!(form.stage(), FormStage::FormVisible);
}

#[test]
fn exit_requires_a_status() {
    let mut form = visible_form(FlowKind::Exit);
    form.apply(FormInput {
        shift_id: Some(ShiftId("1".to_string())),
        ..FormInput::default()
    })
    .expect("input applies");
    assert_eq!(form.begin_submit(), Err(FormError::MissingExitStatus));

    form.apply(FormInput {
        exit_status: Some(ExitStatus::PermittedLeave),
        ..FormInput::default()
    })
    .expect("status applies");
    let SubmissionPlan::Single(intent) = form.begin_submit().expect("plan") else {
        panic!("exit flow yields a single intent");
    };
    assert_eq!(intent.direction, Direction::Exit);
    assert_eq!(
        intent.status,
        Some(AttendanceStatus::Exit(ExitStatus::PermittedLeave))
    );
}

#[test]
fn fields_outside_the_flow_are_refused() {
    let mut entry = visible_form(FlowKind::Entry);
    assert!(matches!(
        entry.apply(FormInput {
            exit_status: Some(ExitStatus::Sick),
            ..FormInput::default()
        }),
        Err(FormError::NotApplicable { .. })
    ));

    let mut exit = visible_form(FlowKind::Exit);
    assert!(matches!(
        exit.apply(FormInput {
            punctuality: Some(Punctuality::Late),
            ..FormInput::default()
        }),
        Err(FormError::NotApplicable { .. })
    ));
    assert_eq!(
        exit.apply(FormInput {
            exit_time: Some(time(17, 0)),
            ..FormInput::default()
        }),
        Err(FormError::NotApplicable {
            field: "exit_time",
            flow: FlowKind::Exit
        })
    );
    assert_eq!(
        exit.apply(FormInput {
            exit_remark: Some("early train".to_string()),
            ..FormInput::default()
        }),
        Err(FormError::NotApplicable {
            field: "exit_remark",
            flow: FlowKind::Exit
        })
    );
}

#[test]
fn recorded_entry_freezes_the_shared_fields() {
    let mut form = visible_form(FlowKind::Daily);
    form.apply(FormInput {
        shift_id: Some(ShiftId("1".to_string())),
        remark: Some("site visit".to_string()),
        exit_status: Some(ExitStatus::Sick),
        exit_time: Some(time(17, 0)),
        ..FormInput::default()
    })
    .expect("daily input");
    form.record_entry();
    assert!(form.entry_recorded());

    assert_eq!(
        form.apply(FormInput {
            shift_id: Some(ShiftId("2".to_string())),
            ..FormInput::default()
        }),
        Err(FormError::EntryRecorded { field: "shift_id" })
    );
    assert_eq!(
        form.apply(FormInput {
            remark: Some("different".to_string()),
            ..FormInput::default()
        }),
        Err(FormError::EntryRecorded { field: "remark" })
    );
    assert_eq!(
        form.apply(FormInput {
            punctuality: Some(Punctuality::Late),
            ..FormInput::default()
        }),
        Err(FormError::EntryRecorded {
            field: "punctuality"
        })
    );

    form.apply(FormInput {
        shift_id: Some(ShiftId("1".to_string())),
        exit_time: Some(time(17, 30)),
        exit_remark: Some("left late".to_string()),
        ..FormInput::default()
    })
    .expect("exit fields stay editable");
    let draft = form.draft().expect("draft");
    assert_eq!(draft.shift_id, Some(ShiftId("1".to_string())));
    assert_eq!(draft.exit_time, Some(time(17, 30)));
}

#[test]
fn daily_exit_may_not_precede_entry() {
    let mut form = visible_form(FlowKind::Daily);
    form.apply(FormInput {
        shift_id: Some(ShiftId("1".to_string())),
        exit_status: Some(ExitStatus::RegularDeparture),
        ..FormInput::default()
    })
    .expect("input applies");
    assert_eq!(form.begin_submit(), Err(FormError::MissingExitTime));

    form.apply(FormInput {
        exit_time: Some(time(7, 30)),
        ..FormInput::default()
    })
    .expect("time applies");
    assert!(matches!(
        form.begin_submit(),
        Err(FormError::ExitBeforeEntry { .. })
    ));

    form.apply(FormInput {
        exit_time: Some(time(17, 0)),
        exit_remark: Some("went home".to_string()),
        ..FormInput::default()
    })
    .expect("time applies");
    let SubmissionPlan::Daily(cycle) = form.begin_submit().expect("plan") else {
        panic!("daily flow yields a cycle");
    };
    assert_eq!(cycle.entry.time, mounted_at().time());
    assert_eq!(cycle.exit.time, time(17, 0));
    assert_eq!(cycle.exit.remark, "went home");
    assert_eq!(cycle.entry.shift_id, cycle.exit.shift_id);
    assert_eq!(cycle.entry.location, cycle.exit.location);
    assert_eq!(cycle.entry.date, cycle.exit.date);
}

#[test]
fn double_submit_is_refused_and_failure_allows_resubmission() {
    let mut form = visible_form(FlowKind::Entry);
    form.apply(FormInput {
        shift_id: Some(ShiftId("1".to_string())),
        ..FormInput::default()
    })
    .expect("input applies");

    form.begin_submit().expect("first submit");
    assert_eq!(form.begin_submit(), Err(FormError::AlreadySubmitting));
    assert_eq!(
        form.apply(FormInput::default()),
        Err(FormError::AlreadySubmitting)
    );

    form.finish(false);
    assert_eq!(form.stage(), FormStage::Failed);
    assert_eq!(
        form.draft().and_then(|draft| draft.shift_id.clone()),
        Some(ShiftId("1".to_string()))
    );

    form.begin_submit().expect("resubmit after failure");
    form.finish(true);
    assert_eq!(form.stage(), FormStage::Succeeded);
    assert_eq!(form.begin_submit(), Err(FormError::AlreadySubmitted));
}

#[test]
fn form_input_reads_hour_minute_times() {
    let input: FormInput = serde_json::from_str(
        r#"{"shift_id": 1, "exit_status": "sick", "exit_time": "17:30"}"#,
    )
    .expect("input parses");
    assert_eq!(input.shift_id, Some(ShiftId("1".to_string())));
    assert_eq!(input.exit_status, Some(ExitStatus::Sick));
    assert_eq!(input.exit_time, Some(time(17, 30)));

    assert!(serde_json::from_str::<FormInput>(r#"{"exit_time": "half past five"}"#).is_err());
}
