use crate::infra::build_pipeline_deps;
use chrono::NaiveTime;
use clap::Args;
use hr_attendance::config::AppConfig;
use hr_attendance::error::AppError;
use hr_attendance::session::Session;
use hr_attendance::telemetry;
use hr_attendance::workflows::attendance::{
    AttendancePipeline, AttendanceSaga, ExitStatus, FlowKind, FormError, FormInput, Notification,
    PipelineError, Punctuality, SagaOutcome, ShiftId,
};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub(crate) struct CheckInArgs {
    /// Company the kiosk user belongs to
    #[arg(long)]
    pub(crate) company: String,
    /// Company-user id whose stored photo is matched against the camera
    #[arg(long)]
    pub(crate) employee: String,
    /// Display name used as the match label
    #[arg(long, default_value = "")]
    pub(crate) name: String,
    /// Attendance flow to run (entry, exit, daily)
    #[arg(long, value_parser = crate::infra::parse_flow, default_value = "entry")]
    pub(crate) flow: FlowKind,
    /// Shift id from the active shift catalog
    #[arg(long)]
    pub(crate) shift: Option<String>,
    /// Free-text remark for the entry
    #[arg(long)]
    pub(crate) remark: Option<String>,
    /// Punctuality for the entry (on-time, late)
    #[arg(long, value_parser = crate::infra::parse_punctuality)]
    pub(crate) punctuality: Option<Punctuality>,
    /// Exit status (regular-departure, permitted-leave, sick)
    #[arg(long, value_parser = crate::infra::parse_exit_status)]
    pub(crate) exit_status: Option<ExitStatus>,
    /// Exit time for the daily flow (HH:MM)
    #[arg(long, value_parser = crate::infra::parse_time)]
    pub(crate) exit_time: Option<NaiveTime>,
    /// Free-text remark for the exit
    #[arg(long)]
    pub(crate) exit_remark: Option<String>,
    /// Face verification attempts before giving up
    #[arg(long, default_value_t = 5)]
    pub(crate) attempts: u32,
}

impl CheckInArgs {
    fn form_input(&self) -> FormInput {
        let daily = self.flow == FlowKind::Daily;
        let needs_exit = self.flow.needs_exit_status();
        FormInput {
            shift_id: self.shift.clone().map(ShiftId),
            remark: self.remark.clone(),
            punctuality: if self.flow == FlowKind::Exit {
                None
            } else {
                self.punctuality
            },
            exit_status: if needs_exit { self.exit_status } else { None },
            exit_time: if daily { self.exit_time } else { None },
            exit_remark: if daily {
                self.exit_remark.clone()
            } else {
                None
            },
        }
    }
}

pub(crate) async fn run_check_in(args: CheckInArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let deps = build_pipeline_deps(&config)?;
    let interval = config.pipeline.scan_interval;
    let session = Session::new(&args.company, &args.employee, &args.name)?;

    let mut pipeline = AttendancePipeline::start(deps, session, args.flow).await?;
    let result = drive(&mut pipeline, &args, interval).await;

    print_notifications(pipeline.notifications());
    pipeline.cancel();

    let saga = result?;
    render_saga(&saga);
    ensure_recorded(saga.outcome())
}

/// Any outcome short of a completed saga ends the command with an error exit.
fn ensure_recorded(outcome: SagaOutcome) -> Result<(), AppError> {
    match outcome {
        SagaOutcome::Completed => Ok(()),
        partial => Err(AppError::Incomplete(partial)),
    }
}

async fn drive(
    pipeline: &mut AttendancePipeline,
    args: &CheckInArgs,
    interval: std::time::Duration,
) -> Result<AttendanceSaga, AppError> {
    let mut matched = false;
    for attempt in 1..=args.attempts.max(1) {
        let outcome = pipeline.verify_face().await?;
        if outcome.matched {
            info!(attempt, label = %outcome.label, "face verified");
            matched = true;
            break;
        }
        warn!(attempt, "face did not match; retrying");
        tokio::time::sleep(interval).await;
    }
    if !matched {
        return Err(PipelineError::Form(FormError::NotMatched).into());
    }

    println!("Face verified. Show your identity code to the camera (Ctrl-C to abort).");
    let canceller = pipeline.canceller();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });
    let scanned = pipeline.scan_identity().await;
    interrupt.abort();
    let token = scanned?;
    info!(employee = %token.0, "identity code scanned");

    pipeline.update_form(args.form_input())?;
    Ok(pipeline.submit().await?)
}

fn print_notifications(notifications: &[Notification]) {
    for notification in notifications {
        println!("[{:?}] {}", notification.severity, notification.message);
    }
}

fn render_saga(saga: &AttendanceSaga) {
    println!("\n{}", saga.user_message());
    match serde_json::to_string_pretty(saga) {
        Ok(json) => println!("{json}"),
        Err(err) => warn!(error = %err, "failed to render submission result"),
    }
}
