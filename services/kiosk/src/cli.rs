use crate::check_in::{run_check_in, CheckInArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use hr_attendance::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "HR Attendance Kiosk",
    about = "Run the attendance kiosk service or record a check-in from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run one gated attendance flow against the configured devices and HR service
    CheckIn(CheckInArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::CheckIn(args) => run_check_in(args).await,
    }
}
