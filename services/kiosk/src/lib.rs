mod check_in;
mod cli;
mod infra;
mod routes;
mod server;

use hr_attendance::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
