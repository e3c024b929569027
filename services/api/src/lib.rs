mod cli;
mod infra;
mod routes;
mod server;

use referral_orchestrator::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
