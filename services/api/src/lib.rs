mod cli;
mod demo;
mod infra;
mod routes;
mod server;

use buergerbuero::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
