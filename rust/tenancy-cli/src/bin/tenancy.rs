use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tenancy_cli::{CommandError, TenancyCli, connect, init_logging, report};

#[tokio::main]
pub async fn main() -> Result<ExitCode> {
    // Before parsing, so env-backed flags see values from `.env`
    dotenvy::dotenv().ok();

    let cli = TenancyCli::parse();
    init_logging(cli.log_format)?;

    match run(&cli).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(error) => {
            tracing::error!(kind = error.kind(), "{error}");
            for line in report(&error) {
                eprintln!("{line}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(cli: &TenancyCli) -> Result<(), CommandError> {
    let tenancy = connect(&cli.settings)?;
    let mut stdout = std::io::stdout().lock();
    tenancy.execute(&cli.command, &mut stdout).await
}
