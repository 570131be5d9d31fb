use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::Settings;

#[derive(Debug, Parser)]
#[command(name = "tenancy")]
#[command(bin_name = "tenancy")]
#[command(
    about = "Give users read access to their own folder of a shared S3 bucket",
    long_about = None
)]
pub struct TenancyCli {
    #[command(flatten)]
    pub settings: Settings,

    /// Log output format (logs go to stderr)
    #[arg(long, value_enum, env = "TENANCY_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create an identity with read access to `<bucket>/<user>/` and issue
    /// its credential pair
    Provision(Target),
    /// Revoke the identity's credentials, remove its policies and delete
    /// the identity together with everything under `<bucket>/<user>/`
    Deprovision(Target),
}

#[derive(Debug, Clone, Args)]
pub struct Target {
    /// Shared bucket
    #[arg(long)]
    pub bucket: String,

    /// User name; also the user's folder in the bucket
    #[arg(long)]
    pub user: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}
