//! Connection and behavior settings, read from flags or the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tenancy_aws::{ClientError, Credentials, DEFAULT_IAM_ENDPOINT, IamClient, S3Client};
use tenancy_core::{DEFAULT_DELETE_CONCURRENCY, RetryPolicy};
use url::Url;

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Access key id of the administrative credentials
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: String,

    /// Secret access key of the administrative credentials
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: String,

    /// Session token, when the administrative credentials are temporary
    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,

    /// Region of the bucket
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,

    /// S3 endpoint [default: https://s3.<region>.amazonaws.com]
    #[arg(long, env = "TENANCY_S3_ENDPOINT")]
    pub s3_endpoint: Option<Url>,

    /// IAM endpoint
    #[arg(long, env = "TENANCY_IAM_ENDPOINT", default_value = DEFAULT_IAM_ENDPOINT)]
    pub iam_endpoint: Url,

    /// Force path-style (true) or virtual-hosted (false) bucket addressing
    #[arg(long, env = "TENANCY_PATH_STYLE")]
    pub path_style: Option<bool>,

    /// Per-request timeout in seconds
    #[arg(long, env = "TENANCY_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Attempts for idempotent reads before giving up
    #[arg(long, env = "TENANCY_READ_RETRIES", default_value_t = 3)]
    pub read_retries: u32,

    /// Object deletions kept in flight during teardown
    #[arg(long, env = "TENANCY_DELETE_CONCURRENCY", default_value_t = DEFAULT_DELETE_CONCURRENCY)]
    pub delete_concurrency: usize,

    /// Directory the credential files are written to
    #[arg(long, env = "TENANCY_CREDENTIALS_DIR", default_value = ".")]
    pub credentials_dir: PathBuf,
}

impl Settings {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.access_key_id, &self.secret_access_key)
            .with_session_token(self.session_token.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.read_retries.max(1),
            ..RetryPolicy::default()
        }
    }

    pub fn iam_client(&self) -> Result<IamClient, ClientError> {
        IamClient::new(
            self.iam_endpoint.clone(),
            self.credentials(),
            self.timeout(),
        )
    }

    pub fn s3_client(&self) -> Result<S3Client, ClientError> {
        let endpoint = match &self.s3_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => tenancy_aws::default_endpoint(&self.region)?,
        };
        let client = S3Client::new(endpoint, &self.region, self.credentials(), self.timeout())?;
        Ok(match self.path_style {
            Some(path_style) => client.with_path_style(path_style),
            None => client,
        })
    }
}
