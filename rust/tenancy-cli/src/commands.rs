//! The `provision` and `deprovision` commands.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::json;
use tenancy_aws::ClientError;
use tenancy_core::{
    CredentialPair, Deprovisioner, IdentityBackend, ObjectStore, Outcome, Provisioner,
    RetryPolicy, TenancyError,
};
use thiserror::Error;

use crate::{Command, CredentialStore, Settings, StoreError, Target};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to set up AWS client: {0}")]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    /// Provisioning succeeded but the pair could not be written down
    #[error("Credential pair for `{}` was issued but not saved: {source}", .pair.user_name)]
    Unsaved {
        pair: Box<CredentialPair>,
        #[source]
        source: StoreError,
    },

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// Result of a successful `provision`.
#[derive(Debug)]
pub struct Provisioned {
    pub pair: CredentialPair,
    pub credentials_file: PathBuf,
}

/// The operations behind the subcommands, over any pair of collaborators.
#[derive(Debug, Clone)]
pub struct Tenancy<Identity, Storage> {
    identity: Identity,
    storage: Storage,
    store: CredentialStore,
    retry: RetryPolicy,
    concurrency: usize,
}

impl<Identity, Storage> Tenancy<Identity, Storage>
where
    Identity: IdentityBackend + Clone,
    Storage: ObjectStore + Clone,
{
    pub fn new(identity: Identity, storage: Storage, store: CredentialStore) -> Self {
        Self {
            identity,
            storage,
            store,
            retry: RetryPolicy::default(),
            concurrency: tenancy_core::DEFAULT_DELETE_CONCURRENCY,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Provision `target` and save the issued pair to the credential store.
    ///
    /// An existing credential file stops the command before any backend call.
    pub async fn provision(&self, target: &Target) -> Result<Provisioned, CommandError> {
        self.store.ensure_available(&target.user).await?;

        let pair = Provisioner::new(self.identity.clone(), self.storage.clone())
            .with_retry(self.retry)
            .provision(&target.bucket, &target.user)
            .await?;

        match self.store.save(&pair).await {
            Ok(credentials_file) => Ok(Provisioned {
                pair,
                credentials_file,
            }),
            Err(source) => Err(CommandError::Unsaved {
                pair: Box::new(pair),
                source,
            }),
        }
    }

    /// Tear down `target`.
    pub async fn deprovision(&self, target: &Target) -> Result<Outcome, CommandError> {
        let outcome = Deprovisioner::new(self.identity.clone(), self.storage.clone())
            .with_retry(self.retry)
            .with_concurrency(self.concurrency)
            .deprovision(&target.bucket, &target.user)
            .await?;
        Ok(outcome)
    }

    /// Run `command`, writing its JSON result line to `out`.
    pub async fn execute(
        &self,
        command: &Command,
        out: &mut impl Write,
    ) -> Result<(), CommandError> {
        match command {
            Command::Provision(target) => match self.provision(target).await {
                Ok(provisioned) => {
                    writeln!(
                        out,
                        "{}",
                        credential_line(&provisioned.pair, Some(&provisioned.credentials_file))
                    )?;
                    Ok(())
                }
                Err(CommandError::Unsaved { pair, source }) => {
                    // Last chance to hand over the secret.
                    writeln!(out, "{}", credential_line(&pair, None))?;
                    Err(CommandError::Unsaved { pair, source })
                }
                Err(error) => Err(error),
            },
            Command::Deprovision(target) => {
                let outcome = self.deprovision(target).await?;
                writeln!(out, "{}", json!({ "user": target.user, "outcome": outcome }))?;
                Ok(())
            }
        }
    }
}

/// Build the AWS-backed [`Tenancy`] described by `settings`.
pub fn connect(
    settings: &Settings,
) -> Result<Tenancy<tenancy_aws::IamClient, tenancy_aws::S3Client>, CommandError> {
    Ok(Tenancy::new(
        settings.iam_client()?,
        settings.s3_client()?,
        CredentialStore::new(&settings.credentials_dir),
    )
    .with_retry(settings.retry())
    .with_concurrency(settings.delete_concurrency))
}

/// The JSON line announcing an issued credential pair.
pub fn credential_line(pair: &CredentialPair, file: Option<&Path>) -> serde_json::Value {
    json!({
        "user_name": pair.user_name,
        "access_key_id": pair.access_key_id,
        "secret_access_key": pair.secret_access_key.expose(),
        "issued_at": pair.issued_at.to_rfc3339(),
        "credentials_file": file.map(|path| path.display().to_string()),
    })
}
