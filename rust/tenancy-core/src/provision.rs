//! User provisioning.

use tenancy_policy::{PolicyDocument, policy_name, require};
use tracing::{debug, info, instrument};

use crate::{
    BackendError, CredentialPair, IdentityBackend, ObjectStore, ProvisionStep, Resource,
    RetryPolicy, TenancyError,
};

/// Creates an identity that can read exactly one folder of a shared bucket.
///
/// Provisioning is a linear sequence of backend calls with no rollback. When a
/// call fails, the remaining steps are skipped and the returned
/// [`TenancyError::Provision`] lists every resource created so far, so the
/// run can be finished by hand or undone with the
/// [`Deprovisioner`](crate::Deprovisioner).
#[derive(Debug, Clone)]
pub struct Provisioner<Identity, Storage> {
    identity: Identity,
    storage: Storage,
    retry: RetryPolicy,
}

impl<Identity, Storage> Provisioner<Identity, Storage>
where
    Identity: IdentityBackend,
    Storage: ObjectStore,
{
    /// Create a provisioner over the given collaborators.
    pub fn new(identity: Identity, storage: Storage) -> Self {
        Self {
            identity,
            storage,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the retry schedule used for the bucket check.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Provision `user` with read access to `<bucket>/<user>/`.
    ///
    /// Returns the single credential pair issued for the new identity. The
    /// caller owns persisting it; the secret cannot be retrieved again.
    ///
    /// # Errors
    ///
    /// - [`TenancyError::InvalidArgument`] for blank names or a missing
    ///   bucket, before any backend mutation
    /// - [`TenancyError::Provision`] when a backend call fails; an existing
    ///   identity surfaces as `AlreadyExists` with nothing created
    #[instrument(skip(self))]
    pub async fn provision(&self, bucket: &str, user: &str) -> Result<CredentialPair, TenancyError> {
        require("bucket name", bucket)?;
        require("user name", user)?;
        let document = PolicyDocument::for_prefix(bucket, user)?;
        let rendered = document.to_json_pretty()?;
        debug!(user, document = %rendered, "built policy document");

        let mut created = Vec::new();

        let exists = self
            .retry
            .read("bucket", || self.storage.bucket_exists(bucket))
            .await
            .map_err(|source| failed(ProvisionStep::CheckBucket, &created, source))?;
        if !exists {
            return Err(TenancyError::InvalidArgument(format!(
                "bucket `{bucket}` does not exist"
            )));
        }

        self.identity
            .create_identity(user)
            .await
            .map_err(|source| failed(ProvisionStep::CreateIdentity, &created, source))?;
        created.push(Resource::Identity(user.to_string()));
        info!(user, "created identity");

        let policy = self
            .identity
            .create_policy(&policy_name(user), &document)
            .await
            .map_err(|source| failed(ProvisionStep::CreatePolicy, &created, source))?;
        created.push(Resource::Policy(policy.clone()));
        info!(user, %policy, "created policy");

        self.identity
            .attach_policy(user, &policy)
            .await
            .map_err(|source| failed(ProvisionStep::AttachPolicy, &created, source))?;
        created.push(Resource::Attachment {
            identity: user.to_string(),
            policy: policy.clone(),
        });
        info!(user, %policy, "attached policy");

        let credential = self
            .identity
            .create_credential(user)
            .await
            .map_err(|source| failed(ProvisionStep::CreateCredential, &created, source))?;
        info!(
            user,
            access_key_id = %credential.access_key_id,
            "issued credential pair"
        );

        Ok(credential)
    }
}

fn failed(step: ProvisionStep, created: &[Resource], source: BackendError) -> TenancyError {
    tracing::error!(%step, created = created.len(), error = %source, "provisioning failed");
    TenancyError::Provision {
        step,
        created: created.to_vec(),
        source,
    }
}
