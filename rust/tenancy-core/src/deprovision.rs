//! User teardown.

use futures_util::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use tenancy_policy::{key_prefix, policy_name, require};
use tracing::{debug, info, instrument, warn};

use crate::{
    AccessKeyId, BackendError, DeprovisionStep, IdentityBackend, ObjectStore, PolicyId, Resource,
    RetryPolicy, TenancyError, paginate,
};

/// Default number of object deletions kept in flight.
pub const DEFAULT_DELETE_CONCURRENCY: usize = 8;

/// What a teardown run removed.
///
/// Resources that turned out to be already gone are not listed, so a second
/// run over the same user yields an empty outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Outcome {
    /// Revoked access keys
    pub revoked_credentials: Vec<AccessKeyId>,
    /// Policies detached from the identity
    pub detached_policies: Vec<PolicyId>,
    /// Policies deleted
    pub deleted_policies: Vec<PolicyId>,
    /// Whether this run deleted the identity
    pub identity_deleted: bool,
    /// Keys of deleted objects
    pub deleted_objects: Vec<String>,
}

impl Outcome {
    /// Whether the run found nothing to remove.
    pub fn is_noop(&self) -> bool {
        self.revoked_credentials.is_empty()
            && self.detached_policies.is_empty()
            && self.deleted_policies.is_empty()
            && !self.identity_deleted
            && self.deleted_objects.is_empty()
    }
}

/// Removes everything [`Provisioner`](crate::Provisioner) created for a user,
/// plus the user's stored objects.
///
/// Steps run in dependency order: credentials, policy attachments, policies,
/// identity, objects. Teardown is not transactional. A failing step stops the
/// run and [`TenancyError::Deprovision`] names the step, what was already
/// removed and what was known to remain. Re-running picks up where the failed
/// run stopped, since missing resources count as already removed.
#[derive(Debug, Clone)]
pub struct Deprovisioner<Identity, Storage> {
    identity: Identity,
    storage: Storage,
    retry: RetryPolicy,
    concurrency: usize,
}

impl<Identity, Storage> Deprovisioner<Identity, Storage>
where
    Identity: IdentityBackend,
    Storage: ObjectStore,
{
    /// Create a deprovisioner over the given collaborators.
    pub fn new(identity: Identity, storage: Storage) -> Self {
        Self {
            identity,
            storage,
            retry: RetryPolicy::default(),
            concurrency: DEFAULT_DELETE_CONCURRENCY,
        }
    }

    /// Set the retry schedule used for enumerations.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set how many object deletions may be in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Tear down `user` and delete `<bucket>/<user>/`.
    ///
    /// The identity side is removed first and does not depend on the bucket,
    /// so a missing bucket still leaves no credentials behind. It then fails
    /// the run at [`DeprovisionStep::CheckBucket`] with a `NotFound` source.
    #[instrument(skip(self))]
    pub async fn deprovision(&self, bucket: &str, user: &str) -> Result<Outcome, TenancyError> {
        require("bucket name", bucket)?;
        require("user name", user)?;

        let mut run = Run::new(user);

        self.revoke_credentials(&mut run).await?;
        self.remove_policies(&mut run).await?;
        self.delete_identity(&mut run).await?;
        self.check_bucket(&mut run, bucket).await?;
        self.delete_objects(&mut run, bucket).await?;

        info!(user, bucket, noop = run.outcome.is_noop(), "deprovisioned");
        Ok(run.outcome)
    }

    async fn revoke_credentials(&self, run: &mut Run<'_>) -> Result<(), TenancyError> {
        let user = run.user;
        let step = DeprovisionStep::RevokeCredentials;

        let keys: Vec<AccessKeyId> = absent_as_empty(
            paginate(self.retry, "access keys", |marker| async move {
                self.identity
                    .list_credentials(user, marker.as_deref())
                    .await
            })
            .try_collect()
            .await,
        )
        .map_err(|source| run.failed(step, source, Vec::new()))?;

        if keys.is_empty() {
            warn!(user, "no access keys found");
        }

        for (index, key) in keys.iter().enumerate() {
            match self.identity.delete_credential(user, key).await {
                Ok(()) => {
                    info!(user, access_key_id = %key, "revoked access key");
                    run.removed.push(Resource::Credential(key.clone()));
                    run.outcome.revoked_credentials.push(key.clone());
                }
                Err(error) if error.is_not_found() => {
                    debug!(user, access_key_id = %key, "access key already gone");
                }
                Err(source) => {
                    let remaining = keys[index..]
                        .iter()
                        .cloned()
                        .map(Resource::Credential)
                        .collect();
                    return Err(run.failed(step, source, remaining));
                }
            }
        }
        Ok(())
    }

    async fn remove_policies(&self, run: &mut Run<'_>) -> Result<(), TenancyError> {
        let user = run.user;

        let attached: Vec<PolicyId> = absent_as_empty(
            paginate(self.retry, "attached policies", |marker| async move {
                self.identity
                    .list_attached_policies(user, marker.as_deref())
                    .await
            })
            .try_collect()
            .await,
        )
        .map_err(|source| run.failed(DeprovisionStep::DetachPolicies, source, Vec::new()))?;

        // A run interrupted between create and attach leaves the policy
        // unattached; it is only reachable through its name.
        let name = policy_name(user);
        let named = self
            .retry
            .read("policy by name", || self.identity.find_policy(&name))
            .await
            .map_err(|source| {
                let remaining = attached.iter().cloned().map(Resource::Policy).collect();
                run.failed(DeprovisionStep::DetachPolicies, source, remaining)
            })?;

        if attached.is_empty() && named.is_none() {
            warn!(user, "no policies found");
        }

        for (index, policy) in attached.iter().enumerate() {
            match self.identity.detach_policy(user, policy).await {
                Ok(()) => {
                    info!(user, %policy, "detached policy");
                    run.removed.push(Resource::Attachment {
                        identity: user.to_string(),
                        policy: policy.clone(),
                    });
                    run.outcome.detached_policies.push(policy.clone());
                }
                Err(error) if error.is_not_found() => {
                    debug!(user, %policy, "policy already detached");
                }
                Err(source) => {
                    let remaining = attached[index..]
                        .iter()
                        .map(|policy| Resource::Attachment {
                            identity: user.to_string(),
                            policy: policy.clone(),
                        })
                        .collect();
                    return Err(run.failed(DeprovisionStep::DetachPolicies, source, remaining));
                }
            }
        }

        let mut owned: Vec<PolicyId> = attached
            .into_iter()
            .filter(|policy| !policy.is_provider_managed())
            .collect();
        if let Some(policy) = named {
            if !owned.contains(&policy) {
                owned.push(policy);
            }
        }

        for (index, policy) in owned.iter().enumerate() {
            match self.identity.delete_policy(policy).await {
                Ok(()) => {
                    info!(user, %policy, "deleted policy");
                    run.removed.push(Resource::Policy(policy.clone()));
                    run.outcome.deleted_policies.push(policy.clone());
                }
                Err(error) if error.is_not_found() => {
                    debug!(user, %policy, "policy already deleted");
                }
                Err(source) => {
                    let remaining = owned[index..]
                        .iter()
                        .cloned()
                        .map(Resource::Policy)
                        .collect();
                    return Err(run.failed(DeprovisionStep::DeletePolicies, source, remaining));
                }
            }
        }
        Ok(())
    }

    async fn delete_identity(&self, run: &mut Run<'_>) -> Result<(), TenancyError> {
        let user = run.user;
        match self.identity.delete_identity(user).await {
            Ok(()) => {
                info!(user, "deleted identity");
                run.removed.push(Resource::Identity(user.to_string()));
                run.outcome.identity_deleted = true;
                Ok(())
            }
            Err(error) if error.is_not_found() => {
                warn!(user, "identity not found");
                run.identity_gone = true;
                Ok(())
            }
            Err(source) => Err(run.failed(DeprovisionStep::DeleteIdentity, source, Vec::new())),
        }
    }

    async fn check_bucket(&self, run: &mut Run<'_>, bucket: &str) -> Result<(), TenancyError> {
        let step = DeprovisionStep::CheckBucket;
        let exists = self
            .retry
            .read("bucket", || self.storage.bucket_exists(bucket))
            .await
            .map_err(|source| run.failed(step, source, Vec::new()))?;
        if exists {
            Ok(())
        } else {
            warn!(user = run.user, bucket, "bucket not found, objects not deleted");
            Err(run.failed(
                step,
                BackendError::NotFound(format!("bucket `{bucket}`")),
                Vec::new(),
            ))
        }
    }

    async fn delete_objects(&self, run: &mut Run<'_>, bucket: &str) -> Result<(), TenancyError> {
        let prefix = key_prefix(run.user);
        let step = DeprovisionStep::DeleteObjects;

        let keys: Vec<String> = paginate(self.retry, "objects", |token| {
            let prefix = &prefix;
            async move {
                self.storage
                    .list_objects(bucket, prefix, token.as_deref())
                    .await
            }
        })
        .try_collect()
        .await
        .map_err(|source| run.failed(step, source, Vec::new()))?;

        if keys.is_empty() {
            warn!(user = run.user, bucket, "no objects found");
            return Ok(());
        }
        info!(user = run.user, bucket, count = keys.len(), "deleting objects");

        let results: Vec<(String, Result<(), BackendError>)> = stream::iter(keys)
            .map(|key| async move {
                let result = self.storage.delete_object(bucket, &key).await;
                (key, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut failure = None;
        let mut remaining = Vec::new();
        for (key, result) in results {
            match result {
                Ok(()) => {
                    debug!(bucket, key = %key, "deleted object");
                    run.removed.push(Resource::Object {
                        bucket: bucket.to_string(),
                        key: key.clone(),
                    });
                    run.outcome.deleted_objects.push(key);
                }
                Err(error) if error.is_not_found() => {
                    debug!(bucket, key = %key, "object already gone");
                }
                Err(error) => {
                    warn!(bucket, key = %key, %error, "failed to delete object");
                    remaining.push(Resource::Object {
                        bucket: bucket.to_string(),
                        key,
                    });
                    if failure.is_none() {
                        failure = Some(error);
                    }
                }
            }
        }
        run.outcome.deleted_objects.sort();

        match failure {
            Some(source) => Err(run.failed(step, source, remaining)),
            None => Ok(()),
        }
    }
}

/// Progress of one teardown run.
struct Run<'a> {
    user: &'a str,
    outcome: Outcome,
    removed: Vec<Resource>,
    identity_gone: bool,
}

impl<'a> Run<'a> {
    fn new(user: &'a str) -> Self {
        Self {
            user,
            outcome: Outcome::default(),
            removed: Vec::new(),
            identity_gone: false,
        }
    }

    fn failed(
        &self,
        step: DeprovisionStep,
        source: BackendError,
        mut remaining: Vec<Resource>,
    ) -> TenancyError {
        if !self.outcome.identity_deleted && !self.identity_gone {
            remaining.push(Resource::Identity(self.user.to_string()));
        }
        tracing::error!(
            user = self.user,
            %step,
            removed = self.removed.len(),
            error = %source,
            "deprovisioning failed"
        );
        TenancyError::Deprovision {
            step,
            removed: self.removed.clone(),
            remaining,
            source,
        }
    }
}

/// Listing the children of a missing identity means there is nothing left.
fn absent_as_empty<T>(result: Result<Vec<T>, BackendError>) -> Result<Vec<T>, BackendError> {
    match result {
        Err(error) if error.is_not_found() => Ok(Vec::new()),
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, IdentityOperation, MemoryIdentityBackend, MemoryObjectStore};

    #[tokio::test]
    async fn it_treats_a_missing_identity_as_already_removed() {
        let storage = MemoryObjectStore::default();
        storage.create_bucket("shared-bucket").await;
        let deprovisioner = Deprovisioner::new(MemoryIdentityBackend::default(), storage);

        let outcome = deprovisioner.deprovision("shared-bucket", "nobody").await.unwrap();

        assert!(outcome.is_noop());
    }

    #[tokio::test]
    async fn it_removes_the_identity_even_when_the_bucket_is_gone() {
        let identity = MemoryIdentityBackend::default();
        identity.create_identity("alex").await.unwrap();
        let key = identity.create_credential("alex").await.unwrap();
        let deprovisioner = Deprovisioner::new(identity.clone(), MemoryObjectStore::default());

        let error = deprovisioner.deprovision("shared-bucket", "alex").await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::PartialDeprovisioning);
        assert_eq!(error.step().as_deref(), Some("check-bucket"));
        assert!(error.needs_attention().is_empty());
        match error {
            TenancyError::Deprovision { removed, source, .. } => {
                assert!(removed.contains(&Resource::Credential(key.access_key_id)));
                assert!(removed.contains(&Resource::Identity("alex".into())));
                assert!(source.is_not_found());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!identity.identity_exists("alex").await);
        assert!(identity.credentials("alex").await.is_empty());
    }

    #[tokio::test]
    async fn it_reports_what_remains_when_revocation_fails() {
        let storage = MemoryObjectStore::default();
        storage.create_bucket("shared-bucket").await;
        let identity = MemoryIdentityBackend::default();
        identity.create_identity("alex").await.unwrap();
        let first = identity.create_credential("alex").await.unwrap();
        let second = identity.create_credential("alex").await.unwrap();
        identity
            .fail_after(
                IdentityOperation::DeleteCredential,
                1,
                BackendError::Unavailable("connection reset".into()),
            )
            .await;

        let error = Deprovisioner::new(identity.clone(), storage)
            .deprovision("shared-bucket", "alex")
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::PartialDeprovisioning);
        assert_eq!(error.step().as_deref(), Some("revoke-credentials"));
        match error {
            TenancyError::Deprovision {
                removed, remaining, ..
            } => {
                assert_eq!(removed, vec![Resource::Credential(first.access_key_id)]);
                assert_eq!(
                    remaining,
                    vec![
                        Resource::Credential(second.access_key_id),
                        Resource::Identity("alex".into())
                    ]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn it_skips_deleting_provider_managed_policies() {
        let storage = MemoryObjectStore::default();
        storage.create_bucket("shared-bucket").await;
        let identity = MemoryIdentityBackend::default();
        identity.create_identity("alex").await.unwrap();
        let managed = identity.install_provider_policy("ReadOnlyAccess").await;
        identity.attach_policy("alex", &managed).await.unwrap();

        let outcome = Deprovisioner::new(identity.clone(), storage)
            .deprovision("shared-bucket", "alex")
            .await
            .unwrap();

        assert_eq!(outcome.detached_policies, vec![managed.clone()]);
        assert!(outcome.deleted_policies.is_empty());
        assert!(identity.policy_exists(&managed).await);
        assert!(outcome.identity_deleted);
    }
}
