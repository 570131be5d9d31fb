//! Collaborator contracts.
//!
//! The core never talks to a concrete service. Everything it needs from the
//! identity backend is captured by [`IdentityBackend`], and everything it needs
//! from the object store by [`ObjectStore`]. Enumerations return one [`Page`]
//! at a time; callers drive the continuation marker.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenancy_policy::PolicyDocument;

use crate::BackendError;

/// Resource part of policies owned by the provider rather than the account,
/// in every partition (`arn:<partition>:iam::aws:policy/...`).
const PROVIDER_MANAGED_POLICY_RESOURCE: &str = "iam::aws:policy/";

/// Identifier of a policy resource (an ARN for IAM).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(String);

impl PolicyId {
    /// Wrap a backend policy identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the policy belongs to the provider and therefore can only be
    /// detached, never deleted.
    pub fn is_provider_managed(&self) -> bool {
        self.0
            .strip_prefix("arn:")
            .and_then(|rest| rest.split_once(':'))
            .is_some_and(|(_, rest)| rest.starts_with(PROVIDER_MANAGED_POLICY_RESOURCE))
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public half of a credential pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessKeyId(String);

impl AccessKeyId {
    /// Wrap a backend access key id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secret half of a credential pair. Redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretAccessKey(String);

impl SecretAccessKey {
    /// Wrap secret material returned by the backend.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The secret itself. Only the credential store should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretAccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretAccessKey(<redacted>)")
    }
}

/// Credential pair issued for an identity.
///
/// The backend hands out the secret exactly once; losing this value means the
/// pair has to be revoked and a new one issued.
#[derive(Debug, Clone)]
pub struct CredentialPair {
    /// Identity the pair belongs to
    pub user_name: String,
    /// Access key id
    pub access_key_id: AccessKeyId,
    /// Secret access key
    pub secret_access_key: SecretAccessKey,
    /// When the backend issued the pair
    pub issued_at: DateTime<Utc>,
}

/// One page of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items in this page
    pub items: Vec<T>,
    /// Marker for the next page, `None` on the last page
    pub next: Option<String>,
}

impl<T> Page<T> {
    /// A page followed by more results.
    pub fn new(items: Vec<T>, next: Option<String>) -> Self {
        Self { items, next }
    }

    /// The final page of an enumeration.
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Identity and access management backend.
///
/// Implementations map their native failures onto [`BackendError`]; in
/// particular a missing identity, policy or key must surface as
/// [`BackendError::NotFound`] and a deletion blocked by attachments or keys
/// as [`BackendError::DependencyExists`].
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Create an identity with no policies and no credentials.
    async fn create_identity(&self, name: &str) -> Result<(), BackendError>;

    /// Delete an identity. Fails with `DependencyExists` while it still holds
    /// credentials or attached policies.
    async fn delete_identity(&self, name: &str) -> Result<(), BackendError>;

    /// Create a policy resource from `document` under `name`.
    async fn create_policy(
        &self,
        name: &str,
        document: &PolicyDocument,
    ) -> Result<PolicyId, BackendError>;

    /// Look up a policy owned by this account by name.
    async fn find_policy(&self, name: &str) -> Result<Option<PolicyId>, BackendError>;

    /// Attach `policy` to `identity`.
    async fn attach_policy(&self, identity: &str, policy: &PolicyId) -> Result<(), BackendError>;

    /// One page of the policies attached to `identity`.
    async fn list_attached_policies(
        &self,
        identity: &str,
        marker: Option<&str>,
    ) -> Result<Page<PolicyId>, BackendError>;

    /// Detach `policy` from `identity`.
    async fn detach_policy(&self, identity: &str, policy: &PolicyId) -> Result<(), BackendError>;

    /// Delete a policy resource. Fails with `DependencyExists` while attached.
    async fn delete_policy(&self, policy: &PolicyId) -> Result<(), BackendError>;

    /// Issue a new credential pair for `identity`.
    async fn create_credential(&self, identity: &str) -> Result<CredentialPair, BackendError>;

    /// One page of the access keys issued to `identity`.
    async fn list_credentials(
        &self,
        identity: &str,
        marker: Option<&str>,
    ) -> Result<Page<AccessKeyId>, BackendError>;

    /// Revoke one access key of `identity`.
    async fn delete_credential(
        &self,
        identity: &str,
        key: &AccessKeyId,
    ) -> Result<(), BackendError>;
}

/// Object store holding the users' folders.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether `bucket` exists and is reachable with our credentials.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError>;

    /// One page of the keys in `bucket` starting with `prefix`.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<Page<String>, BackendError>;

    /// Delete one object. Deleting a missing key succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_recognizes_provider_managed_policies() {
        assert!(PolicyId::new("arn:aws:iam::aws:policy/ReadOnlyAccess").is_provider_managed());
        assert!(
            !PolicyId::new("arn:aws:iam::123456789012:policy/s3-prefix-read-for-alex")
                .is_provider_managed()
        );
    }

    #[test]
    fn it_recognizes_provider_managed_policies_in_every_partition() {
        assert!(
            PolicyId::new("arn:aws-us-gov:iam::aws:policy/ReadOnlyAccess").is_provider_managed()
        );
        assert!(PolicyId::new("arn:aws-cn:iam::aws:policy/ReadOnlyAccess").is_provider_managed());
        assert!(
            !PolicyId::new("arn:aws-cn:iam::123456789012:policy/s3-prefix-read-for-alex")
                .is_provider_managed()
        );
        assert!(!PolicyId::new("iam::aws:policy/ReadOnlyAccess").is_provider_managed());
    }

    #[test]
    fn it_redacts_secrets_from_debug_output() {
        let secret = SecretAccessKey::new("wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY");
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains("wJalr"));
        assert_eq!(secret.expose(), "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY");
    }
}
