//! In-memory collaborators.
//!
//! Both fakes enforce the same rules as the real services where the core
//! depends on them: names are unique, a policy cannot be deleted while
//! attached, an identity cannot be deleted while it holds keys or policies,
//! and enumerations are paged. Failures can be injected per operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tenancy_policy::PolicyDocument;
use tokio::sync::RwLock;

use crate::{
    AccessKeyId, BackendError, CredentialPair, IdentityBackend, ObjectStore, Page, PolicyId,
    SecretAccessKey,
};

const ACCOUNT: &str = "000000000000";
const DEFAULT_PAGE_SIZE: usize = 100;
const MAX_ACCESS_KEYS: usize = 2;

/// Operations of [`MemoryIdentityBackend`] that can be counted and failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum IdentityOperation {
    CreateIdentity,
    DeleteIdentity,
    CreatePolicy,
    FindPolicy,
    AttachPolicy,
    ListAttachedPolicies,
    DetachPolicy,
    DeletePolicy,
    CreateCredential,
    ListCredentials,
    DeleteCredential,
}

/// Operations of [`MemoryObjectStore`] that can be counted and failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StoreOperation {
    BucketExists,
    ListObjects,
    DeleteObject,
}

#[derive(Debug)]
struct Fault {
    skip: usize,
    error: BackendError,
}

#[derive(Debug)]
struct Faults<Operation> {
    calls: HashMap<Operation, usize>,
    pending: HashMap<Operation, VecDeque<Fault>>,
}

impl<Operation> Default for Faults<Operation> {
    fn default() -> Self {
        Self {
            calls: HashMap::new(),
            pending: HashMap::new(),
        }
    }
}

impl<Operation> Faults<Operation>
where
    Operation: Copy + Eq + Hash,
{
    fn enter(&mut self, operation: Operation) -> Result<(), BackendError> {
        *self.calls.entry(operation).or_default() += 1;
        let Some(queue) = self.pending.get_mut(&operation) else {
            return Ok(());
        };
        match queue.front_mut() {
            Some(fault) if fault.skip > 0 => {
                fault.skip -= 1;
                Ok(())
            }
            Some(_) => match queue.pop_front() {
                Some(fault) => Err(fault.error),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn inject(&mut self, operation: Operation, skip: usize, error: BackendError) {
        self.pending
            .entry(operation)
            .or_default()
            .push_back(Fault { skip, error });
    }

    fn calls(&self, operation: Operation) -> usize {
        self.calls.get(&operation).copied().unwrap_or_default()
    }
}

/// Slice `items` into a page that starts after the item rendered as `marker`.
fn page_after<T, F>(
    items: Vec<T>,
    marker: Option<&str>,
    page_size: usize,
    render: F,
) -> Result<Page<T>, BackendError>
where
    F: Fn(&T) -> String,
{
    let start = match marker {
        None => 0,
        Some(marker) => match items.iter().position(|item| render(item) == marker) {
            Some(index) => index + 1,
            None => {
                return Err(BackendError::InvalidArgument(format!(
                    "unknown marker `{marker}`"
                )));
            }
        },
    };
    let page: Vec<T> = items.into_iter().skip(start).collect();
    if page.len() > page_size {
        let page: Vec<T> = page.into_iter().take(page_size).collect();
        let next = page.last().map(&render);
        Ok(Page::new(page, next))
    } else {
        Ok(Page::last(page))
    }
}

/// Identity names: 1 to 64 characters of `[A-Za-z0-9_+=,.@-]`.
fn valid_name(name: &str, max: usize) -> bool {
    (1..=max).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_+=,.@-".contains(c))
}

#[derive(Debug, Default)]
struct IdentityRecord {
    policies: Vec<PolicyId>,
    keys: Vec<AccessKeyId>,
}

#[derive(Debug)]
struct PolicyRecord {
    name: String,
    document: Option<PolicyDocument>,
}

#[derive(Debug, Default)]
struct IdentityState {
    identities: BTreeMap<String, IdentityRecord>,
    policies: BTreeMap<PolicyId, PolicyRecord>,
    issued: u64,
    faults: Faults<IdentityOperation>,
}

impl IdentityState {
    fn identity(&mut self, name: &str) -> Result<&mut IdentityRecord, BackendError> {
        self.identities
            .get_mut(name)
            .ok_or_else(|| BackendError::NotFound(format!("identity `{name}`")))
    }

    fn is_attached(&self, policy: &PolicyId) -> bool {
        self.identities
            .values()
            .any(|identity| identity.policies.contains(policy))
    }
}

/// An [`IdentityBackend`] kept entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryIdentityBackend {
    state: Arc<RwLock<IdentityState>>,
    page_size: usize,
}

impl Default for MemoryIdentityBackend {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MemoryIdentityBackend {
    /// Serve enumerations in pages of at most `page_size` items.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fail the next call to `operation` with `error`.
    pub async fn fail(&self, operation: IdentityOperation, error: BackendError) {
        self.fail_after(operation, 0, error).await;
    }

    /// Let `skip` calls to `operation` succeed, then fail the next one.
    pub async fn fail_after(&self, operation: IdentityOperation, skip: usize, error: BackendError) {
        self.state.write().await.faults.inject(operation, skip, error);
    }

    /// How many times `operation` was called.
    pub async fn calls(&self, operation: IdentityOperation) -> usize {
        self.state.read().await.faults.calls(operation)
    }

    /// Whether an identity named `name` exists.
    pub async fn identity_exists(&self, name: &str) -> bool {
        self.state.read().await.identities.contains_key(name)
    }

    /// Access keys issued to `name`, in issue order.
    pub async fn credentials(&self, name: &str) -> Vec<AccessKeyId> {
        self.state
            .read()
            .await
            .identities
            .get(name)
            .map(|identity| identity.keys.clone())
            .unwrap_or_default()
    }

    /// Policies attached to `name`, in attach order.
    pub async fn attached_policies(&self, name: &str) -> Vec<PolicyId> {
        self.state
            .read()
            .await
            .identities
            .get(name)
            .map(|identity| identity.policies.clone())
            .unwrap_or_default()
    }

    /// Id of the account policy named `name`.
    pub async fn find_policy_id(&self, name: &str) -> Option<PolicyId> {
        self.state
            .read()
            .await
            .policies
            .iter()
            .find(|(id, policy)| !id.is_provider_managed() && policy.name == name)
            .map(|(id, _)| id.clone())
    }

    /// Whether `policy` exists.
    pub async fn policy_exists(&self, policy: &PolicyId) -> bool {
        self.state.read().await.policies.contains_key(policy)
    }

    /// The document `policy` was created from.
    pub async fn policy_document(&self, policy: &PolicyId) -> Option<PolicyDocument> {
        self.state
            .read()
            .await
            .policies
            .get(policy)
            .and_then(|policy| policy.document.clone())
    }

    /// Number of account policies.
    pub async fn policy_count(&self) -> usize {
        self.state
            .read()
            .await
            .policies
            .keys()
            .filter(|id| !id.is_provider_managed())
            .count()
    }

    /// Register a provider-managed policy that can be attached but not deleted.
    pub async fn install_provider_policy(&self, name: &str) -> PolicyId {
        let id = PolicyId::new(format!("arn:aws:iam::aws:policy/{name}"));
        self.state.write().await.policies.insert(
            id.clone(),
            PolicyRecord {
                name: name.to_string(),
                document: None,
            },
        );
        id
    }
}

#[async_trait]
impl IdentityBackend for MemoryIdentityBackend {
    async fn create_identity(&self, name: &str) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.faults.enter(IdentityOperation::CreateIdentity)?;
        if !valid_name(name, 64) {
            return Err(BackendError::InvalidArgument(format!(
                "invalid identity name `{name}`"
            )));
        }
        if state.identities.contains_key(name) {
            return Err(BackendError::AlreadyExists(format!("identity `{name}`")));
        }
        state
            .identities
            .insert(name.to_string(), IdentityRecord::default());
        Ok(())
    }

    async fn delete_identity(&self, name: &str) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.faults.enter(IdentityOperation::DeleteIdentity)?;
        let identity = state.identity(name)?;
        if !identity.keys.is_empty() || !identity.policies.is_empty() {
            return Err(BackendError::DependencyExists(format!(
                "identity `{name}` still has {} access keys and {} attached policies",
                identity.keys.len(),
                identity.policies.len()
            )));
        }
        state.identities.remove(name);
        Ok(())
    }

    async fn create_policy(
        &self,
        name: &str,
        document: &PolicyDocument,
    ) -> Result<PolicyId, BackendError> {
        let mut state = self.state.write().await;
        state.faults.enter(IdentityOperation::CreatePolicy)?;
        if !valid_name(name, 128) {
            return Err(BackendError::InvalidArgument(format!(
                "invalid policy name `{name}`"
            )));
        }
        let id = PolicyId::new(format!("arn:aws:iam::{ACCOUNT}:policy/{name}"));
        if state.policies.contains_key(&id) {
            return Err(BackendError::AlreadyExists(format!("policy `{name}`")));
        }
        state.policies.insert(
            id.clone(),
            PolicyRecord {
                name: name.to_string(),
                document: Some(document.clone()),
            },
        );
        Ok(id)
    }

    async fn find_policy(&self, name: &str) -> Result<Option<PolicyId>, BackendError> {
        self.state
            .write()
            .await
            .faults
            .enter(IdentityOperation::FindPolicy)?;
        Ok(self.find_policy_id(name).await)
    }

    async fn attach_policy(&self, identity: &str, policy: &PolicyId) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.faults.enter(IdentityOperation::AttachPolicy)?;
        if !state.policies.contains_key(policy) {
            return Err(BackendError::NotFound(format!("policy `{policy}`")));
        }
        let identity = state.identity(identity)?;
        if !identity.policies.contains(policy) {
            identity.policies.push(policy.clone());
        }
        Ok(())
    }

    async fn list_attached_policies(
        &self,
        identity: &str,
        marker: Option<&str>,
    ) -> Result<Page<PolicyId>, BackendError> {
        let mut state = self.state.write().await;
        state.faults.enter(IdentityOperation::ListAttachedPolicies)?;
        let policies = state.identity(identity)?.policies.clone();
        page_after(policies, marker, self.page_size, PolicyId::to_string)
    }

    async fn detach_policy(&self, identity: &str, policy: &PolicyId) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.faults.enter(IdentityOperation::DetachPolicy)?;
        let record = state.identity(identity)?;
        let before = record.policies.len();
        record.policies.retain(|attached| attached != policy);
        if record.policies.len() == before {
            return Err(BackendError::NotFound(format!(
                "policy `{policy}` is not attached to `{identity}`"
            )));
        }
        Ok(())
    }

    async fn delete_policy(&self, policy: &PolicyId) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.faults.enter(IdentityOperation::DeletePolicy)?;
        if !state.policies.contains_key(policy) {
            return Err(BackendError::NotFound(format!("policy `{policy}`")));
        }
        if policy.is_provider_managed() {
            return Err(BackendError::Rejected {
                code: "AccessDenied".into(),
                message: format!("policy `{policy}` is managed by the provider"),
            });
        }
        if state.is_attached(policy) {
            return Err(BackendError::DependencyExists(format!(
                "policy `{policy}` is still attached"
            )));
        }
        state.policies.remove(policy);
        Ok(())
    }

    async fn create_credential(&self, identity: &str) -> Result<CredentialPair, BackendError> {
        let mut state = self.state.write().await;
        state.faults.enter(IdentityOperation::CreateCredential)?;
        state.issued += 1;
        let access_key_id = AccessKeyId::new(format!("AKIAMEMORY{:010}", state.issued));
        let record = state.identity(identity)?;
        if record.keys.len() >= MAX_ACCESS_KEYS {
            return Err(BackendError::Rejected {
                code: "LimitExceeded".into(),
                message: format!("identity `{identity}` already has {MAX_ACCESS_KEYS} access keys"),
            });
        }
        record.keys.push(access_key_id.clone());

        let secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(40)
            .map(char::from)
            .collect();
        Ok(CredentialPair {
            user_name: identity.to_string(),
            access_key_id,
            secret_access_key: SecretAccessKey::new(secret),
            issued_at: Utc::now(),
        })
    }

    async fn list_credentials(
        &self,
        identity: &str,
        marker: Option<&str>,
    ) -> Result<Page<AccessKeyId>, BackendError> {
        let mut state = self.state.write().await;
        state.faults.enter(IdentityOperation::ListCredentials)?;
        let keys = state.identity(identity)?.keys.clone();
        page_after(keys, marker, self.page_size, AccessKeyId::to_string)
    }

    async fn delete_credential(
        &self,
        identity: &str,
        key: &AccessKeyId,
    ) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.faults.enter(IdentityOperation::DeleteCredential)?;
        let record = state.identity(identity)?;
        let before = record.keys.len();
        record.keys.retain(|issued| issued != key);
        if record.keys.len() == before {
            return Err(BackendError::NotFound(format!("access key `{key}`")));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StoreState {
    buckets: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    faults: Faults<StoreOperation>,
}

/// An [`ObjectStore`] kept entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    state: Arc<RwLock<StoreState>>,
    page_size: usize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MemoryObjectStore {
    /// Serve listings in pages of at most `page_size` keys.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create an empty bucket. Existing buckets are left untouched.
    pub async fn create_bucket(&self, bucket: &str) {
        self.state
            .write()
            .await
            .buckets
            .entry(bucket.to_string())
            .or_default();
    }

    /// Store an object, creating the bucket if needed.
    pub async fn put_object(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.state
            .write()
            .await
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body.into());
    }

    /// Every key in `bucket`, sorted.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Fail the next call to `operation` with `error`.
    pub async fn fail(&self, operation: StoreOperation, error: BackendError) {
        self.fail_after(operation, 0, error).await;
    }

    /// Let `skip` calls to `operation` succeed, then fail the next one.
    pub async fn fail_after(&self, operation: StoreOperation, skip: usize, error: BackendError) {
        self.state.write().await.faults.inject(operation, skip, error);
    }

    /// How many times `operation` was called.
    pub async fn calls(&self, operation: StoreOperation) -> usize {
        self.state.read().await.faults.calls(operation)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BackendError> {
        let mut state = self.state.write().await;
        state.faults.enter(StoreOperation::BucketExists)?;
        Ok(state.buckets.contains_key(bucket))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<Page<String>, BackendError> {
        let mut state = self.state.write().await;
        state.faults.enter(StoreOperation::ListObjects)?;
        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| BackendError::NotFound(format!("bucket `{bucket}`")))?;
        let keys: Vec<String> = objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        page_after(keys, continuation, self.page_size, String::clone)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        state.faults.enter(StoreOperation::DeleteObject)?;
        state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| BackendError::NotFound(format!("bucket `{bucket}`")))?
            .remove(key);
        Ok(())
    }
}
