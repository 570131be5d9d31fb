//! IAM Query API adapter.
//!
//! Each [`IdentityBackend`] operation is a single signed `GET` against the
//! IAM endpoint with `Action`, `Version` and the action's parameters in the
//! query string. Responses are XML documents named `<Action>Response`
//! wrapping an `<Action>Result`.

use std::pin::pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{Stream, TryStreamExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tenancy_core::{
    AccessKeyId, BackendError, CredentialPair, IdentityBackend, Page, PolicyId, RetryPolicy,
    SecretAccessKey, paginate,
};
use tenancy_policy::{POLICY_DESCRIPTION, PolicyDocument};
use tracing::instrument;
use url::Url;

use crate::request::{Call, parse_xml};
use crate::signing::encode_query;
use crate::{ClientError, Credentials};

/// IAM API version spoken by this client.
pub const IAM_API_VERSION: &str = "2010-05-08";

/// Global IAM endpoint.
pub const DEFAULT_IAM_ENDPOINT: &str = "https://iam.amazonaws.com";

/// IAM is a global service signed in `us-east-1`.
const IAM_SIGNING_REGION: &str = "us-east-1";

/// A list wrapped in `<member>` elements.
#[derive(Debug, Deserialize)]
struct Members<T> {
    #[serde(rename = "member", default = "Vec::new")]
    member: Vec<T>,
}

impl<T> Default for Members<T> {
    fn default() -> Self {
        Self { member: Vec::new() }
    }
}

/// Page of an IAM listing; `Marker` is only meaningful while truncated.
fn page<T>(items: Vec<T>, is_truncated: bool, marker: Option<String>) -> Page<T> {
    Page::new(items, marker.filter(|_| is_truncated))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatePolicyResponse {
    create_policy_result: CreatePolicyResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatePolicyResult {
    policy: PolicyMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyMetadata {
    policy_name: String,
    arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPoliciesResponse {
    list_policies_result: ListPoliciesResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPoliciesResult {
    #[serde(default)]
    policies: Members<PolicyMetadata>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListAttachedUserPoliciesResponse {
    list_attached_user_policies_result: ListAttachedUserPoliciesResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListAttachedUserPoliciesResult {
    #[serde(default)]
    attached_policies: Members<AttachedPolicy>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AttachedPolicy {
    policy_arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateAccessKeyResponse {
    create_access_key_result: CreateAccessKeyResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateAccessKeyResult {
    access_key: AccessKey,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccessKey {
    user_name: String,
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    create_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListAccessKeysResponse {
    list_access_keys_result: ListAccessKeysResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListAccessKeysResult {
    #[serde(default)]
    access_key_metadata: Members<AccessKeyMetadata>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccessKeyMetadata {
    access_key_id: String,
}

/// [`IdentityBackend`] backed by the AWS IAM Query API.
#[derive(Debug, Clone)]
pub struct IamClient {
    http: reqwest::Client,
    endpoint: Url,
    credentials: Credentials,
}

impl IamClient {
    /// Create a client for `endpoint` (normally [`DEFAULT_IAM_ENDPOINT`]).
    pub fn new(
        endpoint: Url,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        if endpoint.host_str().is_none() {
            return Err(ClientError::InvalidEndpoint(format!(
                "`{endpoint}` has no host"
            )));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            credentials,
        })
    }

    fn action_url(&self, action: &str, params: &[(&str, &str)]) -> Url {
        let mut query = vec![
            ("Action".to_string(), action.to_string()),
            ("Version".to_string(), IAM_API_VERSION.to_string()),
        ];
        query.extend(
            params
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        );
        let mut url = self.endpoint.clone();
        url.set_path("/");
        url.set_query(Some(&encode_query(&query)));
        url
    }

    async fn invoke(&self, action: &str, params: &[(&str, &str)]) -> Result<String, BackendError> {
        Call::new("GET", self.action_url(action, params), IAM_SIGNING_REGION)
            .for_service("iam")
            .text(&self.http, &self.credentials)
            .await
    }

    async fn query<T>(&self, action: &str, params: &[(&str, &str)]) -> Result<T, BackendError>
    where
        T: DeserializeOwned,
    {
        let body = self.invoke(action, params).await?;
        parse_xml(action, &body)
    }

    /// One page of the policies owned by this account.
    async fn list_local_policies(
        &self,
        marker: Option<String>,
    ) -> Result<Page<PolicyMetadata>, BackendError> {
        let mut params = vec![("Scope", "Local")];
        if let Some(marker) = marker.as_deref() {
            params.push(("Marker", marker));
        }
        let response: ListPoliciesResponse = self.query("ListPolicies", &params).await?;
        Ok(policy_page(response))
    }
}

#[async_trait]
impl IdentityBackend for IamClient {
    #[instrument(skip(self))]
    async fn create_identity(&self, name: &str) -> Result<(), BackendError> {
        self.invoke("CreateUser", &[("UserName", name)]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_identity(&self, name: &str) -> Result<(), BackendError> {
        self.invoke("DeleteUser", &[("UserName", name)]).await?;
        Ok(())
    }

    #[instrument(skip(self, document))]
    async fn create_policy(
        &self,
        name: &str,
        document: &PolicyDocument,
    ) -> Result<PolicyId, BackendError> {
        let document = document
            .to_json()
            .map_err(|error| BackendError::InvalidArgument(error.to_string()))?;
        let response: CreatePolicyResponse = self
            .query(
                "CreatePolicy",
                &[
                    ("PolicyName", name),
                    ("PolicyDocument", document.as_str()),
                    ("Description", POLICY_DESCRIPTION),
                ],
            )
            .await?;
        Ok(PolicyId::new(response.create_policy_result.policy.arn))
    }

    #[instrument(skip(self))]
    async fn find_policy(&self, name: &str) -> Result<Option<PolicyId>, BackendError> {
        let policies = paginate(RetryPolicy::never(), "policies", |marker| {
            self.list_local_policies(marker)
        });
        find_named(policies, name).await
    }

    #[instrument(skip(self))]
    async fn attach_policy(&self, identity: &str, policy: &PolicyId) -> Result<(), BackendError> {
        self.invoke(
            "AttachUserPolicy",
            &[("UserName", identity), ("PolicyArn", policy.as_str())],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_attached_policies(
        &self,
        identity: &str,
        marker: Option<&str>,
    ) -> Result<Page<PolicyId>, BackendError> {
        let mut params = vec![("UserName", identity)];
        if let Some(marker) = marker {
            params.push(("Marker", marker));
        }
        let response: ListAttachedUserPoliciesResponse =
            self.query("ListAttachedUserPolicies", &params).await?;
        let result = response.list_attached_user_policies_result;
        let items = result
            .attached_policies
            .member
            .into_iter()
            .map(|policy| PolicyId::new(policy.policy_arn))
            .collect();
        Ok(page(items, result.is_truncated, result.marker))
    }

    #[instrument(skip(self))]
    async fn detach_policy(&self, identity: &str, policy: &PolicyId) -> Result<(), BackendError> {
        self.invoke(
            "DetachUserPolicy",
            &[("UserName", identity), ("PolicyArn", policy.as_str())],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_policy(&self, policy: &PolicyId) -> Result<(), BackendError> {
        self.invoke("DeletePolicy", &[("PolicyArn", policy.as_str())])
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_credential(&self, identity: &str) -> Result<CredentialPair, BackendError> {
        let response: CreateAccessKeyResponse = self
            .query("CreateAccessKey", &[("UserName", identity)])
            .await?;
        Ok(credential_pair(response.create_access_key_result.access_key))
    }

    #[instrument(skip(self))]
    async fn list_credentials(
        &self,
        identity: &str,
        marker: Option<&str>,
    ) -> Result<Page<AccessKeyId>, BackendError> {
        let mut params = vec![("UserName", identity)];
        if let Some(marker) = marker {
            params.push(("Marker", marker));
        }
        let response: ListAccessKeysResponse = self.query("ListAccessKeys", &params).await?;
        let result = response.list_access_keys_result;
        let items = result
            .access_key_metadata
            .member
            .into_iter()
            .map(|key| AccessKeyId::new(key.access_key_id))
            .collect();
        Ok(page(items, result.is_truncated, result.marker))
    }

    #[instrument(skip(self))]
    async fn delete_credential(
        &self,
        identity: &str,
        key: &AccessKeyId,
    ) -> Result<(), BackendError> {
        self.invoke(
            "DeleteAccessKey",
            &[("UserName", identity), ("AccessKeyId", key.as_str())],
        )
        .await?;
        Ok(())
    }
}

fn policy_page(response: ListPoliciesResponse) -> Page<PolicyMetadata> {
    let result = response.list_policies_result;
    page(result.policies.member, result.is_truncated, result.marker)
}

/// The first policy called `name`. Pages after the match are never fetched.
async fn find_named<S>(policies: S, name: &str) -> Result<Option<PolicyId>, BackendError>
where
    S: Stream<Item = Result<PolicyMetadata, BackendError>>,
{
    let mut policies = pin!(policies);
    while let Some(policy) = policies.try_next().await? {
        if policy.policy_name == name {
            return Ok(Some(PolicyId::new(policy.arn)));
        }
    }
    Ok(None)
}

fn credential_pair(key: AccessKey) -> CredentialPair {
    let issued_at = key
        .create_date
        .as_deref()
        .and_then(|date| DateTime::parse_from_rfc3339(date).ok())
        .map(|date| date.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    CredentialPair {
        user_name: key.user_name,
        access_key_id: AccessKeyId::new(key.access_key_id),
        secret_access_key: SecretAccessKey::new(key.secret_access_key),
        issued_at,
    }
}
