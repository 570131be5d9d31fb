use std::fmt;

use thiserror::Error;

use crate::{AccessKeyId, PolicyId};

/// Classification of every failure the core can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Empty or otherwise unusable bucket or user name
    InvalidArgument,
    /// Identity or policy name collision
    AlreadyExists,
    /// Operating on a nonexistent identity, policy or credential
    NotFound,
    /// Deletion attempted while dependent resources remain attached
    DependencyExists,
    /// Provisioning aborted after creating some resources
    PartialProvisioning,
    /// Teardown aborted after removing some resources
    PartialDeprovisioning,
    /// Transient connectivity or authentication failure
    BackendUnavailable,
    /// The backend refused the request for another reason
    BackendRejected,
}

impl ErrorKind {
    /// Stable name used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::AlreadyExists => "AlreadyExists",
            Self::NotFound => "NotFound",
            Self::DependencyExists => "DependencyExists",
            Self::PartialProvisioning => "PartialProvisioning",
            Self::PartialDeprovisioning => "PartialDeprovisioning",
            Self::BackendUnavailable => "BackendUnavailable",
            Self::BackendRejected => "BackendRejected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the identity and storage collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend rejected a name or parameter
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A resource with the requested name already exists
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// The addressed resource does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The resource still has dependents (attachments, credentials)
    #[error("Dependent resources still exist: {0}")]
    DependencyExists(String),

    /// The backend could not be reached or refused our credentials
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Any other refusal, carrying the backend's own error code
    #[error("Backend rejected request ({code}): {message}")]
    Rejected {
        /// Backend error code
        code: String,
        /// Backend error message
        message: String,
    },
}

impl BackendError {
    /// The [`ErrorKind`] this error maps to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::DependencyExists(_) => ErrorKind::DependencyExists,
            Self::Unavailable(_) => ErrorKind::BackendUnavailable,
            Self::Rejected { .. } => ErrorKind::BackendRejected,
        }
    }

    /// Whether repeating the same read may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Whether the addressed resource is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Steps of a provisioning run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    /// Confirm the bucket exists
    CheckBucket,
    /// Create the identity
    CreateIdentity,
    /// Create the policy resource
    CreatePolicy,
    /// Attach the policy to the identity
    AttachPolicy,
    /// Issue the credential pair
    CreateCredential,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CheckBucket => "check-bucket",
            Self::CreateIdentity => "create-identity",
            Self::CreatePolicy => "create-policy",
            Self::AttachPolicy => "attach-policy",
            Self::CreateCredential => "create-credential",
        })
    }
}

/// Steps of a teardown run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeprovisionStep {
    /// Enumerate and delete every access key
    RevokeCredentials,
    /// Enumerate and detach every attached policy
    DetachPolicies,
    /// Delete the policies owned by the identity
    DeletePolicies,
    /// Delete the identity
    DeleteIdentity,
    /// Confirm the bucket exists before touching objects
    CheckBucket,
    /// Enumerate and delete every object under the prefix
    DeleteObjects,
}

impl fmt::Display for DeprovisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CheckBucket => "check-bucket",
            Self::RevokeCredentials => "revoke-credentials",
            Self::DetachPolicies => "detach-policies",
            Self::DeletePolicies => "delete-policies",
            Self::DeleteIdentity => "delete-identity",
            Self::DeleteObjects => "delete-objects",
        })
    }
}

/// A backend resource named in a partial-state report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// An identity, by name
    Identity(String),
    /// A policy resource
    Policy(PolicyId),
    /// The attachment of a policy to an identity
    Attachment {
        /// Identity name
        identity: String,
        /// Attached policy
        policy: PolicyId,
    },
    /// An access key
    Credential(AccessKeyId),
    /// A stored object
    Object {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
    },
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity(name) => write!(f, "identity {name}"),
            Self::Policy(policy) => write!(f, "policy {policy}"),
            Self::Attachment { identity, policy } => {
                write!(f, "attachment of policy {policy} to identity {identity}")
            }
            Self::Credential(key) => write!(f, "access key {key}"),
            Self::Object { bucket, key } => write!(f, "object s3://{bucket}/{key}"),
        }
    }
}

/// Errors returned by [`Provisioner`](crate::Provisioner) and
/// [`Deprovisioner`](crate::Deprovisioner).
#[derive(Error, Debug)]
pub enum TenancyError {
    /// Rejected before any backend mutation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Provisioning stopped; `created` lists what already exists
    #[error("Provisioning stopped at step `{step}`: {source}")]
    Provision {
        /// The failing step
        step: ProvisionStep,
        /// Resources created before the failure
        created: Vec<Resource>,
        /// The collaborator failure
        #[source]
        source: BackendError,
    },

    /// Teardown stopped; `removed` lists what is already gone and
    /// `remaining` what was known to still exist
    #[error("Deprovisioning stopped at step `{step}`: {source}")]
    Deprovision {
        /// The failing step
        step: DeprovisionStep,
        /// Resources removed before the failure
        removed: Vec<Resource>,
        /// Resources known to still exist
        remaining: Vec<Resource>,
        /// The collaborator failure
        #[source]
        source: BackendError,
    },
}

impl TenancyError {
    /// The [`ErrorKind`] of this error.
    ///
    /// A run that changed backend state before failing reports
    /// [`ErrorKind::PartialProvisioning`] or [`ErrorKind::PartialDeprovisioning`];
    /// otherwise the collaborator's own kind is reported.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Provision {
                created, source, ..
            } => {
                if created.is_empty() {
                    source.kind()
                } else {
                    ErrorKind::PartialProvisioning
                }
            }
            Self::Deprovision {
                removed, source, ..
            } => {
                if removed.is_empty() {
                    source.kind()
                } else {
                    ErrorKind::PartialDeprovisioning
                }
            }
        }
    }

    /// The failing step, if the error occurred after validation.
    pub fn step(&self) -> Option<String> {
        match self {
            Self::InvalidArgument(_) => None,
            Self::Provision { step, .. } => Some(step.to_string()),
            Self::Deprovision { step, .. } => Some(step.to_string()),
        }
    }

    /// The collaborator failure behind this error, if any.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Self::InvalidArgument(_) => None,
            Self::Provision { source, .. } | Self::Deprovision { source, .. } => Some(source),
        }
    }

    /// Resources an operator has to look at to finish or undo the run.
    pub fn needs_attention(&self) -> &[Resource] {
        match self {
            Self::InvalidArgument(_) => &[],
            Self::Provision { created, .. } => created,
            Self::Deprovision { remaining, .. } => remaining,
        }
    }
}

impl From<tenancy_policy::PolicyError> for TenancyError {
    fn from(error: tenancy_policy::PolicyError) -> Self {
        TenancyError::InvalidArgument(error.to_string())
    }
}
