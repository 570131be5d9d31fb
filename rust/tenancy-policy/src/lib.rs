#![warn(missing_docs)]

//! Access policy documents that confine an identity to a single key prefix.
//!
//! Every provisioned user gets exactly one policy. The policy is derived from
//! the bucket name and the user name, and the user name doubles as the key
//! prefix inside the bucket:
//!
//! ```
//! use tenancy_policy::{Action, PolicyDocument};
//!
//! let document = PolicyDocument::for_prefix("shared-bucket", "alex").unwrap();
//!
//! assert_eq!(
//!     document.actions().into_iter().collect::<Vec<_>>(),
//!     vec![Action::ListBucket, Action::GetObject]
//! );
//! assert!(document.to_json().unwrap().contains("arn:aws:s3:::shared-bucket/alex/*"));
//! ```
//!
//! The set of grantable actions is the closed [`Action`] enum, so a document
//! built here can never hand out write, delete or bucket-wide listing rights.

mod document;
pub use document::*;

mod error;
pub use error::*;

/// Description attached to every generated policy.
pub const POLICY_DESCRIPTION: &str =
    "Grant permission to list and get objects under the user folder";

/// Name under which the policy for `user` is stored in the identity backend.
///
/// The name is deterministic so that a policy left behind by an interrupted
/// provisioning run can still be found and removed.
pub fn policy_name(user: &str) -> String {
    format!("s3-prefix-read-for-{user}")
}

/// Key prefix owned by `user` inside the shared bucket.
pub fn key_prefix(user: &str) -> String {
    format!("{user}/")
}

/// Fails with [`PolicyError::InvalidArgument`] when `value` is blank.
pub fn require(what: &str, value: &str) -> Result<(), PolicyError> {
    if value.trim().is_empty() {
        Err(PolicyError::InvalidArgument(format!(
            "{what} must not be empty"
        )))
    } else {
        Ok(())
    }
}
