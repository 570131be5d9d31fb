//! Policy document types.
//!
//! The serialized form follows the IAM policy grammar
//! (`Version` / `Statement` / `Effect` / `Action` / `Resource` / `Condition`)
//! so the JSON can be handed to an identity backend unchanged.
//!
//! See [IAM JSON policy reference].
//!
//! [IAM JSON policy reference]: https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_policies_elements.html

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{PolicyError, key_prefix, require};

/// Policy language version understood by IAM.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Condition key S3 evaluates against the `prefix` parameter of a listing.
pub const PREFIX_CONDITION_KEY: &str = "s3:prefix";

/// The only actions a generated document may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    /// List keys in the bucket (ListObjects / ListObjectsV2)
    #[serde(rename = "s3:ListBucket")]
    ListBucket,
    /// Download an object
    #[serde(rename = "s3:GetObject")]
    GetObject,
}

impl Action {
    /// The action name as it appears in a policy document.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListBucket => "s3:ListBucket",
            Self::GetObject => "s3:GetObject",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statement effect. Generated documents only ever allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Grant the statement's action
    Allow,
}

/// Statement condition block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Condition {
    /// `StringLike` operator: condition key to accepted patterns
    #[serde(rename = "StringLike")]
    pub string_like: BTreeMap<String, Vec<String>>,
}

/// A single grant inside a [`PolicyDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Statement identifier
    pub sid: String,
    /// Always [`Effect::Allow`]
    pub effect: Effect,
    /// The granted action
    pub action: Action,
    /// ARN of the resource the action applies to
    pub resource: String,
    /// Optional restriction on the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

/// Read-only access policy confined to one key prefix of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    version: String,
    statement: Vec<Statement>,
}

impl PolicyDocument {
    /// Build the policy granting `prefix`'s owner read access to its folder.
    ///
    /// The document holds exactly two statements:
    ///
    /// 1. `s3:ListBucket` on `arn:aws:s3:::<bucket>`, allowed only when the
    ///    listing prefix is `<prefix>/` or lies beneath it
    /// 2. `s3:GetObject` on `arn:aws:s3:::<bucket>/<prefix>/*`
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidArgument`] if `bucket` or `prefix` is blank.
    pub fn for_prefix(bucket: &str, prefix: &str) -> Result<Self, PolicyError> {
        require("bucket name", bucket)?;
        require("prefix", prefix)?;

        let folder = key_prefix(prefix);

        let mut string_like = BTreeMap::new();
        string_like.insert(
            PREFIX_CONDITION_KEY.to_string(),
            vec![folder.clone(), format!("{folder}*")],
        );

        Ok(Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![
                Statement {
                    sid: "ListUserFolder".to_string(),
                    effect: Effect::Allow,
                    action: Action::ListBucket,
                    resource: bucket_arn(bucket),
                    condition: Some(Condition { string_like }),
                },
                Statement {
                    sid: "GetUserObjects".to_string(),
                    effect: Effect::Allow,
                    action: Action::GetObject,
                    resource: format!("{}/{folder}*", bucket_arn(bucket)),
                    condition: None,
                },
            ],
        })
    }

    /// Policy language version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The statements of this document.
    pub fn statements(&self) -> &[Statement] {
        &self.statement
    }

    /// Every action granted by this document.
    pub fn actions(&self) -> BTreeSet<Action> {
        self.statement.iter().map(|s| s.action).collect()
    }

    /// The statement granting `action`, if any.
    pub fn statement_for(&self, action: Action) -> Option<&Statement> {
        self.statement.iter().find(|s| s.action == action)
    }

    /// Render as compact JSON, the form submitted to the identity backend.
    pub fn to_json(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Render as indented JSON for logs and reports.
    pub fn to_json_pretty(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a document previously rendered with [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn bucket_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{bucket}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn it_builds_the_shared_bucket_scenario() {
        let document = PolicyDocument::for_prefix("shared-bucket", "alex").unwrap();

        let list = document.statement_for(Action::ListBucket).unwrap();
        assert_eq!(list.resource, "arn:aws:s3:::shared-bucket");
        let patterns = &list.condition.as_ref().unwrap().string_like[PREFIX_CONDITION_KEY];
        assert_eq!(patterns, &vec!["alex/".to_string(), "alex/*".to_string()]);

        let get = document.statement_for(Action::GetObject).unwrap();
        assert_eq!(get.resource, "arn:aws:s3:::shared-bucket/alex/*");
        assert!(get.condition.is_none());
    }

    #[test]
    fn it_renders_iam_json() {
        let document = PolicyDocument::for_prefix("shared-bucket", "alex").unwrap();
        let value: serde_json::Value = serde_json::from_str(&document.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "Version": "2012-10-17",
                "Statement": [
                    {
                        "Sid": "ListUserFolder",
                        "Effect": "Allow",
                        "Action": "s3:ListBucket",
                        "Resource": "arn:aws:s3:::shared-bucket",
                        "Condition": {
                            "StringLike": { "s3:prefix": ["alex/", "alex/*"] }
                        }
                    },
                    {
                        "Sid": "GetUserObjects",
                        "Effect": "Allow",
                        "Action": "s3:GetObject",
                        "Resource": "arn:aws:s3:::shared-bucket/alex/*"
                    }
                ]
            })
        );
    }

    #[test]
    fn it_parses_its_own_output() {
        let document = PolicyDocument::for_prefix("b", "u").unwrap();
        let parsed = PolicyDocument::from_json(&document.to_json_pretty().unwrap()).unwrap();
        assert_eq!(parsed, document);
    }

    #[test]
    fn it_rejects_empty_bucket_or_prefix() {
        assert!(matches!(
            PolicyDocument::for_prefix("", "alex"),
            Err(PolicyError::InvalidArgument(_))
        ));
        assert!(matches!(
            PolicyDocument::for_prefix("shared-bucket", ""),
            Err(PolicyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn it_refuses_documents_with_unknown_actions() {
        let json = r#"{"Version":"2012-10-17","Statement":[{"Sid":"x","Effect":"Allow","Action":"s3:PutObject","Resource":"arn:aws:s3:::b/u/*"}]}"#;
        assert!(PolicyDocument::from_json(json).is_err());
    }
}
