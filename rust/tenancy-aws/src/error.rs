use reqwest::StatusCode;
use serde::Deserialize;
use tenancy_core::BackendError;
use thiserror::Error;

use crate::AuthorizationError;

/// Errors raised while setting up a client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The endpoint URL cannot address the service
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<AuthorizationError> for BackendError {
    fn from(error: AuthorizationError) -> Self {
        BackendError::InvalidArgument(error.to_string())
    }
}

/// Error body shared by the S3 REST API (`<Error>` root) and the IAM Query
/// API (`<ErrorResponse><Error>`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceError {
    code: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    error: ServiceError,
}

/// A request that never got a response.
pub(crate) fn transport(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Unavailable(format!("request timed out: {error}"))
    } else {
        BackendError::Unavailable(error.to_string())
    }
}

/// Map a non-success response onto a [`BackendError`].
pub(crate) fn from_response(status: StatusCode, body: &str) -> BackendError {
    let parsed = quick_xml::de::from_str::<ErrorResponse>(body)
        .map(|response| response.error)
        .or_else(|_| quick_xml::de::from_str::<ServiceError>(body));

    let (code, message) = match parsed {
        Ok(error) => (error.code, error.message.unwrap_or_default()),
        Err(_) => (
            status
                .canonical_reason()
                .unwrap_or("UnknownError")
                .replace(' ', ""),
            String::new(),
        ),
    };
    classify(status, code, message)
}

fn classify(status: StatusCode, code: String, message: String) -> BackendError {
    let detail = if message.is_empty() {
        code.clone()
    } else {
        format!("{code}: {message}")
    };

    match code.as_str() {
        "EntityAlreadyExists" | "BucketAlreadyExists" | "BucketAlreadyOwnedByYou" => {
            BackendError::AlreadyExists(detail)
        }
        "NoSuchEntity" | "NoSuchBucket" | "NoSuchKey" | "NotFound" => {
            BackendError::NotFound(detail)
        }
        "DeleteConflict" => BackendError::DependencyExists(detail),
        "ValidationError" | "InvalidInput" | "MalformedPolicyDocument" | "InvalidBucketName"
        | "InvalidArgument" => BackendError::InvalidArgument(detail),
        "Throttling" | "ThrottlingException" | "SlowDown" | "RequestLimitExceeded"
        | "ServiceFailure" | "ServiceUnavailable" | "InternalError" | "InvalidClientTokenId"
        | "SignatureDoesNotMatch" | "ExpiredToken" | "RequestExpired"
        | "MissingAuthenticationToken" | "IncompleteSignature" | "InvalidAccessKeyId" => {
            BackendError::Unavailable(detail)
        }
        _ if status.is_server_error() => BackendError::Unavailable(detail),
        _ if status == StatusCode::NOT_FOUND => BackendError::NotFound(detail),
        _ => BackendError::Rejected { code, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn it_maps_iam_error_responses() {
        let body = r#"<ErrorResponse xmlns="https://iam.amazonaws.com/doc/2010-05-08/">
  <Error>
    <Type>Sender</Type>
    <Code>EntityAlreadyExists</Code>
    <Message>User with name alex already exists.</Message>
  </Error>
  <RequestId>4a9c1d6e-0000-0000-0000-000000000000</RequestId>
</ErrorResponse>"#;

        let error = from_response(StatusCode::CONFLICT, body);

        assert_eq!(
            error,
            BackendError::AlreadyExists(
                "EntityAlreadyExists: User with name alex already exists.".into()
            )
        );
    }

    #[test]
    fn it_maps_delete_conflicts() {
        let body = "<ErrorResponse><Error><Code>DeleteConflict</Code>\
            <Message>Cannot delete entity, must delete access keys first.</Message>\
            </Error></ErrorResponse>";
        assert!(matches!(
            from_response(StatusCode::CONFLICT, body),
            BackendError::DependencyExists(_)
        ));
    }

    #[test]
    fn it_maps_s3_error_responses() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message></Error>"#;
        assert!(matches!(
            from_response(StatusCode::NOT_FOUND, body),
            BackendError::NotFound(_)
        ));
    }

    #[test]
    fn it_treats_throttling_and_server_errors_as_transient() {
        let body = "<ErrorResponse><Error><Code>Throttling</Code></Error></ErrorResponse>";
        assert!(from_response(StatusCode::BAD_REQUEST, body).is_transient());
        assert!(from_response(StatusCode::BAD_GATEWAY, "").is_transient());
    }

    #[test]
    fn it_keeps_unknown_codes() {
        let body = "<ErrorResponse><Error><Code>LimitExceeded</Code>\
            <Message>Cannot exceed quota for AccessKeysPerUser: 2</Message>\
            </Error></ErrorResponse>";
        assert_eq!(
            from_response(StatusCode::CONFLICT, body),
            BackendError::Rejected {
                code: "LimitExceeded".into(),
                message: "Cannot exceed quota for AccessKeysPerUser: 2".into()
            }
        );
    }

    #[test]
    fn it_falls_back_to_the_status_without_a_body() {
        assert_eq!(
            from_response(StatusCode::FORBIDDEN, ""),
            BackendError::Rejected {
                code: "Forbidden".into(),
                message: String::new()
            }
        );
    }
}
