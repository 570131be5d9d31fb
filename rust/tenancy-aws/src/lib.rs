#![warn(missing_docs)]

//! AWS adapters for the tenancy collaborators.
//!
//! [`IamClient`] implements [`tenancy_core::IdentityBackend`] on top of the
//! IAM Query API and [`S3Client`] implements [`tenancy_core::ObjectStore`] on
//! top of the S3 REST API. Both sign requests with SigV4 using
//! [`Credentials`] and speak XML through `quick-xml`. Neither retries on its
//! own; retries of idempotent reads belong to the orchestration in
//! `tenancy-core`.

mod error;
pub use error::*;

mod signing;
pub use signing::{Authorization, AuthorizationError, Credentials, DEFAULT_EXPIRES, Invocation};

mod request;

mod iam;
pub use iam::*;

mod s3;
pub use s3::*;
