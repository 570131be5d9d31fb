#![warn(missing_docs)]

//! Provisioning and teardown of identities that can read exactly one folder
//! of a shared bucket.
//!
//! A [`Provisioner`] creates an identity, a policy scoped to
//! `<bucket>/<user>/`, attaches the two and issues a credential pair. A
//! [`Deprovisioner`] removes all of that again together with the objects
//! stored under the user's folder.
//!
//! Both work against the [`IdentityBackend`] and [`ObjectStore`] traits, so
//! the same orchestration runs against the real services or the in-memory
//! fakes:
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tenancy_core::TenancyError> {
//! use tenancy_core::{Deprovisioner, MemoryIdentityBackend, MemoryObjectStore, Provisioner};
//!
//! let identity = MemoryIdentityBackend::default();
//! let storage = MemoryObjectStore::default();
//! storage.create_bucket("shared-bucket").await;
//!
//! let pair = Provisioner::new(identity.clone(), storage.clone())
//!     .provision("shared-bucket", "alex")
//!     .await?;
//! assert_eq!(pair.user_name, "alex");
//!
//! let outcome = Deprovisioner::new(identity, storage)
//!     .deprovision("shared-bucket", "alex")
//!     .await?;
//! assert!(outcome.identity_deleted);
//! # Ok(())
//! # }
//! ```
//!
//! Neither operation is transactional. A failure part way through is reported
//! as a [`TenancyError`] naming the failing step and the resources an operator
//! has to look at.

mod backend;
pub use backend::*;

mod error;
pub use error::*;

mod enumerate;
pub use enumerate::*;

mod provision;
pub use provision::*;

mod deprovision;
pub use deprovision::*;

#[cfg(any(test, feature = "helpers"))]
mod memory;
#[cfg(any(test, feature = "helpers"))]
pub use memory::*;
