//! # Tenancy CLI
//!
//! The `tenancy` command line tool. It gives each user read-only access to
//! their own folder of a shared S3 bucket and takes that access away again.
//!
//! ```bash
//! tenancy provision --bucket shared-bucket --user alex
//! tenancy deprovision --bucket shared-bucket --user alex
//! ```
//!
//! Administrative credentials and endpoints come from flags or the
//! environment (a `.env` file in the working directory is honored). Each
//! command prints one JSON line on stdout; logs and failure reports go to
//! stderr.

mod cli;
pub use cli::*;

mod settings;
pub use settings::*;

mod store;
pub use store::*;

mod commands;
pub use commands::*;

mod report;
pub use report::*;

mod logging;
pub use logging::*;
