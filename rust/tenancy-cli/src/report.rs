//! Human-readable failure reports.

use std::error::Error;

use tenancy_core::ErrorKind;

use crate::{CommandError, StoreError};

impl CommandError {
    /// Classification printed on the `kind:` line.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::Client(_) => ErrorKind::InvalidArgument.as_str(),
            CommandError::Store(StoreError::AlreadyExists(_)) => ErrorKind::AlreadyExists.as_str(),
            CommandError::Tenancy(error) => error.kind().as_str(),
            CommandError::Store(_) | CommandError::Unsaved { .. } | CommandError::Output(_) => {
                "CredentialStore"
            }
        }
    }
}

/// Lines describing `error`: the message and its causes, the error kind, the
/// failing step and every resource that needs an operator's attention.
pub fn report(error: &CommandError) -> Vec<String> {
    let mut lines = vec![format!("error: {error}")];

    let mut cause = error.source();
    while let Some(inner) = cause {
        lines.push(format!("  caused by: {inner}"));
        cause = inner.source();
    }

    lines.push(format!("kind: {}", error.kind()));

    match error {
        CommandError::Tenancy(error) => {
            if let Some(step) = error.step() {
                lines.push(format!("step: {step}"));
            }
            let resources = error.needs_attention();
            if !resources.is_empty() {
                lines.push("needs attention:".to_string());
                lines.extend(resources.iter().map(|resource| format!("  - {resource}")));
            }
        }
        CommandError::Unsaved { pair, .. } => {
            lines.push("needs attention:".to_string());
            lines.push(format!(
                "  - access key {} of identity {} (secret printed on stdout only)",
                pair.access_key_id, pair.user_name
            ));
        }
        CommandError::Store(StoreError::AlreadyExists(path)) => {
            lines.push("needs attention:".to_string());
            lines.push(format!("  - credential file {}", path.display()));
        }
        _ => {}
    }

    lines
}
