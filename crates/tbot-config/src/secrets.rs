//! Secret resolution.
//!
//! Config stores env var NAMES only. [`resolve_secrets`] runs once at
//! startup; the result is passed to whatever needs it. Debug output redacts
//! values and errors name the variable, never its value.

use anyhow::{bail, Result};

use crate::app::AppConfig;

#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    /// Trading account id, when the named env var is set and non-blank.
    pub account: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("account", &self.account.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// `require_account` makes a missing account an error naming the variable.
pub fn resolve_secrets(
    app: &AppConfig,
    require_account: bool,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedSecrets> {
    let var = app.connection.account_env.trim();
    let account = if var.is_empty() {
        None
    } else {
        lookup(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    if require_account && account.is_none() {
        bail!("SECRETS_MISSING: required env var '{var}' (trading account) is not set or empty");
    }
    Ok(ResolvedSecrets { account })
}
