//! Command handler modules for the tbot CLI.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod paper;

use anyhow::Result;
use tbot_config::{report_unused_keys, AppConfig, LoadedConfig, UnusedKeyPolicy};
use tracing::warn;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Loads the layers, warns about keys nothing reads, and returns the typed
/// view with `TBOT_*` env overrides applied.
pub fn load_app(paths: &[String]) -> Result<(LoadedConfig, AppConfig)> {
    let loaded = tbot_config::load_layered_yaml(paths)?;

    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !report.is_clean() {
        warn!(unused = ?report.unused_leaf_pointers, "config keys not consumed by tbot");
    }

    let mut app = loaded.app()?;
    app.apply_env_overrides(|k| std::env::var(k).ok())?;
    Ok((loaded, app))
}
