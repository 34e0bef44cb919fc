use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use tracing_subscriber::EnvFilter;

use crate::config::expand_path;

/// Initialize tracing output
///
/// With telemetry enabled, logs go to `log_path` (append, no ANSI colors);
/// otherwise to stdout. `RUST_LOG` overrides the default `info` level.
///
/// # Errors
/// Returns error if the log directory or file cannot be created
pub fn init(enabled: bool, log_path: &str) -> Result<()> {
    if !enabled {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .init();
        return Ok(());
    }

    let expanded_path = expand_path(log_path)?;

    if let Some(parent) = expanded_path.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&expanded_path)
        .context("failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(file)
        .with_target(false)
        .with_ansi(false)
        .init();

    tracing::info!("telemetry initialized: {}", expanded_path.display());

    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_builds() {
        // Falls back to "info" when RUST_LOG is unset or invalid
        let filter = env_filter();
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    #[ignore] // Requires global tracing subscriber initialization
    fn test_init_with_telemetry_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("logs").join("dictation.log");
        init(true, log_path.to_str().unwrap()).unwrap();
        assert!(log_path.exists());
    }
}
