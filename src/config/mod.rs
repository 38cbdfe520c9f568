pub mod persist;
mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./streamsweep.toml",
        "./config.toml",
        "~/.config/streamsweep/config.toml",
        "/etc/streamsweep/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let scanner = &config.scanner;
    if scanner.workers == 0 {
        anyhow::bail!("scanner.workers must be at least 1");
    }
    if scanner.timeout_ms == 0 {
        anyhow::bail!("scanner.timeout_ms must be greater than 0");
    }
    if scanner.batch_size == 0 {
        anyhow::bail!("scanner.batch_size must be at least 1");
    }
    if scanner.queue_high_water == 0 {
        anyhow::bail!("scanner.queue_high_water must be at least 1");
    }
    if scanner.progress_interval_ms == 0 {
        anyhow::bail!("scanner.progress_interval_ms must be greater than 0");
    }

    if config.probe.max_concurrent == 0 {
        anyhow::bail!("probe.max_concurrent must be at least 1");
    }
    if config.probe.max_concurrent_inspect == 0 {
        anyhow::bail!("probe.max_concurrent_inspect must be at least 1");
    }
    if let Some(path) = &config.probe.ffprobe_path {
        if !path.exists() {
            tracing::warn!("Configured ffprobe path does not exist: {:?}", path);
        }
    }
    for rule in &config.probe.policy.rules {
        if rule.pattern.trim().is_empty() {
            anyhow::bail!("probe.policy rule for '{}' has an empty pattern", rule.kind);
        }
    }

    if let Some(url) = config.mappings.remote_url() {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("mappings.remote_url must be an http(s) URL, got '{}'", url);
        }
    }
    if config.mappings.fetch_timeout_secs == 0 {
        anyhow::bail!("mappings.fetch_timeout_secs must be greater than 0");
    }

    Ok(())
}
