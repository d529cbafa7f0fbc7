mod ladder;
mod types;

pub use ladder::{default_ladder, parse_renditions};
pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Environment overrides for offload credentials.
pub const ENV_ACCESS_KEY_ID: &str = "DERIVFORGE_OFFLOAD_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "DERIVFORGE_OFFLOAD_SECRET_ACCESS_KEY";

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    apply_env_overrides(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./derivforge.toml",
        "~/.config/derivforge/config.toml",
        "/etc/derivforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    let mut config = Config::default();
    apply_env_overrides(&mut config);
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(value) = std::env::var(ENV_ACCESS_KEY_ID) {
        if !value.trim().is_empty() {
            config.offload.access_key_id = value.trim().to_string();
        }
    }
    if let Ok(value) = std::env::var(ENV_SECRET_ACCESS_KEY) {
        if !value.trim().is_empty() {
            config.offload.secret_access_key = value.trim().to_string();
        }
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let classes = [
        (
            "thumbnails",
            config.thumbnails.max_concurrency,
            config.thumbnails.timeout_secs,
            &config.thumbnails.profile_version,
        ),
        (
            "fast_proxy",
            config.fast_proxy.max_concurrency,
            config.fast_proxy.timeout_secs,
            &config.fast_proxy.profile_version,
        ),
        (
            "hd_proxy",
            config.hd_proxy.max_concurrency,
            config.hd_proxy.timeout_secs,
            &config.hd_proxy.profile_version,
        ),
        (
            "hls",
            config.hls.max_concurrency,
            config.hls.timeout_secs,
            &config.hls.profile_version,
        ),
    ];

    for (name, concurrency, timeout, version) in classes {
        if concurrency == 0 {
            anyhow::bail!("[{name}] max_concurrency cannot be 0");
        }
        if timeout == 0 {
            anyhow::bail!("[{name}] timeout_secs cannot be 0");
        }
        if version.trim().is_empty() {
            anyhow::bail!("[{name}] profile_version cannot be empty");
        }
    }

    if config.thumbnails.max_width == 0 {
        anyhow::bail!("[thumbnails] max_width cannot be 0");
    }

    if config.hls.segment_seconds == 0 {
        anyhow::bail!("[hls] segment_seconds cannot be 0");
    }

    if parse_renditions(&config.hls.renditions) == default_ladder()
        && config.hls.renditions.trim() != types::default_renditions()
    {
        tracing::warn!(
            "[hls] renditions {:?} has no usable entries, using the default ladder",
            config.hls.renditions
        );
    }

    if config.offload.enabled && !config.offload.has_credentials() {
        anyhow::bail!("[offload] is enabled but is missing its endpoint/bucket/credentials");
    }

    if let Some(url) = &config.dispatch.queue_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("[dispatch] queue_url must be an http(s) URL: {url}");
        }
    }

    if config.origin.local_root.is_none() && config.origin.public_dl_base.is_none() {
        tracing::warn!("No origin configured; sources can only be given as local paths");
    }

    Ok(())
}
