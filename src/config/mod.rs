mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Environment variable overriding the multicast address.
pub const ENV_TARGET_MULTICAST: &str = "TARGET_MULTICAST";

/// Environment variable overriding the destination port.
pub const ENV_TARGET_PORT: &str = "TARGET_PORT";

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    finish(&mut config)?;
    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./channelcast.toml",
        "~/.config/channelcast/config.toml",
        "/etc/channelcast/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    let mut config = Config::default();
    finish(&mut config)?;
    Ok(config)
}

fn finish(config: &mut Config) -> Result<()> {
    apply_env_overrides(config)?;
    expand_paths(config);
    validate_config(config)
}

/// Apply `TARGET_MULTICAST` / `TARGET_PORT` on top of the file values.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(address) = env_var(ENV_TARGET_MULTICAST) {
        config.output.address = address.parse::<Ipv4Addr>().with_context(|| {
            format!("{ENV_TARGET_MULTICAST} is not an IPv4 address: {address:?}")
        })?;
    }

    if let Some(port) = env_var(ENV_TARGET_PORT) {
        config.output.port = port
            .parse::<u16>()
            .with_context(|| format!("{ENV_TARGET_PORT} is not a port number: {port:?}"))?;
    }

    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn expand_paths(config: &mut Config) {
    let expand =
        |p: &Path| -> PathBuf { shellexpand::tilde(&p.to_string_lossy()).into_owned().into() };

    config.handoff.dir = expand(&config.handoff.dir);
    if let Some(ref p) = config.tools.ffmpeg_path {
        config.tools.ffmpeg_path = Some(expand(p));
    }
    if let Some(ref p) = config.tools.ffprobe_path {
        config.tools.ffprobe_path = Some(expand(p));
    }
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.output.port == 0 {
        anyhow::bail!("Output port cannot be 0");
    }

    if config.output.ttl == 0 {
        anyhow::bail!("Multicast TTL must be at least 1");
    }

    if !config.output.address.is_multicast() {
        tracing::warn!(
            "Output address {} is not a multicast group; sending unicast",
            config.output.address
        );
    }

    if config.transcode.width == 0 || config.transcode.height == 0 {
        anyhow::bail!("Transcode frame size cannot be 0");
    }

    Ok(())
}
