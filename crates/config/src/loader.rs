use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::PortalConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["portal.toml", "portal.yaml", "portal.yml", "portal.json"];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Point config discovery at a single directory, skipping project-local
/// and user-global paths. Meant for tests; each call replaces the
/// previous override.
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE.lock().unwrap() = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE.lock().unwrap() = None;
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE.lock().unwrap().clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<PortalConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./portal.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/portal/portal.{toml,yaml,yml,json}` (user-global)
///
/// Returns `PortalConfig::default()` if no config file is found or the
/// found one fails to parse.
pub fn discover_and_load() -> PortalConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return PortalConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(config) => config,
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to load config, using defaults");
            PortalConfig::default()
        },
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<PortalConfig> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Ok(toml::from_str(raw)?),
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(raw)?),
        Some("json") => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: {}", path.display()),
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(dir) = config_dir_override() {
        dirs.push(dir);
    } else {
        dirs.push(PathBuf::from("."));
        if let Some(base) = directories::BaseDirs::new() {
            dirs.push(base.home_dir().join(".config").join("portal"));
        }
    }

    for dir in dirs {
        for name in CONFIG_FILENAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}
