//! Configuration loading for the portal client.
//!
//! Discovery order: `./portal.{toml,yaml,yml,json}` (project-local), then
//! `~/.config/portal/` (user-global). String values support `${ENV_VAR}`
//! substitution at load time.

mod env_subst;
mod loader;
mod schema;

pub use env_subst::substitute_env;
pub use loader::{clear_config_dir, discover_and_load, load_config, set_config_dir};
pub use schema::{DeviceConfig, GatewayConfig, HeartbeatConfig, PortalConfig, ReconnectConfig};
