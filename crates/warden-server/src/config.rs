//! Server configuration

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub acl: AclSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Deserialize)]
pub struct AclSettings {
    /// JSON file of association kinds merged over the built-in ones
    pub rules_path: Option<String>,
    /// Extra action names rule files may reference
    #[serde(default)]
    pub custom_actions: Vec<String>,
    #[serde(default = "default_seed_default_roles")]
    pub seed_default_roles: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreSettings {
    /// JSON snapshot of roles, resources, actions and collections
    pub snapshot_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_seed_default_roles() -> bool {
    true
}

fn default_log_filter() -> String {
    "info,warden=debug".to_string()
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("acl.seed_default_roles", true)?
            .set_default("log.filter", default_log_filter())?
            // Load from config file if present
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // Load from environment variables with WARDEN_ prefix
            .add_source(
                config::Environment::with_prefix("WARDEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

impl Default for AclSettings {
    fn default() -> Self {
        Self {
            rules_path: None,
            custom_actions: Vec::new(),
            seed_default_roles: default_seed_default_roles(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}
