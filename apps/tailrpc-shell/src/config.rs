use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

use tailrpc_node::EngineConfig;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ShellConfig {
    /// Node names hosted by this shell; the first one is selected at startup.
    #[serde(deserialize_with = "deserialize_node_names")]
    pub nodes: Vec<String>,
    pub log_capacity_bytes: usize,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub ttl_extension: Duration,
    pub max_records_per_poll: usize,
    /// Restart a node on the next tick after its stream faulted.
    pub auto_restart: bool,
}

/// Node names as written in a config file (a list) or in the environment
/// (one string separated by `,` or `;`, which node names cannot contain).
#[derive(Deserialize)]
#[serde(untagged)]
enum NodeNames {
    List(Vec<String>),
    Joined(String),
}

fn deserialize_node_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = match NodeNames::deserialize(deserializer)? {
        NodeNames::List(names) => names,
        NodeNames::Joined(joined) => joined.split([',', ';']).map(str::to_string).collect(),
    };
    Ok(names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

impl ShellConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("nodes", vec!["Main".to_string()])?
            .set_default("log_capacity_bytes", 10 * 1024 * 1024)?
            .set_default("poll_interval", "20ms")?
            .set_default("sweep_interval", "10s")?
            .set_default("default_ttl", "500ms")?
            .set_default("ttl_extension", "10s")?
            .set_default("max_records_per_poll", 1024)?
            .set_default("auto_restart", true)?;

        if let Some(path) = config_path {
            if path.extension().and_then(|ext| ext.to_str()) == Some("env") {
                // .env files feed the TAILRPC_ environment source below.
                match dotenvy::from_path(&path) {
                    Ok(_) => tracing::info!("loaded environment from {}", path.display()),
                    Err(err) => {
                        tracing::warn!("failed to load .env from {}: {}", path.display(), err)
                    }
                }
            } else {
                builder = builder.add_source(File::from(path));
            }
        }

        builder = builder.add_source(Environment::with_prefix("TAILRPC").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    /// Engine settings for the hosted node `name`.
    pub fn engine_config(&self, name: &str) -> EngineConfig {
        EngineConfig {
            name: name.to_string(),
            sweep_interval: self.sweep_interval,
            default_ttl: self.default_ttl,
            ttl_extension: self.ttl_extension,
            max_records_per_poll: self.max_records_per_poll,
        }
    }
}
