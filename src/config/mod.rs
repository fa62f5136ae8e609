mod schema;

pub use schema::*;

use std::env;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

/// Apply the environment variable surface on top of file/default settings.
/// Environment wins over the file.
pub fn apply_env_overrides(config: &mut Config) {
    override_string("PROXY_QUERY_ADDRESS", &mut config.server.listen_addr);
    override_port("PROXY_QUERY_PORT", &mut config.server.listen_port);
    override_string("PROXY_METRICS_ADDRESS", &mut config.server.metrics_addr);

    override_string(
        "ORIGIN_CASSANDRA_CONTACT_POINTS",
        &mut config.origin.contact_point,
    );
    override_port("ORIGIN_CASSANDRA_PORT", &mut config.origin.port);
    override_string("ORIGIN_CASSANDRA_USERNAME", &mut config.origin.username);
    override_string("ORIGIN_CASSANDRA_PASSWORD", &mut config.origin.password);

    override_string(
        "TARGET_CASSANDRA_CONTACT_POINTS",
        &mut config.target.contact_point,
    );
    override_port("TARGET_CASSANDRA_PORT", &mut config.target.port);
    override_string("TARGET_CASSANDRA_USERNAME", &mut config.target.username);
    override_string("TARGET_CASSANDRA_PASSWORD", &mut config.target.password);
}

fn override_string(var: &str, field: &mut String) {
    if let Ok(value) = env::var(var) {
        *field = value;
    }
}

fn override_port(var: &str, field: &mut u16) {
    if let Some(port) = env::var(var).ok().and_then(|v| v.parse().ok()) {
        *field = port;
    }
}
