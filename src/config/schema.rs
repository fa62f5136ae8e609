use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub origin: ClusterConfig,
    pub target: ClusterConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_listen_port() -> u16 {
    14002
}

fn default_metrics_addr() -> String {
    "127.0.0.1:14001".to_string()
}

/// One upstream Cassandra-compatible cluster
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    pub contact_point: String,
    #[serde(default = "default_cql_port")]
    pub port: u16,
    /// Credentials the proxy presents when it drives the handshake itself.
    /// Only the target side uses these; the origin handshake relays whatever
    /// the client sends.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_cql_port() -> u16 {
    9042
}

impl ClusterConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.contact_point, self.port)
    }
}

/// Prepared statement cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_entries")]
    pub max_entries: u64,
}

fn default_cache_entries() -> u64 {
    crate::cache::DEFAULT_MAX_ENTRIES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "127.0.0.1".to_string(),
                listen_port: default_listen_port(),
                metrics_addr: default_metrics_addr(),
            },
            origin: ClusterConfig {
                contact_point: "127.0.0.1".to_string(),
                port: default_cql_port(),
                username: String::new(),
                password: String::new(),
            },
            target: ClusterConfig {
                contact_point: "127.0.0.1".to_string(),
                port: 9043,
                username: String::new(),
                password: String::new(),
            },
            cache: CacheConfig::default(),
        }
    }
}
