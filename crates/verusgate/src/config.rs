//! Settings for the gateway, loaded from `settings.toml`, environment
//! variables and CLI flags.
//!
//! Priority, highest first: CLI flags, `VERUS_GATEWAY_*` environment
//! variables (sections separated with a double underscore, e.g.
//! `VERUS_GATEWAY_SERVER__PORT`), the settings file, built-in defaults.

use std::collections::HashMap;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use verusgate_cache::{FilesystemCacheConfig, RedisCacheConfig};
use verusgate_chain::{ChainDefinition, RegistryConfig, RpcClientConfig};
use verusgate_server::{FileServiceConfig, ServerConfig};

#[derive(Debug, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
    /// Seconds.
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub idle_timeout: u64,
    pub shutdown_timeout: u64,
    /// Bytes.
    pub max_request_size: u64,
}

#[derive(Debug, Deserialize)]
pub struct ChainSettings {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub rpc_user: String,
    #[serde(default)]
    pub rpc_password: String,
    /// Seconds.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout: u64,
    #[serde(default)]
    pub tls_insecure: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
}

fn default_rpc_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    500
}

#[derive(Debug, Default, Deserialize)]
pub struct Chains {
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub chains: HashMap<String, ChainSettings>,
}

#[derive(Debug, Deserialize)]
pub struct RedisSettings {
    pub addresses: Vec<String>,
    #[serde(default)]
    pub password: String,
    pub db: i64,
    pub max_retries: u32,
    pub pool_size: u32,
    /// Seconds.
    pub timeout: u64,
}

#[derive(Debug, Deserialize)]
pub struct CacheSettings {
    /// One of `filesystem`, `redis`, `none`.
    #[serde(rename = "type")]
    pub cache_type: String,
    pub dir: String,
    /// Bytes.
    pub max_size: u64,
    /// Seconds.
    pub ttl: u64,
    pub cleanup_interval: u64,
    pub redis: RedisSettings,
}

#[derive(Debug, Deserialize)]
pub struct Files {
    /// Bytes.
    pub max_decompressed_size: u64,
    pub decompress_fallback: bool,
}

#[derive(Debug, Deserialize)]
pub struct Logging {
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    pub level: String,
    /// One of `json`, `text`.
    pub format: String,
    /// One of `stdout`, `stderr`, `file`.
    pub output: String,
    /// Log directory when `output = "file"`.
    pub file_path: String,
}

#[derive(Debug, Deserialize)]
pub struct Observability {
    pub logging: Logging,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: Server,
    #[serde(default)]
    pub chains: Chains,
    pub cache: CacheSettings,
    pub files: Files,
    pub observability: Observability,
}

impl Settings {
    /// Load settings from defaults, an optional file and the environment.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let file = config_file.unwrap_or("settings.toml");

        let config = Config::builder()
            // Server
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080i64)?
            .set_default("server.read_timeout", 10i64)?
            .set_default("server.write_timeout", 60i64)?
            .set_default("server.idle_timeout", 120i64)?
            .set_default("server.shutdown_timeout", 30i64)?
            .set_default("server.max_request_size", 32i64 * 1024 * 1024)?
            // Cache
            .set_default("cache.type", "filesystem")?
            .set_default("cache.dir", "./cache")?
            .set_default("cache.max_size", 1024i64 * 1024 * 1024)?
            .set_default("cache.ttl", 24i64 * 60 * 60)?
            .set_default("cache.cleanup_interval", 60i64 * 60)?
            .set_default("cache.redis.addresses", vec!["localhost:6379".to_string()])?
            .set_default("cache.redis.db", 0i64)?
            .set_default("cache.redis.max_retries", 3i64)?
            .set_default("cache.redis.pool_size", 10i64)?
            .set_default("cache.redis.timeout", 5i64)?
            // Files
            .set_default("files.max_decompressed_size", 100i64 * 1024 * 1024)?
            .set_default("files.decompress_fallback", true)?
            // Logging
            .set_default("observability.logging.level", "info")?
            .set_default("observability.logging.format", "json")?
            .set_default("observability.logging.output", "stdout")?
            .set_default("observability.logging.file_path", "logs")?
            .add_source(File::with_name(file).required(config_file.is_some()))
            .add_source(
                Environment::with_prefix("VERUS_GATEWAY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("invalid server port: 0".into()));
        }

        let enabled: Vec<_> = self
            .chains
            .chains
            .iter()
            .filter(|(_, c)| c.enabled)
            .collect();
        if enabled.is_empty() {
            return Err(ConfigError::Message("no chains configured".into()));
        }
        for (id, chain) in &enabled {
            if chain.rpc_url.is_empty() {
                return Err(ConfigError::Message(format!("chain {id}: rpc_url is required")));
            }
            if chain.rpc_user.is_empty() {
                return Err(ConfigError::Message(format!("chain {id}: rpc_user is required")));
            }
            if chain.rpc_password.is_empty() {
                return Err(ConfigError::Message(format!(
                    "chain {id}: rpc_password is required"
                )));
            }
            if chain.rpc_timeout == 0 {
                return Err(ConfigError::Message(format!(
                    "chain {id}: rpc_timeout must be at least 1 second"
                )));
            }
            if chain.max_retries > 10 {
                return Err(ConfigError::Message(format!(
                    "chain {id}: max_retries must be between 0 and 10"
                )));
            }
        }

        if !self.chains.default.is_empty()
            && !self.chains.chains.contains_key(&self.chains.default)
        {
            return Err(ConfigError::Message(format!(
                "default chain '{}' not found in chains",
                self.chains.default
            )));
        }

        match self.cache.cache_type.as_str() {
            "filesystem" | "redis" | "none" => {}
            other => {
                return Err(ConfigError::Message(format!("invalid cache type: {other}")));
            }
        }

        match self.observability.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::Message(format!("invalid log level: {other}")));
            }
        }

        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            read_timeout: Duration::from_secs(self.server.read_timeout),
            write_timeout: Duration::from_secs(self.server.write_timeout),
            idle_timeout: Duration::from_secs(self.server.idle_timeout),
            shutdown_timeout: Duration::from_secs(self.server.shutdown_timeout),
            max_request_size: self.server.max_request_size as usize,
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        let chains = self
            .chains
            .chains
            .iter()
            .map(|(id, chain)| {
                let mut rpc =
                    RpcClientConfig::new(&chain.rpc_url, &chain.rpc_user, &chain.rpc_password);
                rpc.timeout = Duration::from_secs(chain.rpc_timeout);
                rpc.tls_insecure = chain.tls_insecure;
                rpc.max_retries = chain.max_retries;
                rpc.retry_delay = Duration::from_millis(chain.retry_delay);

                ChainDefinition {
                    id: id.clone(),
                    name: chain.name.clone(),
                    enabled: chain.enabled,
                    rpc,
                }
            })
            .collect();

        RegistryConfig {
            default_chain: self.chains.default.clone(),
            chains,
        }
    }

    pub fn filesystem_cache_config(&self) -> FilesystemCacheConfig {
        let mut config = FilesystemCacheConfig::new(&self.cache.dir);
        config.max_size = self.cache.max_size;
        config.ttl = Duration::from_secs(self.cache.ttl);
        config.cleanup_interval = Duration::from_secs(self.cache.cleanup_interval);
        config
    }

    pub fn redis_cache_config(&self) -> RedisCacheConfig {
        RedisCacheConfig {
            addresses: self.cache.redis.addresses.clone(),
            password: self.cache.redis.password.clone(),
            db: self.cache.redis.db,
            max_retries: self.cache.redis.max_retries,
            pool_size: self.cache.redis.pool_size,
            timeout: Duration::from_secs(self.cache.redis.timeout),
            ttl: Duration::from_secs(self.cache.ttl),
        }
    }

    pub fn file_service_config(&self) -> FileServiceConfig {
        FileServiceConfig {
            max_decompressed_size: self.files.max_decompressed_size,
            decompress_fallback: self.files.decompress_fallback,
        }
    }
}

/// Get a value from CLI args if present, otherwise use the settings value.
#[macro_export]
macro_rules! get_config_value {
    ($args:expr, $arg_name:expr, $arg_type:ty, $settings:expr) => {
        match $args.try_get_one::<$arg_type>($arg_name) {
            Ok(Some(value)) => value,
            Ok(None) => &$settings,
            Err(err) => {
                tracing::warn!("Failed to load CLI config, using settings value. Error: {err}");
                &$settings
            }
        }
    };
}
