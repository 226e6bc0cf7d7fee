use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use tracing::info;
use verusgate_cache::{Cache, FilesystemCache, RedisCache};
use verusgate_chain::ChainRegistry;
use verusgate_server::{AppState, FileService};

use constants::{ABOUT, BIN_NAME, NAME, VERSION};

mod config;
mod constants;
mod log;

fn cli() -> Command {
    Command::new(BIN_NAME)
        .bin_name(BIN_NAME)
        .name(NAME)
        .version(VERSION)
        .long_version(constants::long_version())
        .about(ABOUT)
        .args([
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("path")
                .help("Path to the settings file")
                .action(ArgAction::Set),
            Arg::new("host")
                .long("host")
                .value_name("host")
                .help("Listen address for the HTTP server")
                .action(ArgAction::Set),
            Arg::new("port")
                .long("port")
                .value_name("port")
                .value_parser(value_parser!(u16))
                .help("Listen port for the HTTP server")
                .action(ArgAction::Set),
            Arg::new("log_level")
                .long("log-level")
                .value_name("level")
                .help("Set the log level")
                .action(ArgAction::Set),
        ])
}

pub fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_file: Option<&str> = match matches.try_get_one::<String>("config") {
        Ok(path) => path.map(|s| s.as_str()),
        Err(error) => fatal!("Error while parsing config file flag: {error}"),
    };

    let mut settings = match config::Settings::load(config_file) {
        Ok(settings) => settings,
        Err(error) => fatal!("Failed to load configuration: {error}"),
    };

    // CLI values take precedence over the settings file.
    settings.server.host = get_config_value!(matches, "host", String, settings.server.host).clone();
    settings.server.port = *get_config_value!(matches, "port", u16, settings.server.port);
    settings.observability.logging.level = get_config_value!(
        matches,
        "log_level",
        String,
        settings.observability.logging.level
    )
    .clone();

    let _guard = log::new(&settings.observability.logging);
    info!(
        version = VERSION,
        host = %settings.server.host,
        port = settings.server.port,
        default_chain = %settings.chains.default,
        cache_type = %settings.cache.cache_type,
        "starting {NAME}"
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(run(settings))
}

async fn run(settings: config::Settings) -> Result<()> {
    let cache = build_cache(&settings).await?;
    if cache.is_some() {
        info!(cache_type = %settings.cache.cache_type, "cache initialised");
    } else {
        info!("running without a cache");
    }

    let registry = Arc::new(
        ChainRegistry::new(settings.registry_config()).context("failed to initialise chains")?,
    );
    for entry in registry.chain_entries() {
        info!(chain = %entry.id, name = %entry.name, "chain initialised");
    }

    let service = Arc::new(FileService::new(
        registry.clone(),
        cache.clone(),
        settings.file_service_config(),
    ));

    let state = AppState {
        service,
        registry,
        version: VERSION.to_string(),
    };

    let result = verusgate_server::run(settings.server_config(), state).await;

    if let Some(cache) = cache {
        cache.close().await;
    }
    info!("shutdown complete");

    result
}

async fn build_cache(settings: &config::Settings) -> Result<Option<Arc<dyn Cache>>> {
    match settings.cache.cache_type.as_str() {
        "filesystem" => {
            let cache: Arc<dyn Cache> = FilesystemCache::new(settings.filesystem_cache_config())
                .context("failed to initialise filesystem cache")?;
            Ok(Some(cache))
        }
        "redis" => {
            let cache: Arc<dyn Cache> = Arc::new(
                RedisCache::new(settings.redis_cache_config())
                    .await
                    .context("failed to initialise redis cache")?,
            );
            Ok(Some(cache))
        }
        _ => Ok(None),
    }
}
