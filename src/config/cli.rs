use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the riparo binary.
#[derive(Debug, Parser)]
#[command(name = "riparo", version, about = "Offline-capable caching proxy")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "RIPARO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Populate the cache, retire old generations, then proxy requests.
    Serve(Box<ServeArgs>),
    /// Populate the cache and retire old generations, then exit.
    Warm(CacheArgs),
    /// List the cache generations present in the store.
    Generations(CacheArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the cache generation identifier.
    #[arg(long = "cache-generation", value_name = "ID")]
    pub generation: Option<String>,

    /// Override the cache storage backend (memory|disk).
    #[arg(long = "cache-storage", value_name = "BACKEND")]
    pub storage: Option<String>,

    /// Override the directory used by the disk backend.
    #[arg(long = "cache-directory", value_name = "PATH")]
    pub directory: Option<PathBuf>,

    /// Override the origin fetched from during population.
    #[arg(long = "origin-upstream-url", value_name = "URL")]
    pub upstream_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the largest request body the proxy accepts.
    #[arg(long = "server-max-request-bytes", value_name = "BYTES")]
    pub server_max_request_bytes: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the public origin clients use to reach the proxy.
    #[arg(long = "origin-public-url", value_name = "URL")]
    pub public_url: Option<String>,

    /// Override the per-request network timeout.
    #[arg(long = "origin-request-timeout-seconds", value_name = "SECONDS")]
    pub request_timeout_seconds: Option<u64>,

    /// Toggle immediate cutover after startup.
    #[arg(
        long = "cache-skip-waiting",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub skip_waiting: Option<bool>,
}
