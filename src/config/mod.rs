//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, num::NonZeroU64, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::StorageBackend;
use crate::domain::GenerationId;
use crate::worker::{ClassifierRules, DocumentScope};

pub use cli::{CacheArgs, CacheOverrides, CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "riparo";
const ENV_PREFIX: &str = "RIPARO";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_MAX_REQUEST_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_PUBLIC_URL: &str = "http://127.0.0.1:8080/";
const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:3000/";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CACHE_NAME: &str = "riparo";
const DEFAULT_OFFLINE_PATH: &str = "/offline.html";
const DEFAULT_DISK_DIRECTORY: &str = ".riparo-cache";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub origin: OriginSettings,
    pub cache: CacheSettings,
    pub classifier: ClassifierSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Largest request body the proxy buffers before forwarding.
    pub max_request_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    /// Origin clients address; only same-origin requests are intercepted.
    pub public_url: Url,
    /// Origin the network requests actually go to.
    pub upstream_url: Url,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub name: String,
    pub generation: GenerationId,
    pub manifest: Vec<String>,
    pub offline_path: String,
    pub backend: StorageBackend,
    pub skip_waiting: bool,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub static_prefixes: Vec<String>,
    pub document_prefixes: Vec<String>,
}

impl ClassifierSettings {
    /// Non-empty `document_prefixes` switch to prefix-scoped documents.
    pub fn rules(&self) -> ClassifierRules {
        let document_scope = if self.document_prefixes.is_empty() {
            DocumentScope::Heuristic
        } else {
            DocumentScope::Prefixes(self.document_prefixes.clone())
        };
        ClassifierRules {
            static_prefixes: self.static_prefixes.clone(),
            document_scope,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.manifest")
            .with_list_parse_key("classifier.static_prefixes")
            .with_list_parse_key("classifier.document_prefixes")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Warm(args)) | Some(Command::Generations(args)) => {
            raw.apply_cache_args(args)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    origin: RawOriginSettings,
    cache: RawCacheSettings,
    classifier: RawClassifierSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(limit) = overrides.server_max_request_bytes {
            self.server.max_request_bytes = Some(limit);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.public_url.as_ref() {
            self.origin.public_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.request_timeout_seconds {
            self.origin.request_timeout_seconds = Some(seconds);
        }
        if let Some(skip) = overrides.skip_waiting {
            self.cache.skip_waiting = Some(skip);
        }

        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_cache_args(&mut self, args: &CacheArgs) {
        if let Some(level) = args.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        self.apply_cache_overrides(&args.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(generation) = overrides.generation.as_ref() {
            self.cache.generation = Some(generation.clone());
        }
        if let Some(storage) = overrides.storage.as_ref() {
            self.cache.storage = Some(storage.clone());
        }
        if let Some(directory) = overrides.directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(url) = overrides.upstream_url.as_ref() {
            self.origin.upstream_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            origin,
            cache,
            classifier,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let origin = build_origin_settings(origin)?;
        let cache = build_cache_settings(cache)?;
        let classifier = build_classifier_settings(classifier);

        Ok(Self {
            server,
            logging,
            origin,
            cache,
            classifier,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let max_request_bytes_value = server
        .max_request_bytes
        .unwrap_or(DEFAULT_MAX_REQUEST_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("server.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "server.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        max_request_bytes,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_origin_settings(origin: RawOriginSettings) -> Result<OriginSettings, LoadError> {
    let public_url = parse_origin_url(
        origin.public_url.as_deref().unwrap_or(DEFAULT_PUBLIC_URL),
        "origin.public_url",
    )?;
    let upstream_url = parse_origin_url(
        origin.upstream_url.as_deref().unwrap_or(DEFAULT_UPSTREAM_URL),
        "origin.upstream_url",
    )?;

    let timeout_secs = origin
        .request_timeout_seconds
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "origin.request_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(OriginSettings {
        public_url,
        upstream_url,
        request_timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let name = cache
        .name
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_CACHE_NAME.to_string());
    if name.is_empty() {
        return Err(LoadError::invalid("cache.name", "must not be empty"));
    }

    let generation = cache.generation.unwrap_or_else(default_generation);
    let generation = GenerationId::new(generation)
        .map_err(|err| LoadError::invalid("cache.generation", err.to_string()))?;

    let offline_path = cache
        .offline_path
        .unwrap_or_else(|| DEFAULT_OFFLINE_PATH.to_string());
    if !offline_path.starts_with('/') {
        return Err(LoadError::invalid(
            "cache.offline_path",
            format!("`{offline_path}` must be an absolute path"),
        ));
    }

    let manifest = cache
        .manifest
        .unwrap_or_else(|| vec![offline_path.clone()]);
    if let Some(entry) = manifest.iter().find(|path| !path.starts_with('/')) {
        return Err(LoadError::invalid(
            "cache.manifest",
            format!("`{entry}` must be an absolute path"),
        ));
    }
    if !manifest.contains(&offline_path) {
        return Err(LoadError::invalid(
            "cache.manifest",
            format!("must include the offline page `{offline_path}`"),
        ));
    }

    let backend = match cache.storage.as_deref().map(str::trim) {
        None | Some("memory") => StorageBackend::Memory,
        Some("disk") => StorageBackend::Disk {
            directory: cache
                .directory
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DISK_DIRECTORY)),
        },
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.storage",
                format!("unknown backend `{other}`, expected `memory` or `disk`"),
            ));
        }
    };
    if let StorageBackend::Disk { directory } = &backend
        && directory.as_os_str().is_empty()
    {
        return Err(LoadError::invalid(
            "cache.directory",
            "path must not be empty",
        ));
    }

    Ok(CacheSettings {
        name,
        generation,
        manifest,
        offline_path,
        backend,
        skip_waiting: cache.skip_waiting.unwrap_or(true),
    })
}

fn build_classifier_settings(classifier: RawClassifierSettings) -> ClassifierSettings {
    let defaults = ClassifierRules::default();
    ClassifierSettings {
        static_prefixes: classifier
            .static_prefixes
            .unwrap_or(defaults.static_prefixes),
        document_prefixes: classifier.document_prefixes.unwrap_or_default(),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    public_url: Option<String>,
    upstream_url: Option<String>,
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    name: Option<String>,
    generation: Option<String>,
    manifest: Option<Vec<String>>,
    offline_path: Option<String>,
    storage: Option<String>,
    directory: Option<PathBuf>,
    skip_waiting: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawClassifierSettings {
    static_prefixes: Option<Vec<String>>,
    document_prefixes: Option<Vec<String>>,
}

fn default_generation() -> String {
    format!("v-{}", env!("CARGO_PKG_VERSION"))
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_origin_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid url `{value}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{}`", url.scheme()),
        ));
    }
    if url.host_str().is_none() {
        return Err(LoadError::invalid(key, "url must have a host"));
    }
    Ok(url)
}
