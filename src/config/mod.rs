//! Proxy settings resolved from `config/default`, `feedfilter.*`, an optional
//! `--config-file`, `FEEDFILTER__*` variables and command-line flags, in that order.

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::filter::FilterOptions;
use crate::cache::default_cache_dir;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "feedfilter";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Command-line arguments for the feedfilter binary.
#[derive(Debug, Parser)]
#[command(
    name = "feedfilter",
    version,
    about = "Filtering RSS/Atom proxy with an upstream-revalidated disk cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FEEDFILTER_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the per-request timeout.
    #[arg(long = "server-request-timeout-seconds", value_name = "SECONDS")]
    pub server_request_timeout_seconds: Option<u64>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

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

    /// Toggle the disk response cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the cache directory.
    #[arg(long = "cache-directory", value_name = "PATH")]
    pub cache_directory: Option<PathBuf>,

    /// Override the upstream HEAD probe timeout.
    #[arg(long = "cache-probe-timeout-seconds", value_name = "SECONDS")]
    pub cache_probe_timeout_seconds: Option<u64>,

    /// Toggle coalescing of concurrent misses for one cache key.
    #[arg(
        long = "cache-coalesce-misses",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_coalesce_misses: Option<bool>,

    /// Override the upstream fetch timeout.
    #[arg(long = "upstream-fetch-timeout-seconds", value_name = "SECONDS")]
    pub upstream_fetch_timeout_seconds: Option<u64>,

    /// Comma separated terms muted by the `mute_authors` filter.
    #[arg(long = "mute-authors", env = "MUTE_AUTHORS", value_name = "TERMS")]
    pub mute_authors: Option<String>,

    /// Comma separated terms muted by the `mute_urls` filter.
    #[arg(long = "mute-urls", env = "MUTE_URLS", value_name = "TERMS")]
    pub mute_urls: Option<String>,

    /// Only keep items published or updated within the last seven days.
    #[arg(
        long = "latest-only",
        env = "LATEST_ONLY",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub latest_only: Option<bool>,
}

/// Validated settings for one proxy process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub upstream: UpstreamSettings,
    pub filters: FilterSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub request_timeout: Duration,
    pub graceful_shutdown: Duration,
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
pub struct CacheSettings {
    pub enabled: bool,
    pub directory: PathBuf,
    pub probe_timeout: Duration,
    pub max_body_bytes: NonZeroUsize,
    pub coalesce_misses: bool,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub fetch_timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone, Default)]
pub struct FilterSettings {
    pub mute_authors: Vec<String>,
    pub mute_urls: Vec<String>,
    pub latest_only: bool,
}

impl From<&FilterSettings> for FilterOptions {
    fn from(settings: &FilterSettings) -> Self {
        Self {
            mute_authors: settings.mute_authors.clone(),
            mute_urls: settings.mute_urls.clone(),
            latest_only: settings.latest_only,
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

/// Merge every configuration source and validate the result.
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("FEEDFILTER").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_serve_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    upstream: RawUpstreamSettings,
    filters: RawFilterSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_request_timeout_seconds {
            self.server.request_timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(seconds) = overrides.cache_probe_timeout_seconds {
            self.cache.probe_timeout_seconds = Some(seconds);
        }
        if let Some(coalesce) = overrides.cache_coalesce_misses {
            self.cache.coalesce_misses = Some(coalesce);
        }
        if let Some(seconds) = overrides.upstream_fetch_timeout_seconds {
            self.upstream.fetch_timeout_seconds = Some(seconds);
        }
        if let Some(terms) = overrides.mute_authors.as_ref() {
            self.filters.mute_authors = Some(terms.clone());
        }
        if let Some(terms) = overrides.mute_urls.as_ref() {
            self.filters.mute_urls = Some(terms.clone());
        }
        if let Some(latest_only) = overrides.latest_only {
            self.filters.latest_only = Some(latest_only);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            upstream,
            filters,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let upstream = build_upstream_settings(upstream)?;
        let filters = build_filter_settings(filters);

        Ok(Self {
            server,
            logging,
            cache,
            upstream,
            filters,
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

    let request_timeout = positive_seconds(
        server
            .request_timeout_seconds
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        "server.request_timeout_seconds",
    )?;
    let graceful_shutdown = positive_seconds(
        server
            .graceful_shutdown_seconds
            .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        request_timeout,
        graceful_shutdown,
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let directory = match cache.directory {
        Some(path) if path.as_os_str().is_empty() => {
            return Err(LoadError::invalid(
                "cache.directory",
                "directory must not be empty",
            ));
        }
        Some(path) => path,
        None => default_cache_dir(),
    };

    let probe_timeout = positive_seconds(
        cache
            .probe_timeout_seconds
            .unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS),
        "cache.probe_timeout_seconds",
    )?;

    let max_body_bytes = non_zero_usize(
        cache.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
        "cache.max_body_bytes",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        directory,
        probe_timeout,
        max_body_bytes,
        coalesce_misses: cache.coalesce_misses.unwrap_or(true),
    })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let fetch_timeout = positive_seconds(
        upstream
            .fetch_timeout_seconds
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        "upstream.fetch_timeout_seconds",
    )?;

    let user_agent = upstream
        .user_agent
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

    Ok(UpstreamSettings {
        fetch_timeout,
        user_agent,
    })
}

fn build_filter_settings(filters: RawFilterSettings) -> FilterSettings {
    FilterSettings {
        mute_authors: filters
            .mute_authors
            .as_deref()
            .map(FilterOptions::split_terms)
            .unwrap_or_default(),
        mute_urls: filters
            .mute_urls
            .as_deref()
            .map(FilterOptions::split_terms)
            .unwrap_or_default(),
        latest_only: filters.latest_only.unwrap_or(false),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    request_timeout_seconds: Option<u64>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    directory: Option<PathBuf>,
    probe_timeout_seconds: Option<u64>,
    max_body_bytes: Option<u64>,
    coalesce_misses: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    fetch_timeout_seconds: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFilterSettings {
    mute_authors: Option<String>,
    mute_urls: Option<String>,
    latest_only: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Parse process arguments and load settings from them.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
