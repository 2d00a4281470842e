//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "postloop";
const ENV_PREFIX: &str = "POSTLOOP";
const DEFAULT_CACHE_TTL_MS: u64 = 300_000;
const DEFAULT_CACHE_MAX_SIZE: u64 = 50;
const DEFAULT_CACHE_SWEEP_INTERVAL_MS: u64 = 60_000;
const DEFAULT_AUTO_REFRESH_MS: u64 = 30_000;
const DEFAULT_INVALIDATION_DEBOUNCE_MS: u64 = 1_000;
const DEFAULT_PREFETCH_MARGIN_PX: u32 = 100;
const DEFAULT_TIMEZONE: &str = "UTC";
const DEFAULT_API_BASE_URL: &str = "http://localhost/wp-json/wp/v2/";
const DEFAULT_API_TIMEOUT_SECS: u64 = 10;

/// Command-line arguments for the postloop binary.
#[derive(Debug, Parser)]
#[command(
    name = "postloop",
    version,
    about = "Compile content loop queries and fetch them through a response cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "POSTLOOP_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the compiled query parameters and cache keys for a query state.
    Compile(CompileArgs),
    /// Print the numbered page window.
    Pages(PagesArgs),
    /// Load a query state from the content API and print the resulting view.
    Fetch(FetchArgs),
}

#[derive(Debug, Args, Clone)]
pub struct CompileArgs {
    /// Query state as inline JSON, `@path` to read a file, or `-` for stdin.
    #[arg(value_name = "STATE", default_value = "{}")]
    pub state: String,

    /// Resolve relative dates against this RFC 3339 instant instead of now.
    #[arg(long = "at", value_name = "INSTANT")]
    pub at: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct PagesArgs {
    /// Total number of pages.
    #[arg(long, value_name = "COUNT")]
    pub total: u32,

    /// Current page (1-based).
    #[arg(long, value_name = "PAGE", default_value_t = 1)]
    pub current: u32,
}

#[derive(Debug, Args, Clone)]
pub struct FetchArgs {
    /// Query state as inline JSON, `@path` to read a file, or `-` for stdin.
    #[arg(value_name = "STATE", default_value = "{}")]
    pub state: String,

    /// Append this many further pages after the initial load.
    #[arg(long, value_name = "COUNT", default_value_t = 0)]
    pub more: u32,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
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

    /// Enable or disable the response cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the response cache TTL.
    #[arg(long = "cache-ttl-ms", value_name = "MILLISECONDS")]
    pub cache_ttl_ms: Option<u64>,

    /// Override the maximum number of cached responses.
    #[arg(long = "cache-max-size", value_name = "COUNT")]
    pub cache_max_size: Option<u64>,

    /// Override the timezone used to resolve relative dates.
    #[arg(long = "timezone", value_name = "TZ")]
    pub timezone: Option<String>,

    /// Override the content API base URL.
    #[arg(long = "api-base-url", value_name = "URL")]
    pub api_base_url: Option<String>,

    /// Override the content API request timeout.
    #[arg(long = "api-timeout-seconds", value_name = "SECONDS")]
    pub api_timeout_seconds: Option<u64>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub controller: LoopSettings,
    pub api: ApiSettings,
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
    pub ttl: Duration,
    pub max_size: NonZeroUsize,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// `None` when periodic refresh is disabled.
    pub auto_refresh: Option<Duration>,
    pub invalidation_debounce: Duration,
    pub prefetch_margin_px: u32,
    pub timezone: Tz,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: Url,
    pub timeout: Duration,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    #[serde(rename = "loop")]
    controller: RawLoopSettings,
    api: RawApiSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(ttl) = overrides.cache_ttl_ms {
            self.cache.ttl_ms = Some(ttl);
        }
        if let Some(max) = overrides.cache_max_size {
            self.cache.max_size = Some(max);
        }
        if let Some(tz) = overrides.timezone.as_ref() {
            self.controller.timezone = Some(tz.clone());
        }
        if let Some(url) = overrides.api_base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.api_timeout_seconds {
            self.api.timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            controller,
            api,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            controller: build_loop_settings(controller)?,
            api: build_api_settings(api)?,
        })
    }
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
    let ttl_ms = cache.ttl_ms.unwrap_or(DEFAULT_CACHE_TTL_MS);
    if ttl_ms == 0 {
        return Err(LoadError::invalid("cache.ttl_ms", "must be greater than zero"));
    }

    let max_size = cache.max_size.unwrap_or(DEFAULT_CACHE_MAX_SIZE);
    let max_size = usize::try_from(max_size)
        .map_err(|_| LoadError::invalid("cache.max_size", "value exceeds supported range"))
        .and_then(|value| {
            NonZeroUsize::new(value)
                .ok_or_else(|| LoadError::invalid("cache.max_size", "must be greater than zero"))
        })?;

    let sweep_ms = cache
        .sweep_interval_ms
        .unwrap_or(DEFAULT_CACHE_SWEEP_INTERVAL_MS);
    if sweep_ms == 0 {
        return Err(LoadError::invalid(
            "cache.sweep_interval_ms",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        ttl: Duration::from_millis(ttl_ms),
        max_size,
        sweep_interval: Duration::from_millis(sweep_ms),
    })
}

fn build_loop_settings(controller: RawLoopSettings) -> Result<LoopSettings, LoadError> {
    // Zero disables periodic refresh.
    let auto_refresh = match controller.auto_refresh_ms.unwrap_or(DEFAULT_AUTO_REFRESH_MS) {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };

    let timezone_name = controller
        .timezone
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
    let timezone = Tz::from_str(&timezone_name).map_err(|err| {
        LoadError::invalid("loop.timezone", format!("unknown timezone `{timezone_name}`: {err}"))
    })?;

    Ok(LoopSettings {
        auto_refresh,
        invalidation_debounce: Duration::from_millis(
            controller
                .invalidation_debounce_ms
                .unwrap_or(DEFAULT_INVALIDATION_DEBOUNCE_MS),
        ),
        prefetch_margin_px: controller
            .prefetch_margin_px
            .unwrap_or(DEFAULT_PREFETCH_MARGIN_PX),
        timezone,
    })
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let raw_url = api
        .base_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
    let base_url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("api.base_url", format!("invalid URL `{raw_url}`: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "api.base_url",
            format!("unsupported scheme `{}`", base_url.scheme()),
        ));
    }

    let timeout_secs = api.timeout_seconds.unwrap_or(DEFAULT_API_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "api.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ApiSettings {
        base_url,
        timeout: Duration::from_secs(timeout_secs),
    })
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
    ttl_ms: Option<u64>,
    max_size: Option<u64>,
    sweep_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoopSettings {
    auto_refresh_ms: Option<u64>,
    invalidation_debounce_ms: Option<u64>,
    prefetch_margin_px: Option<u32>,
    timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
}
