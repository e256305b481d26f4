//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheOptions, LifeProfile};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "relcache";
const ENV_PREFIX: &str = "RELCACHE";
const DEFAULT_SCHEMA_PATH: &str = "schema.toml";

/// Command-line arguments for the relcache inspection binary.
#[derive(Debug, Parser)]
#[command(
    name = "relcache",
    version,
    about = "Inspect cache keys, tags and invalidation plans for a schema"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "RELCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the cache key a read would be stored under.
    Key(InspectArgs),
    /// Print the tags and ttl a read would be cached with.
    Tags(InspectArgs),
    /// Print the ordered tags a mutation would invalidate.
    Invalidations(InvalidationArgs),
}

#[derive(Debug, Args, Clone)]
pub struct InspectArgs {
    /// Model name as declared in the schema.
    pub model: String,

    /// Operation name, e.g. findMany.
    pub operation: String,

    /// Query arguments as a JSON document.
    #[arg(long, value_name = "JSON")]
    pub args: Option<String>,

    /// Caller identity used to scope the key.
    #[arg(long = "user", value_name = "ID")]
    pub user: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidationArgs {
    /// Mutated model name.
    pub model: String,

    /// Id of an affected row; repeat for several rows.
    #[arg(long = "row-id", value_name = "ID")]
    pub row_ids: Vec<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the schema document path.
    #[arg(long = "schema", global = true, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub schema_path: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        global = true,
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the life profile for models that declare none.
    #[arg(long = "default-life-profile", global = true, value_name = "PROFILE")]
    pub default_life_profile: Option<String>,

    /// Exclude a model from caching; repeat for several models.
    #[arg(long = "exclude", global = true, value_name = "MODEL")]
    pub excluded_models: Vec<String>,

    /// Toggle per-call cache diagnostics.
    #[arg(
        long = "debug-logging",
        global = true,
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub debug_logging: Option<bool>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheOptions,
    pub schema_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
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
            .with_list_parse_key("cache.excluded_models")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);
    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both.
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
    schema: RawSchemaSettings,
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
    default_life_profile: Option<String>,
    excluded_models: Vec<String>,
    debug_logging: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSchemaSettings {
    path: Option<PathBuf>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(path) = overrides.schema_path.as_ref() {
            self.schema.path = Some(path.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(profile) = overrides.default_life_profile.as_ref() {
            self.cache.default_life_profile = Some(profile.clone());
        }
        self.cache
            .excluded_models
            .extend(overrides.excluded_models.iter().cloned());
        if let Some(enabled) = overrides.debug_logging {
            self.cache.debug_logging = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            schema,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_options(cache)?,
            schema_path: schema
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCHEMA_PATH)),
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

fn build_cache_options(cache: RawCacheSettings) -> Result<CacheOptions, LoadError> {
    let default_life_profile = match cache.default_life_profile {
        Some(name) => LifeProfile::from_str(&name)
            .map_err(|err| LoadError::invalid("cache.default_life_profile", err.to_string()))?,
        None => LifeProfile::default(),
    };

    let options = cache
        .excluded_models
        .into_iter()
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty())
        .fold(CacheOptions::default(), CacheOptions::exclude_model);

    Ok(options
        .with_default_life_profile(default_life_profile)
        .with_debug_logging(cache.debug_logging.unwrap_or(false)))
}
