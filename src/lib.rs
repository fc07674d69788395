use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

pub mod events;

/// Result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by all fallible operations within this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("firebase error: {0}")]
    Firebase(#[from] events::firebase::ClientError),
}

/// Event retrieval configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct EventsConfig {
    /// Source for events.
    pub source: events::EventSourceKind,
    /// Where year/month filtering happens.
    #[serde(default)]
    pub filter: events::FilterStrategyKind,
    /// Firebase Realtime Database settings, required for the `firebase` source.
    pub firebase: Option<FirebaseConfig>,
    /// Events used by the `static` source.
    #[serde(default)]
    pub events: Vec<events::Event>,
}

/// Firebase Realtime Database configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct FirebaseConfig {
    /// Base URL of the database, e.g. `https://my-project-default-rtdb.firebaseio.com`.
    pub database_url: String,
    /// Name of the collection holding the event records.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Optional database secret or ID token passed as `auth` query parameter.
    pub auth_token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_collection() -> String {
    "events".into()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Staleness hints sent to downstream caches via `Cache-Control`.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct CacheConfig {
    /// Max age in seconds of the featured events on the home page.
    pub featured_max_age: u32,
    /// Max age in seconds of the event listings.
    pub events_max_age: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            featured_max_age: 1800,
            events_max_age: 60,
        }
    }
}

/// Website specific configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SiteConfig {
    /// The site title.
    pub title: String,
    /// Optional site description. This is used in the description meta tag.
    pub description: Option<String>,
    /// Optional canonical URL of the site. This is used in the canonical meta tag.
    pub canonical_url: Option<String>,
    /// Cache staleness hints.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Global application configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ServerConfig {
    /// Address on which the web server will listen.
    pub listen_addr: SocketAddr,
    /// Automatically reload templates when they are modified.
    pub template_autoreload: bool,
    /// Path to the template directory.
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    /// Path to the static directory.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_template_dir() -> PathBuf {
    "templates".into()
}

fn default_static_dir() -> PathBuf {
    "static".into()
}

/// Global application configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct AppConfig {
    /// Server configuration section.
    pub server: ServerConfig,
    /// Website configuration section.
    pub site: SiteConfig,
    /// Events configuration section.
    pub events: EventsConfig,
}

impl AppConfig {
    /// Loads the application configuration from files in the `config/` directory and environment
    /// variables.
    pub fn load() -> Result<AppConfig> {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".into());

        log::info!("loading configuration using {} environment", app_env);

        let config = Config::builder()
            // Configuration defaults from `config/default.toml`.
            .add_source(File::with_name("config/default"))
            // Optional environment specific config overrides, e.g. `config/production.toml`.
            .add_source(File::with_name(&format!("config/{}", app_env)).required(false))
            // Optional local config overrides from `config/local.toml` (on .gitignore).
            .add_source(File::with_name("config/local").required(false))
            // Config from environment variables.
            .add_source(Environment::default().separator("__"))
            // Config from environment variables prefixed with `EVENTSITE_`.
            .add_source(
                Environment::with_prefix("EVENTSITE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        log::debug!("loaded configuration: {:?}", config);

        Ok(config)
    }
}
