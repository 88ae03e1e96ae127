use anyhow::{anyhow, Result};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 8;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub render_timeout_secs: Option<u64>,
    #[serde(default)]
    pub use_mock: bool,
}

impl Config {
    /// Load configuration from file, then apply environment overrides.
    ///
    /// The API key is deliberately not overridden here; see [`CredentialStore`]
    /// for how the key sources are ranked.
    pub fn load() -> Result<Self> {
        let path = Self::get_config_path()?;
        let mut config = Self::load_from(&path).unwrap_or_else(|_| {
            info!("No config file found, using defaults");
            Self::default()
        });

        if let Ok(model) = std::env::var("PAGECRAFT_MODEL") {
            config.model = Some(model);
        }

        if let Ok(api_base) = std::env::var("PAGECRAFT_API_BASE") {
            config.api_base = Some(api_base);
        }

        if let Some(secs) = std::env::var("PAGECRAFT_RENDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.render_timeout_secs = Some(secs);
        }

        if std::env::var("PAGECRAFT_USE_MOCK").is_ok() {
            config.use_mock = true;
        }

        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            info!("Loaded config from: {}", path.display());
            Ok(config)
        } else {
            Err(anyhow!("Config file not found"))
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!("Saved config to: {}", path.display());
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        Ok(Self::get_config_dir()?.join("config.toml"))
    }

    pub fn get_config_dir() -> Result<PathBuf> {
        let home = home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(home.join(".pagecraft"))
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn api_base(&self) -> &str {
        self.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs.unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS))
    }

    pub fn is_mock_mode(&self) -> bool {
        self.use_mock
    }

    pub fn show_config_info() -> Result<()> {
        let config_path = Self::get_config_path()?;
        println!("Configuration file: {}", config_path.display());

        if config_path.exists() {
            println!("Status: Found");
            let config = Self::load_from(&config_path)?;
            println!(
                "API Key: {}",
                if config.gemini_api_key.is_some() { "Set" } else { "Not set" }
            );
            println!("Model: {}", config.model());
            println!("API base: {}", config.api_base());
            println!("Render timeout: {}s", config.render_timeout().as_secs());
            println!("Mock mode: {}", config.use_mock);
        } else {
            println!("Status: Not found (using defaults)");
        }

        println!(
            "\nAPI key precedence: --api-key / GEMINI_API_KEY > config file > {}",
            "PAGECRAFT_DEFAULT_API_KEY"
        );
        println!("\nTo set API key:");
        println!("  pagecraft --set-api-key <your-key>");
        println!("\nOr set environment variable:");
        println!("  export GEMINI_API_KEY=<your-key>");

        Ok(())
    }
}

/// Persistent storage for the single credential string.
pub trait CredentialBackend: Send + Sync {
    /// Returns the persisted key, if any.
    fn load(&self) -> Option<String>;

    /// Persists the key, replacing any previous value.
    fn save(&self, key: &str) -> Result<()>;
}

/// Stores the key as `gemini_api_key` in the TOML config file.
pub struct FileCredentialBackend {
    path: PathBuf,
}

impl FileCredentialBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backend for the default config location (`~/.pagecraft/config.toml`).
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(Config::get_config_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialBackend for FileCredentialBackend {
    fn load(&self) -> Option<String> {
        Config::load_from(&self.path).ok()?.gemini_api_key
    }

    fn save(&self, key: &str) -> Result<()> {
        // A file that exists but does not parse is never replaced.
        let mut config = if self.path.exists() {
            Config::load_from(&self.path)?
        } else {
            Config::default()
        };
        config.gemini_api_key = Some(key.to_string());
        config.save_to(&self.path)
    }
}

/// Keeps the "persisted" key in memory; for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCredentialBackend {
    value: Mutex<Option<String>>,
}

impl MemoryCredentialBackend {
    pub fn with_value(key: &str) -> Self {
        Self {
            value: Mutex::new(Some(key.to_string())),
        }
    }
}

impl CredentialBackend for MemoryCredentialBackend {
    fn load(&self) -> Option<String> {
        match self.value.lock() {
            Ok(value) => value.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn save(&self, key: &str) -> Result<()> {
        let mut value = self.value.lock().map_err(|_| anyhow!("credential lock poisoned"))?;
        *value = Some(key.to_string());
        Ok(())
    }
}

/// What the store knows about the key so far.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CachedKey {
    Unresolved,
    /// Resolution ran and found nothing; only `set` changes this.
    Missing,
    Key(String),
}

impl CachedKey {
    fn from_value(value: Option<String>) -> Self {
        match non_empty(value) {
            Some(key) => CachedKey::Key(key),
            None => CachedKey::Unresolved,
        }
    }
}

/// Resolves and stores the generation-service API key.
///
/// Precedence: explicit (CLI flag / `GEMINI_API_KEY`) > persisted > default.
/// The default is deployment configuration (`PAGECRAFT_DEFAULT_API_KEY`),
/// never a value compiled into the binary. Storage is consulted once; later
/// reads, including ones that found no key, are answered from memory.
pub struct CredentialStore {
    cached: Mutex<CachedKey>,
    backend: Box<dyn CredentialBackend>,
    default_key: Option<String>,
}

impl CredentialStore {
    pub fn new(
        explicit: Option<String>,
        backend: Box<dyn CredentialBackend>,
        default_key: Option<String>,
    ) -> Self {
        Self {
            cached: Mutex::new(CachedKey::from_value(explicit)),
            backend,
            default_key: non_empty(default_key),
        }
    }

    /// Builds the store from the process environment and the default config file.
    pub fn from_env(explicit: Option<String>) -> Result<Self> {
        let explicit = explicit.or_else(|| std::env::var("GEMINI_API_KEY").ok());
        let default_key = std::env::var("PAGECRAFT_DEFAULT_API_KEY").ok();
        Ok(Self::new(
            explicit,
            Box::new(FileCredentialBackend::default_location()?),
            default_key,
        ))
    }

    /// Stores the key in memory and in persistent storage.
    ///
    /// Returns `true` when the key was also persisted. The in-memory value
    /// is updated either way.
    pub fn set(&self, key: &str) -> bool {
        self.set_cached(CachedKey::from_value(Some(key.to_string())));
        match self.backend.save(key) {
            Ok(()) => {
                info!("API key saved");
                true
            }
            Err(e) => {
                warn!("Failed to persist API key: {}", e);
                false
            }
        }
    }

    /// Returns the resolved key, or an empty string when none is available.
    pub fn get(&self) -> String {
        match self.cached() {
            CachedKey::Key(key) => return key,
            CachedKey::Missing => return String::new(),
            CachedKey::Unresolved => {}
        }

        let resolved = non_empty(self.backend.load())
            .map(|key| {
                debug!("Using persisted API key");
                key
            })
            .or_else(|| {
                self.default_key.clone().map(|key| {
                    debug!("Using default API key");
                    key
                })
            });

        match resolved {
            Some(key) => {
                self.set_cached(CachedKey::Key(key.clone()));
                key
            }
            None => {
                debug!("No API key configured");
                self.set_cached(CachedKey::Missing);
                String::new()
            }
        }
    }

    pub fn is_set(&self) -> bool {
        !self.get().is_empty()
    }

    fn cached(&self) -> CachedKey {
        match self.cached.lock() {
            Ok(cached) => cached.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_cached(&self, key: CachedKey) {
        let mut cached = match self.cached.lock() {
            Ok(cached) => cached,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cached = key;
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
