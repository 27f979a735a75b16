use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::features::DEFAULT_WINDOW_SIZE;
use crate::logging::LogConfig;
use crate::models::Targets;
use crate::pipeline::{PipelineConfig, DEFAULT_RETENTION_DAYS};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application metadata
    pub metadata: ConfigMetadata,

    /// Paths used by the CLI
    #[serde(default)]
    pub settings: AppSettings,

    /// Pipeline defaults
    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub logging: LogConfig,

    /// Coached clients by id
    #[serde(default)]
    pub clients: HashMap<String, ClientConfig>,

    /// Client used when a command names none
    pub default_client_id: Option<String>,
}

/// Configuration metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Data directory path
    pub data_dir: PathBuf,

    /// Dashboard store; relative paths resolve against `data_dir`
    pub database_path: PathBuf,
}

/// Retention and window defaults for every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub retention_days: u32,
    pub window_size: usize,
}

/// One coached client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub targets: Targets,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        let now = Utc::now();

        AppConfig {
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            settings: AppSettings::default(),
            pipeline: PipelineSettings::default(),
            logging: LogConfig::default(),
            clients: HashMap::new(),
            default_client_id: None,
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            data_dir: AppConfig::default_config_dir(),
            database_path: PathBuf::from("coachrs.db"),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            retention_days: DEFAULT_RETENTION_DAYS,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl PipelineSettings {
    /// Run parameters anchored at `today`
    pub fn to_pipeline_config(&self, today: chrono::NaiveDate) -> PipelineConfig {
        PipelineConfig {
            retention_days: self.retention_days,
            window_size: self.window_size,
            today,
        }
    }
}

impl AppSettings {
    pub fn resolved_database_path(&self) -> PathBuf {
        if self.database_path.is_absolute() {
            self.database_path.clone()
        } else {
            self.data_dir.join(&self.database_path)
        }
    }
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// `~/.coachrs`
    pub fn default_config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".coachrs")
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Load configuration with fallback to defaults
    ///
    /// A missing file is normal on first use; a file that exists but does not
    /// parse is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        if !config_path.exists() {
            warn!(path = %config_path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from_file(&config_path)
    }

    /// Reject settings and targets the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.pipeline
            .to_pipeline_config(Utc::now().date_naive())
            .validate()
            .context("Invalid pipeline settings")?;

        for client in self.clients.values() {
            client
                .targets
                .validate()
                .with_context(|| format!("Invalid targets for client {}", client.id))?;
        }

        if let Some(id) = &self.default_client_id {
            if !self.clients.contains_key(id) {
                anyhow::bail!("Default client {} is not configured", id);
            }
        }

        Ok(())
    }

    /// Add a new client to the configuration
    pub fn add_client(&mut self, client: ClientConfig) -> Result<()> {
        client
            .targets
            .validate()
            .with_context(|| format!("Invalid targets for client {}", client.name))?;

        if self.clients.contains_key(&client.id) {
            anyhow::bail!("Client already exists: {}", client.id);
        }

        let client_id = client.id.clone();

        // First client becomes the default
        if self.clients.is_empty() {
            self.default_client_id = Some(client_id.clone());
        }

        self.clients.insert(client_id, client);
        self.metadata.updated_at = Utc::now();

        Ok(())
    }

    /// Remove a client from the configuration
    pub fn remove_client(&mut self, client_id: &str) -> Result<ClientConfig> {
        let removed = self
            .clients
            .remove(client_id)
            .ok_or_else(|| anyhow::anyhow!("Client not found: {}", client_id))?;

        if self.default_client_id.as_deref() == Some(client_id) {
            let next = self.list_clients().first().map(|client| client.id.clone());
            self.default_client_id = next;
        }

        self.metadata.updated_at = Utc::now();
        Ok(removed)
    }

    pub fn get_client(&self, client_id: &str) -> Option<&ClientConfig> {
        self.clients.get(client_id)
    }

    pub fn get_default_client(&self) -> Option<&ClientConfig> {
        self.default_client_id
            .as_ref()
            .and_then(|id| self.clients.get(id))
    }

    /// Named client, or the default one when `client_id` is `None`
    pub fn resolve_client(&self, client_id: Option<&str>) -> Result<&ClientConfig> {
        match client_id {
            Some(id) => self
                .get_client(id)
                .ok_or_else(|| anyhow::anyhow!("Client not found: {}", id)),
            None => self
                .get_default_client()
                .ok_or_else(|| anyhow::anyhow!("No client given and no default client configured")),
        }
    }

    pub fn set_default_client(&mut self, client_id: &str) -> Result<()> {
        if !self.clients.contains_key(client_id) {
            anyhow::bail!("Client not found: {}", client_id);
        }

        self.default_client_id = Some(client_id.to_string());
        self.metadata.updated_at = Utc::now();
        Ok(())
    }

    /// All clients sorted by name
    pub fn list_clients(&self) -> Vec<&ClientConfig> {
        let mut clients: Vec<&ClientConfig> = self.clients.values().collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        clients
    }

    pub fn active_clients(&self) -> Vec<&ClientConfig> {
        self.list_clients()
            .into_iter()
            .filter(|client| client.active)
            .collect()
    }
}

impl ClientConfig {
    /// Create a new client with a generated id unless one is given
    pub fn new(name: String, client_id: Option<String>, targets: Targets) -> Self {
        ClientConfig {
            id: client_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name,
            targets,
            active: true,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn client(name: &str, id: &str) -> ClientConfig {
        ClientConfig::new(name.to_string(), Some(id.to_string()), Targets::default())
    }

    #[test]
    fn test_config_serialization() {
        let mut config = AppConfig::default();
        config.add_client(client("Sam", "sam")).unwrap();

        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.metadata.version, deserialized.metadata.version);
        assert_eq!(deserialized.clients["sam"].targets, Targets::default());
        assert_eq!(deserialized.pipeline, PipelineSettings::default());
    }

    #[test]
    fn test_client_management() {
        let mut config = AppConfig::default();
        config.add_client(client("Robin", "robin")).unwrap();
        config.add_client(client("Alex", "alex")).unwrap();

        assert_eq!(config.clients.len(), 2);
        assert_eq!(config.default_client_id.as_deref(), Some("robin"));

        let names: Vec<&str> = config.list_clients().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Alex", "Robin"]);

        config.remove_client("robin").unwrap();
        assert_eq!(config.default_client_id.as_deref(), Some("alex"));
        assert!(config.remove_client("robin").is_err());
        assert!(config.set_default_client("nobody").is_err());
    }

    #[test]
    fn test_duplicate_client_rejected() {
        let mut config = AppConfig::default();
        config.add_client(client("Sam", "sam")).unwrap();
        assert!(config.add_client(client("Sam", "sam")).is_err());
    }

    #[test]
    fn test_invalid_targets_rejected() {
        let mut config = AppConfig::default();
        let targets = Targets {
            water: Decimal::ZERO,
            ..Targets::default()
        };
        assert!(config
            .add_client(ClientConfig::new("Sam".to_string(), None, targets))
            .is_err());
    }

    #[test]
    fn test_resolve_client() {
        let mut config = AppConfig::default();
        assert!(config.resolve_client(None).is_err());

        config.add_client(client("Sam", "sam")).unwrap();
        assert_eq!(config.resolve_client(None).unwrap().id, "sam");
        assert_eq!(config.resolve_client(Some("sam")).unwrap().name, "Sam");
        assert!(config.resolve_client(Some("kim")).is_err());
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original_config = AppConfig::default();
        let targets = Targets {
            calories: dec!(2100),
            ..Targets::default()
        };
        original_config
            .add_client(ClientConfig::new("Sam".to_string(), None, targets))
            .unwrap();

        original_config.save_to_file(&config_path).unwrap();
        let loaded_config = AppConfig::load_or_default(Some(config_path.as_path())).unwrap();

        assert_eq!(loaded_config.clients.len(), 1);
        assert_eq!(loaded_config.get_default_client().unwrap().targets.calories, dec!(2100));
    }

    #[test]
    fn test_partial_targets_fill_defaults() {
        let content = r#"
            default_client_id = "sam"

            [metadata]
            version = "1.0"
            created_at = "2024-01-01T00:00:00Z"
            updated_at = "2024-01-01T00:00:00Z"

            [clients.sam]
            id = "sam"
            name = "Sam"
            created_at = "2024-01-01T00:00:00Z"

            [clients.sam.targets]
            steps = "10000"
        "#;

        let config: AppConfig = toml::from_str(content).unwrap();
        let targets = &config.clients["sam"].targets;
        assert_eq!(targets.steps, dec!(10000));
        assert_eq!(targets.calories, dec!(2500));
        assert!(config.clients["sam"].active);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("absent.toml");
        let config = AppConfig::load_or_default(Some(path.as_path())).unwrap();
        assert!(config.clients.is_empty());
    }

    #[test]
    fn test_database_path_resolution() {
        let settings = AppSettings {
            data_dir: PathBuf::from("/var/lib/coachrs"),
            database_path: PathBuf::from("cache.db"),
        };
        assert_eq!(settings.resolved_database_path(), PathBuf::from("/var/lib/coachrs/cache.db"));
    }
}
