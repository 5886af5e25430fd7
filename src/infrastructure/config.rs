use crate::application::migration_service::{PodSelectionStore, DEFAULT_LEGACY_ID_MIN_LENGTH};
use crate::application::poll_service::PollSettings;
use crate::application::throttle::{DelayPolicy, DELAY_CEILING};
use crate::domain::account::Credentials;
use crate::domain::metering::EnabledCategories;
use crate::domain::period::TimePeriods;
use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/ims.toml";

/// One week.
const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default)]
    pub portal: PortalSettings,
    pub account: AccountSettings,
    #[serde(default)]
    pub polling: PollingSettings,
    #[serde(default)]
    pub pods: PodSettings,
    #[serde(default)]
    pub sensors: SensorSettings,
    #[serde(default)]
    pub migration: MigrationSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_config_version() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PortalSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    /// IANA name used for period boundaries
    pub timezone: String,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            base_url: "https://ims.ssd.sk/api".to_string(),
            timeout_secs: 30,
            timezone: "Europe/Bratislava".to_string(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct AccountSettings {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AccountSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSettings")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingSettings {
    pub interval_minutes: u64,
    pub delay_min_secs: f64,
    pub delay_max_secs: f64,
    /// Period keys to poll; empty means all
    pub periods: Vec<String>,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            delay_min_secs: 1.0,
            delay_max_secs: 3.0,
            periods: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PodSettings {
    pub selected: Vec<String>,
    pub friendly_names: Vec<PodNameMapping>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PodNameMapping {
    pub pod_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorSettings {
    pub enable_supply: bool,
    pub enable_idle: bool,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            enable_supply: true,
            enable_idle: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MigrationSettings {
    pub legacy_id_min_length: usize,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            legacy_id_min_length: DEFAULT_LEGACY_ID_MIN_LENGTH,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl AppConfig {
    /// Load the TOML file, then apply `IMS__SECTION__KEY` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("IMS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.account.username.trim().is_empty() {
            anyhow::bail!("account.username must not be empty");
        }
        if self.polling.interval_minutes == 0 {
            anyhow::bail!("polling.interval_minutes must be at least 1");
        }
        if self.polling.interval_minutes > MAX_INTERVAL_MINUTES {
            anyhow::bail!(
                "polling.interval_minutes must be at most {}",
                MAX_INTERVAL_MINUTES
            );
        }
        let ceiling = DELAY_CEILING.as_secs_f64();
        for (key, secs) in [
            ("delay_min_secs", self.polling.delay_min_secs),
            ("delay_max_secs", self.polling.delay_max_secs),
        ] {
            if !(0.0..=ceiling).contains(&secs) {
                anyhow::bail!("polling.{} must be between 0 and {} seconds", key, ceiling);
            }
        }
        if self.periods().is_empty() {
            anyhow::bail!("polling.periods names no known period: {:?}", self.polling.periods);
        }
        self.timezone()?;
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.portal
            .timezone
            .parse::<Tz>()
            .map_err(|e| {
                anyhow::anyhow!("Invalid portal.timezone '{}': {}", self.portal.timezone, e)
            })
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.account.username.clone(), self.account.password.clone())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_minutes * 60)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.portal.timeout_secs)
    }

    pub fn delay_policy(&self) -> DelayPolicy {
        DelayPolicy::from_secs_f64(self.polling.delay_min_secs, self.polling.delay_max_secs)
    }

    pub fn periods(&self) -> TimePeriods {
        TimePeriods::select(&self.polling.periods)
    }

    pub fn poll_settings(&self) -> Result<PollSettings> {
        Ok(PollSettings {
            credentials: self.credentials(),
            selected_pods: self.pods.selected.clone(),
            friendly_names: self
                .pods
                .friendly_names
                .iter()
                .map(|m| (m.pod_id.clone(), m.name.clone()))
                .collect(),
            enabled: EnabledCategories::new(self.sensors.enable_supply, self.sensors.enable_idle),
            timezone: self.timezone()?,
        })
    }
}

/// The configuration file as a writable store for the POD selection.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<toml::Table> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        content
            .parse::<toml::Table>()
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    /// Replace the file via a sibling temp file so readers never see a partial write.
    fn write_table(&self, table: &toml::Table) -> Result<()> {
        let content = toml::to_string_pretty(table)?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl PodSelectionStore for ConfigStore {
    fn config_version(&self) -> Result<u32> {
        let table = self.read_table()?;
        match table.get("config_version") {
            None => Ok(default_config_version()),
            Some(value) => value
                .as_integer()
                .and_then(|v| u32::try_from(v).ok())
                .context("config_version must be a non-negative integer"),
        }
    }

    fn selected_pods(&self) -> Result<Vec<String>> {
        let table = self.read_table()?;
        let selected = table
            .get("pods")
            .and_then(|pods| pods.get("selected"))
            .and_then(|selected| selected.as_array());
        Ok(selected
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn save_selected_pods(&self, pods: &[String], version: u32) -> Result<()> {
        let mut table = self.read_table()?;
        table.insert("config_version".to_string(), toml::Value::Integer(i64::from(version)));

        let section = table
            .entry("pods".to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let section = section
            .as_table_mut()
            .context("[pods] must be a table")?;
        section.insert(
            "selected".to_string(),
            toml::Value::Array(pods.iter().cloned().map(toml::Value::String).collect()),
        );

        self.write_table(&table)
    }
}
