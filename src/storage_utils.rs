use crate::candles::{MAX_CANDLES_PER_REQUEST, interval_duration};
use anyhow::{Context, bail};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

// CONFIGURATION STRUCTS
// Every section has defaults so a fresh install can write a complete config.json.

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub weight_limit_per_minute: u32, // Bitvavo allows 1000 weight/minute per IP
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.bitvavo.com/v2".to_string(),
            weight_limit_per_minute: 1000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CandleConfig {
    pub interval: String, // e.g. "5m", "15m", "4h"
    pub limit: u32,       // e.g. 60 candles
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            interval: "5m".to_string(),
            limit: 60,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub bins: usize,
    pub lookback: usize,
    pub min_candles: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            bins: crate::levels::DEFAULT_BINS,
            lookback: 5,
            min_candles: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EntryConfig {
    pub invested_money: f64,
    pub tolerance_pct: f64, // current price may sit this far above the planned entry
    pub rsi_period: u32,
    pub fast_interval: String,
    pub slow_interval: String,
    pub indicator_limit: u32,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            invested_money: 500.0,
            tolerance_pct: 0.5,
            rsi_period: 14,
            fast_interval: "15m".to_string(),
            slow_interval: "4h".to_string(),
            indicator_limit: 50,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PredictionConfig {
    pub interval: String,
    pub window_hours: i64,
}

impl PredictionConfig {
    /// How far back the check looks; `None` when `window_hours` is not a usable duration.
    pub fn window(&self) -> Option<TimeDelta> {
        TimeDelta::try_hours(self.window_hours).filter(|w| *w > TimeDelta::zero())
    }
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            interval: "1m".to_string(),
            window_hours: 24,
        }
    }
}

fn default_filters() -> HashMap<String, String> {
    HashMap::from([("status".to_string(), "trading".to_string())])
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub candles: CandleConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub entry: EntryConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    // Keys of the /markets payload, e.g. {"status": "trading", "quote": "EUR"}
    #[serde(default = "default_filters")]
    pub filters: HashMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            candles: CandleConfig::default(),
            simulation: SimulationConfig::default(),
            entry: EntryConfig::default(),
            prediction: PredictionConfig::default(),
            filters: default_filters(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let sim = &self.simulation;
        if sim.bins < 2 {
            bail!("simulation.bins must be at least 2, got {}", sim.bins);
        }
        if sim.lookback == 0 {
            bail!("simulation.lookback must be at least 1");
        }
        if sim.min_candles <= sim.lookback {
            bail!(
                "simulation.min_candles ({}) must exceed simulation.lookback ({})",
                sim.min_candles,
                sim.lookback
            );
        }
        if !(self.entry.invested_money > 0.0) {
            bail!("entry.invested_money must be positive");
        }
        if self.api.weight_limit_per_minute == 0 {
            bail!("api.weight_limit_per_minute must be positive");
        }
        if self.candles.limit == 0 || self.candles.limit > MAX_CANDLES_PER_REQUEST {
            bail!(
                "candles.limit must be between 1 and {}, got {}",
                MAX_CANDLES_PER_REQUEST,
                self.candles.limit
            );
        }

        // The whole prediction window has to fit in one candles response.
        let prediction = &self.prediction;
        let Some(window) = prediction.window() else {
            bail!("prediction.window_hours must be positive, got {}", prediction.window_hours);
        };
        let Some(step) = interval_duration(&prediction.interval) else {
            bail!("prediction.interval {:?} is not a Bitvavo interval", prediction.interval);
        };
        let needed = (window.num_seconds() as u64).div_ceil(step.num_seconds() as u64);
        if needed > MAX_CANDLES_PER_REQUEST as u64 {
            bail!(
                "prediction window of {}h needs {} {} candles, more than the {} one request returns",
                prediction.window_hours,
                needed,
                prediction.interval,
                MAX_CANDLES_PER_REQUEST
            );
        }
        Ok(())
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path to the storage directory (e.g. ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// **Constructor: new**
    /// Creates a manager rooted at an explicit directory, creating it if needed.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)
                .await
                .with_context(|| format!("creating storage dir {}", base_dir.display()))?;
        }
        Ok(Self { base_dir })
    }

    /// **Constructor: new_relative**
    /// Creates a manager whose directory sits next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        // 1. Locate the running executable
        let exe_path = std::env::current_exe()?;

        // 2. Resolve its directory and append the relative path (e.g. "storage")
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", filename))
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.path_for(filename).exists()
    }

    /// **Generic Save Function**
    /// Serializes `data` to `<filename>.json`.
    ///
    /// Writes go to a `.tmp` sibling first and are renamed into place, so a crash
    /// mid-write leaves the previous document intact.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let final_path = self.path_for(filename);
        let tmp_path = self.base_dir.join(format!("{}.json.tmp", filename));

        let json_bytes = serde_json::to_vec_pretty(data)?;

        // 1. Write data to the temporary file
        fs::write(&tmp_path, json_bytes).await?;

        // 2. Atomically rename the temp file to the final name
        fs::rename(&tmp_path, &final_path).await?;

        debug!(path = %final_path.display(), "saved document");
        Ok(())
    }

    /// **Generic Load Function**
    /// Reads `<filename>.json` into any `Deserialize` type.
    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.path_for(filename);

        // serde_json validates UTF-8 itself, so skip read_to_string.
        let content = fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        let data = serde_json::from_slice(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(data)
    }

    /// Loads `config.json`, writing the defaults first if it does not exist yet.
    pub async fn load_config(&self) -> anyhow::Result<AppConfig> {
        if !self.exists("config") {
            info!(dir = %self.base_dir.display(), "no config.json found, writing defaults");
            self.save("config", &AppConfig::default()).await?;
        }
        let config: AppConfig = self.load("config").await?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_config_is_written_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path().join("storage")).await.unwrap();

        let config = storage.load_config().await.unwrap();

        assert!(storage.exists("config"));
        assert_eq!(config.simulation, SimulationConfig::default());
        assert_eq!(config.candles.interval, "5m");
        assert_eq!(config.filters.get("status").map(String::as_str), Some("trading"));
    }

    #[tokio::test]
    async fn partial_config_falls_back_to_section_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "candles": { "interval": "15m" }, "filters": { "quote": "EUR" } }"#,
        )
        .unwrap();

        let config = storage.load_config().await.unwrap();

        assert_eq!(config.candles.interval, "15m");
        assert_eq!(config.candles.limit, 60);
        assert_eq!(config.entry.invested_money, 500.0);
        assert_eq!(config.filters.len(), 1);
    }

    #[tokio::test]
    async fn invalid_simulation_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "simulation": { "bins": 1 } }"#,
        )
        .unwrap();

        let err = storage.load_config().await.unwrap_err();
        assert!(err.to_string().contains("bins"));
    }

    #[test]
    fn prediction_window_must_be_positive_and_representable() {
        for hours in [0, -5, i64::MAX] {
            let mut config = AppConfig::default();
            config.prediction.window_hours = hours;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("window_hours"), "{hours}: {err}");
        }
    }

    #[test]
    fn prediction_window_must_fit_one_request() {
        let mut config = AppConfig::default();
        config.prediction.window_hours = 72;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("4320"), "{err}");

        // Same window at a coarser interval fits.
        config.prediction.interval = "5m".to_string();
        assert!(config.validate().is_ok());

        config.prediction.interval = "weekly".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn save_replaces_document_without_leaving_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();

        storage.save("doc", &vec![1, 2, 3]).await.unwrap();
        storage.save("doc", &vec![4]).await.unwrap();

        let loaded: Vec<i32> = storage.load("doc").await.unwrap();
        assert_eq!(loaded, vec![4]);
        assert!(!dir.path().join("doc.json.tmp").exists());
    }
}
