//! エンジン設定
//!
//! デフォルト値 → 設定ファイル（TOML）→ 環境変数（`BOTTLENECK_` 接頭辞）の順に読み込む。

use crate::error::Result;
use crate::logging::LogConfig;
use crate::monitoring::ThresholdTable;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// エンジン全体の設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EngineConfig {
    #[validate(nested)]
    pub sampler: SamplerConfig,
    #[validate(nested)]
    pub scheduler: SchedulerConfig,
    #[validate(nested)]
    pub lifecycle: LifecycleConfig,
    #[validate(nested)]
    pub thresholds: ThresholdTable,
    #[validate(nested)]
    pub events: EventConfig,
    pub logging: LogConfig,
}

/// サンプリング設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SamplerConfig {
    /// サンプリング間隔（ms）
    #[validate(range(min = 1))]
    pub interval_ms: u64,
    /// メトリクスソース読み出しのタイムアウト（ms）
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            timeout_ms: 400,
        }
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// スケジューラー設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SchedulerConfig {
    /// スケジューリング間隔（ms）
    #[validate(range(min = 1))]
    pub interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_ms: 100 }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// ボトルネックのライフサイクル設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LifecycleConfig {
    /// 再検出抑制期間（ms）
    pub dedup_window_ms: u64,
    /// 解決後の保持期間（ms）
    pub purge_grace_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 5_000,
            purge_grace_ms: 30_000,
        }
    }
}

impl LifecycleConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn purge_grace(&self) -> Duration {
        Duration::from_millis(self.purge_grace_ms)
    }
}

/// イベント通知設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EventConfig {
    /// 購読者毎のバッファサイズ
    #[validate(range(min = 1))]
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

impl EngineConfig {
    /// 設定を検証
    pub fn validate_config(&self) -> Result<()> {
        self.validate()?;
        Ok(())
    }

    /// TOML 形式で出力
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    config_file: Option<PathBuf>,
    load_env: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            config_file: None,
            load_env: false,
        }
    }

    /// Load configuration from file
    pub fn load_from_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    /// Load configuration from `BOTTLENECK_*` environment variables
    ///
    /// ネストしたキーは `__` で区切る（例: `BOTTLENECK_SAMPLER__INTERVAL_MS`）。
    pub fn load_from_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Result<EngineConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&EngineConfig::default())?);

        if let Some(config_path) = &self.config_file {
            builder = builder.add_source(File::from(config_path.as_path()).required(true));
        } else {
            builder = builder
                .add_source(File::with_name("bottleneck").required(false))
                .add_source(File::with_name("config/bottleneck").required(false));
        }

        if self.load_env {
            builder = builder.add_source(
                Environment::with_prefix("BOTTLENECK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate_config()?;

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
