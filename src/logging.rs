//! ログ初期化

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// ログ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// ログレベル (trace, debug, info, warn, error)。`RUST_LOG` が優先される
    pub level: String,
    /// 出力形式
    pub format: LogFormat,
    /// スレッドIDを出力
    pub thread_ids: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Human,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: if cfg!(debug_assertions) {
                LogFormat::Human
            } else {
                LogFormat::Json
            },
            thread_ids: false,
        }
    }
}

impl LogConfig {
    /// ログレベルを設定
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// 出力形式を設定
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// ログシステムを初期化
///
/// グローバルサブスクライバーが設定済みの場合はエラーを返す。
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(config.filter());

    match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_thread_ids(config.thread_ids);

            registry.with(fmt_layer).try_init()?;
        }
        LogFormat::Human => {
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(config.thread_ids);

            registry.with(fmt_layer).try_init()?;
        }
    }

    info!(level = %config.level, format = ?config.format, "📝 Logging initialized");
    Ok(())
}
