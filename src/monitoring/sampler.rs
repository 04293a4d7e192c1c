//! メトリクスサンプラー
//!
//! メトリクスソースを読み出し、健全性を判定したスナップショットを公開する。

use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};
use crate::monitoring::metrics::SystemSnapshot;
use crate::monitoring::source::MetricSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// 計測値の読み出しタイムアウト
pub const DEFAULT_SAMPLE_TIMEOUT: Duration = Duration::from_millis(400);

/// メトリクスサンプラー
pub struct MetricsSampler {
    source: Arc<dyn MetricSource>,
    latest: Arc<RwLock<Option<Arc<SystemSnapshot>>>>,
    events: EventBus,
    timeout: Duration,
    /// 同時に1つの読み出しのみを許可する
    in_flight: Mutex<()>,
}

impl MetricsSampler {
    /// 新しいサンプラーを作成
    pub fn new(source: Arc<dyn MetricSource>, events: EventBus) -> Self {
        Self {
            source,
            latest: Arc::new(RwLock::new(None)),
            events,
            timeout: DEFAULT_SAMPLE_TIMEOUT,
            in_flight: Mutex::new(()),
        }
    }

    /// 読み出しタイムアウトを設定
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 1回サンプリングしてスナップショットを公開する
    ///
    /// ソースが失敗した場合は前回のスナップショットを保持したまま
    /// `SourceUnavailable` を返す。別の読み出しが進行中なら、
    /// 重ねて読み出さずに同じエラーを返す。
    pub async fn sample(&self, bottleneck_count: usize) -> Result<Arc<SystemSnapshot>> {
        let _guard = self.in_flight.try_lock().map_err(|_| {
            Error::SourceUnavailable("previous sample still in flight".to_string())
        })?;

        let reading = match tokio::time::timeout(self.timeout, self.source.read()).await {
            Ok(Ok(reading)) => reading,
            Ok(Err(e)) => {
                warn!(source = self.source.name(), error = %e, "Metric source read failed, tick skipped");
                return Err(Error::SourceUnavailable(e.to_string()));
            }
            Err(_) => {
                warn!(
                    source = self.source.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Metric source read timed out, tick skipped"
                );
                return Err(Error::SourceUnavailable(format!(
                    "read timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let snapshot = Arc::new(SystemSnapshot::from_reading(reading, bottleneck_count));
        {
            let mut latest = self.latest.write().await;
            *latest = Some(Arc::clone(&snapshot));
        }

        debug!(
            cpu = snapshot.cpu_usage,
            memory = snapshot.memory_usage,
            health = %snapshot.health,
            "Snapshot published"
        );
        self.events
            .publish(EngineEvent::MetricsUpdated(Arc::clone(&snapshot)));

        Ok(snapshot)
    }

    /// 最新のスナップショットを取得
    pub async fn latest(&self) -> Option<Arc<SystemSnapshot>> {
        self.latest.read().await.clone()
    }

    /// 公開済みスナップショットを破棄
    pub async fn clear(&self) {
        self.latest.write().await.take();
    }
}
