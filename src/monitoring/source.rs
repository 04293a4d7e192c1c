//! メトリクスソース
//!
//! 実際の計測値（CPU・メモリ・キュー深度など）の取得は外部に委ねる。
//! エンジンはこのトレイトを通してのみ計測値を読み出す。

use crate::monitoring::metrics::MetricReading;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, RwLock};

/// 計測値の供給元
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// 現在の計測値を取得
    async fn read(&self) -> anyhow::Result<MetricReading>;

    /// ソース名（ログ用）
    fn name(&self) -> &str {
        "metric-source"
    }
}

/// ホスト側から値を設定する固定ソース
///
/// クローンは同じ値を共有する。
#[derive(Debug, Clone, Default)]
pub struct FixedMetricSource {
    reading: Arc<RwLock<MetricReading>>,
    failing: Arc<RwLock<Option<String>>>,
}

impl FixedMetricSource {
    /// 新しい固定ソースを作成
    pub fn new(reading: MetricReading) -> Self {
        Self {
            reading: Arc::new(RwLock::new(reading)),
            failing: Arc::new(RwLock::new(None)),
        }
    }

    /// 返す計測値を差し替え
    pub fn set(&self, reading: MetricReading) {
        match self.reading.write() {
            Ok(mut guard) => *guard = reading,
            Err(poisoned) => *poisoned.into_inner() = reading,
        }
    }

    /// 以降の読み出しを失敗させる（`None` で復帰）
    pub fn set_failure(&self, message: Option<String>) {
        match self.failing.write() {
            Ok(mut guard) => *guard = message,
            Err(poisoned) => *poisoned.into_inner() = message,
        }
    }
}

#[async_trait]
impl MetricSource for FixedMetricSource {
    async fn read(&self) -> anyhow::Result<MetricReading> {
        let failure = self
            .failing
            .read()
            .map_err(|_| anyhow::anyhow!("fixed source lock poisoned"))?
            .clone();
        if let Some(message) = failure {
            anyhow::bail!(message);
        }

        let reading = *self
            .reading
            .read()
            .map_err(|_| anyhow::anyhow!("fixed source lock poisoned"))?;
        Ok(reading)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// 計装が接続されていない環境向けの疑似ソース
///
/// 各値は前回値からの有界ランダムウォークで変化する。
#[derive(Debug)]
pub struct SimulatedMetricSource {
    state: Mutex<SimulationState>,
}

#[derive(Debug)]
struct SimulationState {
    rng: StdRng,
    current: MetricReading,
    /// 1ステップあたりの最大変化量（%）
    volatility: f64,
}

impl SimulatedMetricSource {
    /// エントロピーから初期化
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// 固定シードで初期化（再現可能な系列）
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(SimulationState {
                rng,
                current: MetricReading::new(45.0, 55.0, 60.0, 85.0, 80.0),
                volatility: 8.0,
            }),
        }
    }

    /// 変化量を設定
    pub fn with_volatility(self, volatility: f64) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.volatility = volatility.abs();
        }
        self
    }

    fn step(&self) -> anyhow::Result<MetricReading> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("simulation state lock poisoned"))?;
        let SimulationState {
            rng,
            current,
            volatility,
        } = &mut *state;

        let mut drift = |value: f64| -> f64 {
            let delta = if *volatility > 0.0 {
                rng.gen_range(-*volatility..=*volatility)
            } else {
                0.0
            };
            (value + delta).clamp(0.0, 100.0)
        };

        let next = MetricReading::new(
            drift(current.cpu_usage),
            drift(current.memory_usage),
            drift(current.worker_utilization),
            drift(current.worker_efficiency),
            drift(current.pipeline_throughput),
        );
        *current = next;

        Ok(next)
    }
}

impl Default for SimulatedMetricSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for SimulatedMetricSource {
    async fn read(&self) -> anyhow::Result<MetricReading> {
        self.step()
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
