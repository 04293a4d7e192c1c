//! メトリクス型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// システム全体の健全性
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// 致命的
    Critical,
    /// 警告
    Warning,
    /// 良好
    Good,
    /// 最良
    Excellent,
}

impl HealthStatus {
    /// 状態名を取得
    pub fn as_str(&self) -> &str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// 計測値から健全性を判定
    ///
    /// 上から順に評価し、最初に一致した段階を採用する。
    /// ソースが範囲外の値を返しても必ずいずれかに分類される。
    pub fn classify(reading: &MetricReading) -> Self {
        let MetricReading {
            cpu_usage: cpu,
            memory_usage: memory,
            worker_utilization: utilization,
            worker_efficiency: efficiency,
            ..
        } = *reading;

        if cpu > 95.0 || memory > 95.0 || efficiency < 50.0 {
            Self::Critical
        } else if cpu > 80.0 || memory > 80.0 || utilization > 85.0 || efficiency < 70.0 {
            Self::Warning
        } else if cpu > 60.0 || memory > 60.0 || utilization > 70.0 {
            Self::Good
        } else {
            Self::Excellent
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// メトリクスソースから取得した生の計測値（%）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    /// CPU使用率
    pub cpu_usage: f64,
    /// メモリ使用率
    pub memory_usage: f64,
    /// ワーカー稼働率
    pub worker_utilization: f64,
    /// ワーカー効率
    pub worker_efficiency: f64,
    /// パイプラインスループット
    pub pipeline_throughput: f64,
}

impl MetricReading {
    /// 新しい計測値を作成
    pub fn new(
        cpu_usage: f64,
        memory_usage: f64,
        worker_utilization: f64,
        worker_efficiency: f64,
        pipeline_throughput: f64,
    ) -> Self {
        Self {
            cpu_usage,
            memory_usage,
            worker_utilization,
            worker_efficiency,
            pipeline_throughput,
        }
    }

    /// 全ての値を 0-100 に丸める（NaN は 0 として扱う）
    pub fn clamped(&self) -> Self {
        fn clamp(value: f64) -> f64 {
            if value.is_nan() {
                0.0
            } else {
                value.clamp(0.0, 100.0)
            }
        }

        Self {
            cpu_usage: clamp(self.cpu_usage),
            memory_usage: clamp(self.memory_usage),
            worker_utilization: clamp(self.worker_utilization),
            worker_efficiency: clamp(self.worker_efficiency),
            pipeline_throughput: clamp(self.pipeline_throughput),
        }
    }
}

impl Default for MetricReading {
    /// 負荷のない状態
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 100.0, 100.0)
    }
}

/// システムメトリクスのスナップショット
///
/// サンプリング毎に丸ごと置き換えられ、公開後は変更されない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// CPU使用率（%）
    pub cpu_usage: f64,
    /// メモリ使用率（%）
    pub memory_usage: f64,
    /// ワーカー稼働率（%）
    pub worker_utilization: f64,
    /// ワーカー効率（%）
    pub worker_efficiency: f64,
    /// パイプラインスループット（%）
    pub pipeline_throughput: f64,
    /// サンプリング時点の未解決ボトルネック数
    pub bottleneck_count: usize,
    /// 健全性
    pub health: HealthStatus,
    /// タイムスタンプ
    pub timestamp: DateTime<Utc>,
}

impl SystemSnapshot {
    /// 計測値からスナップショットを作成
    pub fn from_reading(reading: MetricReading, bottleneck_count: usize) -> Self {
        let reading = reading.clamped();

        Self {
            cpu_usage: reading.cpu_usage,
            memory_usage: reading.memory_usage,
            worker_utilization: reading.worker_utilization,
            worker_efficiency: reading.worker_efficiency,
            pipeline_throughput: reading.pipeline_throughput,
            bottleneck_count,
            health: HealthStatus::classify(&reading),
            timestamp: Utc::now(),
        }
    }

    /// スナップショットの計測値部分
    pub fn reading(&self) -> MetricReading {
        MetricReading::new(
            self.cpu_usage,
            self.memory_usage,
            self.worker_utilization,
            self.worker_efficiency,
            self.pipeline_throughput,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_classification_order() {
        assert_eq!(
            HealthStatus::classify(&MetricReading::new(96.0, 50.0, 40.0, 90.0, 90.0)),
            HealthStatus::Critical
        );
        assert_eq!(
            HealthStatus::classify(&MetricReading::new(10.0, 10.0, 10.0, 45.0, 90.0)),
            HealthStatus::Critical
        );
        assert_eq!(
            HealthStatus::classify(&MetricReading::new(10.0, 10.0, 86.0, 90.0, 90.0)),
            HealthStatus::Warning
        );
        assert_eq!(
            HealthStatus::classify(&MetricReading::new(10.0, 65.0, 10.0, 90.0, 90.0)),
            HealthStatus::Good
        );
        assert_eq!(
            HealthStatus::classify(&MetricReading::new(10.0, 10.0, 10.0, 90.0, 10.0)),
            HealthStatus::Excellent
        );
    }

    #[test]
    fn test_health_monotonic_in_cpu() {
        for memory in [0.0, 40.0, 70.0, 90.0] {
            for utilization in [0.0, 75.0, 88.0] {
                for efficiency in [40.0, 60.0, 95.0] {
                    let mut cpu = 0.0;
                    while cpu <= 100.0 {
                        let health = HealthStatus::classify(&MetricReading::new(
                            cpu,
                            memory,
                            utilization,
                            efficiency,
                            80.0,
                        ));
                        if cpu > 95.0 {
                            assert_eq!(health, HealthStatus::Critical);
                        }
                        if cpu > 80.0 {
                            assert!(health <= HealthStatus::Warning, "cpu={cpu} -> {health}");
                        }
                        cpu += 0.5;
                    }
                }
            }
        }
    }

    #[test]
    fn test_reading_clamped() {
        let reading = MetricReading::new(120.0, -5.0, f64::NAN, 50.0, 100.5).clamped();

        assert_eq!(reading.cpu_usage, 100.0);
        assert_eq!(reading.memory_usage, 0.0);
        assert_eq!(reading.worker_utilization, 0.0);
        assert_eq!(reading.worker_efficiency, 50.0);
        assert_eq!(reading.pipeline_throughput, 100.0);
    }

    #[test]
    fn test_snapshot_from_reading() {
        let snapshot = SystemSnapshot::from_reading(MetricReading::new(96.0, 50.0, 40.0, 90.0, 90.0), 2);

        assert_eq!(snapshot.health, HealthStatus::Critical);
        assert_eq!(snapshot.bottleneck_count, 2);
        assert_eq!(snapshot.reading().cpu_usage, 96.0);
    }
}
