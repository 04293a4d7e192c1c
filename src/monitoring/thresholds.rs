//! ボトルネック検出閾値

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::{Validate, ValidationError};

/// 検出ルールが使用する閾値テーブル
///
/// 各シグナルは発火閾値と Critical 判定閾値の組を持つ。
/// `worker_efficiency` と `pipeline_throughput` は値が下回ったときに発火する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_threshold_order"))]
#[serde(default)]
pub struct ThresholdTable {
    #[validate(range(min = 0.0, max = 100.0))]
    pub cpu_usage: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub cpu_usage_critical: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub memory_usage: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub memory_usage_critical: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub worker_utilization: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub worker_utilization_critical: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub worker_efficiency: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub worker_efficiency_critical: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub pipeline_throughput: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub pipeline_throughput_critical: f64,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            cpu_usage: 85.0,
            cpu_usage_critical: 95.0,
            memory_usage: 80.0,
            memory_usage_critical: 90.0,
            worker_utilization: 90.0,
            worker_utilization_critical: 95.0,
            worker_efficiency: 70.0,
            worker_efficiency_critical: 50.0,
            pipeline_throughput: 50.0,
            pipeline_throughput_critical: 30.0,
        }
    }
}

impl ThresholdTable {
    /// 部分更新を適用した新しいテーブルを返す
    pub fn merged(&self, update: &ThresholdUpdate) -> Self {
        Self {
            cpu_usage: update.cpu_usage.unwrap_or(self.cpu_usage),
            cpu_usage_critical: update.cpu_usage_critical.unwrap_or(self.cpu_usage_critical),
            memory_usage: update.memory_usage.unwrap_or(self.memory_usage),
            memory_usage_critical: update
                .memory_usage_critical
                .unwrap_or(self.memory_usage_critical),
            worker_utilization: update.worker_utilization.unwrap_or(self.worker_utilization),
            worker_utilization_critical: update
                .worker_utilization_critical
                .unwrap_or(self.worker_utilization_critical),
            worker_efficiency: update.worker_efficiency.unwrap_or(self.worker_efficiency),
            worker_efficiency_critical: update
                .worker_efficiency_critical
                .unwrap_or(self.worker_efficiency_critical),
            pipeline_throughput: update.pipeline_throughput.unwrap_or(self.pipeline_throughput),
            pipeline_throughput_critical: update
                .pipeline_throughput_critical
                .unwrap_or(self.pipeline_throughput_critical),
        }
    }
}

fn validate_threshold_order(table: &ThresholdTable) -> Result<(), ValidationError> {
    let ordered = table.cpu_usage <= table.cpu_usage_critical
        && table.memory_usage <= table.memory_usage_critical
        && table.worker_utilization <= table.worker_utilization_critical
        && table.worker_efficiency >= table.worker_efficiency_critical
        && table.pipeline_throughput >= table.pipeline_throughput_critical;

    if ordered {
        Ok(())
    } else {
        Err(ValidationError::new("threshold_order").with_message(Cow::Borrowed(
            "critical thresholds must lie beyond their trigger thresholds",
        )))
    }
}

/// 閾値テーブルの部分更新
///
/// 指定されたフィールドのみが上書きされる。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdUpdate {
    pub cpu_usage: Option<f64>,
    pub cpu_usage_critical: Option<f64>,
    pub memory_usage: Option<f64>,
    pub memory_usage_critical: Option<f64>,
    pub worker_utilization: Option<f64>,
    pub worker_utilization_critical: Option<f64>,
    pub worker_efficiency: Option<f64>,
    pub worker_efficiency_critical: Option<f64>,
    pub pipeline_throughput: Option<f64>,
    pub pipeline_throughput_critical: Option<f64>,
}
