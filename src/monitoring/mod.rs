//! リアルタイム監視システム
//!
//! このモジュールは、メトリクスのサンプリング、健全性の判定、
//! ボトルネックの検知とライフサイクル管理を提供します。

pub mod bottleneck;
pub mod detector;
pub mod metrics;
pub mod sampler;
pub mod source;
pub mod thresholds;

pub use bottleneck::{Bottleneck, BottleneckKey, BottleneckType, Severity};
pub use detector::{BottleneckDetector, Signal};
pub use metrics::{HealthStatus, MetricReading, SystemSnapshot};
pub use sampler::MetricsSampler;
pub use source::{FixedMetricSource, MetricSource, SimulatedMetricSource};
pub use thresholds::{ThresholdTable, ThresholdUpdate};
