//! # bottleneck-rs
//!
//! 実行中のシステムを周期的にサンプリングし、閾値からボトルネックを検知して
//! 優先度順に緩和戦略を起動するエンジン。
//!
//! 計測値の取得は [`monitoring::MetricSource`] として外部に委ね、
//! 状態の変化は [`events::EventBus`] を通してホストへ通知する。

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod mitigation;
pub mod monitoring;

pub use crate::config::{ConfigLoader, EngineConfig};
pub use engine::{BottleneckEngine, EngineStatus};
pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus, EventSubscription, RedistributionSignal, SubscriptionId};
pub use mitigation::{action_fn, MitigationContext, MitigationStrategy, StrategyInfo};
pub use monitoring::{
    Bottleneck, BottleneckType, FixedMetricSource, HealthStatus, MetricReading, MetricSource,
    Severity, SimulatedMetricSource, SystemSnapshot, ThresholdTable, ThresholdUpdate,
};
