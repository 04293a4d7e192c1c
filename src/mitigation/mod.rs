//! Mitigation Module
//!
//! 緩和戦略の登録・選択・実行

pub mod builtin;
pub mod registry;
pub mod scheduler;
pub mod strategy;

pub use builtin::builtin_strategies;
pub use registry::StrategyRegistry;
pub use scheduler::{MitigationLaunch, MitigationScheduler};
pub use strategy::{
    action_fn, FnAction, MitigationAction, MitigationContext, MitigationStrategy, StrategyInfo,
    TriggerFn,
};
