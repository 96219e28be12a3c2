//! # Self-Healing
//!
//! Failure detection, pluggable recovery strategies, circuit breaking,
//! gradual degradation, bottleneck analysis, and predictive healing.

pub mod bottleneck;
pub mod circuit_breaker;
pub mod degradation;
pub mod predictive;
pub mod self_healer;
pub mod strategies;

pub use bottleneck::{BottleneckDetector, PerformanceReport, Trend};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use degradation::{DegradationLevel, GradualDegradationStrategy};
pub use predictive::{PredictedFailure, PredictiveHealing};
pub use self_healer::{
    Failure, FailureSeverity, HealingResult, HealingStats, HealingStrategy, SelfHealer,
};
pub use strategies::{
    AgentRestartStrategy, CircuitBreakerStrategy, QuorumRecoveryStrategy,
    ResourceRebalanceStrategy, TaskRetryStrategy,
};
