//! Task-switching test core.
//!
//! - [`stimulus`]: stimulus dimensions, response mapping, congruency
//! - [`generator`]: training and test trial sequences
//! - [`metrics`]: aggregation of answered trials
//! - [`service`]: session lifecycle and response scoring

pub mod generator;
mod locks;
pub mod metrics;
pub mod service;
pub mod stimulus;

pub use generator::{BlockKind, SequenceGenerator, TrialSpec};
pub use locks::SessionLocks;
pub use metrics::PerformanceMetrics;
pub use service::{PhaseStart, TaskSwitchingService, MAX_RESPONSE_TIME_MS};
pub use stimulus::{congruency, correct_response, Color, Congruency, Response, Shape, TaskType};
