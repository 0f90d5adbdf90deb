//! `beacon-engine`: reacts to workspace changes by starting and stopping
//! scheduled queries, and drives each job from tick to delivery.

pub mod catalog;
pub mod error;
pub mod job;
pub mod plugin;

pub use catalog::{QueryError, QueryRequest, QueryRunner, QueryService};
pub use error::{EngineError, Result};
pub use job::{JobContext, LocalTimers, ScheduledQueryJob, TickOutcome};
pub use plugin::{CatalogRecord, QuerySchedulingPlugin, RecordUpdate};
