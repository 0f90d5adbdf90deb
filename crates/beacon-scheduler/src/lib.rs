//! `beacon-scheduler`: recurrence, liveness and timers for scheduled queries.
//!
//! # Overview
//!
//! A schedule's repetition unit and start time are translated into a narrow
//! five-field [`recurrence::Recurrence`] (`minute hour day-of-month month
//! day-of-week`, each field either a literal or `*`). A [`facade::JobScheduler`]
//! turns a recurrence into a recurring callback, and the
//! [`registry::RunningJobRegistry`] records which queries currently own a live
//! job, so that duplicates are refused and jobs can notice they were cancelled.
//!
//! # Pinned fields per unit
//!
//! | Unit      | Expression for a 13:05 start on Wed 4 Mar |
//! |-----------|--------------------------------------------|
//! | `MINUTES` | `* * * * *`                                |
//! | `HOURS`   | `5 * * * *`                                |
//! | `DAYS`    | `5 13 * * *`                               |
//! | `WEEKS`   | `5 13 * * 3`                               |
//! | `MONTHS`  | `5 13 4 * *`                               |
//! | `YEARS`   | `5 13 4 3 *`                               |

pub mod db;
pub mod error;
pub mod facade;
pub mod recurrence;
pub mod registry;
pub mod types;

pub use error::{Result, SchedulerError};
pub use facade::{Continuation, JobHandle, JobScheduler, ScheduledTask, TokioScheduler};
pub use recurrence::{recurrence_for, CronField, Recurrence};
pub use registry::{InMemoryRegistry, RunningJobRegistry, SqliteRegistry};
pub use types::LivenessMarker;
