//! `beacon-core`: shared vocabulary for the scheduled query delivery engine.
//!
//! Holds the message-carrying [`Fallible`] result type every other crate
//! reports through, the schedule/query data model, the retry helper and the
//! figment-backed configuration.

pub mod config;
pub mod error;
pub mod fallible;
pub mod retry;
pub mod types;

pub use error::{CoreError, Result};
pub use fallible::{all_ok, for_each, from_option, Failure, Fallible, FallibleExt};
pub use retry::{retry, RetryPolicy};
