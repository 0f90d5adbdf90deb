use beacon_delivery::ChannelError;
use beacon_scheduler::SchedulerError;
use thiserror::Error;

/// Failures while wiring the engine together at startup.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
