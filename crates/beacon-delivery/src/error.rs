use beacon_core::Failure;
use thiserror::Error;

/// Errors raised by delivery channel backends.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A sender or recipient address was rejected.
    #[error("invalid address \"{address}\": {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The message could not be assembled.
    #[error("message build failed: {0}")]
    Build(String),

    /// The transport refused or failed to send the message.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The channel-specific configuration is invalid or missing.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl From<ChannelError> for Failure {
    fn from(e: ChannelError) -> Self {
        Failure::new(e.to_string())
    }
}
