use thiserror::Error;

/// Failures of a call into the session driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver connection closed")]
    ConnectionClosed,
    #[error("driver request timed out")]
    Timeout,
    #[error("driver rejected request: {0}")]
    Rejected(String),
    #[error("driver protocol error: {0}")]
    Protocol(String),
}

/// Failures of an outbound command, reported to the issuing observer only.
///
/// These never surface as broadcast faults: a rejected send is local to the
/// caller that asked for it.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid command: {0}")]
    Validation(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("media unavailable: {0}")]
    MediaUnavailable(String),
    #[error("unknown message: {0}")]
    UnknownMessage(String),
    #[error("staging failure: {0}")]
    Staging(String),
}

impl From<DriverError> for CommandError {
    fn from(e: DriverError) -> Self {
        CommandError::Transport(e.to_string())
    }
}
