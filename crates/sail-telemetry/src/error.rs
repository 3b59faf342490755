use log::SetLoggerError;
use thiserror::Error;

pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("failed to set logger: {0}")]
    SetLoggerError(#[from] SetLoggerError),
}

impl TelemetryError {
    pub fn internal(message: impl Into<String>) -> Self {
        TelemetryError::InternalError(message.into())
    }
}
