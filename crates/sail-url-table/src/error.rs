use std::io;

use datafusion::arrow::error::ArrowError;
use datafusion_common::DataFusionError;
use sail_common::error::CommonError;
use thiserror::Error;

pub type UrlTableResult<T> = Result<T, UrlTableError>;

#[derive(Debug, Error)]
pub enum UrlTableError {
    #[error("URL \"{0}\" is not allowed by the remote host filter")]
    ForbiddenHost(String),
    #[error("too many redirects while requesting {url} (limit: {limit})")]
    TooManyRedirects { url: String, limit: usize },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("stream is closed")]
    StreamClosed,
    #[error("URL table requires 2 or 3 arguments: URL, format name and optional compression method, but {0} given")]
    ArgumentCount(usize),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("arrow error: {0}")]
    Arrow(ArrowError),
    #[error(transparent)]
    DataFusion(#[from] DataFusionError),
    #[error(transparent)]
    Common(#[from] CommonError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl UrlTableError {
    pub fn transport(message: impl Into<String>) -> Self {
        UrlTableError::Transport(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        UrlTableError::InvalidArgument(message.into())
    }

    pub fn codec(message: impl Into<String>) -> Self {
        UrlTableError::Codec(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        UrlTableError::Internal(message.into())
    }
}

/// Errors raised below an [`io::Read`] or [`io::Write`] boundary travel inside an
/// [`io::Error`] and are recovered unchanged on the other side.
impl From<UrlTableError> for io::Error {
    fn from(value: UrlTableError) -> Self {
        let kind = match &value {
            UrlTableError::StreamClosed => io::ErrorKind::BrokenPipe,
            UrlTableError::ForbiddenHost(_) => io::ErrorKind::PermissionDenied,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, value)
    }
}

impl From<io::Error> for UrlTableError {
    fn from(value: io::Error) -> Self {
        if !value
            .get_ref()
            .is_some_and(|inner| inner.is::<UrlTableError>())
        {
            return UrlTableError::Transport(value.to_string());
        }
        match value.into_inner().map(|inner| inner.downcast::<UrlTableError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(inner)) => UrlTableError::Transport(inner.to_string()),
            None => UrlTableError::internal("I/O error without inner error"),
        }
    }
}

impl From<ArrowError> for UrlTableError {
    fn from(value: ArrowError) -> Self {
        match value {
            ArrowError::IoError(_, e) => e.into(),
            ArrowError::ExternalError(e) => match e.downcast::<UrlTableError>() {
                Ok(e) => *e,
                Err(e) => UrlTableError::Arrow(ArrowError::ExternalError(e)),
            },
            other => UrlTableError::Arrow(other),
        }
    }
}

impl From<reqwest::Error> for UrlTableError {
    fn from(value: reqwest::Error) -> Self {
        UrlTableError::Transport(value.to_string())
    }
}

impl From<url::ParseError> for UrlTableError {
    fn from(value: url::ParseError) -> Self {
        UrlTableError::InvalidArgument(format!("invalid URL: {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_survives_io_boundary() {
        let error: io::Error = UrlTableError::TooManyRedirects {
            url: "http://example.com/".to_string(),
            limit: 2,
        }
        .into();
        let error = ArrowError::from(error);
        assert!(matches!(
            UrlTableError::from(error),
            UrlTableError::TooManyRedirects { limit: 2, .. }
        ));
    }

    #[test]
    fn test_plain_io_error_is_transport_error() {
        let error = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(matches!(
            UrlTableError::from(error),
            UrlTableError::Transport(message) if message.contains("reset by peer")
        ));
    }

    #[test]
    fn test_stream_closed_maps_to_broken_pipe() {
        let error: io::Error = UrlTableError::StreamClosed.into();
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
    }
}
