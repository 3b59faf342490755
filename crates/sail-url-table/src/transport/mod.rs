use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use sail_common::config::HttpConfig;
use url::Url;

use crate::error::UrlTableResult;
use crate::filter::RemoteHostFilter;

mod http;

pub use http::HttpTransport;

/// A byte stream that must be finalized to complete the remote request.
///
/// Bytes written may stay buffered until [`ByteSink::finalize`] is called.
/// After that, every write fails with [`crate::UrlTableError::StreamClosed`].
pub trait ByteSink: Write + Send {
    fn finalize(&mut self) -> UrlTableResult<()>;
}

/// Produces the body of a read request.
/// The body is streamed to the connection as it is written, so the writer runs
/// on a thread of its own. It is invoked again for each redirect that is followed.
pub type BodyWriter = Arc<dyn Fn(&mut dyn Write) -> io::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(value: HttpMethod) -> Self {
        match value {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    pub connect: Duration,
    pub send: Duration,
    pub receive: Duration,
}

impl From<&HttpConfig> for ConnectionTimeouts {
    fn from(value: &HttpConfig) -> Self {
        Self {
            connect: value.connect_timeout(),
            send: value.send_timeout(),
            receive: value.receive_timeout(),
        }
    }
}

pub struct ReadRequest {
    pub url: Url,
    pub method: HttpMethod,
    pub body: Option<BodyWriter>,
    pub timeouts: ConnectionTimeouts,
    pub max_redirects: usize,
    pub host_filter: Arc<RemoteHostFilter>,
}

impl fmt::Debug for ReadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadRequest")
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field("body", &self.body.is_some())
            .field("timeouts", &self.timeouts)
            .field("max_redirects", &self.max_redirects)
            .finish()
    }
}

#[derive(Debug)]
pub struct WriteRequest {
    pub url: Url,
    pub method: HttpMethod,
    pub timeouts: ConnectionTimeouts,
    pub buffer_size: usize,
    pub host_filter: Arc<RemoteHostFilter>,
}

/// The request/response mechanism that connects URL tables to remote resources.
///
/// Implementations may assume that the initial URL of a request has already
/// passed the host filter. URLs reached through redirects must be checked by
/// the implementation itself.
pub trait Transport: Send + Sync + fmt::Debug {
    fn open_read(&self, request: ReadRequest) -> UrlTableResult<Box<dyn Read + Send>>;

    fn open_write(&self, request: WriteRequest) -> UrlTableResult<Box<dyn ByteSink>>;
}

/// Opens a readable stream for the request.
/// The host filter is evaluated before the transport is touched.
pub fn open_read_stream(
    transport: &dyn Transport,
    request: ReadRequest,
) -> UrlTableResult<Box<dyn Read + Send>> {
    request.host_filter.check(&request.url)?;
    debug!("opening {} read stream for {}", request.method, request.url);
    transport.open_read(request)
}

/// Opens a writable stream for the request.
/// The host filter is evaluated before the transport is touched.
pub fn open_write_stream(
    transport: &dyn Transport,
    request: WriteRequest,
) -> UrlTableResult<Box<dyn ByteSink>> {
    request.host_filter.check(&request.url)?;
    debug!("opening {} write stream for {}", request.method, request.url);
    transport.open_write(request)
}
