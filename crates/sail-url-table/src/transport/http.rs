use std::io::{self, BufWriter, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::{Body, Client, Response};
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use sail_common::config::HttpConfig;
use url::Url;

use crate::error::{UrlTableError, UrlTableResult};
use crate::filter::RemoteHostFilter;
use crate::transport::{BodyWriter, ByteSink, HttpMethod, ReadRequest, Transport, WriteRequest};

/// The number of body chunks that may wait for the connection before writes block.
const WRITE_CHANNEL_CAPACITY: usize = 4;
/// The size of the chunks a read request body is sent in.
const REQUEST_BODY_CHUNK_SIZE: usize = 64 * 1024;
/// The maximum number of bytes of an error response included in error messages.
const ERROR_BODY_EXCERPT_LENGTH: usize = 1024;

/// HTTP(S) transport built on the blocking `reqwest` client.
///
/// One client, and therefore one connection pool, serves every request of the transport.
/// The connect timeout is a property of the client; send and receive timeouts
/// are taken from each request.
///
/// Redirects are followed by the transport rather than the client,
/// so that every hop is checked against the host filter.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn try_new(config: &HttpConfig) -> UrlTableResult<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self { client })
    }

    fn send(&self, request: &ReadRequest, url: &Url) -> UrlTableResult<Response> {
        let mut builder = self
            .client
            .request(request.method.into(), url.clone())
            .timeout(request.timeouts.receive);
        if let Some(writer) = &request.body {
            builder = builder.body(Body::new(stream_request_body(writer.clone())));
        }
        Ok(builder.send()?)
    }
}

impl Transport for HttpTransport {
    fn open_read(&self, request: ReadRequest) -> UrlTableResult<Box<dyn Read + Send>> {
        let mut url = request.url.clone();
        let mut redirects = 0;
        loop {
            let response = self.send(&request, &url)?;
            let status = response.status();
            if status.is_redirection() {
                if let Some(location) = response.headers().get(LOCATION) {
                    if redirects >= request.max_redirects {
                        return Err(UrlTableError::TooManyRedirects {
                            url: request.url.to_string(),
                            limit: request.max_redirects,
                        });
                    }
                    let location = location.to_str().map_err(|e| {
                        UrlTableError::transport(format!("invalid redirect location: {e}"))
                    })?;
                    let next = url.join(location)?;
                    request.host_filter.check(&next)?;
                    debug!("following redirect ({status}) from {url} to {next}");
                    url = next;
                    redirects += 1;
                    continue;
                }
            }
            if !status.is_success() {
                return Err(status_error(&url, response));
            }
            debug!("connected to {url} ({status})");
            let expected_length = response.content_length();
            return Ok(Box::new(HttpReadStream {
                response,
                expected_length,
                received: 0,
            }));
        }
    }

    fn open_write(&self, request: WriteRequest) -> UrlTableResult<Box<dyn ByteSink>> {
        Ok(Box::new(HttpWriteStream {
            client: self.client.clone(),
            url: request.url,
            method: request.method,
            timeout: request.timeouts.send,
            buffer: Vec::with_capacity(request.buffer_size),
            buffer_size: request.buffer_size,
            upload: None,
            finalized: false,
            host_filter: request.host_filter,
        }))
    }
}

fn status_error(url: &Url, response: Response) -> UrlTableError {
    let status = response.status();
    let mut excerpt = response.text().unwrap_or_default();
    if excerpt.len() > ERROR_BODY_EXCERPT_LENGTH {
        let mut end = ERROR_BODY_EXCERPT_LENGTH;
        while !excerpt.is_char_boundary(end) {
            end -= 1;
        }
        excerpt.truncate(end);
    }
    UrlTableError::transport(format!(
        "received HTTP status {status} from {url}: {}",
        excerpt.trim()
    ))
}

struct HttpReadStream {
    response: Response,
    expected_length: Option<u64>,
    received: u64,
}

impl Read for HttpReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.response.read(buf)?;
        self.received += n as u64;
        if n == 0 && !buf.is_empty() {
            if let Some(expected) = self.expected_length {
                if self.received < expected {
                    return Err(UrlTableError::transport(format!(
                        "response body from {} ended after {} of {expected} bytes",
                        self.response.url(),
                        self.received
                    ))
                    .into());
                }
            }
        }
        Ok(n)
    }
}

/// Feeds body chunks received from a producer to the HTTP client.
struct ChannelReader {
    receiver: Receiver<io::Result<Vec<u8>>>,
    current: Cursor<Vec<u8>>,
    aborted: Arc<AtomicBool>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.current.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            match self.receiver.recv() {
                Ok(Ok(chunk)) => self.current = Cursor::new(chunk),
                Ok(Err(e)) => return Err(e),
                // The sender is dropped when the producer is done or gone.
                Err(_) if self.aborted.load(Ordering::Acquire) => {
                    return Err(io::Error::other("upload aborted"))
                }
                Err(_) => return Ok(0),
            }
        }
    }
}

/// Runs the body writer on its own thread and streams what it writes.
/// A writer error fails the request with that error.
fn stream_request_body(writer: BodyWriter) -> ChannelReader {
    let (sender, receiver) = sync_channel(WRITE_CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        let mut output = BufWriter::with_capacity(
            REQUEST_BODY_CHUNK_SIZE,
            ChannelWriter {
                sender: sender.clone(),
            },
        );
        let result = (writer.as_ref())(&mut output).and_then(|_| output.flush());
        if let Err(e) = result {
            // Fails only when the request is already gone.
            let _ = sender.send(Err(e));
        }
    });
    ChannelReader {
        receiver,
        current: Cursor::new(vec![]),
        aborted: Arc::new(AtomicBool::new(false)),
    }
}

struct ChannelWriter {
    sender: SyncSender<io::Result<Vec<u8>>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.sender
            .send(Ok(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "request body is closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Upload {
    sender: SyncSender<io::Result<Vec<u8>>>,
    handle: JoinHandle<UrlTableResult<()>>,
    aborted: Arc<AtomicBool>,
}

impl Upload {
    fn start(client: Client, method: HttpMethod, url: Url, timeout: Duration) -> Self {
        let (sender, receiver) = sync_channel(WRITE_CHANNEL_CAPACITY);
        let aborted = Arc::new(AtomicBool::new(false));
        let reader = ChannelReader {
            receiver,
            current: Cursor::new(vec![]),
            aborted: aborted.clone(),
        };
        let handle = std::thread::spawn(move || -> UrlTableResult<()> {
            let response = client
                .request(method.into(), url.clone())
                .timeout(timeout)
                .body(Body::new(reader))
                .send()?;
            if response.status().is_success() {
                debug!("upload to {url} completed ({})", response.status());
                Ok(())
            } else {
                Err(status_error(&url, response))
            }
        });
        Self {
            sender,
            handle,
            aborted,
        }
    }

    fn join(self) -> UrlTableResult<()> {
        let Self { sender, handle, .. } = self;
        drop(sender);
        handle
            .join()
            .map_err(|_| UrlTableError::internal("HTTP upload thread panicked"))?
    }
}

struct HttpWriteStream {
    client: Client,
    url: Url,
    method: HttpMethod,
    timeout: Duration,
    buffer: Vec<u8>,
    buffer_size: usize,
    upload: Option<Upload>,
    finalized: bool,
    host_filter: Arc<RemoteHostFilter>,
}

impl HttpWriteStream {
    fn upload(&mut self) -> UrlTableResult<&mut Upload> {
        if self.upload.is_none() {
            self.host_filter.check(&self.url)?;
            debug!("starting {} upload to {}", self.method, self.url);
            self.upload = Some(Upload::start(
                self.client.clone(),
                self.method,
                self.url.clone(),
                self.timeout,
            ));
        }
        self.upload
            .as_mut()
            .ok_or_else(|| UrlTableError::internal("upload not started"))
    }

    fn send_buffer(&mut self) -> UrlTableResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.buffer_size));
        if self.upload()?.sender.send(Ok(chunk)).is_err() {
            // The request ended before the body was complete.
            return match self.upload.take() {
                Some(upload) => upload.join().and(Err(UrlTableError::transport(format!(
                    "connection to {} closed before the request body was sent",
                    self.url
                )))),
                None => Err(UrlTableError::internal("upload not started")),
            };
        }
        Ok(())
    }
}

impl Write for HttpWriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finalized {
            return Err(UrlTableError::StreamClosed.into());
        }
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= self.buffer_size {
            self.send_buffer()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.finalized {
            return Err(UrlTableError::StreamClosed.into());
        }
        Ok(self.send_buffer()?)
    }
}

impl ByteSink for HttpWriteStream {
    fn finalize(&mut self) -> UrlTableResult<()> {
        if self.finalized {
            return Err(UrlTableError::StreamClosed);
        }
        self.finalized = true;
        self.send_buffer()?;
        self.upload()?;
        match self.upload.take() {
            Some(upload) => upload.join(),
            None => Err(UrlTableError::internal("upload not started")),
        }
    }
}

impl Drop for HttpWriteStream {
    fn drop(&mut self) {
        if let Some(upload) = self.upload.take() {
            warn!("aborting unfinished upload to {}", self.url);
            // The client fails the request instead of completing the body.
            upload.aborted.store(true, Ordering::Release);
            drop(upload.sender);
        }
    }
}
