//! Shared test utilities for URL table integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use datafusion::arrow::datatypes::SchemaRef;
use sail_common::config::AppConfig;
use sail_url_table::format::{
    CsvFormat, DecodedBatch, DecoderOptions, FormatCodec, FormatRegistry, RowDecoder, RowEncoder,
};
use sail_url_table::transport::{ByteSink, HttpMethod, ReadRequest, Transport, WriteRequest};
use sail_url_table::{UrlTableContext, UrlTableError, UrlTableResult};

pub fn config() -> AppConfig {
    AppConfig::load().unwrap()
}

#[derive(Debug, Clone)]
pub struct RecordedRead {
    pub url: String,
    pub method: HttpMethod,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub response: Vec<u8>,
    pub reads: Vec<RecordedRead>,
    pub write_opens: usize,
    pub written: Vec<u8>,
    pub finalize_count: usize,
}

/// A transport that serves a fixed response and records everything it is asked to do.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    pub state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn with_response(response: impl Into<Vec<u8>>) -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().response = response.into();
        transport
    }

    pub fn connections(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.reads.len() + state.write_opens
    }

    pub fn reads(&self) -> Vec<RecordedRead> {
        self.state.lock().unwrap().reads.clone()
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn finalize_count(&self) -> usize {
        self.state.lock().unwrap().finalize_count
    }
}

impl Transport for MockTransport {
    fn open_read(&self, request: ReadRequest) -> UrlTableResult<Box<dyn Read + Send>> {
        let body = match &request.body {
            Some(writer) => {
                let mut body = vec![];
                (writer.as_ref())(&mut body)?;
                Some(body)
            }
            None => None,
        };
        let mut state = self.state.lock().unwrap();
        state.reads.push(RecordedRead {
            url: request.url.to_string(),
            method: request.method,
            body,
        });
        Ok(Box::new(Cursor::new(state.response.clone())))
    }

    fn open_write(&self, _request: WriteRequest) -> UrlTableResult<Box<dyn ByteSink>> {
        self.state.lock().unwrap().write_opens += 1;
        Ok(Box::new(MockSink {
            state: self.state.clone(),
            finalized: false,
        }))
    }
}

struct MockSink {
    state: Arc<Mutex<MockState>>,
    finalized: bool,
}

impl Write for MockSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finalized {
            return Err(UrlTableError::StreamClosed.into());
        }
        self.state.lock().unwrap().written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteSink for MockSink {
    fn finalize(&mut self) -> UrlTableResult<()> {
        if self.finalized {
            return Err(UrlTableError::StreamClosed);
        }
        self.finalized = true;
        self.state.lock().unwrap().finalize_count += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub begin: AtomicUsize,
    pub end: AtomicUsize,
}

/// CSV with a name of its own that counts decoder prefix and suffix calls.
#[derive(Debug, Clone)]
pub struct CountingFormat {
    inner: CsvFormat,
    pub counts: Arc<CallCounts>,
}

impl CountingFormat {
    pub const NAME: &'static str = "CountingCSV";

    pub fn new() -> Self {
        Self {
            inner: CsvFormat::csv(),
            counts: Arc::new(CallCounts::default()),
        }
    }
}

impl Default for CountingFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatCodec for CountingFormat {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn create_decoder(
        &self,
        input: Box<dyn Read + Send>,
        schema: SchemaRef,
        options: &DecoderOptions,
    ) -> UrlTableResult<Box<dyn RowDecoder>> {
        Ok(Box::new(CountingDecoder {
            inner: self.inner.create_decoder(input, schema, options)?,
            counts: self.counts.clone(),
        }))
    }

    fn create_encoder(
        &self,
        output: Box<dyn ByteSink>,
        schema: SchemaRef,
    ) -> UrlTableResult<Box<dyn RowEncoder>> {
        self.inner.create_encoder(output, schema)
    }
}

struct CountingDecoder {
    inner: Box<dyn RowDecoder>,
    counts: Arc<CallCounts>,
}

impl RowDecoder for CountingDecoder {
    fn begin(&mut self) -> UrlTableResult<()> {
        self.counts.begin.fetch_add(1, Ordering::SeqCst);
        self.inner.begin()
    }

    fn next_batch(&mut self) -> UrlTableResult<Option<DecodedBatch>> {
        self.inner.next_batch()
    }

    fn end(&mut self) -> UrlTableResult<()> {
        self.counts.end.fetch_add(1, Ordering::SeqCst);
        self.inner.end()
    }
}

pub fn mock_context(transport: &MockTransport, config: AppConfig) -> Arc<UrlTableContext> {
    Arc::new(
        UrlTableContext::try_new(config)
            .unwrap()
            .with_transport(Arc::new(transport.clone())),
    )
}

pub fn counting_context(
    transport: &MockTransport,
    format: &CountingFormat,
) -> Arc<UrlTableContext> {
    let mut formats = FormatRegistry::new();
    formats.register_format(Arc::new(format.clone()));
    Arc::new(
        UrlTableContext::try_new(config())
            .unwrap()
            .with_transport(Arc::new(transport.clone()))
            .with_formats(formats),
    )
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Overrides the announced body length.
    pub content_length: Option<usize>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: vec![],
            body: body.into(),
            content_length: None,
        }
    }

    pub fn redirect(location: &str) -> Self {
        Self {
            status: 302,
            headers: vec![("Location".to_string(), location.to_string())],
            body: vec![],
            content_length: None,
        }
    }
}

type Handler = Arc<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// A single-threaded HTTP/1.1 server that closes every connection after one response.
pub struct TestServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl TestServer {
    pub fn start(handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(vec![]));
        let handler: Handler = Arc::new(handler);
        let recorded = requests.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let _ = serve(stream, &handler, &recorded);
            }
        });
        Self { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn serve(
    mut stream: TcpStream,
    handler: &Handler,
    requests: &Mutex<Vec<HttpRequest>>,
) -> io::Result<()> {
    let request = read_request(&stream)?;
    let response = handler(&request);
    requests.lock().unwrap().push(request);

    let mut head = format!(
        "HTTP/1.1 {} Test\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        response.content_length.unwrap_or(response.body.len())
    );
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()
}

fn read_request(stream: &TcpStream) -> io::Result<HttpRequest> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = vec![];
    loop {
        line.clear();
        reader.read_line(&mut line)?;
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.push((name.trim().to_lowercase(), value.trim().to_string()));
        }
    }
    let find = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    let mut body = vec![];
    if find("transfer-encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked")) {
        loop {
            line.clear();
            reader.read_line(&mut line)?;
            let size = usize::from_str_radix(line.trim(), 16)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if size == 0 {
                line.clear();
                reader.read_line(&mut line)?;
                break;
            }
            let mut chunk = vec![0; size];
            reader.read_exact(&mut chunk)?;
            body.extend_from_slice(&chunk);
            line.clear();
            reader.read_line(&mut line)?;
        }
    } else if let Some(length) = find("content-length") {
        let length = length
            .parse::<usize>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        body.resize(length, 0);
        reader.read_exact(&mut body)?;
    }

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}
