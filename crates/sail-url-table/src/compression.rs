//! Compression method selection and stream wrapping.
//!
//! The readers and writers returned here own the stream they wrap.
//! [`CompressionMethod::None`] hands the stream back unchanged.

use std::fmt;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::str::FromStr;

use flate2::read::{MultiGzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};

use crate::error::{UrlTableError, UrlTableResult};
use crate::transport::ByteSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    None,
    Gzip,
    /// Zlib-wrapped deflate stream.
    Deflate,
    Zstd,
    Bzip2,
    Xz,
    /// LZ4 frame format.
    Lz4,
}

impl CompressionMethod {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
            CompressionMethod::Gzip => "gzip",
            CompressionMethod::Deflate => "deflate",
            CompressionMethod::Zstd => "zstd",
            CompressionMethod::Bzip2 => "bzip2",
            CompressionMethod::Xz => "xz",
            CompressionMethod::Lz4 => "lz4",
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "gz" => Some(CompressionMethod::Gzip),
            "zz" => Some(CompressionMethod::Deflate),
            "zst" | "zstd" => Some(CompressionMethod::Zstd),
            "bz2" => Some(CompressionMethod::Bzip2),
            "xz" => Some(CompressionMethod::Xz),
            "lz4" => Some(CompressionMethod::Lz4),
            _ => None,
        }
    }

    pub fn is_compressed(&self) -> bool {
        !matches!(self, CompressionMethod::None)
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How the compression method of a table is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionPolicy {
    /// Detect the method from the extension of the request path.
    #[default]
    Auto,
    Explicit(CompressionMethod),
}

impl FromStr for CompressionPolicy {
    type Err = UrlTableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.to_lowercase().as_str() {
            "" | "auto" => return Ok(CompressionPolicy::Auto),
            "none" => CompressionMethod::None,
            "gzip" | "gz" => CompressionMethod::Gzip,
            "deflate" | "zlib" => CompressionMethod::Deflate,
            "zstd" | "zst" => CompressionMethod::Zstd,
            "bzip2" | "bz2" => CompressionMethod::Bzip2,
            "xz" | "lzma" => CompressionMethod::Xz,
            "lz4" => CompressionMethod::Lz4,
            _ => {
                return Err(UrlTableError::invalid(format!(
                    "unknown compression method: {s}"
                )))
            }
        };
        Ok(CompressionPolicy::Explicit(method))
    }
}

impl fmt::Display for CompressionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionPolicy::Auto => write!(f, "auto"),
            CompressionPolicy::Explicit(method) => write!(f, "{method}"),
        }
    }
}

/// Resolves the compression method for a request path.
/// Paths without a recognized extension are not compressed.
pub fn select_compression(path: &str, policy: CompressionPolicy) -> CompressionMethod {
    match policy {
        CompressionPolicy::Explicit(method) => method,
        CompressionPolicy::Auto => Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(CompressionMethod::from_extension)
            .unwrap_or(CompressionMethod::None),
    }
}

enum AnyDecoder<R: Read> {
    Gzip(MultiGzDecoder<R>),
    Deflate(ZlibDecoder<R>),
    Zstd(zstd::Decoder<'static, BufReader<R>>),
    Bzip2(bzip2::read::MultiBzDecoder<R>),
    Xz(xz2::read::XzDecoder<R>),
    Lz4(lz4_flex::frame::FrameDecoder<R>),
}

impl<R: Read> Read for AnyDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            AnyDecoder::Gzip(d) => d.read(buf),
            AnyDecoder::Deflate(d) => d.read(buf),
            AnyDecoder::Zstd(d) => d.read(buf),
            AnyDecoder::Bzip2(d) => d.read(buf),
            AnyDecoder::Xz(d) => d.read(buf),
            AnyDecoder::Lz4(d) => d.read(buf),
        }
    }
}

pub fn wrap_reader(
    reader: Box<dyn Read + Send>,
    method: CompressionMethod,
) -> UrlTableResult<Box<dyn Read + Send>> {
    let decoder = match method {
        CompressionMethod::None => return Ok(reader),
        CompressionMethod::Gzip => AnyDecoder::Gzip(MultiGzDecoder::new(reader)),
        CompressionMethod::Deflate => AnyDecoder::Deflate(ZlibDecoder::new(reader)),
        CompressionMethod::Zstd => AnyDecoder::Zstd(
            zstd::Decoder::new(reader)
                .map_err(|e| UrlTableError::codec(format!("zstd decoder: {e}")))?,
        ),
        CompressionMethod::Bzip2 => AnyDecoder::Bzip2(bzip2::read::MultiBzDecoder::new(reader)),
        CompressionMethod::Xz => AnyDecoder::Xz(xz2::read::XzDecoder::new(reader)),
        CompressionMethod::Lz4 => AnyDecoder::Lz4(lz4_flex::frame::FrameDecoder::new(reader)),
    };
    Ok(Box::new(decoder))
}

enum AnyEncoder<W: Write> {
    Gzip(GzEncoder<W>),
    Deflate(ZlibEncoder<W>),
    Zstd(zstd::Encoder<'static, W>),
    Bzip2(bzip2::write::BzEncoder<W>),
    Xz(xz2::write::XzEncoder<W>),
    Lz4(lz4_flex::frame::FrameEncoder<W>),
}

impl<W: Write> AnyEncoder<W> {
    fn try_new(inner: W, method: CompressionMethod, level: u32) -> io::Result<Option<Self>> {
        let encoder = match method {
            CompressionMethod::None => return Ok(None),
            CompressionMethod::Gzip => {
                AnyEncoder::Gzip(GzEncoder::new(inner, flate2::Compression::new(level.min(9))))
            }
            CompressionMethod::Deflate => AnyEncoder::Deflate(ZlibEncoder::new(
                inner,
                flate2::Compression::new(level.min(9)),
            )),
            CompressionMethod::Zstd => {
                let level = i32::try_from(level.clamp(1, 22)).unwrap_or(3);
                AnyEncoder::Zstd(zstd::Encoder::new(inner, level)?)
            }
            CompressionMethod::Bzip2 => AnyEncoder::Bzip2(bzip2::write::BzEncoder::new(
                inner,
                bzip2::Compression::new(level.clamp(1, 9)),
            )),
            CompressionMethod::Xz => {
                AnyEncoder::Xz(xz2::write::XzEncoder::new(inner, level.min(9)))
            }
            CompressionMethod::Lz4 => AnyEncoder::Lz4(lz4_flex::frame::FrameEncoder::new(inner)),
        };
        Ok(Some(encoder))
    }

    /// Writes the trailer of the compressed stream and returns the inner writer.
    fn finish(self) -> io::Result<W> {
        match self {
            AnyEncoder::Gzip(e) => e.finish(),
            AnyEncoder::Deflate(e) => e.finish(),
            AnyEncoder::Zstd(e) => e.finish(),
            AnyEncoder::Bzip2(e) => e.finish(),
            AnyEncoder::Xz(e) => e.finish(),
            AnyEncoder::Lz4(e) => e.finish().map_err(io::Error::other),
        }
    }
}

impl<W: Write> Write for AnyEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            AnyEncoder::Gzip(e) => e.write(buf),
            AnyEncoder::Deflate(e) => e.write(buf),
            AnyEncoder::Zstd(e) => e.write(buf),
            AnyEncoder::Bzip2(e) => e.write(buf),
            AnyEncoder::Xz(e) => e.write(buf),
            AnyEncoder::Lz4(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            AnyEncoder::Gzip(e) => e.flush(),
            AnyEncoder::Deflate(e) => e.flush(),
            AnyEncoder::Zstd(e) => e.flush(),
            AnyEncoder::Bzip2(e) => e.flush(),
            AnyEncoder::Xz(e) => e.flush(),
            AnyEncoder::Lz4(e) => e.flush(),
        }
    }
}

struct CompressedSink {
    encoder: Option<AnyEncoder<Box<dyn ByteSink>>>,
}

impl CompressedSink {
    fn encoder(&mut self) -> io::Result<&mut AnyEncoder<Box<dyn ByteSink>>> {
        self.encoder
            .as_mut()
            .ok_or_else(|| UrlTableError::StreamClosed.into())
    }
}

impl Write for CompressedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder()?.flush()
    }
}

impl ByteSink for CompressedSink {
    fn finalize(&mut self) -> UrlTableResult<()> {
        let encoder = self.encoder.take().ok_or(UrlTableError::StreamClosed)?;
        let mut inner = encoder.finish()?;
        inner.finalize()
    }
}

pub fn wrap_writer(
    sink: Box<dyn ByteSink>,
    method: CompressionMethod,
    level: u32,
) -> UrlTableResult<Box<dyn ByteSink>> {
    if !method.is_compressed() {
        return Ok(sink);
    }
    match AnyEncoder::try_new(sink, method, level)? {
        Some(encoder) => Ok(Box::new(CompressedSink {
            encoder: Some(encoder),
        })),
        None => Err(UrlTableError::internal(format!(
            "no encoder for compression method {method}"
        ))),
    }
}
