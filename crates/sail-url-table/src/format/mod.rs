//! Row format codecs that translate between byte streams and record batches.

use std::collections::HashMap;
use std::fmt::Debug;
use std::io::Read;

use datafusion::arrow::array::{BooleanArray, RecordBatch};
use datafusion::arrow::datatypes::SchemaRef;

use crate::error::UrlTableResult;
use crate::transport::ByteSink;

mod arrow;
mod csv;
mod json;
mod registry;

pub use arrow::ArrowStreamFormat;
pub use csv::CsvFormat;
pub use json::JsonEachRowFormat;
pub use registry::FormatRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    pub batch_size: usize,
}

/// A batch decoded from a stream.
#[derive(Debug, Clone)]
pub struct DecodedBatch {
    pub batch: RecordBatch,
    /// The rows in which the stream left out the value of a column the batch carries,
    /// keyed by column name. The values in those rows are null.
    pub omitted: HashMap<String, BooleanArray>,
}

impl DecodedBatch {
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}

impl From<RecordBatch> for DecodedBatch {
    fn from(batch: RecordBatch) -> Self {
        Self {
            batch,
            omitted: HashMap::new(),
        }
    }
}

/// Decodes record batches from a byte stream.
///
/// [`RowDecoder::begin`] is called once before the first [`RowDecoder::next_batch`],
/// and [`RowDecoder::end`] once after the last batch has been returned.
/// A decoder dropped without `end` must still release its input.
pub trait RowDecoder: Send {
    /// Consumes the prefix of the stream (e.g. a header line or a schema message).
    fn begin(&mut self) -> UrlTableResult<()>;

    /// Returns the next batch, or `None` at the end of the stream.
    ///
    /// The batch may lack requested columns the stream does not carry,
    /// but every column it has must be of the requested type.
    fn next_batch(&mut self) -> UrlTableResult<Option<DecodedBatch>>;

    /// Consumes the suffix of the stream.
    fn end(&mut self) -> UrlTableResult<()>;
}

/// Encodes record batches into a byte sink.
pub trait RowEncoder: Send {
    /// Writes the prefix of the stream (e.g. a header line or a schema message).
    fn begin(&mut self) -> UrlTableResult<()>;

    fn write(&mut self, batch: &RecordBatch) -> UrlTableResult<()>;

    /// Writes the suffix of the stream, flushes, and hands back the sink.
    fn end(self: Box<Self>) -> UrlTableResult<Box<dyn ByteSink>>;
}

pub trait FormatCodec: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn create_decoder(
        &self,
        input: Box<dyn Read + Send>,
        schema: SchemaRef,
        options: &DecoderOptions,
    ) -> UrlTableResult<Box<dyn RowDecoder>>;

    fn create_encoder(
        &self,
        output: Box<dyn ByteSink>,
        schema: SchemaRef,
    ) -> UrlTableResult<Box<dyn RowEncoder>>;
}
