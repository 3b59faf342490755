use std::fmt;
use std::sync::Arc;

use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::datatypes::SchemaRef;
use log::debug;

use crate::compression::{wrap_reader, CompressionMethod};
use crate::defaults::DefaultFiller;
use crate::error::{UrlTableError, UrlTableResult};
use crate::format::{DecoderOptions, FormatCodec, RowDecoder};
use crate::transport::{open_read_stream, ReadRequest, Transport};

/// Everything needed to start reading, gathered without any I/O.
pub(crate) struct ReadPlan {
    pub transport: Arc<dyn Transport>,
    pub request: ReadRequest,
    pub compression: CompressionMethod,
    pub format: Arc<dyn FormatCodec>,
    pub decoder_options: DecoderOptions,
    pub filler: DefaultFiller,
}

impl ReadPlan {
    fn start(self) -> UrlTableResult<ActiveRead> {
        debug!(
            "reading {} as {} (compression: {})",
            self.request.url,
            self.format.name(),
            self.compression
        );
        let stream = open_read_stream(self.transport.as_ref(), self.request)?;
        let stream = wrap_reader(stream, self.compression)?;
        let mut decoder = self.format.create_decoder(
            stream,
            self.filler.schema().clone(),
            &self.decoder_options,
        )?;
        decoder.begin()?;
        Ok(ActiveRead {
            decoder,
            filler: self.filler,
        })
    }
}

struct ActiveRead {
    decoder: Box<dyn RowDecoder>,
    filler: DefaultFiller,
}

enum SourceState {
    NotStarted(Box<ReadPlan>),
    Active(ActiveRead),
    Exhausted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    Active,
    Exhausted,
    Failed,
}

/// Produces record batches from a remote resource, one batch per pull.
///
/// Nothing is requested from the remote side until the first pull.
/// Dropping the source at any point closes the connection.
pub struct UrlSource {
    name: String,
    schema: SchemaRef,
    state: SourceState,
}

impl fmt::Debug for UrlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlSource")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("state", &self.state())
            .finish()
    }
}

impl UrlSource {
    pub(crate) fn new(name: String, plan: ReadPlan) -> Self {
        Self {
            name,
            schema: plan.filler.schema().clone(),
            state: SourceState::NotStarted(Box::new(plan)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn state(&self) -> PipelineState {
        match self.state {
            SourceState::NotStarted(_) => PipelineState::NotStarted,
            SourceState::Active(_) => PipelineState::Active,
            SourceState::Exhausted => PipelineState::Exhausted,
            SourceState::Failed => PipelineState::Failed,
        }
    }

    /// Returns the next non-empty batch, or `None` once the stream is exhausted.
    ///
    /// After an error the source is failed for good and has released its resources.
    pub fn next_batch(&mut self) -> UrlTableResult<Option<RecordBatch>> {
        loop {
            // Any early return through `?` leaves the source failed.
            match std::mem::replace(&mut self.state, SourceState::Failed) {
                SourceState::NotStarted(plan) => {
                    self.state = SourceState::Active(plan.start()?);
                }
                SourceState::Active(mut active) => match active.decoder.next_batch()? {
                    Some(batch) if batch.num_rows() == 0 => {
                        self.state = SourceState::Active(active);
                    }
                    Some(batch) => {
                        let batch = active.filler.apply(batch)?;
                        self.state = SourceState::Active(active);
                        return Ok(Some(batch));
                    }
                    None => {
                        active.decoder.end()?;
                        debug!("{} exhausted", self.name);
                        self.state = SourceState::Exhausted;
                        return Ok(None);
                    }
                },
                SourceState::Exhausted => {
                    self.state = SourceState::Exhausted;
                    return Ok(None);
                }
                SourceState::Failed => {
                    return Err(UrlTableError::internal(format!(
                        "{} cannot be read after a failure",
                        self.name
                    )))
                }
            }
        }
    }
}

impl Iterator for UrlSource {
    type Item = UrlTableResult<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.state, SourceState::Failed) {
            return None;
        }
        self.next_batch().transpose()
    }
}
