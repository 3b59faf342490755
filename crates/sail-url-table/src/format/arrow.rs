use std::io::{Read, Write};
use std::sync::Arc;

use datafusion::arrow::array::{ArrayRef, RecordBatch, RecordBatchOptions, RecordBatchReader};
use datafusion::arrow::compute::cast;
use datafusion::arrow::datatypes::{Field, Schema, SchemaRef};
use datafusion::arrow::ipc::reader::StreamReader;
use datafusion::arrow::ipc::writer::StreamWriter;
use log::debug;

use crate::error::{UrlTableError, UrlTableResult};
use crate::format::{DecodedBatch, DecoderOptions, FormatCodec, RowDecoder, RowEncoder};
use crate::transport::ByteSink;

/// The Arrow IPC streaming format.
///
/// The schema message is the prefix of the stream and the end-of-stream marker is its suffix.
/// Columns are matched by name; batch sizes follow the writer of the stream.
#[derive(Debug, Clone, Default)]
pub struct ArrowStreamFormat;

impl FormatCodec for ArrowStreamFormat {
    fn name(&self) -> &str {
        "ArrowStream"
    }

    fn create_decoder(
        &self,
        input: Box<dyn Read + Send>,
        schema: SchemaRef,
        _options: &DecoderOptions,
    ) -> UrlTableResult<Box<dyn RowDecoder>> {
        Ok(Box::new(ArrowStreamDecoder {
            input: Some(input),
            schema,
            reader: None,
        }))
    }

    fn create_encoder(
        &self,
        output: Box<dyn ByteSink>,
        schema: SchemaRef,
    ) -> UrlTableResult<Box<dyn RowEncoder>> {
        Ok(Box::new(ArrowStreamEncoder {
            output: Some(output),
            schema,
            writer: None,
        }))
    }
}

struct ProjectedReader {
    reader: Box<dyn RecordBatchReader + Send>,
    /// The index in the stream of each requested field that the stream carries.
    projection: Vec<(usize, Arc<Field>)>,
    schema: SchemaRef,
}

impl ProjectedReader {
    fn next_batch(&mut self) -> UrlTableResult<Option<RecordBatch>> {
        let Some(batch) = self.reader.next().transpose()? else {
            return Ok(None);
        };
        let columns = self
            .projection
            .iter()
            .map(|(i, field)| Ok(cast(batch.column(*i), field.data_type())?))
            .collect::<UrlTableResult<Vec<ArrayRef>>>()?;
        let batch = RecordBatch::try_new_with_options(
            self.schema.clone(),
            columns,
            &RecordBatchOptions::new().with_row_count(Some(batch.num_rows())),
        )?;
        Ok(Some(batch))
    }
}

struct ArrowStreamDecoder {
    input: Option<Box<dyn Read + Send>>,
    schema: SchemaRef,
    reader: Option<ProjectedReader>,
}

impl RowDecoder for ArrowStreamDecoder {
    fn begin(&mut self) -> UrlTableResult<()> {
        let input = self
            .input
            .take()
            .ok_or_else(|| UrlTableError::internal("Arrow stream decoder already started"))?;
        let reader = StreamReader::try_new(input, None)?;
        let stream_schema = reader.schema();
        let projection = self
            .schema
            .fields()
            .iter()
            .filter_map(|field| {
                stream_schema
                    .index_of(field.name())
                    .ok()
                    .map(|i| (i, field.clone()))
            })
            .collect::<Vec<_>>();
        debug!(
            "Arrow stream has {} field(s), {} requested",
            stream_schema.fields().len(),
            projection.len()
        );
        let schema = Arc::new(Schema::new(
            projection
                .iter()
                .map(|(_, field)| field.clone())
                .collect::<Vec<_>>(),
        ));
        self.reader = Some(ProjectedReader {
            reader: Box::new(reader),
            projection,
            schema,
        });
        Ok(())
    }

    fn next_batch(&mut self) -> UrlTableResult<Option<DecodedBatch>> {
        match &mut self.reader {
            Some(reader) => Ok(reader.next_batch()?.map(DecodedBatch::from)),
            None => Err(UrlTableError::internal("Arrow stream decoder is not started")),
        }
    }

    fn end(&mut self) -> UrlTableResult<()> {
        self.reader = None;
        Ok(())
    }
}

struct ArrowStreamEncoder {
    output: Option<Box<dyn ByteSink>>,
    schema: SchemaRef,
    writer: Option<StreamWriter<Box<dyn ByteSink>>>,
}

impl RowEncoder for ArrowStreamEncoder {
    fn begin(&mut self) -> UrlTableResult<()> {
        let output = self
            .output
            .take()
            .ok_or_else(|| UrlTableError::internal("Arrow stream encoder already started"))?;
        self.writer = Some(StreamWriter::try_new(output, &self.schema)?);
        Ok(())
    }

    fn write(&mut self, batch: &RecordBatch) -> UrlTableResult<()> {
        match &mut self.writer {
            Some(writer) => Ok(writer.write(batch)?),
            None => Err(UrlTableError::internal("Arrow stream encoder is not started")),
        }
    }

    fn end(self: Box<Self>) -> UrlTableResult<Box<dyn ByteSink>> {
        let mut output = match (self.writer, self.output) {
            (Some(mut writer), _) => {
                writer.finish()?;
                writer.into_inner()?
            }
            (None, Some(output)) => output,
            (None, None) => {
                return Err(UrlTableError::internal(
                    "Arrow stream encoder is in an invalid state",
                ))
            }
        };
        output.flush()?;
        Ok(output)
    }
}
