use std::io::{BufRead, BufReader, Read, Write};
use std::sync::Arc;

use datafusion::arrow::array::{BooleanArray, RecordBatch};
use datafusion::arrow::datatypes::{Schema, SchemaRef};
use datafusion::arrow::error::ArrowError;
use datafusion::arrow::json::reader::Decoder;
use datafusion::arrow::json::{LineDelimitedWriter, ReaderBuilder};
use serde_json::{Map, Value};

use crate::error::{UrlTableError, UrlTableResult};
use crate::format::{DecodedBatch, DecoderOptions, FormatCodec, RowDecoder, RowEncoder};
use crate::transport::ByteSink;

/// One JSON object per line.
///
/// Every column decodes as nullable. A key left out of an object is reported as
/// omitted for that row, so that the column's default can take its place.
#[derive(Debug, Clone, Default)]
pub struct JsonEachRowFormat;

impl FormatCodec for JsonEachRowFormat {
    fn name(&self) -> &str {
        "JSONEachRow"
    }

    fn create_decoder(
        &self,
        input: Box<dyn Read + Send>,
        schema: SchemaRef,
        options: &DecoderOptions,
    ) -> UrlTableResult<Box<dyn RowDecoder>> {
        Ok(Box::new(JsonDecoder {
            input: Some(BufReader::new(input)),
            schema,
            batch_size: options.batch_size,
            decoder: None,
            line: String::new(),
            line_number: 0,
        }))
    }

    fn create_encoder(
        &self,
        output: Box<dyn ByteSink>,
        _schema: SchemaRef,
    ) -> UrlTableResult<Box<dyn RowEncoder>> {
        Ok(Box::new(JsonEncoder {
            writer: LineDelimitedWriter::new(output),
        }))
    }
}

struct JsonDecoder {
    input: Option<BufReader<Box<dyn Read + Send>>>,
    schema: SchemaRef,
    batch_size: usize,
    decoder: Option<Decoder>,
    line: String,
    line_number: usize,
}

impl RowDecoder for JsonDecoder {
    fn begin(&mut self) -> UrlTableResult<()> {
        if self.decoder.is_some() || self.input.is_none() {
            return Err(UrlTableError::internal("JSON decoder already started"));
        }
        let fields = self
            .schema
            .fields()
            .iter()
            .map(|field| field.as_ref().clone().with_nullable(true))
            .collect::<Vec<_>>();
        let schema = Schema::new_with_metadata(fields, self.schema.metadata().clone());
        let decoder = ReaderBuilder::new(Arc::new(schema))
            .with_batch_size(self.batch_size)
            .build_decoder()?;
        self.decoder = Some(decoder);
        Ok(())
    }

    fn next_batch(&mut self) -> UrlTableResult<Option<DecodedBatch>> {
        let (Some(input), Some(decoder)) = (self.input.as_mut(), self.decoder.as_mut()) else {
            return Err(UrlTableError::internal("JSON decoder is not started"));
        };
        let mut rows: Vec<Map<String, Value>> = Vec::with_capacity(self.batch_size);
        while rows.len() < self.batch_size {
            self.line.clear();
            if input.read_line(&mut self.line)? == 0 {
                break;
            }
            self.line_number += 1;
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            let row = serde_json::from_str(line).map_err(|e| {
                ArrowError::JsonError(format!(
                    "invalid JSON object at line {}: {e}",
                    self.line_number
                ))
            })?;
            rows.push(row);
        }
        if rows.is_empty() {
            return Ok(None);
        }

        let omitted = self
            .schema
            .fields()
            .iter()
            .filter_map(|field| {
                let mask = rows
                    .iter()
                    .map(|row| !row.contains_key(field.name()))
                    .collect::<Vec<_>>();
                mask.contains(&true)
                    .then(|| (field.name().clone(), BooleanArray::from(mask)))
            })
            .collect();
        decoder.serialize(&rows)?;
        let batch = decoder
            .flush()?
            .ok_or_else(|| UrlTableError::internal("JSON decoder produced no batch"))?;
        Ok(Some(DecodedBatch { batch, omitted }))
    }

    fn end(&mut self) -> UrlTableResult<()> {
        self.decoder = None;
        self.input = None;
        Ok(())
    }
}

struct JsonEncoder {
    writer: LineDelimitedWriter<Box<dyn ByteSink>>,
}

impl RowEncoder for JsonEncoder {
    fn begin(&mut self) -> UrlTableResult<()> {
        Ok(())
    }

    fn write(&mut self, batch: &RecordBatch) -> UrlTableResult<()> {
        Ok(self.writer.write(batch)?)
    }

    fn end(self: Box<Self>) -> UrlTableResult<Box<dyn ByteSink>> {
        let mut writer = self.writer;
        writer.finish()?;
        let mut output = writer.into_inner();
        output.flush()?;
        Ok(output)
    }
}
