use std::io::{BufRead, BufReader, Read, Write};
use std::sync::Arc;

use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::csv::{ReaderBuilder, Writer, WriterBuilder};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::arrow::error::ArrowError;
use log::debug;

use crate::error::{UrlTableError, UrlTableResult};
use crate::format::{DecodedBatch, DecoderOptions, FormatCodec, RowDecoder, RowEncoder};
use crate::transport::ByteSink;

type BatchIterator = Box<dyn Iterator<Item = Result<RecordBatch, ArrowError>> + Send>;

/// Delimiter-separated values, with or without a header line of column names.
///
/// Without a header, fields map to the requested columns by position.
/// With a header, fields map to columns by name and requested columns
/// absent from the header are left out of the decoded batches.
#[derive(Debug, Clone)]
pub struct CsvFormat {
    name: &'static str,
    delimiter: u8,
    has_header: bool,
}

impl CsvFormat {
    pub fn csv() -> Self {
        Self {
            name: "CSV",
            delimiter: b',',
            has_header: false,
        }
    }

    pub fn csv_with_names() -> Self {
        Self {
            name: "CSVWithNames",
            delimiter: b',',
            has_header: true,
        }
    }

    pub fn tsv() -> Self {
        Self {
            name: "TabSeparated",
            delimiter: b'\t',
            has_header: false,
        }
    }

    pub fn tsv_with_names() -> Self {
        Self {
            name: "TabSeparatedWithNames",
            delimiter: b'\t',
            has_header: true,
        }
    }
}

impl FormatCodec for CsvFormat {
    fn name(&self) -> &str {
        self.name
    }

    fn create_decoder(
        &self,
        input: Box<dyn Read + Send>,
        schema: SchemaRef,
        options: &DecoderOptions,
    ) -> UrlTableResult<Box<dyn RowDecoder>> {
        Ok(Box::new(CsvDecoder {
            format: self.clone(),
            schema,
            batch_size: options.batch_size,
            state: CsvDecoderState::Pending(BufReader::new(input)),
        }))
    }

    fn create_encoder(
        &self,
        output: Box<dyn ByteSink>,
        schema: SchemaRef,
    ) -> UrlTableResult<Box<dyn RowEncoder>> {
        Ok(Box::new(CsvEncoder {
            format: self.clone(),
            schema,
            state: CsvEncoderState::Pending(output),
        }))
    }
}

enum CsvDecoderState {
    Pending(BufReader<Box<dyn Read + Send>>),
    Reading(BatchIterator),
    Done,
}

struct CsvDecoder {
    format: CsvFormat,
    schema: SchemaRef,
    batch_size: usize,
    state: CsvDecoderState,
}

impl CsvDecoder {
    /// Returns the schema of the fields in the stream and the indices of the requested ones.
    fn read_header(
        &self,
        input: &mut BufReader<Box<dyn Read + Send>>,
    ) -> UrlTableResult<(SchemaRef, Vec<usize>)> {
        let mut line = String::new();
        input.read_line(&mut line)?;
        let names = parse_header(&line, self.format.delimiter);
        let mut fields = Vec::with_capacity(names.len());
        let mut projection = vec![];
        for (i, name) in names.iter().enumerate() {
            match self.schema.field_with_name(name) {
                Ok(field) if !projection.iter().any(|&j| names[j] == *name) => {
                    fields.push(field.clone().with_nullable(true));
                    projection.push(i);
                }
                _ => fields.push(Field::new(format!("__unused_{i}"), DataType::Utf8, true)),
            }
        }
        debug!(
            "{} header has {} field(s), {} requested",
            self.format.name,
            names.len(),
            projection.len()
        );
        Ok((Arc::new(Schema::new(fields)), projection))
    }
}

impl RowDecoder for CsvDecoder {
    fn begin(&mut self) -> UrlTableResult<()> {
        let CsvDecoderState::Pending(mut input) =
            std::mem::replace(&mut self.state, CsvDecoderState::Done)
        else {
            return Err(UrlTableError::internal("CSV decoder already started"));
        };
        let builder = if self.format.has_header {
            let (schema, projection) = self.read_header(&mut input)?;
            ReaderBuilder::new(schema).with_projection(projection)
        } else {
            ReaderBuilder::new(self.schema.clone())
        };
        let reader = builder
            .with_header(false)
            .with_delimiter(self.format.delimiter)
            .with_batch_size(self.batch_size)
            .build_buffered(input)?;
        self.state = CsvDecoderState::Reading(Box::new(reader));
        Ok(())
    }

    fn next_batch(&mut self) -> UrlTableResult<Option<DecodedBatch>> {
        match &mut self.state {
            CsvDecoderState::Reading(reader) => {
                Ok(reader.next().transpose()?.map(DecodedBatch::from))
            }
            CsvDecoderState::Pending(_) => {
                Err(UrlTableError::internal("CSV decoder is not started"))
            }
            CsvDecoderState::Done => Ok(None),
        }
    }

    fn end(&mut self) -> UrlTableResult<()> {
        self.state = CsvDecoderState::Done;
        Ok(())
    }
}

enum CsvEncoderState {
    Pending(Box<dyn ByteSink>),
    Writing(Writer<Box<dyn ByteSink>>),
    Poisoned,
}

struct CsvEncoder {
    format: CsvFormat,
    schema: SchemaRef,
    state: CsvEncoderState,
}

impl RowEncoder for CsvEncoder {
    fn begin(&mut self) -> UrlTableResult<()> {
        let CsvEncoderState::Pending(mut output) =
            std::mem::replace(&mut self.state, CsvEncoderState::Poisoned)
        else {
            return Err(UrlTableError::internal("CSV encoder already started"));
        };
        if self.format.has_header {
            let names = self
                .schema
                .fields()
                .iter()
                .map(|f| quote_field(f.name(), self.format.delimiter))
                .collect::<Vec<_>>();
            let separator = char::from(self.format.delimiter).to_string();
            writeln!(output, "{}", names.join(&separator))?;
        }
        let writer = WriterBuilder::new()
            .with_header(false)
            .with_delimiter(self.format.delimiter)
            .build(output);
        self.state = CsvEncoderState::Writing(writer);
        Ok(())
    }

    fn write(&mut self, batch: &RecordBatch) -> UrlTableResult<()> {
        match &mut self.state {
            CsvEncoderState::Writing(writer) => Ok(writer.write(batch)?),
            _ => Err(UrlTableError::internal("CSV encoder is not started")),
        }
    }

    fn end(self: Box<Self>) -> UrlTableResult<Box<dyn ByteSink>> {
        let mut output = match self.state {
            CsvEncoderState::Writing(writer) => writer.into_inner(),
            CsvEncoderState::Pending(output) => output,
            CsvEncoderState::Poisoned => {
                return Err(UrlTableError::internal("CSV encoder is in an invalid state"))
            }
        };
        output.flush()?;
        Ok(output)
    }
}

fn parse_header(line: &str, delimiter: u8) -> Vec<String> {
    let delimiter = char::from(delimiter);
    let line = line.trim_end_matches(['\n', '\r']);
    let mut names = vec![];
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            c if c == delimiter && !quoted => names.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    if !line.is_empty() {
        names.push(current);
    }
    names
}

fn quote_field(name: &str, delimiter: u8) -> String {
    let delimiter = char::from(delimiter);
    if name.contains([delimiter, '"', '\n', '\r']) {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name.to_string()
    }
}
