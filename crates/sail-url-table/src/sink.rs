use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::datatypes::SchemaRef;
use log::debug;
use url::Url;

use crate::error::{UrlTableError, UrlTableResult};
use crate::format::RowEncoder;

/// Writes record batches to a remote resource.
///
/// The remote request is complete only after [`UrlSink::finish`] succeeds.
/// A sink dropped before that aborts the request.
pub struct UrlSink {
    url: Url,
    schema: SchemaRef,
    encoder: Box<dyn RowEncoder>,
    started: bool,
}

impl std::fmt::Debug for UrlSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSink")
            .field("url", &self.url.as_str())
            .field("schema", &self.schema)
            .field("started", &self.started)
            .finish()
    }
}

impl UrlSink {
    pub(crate) fn new(url: Url, schema: SchemaRef, encoder: Box<dyn RowEncoder>) -> Self {
        Self {
            url,
            schema,
            encoder,
            started: false,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Writes the format prefix. Later calls have no effect.
    pub fn write_prefix(&mut self) -> UrlTableResult<()> {
        if !self.started {
            self.encoder.begin()?;
            self.started = true;
        }
        Ok(())
    }

    pub fn write(&mut self, batch: &RecordBatch) -> UrlTableResult<()> {
        self.check_schema(batch)?;
        self.write_prefix()?;
        self.encoder.write(batch)
    }

    /// Writes the format suffix and completes the remote request.
    pub fn finish(mut self) -> UrlTableResult<()> {
        self.write_prefix()?;
        let mut output = self.encoder.end()?;
        output.finalize()?;
        debug!("finished writing {}", self.url);
        Ok(())
    }

    fn check_schema(&self, batch: &RecordBatch) -> UrlTableResult<()> {
        let schema = batch.schema();
        let expected = self.schema.fields();
        let actual = schema.fields();
        let matches = expected.len() == actual.len()
            && expected
                .iter()
                .zip(actual.iter())
                .all(|(e, a)| e.name() == a.name() && e.data_type() == a.data_type());
        if matches {
            Ok(())
        } else {
            Err(UrlTableError::invalid(format!(
                "batch schema {schema} does not match table schema {}",
                self.schema
            )))
        }
    }
}
