use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{UrlTableError, UrlTableResult};
use crate::format::{ArrowStreamFormat, CsvFormat, FormatCodec, JsonEachRowFormat};

/// Format codecs keyed by case-insensitive name.
#[derive(Debug, Default)]
pub struct FormatRegistry {
    formats: HashMap<String, Arc<dyn FormatCodec>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        let mut registry = Self::default();

        registry.register_format(Arc::new(CsvFormat::csv()));
        registry.register_format(Arc::new(CsvFormat::csv_with_names()));
        let tsv: Arc<dyn FormatCodec> = Arc::new(CsvFormat::tsv());
        registry.register_format_as("TSV", tsv.clone());
        registry.register_format(tsv);
        let tsv_with_names: Arc<dyn FormatCodec> = Arc::new(CsvFormat::tsv_with_names());
        registry.register_format_as("TSVWithNames", tsv_with_names.clone());
        registry.register_format(tsv_with_names);
        let json: Arc<dyn FormatCodec> = Arc::new(JsonEachRowFormat);
        registry.register_format_as("NDJSON", json.clone());
        registry.register_format(json);
        registry.register_format(Arc::new(ArrowStreamFormat));

        registry
    }

    pub fn register_format(&mut self, format: Arc<dyn FormatCodec>) {
        self.formats.insert(format.name().to_lowercase(), format);
    }

    pub fn register_format_as(&mut self, name: &str, format: Arc<dyn FormatCodec>) {
        self.formats.insert(name.to_lowercase(), format);
    }

    pub fn get_format(&self, name: &str) -> UrlTableResult<Arc<dyn FormatCodec>> {
        self.formats
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| UrlTableError::invalid(format!("unknown format: {name}")))
    }
}
