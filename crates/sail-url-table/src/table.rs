use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::execution::{SessionState, SessionStateBuilder};
use datafusion_expr::Expr;
use log::debug;
use sail_common::config::AppConfig;
use url::Url;

use crate::compression::{select_compression, wrap_writer, CompressionPolicy};
use crate::defaults::DefaultFiller;
use crate::error::{UrlTableError, UrlTableResult};
use crate::filter::RemoteHostFilter;
use crate::format::{DecoderOptions, FormatCodec, FormatRegistry};
use crate::hooks::{DefaultReadRequestHooks, ReadRequestHooks, ReadRequestInfo};
use crate::sink::UrlSink;
use crate::source::{ReadPlan, UrlSource};
use crate::transport::{
    open_write_stream, HttpMethod, HttpTransport, ReadRequest, Transport, WriteRequest,
};

#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    /// Computes the column when the remote data does not carry it.
    pub default: Option<Expr>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Expr) -> Self {
        self.default = Some(default);
        self
    }

    fn to_field(&self) -> Field {
        Field::new(&self.name, self.data_type.clone(), self.nullable)
    }
}

#[derive(Debug, Clone)]
pub struct TableConstraint {
    pub name: String,
    pub check: Expr,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    columns: Vec<ColumnDefinition>,
    schema: SchemaRef,
}

impl TableSchema {
    pub fn try_new(columns: Vec<ColumnDefinition>) -> UrlTableResult<Self> {
        let mut names = HashSet::new();
        for column in &columns {
            if !names.insert(column.name.as_str()) {
                return Err(UrlTableError::invalid(format!(
                    "duplicate column: {}",
                    column.name
                )));
            }
        }
        let schema = Arc::new(Schema::new(
            columns
                .iter()
                .map(ColumnDefinition::to_field)
                .collect::<Vec<_>>(),
        ));
        Ok(Self { columns, schema })
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Returns the schema of the named columns, in the order given.
    pub fn project(&self, names: &[String]) -> UrlTableResult<SchemaRef> {
        let fields = names
            .iter()
            .map(|name| {
                self.columns
                    .iter()
                    .find(|c| &c.name == name)
                    .map(ColumnDefinition::to_field)
                    .ok_or_else(|| UrlTableError::invalid(format!("unknown column: {name}")))
            })
            .collect::<UrlTableResult<Vec<_>>>()?;
        Ok(Arc::new(Schema::new(fields)))
    }

    pub fn defaults(&self) -> HashMap<String, Expr> {
        self.columns
            .iter()
            .filter_map(|c| c.default.clone().map(|d| (c.name.clone(), d)))
            .collect()
    }
}

/// Shared state for all URL tables of a session.
pub struct UrlTableContext {
    config: AppConfig,
    transport: Arc<dyn Transport>,
    formats: Arc<FormatRegistry>,
    host_filter: Arc<RemoteHostFilter>,
    session_state: Arc<SessionState>,
}

impl fmt::Debug for UrlTableContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlTableContext")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .field("host_filter", &self.host_filter)
            .finish()
    }
}

impl UrlTableContext {
    pub fn try_new(config: AppConfig) -> UrlTableResult<Self> {
        let host_filter = RemoteHostFilter::try_from_config(&config.remote_hosts)?;
        let transport = HttpTransport::try_new(&config.http)?;
        Ok(Self {
            config,
            transport: Arc::new(transport),
            formats: Arc::new(FormatRegistry::new()),
            host_filter: Arc::new(host_filter),
            session_state: Arc::new(SessionStateBuilder::new().with_default_features().build()),
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_formats(mut self, formats: FormatRegistry) -> Self {
        self.formats = Arc::new(formats);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn host_filter(&self) -> &RemoteHostFilter {
        &self.host_filter
    }

    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }
}

/// A table whose data lives at a remote URL.
#[derive(Debug)]
pub struct UrlTable {
    uri: Url,
    format: Arc<dyn FormatCodec>,
    compression: CompressionPolicy,
    schema: TableSchema,
    constraints: Vec<TableConstraint>,
    context: Arc<UrlTableContext>,
    hooks: Arc<dyn ReadRequestHooks>,
}

impl UrlTable {
    pub fn try_new(
        uri: Url,
        format_name: &str,
        compression: CompressionPolicy,
        schema: TableSchema,
        constraints: Vec<TableConstraint>,
        context: Arc<UrlTableContext>,
    ) -> UrlTableResult<Self> {
        context.host_filter.check(&uri)?;
        let format = context.formats.get_format(format_name)?;
        Ok(Self {
            uri,
            format,
            compression,
            schema,
            constraints,
            context,
            hooks: Arc::new(DefaultReadRequestHooks),
        })
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ReadRequestHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn format_name(&self) -> &str {
        self.format.name()
    }

    pub fn compression(&self) -> CompressionPolicy {
        self.compression
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn constraints(&self) -> &[TableConstraint] {
        &self.constraints
    }

    /// Prepares a lazy read of the given columns; an empty list reads all of them.
    ///
    /// The host filter is applied to the final request URL before this returns,
    /// but no connection is made until the first batch is pulled.
    pub fn open_read_pipeline(
        &self,
        columns: &[String],
        filters: &[Expr],
    ) -> UrlTableResult<UrlSource> {
        let config = &self.context.config;
        let columns = if columns.is_empty() {
            self.schema.column_names()
        } else {
            columns.to_vec()
        };
        let schema = self.schema.project(&columns)?;
        let info = ReadRequestInfo {
            columns: &columns,
            filters,
            batch_size: config.batch_size,
        };

        let mut url = self.uri.clone();
        let params = self.hooks.read_uri_params(&info);
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        self.context.host_filter.check(&url)?;

        let compression = select_compression(url.path(), self.compression);
        let request = ReadRequest {
            url,
            method: self.hooks.read_method(&info),
            body: self.hooks.read_post_body(&info),
            timeouts: (&config.http).into(),
            max_redirects: config.http.max_redirects,
            host_filter: self.context.host_filter.clone(),
        };
        debug!("prepared read of {} column(s) from {}", columns.len(), request.url);
        let filler = DefaultFiller::new(
            schema,
            self.schema.defaults(),
            self.context.session_state.clone(),
        );
        let plan = ReadPlan {
            transport: self.context.transport.clone(),
            request,
            compression,
            format: self.format.clone(),
            decoder_options: DecoderOptions {
                batch_size: config.batch_size,
            },
            filler,
        };
        Ok(UrlSource::new(format!("URL source {}", self.uri), plan))
    }

    /// Opens a sink for all table columns. Rows are sent with a `POST` request.
    pub fn open_write_pipeline(&self) -> UrlTableResult<UrlSink> {
        let config = &self.context.config;
        let schema = self.schema.arrow_schema();
        let compression = select_compression(self.uri.path(), self.compression);
        let request = WriteRequest {
            url: self.uri.clone(),
            method: HttpMethod::Post,
            timeouts: (&config.http).into(),
            buffer_size: config.http.buffer_size,
            host_filter: self.context.host_filter.clone(),
        };
        let output = open_write_stream(self.context.transport.as_ref(), request)?;
        let output = wrap_writer(output, compression, config.compression.level)?;
        let encoder = self.format.create_encoder(output, schema.clone())?;
        Ok(UrlSink::new(self.uri.clone(), schema, encoder))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use datafusion_expr::lit;

    use super::*;

    fn schema() -> TableSchema {
        TableSchema::try_new(vec![
            ColumnDefinition::new("a", DataType::Int64, false),
            ColumnDefinition::new("b", DataType::Utf8, true),
            ColumnDefinition::new("c", DataType::Int64, false).with_default(lit(0i64)),
        ])
        .unwrap()
    }

    #[test]
    fn test_project_in_requested_order() {
        let projected = schema()
            .project(&["c".to_string(), "a".to_string()])
            .unwrap();
        let names = projected
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["c", "a"]);
    }

    #[test]
    fn test_project_unknown_column() {
        assert!(matches!(
            schema().project(&["z".to_string()]),
            Err(UrlTableError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_duplicate_columns() {
        let result = TableSchema::try_new(vec![
            ColumnDefinition::new("a", DataType::Int64, false),
            ColumnDefinition::new("a", DataType::Utf8, true),
        ]);
        assert!(matches!(result, Err(UrlTableError::InvalidArgument(_))));
    }

    #[test]
    fn test_defaults() {
        let defaults = schema().defaults();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults.get("c"), Some(&lit(0i64)));
    }
}
