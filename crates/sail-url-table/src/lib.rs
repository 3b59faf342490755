pub mod compression;
pub mod defaults;
pub mod error;
pub mod factory;
pub mod filter;
pub mod format;
pub mod hooks;
pub mod sink;
pub mod source;
pub mod table;
pub mod transport;

pub use error::{UrlTableError, UrlTableResult};
pub use factory::UrlTableFactory;
pub use hooks::{BodyWriter, DefaultReadRequestHooks, ReadRequestHooks, ReadRequestInfo};
pub use sink::UrlSink;
pub use source::{PipelineState, UrlSource};
pub use table::{ColumnDefinition, TableConstraint, TableSchema, UrlTable, UrlTableContext};
