use std::str::FromStr;

use datafusion::arrow::datatypes::DataType;
use sail_url_table::{ColumnDefinition, TableSchema, UrlTableError, UrlTableResult};

/// Parses a table schema written as `name:Type` pairs separated by commas.
/// Types use the Arrow display syntax. A `!` after the type makes the column non-nullable.
pub fn parse_schema(value: &str) -> UrlTableResult<TableSchema> {
    let columns = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|column| {
            let (name, data_type) = column.split_once(':').ok_or_else(|| {
                UrlTableError::invalid(format!("missing type for column: {column}"))
            })?;
            let data_type = data_type.trim();
            let (data_type, nullable) = match data_type.strip_suffix('!') {
                Some(data_type) => (data_type, false),
                None => (data_type, true),
            };
            let data_type = DataType::from_str(data_type.trim())
                .map_err(|e| UrlTableError::invalid(format!("column {name}: {e}")))?;
            Ok(ColumnDefinition::new(name.trim(), data_type, nullable))
        })
        .collect::<UrlTableResult<Vec<_>>>()?;
    if columns.is_empty() {
        return Err(UrlTableError::invalid("the schema has no columns"));
    }
    TableSchema::try_new(columns)
}

pub fn parse_columns(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
