use std::collections::HashMap;
use std::sync::Arc;

use datafusion::arrow::array::{new_null_array, ArrayRef, RecordBatch, RecordBatchOptions};
use datafusion::arrow::compute::cast;
use datafusion::arrow::compute::kernels::zip::zip;
use datafusion::arrow::datatypes::{Field, FieldRef, Schema, SchemaRef};
use datafusion::execution::SessionState;
use datafusion_common::DFSchema;
use datafusion_expr::Expr;

use crate::error::{UrlTableError, UrlTableResult};
use crate::format::DecodedBatch;

/// Completes decoded batches with the columns the input stream did not carry.
///
/// A missing column is computed from its default expression, which may refer to
/// columns present in the batch or to missing columns that come earlier in the schema.
/// A missing column without a default is filled with nulls.
/// Rows in which the input omitted the value of a present column take the default
/// in the same way, while the other rows keep the decoded value.
pub struct DefaultFiller {
    schema: SchemaRef,
    defaults: HashMap<String, Expr>,
    state: Arc<SessionState>,
}

impl DefaultFiller {
    pub fn new(schema: SchemaRef, defaults: HashMap<String, Expr>, state: Arc<SessionState>) -> Self {
        Self {
            schema,
            defaults,
            state,
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn apply(&self, decoded: DecodedBatch) -> UrlTableResult<RecordBatch> {
        let DecodedBatch { batch, omitted } = decoded;
        let num_rows = batch.num_rows();
        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        let mut fields: Vec<FieldRef> = batch.schema().fields().iter().cloned().collect();
        let mut columns: Vec<ArrayRef> = batch.columns().to_vec();

        for field in self.schema.fields() {
            if let Some(i) = fields.iter().position(|f| f.name() == field.name()) {
                let Some(mask) = omitted.get(field.name()).filter(|m| m.true_count() > 0) else {
                    continue;
                };
                match self.defaults.get(field.name()) {
                    Some(expr) => {
                        let default = self.evaluate(expr, field, &fields, &columns, &options)?;
                        let present = cast(&columns[i], field.data_type())?;
                        columns[i] = zip(mask, &default, &present)?;
                    }
                    None if field.is_nullable() => {}
                    None => {
                        return Err(UrlTableError::invalid(format!(
                            "column {} is missing from {} row(s) of the input and has no default",
                            field.name(),
                            mask.true_count()
                        )))
                    }
                }
                continue;
            }
            let column = match self.defaults.get(field.name()) {
                Some(expr) => self.evaluate(expr, field, &fields, &columns, &options)?,
                None if field.is_nullable() => new_null_array(field.data_type(), num_rows),
                None => {
                    return Err(UrlTableError::invalid(format!(
                        "column {} is missing from the input and has no default",
                        field.name()
                    )))
                }
            };
            fields.push(field.clone());
            columns.push(column);
        }

        let output = self
            .schema
            .fields()
            .iter()
            .map(|field| {
                fields
                    .iter()
                    .position(|f| f.name() == field.name())
                    .map(|i| columns[i].clone())
                    .ok_or_else(|| {
                        UrlTableError::internal(format!("column {} is not filled", field.name()))
                    })
            })
            .collect::<UrlTableResult<Vec<_>>>()?;
        Ok(RecordBatch::try_new_with_options(
            self.schema.clone(),
            output,
            &options,
        )?)
    }

    fn evaluate(
        &self,
        expr: &Expr,
        field: &Field,
        fields: &[FieldRef],
        columns: &[ArrayRef],
        options: &RecordBatchOptions,
    ) -> UrlTableResult<ArrayRef> {
        let input = RecordBatch::try_new_with_options(
            Arc::new(Schema::new(fields.to_vec())),
            columns.to_vec(),
            options,
        )?;
        let df_schema = DFSchema::try_from(input.schema().as_ref().clone())?;
        let physical = self.state.create_physical_expr(expr.clone(), &df_schema)?;
        let array = physical.evaluate(&input)?.into_array(input.num_rows())?;
        Ok(cast(&array, field.data_type())?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use datafusion::arrow::array::{Array, BooleanArray, Int64Array, StringArray};
    use datafusion::arrow::datatypes::DataType;
    use datafusion::execution::SessionStateBuilder;
    use datafusion_expr::{col, lit};

    use super::*;

    fn state() -> Arc<SessionState> {
        Arc::new(SessionStateBuilder::new().with_default_features().build())
    }

    fn requested_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Int64, true),
            Field::new("c", DataType::Int64, false),
            Field::new("d", DataType::Utf8, true),
        ]))
    }

    fn defaults() -> HashMap<String, Expr> {
        HashMap::from([
            ("b".to_string(), col("a") * lit(10i64)),
            ("c".to_string(), lit(0)),
        ])
    }

    fn int64_values(batch: &RecordBatch, name: &str) -> Vec<i64> {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    #[test]
    fn test_fill_missing_columns() {
        let filler = DefaultFiller::new(requested_schema(), defaults(), state());
        let input = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)])),
            vec![Arc::new(Int64Array::from(vec![1, 2, 3]))],
        )
        .unwrap();

        let output = filler.apply(input.into()).unwrap();
        assert_eq!(output.schema(), requested_schema());
        assert_eq!(int64_values(&output, "a"), vec![1, 2, 3]);
        assert_eq!(int64_values(&output, "b"), vec![10, 20, 30]);
        assert_eq!(int64_values(&output, "c"), vec![0, 0, 0]);
        let d = output.column_by_name("d").unwrap();
        assert_eq!(d.null_count(), 3);
    }

    #[test]
    fn test_present_columns_pass_through() {
        let filler = DefaultFiller::new(requested_schema(), defaults(), state());
        let input = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("d", DataType::Utf8, true),
                Field::new("c", DataType::Int64, false),
                Field::new("b", DataType::Int64, true),
                Field::new("a", DataType::Int64, false),
            ])),
            vec![
                Arc::new(StringArray::from(vec!["x", "y"])),
                Arc::new(Int64Array::from(vec![7, 8])),
                Arc::new(Int64Array::from(vec![5, 6])),
                Arc::new(Int64Array::from(vec![1, 2])),
            ],
        )
        .unwrap();

        let output = filler.apply(input.into()).unwrap();
        assert_eq!(int64_values(&output, "b"), vec![5, 6]);
        assert_eq!(int64_values(&output, "c"), vec![7, 8]);
        assert_eq!(output.schema().field(0).name(), "a");
        assert_eq!(output.schema().field(3).name(), "d");
    }

    #[test]
    fn test_missing_required_column_without_default() {
        let filler = DefaultFiller::new(requested_schema(), defaults(), state());
        let input = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("b", DataType::Int64, true)])),
            vec![Arc::new(Int64Array::from(vec![1]))],
        )
        .unwrap();
        assert!(matches!(
            filler.apply(input.into()),
            Err(UrlTableError::InvalidArgument(_))
        ));
    }

    fn omitted_rows(name: &str, mask: Vec<bool>) -> HashMap<String, BooleanArray> {
        HashMap::from([(name.to_string(), BooleanArray::from(mask))])
    }

    #[test]
    fn test_fill_omitted_values() {
        let filler = DefaultFiller::new(requested_schema(), defaults(), state());
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("a", DataType::Int64, true),
                Field::new("b", DataType::Int64, true),
                Field::new("c", DataType::Int64, true),
            ])),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(Int64Array::from(vec![None, Some(5), None])),
                Arc::new(Int64Array::from(vec![None, Some(6), Some(7)])),
            ],
        )
        .unwrap();
        let mut omitted = omitted_rows("b", vec![true, false, false]);
        omitted.extend(omitted_rows("c", vec![true, false, false]));

        let output = filler.apply(DecodedBatch { batch, omitted }).unwrap();
        assert_eq!(output.schema(), requested_schema());
        let b = output
            .column_by_name("b")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        // An explicit null is kept.
        assert_eq!(b.iter().collect::<Vec<_>>(), vec![Some(10), Some(5), None]);
        assert_eq!(int64_values(&output, "c"), vec![0, 6, 7]);
    }

    #[test]
    fn test_omitted_required_value_without_default() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
        let filler = DefaultFiller::new(schema, HashMap::new(), state());
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, true)])),
            vec![Arc::new(Int64Array::from(vec![Some(1), None]))],
        )
        .unwrap();
        let omitted = omitted_rows("a", vec![false, true]);
        assert!(matches!(
            filler.apply(DecodedBatch { batch, omitted }),
            Err(UrlTableError::InvalidArgument(_))
        ));
    }
}
