use std::sync::Arc;

use datafusion::logical_expr::execution_props::ExecutionProps;
use datafusion::logical_expr::simplify::SimplifyContext;
use datafusion::optimizer::simplify_expressions::ExprSimplifier;
use datafusion_common::{DFSchema, ScalarValue};
use datafusion_expr::Expr;
use url::Url;

use crate::compression::CompressionPolicy;
use crate::error::{UrlTableError, UrlTableResult};
use crate::table::{TableConstraint, TableSchema, UrlTable, UrlTableContext};

/// Creates URL tables from the arguments of a table definition:
/// `URL(url, format [, compression])`.
#[derive(Debug, Clone)]
pub struct UrlTableFactory {
    context: Arc<UrlTableContext>,
}

impl UrlTableFactory {
    pub const ENGINE_NAME: &'static str = "URL";

    pub fn new(context: Arc<UrlTableContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<UrlTableContext> {
        &self.context
    }

    pub fn create(
        &self,
        args: &[Expr],
        schema: TableSchema,
        constraints: Vec<TableConstraint>,
    ) -> UrlTableResult<UrlTable> {
        let [url, format, rest @ ..] = args else {
            return Err(UrlTableError::ArgumentCount(args.len()));
        };
        if rest.len() > 1 {
            return Err(UrlTableError::ArgumentCount(args.len()));
        }
        let props = ExecutionProps::new();
        let simplifier = ExprSimplifier::new(
            SimplifyContext::new(&props).with_schema(Arc::new(DFSchema::empty())),
        );
        let url = evaluate_string(&simplifier, url, "URL")?;
        let uri = Url::parse(&url)?;
        let format = evaluate_string(&simplifier, format, "format name")?;
        let compression = match rest.first() {
            Some(arg) => evaluate_string(&simplifier, arg, "compression method")?.parse()?,
            None => CompressionPolicy::Auto,
        };
        UrlTable::try_new(
            uri,
            &format,
            compression,
            schema,
            constraints,
            self.context.clone(),
        )
    }
}

fn evaluate_string(
    simplifier: &ExprSimplifier<SimplifyContext<'_>>,
    expr: &Expr,
    what: &str,
) -> UrlTableResult<String> {
    match simplifier.simplify(expr.clone())? {
        Expr::Literal(
            ScalarValue::Utf8(Some(value))
            | ScalarValue::LargeUtf8(Some(value))
            | ScalarValue::Utf8View(Some(value)),
        ) => Ok(value),
        other => Err(UrlTableError::invalid(format!(
            "{what} must be a constant string, got {other}"
        ))),
    }
}
