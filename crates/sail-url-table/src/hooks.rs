use std::fmt::Debug;

use datafusion_expr::Expr;

pub use crate::transport::BodyWriter;
use crate::transport::HttpMethod;

/// What the query engine asks of a URL table for one read.
#[derive(Debug, Clone, Copy)]
pub struct ReadRequestInfo<'a> {
    pub columns: &'a [String],
    pub filters: &'a [Expr],
    pub batch_size: usize,
}

/// Customizes the request sent to the remote resource when a URL table is read.
///
/// Table variants use this to push column or filter information to the remote side,
/// either as query parameters or as the body of a `POST` request.
/// The read pipeline works the same way whether or not any of these are overridden.
pub trait ReadRequestHooks: Send + Sync + Debug {
    fn read_method(&self, _info: &ReadRequestInfo) -> HttpMethod {
        HttpMethod::Get
    }

    /// Query parameters appended to the table URL.
    fn read_uri_params(&self, _info: &ReadRequestInfo) -> Vec<(String, String)> {
        vec![]
    }

    fn read_post_body(&self, _info: &ReadRequestInfo) -> Option<BodyWriter> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultReadRequestHooks;

impl ReadRequestHooks for DefaultReadRequestHooks {}
