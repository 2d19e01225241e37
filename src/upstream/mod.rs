//! Upstream GraphQL access: executor abstraction, error taxonomy and the
//! named operations. Everything above this module only sees typed results.

pub mod http;
pub mod mock;
pub mod queries;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use http::HttpExecutor;
pub use mock::{MockExecutor, MockReply};

/// Failures at the GraphQL boundary. Never propagated past the fetcher.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },

    #[error("graphql error: {0}")]
    Graphql(String),

    #[error("response has no data")]
    EmptyData,

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// `execute(query, variables) -> data`.
#[async_trait]
pub trait GraphqlExecutor: Send + Sync {
    async fn execute(&self, query: &str, variables: Value) -> Result<Value, UpstreamError>;
    fn name(&self) -> &'static str;
}

pub type SharedExecutor = Arc<dyn GraphqlExecutor>;

/// Execute and decode the `data` object into `T`.
pub async fn execute_typed<T: DeserializeOwned>(
    exec: &dyn GraphqlExecutor,
    query: &str,
    variables: Value,
) -> Result<T, UpstreamError> {
    let data = exec.execute(query, variables).await?;
    if data.is_null() {
        return Err(UpstreamError::EmptyData);
    }
    Ok(serde_json::from_value(data)?)
}
