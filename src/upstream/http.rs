//! reqwest-backed executor posting `{query, variables}` to the GraphQL endpoint.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{queries::operation_name, GraphqlExecutor, UpstreamError};

pub const DEFAULT_ENDPOINT: &str = "https://app.birdweather.com/graphql";

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorMessage {
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpExecutor {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpExecutor {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("bird-buddy/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .context("building upstream http client")?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, query: &str, variables: Value) -> Result<Value, UpstreamError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
            });
        }

        let body: GraphqlResponse = resp.json().await?;
        if let Some(first) = body.errors.first() {
            return Err(UpstreamError::Graphql(
                first
                    .message
                    .clone()
                    .unwrap_or_else(|| "GraphQL error".to_string()),
            ));
        }
        body.data.ok_or(UpstreamError::EmptyData)
    }
}

#[async_trait]
impl GraphqlExecutor for HttpExecutor {
    async fn execute(&self, query: &str, variables: Value) -> Result<Value, UpstreamError> {
        let op = operation_name(query);
        counter!("upstream_calls_total").increment(1);

        let result = self.send(query, variables).await;

        if let Err(e) = &result {
            counter!("upstream_errors_total").increment(1);
            tracing::warn!(target: "upstream", operation = op, error = %e, "graphql call failed");
        } else {
            tracing::debug!(target: "upstream", operation = op, "graphql call ok");
        }
        result
    }

    fn name(&self) -> &'static str {
        "birdweather"
    }
}
