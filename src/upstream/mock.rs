//! Scripted executor for tests and local runs (`UPSTREAM_TEST_MODE=mock`).
//!
//! Replies are routed by operation name. One-shot replies queued with
//! `enqueue` win over the sticky reply set with `set`; an operation with
//! neither answers with a GraphQL error.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use super::{queries::operation_name, GraphqlExecutor, UpstreamError};

#[derive(Debug, Clone)]
pub enum MockReply {
    Data(Value),
    Fail(String),
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub variables: Value,
}

#[derive(Debug, Default)]
struct MockState {
    sticky: HashMap<String, MockReply>,
    queued: HashMap<String, VecDeque<MockReply>>,
    calls: Vec<MockCall>,
}

#[derive(Debug, Default)]
pub struct MockExecutor {
    state: Mutex<MockState>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply for every call of `operation` until replaced.
    pub fn set(&self, operation: &str, reply: MockReply) {
        self.lock().sticky.insert(operation.to_string(), reply);
    }

    /// Reply for the next call of `operation` only.
    pub fn enqueue(&self, operation: &str, reply: MockReply) {
        self.lock()
            .queued
            .entry(operation.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// A mock preloaded with a small, plausible day of detections around `now`.
    pub fn with_demo_data(now: DateTime<Utc>) -> Self {
        let m = Self::new();
        m.set("detections", MockReply::Data(demo_detections(now)));
        m.set(
            "counts",
            MockReply::Data(json!({
                "counts": {"detections": 6, "species": 4, "stations": 2, "birdnet": 6}
            })),
        );
        m.set(
            "searchStations",
            MockReply::Data(json!({
                "stations": {
                    "nodes": [
                        {"id": "1001", "name": "Backyard Feeder", "location": "Ithaca, NY"},
                        {"id": "1002", "name": "Creek Trail", "location": "Ithaca, NY"}
                    ],
                    "totalCount": 2
                }
            })),
        );
        m
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl GraphqlExecutor for MockExecutor {
    async fn execute(&self, query: &str, variables: Value) -> Result<Value, UpstreamError> {
        let op = operation_name(query).to_string();
        let reply = {
            let mut st = self.lock();
            st.calls.push(MockCall {
                operation: op.clone(),
                variables,
            });
            let queued = st.queued.get_mut(&op).and_then(VecDeque::pop_front);
            queued.or_else(|| st.sticky.get(&op).cloned())
        };

        match reply {
            Some(MockReply::Data(v)) => Ok(v),
            Some(MockReply::Fail(msg)) => Err(UpstreamError::Graphql(msg)),
            None => Err(UpstreamError::Graphql(format!("no mock reply for {op}"))),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

fn demo_detections(now: DateTime<Utc>) -> Value {
    let at = |mins: i64| (now - Duration::minutes(mins)).to_rfc3339();
    let backyard = json!({"id": "1001", "name": "Backyard Feeder"});
    let creek = json!({"id": "1002", "name": "Creek Trail"});
    let nodes = vec![
        json!({"id": "d1", "timestamp": at(300), "confidence": 0.97, "score": 9.1,
               "species": {"id": "s-ovenbird", "commonName": "Ovenbird"}, "station": creek}),
        json!({"id": "d2", "timestamp": at(240), "confidence": 0.88, "score": 8.0,
               "species": {"id": "s-scarlet-tanager", "commonName": "Scarlet Tanager"}, "station": backyard}),
        json!({"id": "d3", "timestamp": at(200), "confidence": 0.81, "score": 7.4,
               "species": {"id": "s-house-finch", "commonName": "House Finch"}, "station": backyard}),
        json!({"id": "d4", "timestamp": at(120), "confidence": 0.77, "score": 7.0,
               "species": {"id": "s-house-finch", "commonName": "House Finch"}, "station": creek}),
        json!({"id": "d5", "timestamp": at(60), "confidence": 0.35, "score": 3.2,
               "species": {"id": "s-veery", "commonName": "Veery"}, "station": creek}),
        json!({"id": "d6", "timestamp": at(1800), "confidence": 0.99, "score": 9.9,
               "species": {"id": "s-snowy-owl", "commonName": "Snowy Owl"}, "station": backyard}),
    ];
    json!({ "detections": { "nodes": nodes, "totalCount": 6, "speciesCount": 5 } })
}
