//! In-memory [`CloudApi`] for tests: per-operation queues of canned replies.

use super::{CloudApi, Request};
use crate::error::ApiError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
pub struct ScriptedApi {
    replies: Mutex<HashMap<&'static str, VecDeque<Result<Value, ApiError>>>>,
    calls: Mutex<Vec<Request>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, operation: &'static str, value: Value) -> &Self {
        self.push(operation, Ok(value))
    }

    pub fn push_ok_times(&self, operation: &'static str, value: Value, n: usize) -> &Self {
        for _ in 0..n {
            self.push(operation, Ok(value.clone()));
        }
        self
    }

    pub fn push_err(&self, operation: &'static str, code: &str, message: &str) -> &Self {
        self.push(operation, Err(ApiError::new(operation, code, message)))
    }

    fn push(&self, operation: &'static str, reply: Result<Value, ApiError>) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(operation)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.operation == operation)
            .count()
    }

    /// Inputs sent to one operation, in order.
    pub fn inputs(&self, operation: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.operation == operation)
            .map(|r| r.input.clone())
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().values().map(VecDeque::len).sum()
    }
}

#[async_trait]
impl CloudApi for ScriptedApi {
    async fn call(&self, request: Request) -> Result<Value, ApiError> {
        let operation = request.operation;
        self.calls.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(ApiError::new(
                    operation,
                    "UnexpectedCall",
                    "no scripted reply left",
                ))
            })
    }
}
