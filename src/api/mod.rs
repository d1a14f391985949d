//! ST-020: Cloud API abstraction.
//!
//! Handlers talk to AWS through [`CloudApi`], passed explicitly in the
//! handler context. Requests and responses are the API's own JSON shapes.

pub mod awscli;
#[cfg(test)]
pub mod scripted;

use crate::error::ApiError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// One remote API call.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// CLI service name, e.g. `autoscaling`, `eks`, `deploy`.
    pub service: &'static str,
    /// API operation name in PascalCase, e.g. `DescribeInstanceRefreshes`.
    pub operation: &'static str,
    pub input: Value,
}

impl Request {
    pub fn new(service: &'static str, operation: &'static str, input: Value) -> Self {
        Self {
            service,
            operation,
            input,
        }
    }
}

#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn call(&self, request: Request) -> Result<Value, ApiError>;
}

/// Call and decode the response body into `T`.
pub async fn call_as<T: DeserializeOwned>(
    api: &dyn CloudApi,
    request: Request,
) -> Result<T, ApiError> {
    let operation = request.operation;
    let value = api.call(request).await?;
    decode_response(operation, value)
}

pub fn decode_response<T: DeserializeOwned>(operation: &str, value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::decode(operation, format!("unexpected response shape: {e}")))
}
