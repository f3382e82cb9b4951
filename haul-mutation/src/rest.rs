//! REST write adapter.
//!
//! Turns HTTP failures into [`RawError`]s the classifier understands:
//! non-2xx responses keep their status and body, transport failures become
//! network errors.

use haul_core::RawError;
use reqwest::Method;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Future returned by [`RestWriter::write_fn`] closures.
pub type WriteFuture = Pin<Box<dyn Future<Output = Result<Value, RawError>> + Send>>;

#[derive(Debug, Clone)]
pub struct RestWriter {
    client: reqwest::Client,
    base_url: String,
}

impl RestWriter {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value, RawError> {
        self.send(Method::PUT, path, body).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, RawError> {
        self.send(Method::POST, path, body).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<Value, RawError> {
        self.send(Method::PATCH, path, body).await
    }

    /// A write function for [`MutationExecutor::execute`](crate::MutationExecutor::execute)
    /// that sends the mutation variables as the JSON body.
    pub fn write_fn(
        &self,
        method: Method,
        path: impl Into<String>,
    ) -> impl FnOnce(Value) -> WriteFuture + Send + 'static {
        let writer = self.clone();
        let path = path.into();
        move |variables: Value| -> WriteFuture {
            Box::pin(async move { writer.send(method, &path, variables).await })
        }
    }

    async fn send(&self, method: Method, path: &str, body: Value) -> Result<Value, RawError> {
        let response = self
            .client
            .request(method, self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|err| RawError::network(err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RawError::network(err.to_string()))?;

        if !status.is_success() {
            return Err(RawError::from_response(status.as_u16(), &bytes));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|err| RawError {
            status: Some(status.as_u16()),
            body: None,
            message: format!("Invalid response body: {}", err),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_joins_slashes() {
        let writer = RestWriter::new("http://localhost:8080/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(writer.url("/orders/1"), "http://localhost:8080/api/orders/1");
        assert_eq!(writer.url("orders/1"), "http://localhost:8080/api/orders/1");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let writer = RestWriter::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = writer.put("/orders/1", json!({"status": "DONE"})).await.unwrap_err();
        assert!(err.is_network());
    }
}
