//! HTTP transport for endpoint calls. Everything the upstream API could do
//! wrong is flattened into a small error set; the pipeline never sees a raw
//! transport error.

use crate::config::{ApiCredentials, CredentialsLocation, HttpMethod, HttpOperation};
use crate::constants::API_CALL_TIMEOUT;
use crate::model::Parameters;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("Failed to build the API request")]
    RequestBuild,
    #[error("No response from the API")]
    NoResponse,
    #[error("API responded with status {0}")]
    UnexpectedStatus(u16),
}

/// Seam between the executor and the upstream API.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApiAdapter: Send + Sync {
    async fn call(
        &self,
        operation: HttpOperation,
        credentials: Option<ApiCredentials>,
        parameters: Parameters,
    ) -> Result<Value, AdapterError>;
}

pub struct HttpAdapter {
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new() -> Result<Self, AdapterError> {
        let client =
            reqwest::Client::builder().timeout(API_CALL_TIMEOUT).build().map_err(|_| AdapterError::RequestBuild)?;
        Ok(Self { client })
    }
}

/// GET parameters are flattened to strings; JSON strings lose their quotes,
/// everything else keeps its JSON rendering.
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ApiAdapter for HttpAdapter {
    async fn call(
        &self,
        operation: HttpOperation,
        credentials: Option<ApiCredentials>,
        parameters: Parameters,
    ) -> Result<Value, AdapterError> {
        let mut request = match operation.method {
            HttpMethod::Get => {
                let pairs: Vec<(String, String)> =
                    parameters.iter().map(|(key, value)| (key.clone(), query_value(value))).collect();
                self.client.get(operation.url.clone()).query(&pairs)
            }
            HttpMethod::Post => self.client.post(operation.url.clone()).json(&parameters),
        };

        if let Some(credentials) = credentials {
            request = match credentials.location {
                CredentialsLocation::Query => request.query(&[(credentials.name, credentials.value)]),
                CredentialsLocation::Header => request.header(credentials.name.as_str(), credentials.value.as_str()),
            };
        }

        let response = request
            .send()
            .await
            .map_err(|e| if e.is_builder() { AdapterError::RequestBuild } else { AdapterError::NoResponse })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::UnexpectedStatus(status.as_u16()));
        }
        response.json::<Value>().await.map_err(|_| AdapterError::NoResponse)
    }
}
