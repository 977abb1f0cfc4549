//! Worker boundary for API calls. Each call runs on its own task so a
//! misbehaving endpoint (oversized response, panicking processing glue)
//! cannot take the coordinator down with it; a crashed worker surfaces as an
//! ordinary call failure.

use crate::api::{ApiCallError, ApiCallRunner, SuccessfulApiCall};
use crate::config::EndpointSpec;
use crate::model::AggregatedApiCall;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        call: AggregatedApiCall,
        endpoint: EndpointSpec,
    ) -> Result<SuccessfulApiCall, ApiCallError>;
}

/// Runs each call on a spawned tokio task within the coordinator process.
pub struct InProcessExecutor {
    runner: ApiCallRunner,
}

impl InProcessExecutor {
    pub fn new(runner: ApiCallRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl TaskExecutor for InProcessExecutor {
    async fn execute(
        &self,
        call: AggregatedApiCall,
        endpoint: EndpointSpec,
    ) -> Result<SuccessfulApiCall, ApiCallError> {
        let runner = self.runner.clone();
        let handle = tokio::spawn(async move { runner.run(&call, &endpoint).await });
        match handle.await {
            Ok(result) => result,
            Err(join_error) => {
                tracing::error!(%join_error, "API call worker crashed");
                Err(ApiCallError::Worker("API call worker crashed".into()))
            }
        }
    }
}
