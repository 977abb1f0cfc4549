//! Pre/post-processing seam. Processing snippets are user-supplied code run
//! against the input parameters (pre) or the raw API response (post); the
//! runtime that executes them is injected, since embedding an interpreter is
//! a deployment decision, not a pipeline one.

use crate::config::ProcessingSpec;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessingError {
    #[error("Processing failed: {0}")]
    Failed(String),
    #[error("Processing timed out")]
    TimedOut,
}

/// Runs a chain of processing snippets over a JSON value. Callers bound the
/// whole chain with the processing timeout.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProcessingRunner: Send + Sync {
    async fn run(&self, specs: Vec<ProcessingSpec>, input: Value) -> Result<Value, ProcessingError>;
}

/// Default runner for deployments without an embedded interpreter: passes the
/// value through untouched when there is nothing to run and refuses anything
/// else, so misconfigured processing fails loudly instead of silently.
#[derive(Debug, Default)]
pub struct NoProcessingRuntime;

#[async_trait]
impl ProcessingRunner for NoProcessingRuntime {
    async fn run(&self, specs: Vec<ProcessingSpec>, input: Value) -> Result<Value, ProcessingError> {
        if specs.is_empty() {
            return Ok(input);
        }
        Err(ProcessingError::Failed("No processing runtime is configured".into()))
    }
}
