use crate::api::ApiCallError;
use crate::config::ConfigError;
use crate::evm::error::EvmClientError;
use crate::retry::GoError;
use thiserror::Error;

/// Top-level error for coordinator setup. A running pipeline never surfaces
/// these: stage failures are folded into the run's state instead.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Evm(#[from] EvmClientError),

    #[error(transparent)]
    ApiCall(#[from] ApiCallError),

    #[error("Transaction send failed: {0}")]
    TransactionSend(String),
}

impl From<GoError<EvmClientError>> for CoordinatorError {
    fn from(error: GoError<EvmClientError>) -> Self {
        match error {
            GoError::Inner(inner) => CoordinatorError::Evm(inner),
            other => CoordinatorError::Evm(EvmClientError::Rpc(other.to_string())),
        }
    }
}
