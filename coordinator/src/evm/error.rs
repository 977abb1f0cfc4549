use alloy::sol_types;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvmClientError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Contract interaction failed: {0}")]
    Contract(String),

    #[error("Event decoding error: {message} at block {block_number}")]
    EventDecoding { message: String, block_number: u64 },

    #[error("Missing field in response: {0}")]
    MissingField(&'static str),

    #[error("Gas price read failed: {message}")]
    GasPrice { message: String },

    #[error("Transaction send failed: {message}")]
    TransactionSend { message: String },
}

impl From<sol_types::Error> for EvmClientError {
    fn from(e: sol_types::Error) -> Self {
        EvmClientError::Contract(e.to_string())
    }
}

impl EvmClientError {
    /// True for transient network failures worth retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::GasPrice { .. } | Self::TransactionSend { .. })
    }
}
