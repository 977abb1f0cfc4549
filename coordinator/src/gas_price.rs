//! Per-chain gas targeting for one run's submissions.
//!
//! EIP-1559 chains get a fee cap derived from the latest base fee; chains
//! without a base fee fall back to the legacy gas price. Failing to obtain
//! either yields no target, which blocks submission for the chain rather than
//! sending at an arbitrary price.

use crate::constants::{BASE_FEE_MULTIPLIER_PERCENT, PRIORITY_FEE_WEI};
use crate::evm::RrpClient;
use crate::model::GasTarget;
use crate::evm::error::EvmClientError;
use crate::retry::{go_if, GoOptions};

#[derive(Debug, Clone)]
pub struct GasPriceOptions {
    /// Percentage applied to the latest base fee, 100 meaning unchanged.
    pub base_fee_multiplier_percent: u128,
    pub priority_fee_wei: u128,
}

impl Default for GasPriceOptions {
    fn default() -> Self {
        Self { base_fee_multiplier_percent: BASE_FEE_MULTIPLIER_PERCENT, priority_fee_wei: PRIORITY_FEE_WEI }
    }
}

pub async fn get_gas_target(client: &dyn RrpClient, options: &GasPriceOptions) -> Option<GasTarget> {
    match go_if(|| client.get_latest_base_fee(), GoOptions::provider(), EvmClientError::is_recoverable).await {
        Ok(Some(base_fee)) => {
            let max_fee_per_gas =
                base_fee.saturating_mul(options.base_fee_multiplier_percent) / 100 + options.priority_fee_wei;
            return Some(GasTarget::Eip1559 { max_priority_fee_per_gas: options.priority_fee_wei, max_fee_per_gas });
        }
        Ok(None) => {
            tracing::debug!("chain reports no base fee, falling back to legacy gas price");
        }
        Err(error) => {
            tracing::warn!(%error, "base fee read failed, falling back to legacy gas price");
        }
    }

    match go_if(|| client.get_gas_price(), GoOptions::provider(), EvmClientError::is_recoverable).await {
        Ok(gas_price) => Some(GasTarget::Legacy { gas_price }),
        Err(error) => {
            tracing::warn!(%error, "gas price unavailable, submissions for this chain will be skipped");
            None
        }
    }
}
