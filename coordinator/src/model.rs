//! Core data model for one coordinator run: requests, aggregated API calls,
//! gas targets and the accumulator state threaded through the pipeline.
//!
//! Pipeline stages never mutate a request in place; they produce new records.
//! A request's status only ever advances within one run.

use crate::config::ChainConfig;
use alloy_primitives::{Address, Bytes, B256, U256};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Decoded request parameters, reserved entries included.
pub type Parameters = Map<String, Value>;

/// Per-request authorization verdicts, merged across sources by logical OR.
/// A request absent from the map is undetermined, not denied.
pub type AuthorizationByRequestId = HashMap<B256, bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Blocked,
    Errored,
    Fulfilled,
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Request referencing a stored template by id.
    Template { template_id: B256 },
    /// Ad hoc request carrying the endpoint id directly.
    Full,
    /// Sponsor requested the balance of their sponsor wallet back.
    Withdrawal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignedResponse {
    pub encoded_value: Bytes,
    pub signature: Bytes,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub id: B256,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub chain_id: u64,
    pub block_number: u64,
    /// Chain height at scan time, used for confirmation-depth checks.
    pub current_block: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
    pub airnode: Address,
    pub requester: Address,
    pub requester_request_count: U256,
    pub sponsor: Address,
    pub sponsor_wallet: Address,
    pub fulfill_address: Address,
    pub fulfill_function_id: [u8; 4],
    pub encoded_parameters: Bytes,
    /// Decoded parameters; for template requests these are the template's
    /// parameters overlaid with the request's own.
    pub parameters: Parameters,
    /// Resolved endpoint id; populated at decode time for full requests and
    /// after template resolution for template requests.
    pub endpoint_id: Option<B256>,
    pub nonce: Option<u64>,
    pub error_message: Option<String>,
    pub response: Option<SignedResponse>,
    /// Hash of the submitted fulfillment or failure transaction.
    pub submission_hash: Option<B256>,
}

impl Request {
    pub fn confirmations(&self) -> u64 {
        self.current_block.saturating_sub(self.block_number)
    }

    pub fn is_api_call(&self) -> bool {
        !matches!(self.kind, RequestKind::Withdrawal)
    }

    /// Marks the request errored with the given message. Errored requests are
    /// still submitted, as on-chain failure transactions.
    pub fn errored(mut self, message: impl Into<String>) -> Self {
        self.status = RequestStatus::Errored;
        self.error_message = Some(message.into());
        self
    }
}

/// One API call per distinct (endpoint, parameters) tuple, merged across
/// requests that would otherwise duplicate the call.
#[derive(Debug, Clone)]
pub struct AggregatedApiCall {
    pub airnode: Address,
    pub endpoint_id: B256,
    pub parameters: Parameters,
    /// Request ids this call was aggregated from, in scan order.
    pub request_ids: Vec<B256>,
    pub outcome: Option<CallOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Success {
        encoded_value: Bytes,
        /// The upstream value before encoding, kept for the cache and logs.
        raw: Value,
    },
    Error {
        message: String,
    },
}

/// Fee target for transaction submission, chosen per chain per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasTarget {
    Legacy { gas_price: u128 },
    Eip1559 { max_priority_fee_per_gas: u128, max_fee_per_gas: u128 },
}

#[derive(Debug, Clone)]
pub struct ProviderState {
    pub chain: ChainConfig,
    pub current_block: u64,
    pub requests: Vec<Request>,
    pub authorization: AuthorizationByRequestId,
    pub gas_target: Option<GasTarget>,
}

impl ProviderState {
    pub fn new(chain: ChainConfig) -> Self {
        Self { chain, current_block: 0, requests: Vec::new(), authorization: HashMap::new(), gas_target: None }
    }
}

/// The orchestrator's accumulator. Each pipeline stage consumes the previous
/// state and returns a new one.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    pub providers: Vec<ProviderState>,
    pub aggregated_calls: Vec<AggregatedApiCall>,
}

impl CoordinatorState {
    pub fn has_actionable_requests(&self) -> bool {
        self.providers.iter().any(|provider| !provider.requests.is_empty())
    }
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;

    pub fn make_request(id_byte: u8) -> Request {
        Request {
            id: B256::repeat_byte(id_byte),
            kind: RequestKind::Full,
            status: RequestStatus::Pending,
            chain_id: 31337,
            block_number: 100,
            current_block: 110,
            log_index: 0,
            transaction_hash: B256::repeat_byte(0xf0),
            airnode: Address::repeat_byte(0xaa),
            requester: Address::repeat_byte(0xbb),
            requester_request_count: U256::from(1),
            sponsor: Address::repeat_byte(0xcc),
            sponsor_wallet: Address::repeat_byte(0xdd),
            fulfill_address: Address::repeat_byte(0xee),
            fulfill_function_id: [0x48, 0x13, 0xd7, 0x56],
            encoded_parameters: Bytes::new(),
            parameters: Parameters::new(),
            endpoint_id: Some(B256::repeat_byte(0x11)),
            nonce: None,
            error_message: None,
            response: None,
            submission_hash: None,
        }
    }
}
