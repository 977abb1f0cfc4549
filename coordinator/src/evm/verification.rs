//! Recomputation of the protocol contract's id hashes.
//!
//! A template id is the hash of `(airnode, endpointId, encodedParameters)`;
//! a request id is the hash of the full request tuple. Both must be
//! recomputed identically to the contract so that a template (or request)
//! mutated or mis-declared after creation is caught instead of trusted.

use crate::model::{Request, RequestKind};
use alloy_primitives::{keccak256, Address, Bytes, FixedBytes, B256, U256};
use alloy::sol_types::SolValue;

pub fn derive_template_id(airnode: Address, endpoint_id: B256, encoded_parameters: &Bytes) -> B256 {
    keccak256((airnode, endpoint_id, encoded_parameters.clone()).abi_encode_packed())
}

/// Recomputes a request's id from its decoded fields. Returns `None` for
/// withdrawal requests, whose ids are derived differently by the contract and
/// are not re-verified here.
pub fn derive_request_id(request: &Request, contract_address: Address) -> Option<B256> {
    let function_id = FixedBytes::<4>::from(request.fulfill_function_id);
    let encoded = match &request.kind {
        RequestKind::Template { template_id } => (
            U256::from(request.chain_id),
            contract_address,
            request.requester,
            request.requester_request_count,
            *template_id,
            request.sponsor,
            request.sponsor_wallet,
            request.fulfill_address,
            function_id,
            request.encoded_parameters.clone(),
        )
            .abi_encode_packed(),
        RequestKind::Full => (
            U256::from(request.chain_id),
            contract_address,
            request.requester,
            request.requester_request_count,
            request.airnode,
            request.endpoint_id?,
            request.sponsor,
            request.sponsor_wallet,
            request.fulfill_address,
            function_id,
            request.encoded_parameters.clone(),
        )
            .abi_encode_packed(),
        RequestKind::Withdrawal => return None,
    };
    Some(keccak256(encoded))
}

/// Checks a resolved template against its claimed id.
pub fn verify_template_id(
    template_id: B256,
    airnode: Address,
    endpoint_id: B256,
    encoded_parameters: &Bytes,
) -> bool {
    derive_template_id(airnode, endpoint_id, encoded_parameters) == template_id
}
