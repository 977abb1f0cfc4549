//! Chain scanning: reads the recent block window for protocol events and turns
//! them into [`Request`] records ready for authorization and execution.
//!
//! Every request id and template id is recomputed and checked against the
//! claimed value before the request is acted on. Requests made to a different
//! airnode than the configured one are ignored entirely.

use crate::config::ChainConfig;
use crate::constants::BLOCK_HISTORY_LIMIT;
use crate::evm::error::EvmClientError;
use crate::evm::verification::{derive_request_id, verify_template_id};
use crate::evm::{AirnodeRrp, LogMetadata, RrpClient, RrpLog, Template};
use crate::model::{Parameters, Request, RequestKind, RequestStatus};
use crate::retry::{go_if, GoError, GoOptions};
use alloy_primitives::{Address, Bytes, B256, U256};
use futures::future::join_all;
use std::collections::HashMap;

#[derive(Debug)]
pub struct ScanOutput {
    pub current_block: u64,
    pub requests: Vec<Request>,
}

/// Scans the last [`BLOCK_HISTORY_LIMIT`] blocks of `chain` for requests made
/// to `airnode`. Failures to reach the chain are fatal for the whole chain;
/// failures confined to a single request degrade that request instead.
pub async fn scan_requests(
    client: &dyn RrpClient,
    chain: &ChainConfig,
    airnode: Address,
) -> Result<ScanOutput, GoError<EvmClientError>> {
    let current_block =
        go_if(|| client.get_latest_block_number(), GoOptions::provider(), EvmClientError::is_recoverable).await?;
    let from_block = current_block.saturating_sub(BLOCK_HISTORY_LIMIT);

    let logs = go_if(
        || client.get_rrp_logs(from_block, current_block),
        GoOptions::provider(),
        EvmClientError::is_recoverable,
    )
    .await?;
    tracing::debug!(chain_id = chain.id, from_block, current_block, count = logs.len(), "fetched protocol logs");

    let mut requests = Vec::with_capacity(logs.len());
    for log in logs {
        let Some(request) = request_from_log(log, chain, airnode, current_block) else { continue };
        requests.push(request);
    }

    let requests = resolve_templates(client, requests).await;
    Ok(ScanOutput { current_block, requests })
}

fn request_from_log(log: RrpLog, chain: &ChainConfig, airnode: Address, current_block: u64) -> Option<Request> {
    let request = match log {
        RrpLog::TemplateRequest(meta, event) => {
            if event.airnode != airnode {
                return None;
            }
            from_template_event(meta, event, chain, current_block)
        }
        RrpLog::FullRequest(meta, event) => {
            if event.airnode != airnode {
                return None;
            }
            from_full_event(meta, event, chain, current_block)
        }
        RrpLog::Withdrawal(meta, event) => {
            if event.airnode != airnode {
                return None;
            }
            return Some(from_withdrawal_event(meta, event, chain, current_block));
        }
    };
    Some(verify_id(request, chain.contract_address))
}

fn from_template_event(
    meta: LogMetadata,
    event: AirnodeRrp::MadeTemplateRequest,
    chain: &ChainConfig,
    current_block: u64,
) -> Request {
    let (parameters, decode_error) = decode_parameters(&event.parameters);
    let request = Request {
        id: event.requestId,
        kind: RequestKind::Template { template_id: event.templateId },
        status: RequestStatus::Pending,
        chain_id: chain.id,
        block_number: meta.block_number,
        current_block,
        log_index: meta.log_index,
        transaction_hash: meta.transaction_hash,
        airnode: event.airnode,
        requester: event.requester,
        requester_request_count: event.requesterRequestCount,
        sponsor: event.sponsor,
        sponsor_wallet: event.sponsorWallet,
        fulfill_address: event.fulfillAddress,
        fulfill_function_id: event.fulfillFunctionId.0,
        encoded_parameters: event.parameters,
        parameters,
        endpoint_id: None,
        nonce: None,
        error_message: None,
        response: None,
        submission_hash: None,
    };
    match decode_error {
        Some(message) => request.errored(message),
        None => request,
    }
}

fn from_full_event(
    meta: LogMetadata,
    event: AirnodeRrp::MadeFullRequest,
    chain: &ChainConfig,
    current_block: u64,
) -> Request {
    let (parameters, decode_error) = decode_parameters(&event.parameters);
    let request = Request {
        id: event.requestId,
        kind: RequestKind::Full,
        status: RequestStatus::Pending,
        chain_id: chain.id,
        block_number: meta.block_number,
        current_block,
        log_index: meta.log_index,
        transaction_hash: meta.transaction_hash,
        airnode: event.airnode,
        requester: event.requester,
        requester_request_count: event.requesterRequestCount,
        sponsor: event.sponsor,
        sponsor_wallet: event.sponsorWallet,
        fulfill_address: event.fulfillAddress,
        fulfill_function_id: event.fulfillFunctionId.0,
        encoded_parameters: event.parameters,
        parameters,
        endpoint_id: Some(event.endpointId),
        nonce: None,
        error_message: None,
        response: None,
        submission_hash: None,
    };
    match decode_error {
        Some(message) => request.errored(message),
        None => request,
    }
}

fn from_withdrawal_event(
    meta: LogMetadata,
    event: AirnodeRrp::RequestedWithdrawal,
    chain: &ChainConfig,
    current_block: u64,
) -> Request {
    Request {
        id: event.withdrawalRequestId,
        kind: RequestKind::Withdrawal,
        status: RequestStatus::Pending,
        chain_id: chain.id,
        block_number: meta.block_number,
        current_block,
        log_index: meta.log_index,
        transaction_hash: meta.transaction_hash,
        airnode: event.airnode,
        requester: event.sponsor,
        requester_request_count: U256::ZERO,
        sponsor: event.sponsor,
        sponsor_wallet: event.sponsorWallet,
        fulfill_address: Address::ZERO,
        fulfill_function_id: [0; 4],
        encoded_parameters: Bytes::new(),
        parameters: Parameters::new(),
        endpoint_id: None,
        nonce: None,
        error_message: None,
        response: None,
        submission_hash: None,
    }
}

/// Decodes the JSON parameter payload. Decode failure leaves the request with
/// empty parameters and an error message; it will be failed on chain rather
/// than dropped, so the requester learns why.
fn decode_parameters(encoded: &Bytes) -> (Parameters, Option<&'static str>) {
    if encoded.is_empty() {
        return (Parameters::new(), None);
    }
    match serde_json::from_slice::<Parameters>(encoded) {
        Ok(parameters) => (parameters, None),
        Err(_) => (Parameters::new(), Some("Invalid request parameters")),
    }
}

fn verify_id(request: Request, contract_address: Address) -> Request {
    match derive_request_id(&request, contract_address) {
        Some(derived) if derived != request.id => {
            tracing::warn!(request_id = %request.id, "request id does not match its fields");
            request.errored("Request ID verification failed")
        }
        _ => request,
    }
}

/// Resolves templates for all template requests in one batch, verifies each
/// against its claimed id and overlays the template parameters with the
/// request's own (request wins on conflict).
async fn resolve_templates(client: &dyn RrpClient, requests: Vec<Request>) -> Vec<Request> {
    let template_ids: Vec<B256> = {
        let mut seen = HashMap::new();
        requests
            .iter()
            .filter(|request| request.status == RequestStatus::Pending)
            .filter_map(|request| match request.kind {
                RequestKind::Template { template_id } => {
                    seen.insert(template_id, ()).is_none().then_some(template_id)
                }
                _ => None,
            })
            .collect()
    };
    if template_ids.is_empty() {
        return requests;
    }

    let fetches = template_ids.iter().map(|&id| async move {
        let result = go_if(|| client.get_template(id), GoOptions::provider(), EvmClientError::is_recoverable).await;
        (id, result)
    });
    let templates: HashMap<B256, Result<Option<Template>, GoError<EvmClientError>>> =
        join_all(fetches).await.into_iter().collect();

    requests
        .into_iter()
        .map(|request| {
            let RequestKind::Template { template_id } = request.kind else { return request };
            if request.status != RequestStatus::Pending {
                return request;
            }
            match templates.get(&template_id) {
                Some(Ok(Some(template))) => apply_template(request, template),
                Some(Ok(None)) => request.errored("Template not found"),
                Some(Err(error)) => {
                    tracing::warn!(template_id = %template_id, %error, "template fetch failed");
                    request.errored("Failed to fetch template")
                }
                None => request.errored("Failed to fetch template"),
            }
        })
        .collect()
}

fn apply_template(mut request: Request, template: &Template) -> Request {
    if !verify_template_id(template.id, template.airnode, template.endpoint_id, &template.encoded_parameters) {
        return request.errored("Template verification failed");
    }
    let (template_parameters, decode_error) = decode_parameters(&template.encoded_parameters);
    if let Some(message) = decode_error {
        return request.errored(message);
    }
    let mut merged = template_parameters;
    for (key, value) in std::mem::take(&mut request.parameters) {
        merged.insert(key, value);
    }
    request.parameters = merged;
    request.endpoint_id = Some(template.endpoint_id);
    request
}
