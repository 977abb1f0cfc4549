//! Transaction submission: the per-request state machine and per-sponsor
//! nonce assignment.
//!
//! Submission is the only stage with on-chain side effects, so its rules are
//! conservative: a request is only ever submitted with an explicitly assigned
//! nonce, fulfillments are simulated before being paid for, and a send that
//! fails after its retry leaves the request untouched for the next run.

use crate::api::gas_price_override;
use crate::constants::MAXIMUM_ONCHAIN_ERROR_LENGTH;
use crate::evm::error::EvmClientError;
use crate::evm::{FailArgs, FulfillArgs, RrpClient, StaticCallOutcome, WithdrawalArgs};
use crate::model::{GasTarget, Request, RequestKind, RequestStatus};
use crate::retry::{go_if, GoOptions};
use alloy_primitives::Address;

const NO_REVERT_STRING: &str = "No revert string";

/// Caps a failure message to the on-chain storage budget, ending in `...`
/// when it had to be cut. Counted in characters, not bytes, so a multi-byte
/// message is never split mid-character.
pub fn truncate_error_message(message: &str) -> String {
    if message.chars().count() <= MAXIMUM_ONCHAIN_ERROR_LENGTH {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(MAXIMUM_ONCHAIN_ERROR_LENGTH - 3).collect();
    truncated.push_str("...");
    truncated
}

/// Runs the submission state machine for one request and returns the request
/// with its resulting state.
pub async fn submit_request(client: &dyn RrpClient, request: Request, gas_target: &GasTarget) -> Request {
    match request.status {
        RequestStatus::Fulfilled | RequestStatus::Blocked | RequestStatus::Submitted => {
            tracing::debug!(request_id = %request.id, status = ?request.status, "nothing to submit");
            request
        }
        RequestStatus::Pending | RequestStatus::Errored if request.nonce.is_none() => {
            tracing::error!(request_id = %request.id, "request has no assigned nonce, skipping submission");
            request
        }
        RequestStatus::Errored => {
            let message = request.error_message.clone().unwrap_or_else(|| "Unknown error".to_string());
            submit_fail_transaction(client, request, gas_target, message).await
        }
        RequestStatus::Pending => match request.kind {
            RequestKind::Withdrawal => submit_withdrawal_transaction(client, request, gas_target).await,
            _ => submit_api_fulfillment(client, request, gas_target).await,
        },
    }
}

/// Assigns consecutive nonces to a sponsor wallet's submittable requests and
/// submits them in nonce order. The on-chain transaction count seeds the
/// sequence; if it cannot be read the whole group is skipped for this run.
pub async fn submit_sponsor_group(
    client: &dyn RrpClient,
    sponsor_wallet: Address,
    requests: Vec<Request>,
    gas_target: &GasTarget,
) -> Vec<Request> {
    let first_nonce = match go_if(
        || client.get_transaction_count(sponsor_wallet),
        GoOptions::provider(),
        EvmClientError::is_recoverable,
    )
    .await
    {
        Ok(count) => count,
        Err(error) => {
            tracing::warn!(%sponsor_wallet, %error, "transaction count unavailable, skipping sponsor group");
            return requests;
        }
    };

    let requests = assign_nonces(requests, first_nonce);
    let mut submitted = Vec::with_capacity(requests.len());
    // Sequential on purpose: a later nonce must not reach the pool first.
    for request in requests {
        submitted.push(submit_request(client, request, gas_target).await);
    }
    submitted
}

fn is_submittable(request: &Request) -> bool {
    match request.status {
        RequestStatus::Errored => true,
        RequestStatus::Pending => !request.is_api_call() || request.response.is_some(),
        _ => false,
    }
}

/// Submission order within a sponsor group: by block, API calls before the
/// same block's withdrawals, then by log index.
fn assign_nonces(mut requests: Vec<Request>, first_nonce: u64) -> Vec<Request> {
    requests.sort_by_key(|request| (request.block_number, !request.is_api_call(), request.log_index));
    let mut nonce = first_nonce;
    for request in requests.iter_mut() {
        if is_submittable(request) {
            request.nonce = Some(nonce);
            nonce += 1;
        }
    }
    requests
}

/// The per-request `_gasPrice` override forces a legacy-priced transaction.
fn effective_gas(request: &Request, gas_target: &GasTarget) -> GasTarget {
    match gas_price_override(&request.parameters) {
        Some(gas_price) => GasTarget::Legacy { gas_price },
        None => gas_target.clone(),
    }
}

async fn submit_api_fulfillment(client: &dyn RrpClient, mut request: Request, gas_target: &GasTarget) -> Request {
    let Some(nonce) = request.nonce else { return request };
    let Some(response) = request.response.clone() else {
        tracing::debug!(request_id = %request.id, "pending request has no response, leaving for the next run");
        return request;
    };

    let args = FulfillArgs {
        request_id: request.id,
        airnode: request.airnode,
        sponsor_wallet: request.sponsor_wallet,
        fulfill_address: request.fulfill_address,
        fulfill_function_id: request.fulfill_function_id,
        data: response.encoded_value,
        signature: response.signature,
    };

    let simulated =
        go_if(|| client.static_fulfill(args.clone()), GoOptions::provider(), EvmClientError::is_recoverable).await;
    match simulated {
        Ok(StaticCallOutcome::Success) => {
            let gas = effective_gas(&request, gas_target);
            let sent = go_if(
                || client.submit_fulfill(args.clone(), gas.clone(), nonce),
                GoOptions::provider(),
                EvmClientError::is_recoverable,
            )
            .await;
            match sent {
                Ok(hash) => {
                    tracing::info!(request_id = %request.id, transaction_hash = %hash, "fulfillment submitted");
                    request.status = RequestStatus::Submitted;
                    request.submission_hash = Some(hash);
                    request
                }
                Err(error) => {
                    tracing::warn!(request_id = %request.id, %error, "fulfillment send failed, leaving for the next run");
                    request
                }
            }
        }
        Ok(StaticCallOutcome::Revert { reason }) => {
            let message = reason.unwrap_or_else(|| NO_REVERT_STRING.to_string());
            tracing::info!(request_id = %request.id, %message, "fulfillment would revert, failing instead");
            submit_fail_transaction(client, request, gas_target, message).await
        }
        Err(error) => {
            tracing::warn!(request_id = %request.id, %error, "static fulfillment call failed, leaving for the next run");
            request
        }
    }
}

async fn submit_fail_transaction(
    client: &dyn RrpClient,
    mut request: Request,
    gas_target: &GasTarget,
    message: String,
) -> Request {
    let Some(nonce) = request.nonce else { return request };
    let args = FailArgs {
        request_id: request.id,
        airnode: request.airnode,
        sponsor_wallet: request.sponsor_wallet,
        fulfill_address: request.fulfill_address,
        fulfill_function_id: request.fulfill_function_id,
        error_message: truncate_error_message(&message),
    };
    let gas = effective_gas(&request, gas_target);
    let sent = go_if(
        || client.submit_fail(args.clone(), gas.clone(), nonce),
        GoOptions::provider(),
        EvmClientError::is_recoverable,
    )
    .await;
    match sent {
        Ok(hash) => {
            tracing::info!(request_id = %request.id, transaction_hash = %hash, "failure submitted");
            request.status = RequestStatus::Submitted;
            request.submission_hash = Some(hash);
            request
        }
        Err(error) => {
            tracing::warn!(request_id = %request.id, %error, "failure send failed, leaving for the next run");
            request
        }
    }
}

async fn submit_withdrawal_transaction(
    client: &dyn RrpClient,
    mut request: Request,
    gas_target: &GasTarget,
) -> Request {
    let Some(nonce) = request.nonce else { return request };
    let args = WithdrawalArgs {
        withdrawal_request_id: request.id,
        airnode: request.airnode,
        sponsor: request.sponsor,
        sponsor_wallet: request.sponsor_wallet,
    };
    let gas = effective_gas(&request, gas_target);
    let sent = go_if(
        || client.submit_withdrawal(args.clone(), gas.clone(), nonce),
        GoOptions::provider(),
        EvmClientError::is_recoverable,
    )
    .await;
    match sent {
        Ok(hash) => {
            tracing::info!(request_id = %request.id, transaction_hash = %hash, "withdrawal submitted");
            request.status = RequestStatus::Submitted;
            request.submission_hash = Some(hash);
            request
        }
        Err(error) => {
            tracing::warn!(request_id = %request.id, %error, "withdrawal send failed, leaving for the next run");
            request
        }
    }
}
