//! Authorization resolution: decides, per request, whether the requester may
//! use the endpoint it asked for.
//!
//! Verdicts come from three kinds of sources: pre-declared grants in the
//! config, authorizer contracts consulted through the protocol contract
//! (on the request's own chain or a different one), and NFT-gated authorizer
//! contracts. A request authorized by any source is authorized; a request no
//! source could produce a verdict for stays undetermined and is left for the
//! next run rather than denied.

use crate::config::Erc721AuthorizerConfig;
use crate::constants::AUTHORIZATION_BATCH_SIZE;
use crate::evm::{AuthorizationProbe, Erc721Probe, RrpClient};
use crate::model::{AuthorizationByRequestId, Request, RequestStatus};
use crate::evm::error::EvmClientError;
use crate::retry::{go_if, GoOptions};
use alloy_primitives::{Address, B256};
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;

/// One source of on-chain authorization verdicts. Cross-chain sources carry a
/// client for the chain the authorizer lives on, not the request's chain.
#[derive(Clone)]
pub struct AuthorizerSet {
    pub client: Arc<dyn RrpClient>,
    pub source: AuthorizationSource,
}

#[derive(Clone)]
pub enum AuthorizationSource {
    /// Authorizer contracts consulted through a protocol contract's
    /// authorization check.
    Contract { authorizers: Vec<Address> },
    /// An NFT-gated authorizer; holding any listed token grants access.
    Erc721(Erc721Authorizer),
}

#[derive(Debug, Clone)]
pub struct Erc721Authorizer {
    pub authorizer: Address,
    /// Chain id the verdict applies to, as registered in the authorizer.
    pub chain_id: u64,
    pub tokens: Vec<Address>,
}

impl Erc721Authorizer {
    pub fn from_config(config: &Erc721AuthorizerConfig, chain_id: u64) -> Self {
        Self { authorizer: config.authorizer, chain_id, tokens: config.tokens.clone() }
    }
}

/// Resolves authorization for every pending API-call request. Withdrawals are
/// not subject to authorization and never appear in the result.
pub async fn fetch_authorizations(
    airnode: Address,
    sets: &[AuthorizerSet],
    allowlist: &HashMap<B256, Vec<Address>>,
    requests: &[Request],
) -> AuthorizationByRequestId {
    let candidates: Vec<&Request> = requests
        .iter()
        .filter(|request| request.status == RequestStatus::Pending && request.is_api_call())
        .filter(|request| request.endpoint_id.is_some())
        .collect();

    let mut verdicts = AuthorizationByRequestId::new();
    for request in &candidates {
        if is_allowlisted(allowlist, request) {
            verdicts.insert(request.id, true);
        }
    }

    let to_probe: Vec<&Request> = candidates.into_iter().filter(|request| !verdicts.contains_key(&request.id)).collect();
    if to_probe.is_empty() {
        return verdicts;
    }

    for set in sets {
        let fetched = match &set.source {
            AuthorizationSource::Contract { authorizers } => {
                fetch_contract_verdicts(set.client.as_ref(), authorizers, airnode, &to_probe).await
            }
            AuthorizationSource::Erc721(erc721) => {
                fetch_erc721_verdicts(set.client.as_ref(), erc721, airnode, &to_probe).await
            }
        };
        verdicts = merge_authorizations(verdicts, fetched);
    }
    verdicts
}

/// Merges two verdict maps by logical OR. Missing entries stay missing; the
/// merge never turns an absence into a denial.
pub fn merge_authorizations(
    mut base: AuthorizationByRequestId,
    other: AuthorizationByRequestId,
) -> AuthorizationByRequestId {
    for (request_id, verdict) in other {
        base.entry(request_id).and_modify(|existing| *existing = *existing || verdict).or_insert(verdict);
    }
    base
}

fn is_allowlisted(allowlist: &HashMap<B256, Vec<Address>>, request: &Request) -> bool {
    let Some(endpoint_id) = request.endpoint_id else { return false };
    allowlist.get(&endpoint_id).is_some_and(|requesters| requesters.contains(&request.requester))
}

fn probe_for(request: &Request) -> AuthorizationProbe {
    AuthorizationProbe {
        request_id: request.id,
        // Guarded by the caller's endpoint_id filter.
        endpoint_id: request.endpoint_id.unwrap_or_default(),
        sponsor: request.sponsor,
        requester: request.requester,
    }
}

/// Queries authorizer contracts in batches. A failed batch degrades to
/// per-request calls so one poisoned request cannot blind the whole batch;
/// requests whose individual call also fails are omitted.
async fn fetch_contract_verdicts(
    client: &dyn RrpClient,
    authorizers: &[Address],
    airnode: Address,
    requests: &[&Request],
) -> AuthorizationByRequestId {
    let mut verdicts = AuthorizationByRequestId::new();
    for chunk in &requests.iter().chunks(AUTHORIZATION_BATCH_SIZE) {
        let chunk: Vec<&Request> = chunk.copied().collect();
        let probes: Vec<AuthorizationProbe> = chunk.iter().map(|request| probe_for(request)).collect();

        let batch = go_if(
            || client.check_authorization_statuses(authorizers.to_vec(), airnode, probes.clone()),
            GoOptions::provider(),
            EvmClientError::is_recoverable,
        )
        .await;

        match batch {
            Ok(statuses) => {
                for (request, status) in chunk.iter().zip(statuses) {
                    verdicts.insert(request.id, status);
                }
            }
            Err(error) => {
                tracing::warn!(%error, batch_size = chunk.len(), "batched authorization check failed, retrying per request");
                for request in chunk {
                    let probe = probe_for(request);
                    match go_if(
                        || client.check_authorization_status(authorizers.to_vec(), airnode, probe),
                        GoOptions::provider(),
                        EvmClientError::is_recoverable,
                    )
                    .await
                    {
                        Ok(status) => {
                            verdicts.insert(request.id, status);
                        }
                        Err(error) => {
                            tracing::warn!(request_id = %request.id, %error, "authorization check failed, leaving undetermined");
                        }
                    }
                }
            }
        }
    }
    verdicts
}

/// Queries an NFT-gated authorizer for every (requester, token) pair; holding
/// any listed token authorizes the request. A failed batch leaves its
/// requests undetermined.
async fn fetch_erc721_verdicts(
    client: &dyn RrpClient,
    erc721: &Erc721Authorizer,
    airnode: Address,
    requests: &[&Request],
) -> AuthorizationByRequestId {
    let mut verdicts = AuthorizationByRequestId::new();
    if erc721.tokens.is_empty() {
        return verdicts;
    }
    for chunk in &requests.iter().chunks(AUTHORIZATION_BATCH_SIZE) {
        let chunk: Vec<&Request> = chunk.copied().collect();
        let probes: Vec<Erc721Probe> = chunk
            .iter()
            .flat_map(|request| {
                erc721.tokens.iter().map(|&token| Erc721Probe { requester: request.requester, token })
            })
            .collect();

        let batch = go_if(
            || client.check_erc721_authorizations(erc721.authorizer, airnode, erc721.chain_id, probes.clone()),
            GoOptions::provider(),
            EvmClientError::is_recoverable,
        )
        .await;

        match batch {
            Ok(results) => {
                for (request, token_results) in chunk.iter().zip(results.chunks(erc721.tokens.len())) {
                    verdicts.insert(request.id, token_results.iter().any(|&held| held));
                }
            }
            Err(error) => {
                tracing::warn!(%error, authorizer = %erc721.authorizer, "NFT authorization check failed, leaving undetermined");
            }
        }
    }
    verdicts
}
