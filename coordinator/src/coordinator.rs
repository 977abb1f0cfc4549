//! The nine-stage coordinator pipeline.
//!
//! Each stage is a transform over [`CoordinatorState`]; a run never raises
//! past this module. Chains that fail to scan, price gas or submit simply
//! contribute less to the final state, which is always returned as a report.

use crate::aggregation::{aggregate_api_calls, apply_call_outcomes};
use crate::api::worker::TaskExecutor;
use crate::api::{execute_aggregated_calls, min_confirmations_override, ExecutionContext, ResponseSigner};
use crate::authorization::{fetch_authorizations, AuthorizationSource, AuthorizerSet, Erc721Authorizer};
use crate::cache::ResponseCache;
use crate::config::{ChainConfig, Config};
use crate::constants::BLOCK_HISTORY_LIMIT;
use crate::error::CoordinatorError;
use crate::evm::error::EvmClientError;
use crate::evm::{EvmRrpClient, EvmRrpClientConfig, RrpClient};
use crate::gas_price::{get_gas_target, GasPriceOptions};
use crate::retry::{go_if, GoOptions};
use crate::model::{AuthorizationByRequestId, CoordinatorState, ProviderState, Request, RequestStatus};
use crate::scanner::scan_requests;
use crate::submitter::submit_sponsor_group;
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, B256};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One watched chain: its config, a client for it, and the authorization
/// sources that apply to its requests (cross-chain sources carry their own
/// clients).
#[derive(Clone)]
pub struct ChainContext {
    pub config: ChainConfig,
    pub client: Arc<dyn RrpClient>,
    pub authorizer_sets: Vec<AuthorizerSet>,
}

impl ChainContext {
    /// Builds the context with the chain's own authorization sources.
    /// Cross-chain sources are added with [`ChainContext::with_authorizer_set`]
    /// once their clients exist.
    pub fn new(config: ChainConfig, client: Arc<dyn RrpClient>) -> Self {
        let mut authorizer_sets = Vec::new();
        if !config.authorizers.is_empty() {
            authorizer_sets.push(AuthorizerSet {
                client: client.clone(),
                source: AuthorizationSource::Contract { authorizers: config.authorizers.clone() },
            });
        }
        for erc721 in &config.erc721_authorizers {
            authorizer_sets.push(AuthorizerSet {
                client: client.clone(),
                source: AuthorizationSource::Erc721(Erc721Authorizer::from_config(erc721, config.id)),
            });
        }
        Self { config, client, authorizer_sets }
    }

    pub fn with_authorizer_set(mut self, set: AuthorizerSet) -> Self {
        self.authorizer_sets.push(set);
        self
    }

    /// Wires up the chain's cross-chain authorization sources from a map of
    /// clients keyed by the chain the authorizer lives on. Sources without a
    /// client are skipped with a warning; their verdicts stay undetermined.
    pub fn with_cross_chain_sources(mut self, clients: &HashMap<u64, Arc<dyn RrpClient>>) -> Self {
        for cross in &self.config.cross_chain_authorizers {
            let Some(client) = clients.get(&cross.chain_id) else {
                tracing::warn!(chain_id = cross.chain_id, "no client for cross-chain authorizers, skipping source");
                continue;
            };
            self.authorizer_sets.push(AuthorizerSet {
                client: client.clone(),
                source: AuthorizationSource::Contract { authorizers: cross.authorizers.clone() },
            });
        }
        for cross in &self.config.cross_chain_erc721_authorizers {
            let Some(client) = clients.get(&cross.chain_id) else {
                tracing::warn!(chain_id = cross.chain_id, "no client for cross-chain NFT authorizer, skipping source");
                continue;
            };
            self.authorizer_sets.push(AuthorizerSet {
                client: client.clone(),
                source: AuthorizationSource::Erc721(Erc721Authorizer {
                    authorizer: cross.authorizer,
                    // Verdicts are registered against the requests' own chain.
                    chain_id: self.config.id,
                    tokens: cross.tokens.clone(),
                }),
            });
        }
        self
    }
}

async fn connect(config: EvmRrpClientConfig) -> Result<Arc<dyn RrpClient>, CoordinatorError> {
    let client =
        go_if(|| EvmRrpClient::new(config.clone()), GoOptions::provider(), EvmClientError::is_recoverable).await?;
    Ok(Arc::new(client))
}

pub struct Coordinator {
    config: Config,
    chains: Vec<ChainContext>,
    executor: Arc<dyn TaskExecutor>,
    cache: Arc<dyn ResponseCache>,
    signer: Arc<dyn ResponseSigner>,
}

impl Coordinator {
    pub fn new(
        config: Config,
        chains: Vec<ChainContext>,
        executor: Arc<dyn TaskExecutor>,
        cache: Arc<dyn ResponseCache>,
        signer: Arc<dyn ResponseSigner>,
    ) -> Self {
        Self { config, chains, executor, cache, signer }
    }

    /// Builds the coordinator from its config, connecting one client per
    /// watched chain plus read-only clients for every cross-chain
    /// authorization source. Connecting is retried like any other provider
    /// call; a chain that cannot be reached fails construction.
    pub async fn from_config(
        config: Config,
        sponsor_wallet_signers: Vec<PrivateKeySigner>,
        executor: Arc<dyn TaskExecutor>,
        cache: Arc<dyn ResponseCache>,
        signer: Arc<dyn ResponseSigner>,
    ) -> Result<Self, CoordinatorError> {
        let mut chains = Vec::with_capacity(config.chains.len());
        for chain in &config.chains {
            let client = connect(EvmRrpClientConfig {
                url: chain.provider_url.clone(),
                contract_address: chain.contract_address,
                chain_id: chain.id,
                sponsor_wallet_signers: sponsor_wallet_signers.clone(),
            })
            .await?;

            let mut cross_chain_clients: HashMap<u64, Arc<dyn RrpClient>> = HashMap::new();
            for cross in &chain.cross_chain_authorizers {
                let client = connect(EvmRrpClientConfig {
                    url: cross.provider_url.clone(),
                    contract_address: cross.contract_address,
                    chain_id: cross.chain_id,
                    sponsor_wallet_signers: Vec::new(),
                })
                .await?;
                cross_chain_clients.insert(cross.chain_id, client);
            }
            for cross in &chain.cross_chain_erc721_authorizers {
                if cross_chain_clients.contains_key(&cross.chain_id) {
                    continue;
                }
                // NFT checks go through Multicall3; the contract existence
                // check runs against the authorizer deployment.
                let client = connect(EvmRrpClientConfig {
                    url: cross.provider_url.clone(),
                    contract_address: cross.authorizer,
                    chain_id: cross.chain_id,
                    sponsor_wallet_signers: Vec::new(),
                })
                .await?;
                cross_chain_clients.insert(cross.chain_id, client);
            }

            chains.push(ChainContext::new(chain.clone(), client).with_cross_chain_sources(&cross_chain_clients));
        }
        Ok(Self::new(config, chains, executor, cache, signer))
    }

    /// Runs one full pipeline pass and returns the terminal state.
    pub async fn run(&self) -> CoordinatorState {
        tracing::info!(chains = self.chains.len(), "coordinator run started");

        // Stages 1-2: initial state and provider initialization.
        let providers = join_all(self.chains.iter().map(|chain| self.initialize_provider(chain))).await;
        let mut state = CoordinatorState { providers, aggregated_calls: Vec::new() };

        // Stage 3: nothing to do, report the unchanged state.
        if !state.has_actionable_requests() {
            tracing::info!("no actionable requests, run finished");
            return state;
        }

        // Stage 4: per-chain request ceiling.
        for provider in &mut state.providers {
            let ceiling = provider.chain.max_requests;
            if provider.requests.len() > ceiling {
                tracing::info!(
                    chain_id = provider.chain.id,
                    dropped = provider.requests.len() - ceiling,
                    "applying per-chain request ceiling"
                );
                provider.requests.truncate(ceiling);
            }
        }

        // Stage 5: aggregate duplicate API calls across chains.
        let all_requests: Vec<Request> =
            state.providers.iter().flat_map(|provider| provider.requests.iter().cloned()).collect();
        state.aggregated_calls = aggregate_api_calls(&all_requests);

        // Stage 6: confirmation-depth filtering.
        apply_confirmation_filter(&mut state);

        // Stage 7: execute the aggregated calls.
        let ctx = ExecutionContext {
            executor: self.executor.as_ref(),
            cache: self.cache.as_ref(),
            config: &self.config,
        };
        state.aggregated_calls = execute_aggregated_calls(&ctx, std::mem::take(&mut state.aggregated_calls)).await;

        // Stage 8: map outcomes back onto the originating requests.
        for provider in &mut state.providers {
            let requests = std::mem::take(&mut provider.requests);
            provider.requests = apply_call_outcomes(requests, &state.aggregated_calls, self.signer.as_ref()).await;
        }

        // Stage 9: submit per (provider, sponsor wallet) and merge.
        self.submit(&mut state).await;

        tracing::info!("coordinator run finished");
        state
    }

    async fn initialize_provider(&self, chain: &ChainContext) -> ProviderState {
        let mut provider = ProviderState::new(chain.config.clone());
        let scan = match scan_requests(chain.client.as_ref(), &chain.config, self.config.airnode).await {
            Ok(scan) => scan,
            Err(error) => {
                tracing::error!(chain_id = chain.config.id, %error, "scan failed, skipping chain this run");
                return provider;
            }
        };
        provider.current_block = scan.current_block;

        provider.authorization = if chain.config.has_no_authorizers() {
            // No authorization source declared: everything is authorized.
            scan.requests
                .iter()
                .filter(|request| request.status == RequestStatus::Pending && request.is_api_call())
                .map(|request| (request.id, true))
                .collect()
        } else {
            fetch_authorizations(
                self.config.airnode,
                &chain.authorizer_sets,
                &chain.config.authorizations,
                &scan.requests,
            )
            .await
        };
        provider.requests = apply_authorization(scan.requests, &provider.authorization);
        provider
    }

    async fn submit(&self, state: &mut CoordinatorState) {
        let submissions = self.chains.iter().zip(state.providers.iter_mut()).map(|(chain, provider)| async move {
            if provider.requests.is_empty() {
                return;
            }
            let Some(gas_target) = get_gas_target(chain.client.as_ref(), &GasPriceOptions::default()).await else {
                tracing::warn!(chain_id = chain.config.id, "no gas target, skipping submission for this chain");
                return;
            };
            provider.gas_target = Some(gas_target.clone());

            let mut groups: HashMap<Address, Vec<Request>> = HashMap::new();
            for request in std::mem::take(&mut provider.requests) {
                groups.entry(request.sponsor_wallet).or_default().push(request);
            }
            let gas_target = &gas_target;
            let submitted = join_all(groups.into_iter().map(|(sponsor_wallet, requests)| async move {
                submit_sponsor_group(chain.client.as_ref(), sponsor_wallet, requests, gas_target).await
            }))
            .await;
            provider.requests = submitted.into_iter().flatten().collect();
        });
        join_all(submissions).await;
    }
}

/// Denied requests are failed on chain so the requester learns why;
/// undetermined ones are dropped untouched and picked up again next run.
fn apply_authorization(requests: Vec<Request>, verdicts: &AuthorizationByRequestId) -> Vec<Request> {
    requests
        .into_iter()
        .filter_map(|request| {
            if request.status != RequestStatus::Pending || !request.is_api_call() {
                return Some(request);
            }
            match verdicts.get(&request.id) {
                Some(true) => Some(request),
                Some(false) => Some(request.errored("Unauthorized requester")),
                None => {
                    tracing::warn!(request_id = %request.id, "authorization undetermined, leaving request for the next run");
                    None
                }
            }
        })
        .collect()
}

/// Drops requests below their required confirmation depth. A per-request
/// override beats the chain default; an override beyond the scan window can
/// never be satisfied and drops the request outright instead of being
/// clamped. The aggregated-call table is pruned to the survivors.
fn apply_confirmation_filter(state: &mut CoordinatorState) {
    let mut dropped: HashSet<B256> = HashSet::new();
    for provider in &mut state.providers {
        let chain_default = provider.chain.minimum_confirmations;
        provider.requests.retain(|request| {
            let required = match min_confirmations_override(&request.parameters) {
                Some(value) if value > BLOCK_HISTORY_LIMIT => {
                    tracing::warn!(
                        request_id = %request.id,
                        value,
                        "minimum confirmations override exceeds the scan window, dropping request"
                    );
                    dropped.insert(request.id);
                    return false;
                }
                Some(value) => value,
                None => chain_default,
            };
            if request.confirmations() >= required {
                true
            } else {
                dropped.insert(request.id);
                false
            }
        });
    }
    state.aggregated_calls.retain_mut(|call| {
        call.request_ids.retain(|id| !dropped.contains(id));
        !call.request_ids.is_empty()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::adapter::MockApiAdapter;
    use crate::api::processing::NoProcessingRuntime;
    use crate::api::worker::{InProcessExecutor, MockTaskExecutor};
    use crate::api::{AirnodeSigner, ApiCallRunner, MockResponseSigner, SuccessfulApiCall};
    use crate::cache::InMemoryCache;
    use crate::evm::{AirnodeRrp, LogMetadata, MockRrpClient, RrpLog, StaticCallOutcome};
    use crate::model::{CallOutcome, GasTarget, RequestKind};
    use alloy::signers::local::PrivateKeySigner;
    use alloy::sol_types::SolValue;
    use alloy_primitives::{hex, keccak256, Bytes, FixedBytes, Signature, U256};
    use serde_json::json;

    fn config(airnode: Address, chain_yaml: &str) -> Config {
        let mut config: Config = Config::from_yaml_str(&format!(
            r#"
airnode: "0x0000000000000000000000000000000000000000"
chains:
{chain_yaml}
endpoints:
  "0x1111111111111111111111111111111111111111111111111111111111111111":
    operation:
      method: GET
      url: "https://api.example.com/price"
"#
        ))
        .unwrap();
        config.airnode = airnode;
        config
    }

    const CHAIN_BASIC: &str = r#"
  - id: 31337
    provider_url: "http://localhost:8545"
    contract_address: "0x0101010101010101010101010101010101010101"
"#;

    fn full_request_event(airnode: Address, chain: &ChainConfig, parameters: &str) -> AirnodeRrp::MadeFullRequest {
        let endpoint_id = B256::repeat_byte(0x11);
        let requester = Address::repeat_byte(0xbb);
        let sponsor = Address::repeat_byte(0xcc);
        let sponsor_wallet = Address::repeat_byte(0xdd);
        let fulfill_address = Address::repeat_byte(0xee);
        let function_id = FixedBytes::<4>::from([0x48, 0x13, 0xd7, 0x56]);
        let parameters = Bytes::from(parameters.as_bytes().to_vec());
        let request_id = keccak256(
            (
                U256::from(chain.id),
                chain.contract_address,
                requester,
                U256::from(1),
                airnode,
                endpoint_id,
                sponsor,
                sponsor_wallet,
                fulfill_address,
                function_id,
                parameters.clone(),
            )
                .abi_encode_packed(),
        );
        AirnodeRrp::MadeFullRequest {
            airnode,
            requestId: request_id,
            requesterRequestCount: U256::from(1),
            chainId: U256::from(chain.id),
            requester,
            endpointId: endpoint_id,
            sponsor,
            sponsorWallet: sponsor_wallet,
            fulfillAddress: fulfill_address,
            fulfillFunctionId: function_id,
            parameters,
        }
    }

    fn scanning_client(logs: Vec<RrpLog>) -> MockRrpClient {
        let mut client = MockRrpClient::new();
        client.expect_get_latest_block_number().returning(|| Ok(500));
        client.expect_get_rrp_logs().returning(move |_, _| Ok(logs.clone()));
        client
    }

    fn meta(block_number: u64, log_index: u64) -> LogMetadata {
        LogMetadata { block_number, log_index, transaction_hash: B256::repeat_byte(0x77) }
    }

    #[tokio::test]
    async fn fulfills_a_request_end_to_end() {
        let airnode_signer = AirnodeSigner::new(PrivateKeySigner::random());
        let airnode = airnode_signer.address();
        let config = config(airnode, CHAIN_BASIC);
        let chain_config = config.chains[0].clone();

        let event = full_request_event(
            airnode,
            &chain_config,
            r#"{"_type":"int256","_path":"price","_times":"100000","from":"ETH"}"#,
        );
        let request_id = event.requestId;

        let mut client = scanning_client(vec![RrpLog::FullRequest(meta(450, 0), event)]);
        client.expect_get_latest_base_fee().returning(|| Ok(Some(50_000_000_000)));
        client.expect_get_transaction_count().returning(|_| Ok(3));
        client.expect_static_fulfill().returning(|_| Ok(StaticCallOutcome::Success));
        client
            .expect_submit_fulfill()
            .withf(move |args, _, nonce| args.request_id == request_id && *nonce == 3)
            .returning(|_, _, _| Ok(B256::repeat_byte(0xf1)));

        let mut adapter = MockApiAdapter::new();
        adapter.expect_call().times(1).returning(|_, _, sent| {
            assert_eq!(sent.get("from"), Some(&json!("ETH")));
            assert!(!sent.contains_key("_type"));
            Ok(json!({"price": 1000}))
        });

        let executor = InProcessExecutor::new(ApiCallRunner {
            adapter: Arc::new(adapter),
            processing: Arc::new(NoProcessingRuntime),
        });
        let coordinator = Coordinator::new(
            config,
            vec![ChainContext::new(chain_config, Arc::new(client))],
            Arc::new(executor),
            Arc::new(InMemoryCache::new()),
            Arc::new(airnode_signer),
        );

        let state = coordinator.run().await;
        let request = &state.providers[0].requests[0];
        assert_eq!(request.status, RequestStatus::Submitted);
        assert_eq!(request.submission_hash, Some(B256::repeat_byte(0xf1)));

        let response = request.response.as_ref().unwrap();
        assert_eq!(
            response.encoded_value,
            Bytes::from(hex::decode("0000000000000000000000000000000000000000000000000000000005f5e100").unwrap())
        );
        let signature = Signature::try_from(response.signature.as_ref()).unwrap();
        let mut message = request_id.to_vec();
        message.extend_from_slice(&response.encoded_value);
        assert_eq!(signature.recover_address_from_msg(keccak256(&message).as_slice()).unwrap(), airnode);

        assert!(matches!(state.aggregated_calls[0].outcome, Some(CallOutcome::Success { .. })));
    }

    #[tokio::test]
    async fn a_denied_request_is_failed_on_chain() {
        let airnode = Address::repeat_byte(0xaa);
        let chain_yaml = r#"
  - id: 31337
    provider_url: "http://localhost:8545"
    contract_address: "0x0101010101010101010101010101010101010101"
    authorizers:
      - "0x0505050505050505050505050505050505050505"
"#;
        let config = config(airnode, chain_yaml);
        let chain_config = config.chains[0].clone();

        let event = full_request_event(airnode, &chain_config, r#"{"_type":"int256","_path":"price"}"#);
        let mut client = scanning_client(vec![RrpLog::FullRequest(meta(450, 0), event)]);
        client.expect_check_authorization_statuses().returning(|_, _, probes| Ok(vec![false; probes.len()]));
        client.expect_get_latest_base_fee().returning(|| Ok(None));
        client.expect_get_gas_price().returning(|| Ok(1_000_000_000));
        client.expect_get_transaction_count().returning(|_| Ok(0));
        client
            .expect_submit_fail()
            .withf(|args, _, _| args.error_message == "Unauthorized requester")
            .returning(|_, _, _| Ok(B256::repeat_byte(0xf2)));

        let coordinator = Coordinator::new(
            config,
            vec![ChainContext::new(chain_config, Arc::new(client))],
            Arc::new(MockTaskExecutor::new()),
            Arc::new(InMemoryCache::new()),
            Arc::new(MockResponseSigner::new()),
        );

        let state = coordinator.run().await;
        let request = &state.providers[0].requests[0];
        assert_eq!(request.status, RequestStatus::Submitted);
        assert_eq!(state.providers[0].gas_target, Some(GasTarget::Legacy { gas_price: 1_000_000_000 }));
    }

    #[tokio::test]
    async fn an_empty_scan_short_circuits_the_run() {
        let airnode = Address::repeat_byte(0xaa);
        let config = config(airnode, CHAIN_BASIC);
        let chain_config = config.chains[0].clone();
        let client = scanning_client(vec![]);

        let coordinator = Coordinator::new(
            config,
            vec![ChainContext::new(chain_config, Arc::new(client))],
            Arc::new(MockTaskExecutor::new()),
            Arc::new(InMemoryCache::new()),
            Arc::new(MockResponseSigner::new()),
        );

        let state = coordinator.run().await;
        assert_eq!(state.providers.len(), 1);
        assert!(state.providers[0].requests.is_empty());
        assert!(state.aggregated_calls.is_empty());
    }

    #[tokio::test]
    async fn unconfirmed_requests_are_dropped_with_their_aggregated_calls() {
        let airnode = Address::repeat_byte(0xaa);
        let chain_yaml = r#"
  - id: 31337
    provider_url: "http://localhost:8545"
    contract_address: "0x0101010101010101010101010101010101010101"
    minimum_confirmations: 60
"#;
        let config = config(airnode, chain_yaml);
        let chain_config = config.chains[0].clone();

        // Scanned at block 500, emitted at 450: only 50 confirmations.
        let event = full_request_event(airnode, &chain_config, r#"{"_type":"int256","_path":"price"}"#);
        let client = scanning_client(vec![RrpLog::FullRequest(meta(450, 0), event)]);

        let coordinator = Coordinator::new(
            config,
            vec![ChainContext::new(chain_config, Arc::new(client))],
            Arc::new(MockTaskExecutor::new()),
            Arc::new(InMemoryCache::new()),
            Arc::new(MockResponseSigner::new()),
        );

        let state = coordinator.run().await;
        assert!(state.providers[0].requests.is_empty());
        assert!(state.aggregated_calls.is_empty());
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn an_oversized_confirmation_override_drops_the_request() {
        let airnode = Address::repeat_byte(0xaa);
        let config = config(airnode, CHAIN_BASIC);
        let chain_config = config.chains[0].clone();

        let event = full_request_event(
            airnode,
            &chain_config,
            r#"{"_minConfirmations":"500","_path":"price","_type":"int256"}"#,
        );
        let client = scanning_client(vec![RrpLog::FullRequest(meta(450, 0), event)]);

        let coordinator = Coordinator::new(
            config,
            vec![ChainContext::new(chain_config, Arc::new(client))],
            Arc::new(MockTaskExecutor::new()),
            Arc::new(InMemoryCache::new()),
            Arc::new(MockResponseSigner::new()),
        );

        let state = coordinator.run().await;
        assert!(state.providers[0].requests.is_empty());
        assert!(logs_contain("minimum confirmations override exceeds the scan window"));
    }

    #[tokio::test]
    async fn the_request_ceiling_caps_each_chain() {
        let airnode = Address::repeat_byte(0xaa);
        let chain_yaml = r#"
  - id: 31337
    provider_url: "http://localhost:8545"
    contract_address: "0x0101010101010101010101010101010101010101"
    max_requests: 1
"#;
        let config = config(airnode, chain_yaml);
        let chain_config = config.chains[0].clone();

        let first = full_request_event(airnode, &chain_config, r#"{"_type":"int256","_path":"price","a":"1"}"#);
        let second = full_request_event(airnode, &chain_config, r#"{"_type":"int256","_path":"price","a":"2"}"#);
        let mut client = scanning_client(vec![
            RrpLog::FullRequest(meta(450, 0), first),
            RrpLog::FullRequest(meta(450, 1), second),
        ]);
        client.expect_get_latest_base_fee().returning(|| Ok(Some(1_000_000_000)));
        client.expect_get_transaction_count().returning(|_| Ok(0));
        client.expect_static_fulfill().returning(|_| Ok(StaticCallOutcome::Success));
        client.expect_submit_fulfill().times(1).returning(|_, _, _| Ok(B256::repeat_byte(0xf3)));

        let mut executor = MockTaskExecutor::new();
        executor.expect_execute().times(1).returning(|_, _| {
            Ok(SuccessfulApiCall { encoded_value: Bytes::from(vec![0x07]), raw: json!(7) })
        });
        let mut signer = MockResponseSigner::new();
        signer.expect_sign_response().returning(|_, _| Ok(Bytes::from(vec![0x55])));

        let coordinator = Coordinator::new(
            config,
            vec![ChainContext::new(chain_config, Arc::new(client))],
            Arc::new(executor),
            Arc::new(InMemoryCache::new()),
            Arc::new(signer),
        );

        let state = coordinator.run().await;
        assert_eq!(state.providers[0].requests.len(), 1);
        assert_eq!(state.providers[0].requests[0].status, RequestStatus::Submitted);
    }

    #[tokio::test]
    async fn a_withdrawal_is_submitted_alongside_api_calls() {
        let airnode = Address::repeat_byte(0xaa);
        let config = config(airnode, CHAIN_BASIC);
        let chain_config = config.chains[0].clone();

        let withdrawal = AirnodeRrp::RequestedWithdrawal {
            airnode,
            sponsor: Address::repeat_byte(0xcc),
            withdrawalRequestId: B256::repeat_byte(0x55),
            sponsorWallet: Address::repeat_byte(0xdd),
        };
        let mut client = scanning_client(vec![RrpLog::Withdrawal(meta(480, 0), withdrawal)]);
        client.expect_get_latest_base_fee().returning(|| Ok(Some(1_000_000_000)));
        client.expect_get_transaction_count().returning(|_| Ok(0));
        client
            .expect_submit_withdrawal()
            .withf(|args, _, nonce| args.withdrawal_request_id == B256::repeat_byte(0x55) && *nonce == 0)
            .returning(|_, _, _| Ok(B256::repeat_byte(0xf4)));

        let coordinator = Coordinator::new(
            config,
            vec![ChainContext::new(chain_config, Arc::new(client))],
            Arc::new(MockTaskExecutor::new()),
            Arc::new(InMemoryCache::new()),
            Arc::new(MockResponseSigner::new()),
        );

        let state = coordinator.run().await;
        let request = &state.providers[0].requests[0];
        assert_eq!(request.kind, RequestKind::Withdrawal);
        assert_eq!(request.status, RequestStatus::Submitted);
    }

    #[test]
    fn cross_chain_sources_are_attached_when_a_client_exists() {
        let chain_yaml = r#"
  - id: 31337
    provider_url: "http://localhost:8545"
    contract_address: "0x0101010101010101010101010101010101010101"
    cross_chain_authorizers:
      - chain_id: 1
        provider_url: "http://localhost:8546"
        contract_address: "0x0202020202020202020202020202020202020202"
        authorizers:
          - "0x0505050505050505050505050505050505050505"
    cross_chain_erc721_authorizers:
      - chain_id: 1
        provider_url: "http://localhost:8546"
        authorizer: "0x0606060606060606060606060606060606060606"
        tokens:
          - "0x0707070707070707070707070707070707070707"
      - chain_id: 10
        provider_url: "http://localhost:8547"
        authorizer: "0x0808080808080808080808080808080808080808"
        tokens: []
"#;
        let config = config(Address::repeat_byte(0xaa), chain_yaml);
        let chain_config = config.chains[0].clone();

        let mut clients: HashMap<u64, Arc<dyn RrpClient>> = HashMap::new();
        clients.insert(1, Arc::new(MockRrpClient::new()));
        // No client for chain 10, so its source is skipped.
        let context =
            ChainContext::new(chain_config, Arc::new(MockRrpClient::new())).with_cross_chain_sources(&clients);

        assert_eq!(context.authorizer_sets.len(), 2);
        let nft = context
            .authorizer_sets
            .iter()
            .find_map(|set| match &set.source {
                AuthorizationSource::Erc721(erc721) => Some(erc721),
                AuthorizationSource::Contract { .. } => None,
            })
            .unwrap();
        assert_eq!(nft.chain_id, 31337);
        assert_eq!(nft.tokens, vec![Address::repeat_byte(0x07)]);
    }

    #[tokio::test]
    async fn construction_fails_when_a_chain_provider_is_unreachable() {
        // Port 9 (discard) has no listener, so the contract existence check
        // cannot be performed and construction must surface the failure.
        let chain_yaml = r#"
  - id: 31337
    provider_url: "http://127.0.0.1:9"
    contract_address: "0x0101010101010101010101010101010101010101"
"#;
        let config = config(Address::repeat_byte(0xaa), chain_yaml);

        let result = Coordinator::from_config(
            config,
            Vec::new(),
            Arc::new(MockTaskExecutor::new()),
            Arc::new(InMemoryCache::new()),
            Arc::new(MockResponseSigner::new()),
        )
        .await;
        assert!(matches!(result, Err(CoordinatorError::Evm(_))));
    }
}
