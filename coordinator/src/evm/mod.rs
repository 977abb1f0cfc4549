//! EVM access layer: contract bindings, the [`RrpClient`] trait every pipeline
//! stage talks through, and its alloy-backed implementation.
//!
//! The trait exists so the scanner, authorization and submission stages can be
//! exercised against a mock without a chain. The implementation keeps two
//! providers: a plain one for reads and a wallet-filled one that signs
//! submissions with the sponsor wallet selected via the `from` field.

pub mod error;
pub mod verification;

use crate::model::GasTarget;
use alloy::contract::{CallBuilder, CallDecoder};
use alloy::eips::BlockNumberOrTag;
use alloy::network::{Ethereum, EthereumWallet};
use alloy::providers::fillers::{FillProvider, JoinFill, WalletFiller};
use alloy::providers::{Identity, Provider, ProviderBuilder, ReqwestProvider, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use alloy::transports::http::{Client, Http};
use alloy::transports::Transport;
use alloy_primitives::{address, Address, Bytes, FixedBytes, B256, U256};
use async_trait::async_trait;
use error::EvmClientError;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use url::Url;

sol!(
    #[sol(rpc)]
    #[derive(Debug)]
    contract AirnodeRrp {
        event MadeTemplateRequest(
            address indexed airnode,
            bytes32 indexed requestId,
            uint256 requesterRequestCount,
            uint256 chainId,
            address requester,
            bytes32 templateId,
            address sponsor,
            address sponsorWallet,
            address fulfillAddress,
            bytes4 fulfillFunctionId,
            bytes parameters
        );

        event MadeFullRequest(
            address indexed airnode,
            bytes32 indexed requestId,
            uint256 requesterRequestCount,
            uint256 chainId,
            address requester,
            bytes32 endpointId,
            address sponsor,
            address sponsorWallet,
            address fulfillAddress,
            bytes4 fulfillFunctionId,
            bytes parameters
        );

        event RequestedWithdrawal(
            address indexed airnode,
            address indexed sponsor,
            bytes32 indexed withdrawalRequestId,
            address sponsorWallet
        );

        function templates(bytes32 templateId)
            external
            view
            returns (address airnode, bytes32 endpointId, bytes parameters);

        function checkAuthorizationStatus(
            address[] authorizers,
            address airnode,
            bytes32 requestId,
            bytes32 endpointId,
            address sponsor,
            address requester
        ) external view returns (bool status);

        function checkAuthorizationStatuses(
            address[] authorizers,
            address airnode,
            bytes32[] requestIds,
            bytes32[] endpointIds,
            address[] sponsors,
            address[] requesters
        ) external view returns (bool[] statuses);

        function fulfill(
            bytes32 requestId,
            address airnode,
            address fulfillAddress,
            bytes4 fulfillFunctionId,
            bytes data,
            bytes signature
        ) external returns (bool callSuccess, bytes callData);

        function fail(
            bytes32 requestId,
            address airnode,
            address fulfillAddress,
            bytes4 fulfillFunctionId,
            string errorMessage
        ) external;

        function fulfillWithdrawal(bytes32 withdrawalRequestId, address airnode, address sponsor) external payable;
    }
);

sol!(
    #[sol(rpc)]
    #[derive(Debug)]
    contract RequesterAuthorizerWithErc721 {
        function isAuthorized(
            address airnode,
            uint256 chainId,
            address requester,
            address token
        ) external view returns (bool);
    }
);

sol!(
    #[sol(rpc)]
    #[derive(Debug)]
    contract Multicall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Result[] memory returnData);
    }
);

/// Multicall3 is deployed at the same address on every supported chain.
pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

/// `Error(string)` selector, the solc revert-reason encoding.
const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogMetadata {
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
}

/// A decoded protocol event, paired with where it was emitted.
#[derive(Debug, Clone)]
pub enum RrpLog {
    TemplateRequest(LogMetadata, AirnodeRrp::MadeTemplateRequest),
    FullRequest(LogMetadata, AirnodeRrp::MadeFullRequest),
    Withdrawal(LogMetadata, AirnodeRrp::RequestedWithdrawal),
}

/// A request template as stored on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub id: B256,
    pub airnode: Address,
    pub endpoint_id: B256,
    pub encoded_parameters: Bytes,
}

/// The per-request tuple the protocol contract's authorization check takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationProbe {
    pub request_id: B256,
    pub endpoint_id: B256,
    pub sponsor: Address,
    pub requester: Address,
}

/// One NFT-gate check: does `requester` hold a token of this collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Erc721Probe {
    pub requester: Address,
    pub token: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillArgs {
    pub request_id: B256,
    pub airnode: Address,
    pub sponsor_wallet: Address,
    pub fulfill_address: Address,
    pub fulfill_function_id: [u8; 4],
    pub data: Bytes,
    pub signature: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailArgs {
    pub request_id: B256,
    pub airnode: Address,
    pub sponsor_wallet: Address,
    pub fulfill_address: Address,
    pub fulfill_function_id: [u8; 4],
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalArgs {
    pub withdrawal_request_id: B256,
    pub airnode: Address,
    pub sponsor: Address,
    pub sponsor_wallet: Address,
}

/// Result of simulating a fulfillment before paying for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticCallOutcome {
    Success,
    Revert { reason: Option<String> },
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RrpClient: Send + Sync {
    async fn get_latest_block_number(&self) -> Result<u64, EvmClientError>;

    /// Fetches and decodes all protocol events in `[from_block, to_block]`.
    async fn get_rrp_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RrpLog>, EvmClientError>;

    /// Reads a template from contract storage. `None` when no template with
    /// this id has been created.
    async fn get_template(&self, template_id: B256) -> Result<Option<Template>, EvmClientError>;

    /// Runs the contract's authorizer loop for a batch of requests. The result
    /// is positionally aligned with `probes`.
    async fn check_authorization_statuses(
        &self,
        authorizers: Vec<Address>,
        airnode: Address,
        probes: Vec<AuthorizationProbe>,
    ) -> Result<Vec<bool>, EvmClientError>;

    /// Single-request variant, used to salvage individual verdicts when a
    /// batched call fails.
    async fn check_authorization_status(
        &self,
        authorizers: Vec<Address>,
        airnode: Address,
        probe: AuthorizationProbe,
    ) -> Result<bool, EvmClientError>;

    /// Checks NFT-gated authorization for a batch of (requester, token) pairs
    /// through Multicall3. A probe whose inner call reverts counts as denied.
    async fn check_erc721_authorizations(
        &self,
        authorizer: Address,
        airnode: Address,
        chain_id: u64,
        probes: Vec<Erc721Probe>,
    ) -> Result<Vec<bool>, EvmClientError>;

    /// Base fee of the latest block; `None` on pre-EIP-1559 chains.
    async fn get_latest_base_fee(&self) -> Result<Option<u128>, EvmClientError>;

    async fn get_gas_price(&self) -> Result<u128, EvmClientError>;

    async fn get_transaction_count(&self, address: Address) -> Result<u64, EvmClientError>;

    /// Simulates the fulfillment without submitting it.
    async fn static_fulfill(&self, args: FulfillArgs) -> Result<StaticCallOutcome, EvmClientError>;

    async fn submit_fulfill(&self, args: FulfillArgs, gas: GasTarget, nonce: u64) -> Result<B256, EvmClientError>;

    async fn submit_fail(&self, args: FailArgs, gas: GasTarget, nonce: u64) -> Result<B256, EvmClientError>;

    /// Sends the sponsor wallet's balance, less the transaction cost, back to
    /// the sponsor through the protocol contract.
    async fn submit_withdrawal(&self, args: WithdrawalArgs, gas: GasTarget, nonce: u64)
        -> Result<B256, EvmClientError>;
}

type HttpTransport = Http<Client>;
type WalletProvider =
    FillProvider<JoinFill<Identity, WalletFiller<EthereumWallet>>, RootProvider<HttpTransport>, HttpTransport, Ethereum>;

#[derive(Clone)]
pub struct EvmRrpClientConfig {
    pub url: Url,
    pub contract_address: Address,
    pub chain_id: u64,
    /// Signers for every sponsor wallet submissions may be sent from. The
    /// wallet used per transaction is selected by the `from` address.
    pub sponsor_wallet_signers: Vec<PrivateKeySigner>,
}

pub struct EvmRrpClient {
    provider: Arc<ReqwestProvider>,
    rrp: AirnodeRrp::AirnodeRrpInstance<HttpTransport, RootProvider<HttpTransport>>,
    /// Absent for read-only clients, e.g. the ones pointed at cross-chain
    /// authorizer deployments.
    rrp_write: Option<AirnodeRrp::AirnodeRrpInstance<HttpTransport, WalletProvider>>,
    chain_id: u64,
}

impl EvmRrpClient {
    pub async fn new(config: EvmRrpClientConfig) -> Result<Self, EvmClientError> {
        let provider = ProviderBuilder::new().on_http(config.url.clone());
        // Check if contract exists
        if provider
            .get_code_at(config.contract_address)
            .await
            .map_err(|e| EvmClientError::Rpc(e.to_string()))?
            .is_empty()
        {
            return Err(EvmClientError::Contract("Protocol contract not found at given address".into()));
        }

        let mut signers = config.sponsor_wallet_signers.into_iter();
        let rrp_write = signers.next().map(|first| {
            let mut wallet = EthereumWallet::from(first);
            for signer in signers {
                wallet.register_signer(signer);
            }
            let wallet_provider = ProviderBuilder::new().wallet(wallet).on_http(config.url);
            AirnodeRrp::new(config.contract_address, wallet_provider)
        });

        let rrp = AirnodeRrp::new(config.contract_address, provider.clone());
        Ok(Self { provider: Arc::new(provider), rrp, rrp_write, chain_id: config.chain_id })
    }

    fn writer(&self) -> Result<&AirnodeRrp::AirnodeRrpInstance<HttpTransport, WalletProvider>, EvmClientError> {
        self.rrp_write
            .as_ref()
            .ok_or_else(|| EvmClientError::TransactionSend { message: "Client has no sponsor wallet signers".into() })
    }

    fn metadata(log: &alloy::rpc::types::Log) -> Result<LogMetadata, EvmClientError> {
        Ok(LogMetadata {
            block_number: log.block_number.ok_or(EvmClientError::MissingField("block_number"))?,
            log_index: log.log_index.ok_or(EvmClientError::MissingField("log_index"))?,
            transaction_hash: log.transaction_hash.ok_or(EvmClientError::MissingField("transaction_hash"))?,
        })
    }

    fn decode_log<E: SolEvent>(log: &alloy::rpc::types::Log, block_number: u64) -> Result<E, EvmClientError> {
        log.log_decode::<E>()
            .map(|decoded| decoded.inner.data)
            .map_err(|e| EvmClientError::EventDecoding { message: e.to_string(), block_number })
    }
}

fn apply_gas<T, P, D>(call: CallBuilder<T, P, D>, gas: &GasTarget) -> CallBuilder<T, P, D>
where
    T: Transport + Clone,
    P: Provider<T>,
    D: CallDecoder,
{
    match gas {
        GasTarget::Legacy { gas_price } => call.gas_price(*gas_price),
        GasTarget::Eip1559 { max_priority_fee_per_gas, max_fee_per_gas } => {
            call.max_priority_fee_per_gas(*max_priority_fee_per_gas).max_fee_per_gas(*max_fee_per_gas)
        }
    }
}

/// Decodes a solc `Error(string)` payload. Anything else (custom errors,
/// empty reverts) yields `None`.
pub fn decode_revert_string(data: &[u8]) -> Option<String> {
    let payload = data.strip_prefix(ERROR_SELECTOR.as_slice())?;
    String::abi_decode(payload, true).ok()
}

fn revert_data(err: &alloy::contract::Error) -> Option<Bytes> {
    match err {
        alloy::contract::Error::TransportError(transport) => {
            transport.as_error_resp().and_then(|payload| payload.as_revert_data())
        }
        _ => None,
    }
}

#[async_trait]
impl RrpClient for EvmRrpClient {
    async fn get_latest_block_number(&self) -> Result<u64, EvmClientError> {
        self.provider.get_block_number().await.map_err(|e| EvmClientError::Rpc(e.to_string()))
    }

    async fn get_rrp_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RrpLog>, EvmClientError> {
        let filter = Filter::new()
            .address(*self.rrp.address())
            .from_block(from_block)
            .to_block(to_block)
            .event_signature(vec![
                AirnodeRrp::MadeTemplateRequest::SIGNATURE_HASH,
                AirnodeRrp::MadeFullRequest::SIGNATURE_HASH,
                AirnodeRrp::RequestedWithdrawal::SIGNATURE_HASH,
            ]);

        let logs = self.provider.get_logs(&filter).await.map_err(|e| EvmClientError::Rpc(e.to_string()))?;

        let mut decoded = Vec::with_capacity(logs.len());
        for log in logs {
            let meta = Self::metadata(&log)?;
            let Some(topic0) = log.topic0() else { continue };
            if *topic0 == AirnodeRrp::MadeTemplateRequest::SIGNATURE_HASH {
                let event = Self::decode_log::<AirnodeRrp::MadeTemplateRequest>(&log, meta.block_number)?;
                decoded.push(RrpLog::TemplateRequest(meta, event));
            } else if *topic0 == AirnodeRrp::MadeFullRequest::SIGNATURE_HASH {
                let event = Self::decode_log::<AirnodeRrp::MadeFullRequest>(&log, meta.block_number)?;
                decoded.push(RrpLog::FullRequest(meta, event));
            } else if *topic0 == AirnodeRrp::RequestedWithdrawal::SIGNATURE_HASH {
                let event = Self::decode_log::<AirnodeRrp::RequestedWithdrawal>(&log, meta.block_number)?;
                decoded.push(RrpLog::Withdrawal(meta, event));
            }
        }
        Ok(decoded)
    }

    async fn get_template(&self, template_id: B256) -> Result<Option<Template>, EvmClientError> {
        let stored = self
            .rrp
            .templates(template_id)
            .call()
            .await
            .map_err(|e| EvmClientError::Contract(format!("Failed to read template: {e}")))?;
        if stored.airnode == Address::ZERO {
            return Ok(None);
        }
        Ok(Some(Template {
            id: template_id,
            airnode: stored.airnode,
            endpoint_id: stored.endpointId,
            encoded_parameters: stored.parameters,
        }))
    }

    async fn check_authorization_statuses(
        &self,
        authorizers: Vec<Address>,
        airnode: Address,
        probes: Vec<AuthorizationProbe>,
    ) -> Result<Vec<bool>, EvmClientError> {
        let expected = probes.len();
        let statuses = self
            .rrp
            .checkAuthorizationStatuses(
                authorizers,
                airnode,
                probes.iter().map(|p| p.request_id).collect(),
                probes.iter().map(|p| p.endpoint_id).collect(),
                probes.iter().map(|p| p.sponsor).collect(),
                probes.iter().map(|p| p.requester).collect(),
            )
            .call()
            .await
            .map_err(|e| EvmClientError::Contract(format!("Failed to check authorization statuses: {e}")))?
            .statuses;
        if statuses.len() != expected {
            return Err(EvmClientError::Contract(format!(
                "Authorization status count mismatch: expected {expected}, got {}",
                statuses.len()
            )));
        }
        Ok(statuses)
    }

    async fn check_authorization_status(
        &self,
        authorizers: Vec<Address>,
        airnode: Address,
        probe: AuthorizationProbe,
    ) -> Result<bool, EvmClientError> {
        self.rrp
            .checkAuthorizationStatus(authorizers, airnode, probe.request_id, probe.endpoint_id, probe.sponsor, probe.requester)
            .call()
            .await
            .map(|ret| ret.status)
            .map_err(|e| EvmClientError::Contract(format!("Failed to check authorization status: {e}")))
    }

    async fn check_erc721_authorizations(
        &self,
        authorizer: Address,
        airnode: Address,
        chain_id: u64,
        probes: Vec<Erc721Probe>,
    ) -> Result<Vec<bool>, EvmClientError> {
        let calls: Vec<Multicall3::Call3> = probes
            .iter()
            .map(|probe| Multicall3::Call3 {
                target: authorizer,
                allowFailure: true,
                callData: RequesterAuthorizerWithErc721::isAuthorizedCall {
                    airnode,
                    chainId: U256::from(chain_id),
                    requester: probe.requester,
                    token: probe.token,
                }
                .abi_encode()
                .into(),
            })
            .collect();

        let multicall = Multicall3::new(MULTICALL3_ADDRESS, self.provider.as_ref().clone());
        let results = multicall
            .aggregate3(calls)
            .call()
            .await
            .map_err(|e| EvmClientError::Contract(format!("Multicall for NFT authorization failed: {e}")))?
            .returnData;
        if results.len() != probes.len() {
            return Err(EvmClientError::Contract(format!(
                "Multicall result count mismatch: expected {}, got {}",
                probes.len(),
                results.len()
            )));
        }
        Ok(results
            .into_iter()
            .map(|result| result.success && bool::abi_decode(&result.returnData, true).unwrap_or(false))
            .collect())
    }

    async fn get_latest_base_fee(&self) -> Result<Option<u128>, EvmClientError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest, BlockTransactionsKind::Hashes)
            .await
            .map_err(|e| EvmClientError::GasPrice { message: e.to_string() })?
            .ok_or(EvmClientError::MissingField("latest block"))?;
        Ok(block.header.base_fee_per_gas.map(u128::from))
    }

    async fn get_gas_price(&self) -> Result<u128, EvmClientError> {
        self.provider.get_gas_price().await.map_err(|e| EvmClientError::GasPrice { message: e.to_string() })
    }

    async fn get_transaction_count(&self, address: Address) -> Result<u64, EvmClientError> {
        self.provider.get_transaction_count(address).await.map_err(|e| EvmClientError::Rpc(e.to_string()))
    }

    async fn static_fulfill(&self, args: FulfillArgs) -> Result<StaticCallOutcome, EvmClientError> {
        let call = self
            .rrp
            .fulfill(
                args.request_id,
                args.airnode,
                args.fulfill_address,
                FixedBytes::<4>::from(args.fulfill_function_id),
                args.data,
                args.signature,
            )
            .from(args.sponsor_wallet);
        match call.call().await {
            Ok(ret) if ret.callSuccess => Ok(StaticCallOutcome::Success),
            // The contract swallows the inner revert and hands back its data.
            Ok(ret) => Ok(StaticCallOutcome::Revert { reason: decode_revert_string(&ret.callData) }),
            Err(err) => match revert_data(&err) {
                Some(data) => Ok(StaticCallOutcome::Revert { reason: decode_revert_string(&data) }),
                None => Err(EvmClientError::Contract(format!("Static fulfillment call failed: {err}"))),
            },
        }
    }

    async fn submit_fulfill(&self, args: FulfillArgs, gas: GasTarget, nonce: u64) -> Result<B256, EvmClientError> {
        let call = self
            .writer()?
            .fulfill(
                args.request_id,
                args.airnode,
                args.fulfill_address,
                FixedBytes::<4>::from(args.fulfill_function_id),
                args.data,
                args.signature,
            )
            .from(args.sponsor_wallet)
            .nonce(nonce);
        let pending = apply_gas(call, &gas)
            .send()
            .await
            .map_err(|e| EvmClientError::TransactionSend { message: e.to_string() })?;
        Ok(*pending.tx_hash())
    }

    async fn submit_fail(&self, args: FailArgs, gas: GasTarget, nonce: u64) -> Result<B256, EvmClientError> {
        let call = self
            .writer()?
            .fail(
                args.request_id,
                args.airnode,
                args.fulfill_address,
                FixedBytes::<4>::from(args.fulfill_function_id),
                args.error_message,
            )
            .from(args.sponsor_wallet)
            .nonce(nonce);
        let pending = apply_gas(call, &gas)
            .send()
            .await
            .map_err(|e| EvmClientError::TransactionSend { message: e.to_string() })?;
        Ok(*pending.tx_hash())
    }

    async fn submit_withdrawal(
        &self,
        args: WithdrawalArgs,
        gas: GasTarget,
        nonce: u64,
    ) -> Result<B256, EvmClientError> {
        let balance = self
            .provider
            .get_balance(args.sponsor_wallet)
            .await
            .map_err(|e| EvmClientError::Rpc(e.to_string()))?;

        let call = self
            .writer()?
            .fulfillWithdrawal(args.withdrawal_request_id, args.airnode, args.sponsor)
            .from(args.sponsor_wallet)
            .nonce(nonce);
        let call = apply_gas(call, &gas);
        let gas_limit = call
            .estimate_gas()
            .await
            .map_err(|e| EvmClientError::TransactionSend { message: format!("Gas estimation failed: {e}") })?;

        // The sponsor wallet is emptied: everything except the fee is the value.
        let fee_per_gas = match &gas {
            GasTarget::Legacy { gas_price } => *gas_price,
            GasTarget::Eip1559 { max_fee_per_gas, .. } => *max_fee_per_gas,
        };
        let transaction_cost = U256::from(gas_limit) * U256::from(fee_per_gas);
        let value = balance.saturating_sub(transaction_cost);

        let pending = call
            .value(value)
            .gas(gas_limit)
            .send()
            .await
            .map_err(|e| EvmClientError::TransactionSend { message: e.to_string() })?;
        Ok(*pending.tx_hash())
    }
}

impl std::fmt::Debug for EvmRrpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmRrpClient")
            .field("contract_address", self.rrp.address())
            .field("chain_id", &self.chain_id)
            .finish()
    }
}
