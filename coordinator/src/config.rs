//! Static coordinator configuration: chains to watch, endpoint definitions and
//! pre-declared authorizations. Loaded from YAML; secrets (signing keys) are
//! supplied separately by the embedding process.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config from file: {0}")]
    ReadFromFile(#[from] std::io::Error),
    #[error("Failed to decode config: {0}")]
    Decode(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address of the oracle identity requests are made to and responses are
    /// signed with.
    pub airnode: Address,
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub endpoints: HashMap<B256, EndpointSpec>,
}

impl Config {
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub id: u64,
    pub provider_url: Url,
    /// Address of the request-response protocol contract on this chain.
    pub contract_address: Address,
    #[serde(default = "default_minimum_confirmations")]
    pub minimum_confirmations: u64,
    /// Ceiling on the number of requests processed per run.
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default)]
    pub authorizers: Vec<Address>,
    #[serde(default)]
    pub cross_chain_authorizers: Vec<CrossChainAuthorizerConfig>,
    #[serde(default)]
    pub erc721_authorizers: Vec<Erc721AuthorizerConfig>,
    #[serde(default)]
    pub cross_chain_erc721_authorizers: Vec<CrossChainErc721AuthorizerConfig>,
    /// Pre-declared grants: endpoint id to the requesters allowed to use it
    /// without any on-chain check.
    #[serde(default)]
    pub authorizations: HashMap<B256, Vec<Address>>,
}

impl ChainConfig {
    /// True when the chain declares no authorization source at all, in which
    /// case every request is considered authorized and no fetch is issued.
    pub fn has_no_authorizers(&self) -> bool {
        self.authorizers.is_empty()
            && self.cross_chain_authorizers.is_empty()
            && self.erc721_authorizers.is_empty()
            && self.cross_chain_erc721_authorizers.is_empty()
    }
}

fn default_minimum_confirmations() -> u64 {
    0
}

fn default_max_requests() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossChainAuthorizerConfig {
    pub chain_id: u64,
    pub provider_url: Url,
    pub contract_address: Address,
    pub authorizers: Vec<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Erc721AuthorizerConfig {
    /// Address of the NFT-gated authorizer contract.
    pub authorizer: Address,
    /// NFT collections checked; any one of them granting access is enough.
    pub tokens: Vec<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossChainErc721AuthorizerConfig {
    pub chain_id: u64,
    pub provider_url: Url,
    pub authorizer: Address,
    pub tokens: Vec<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// HTTP operation to perform. Absent for endpoints whose result is fully
    /// synthesized by processing.
    pub operation: Option<HttpOperation>,
    #[serde(default)]
    pub credentials: Option<ApiCredentials>,
    #[serde(default)]
    pub pre_processing: Vec<ProcessingSpec>,
    #[serde(default)]
    pub post_processing: Vec<ProcessingSpec>,
    /// Whether successful responses may be served from the response cache.
    #[serde(default)]
    pub cache_responses: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpOperation {
    pub method: HttpMethod,
    pub url: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCredentials {
    pub location: CredentialsLocation,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialsLocation {
    Query,
    Header,
}

/// One processing step applied before the API call (against the parameters)
/// or after it (against the raw response).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSpec {
    /// Runtime the snippet targets, e.g. an interpreter identifier.
    pub environment: String,
    /// The snippet itself.
    pub value: String,
}
