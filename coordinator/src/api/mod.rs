//! Off-chain API call execution: reserved-parameter handling, response
//! extraction, type casting, ABI encoding and response signing.
//!
//! The failure policy is strict: nothing thrown by an upstream API, a
//! processing snippet or a cast ever crosses this module as an error the
//! orchestrator has to handle. Every call produces either a success payload
//! or an error message suitable for an on-chain failure transaction.

pub mod adapter;
pub mod processing;
pub mod worker;

use crate::cache::{request_id_key, CachedResponse, ResponseCache};
use crate::config::{Config, EndpointSpec, ProcessingSpec};
use crate::constants::{API_CALL_TOTAL_TIMEOUT, DEFAULT_RETRY_DELAY, PROCESSING_TIMEOUT};
use crate::model::{AggregatedApiCall, CallOutcome, Parameters};
use crate::retry::{go, GoError, GoOptions};
use adapter::{AdapterError, ApiAdapter};
use alloy::dyn_abi::DynSolValue;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy_primitives::{keccak256, Address, Bytes, B256, I256, U256};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, RoundingMode};
use futures::future::join_all;
#[cfg(test)]
use mockall::automock;
use num_bigint::BigInt;
use processing::{ProcessingError, ProcessingRunner};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use worker::TaskExecutor;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiCallError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Processing(#[from] ProcessingError),
    #[error("{0}")]
    Configuration(String),
    #[error("Response path not found: {0}")]
    PathNotFound(String),
    #[error("{0}")]
    Cast(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("{0}")]
    Worker(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuccessfulApiCall {
    pub encoded_value: Bytes,
    pub raw: Value,
}

/// Parameters the coordinator interprets itself; they are stripped before the
/// remaining parameters are dispatched upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservedParameters {
    pub response_type: Option<String>,
    pub path: Option<String>,
    pub times: Option<String>,
    pub gas_price: Option<String>,
    pub min_confirmations: Option<String>,
}

const RESERVED_KEYS: [&str; 5] = ["_type", "_path", "_times", "_gasPrice", "_minConfirmations"];

impl ReservedParameters {
    pub fn extract(parameters: &Parameters) -> (Self, Parameters) {
        let mut stripped = parameters.clone();
        let [response_type, path, times, gas_price, min_confirmations] =
            RESERVED_KEYS.map(|key| stripped.remove(key).map(|value| value_as_string(&value)));
        (Self { response_type, path, times, gas_price, min_confirmations }, stripped)
    }
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Per-request confirmation-depth override carried in the parameters.
pub fn min_confirmations_override(parameters: &Parameters) -> Option<u64> {
    parameters.get("_minConfirmations").and_then(|value| value_as_string(value).parse().ok())
}

/// Per-request gas price override in wei.
pub fn gas_price_override(parameters: &Parameters) -> Option<u128> {
    parameters.get("_gasPrice").and_then(|value| value_as_string(value).parse().ok())
}

/// Walks a dot-separated path through objects and arrays. An empty or absent
/// path selects the whole value.
pub fn extract_by_path<'a>(value: &'a Value, path: Option<&str>) -> Option<&'a Value> {
    let path = match path {
        None | Some("") => return Some(value),
        Some(path) => path,
    };
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Casts the located value to the declared `_type` and ABI-encodes it.
/// `_times` multiplication is exact (decimal, not float) and only applies to
/// the numeric types; the product is truncated toward zero.
pub fn cast_and_encode(value: &Value, reserved: &ReservedParameters) -> Result<Bytes, ApiCallError> {
    let response_type = reserved
        .response_type
        .as_deref()
        .ok_or_else(|| ApiCallError::Configuration("Missing reserved parameter _type".into()))?;

    let encoded = match response_type {
        "int256" => {
            let integer = to_scaled_integer(value, reserved.times.as_deref())?;
            let signed = I256::from_dec_str(&integer)
                .map_err(|_| ApiCallError::Cast(format!("Value {integer} does not fit int256")))?;
            DynSolValue::Int(signed, 256).abi_encode()
        }
        "uint256" => {
            let integer = to_scaled_integer(value, reserved.times.as_deref())?;
            if integer.starts_with('-') {
                return Err(ApiCallError::Cast(format!("Negative value {integer} cast to uint256")));
            }
            let unsigned = U256::from_str_radix(&integer, 10)
                .map_err(|_| ApiCallError::Cast(format!("Value {integer} does not fit uint256")))?;
            DynSolValue::Uint(unsigned, 256).abi_encode()
        }
        "bool" => match value {
            Value::Bool(b) => DynSolValue::Bool(*b).abi_encode(),
            other => return Err(ApiCallError::Cast(format!("Value {other} is not a bool"))),
        },
        "bytes32" => {
            let word = B256::from_str(&value_as_string(value))
                .map_err(|_| ApiCallError::Cast(format!("Value {value} is not a bytes32")))?;
            DynSolValue::FixedBytes(word, 32).abi_encode()
        }
        "address" => {
            let address = Address::from_str(&value_as_string(value))
                .map_err(|_| ApiCallError::Cast(format!("Value {value} is not an address")))?;
            DynSolValue::Address(address).abi_encode()
        }
        "bytes" => {
            let bytes = Bytes::from_str(&value_as_string(value))
                .map_err(|_| ApiCallError::Cast(format!("Value {value} is not a bytes value")))?;
            DynSolValue::Bytes(bytes.to_vec()).abi_encode()
        }
        "string" => DynSolValue::String(value_as_string(value)).abi_encode(),
        other => return Err(ApiCallError::Configuration(format!("Unsupported response type {other}"))),
    };
    Ok(Bytes::from(encoded))
}

/// Decimal parse, `_times` multiplication, truncation toward zero. Returns the
/// integer as a decimal string.
fn to_scaled_integer(value: &Value, times: Option<&str>) -> Result<String, ApiCallError> {
    let decimal = match value {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()),
        Value::String(s) => BigDecimal::from_str(s),
        other => return Err(ApiCallError::Cast(format!("Value {other} is not numeric"))),
    }
    .map_err(|_| ApiCallError::Cast(format!("Value {value} is not numeric")))?;

    let scaled = match times {
        Some(times) => {
            let multiplier = BigDecimal::from_str(times)
                .map_err(|_| ApiCallError::Cast(format!("_times value {times} is not numeric")))?;
            decimal * multiplier
        }
        None => decimal,
    };

    let (integer, _): (BigInt, i64) = scaled.with_scale_round(0, RoundingMode::Down).into_bigint_and_exponent();
    Ok(integer.to_string())
}

/// Signs the fulfillment payload binding the response to one request.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResponseSigner: Send + Sync {
    async fn sign_response(&self, request_id: B256, encoded_value: &Bytes) -> Result<Bytes, ApiCallError>;
}

/// Signs with the airnode identity key over
/// `keccak256(request_id ++ encoded_value)`, EIP-191 prefixed, which is what
/// the protocol contract verifies at fulfillment.
pub struct AirnodeSigner {
    signer: PrivateKeySigner,
}

impl AirnodeSigner {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

#[async_trait]
impl ResponseSigner for AirnodeSigner {
    async fn sign_response(&self, request_id: B256, encoded_value: &Bytes) -> Result<Bytes, ApiCallError> {
        let mut message = request_id.to_vec();
        message.extend_from_slice(encoded_value);
        let hash = keccak256(&message);
        let signature =
            self.signer.sign_message(hash.as_slice()).await.map_err(|e| ApiCallError::Signing(e.to_string()))?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }
}

/// Executes one aggregated call end to end: pre-processing, the HTTP call (or
/// processing-only synthesis), post-processing, extraction and encoding.
/// Runs inside the worker boundary.
#[derive(Clone)]
pub struct ApiCallRunner {
    pub adapter: Arc<dyn ApiAdapter>,
    pub processing: Arc<dyn ProcessingRunner>,
}

impl ApiCallRunner {
    pub async fn run(&self, call: &AggregatedApiCall, endpoint: &EndpointSpec) -> Result<SuccessfulApiCall, ApiCallError> {
        let (reserved, stripped) = ReservedParameters::extract(&call.parameters);

        let input = self.process(&endpoint.pre_processing, Value::Object(stripped)).await?;
        let raw = match &endpoint.operation {
            Some(operation) => {
                let Value::Object(parameters) = input else {
                    return Err(ApiCallError::Processing(ProcessingError::Failed(
                        "Pre-processing must produce a parameter object".into(),
                    )));
                };
                self.adapter.call(operation.clone(), endpoint.credentials.clone(), parameters).await?
            }
            None => {
                if endpoint.pre_processing.is_empty() && endpoint.post_processing.is_empty() {
                    return Err(ApiCallError::Configuration(
                        "Endpoint defines neither an operation nor processing".into(),
                    ));
                }
                input
            }
        };
        let raw = self.process(&endpoint.post_processing, raw).await?;

        let located = extract_by_path(&raw, reserved.path.as_deref())
            .ok_or_else(|| ApiCallError::PathNotFound(reserved.path.clone().unwrap_or_default()))?;
        let encoded_value = cast_and_encode(located, &reserved)?;
        Ok(SuccessfulApiCall { encoded_value, raw })
    }

    async fn process(&self, specs: &[ProcessingSpec], input: Value) -> Result<Value, ApiCallError> {
        if specs.is_empty() {
            return Ok(input);
        }
        match tokio::time::timeout(PROCESSING_TIMEOUT, self.processing.run(specs.to_vec(), input)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ApiCallError::Processing(ProcessingError::TimedOut)),
        }
    }
}

pub struct ExecutionContext<'a> {
    pub executor: &'a dyn TaskExecutor,
    pub cache: &'a dyn ResponseCache,
    pub config: &'a Config,
}

/// Executes all aggregated calls concurrently, consulting the cache first and
/// writing successful responses back for cacheable endpoints. The cache is
/// flushed exactly once, after every call has settled.
pub async fn execute_aggregated_calls(
    ctx: &ExecutionContext<'_>,
    calls: Vec<AggregatedApiCall>,
) -> Vec<AggregatedApiCall> {
    let executed = join_all(calls.into_iter().map(|call| execute_one(ctx, call))).await;
    ctx.cache.flush().await;
    executed
}

async fn execute_one(ctx: &ExecutionContext<'_>, mut call: AggregatedApiCall) -> AggregatedApiCall {
    let Some(endpoint) = ctx.config.endpoints.get(&call.endpoint_id) else {
        call.outcome = Some(CallOutcome::Error { message: "Unknown endpoint".into() });
        return call;
    };

    if let Some(cached) = cached_response(ctx, &call).await {
        tracing::debug!(endpoint_id = %call.endpoint_id, "serving aggregated call from cache");
        call.outcome = Some(CallOutcome::Success { encoded_value: cached.encoded_value, raw: cached.raw });
        return call;
    }

    let options = GoOptions {
        retries: 1,
        delay: Some(DEFAULT_RETRY_DELAY),
        total_timeout: Some(API_CALL_TOTAL_TIMEOUT),
        attempt_timeout: None,
    };
    let result = go(|| ctx.executor.execute(call.clone(), endpoint.clone()), options).await;

    call.outcome = Some(match result {
        Ok(success) => {
            if endpoint.cache_responses {
                for &request_id in &call.request_ids {
                    ctx.cache
                        .set(
                            request_id_key(request_id),
                            CachedResponse { encoded_value: success.encoded_value.clone(), raw: success.raw.clone() },
                        )
                        .await;
                }
            }
            CallOutcome::Success { encoded_value: success.encoded_value, raw: success.raw }
        }
        Err(error) => {
            tracing::warn!(endpoint_id = %call.endpoint_id, %error, "aggregated API call failed");
            CallOutcome::Error { message: on_chain_error_message(&error) }
        }
    });
    call
}

/// A cache hit requires every originating request to have a stored response;
/// anything less re-executes the call.
async fn cached_response(ctx: &ExecutionContext<'_>, call: &AggregatedApiCall) -> Option<CachedResponse> {
    let mut first = None;
    for &request_id in &call.request_ids {
        let entry = ctx.cache.get(&request_id_key(request_id)).await?;
        first.get_or_insert(entry);
    }
    first
}

/// The message placed on chain. Cast, path and configuration problems are
/// deterministic and safe to expose; everything else collapses to a generic
/// message with the cause kept in the logs.
fn on_chain_error_message(error: &GoError<ApiCallError>) -> String {
    match error {
        GoError::Inner(
            inner @ (ApiCallError::Configuration(_) | ApiCallError::PathNotFound(_) | ApiCallError::Cast(_)),
        ) => inner.to_string(),
        _ => "API call failed".to_string(),
    }
}
