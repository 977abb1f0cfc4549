use std::time::Duration;

/// Number of past blocks scanned for request events.
pub const BLOCK_HISTORY_LIMIT: u64 = 300;

/// Number of requests checked per batched authorization call.
pub const AUTHORIZATION_BATCH_SIZE: usize = 10;

/// Priority fee used for fee-market (EIP-1559) submissions.
pub const PRIORITY_FEE_WEI: u128 = 3_120_000_000;

/// Base fee multiplier, in percent, applied when deriving `maxFeePerGas`.
pub const BASE_FEE_MULTIPLIER_PERCENT: u128 = 200;

/// Per-attempt ceiling for a single upstream API request.
pub const API_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall ceiling for one API call execution, covering the retried attempt.
pub const API_CALL_TOTAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Ceiling for one pre- or post-processing step.
pub const PROCESSING_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-attempt ceiling for chain RPC reads and writes.
pub const EVM_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between retry attempts of a remote call.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Longest error message submitted on-chain; longer messages are truncated
/// with a trailing ellipsis to fit the contract's storage budget.
pub const MAXIMUM_ONCHAIN_ERROR_LENGTH: usize = 100;
