//! Response cache: successful API responses keyed by request id, so a request
//! observed again in a later run (within the scan window) is answered without
//! re-calling the upstream API.
//!
//! Writes are buffered and only become visible to readers after an explicit
//! `flush`, which the coordinator issues once per run. A crash between `set`
//! and `flush` loses at most one run's worth of entries.

use alloy_primitives::{Bytes, B256};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Cache key for a request's response.
pub fn request_id_key(request_id: B256) -> String {
    format!("requestId-{request_id}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub encoded_value: Bytes,
    /// The upstream value before encoding, kept for logs.
    pub raw: Value,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn list_keys(&self) -> Vec<String>;

    async fn get(&self, key: &str) -> Option<CachedResponse>;

    /// Buffers an entry; it is not readable until the next `flush`.
    async fn set(&self, key: String, value: CachedResponse);

    async fn flush(&self);
}

/// Process-local cache. Entries survive across runs of one coordinator
/// process, which matches the scan window re-observation case.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    synced: Mutex<HashMap<String, CachedResponse>>,
    pending: Mutex<Vec<(String, CachedResponse)>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseCache for InMemoryCache {
    async fn list_keys(&self) -> Vec<String> {
        self.synced.lock().expect("cache lock poisoned").keys().cloned().collect()
    }

    async fn get(&self, key: &str) -> Option<CachedResponse> {
        self.synced.lock().expect("cache lock poisoned").get(key).cloned()
    }

    async fn set(&self, key: String, value: CachedResponse) {
        self.pending.lock().expect("cache lock poisoned").push((key, value));
    }

    async fn flush(&self) {
        let pending = std::mem::take(&mut *self.pending.lock().expect("cache lock poisoned"));
        let mut synced = self.synced.lock().expect("cache lock poisoned");
        for (key, value) in pending {
            synced.insert(key, value);
        }
    }
}
