//! Exact-match content deduplication over the seen-hash table.
//!
//! A hash, once recorded, is permanently rejected for re-ingestion across
//! all sources. No expiry, no capacity bound — unbounded growth is an
//! accepted trade-off.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::store::Store;

/// SHA-256 of the full media payload, hex-encoded.
pub fn content_hash(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Membership test and registration for content hashes.
pub struct DedupIndex {
    store: Arc<dyn Store>,
}

impl DedupIndex {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Has this hash ever been observed?
    pub async fn seen(&self, hash: &str) -> Result<bool, StoreError> {
        self.store.hash_seen(hash).await
    }

    /// Register a hash. Returns `false` when it was already present —
    /// the unique insert makes concurrent duplicate submissions collapse
    /// to a single winner.
    pub async fn record(&self, hash: &str) -> Result<bool, StoreError> {
        self.store.record_hash(hash, Utc::now()).await
    }
}
