//! Shared traits and interfaces
//!
//! This module defines the collaborator seams of the engine: the
//! transactional key-value store underneath every record, and the outbound
//! connection the broadcast hub writes to.

use crate::errors::BingoResult;
use crate::games::types::BingoEvent;
use async_trait::async_trait;

/// Atomic unit of work against a `KeyValueStore`.
///
/// Every expectation must still hold when the set is committed, otherwise
/// nothing is written and the store reports a concurrent update conflict.
#[derive(Clone, Debug, Default)]
pub struct WriteSet {
    /// Key and the exact bytes it must currently hold (`None` = absent)
    pub expectations: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    pub puts: Vec<(Vec<u8>, Vec<u8>)>,
    pub deletes: Vec<Vec<u8>>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&mut self, key: impl Into<Vec<u8>>, current: Option<Vec<u8>>) {
        self.expectations.push((key.into(), current));
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.puts.push((key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.deletes.push(key.into());
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }
}

/// Transactional key-value storage collaborator
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> BingoResult<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> BingoResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Check every expectation and apply all writes, or apply nothing
    fn commit(&self, writes: WriteSet) -> BingoResult<()>;
}

/// Write failure on an outbound connection; the hub prunes the subscriber
#[derive(Debug, thiserror::Error)]
#[error("connection closed: {0}")]
pub struct ConnectionClosed(pub String);

/// Outbound side of a subscriber connection (a WebSocket, an in-memory recorder)
#[async_trait]
pub trait Connection: Send + 'static {
    async fn send(&mut self, event: &BingoEvent) -> Result<(), ConnectionClosed>;

    /// Called once when the hub stops writing to this connection
    async fn close(&mut self) {}
}
