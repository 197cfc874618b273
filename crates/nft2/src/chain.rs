//! Chain data shapes and the [ChainClient] port consumed by the block processor.

use crate::error::ClientError;
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;

/// Raw log as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub log_index: u64,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

impl LogEntry {
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

/// Transaction as seen in a full block body; the source for call handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEntry {
    pub hash: B256,
    pub block_number: u64,
    pub transaction_index: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub input: Bytes,
}

impl TransactionEntry {
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.input.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
    }
}

/// eth_getLogs filter: any of `addresses`, topic0 any of `topics` (empty = any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub from_block: u64,
    pub to_block: u64,
    pub addresses: Vec<Address>,
    pub topics: Vec<B256>,
}

/// Read-only access to an EVM node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest block number.
    async fn block_number(&self) -> Result<u64, ClientError>;

    async fn get_block_header(&self, number: u64) -> Result<BlockHeader, ClientError>;

    /// Logs matching `filter`, in any order.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ClientError>;

    /// All transactions of a block, in transaction-index order.
    async fn get_block_transactions(&self, number: u64)
        -> Result<Vec<TransactionEntry>, ClientError>;

    /// eth_call at `block` (latest when None). Returns raw ABI-encoded output.
    async fn call(
        &self,
        to: Address,
        calldata: Bytes,
        block: Option<u64>,
    ) -> Result<Bytes, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_requires_four_bytes() {
        let mut tx = TransactionEntry {
            hash: B256::ZERO,
            block_number: 1,
            transaction_index: 0,
            from: Address::ZERO,
            to: None,
            input: Bytes::from(vec![0xaa, 0xbb, 0xcc]),
        };
        assert_eq!(tx.selector(), None);
        tx.input = Bytes::from(vec![0xaa, 0xbb, 0xcc, 0xdd, 0x01]);
        assert_eq!(tx.selector(), Some([0xaa, 0xbb, 0xcc, 0xdd]));
    }
}
