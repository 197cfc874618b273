//! Per-chain watermark: the highest block whose handlers all completed.
//!
//! The in-memory cursor is mirrored to a [crate::entities::Checkpoint] in the same commit as
//! the block's entities, so a restart resumes from the last committed block.

/// Cursor: last committed block, `None` until anything at or after genesis is committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub last_processed_block: Option<u64>,
}

impl Cursor {
    pub fn new(last_processed_block: u64) -> Self {
        Self {
            last_processed_block: Some(last_processed_block),
        }
    }

    /// Resume point: the later of the persisted checkpoint and the block before `start_block`.
    pub fn resume(checkpoint: Option<u64>, start_block: u64) -> Self {
        let floor = start_block.checked_sub(1);
        Self {
            last_processed_block: checkpoint.max(floor),
        }
    }

    pub fn next_block(&self) -> u64 {
        self.last_processed_block.map_or(0, |b| b + 1)
    }

    /// True once `block` or anything after it is committed.
    pub fn reached(&self, block: u64) -> bool {
        self.last_processed_block.is_some_and(|b| b >= block)
    }

    /// Move forward to `block`. Never moves backwards.
    pub fn advance(&mut self, block: u64) {
        self.last_processed_block = Some(self.last_processed_block.map_or(block, |b| b.max(block)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_new() {
        let c = Cursor::new(123);
        assert_eq!(c.last_processed_block, Some(123));
        assert_eq!(c.next_block(), 124);
    }

    #[test]
    fn resume_prefers_later_checkpoint() {
        assert_eq!(Cursor::resume(None, 100).last_processed_block, Some(99));
        assert_eq!(Cursor::resume(Some(150), 100).last_processed_block, Some(150));
        assert_eq!(Cursor::resume(Some(10), 100).last_processed_block, Some(99));
    }

    #[test]
    fn genesis_start_begins_at_block_zero() {
        let mut c = Cursor::resume(None, 0);
        assert_eq!(c.last_processed_block, None);
        assert_eq!(c.next_block(), 0);
        assert!(!c.reached(0));
        c.advance(0);
        assert_eq!(c.next_block(), 1);
        assert!(c.reached(0));
        assert_eq!(Cursor::resume(Some(0), 0).next_block(), 1);
    }

    #[test]
    fn advance_is_monotonic() {
        let mut c = Cursor::new(10);
        c.advance(8);
        assert_eq!(c.last_processed_block, Some(10));
        c.advance(11);
        assert_eq!(c.last_processed_block, Some(11));
    }
}
