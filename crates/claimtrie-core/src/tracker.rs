//! Block tracker — maintains a sliding window of recently committed block
//! summaries for parent-hash verification and common-ancestor search.

use std::collections::VecDeque;

use crate::types::BlockSummary;

/// Tracks the last N committed blocks.
///
/// When a new block arrives, the tracker checks whether its `prev_hash`
/// matches the hash of the current head. A mismatch means the block source
/// switched to another branch.
pub struct BlockTracker {
    /// Oldest first.
    window: VecDeque<BlockSummary>,
    window_size: usize,
}

impl BlockTracker {
    /// The window should be at least as deep as the store's undo depth,
    /// otherwise a fork point may be found that can no longer be rolled back to.
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
        }
    }

    /// Add a block on top of the head.
    ///
    /// Returns `Err(depth)` if the block does not extend the head, where
    /// `depth` is the number of tracked blocks above the fork point (the
    /// whole window if the fork point is not tracked).
    pub fn push(&mut self, block: BlockSummary) -> Result<(), u32> {
        if let Some(head) = self.window.back() {
            if !block.extends(head) {
                return Err(self.find_reorg_depth(&block));
            }
        }
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(block);
        Ok(())
    }

    pub fn head(&self) -> Option<&BlockSummary> {
        self.window.back()
    }

    pub fn get(&self, height: u32) -> Option<&BlockSummary> {
        let first = self.window.front()?.height;
        let index = height.checked_sub(first)? as usize;
        self.window.get(index).filter(|b| b.height == height)
    }

    pub fn oldest(&self) -> Option<&BlockSummary> {
        self.window.front()
    }

    /// Window contents, oldest first.
    pub fn blocks(&self) -> Vec<BlockSummary> {
        self.window.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Discard everything above `height`.
    pub fn rewind_to(&mut self, height: u32) {
        while let Some(back) = self.window.back() {
            if back.height > height {
                self.window.pop_back();
            } else {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    fn find_reorg_depth(&self, new_block: &BlockSummary) -> u32 {
        for (i, tracked) in self.window.iter().enumerate().rev() {
            if tracked.hash == new_block.prev_hash {
                return (self.window.len() - 1 - i) as u32;
            }
        }
        self.window.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(height: u32, hash: &str, prev: &str) -> BlockSummary {
        BlockSummary {
            height,
            hash: hash.into(),
            prev_hash: prev.into(),
        }
    }

    fn chain(tracker: &mut BlockTracker, from: u32, to: u32) {
        for i in from..=to {
            let prev = if i == from { "genesis".to_string() } else { format!("h{}", i - 1) };
            tracker.push(block(i, &format!("h{i}"), &prev)).unwrap();
        }
    }

    #[test]
    fn push_normal_chain() {
        let mut tracker = BlockTracker::new(10);
        chain(&mut tracker, 100, 102);
        assert_eq!(tracker.head().unwrap().height, 102);
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.get(101).unwrap().hash, "h101");
        assert!(tracker.get(99).is_none());
        assert!(tracker.get(103).is_none());
    }

    #[test]
    fn push_detects_fork_depth() {
        let mut tracker = BlockTracker::new(10);
        chain(&mut tracker, 100, 104);
        // new 103 built on h102: 103 and 104 have to go
        assert_eq!(tracker.push(block(105, "x105", "x104")), Err(5));
        assert_eq!(tracker.push(block(103, "x103", "h102")), Err(2));
        assert_eq!(tracker.head().unwrap().height, 104);
    }

    #[test]
    fn rewind_to() {
        let mut tracker = BlockTracker::new(20);
        chain(&mut tracker, 100, 110);
        tracker.rewind_to(105);
        assert_eq!(tracker.head().unwrap().height, 105);
        tracker.push(block(106, "y106", "h105")).unwrap();
        assert_eq!(tracker.head().unwrap().hash, "y106");
    }

    #[test]
    fn window_size_enforced() {
        let mut tracker = BlockTracker::new(5);
        chain(&mut tracker, 0, 9);
        assert_eq!(tracker.len(), 5);
        assert_eq!(tracker.oldest().unwrap().height, 5);
    }
}
