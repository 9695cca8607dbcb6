//! Change-set and reorg handler traits + registry.
//!
//! Downstream consumers (search indexers, wallet sync) subscribe here to
//! committed change sets and to rollbacks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ClaimTrieError;
use crate::types::{BlockSummary, ChangeSet, SyncContext};

/// Called once per committed block.
#[async_trait]
pub trait ChangeSetHandler: Send + Sync {
    async fn on_change_set(&self, change_set: &ChangeSet, ctx: &SyncContext) -> Result<(), ClaimTrieError>;

    /// Name used in error reports.
    fn name(&self) -> &str;
}

/// Called after the trie has been rolled back.
#[async_trait]
pub trait ReorgHandler: Send + Sync {
    /// `dropped` lists the rolled back blocks, most recent first; `ctx.block`
    /// is the new head.
    async fn on_reorg(&self, dropped: &[BlockSummary], ctx: &SyncContext) -> Result<(), ClaimTrieError>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    change_set_handlers: Vec<Arc<dyn ChangeSetHandler>>,
    reorg_handlers: Vec<Arc<dyn ReorgHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_change_set(&mut self, handler: Arc<dyn ChangeSetHandler>) {
        self.change_set_handlers.push(handler);
    }

    pub fn on_reorg(&mut self, handler: Arc<dyn ReorgHandler>) {
        self.reorg_handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.change_set_handlers.len() + self.reorg_handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a change set to every handler, in registration order.
    pub async fn dispatch_change_set(&self, change_set: &ChangeSet, ctx: &SyncContext) -> Result<(), ClaimTrieError> {
        for handler in &self.change_set_handlers {
            handler.on_change_set(change_set, ctx).await.map_err(|e| match e {
                ClaimTrieError::Handler { .. } => e,
                other => ClaimTrieError::Handler {
                    handler: handler.name().to_string(),
                    reason: other.to_string(),
                },
            })?;
        }
        Ok(())
    }

    pub async fn dispatch_reorg(&self, dropped: &[BlockSummary], ctx: &SyncContext) -> Result<(), ClaimTrieError> {
        for handler in &self.reorg_handlers {
            handler.on_reorg(dropped, ctx).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyncPhase;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter(Arc<AtomicU32>);

    #[async_trait]
    impl ChangeSetHandler for Counter {
        async fn on_change_set(&self, cs: &ChangeSet, _c: &SyncContext) -> Result<(), ClaimTrieError> {
            self.0.fetch_add(cs.takeovers.len() as u32 + 1, Ordering::Relaxed);
            Ok(())
        }
        fn name(&self) -> &str {
            "counter"
        }
    }

    struct Failing;

    #[async_trait]
    impl ChangeSetHandler for Failing {
        async fn on_change_set(&self, _cs: &ChangeSet, _c: &SyncContext) -> Result<(), ClaimTrieError> {
            Err(ClaimTrieError::Storage("disk full".into()))
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    fn ctx() -> SyncContext {
        SyncContext {
            block: BlockSummary { height: 1, hash: "a".into(), prev_hash: "0".into() },
            phase: SyncPhase::Backfill,
            network: "regtest".into(),
        }
    }

    fn change_set() -> ChangeSet {
        ChangeSet {
            height: 1,
            block_hash: "a".into(),
            changed_names: vec![],
            newly_activated: vec![],
            takeovers: vec![],
        }
    }

    #[tokio::test]
    async fn change_set_dispatch() {
        let count = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        registry.on_change_set(Arc::new(Counter(count.clone())));
        registry.on_change_set(Arc::new(Counter(count.clone())));

        registry.dispatch_change_set(&change_set(), &ctx()).await.unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn handler_errors_are_attributed() {
        let mut registry = HandlerRegistry::new();
        registry.on_change_set(Arc::new(Failing));
        let err = registry.dispatch_change_set(&change_set(), &ctx()).await.unwrap_err();
        assert!(matches!(err, ClaimTrieError::Handler { ref handler, .. } if handler == "failing"));
    }
}
