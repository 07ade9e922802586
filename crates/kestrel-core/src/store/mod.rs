// ── Inventory store ──
//
// In-memory relational inventory with serialisable write transactions.
// Readers take a snapshot of the last committed state and never block.
// Writers are serialised by a mutex; a transaction edits a private copy
// of the tables that is published on commit and discarded on drop.

mod table;
mod tables;

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

pub use table::{Table, WriteCounts};
pub use tables::Tables;

#[derive(Debug, Default)]
struct Counters {
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    commits: AtomicU64,
}

#[derive(Debug)]
pub struct Inventory {
    committed: ArcSwap<Tables>,
    writer: Mutex<()>,
    counters: Counters,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    pub fn new() -> Self {
        Self {
            committed: ArcSwap::from_pointee(Tables::default()),
            writer: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    /// Last committed state.
    pub fn snapshot(&self) -> Arc<Tables> {
        self.committed.load_full()
    }

    /// Start a write transaction, waiting for any other writer to finish.
    pub async fn begin(&self) -> Transaction<'_> {
        let guard = self.writer.lock().await;
        let tables = Tables::clone(&self.committed.load());
        Transaction {
            inventory: self,
            tables,
            _guard: guard,
        }
    }

    /// Start a write transaction unless another writer holds the lock.
    pub fn try_begin(&self) -> Option<Transaction<'_>> {
        let guard = self.writer.try_lock().ok()?;
        let tables = Tables::clone(&self.committed.load());
        Some(Transaction {
            inventory: self,
            tables,
            _guard: guard,
        })
    }

    /// Rows written by all committed transactions so far.
    pub fn write_counts(&self) -> WriteCounts {
        WriteCounts {
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
        }
    }

    pub fn commit_count(&self) -> u64 {
        self.counters.commits.load(Ordering::Relaxed)
    }
}

/// Pending changes to the inventory. Dropping without committing rolls
/// back.
pub struct Transaction<'a> {
    inventory: &'a Inventory,
    tables: Tables,
    _guard: MutexGuard<'a, ()>,
}

impl Transaction<'_> {
    /// Publish the changes and return how many rows they wrote.
    pub fn commit(mut self) -> WriteCounts {
        let writes = self.tables.take_writes();
        let counters = &self.inventory.counters;
        counters.inserts.fetch_add(writes.inserts, Ordering::Relaxed);
        counters.updates.fetch_add(writes.updates, Ordering::Relaxed);
        counters.deletes.fetch_add(writes.deletes, Ordering::Relaxed);
        counters.commits.fetch_add(1, Ordering::Relaxed);
        trace!(
            inserts = writes.inserts,
            updates = writes.updates,
            deletes = writes.deletes,
            "inventory commit"
        );
        self.inventory.committed.store(Arc::new(self.tables));
        writes
    }

    /// Writes staged so far in this transaction.
    pub fn pending_writes(&self) -> WriteCounts {
        let mut copy = self.tables.clone();
        copy.take_writes()
    }
}

impl Deref for Transaction<'_> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &self.tables
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Tables {
        &mut self.tables
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::SettingValue;

    #[tokio::test]
    async fn commit_publishes_and_counts() {
        let inv = Inventory::new();
        let mut tx = inv.begin().await;
        tx.add_machine("agent", 8080).unwrap();
        tx.set_setting("x", SettingValue::Int(1));
        assert!(inv.snapshot().machines.is_empty());
        let writes = tx.commit();
        assert_eq!(writes.inserts, 2);
        assert_eq!(inv.snapshot().machines.len(), 1);
        assert_eq!(inv.write_counts().inserts, 2);
        assert_eq!(inv.commit_count(), 1);
    }

    #[tokio::test]
    async fn drop_rolls_back() {
        let inv = Inventory::new();
        {
            let mut tx = inv.begin().await;
            tx.add_machine("agent", 8080).unwrap();
        }
        assert!(inv.snapshot().machines.is_empty());
        assert!(inv.write_counts().is_empty());

        // Writes counted before a rollback must not leak into the next
        // transaction.
        let tx = inv.begin().await;
        assert!(tx.pending_writes().is_empty());
    }

    #[tokio::test]
    async fn try_begin_fails_while_a_writer_is_open() {
        let inv = Inventory::new();
        let tx = inv.begin().await;
        assert!(inv.try_begin().is_none());
        drop(tx);
        assert!(inv.try_begin().is_some());
    }

    #[tokio::test]
    async fn snapshot_is_stable_across_commits() {
        let inv = Inventory::new();
        let before = inv.snapshot();
        let mut tx = inv.begin().await;
        tx.add_machine("agent", 8080).unwrap();
        tx.commit();
        assert!(before.machines.is_empty());
        assert_eq!(inv.snapshot().machines.len(), 1);
    }
}
