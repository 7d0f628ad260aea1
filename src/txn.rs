//! Transaction identity, shard-group ownership, and system-op nesting.
//! Grounded on the teacher's
//! `transaction::tx::Transaction` (a cheap `Copy`-ish handle carrying an id)
//! and `transaction::concurrent_status`'s per-transaction bookkeeping, with
//! the system-op stack modeled after `tx_log::log_manager::start_system_op`/
//! `end_system_op`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::ids::ShardGroupId;

pub type TransactionId = u32;

static NEXT_TXN_ID: AtomicU32 = AtomicU32::new(1);

/// How a nested system op concludes, passed to `end_system_op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemOpOutcome {
    Commit,
    Abort,
    /// Folds this op's log records into the enclosing one rather than
    /// giving it its own commit/abort boundary.
    AttachToOuter,
}

/// A running transaction: its id, the shard groups it owns for this
/// session, and a stack depth for nested top ops, so a batch that runs
/// under one top-level system op can still nest one per row inside it.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    owned_groups: HashSet<ShardGroupId>,
    system_op_depth: u32,
}

impl Transaction {
    pub fn new(owned_groups: impl IntoIterator<Item = ShardGroupId>) -> Self {
        Self {
            id: NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst),
            owned_groups: owned_groups.into_iter().collect(),
            system_op_depth: 0,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn owns_group(&self, group: ShardGroupId) -> bool {
        self.owned_groups.contains(&group)
    }

    pub fn grant_group(&mut self, group: ShardGroupId) {
        self.owned_groups.insert(group);
    }

    /// Enter a top-level or nested system op.
    pub fn start_system_op(&mut self) -> u32 {
        self.system_op_depth += 1;
        self.system_op_depth
    }

    /// `end_system_op`: pop one level of nesting. Returns the
    /// depth remaining so callers can tell whether they just closed the
    /// outermost op.
    pub fn end_system_op(&mut self, _outcome: SystemOpOutcome) -> u32 {
        debug_assert!(self.system_op_depth > 0, "end_system_op without a matching start");
        self.system_op_depth = self.system_op_depth.saturating_sub(1);
        self.system_op_depth
    }

    pub fn is_in_system_op(&self) -> bool {
        self.system_op_depth > 0
    }
}
