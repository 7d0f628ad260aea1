//! Log/recovery collaborator. Grounded on the
//! teacher's `tx_log::log_manager::LogManager` (an append-only record
//! vector keyed by transaction, with `start`/`end` markers it replays on
//! abort) but narrowed to the handful of calls this subsystem makes:
//! undo/redo/undoredo appends, the overflow-delete record, system-op
//! bracketing, and the replication hooks.

use std::sync::Mutex;

use crate::ids::{ClassOid, Oid, Vpid};
use crate::txn::{SystemOpOutcome, TransactionId};

#[derive(Debug, Clone)]
pub enum LogRecord {
    UndoRedoData { tx: TransactionId, oid: Oid, before: Vec<u8>, after: Vec<u8> },
    UndoRedoRecdes { tx: TransactionId, oid: Oid, before: Option<Vec<u8>>, after: Option<Vec<u8>> },
    DelOverflow { tx: TransactionId, vpid: Vpid },
    /// Undo-only: rollback deallocates a freshly created file.
    UndoOnly { tx: TransactionId, description: String },
    SystemOpStart { tx: TransactionId, depth: u32 },
    SystemOpEnd { tx: TransactionId, depth: u32, outcome: SystemOpOutcome },
    ReplInsert { class_oid: ClassOid, pk_key: Vec<u8> },
    ReplUpdate { class_oid: ClassOid, pk_key: Vec<u8> },
    ReplDelete { class_oid: ClassOid, pk_key: Vec<u8> },
    ReplSchema { class_oid: ClassOid },
}

/// A single process-wide append log. Replication is "enabled" when
/// `replication_enabled` is set at construction, mirroring
/// `log_does_allow_replication`.
pub struct LogManager {
    records: Mutex<Vec<LogRecord>>,
    replication_enabled: bool,
}

impl LogManager {
    pub fn new(replication_enabled: bool) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            replication_enabled,
        }
    }

    pub fn log_does_allow_replication(&self) -> bool {
        self.replication_enabled
    }

    fn push(&self, record: LogRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn append_undoredo_data(&self, tx: TransactionId, oid: Oid, before: Vec<u8>, after: Vec<u8>) {
        log::debug!("log undoredo data for {}", oid);
        self.push(LogRecord::UndoRedoData { tx, oid, before, after });
    }

    pub fn append_undoredo_recdes(&self, tx: TransactionId, oid: Oid, before: Option<Vec<u8>>, after: Option<Vec<u8>>) {
        log::debug!("log undoredo recdes for {}", oid);
        self.push(LogRecord::UndoRedoRecdes { tx, oid, before, after });
    }

    pub fn append_del_ovfl_record(&self, tx: TransactionId, vpid: Vpid) {
        self.push(LogRecord::DelOverflow { tx, vpid });
    }

    pub fn append_undo_only(&self, tx: TransactionId, description: impl Into<String>) {
        self.push(LogRecord::UndoOnly { tx, description: description.into() });
    }

    /// `start_system_op`; `tx.start_system_op()` has already
    /// bumped the transaction's nesting depth, this just records the
    /// boundary in the log stream.
    pub fn start_system_op(&self, tx: &mut crate::txn::Transaction) -> u32 {
        let depth = tx.start_system_op();
        self.push(LogRecord::SystemOpStart { tx: tx.id(), depth });
        depth
    }

    pub fn end_system_op(&self, tx: &mut crate::txn::Transaction, outcome: SystemOpOutcome) -> u32 {
        let depth = tx.end_system_op(outcome);
        self.push(LogRecord::SystemOpEnd { tx: tx.id(), depth, outcome });
        depth
    }

    pub fn is_tran_in_system_op(&self, tx: &crate::txn::Transaction) -> bool {
        tx.is_in_system_op()
    }

    pub fn repl_log_insert(&self, class_oid: ClassOid, pk_key: Vec<u8>, kind: ReplOpKind) {
        if !self.replication_enabled {
            return;
        }
        let record = match kind {
            ReplOpKind::Insert => LogRecord::ReplInsert { class_oid, pk_key },
            ReplOpKind::Update => LogRecord::ReplUpdate { class_oid, pk_key },
            ReplOpKind::Delete => LogRecord::ReplDelete { class_oid, pk_key },
        };
        self.push(record);
    }

    /// Records a schema-change event for `class_oid`; a replica consumes
    /// this to invalidate any cached query plan built against the class's
    /// old shape.
    pub fn repl_log_insert_schema(&self, class_oid: ClassOid) {
        if !self.replication_enabled {
            return;
        }
        self.push(LogRecord::ReplSchema { class_oid });
    }

    /// `repl_add_update_lsa`: a no-op placeholder here since this
    /// crate does not model a replica's apply-LSA checkpoint, which lives
    /// in the out-of-scope log reader.
    pub fn repl_add_update_lsa(&self, _class_oid: ClassOid) {}

    #[cfg(test)]
    pub fn records_snapshot(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplOpKind {
    Insert,
    Update,
    Delete,
}
