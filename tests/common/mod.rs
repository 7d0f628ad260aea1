//! Shared integration-test setup: a `setup()` helper that clears/constructs
//! fresh process-wide state so each test
//! runs against its own tempdir-backed files rather than a shared `data/`
//! directory.

use shardheap::best_space::BestSpaceCache;
use shardheap::catalog::Catalog;
use shardheap::consts::{BEST_SPACE_DEFAULT_CAP, PAGE_SIZE};
use shardheap::force::IndexRegistry;
use shardheap::lock::LockManager;
use shardheap::page::buffer::PageBuffer;
use shardheap::tx_log::LogManager;
use shardheap::utils::init_log;

pub struct Harness {
    pub _dir: tempfile::TempDir,
    pub buffer: PageBuffer,
    pub best_space: BestSpaceCache,
    pub log: LogManager,
    pub catalog: Catalog,
    pub indexes: IndexRegistry,
    pub locks: LockManager,
}

pub fn setup(replication_enabled: bool) -> Harness {
    init_log();
    let dir = tempfile::tempdir().unwrap();
    let buffer = PageBuffer::new(dir.path(), PAGE_SIZE);
    Harness {
        _dir: dir,
        buffer,
        best_space: BestSpaceCache::new(BEST_SPACE_DEFAULT_CAP),
        log: LogManager::new(replication_enabled),
        catalog: Catalog::new(),
        indexes: IndexRegistry::new(),
        locks: LockManager::new(),
    }
}
