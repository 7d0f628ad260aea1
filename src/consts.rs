//! Process-wide tunables. A host process may override a subset via
//! `StoreConfig`.

/// Default page size in bytes, matching the teacher's `PAGE_SIZE`.
pub const PAGE_SIZE: usize = 8192;

pub const HEAP_HEADER_AND_CHAIN_SLOTID: crate::ids::SlotId = 0;

/// Best-space drop threshold: a page only qualifies for the cache once its
/// free space exceeds this fraction of the page.
pub const BEST_SPACE_DROP_THRESHOLD_PCT: f64 = 0.30;

/// Extra margin required on top of the requested length during placement.
pub const BEST_SPACE_UNFILL_MARGIN_PCT: f64 = 0.10;

/// Cap on the number of placement candidates popped per insert.
pub const BEST_SPACE_MAX_CANDIDATES: usize = 100;

/// Default cap on total best-space entries; concrete crates may
/// override via `StoreConfig`.
pub const BEST_SPACE_DEFAULT_CAP: usize = 10_000;

/// Bound on pages visited per best-space sync round: `min(20%, 100)`.
pub const BEST_SPACE_SYNC_MAX_PAGES: usize = 100;
pub const BEST_SPACE_SYNC_PCT: f64 = 0.20;

/// Default class-representation cache capacity.
pub const CLASS_REPR_DEFAULT_CAPACITY: usize = 256;

/// Classname EXIST-cache cap.
pub const CLASSNAME_EXIST_CACHE_CAP: usize = 1024;

/// Deadlock-avoidance retry bound for multi-page heap updates.
pub const HEAP_UPDATE_RETRY_LIMIT: u32 = 20;
