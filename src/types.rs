//! Shared type aliases (`Pod<T>`, `StoreResult`).

use std::sync::{Arc, RwLock};

pub use crate::error::StoreResult;

/// A handy shortcut for shared, lock-protected global state: the
/// best-space cache, class-repr cache, and classname map are all this.
pub type Pod<T> = Arc<RwLock<T>>;

pub fn pod<T>(value: T) -> Pod<T> {
    Arc::new(RwLock::new(value))
}
