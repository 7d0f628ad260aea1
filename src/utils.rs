//! Small ergonomics helpers.

use std::sync::{Once, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A handy shortcut to replace the `RwLock` write/read().unwrap() pattern,
/// in the spirit of tikv_util's `HandyRwLock`.
pub trait HandyRwLock<T> {
    fn wl(&self) -> RwLockWriteGuard<'_, T>;
    fn rl(&self) -> RwLockReadGuard<'_, T>;
}

impl<T> HandyRwLock<T> for RwLock<T> {
    fn wl(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap()
    }

    fn rl(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap()
    }
}

static INIT: Once = Once::new();

/// Initialize `env_logger` exactly once; safe to call from every test.
pub fn init_log() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
