//! Process-lifetime configuration for the three singletons named here
//! (best-space cache, class-rep cache, classname map). No config files or
//! environment variables are part of the core ; a host process
//! passes a `StoreConfig` to `initialize()` once at startup.

use crate::consts::{BEST_SPACE_DEFAULT_CAP, CLASS_REPR_DEFAULT_CAPACITY, PAGE_SIZE};

#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub page_size: usize,
    pub best_space_cap: usize,
    pub class_repr_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            best_space_cap: BEST_SPACE_DEFAULT_CAP,
            class_repr_capacity: CLASS_REPR_DEFAULT_CAPACITY,
        }
    }
}
