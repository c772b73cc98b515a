//! Test-only helpers shared across this crate's `#[cfg(test)]` modules.

#[cfg(test)]
use std::sync::{Mutex, OnceLock};

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}
