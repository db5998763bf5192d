use std::sync::{Mutex, MutexGuard};

static V8_LOCK: Mutex<()> = Mutex::new(());

/// Serializes snapshot work across test threads.
/// Snapshot creation is not safe to run concurrently with isolate creation
/// on every platform, so each test holds this for its whole body.
pub fn sequential() -> MutexGuard<'static, ()> {
    let _ = env_logger::builder().is_test(true).try_init();

    // A failed test poisons the lock, later tests should still run
    V8_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
