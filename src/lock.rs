//! The named-lock interface (§6, consumed) used to make the initial
//! topology load single-flight (§4.9), plus a default in-process
//! implementation for single-process deployments and tests.
//!
//! A real cross-worker deployment (multiple OS processes sharing a Redis
//! Cluster) should supply its own `NamedLock`, e.g. backed by a `SETNX` on a
//! well-known key against one of the seed nodes, the way the original
//! `resty-redis-cluster` source uses an nginx shared-dict lock. That
//! concrete primitive is out of scope for this crate (§1); we only consume
//! the trait.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, OnceLock};

use crate::error::RedisResult;

/// An opaque handle identifying a held lock, returned by `lock` and
/// consumed by `unlock`.
pub struct LockHandle(String);

/// A cross-worker mutex keyed by name.
///
/// `lock` blocks the caller until the named lock is acquired (or returns an
/// error); `unlock` releases a handle obtained from `lock`.
pub trait NamedLock {
    fn lock(&self, name: &str) -> RedisResult<LockHandle>;
    fn unlock(&self, handle: LockHandle);
}

/// An in-process `NamedLock`: correct within one OS process (e.g. multiple
/// threads racing `init_slots` for the same cluster name), but does not
/// coordinate across processes. Sufficient for the common case where one
/// process hosts all the cluster's workers; swap in a distributed
/// implementation for a multi-process deployment.
#[derive(Default)]
pub struct InProcessNamedLock;

fn held() -> &'static (Mutex<HashMap<String, bool>>, Condvar) {
    static HELD: OnceLock<(Mutex<HashMap<String, bool>>, Condvar)> = OnceLock::new();
    HELD.get_or_init(|| (Mutex::new(HashMap::new()), Condvar::new()))
}

impl NamedLock for InProcessNamedLock {
    fn lock(&self, name: &str) -> RedisResult<LockHandle> {
        let (mutex, condvar) = held();
        let mut guard = mutex.lock().expect("named lock registry poisoned");
        while *guard.get(name).unwrap_or(&false) {
            guard = condvar.wait(guard).expect("named lock registry poisoned");
        }
        guard.insert(name.to_string(), true);
        Ok(LockHandle(name.to_string()))
    }

    fn unlock(&self, handle: LockHandle) {
        let (mutex, condvar) = held();
        let mut guard = mutex.lock().expect("named lock registry poisoned");
        guard.insert(handle.0, false);
        condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::thread;

    #[test]
    fn excludes_concurrent_holders() {
        let lock = Arc::new(InProcessNamedLock);
        let order = Arc::new(StdMutex::new(Vec::new()));
        let name = "named-lock-test-exclusion";

        let handle = lock.lock(name).unwrap();

        let lock2 = lock.clone();
        let order2 = order.clone();
        let t = thread::spawn(move || {
            let h = lock2.lock(name).unwrap();
            order2.lock().unwrap().push("second");
            lock2.unlock(h);
        });

        order.lock().unwrap().push("first");
        thread::sleep(std::time::Duration::from_millis(20));
        lock.unlock(handle);
        t.join().unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }
}
