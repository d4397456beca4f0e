use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Registry of per-client mutexes.
///
/// At most one mutating operation per client id runs at a time. Operations on
/// different clients proceed in parallel. Entries are never removed; the
/// registry grows with the number of distinct clients touched.
#[derive(Debug, Default)]
pub struct ClientLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ClientLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, client_id: &str) -> Arc<Mutex<()>> {
        let mut map = relock(&self.inner);
        map.entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the lock for `client_id`.
    pub fn with_client<R>(&self, client_id: &str, f: impl FnOnce() -> R) -> R {
        let handle = self.handle(client_id);
        let _guard = relock(&handle);
        f()
    }

    pub fn len(&self) -> usize {
        relock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lock, ignoring poison.
pub(crate) fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
