use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed async locks: work for the same subject runs one at a time, different
/// subjects proceed in parallel.
#[derive(Clone, Default)]
pub struct SubjectLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl SubjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, subject: i64) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // drop entries nobody holds so the map tracks only live subjects
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(subject).or_default().clone()
        };
        entry.lock_owned().await
    }
}
