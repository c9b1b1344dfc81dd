//! Per-user record of release ids that were already announced.

use std::collections::HashSet;
use std::sync::Mutex;

/// Dedup state for one user's cycle.
///
/// `snapshot` is the persisted set as it was before the cycle started and is
/// what filtering compares against. `current` is what gets written back: it
/// starts empty on the first cycle of a day and otherwise equals the snapshot.
#[derive(Debug)]
pub struct DedupState {
    snapshot: HashSet<String>,
    current: Mutex<HashSet<String>>,
}

impl DedupState {
    pub fn begin(persisted: HashSet<String>, reset: bool) -> Self {
        let current = if reset {
            HashSet::new()
        } else {
            persisted.clone()
        };
        Self {
            snapshot: persisted,
            current: Mutex::new(current),
        }
    }

    fn seen_before(&self, id: &str) -> bool {
        self.snapshot.contains(id)
    }

    /// Claim `id` for this cycle. Returns false when it was announced before
    /// the cycle or already claimed by another category or artist.
    pub fn claim(&self, id: &str) -> bool {
        if self.seen_before(id) {
            return false;
        }
        self.lock().insert(id.to_string())
    }

    /// Record `id` without filtering on it.
    pub fn record(&self, id: &str) {
        self.lock().insert(id.to_string());
    }

    pub fn into_current(self) -> HashSet<String> {
        self.current
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Stored form: a JSON array of ids, sorted so rewrites are stable.
pub fn encode(ids: &HashSet<String>) -> serde_json::Result<String> {
    let mut sorted: Vec<&String> = ids.iter().collect();
    sorted.sort();
    serde_json::to_string(&sorted)
}

pub fn decode(raw: &str) -> serde_json::Result<HashSet<String>> {
    if raw.trim().is_empty() {
        return Ok(HashSet::new());
    }
    let ids: Vec<String> = serde_json::from_str(raw)?;
    Ok(ids.into_iter().collect())
}
