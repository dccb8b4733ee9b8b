//! OU name → id cache shared by concurrent reconciliations.
//!
//! Entries are never refreshed on their own. An OU renamed out of band keeps
//! its stale mapping until it is evicted or overwritten by a forced lookup.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

/// Default number of OU names kept in memory.
pub const DEFAULT_OU_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Entries {
    ids: HashMap<String, String>,
    order: VecDeque<String>,
}

/// Bounded cache; the oldest insertion is evicted when full.
#[derive(Debug)]
pub struct OuCache {
    entries: Mutex<Entries>,
    capacity: usize,
}

impl Default for OuCache {
    fn default() -> Self {
        Self::new(DEFAULT_OU_CACHE_CAPACITY)
    }
}

impl OuCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.entries.lock().ids.get(name).cloned()
    }

    pub fn insert(&self, name: &str, id: &str) {
        let mut entries = self.entries.lock();
        if entries.ids.insert(name.to_string(), id.to_string()).is_some() {
            return;
        }
        entries.order.push_back(name.to_string());
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.ids.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
