use crate::models::media::MediaCollection;
use std::collections::HashMap;

pub const CACHE_CAPACITY: usize = 256;

// Session-scoped post id -> media map, LRU-bounded. Reads touch, membership
// checks do not.
#[derive(Debug)]
pub struct MediaCache {
    entries: HashMap<String, MediaCollection>,
    lru: Vec<String>,
    capacity: usize,
}

impl Default for MediaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaCache {
    pub fn new() -> Self {
        Self::with_capacity(CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, id: &str, collection: MediaCollection) {
        self.entries.insert(id.to_string(), collection);
        self.touch(id);
        while self.entries.len() > self.capacity && !self.lru.is_empty() {
            let oldest = self.lru.remove(0);
            self.entries.remove(&oldest);
        }
    }

    pub fn get(&mut self, id: &str) -> Option<&MediaCollection> {
        if self.entries.contains_key(id) {
            self.touch(id);
        }
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, id: &str) {
        self.lru.retain(|k| k != id);
        self.lru.push(id.to_string());
    }
}
