// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Invocation result cache.
//!
//! Entries expire after a fixed TTL. When full, the oldest insertion is
//! evicted first; reads do not refresh an entry's position.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::types::InvocationResult;
use crate::schema::canonical_json;

/// Deterministic key for a tool id and its arguments.
///
/// Argument objects that differ only in key order share a key.
pub fn cache_key(tool_id: &str, arguments: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(arguments).as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

struct Cached {
    result: InvocationResult,
    stored_at: Instant,
}

/// Bounded TTL cache of successful invocation results.
pub struct ResultCache {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<String, Cached>,
    order: VecDeque<String>,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// A stored result younger than the TTL.
    pub fn get(&mut self, key: &str) -> Option<InvocationResult> {
        let fresh = self
            .entries
            .get(key)
            .map(|c| c.stored_at.elapsed() < self.ttl)?;
        if !fresh {
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|c| c.result.clone())
    }

    pub fn insert(&mut self, key: String, result: InvocationResult) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        }
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            Cached {
                result,
                stored_at: Instant::now(),
            },
        );
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, c| c.stored_at.elapsed() < ttl);
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
