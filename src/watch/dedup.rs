//! Bounded memory of recently seen post ids.
//!
//! Insertion order is kept in a `VecDeque`, membership in a `HashSet`; both stay
//! in sync so `seen` and `record` are amortized O(1). When the window is full the
//! oldest ids are evicted first.

use std::collections::{HashSet, VecDeque};

/// Ids remembered per watched account.
pub const IDS_PER_ACCOUNT: usize = 100;

#[derive(Debug, Default)]
pub struct DedupWindow {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl DedupWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(10_000)),
            members: HashSet::with_capacity(capacity.min(10_000)),
            capacity,
        }
    }

    /// Window sized for `accounts` watched accounts.
    pub fn for_accounts(accounts: usize) -> Self {
        Self::with_capacity(IDS_PER_ACCOUNT.saturating_mul(accounts))
    }

    pub fn seen(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Remember `id`. Already-present ids keep their position.
    pub fn record(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.members.contains(&id) {
            return;
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
        self.evict_overflow();
    }

    /// Resize the window; shrinking keeps the most recently recorded ids.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict_overflow();
    }

    pub fn resize_for_accounts(&mut self, accounts: usize) {
        self.set_capacity(IDS_PER_ACCOUNT.saturating_mul(accounts));
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_overflow(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.members.remove(&old);
            }
        }
    }
}
