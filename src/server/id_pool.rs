//! Window id pool
//!
//! Ids are handed to clients in blocks before they need them, so creating
//! a window never waits on a round trip. An id is never handed out twice.

use tessera_proto::WindowId;

#[derive(Debug)]
pub struct IdPool {
    /// Ids handed out so far; the next one is `issued + 1`
    issued: u32,
    limit: WindowId,
}

impl IdPool {
    /// Pool serving ids `1..=limit`
    pub fn new(limit: u32) -> Self {
        Self { issued: 0, limit }
    }

    /// Reserve up to `count` consecutive ids; `None` once the pool is dry
    pub fn allocate(&mut self, count: u32) -> Option<(WindowId, u32)> {
        let remaining = self.remaining();
        if remaining == 0 || count == 0 {
            return None;
        }
        let granted = count.min(remaining);
        let first = self.issued + 1;
        self.issued += granted;
        Some((first, granted))
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.issued)
    }
}
