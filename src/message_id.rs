// ABOUTME: Process-wide message identifier source
// ABOUTME: Strictly increasing ids handed out to accepted submissions

use crate::pdu::format_as_hex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Strictly increasing message ids. The first id issued is `initial + 1`.
///
/// Wraps silently at `u64::MAX`.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    last: AtomicU64,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(initial: u64) -> Self {
        MessageIdGenerator {
            last: AtomicU64::new(initial),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Next id in its wire form.
    pub fn next_hex(&self) -> (u64, String) {
        let id = self.next_id();
        (id, format_as_hex(id))
    }

    pub fn last_issued(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}
