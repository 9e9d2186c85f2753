//! In-memory diagnostics ring.
//!
//! A small, bounded log of recent protocol activity that the UI layer can
//! display. Constructed explicitly and injected where needed; the core never
//! reaches for a hidden singleton.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Bounded ring of recent event lines, oldest first.
pub struct EventLog {
    entries: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl EventLog {
    /// Create a ring holding at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn record(&self, line: impl Into<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(line.into());
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order() {
        let log = EventLog::new(10);
        log.record("a");
        log.record("b");
        assert_eq!(log.snapshot(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let log = EventLog::new(2);
        log.record("a");
        log.record("b");
        log.record("c");
        assert_eq!(log.len(), 2);
        assert_eq!(log.snapshot(), vec!["b".to_string(), "c".to_string()]);
    }
}
