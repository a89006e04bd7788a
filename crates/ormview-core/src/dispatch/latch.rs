//! Completion counter used by the parallel dispatcher.

use parking_lot::{Condvar, Mutex};

/// Wait-group counting outstanding query trees.
///
/// Every tree counts down exactly once: when it completes, is skipped, or
/// fails. Skipped and failed trees count down their whole subtree at once.
#[derive(Debug)]
pub struct CompletionCounter {
    remaining: Mutex<usize>,
    zero: Condvar,
}

impl CompletionCounter {
    /// Create a counter expecting `count` completions.
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    /// Record `count` completions. Returns the number still outstanding.
    pub fn done(&self, count: usize) -> usize {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(count);
        if *remaining == 0 {
            self.zero.notify_all();
        }
        *remaining
    }

    /// Outstanding completions.
    pub fn remaining(&self) -> usize {
        *self.remaining.lock()
    }

    /// Block until every completion has been recorded.
    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.zero.wait(&mut remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_when_counted_down() {
        let counter = Arc::new(CompletionCounter::new(3));
        let worker = {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                counter.done(1);
                counter.done(2);
            })
        };
        counter.wait();
        worker.join().unwrap();
        assert_eq!(counter.remaining(), 0);
    }

    #[test]
    fn test_zero_count_does_not_block() {
        let counter = CompletionCounter::new(0);
        counter.wait();
        assert_eq!(counter.done(5), 0);
    }
}
