//! Generation counter for racing asynchronous checks.
//!
//! Each dispatch takes a ticket; a response is applied only if its ticket is
//! still the latest. The underlying call is never cancelled, its result is
//! simply dropped.

/// Ticket returned by [`SequenceGuard::next`].
pub type Sequence = u64;

#[derive(Debug, Clone, Default)]
pub struct SequenceGuard {
    current: Sequence,
}

impl SequenceGuard {
    /// Advances the counter and returns the new ticket.
    pub fn next(&mut self) -> Sequence {
        self.current += 1;
        self.current
    }

    /// Whether `seq` is the most recently issued ticket.
    pub fn is_current(&self, seq: Sequence) -> bool {
        seq == self.current
    }

    pub fn current(&self) -> Sequence {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_latest_ticket_is_current() {
        let mut guard = SequenceGuard::default();
        let a = guard.next();
        let b = guard.next();
        assert!(!guard.is_current(a));
        assert!(guard.is_current(b));
        assert_eq!(guard.current(), 2);
    }

    #[test]
    fn fresh_guard_accepts_nothing_issued() {
        let guard = SequenceGuard::default();
        assert!(!guard.is_current(1));
    }
}
