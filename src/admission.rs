//! Connection admission against a fixed capacity ceiling

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Accept,
    Reject,
}

/// Pure threshold check: `current < limit` accepts.
pub fn try_admit(current: usize, limit: usize) -> AdmissionDecision {
    if current < limit {
        AdmissionDecision::Accept
    } else {
        AdmissionDecision::Reject
    }
}

/// Why a slot could not be reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AtCapacity { current: usize, limit: usize },
    ShuttingDown,
}

/// Tracks admitted connections and hands out slots.
///
/// A slot is reserved with a CAS loop, so concurrent upgrades can never push
/// the admitted count past the limit.
pub struct AdmissionController {
    limit: usize,
    admitted: AtomicUsize,
    accepting: AtomicBool,
}

impl AdmissionController {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            admitted: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn try_reserve(&self) -> Result<(), Rejection> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Rejection::ShuttingDown);
        }

        let mut current = self.admitted.load(Ordering::Acquire);
        loop {
            if try_admit(current, self.limit) == AdmissionDecision::Reject {
                return Err(Rejection::AtCapacity {
                    current,
                    limit: self.limit,
                });
            }

            match self.admitted.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Give a slot back. Callers must release each reserved slot exactly once.
    pub fn release(&self) {
        let _ = self
            .admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Reject every future attempt
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
