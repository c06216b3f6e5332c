//! Atomic reference counter with last-owner teardown
//!
//! `RefCounter` tracks the logical owners of a shared object. Increment,
//! decrement and the zero check are each a single atomic read-modify-write,
//! so whichever owner performs the final decrement runs the teardown, and it
//! runs exactly once no matter how releases race.
//!
//! Memory reclamation is left to `Arc`; the counter governs when the owned
//! resources are torn down, which may be well before the last `Arc` clone
//! goes away.

use std::sync::atomic::{AtomicUsize, Ordering, fence};

/// Outcome of a successful [`RefCounter::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other owners remain
    Live(usize),
    /// This call dropped the last reference and ran the teardown
    Destroyed,
}

/// Atomic owner count for a shared object
#[derive(Debug)]
pub struct RefCounter {
    count: AtomicUsize,
}

impl RefCounter {
    /// Create a counter holding the creator's reference (count = 1)
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(1),
        }
    }

    /// Take an additional reference
    ///
    /// Returns `false` without touching the count if the object has already
    /// reached zero. Callers obtain their starting reference through a path
    /// that keeps the object live, so `false` signals a caller bug rather
    /// than a race to be retried.
    pub fn acquire(&self) -> bool {
        self.count
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |n| {
                if n == 0 { None } else { n.checked_add(1) }
            })
            .is_ok()
    }

    /// Drop one reference, running `destroy` if it was the last one
    ///
    /// Releasing an object that is already at zero is refused and leaves the
    /// count untouched; the count can never wrap below zero.
    pub fn release<F: FnOnce()>(&self, destroy: F) -> crate::Result<Release> {
        let prev = self
            .count
            .fetch_update(Ordering::Release, Ordering::Relaxed, |n| n.checked_sub(1))
            .map_err(|_| crate::Error::RefCount("release on a destroyed object".to_string()))?;

        if prev == 1 {
            // Pair with every owner's Release decrement before tearing down.
            fence(Ordering::Acquire);
            destroy();
            Ok(Release::Destroyed)
        } else {
            Ok(Release::Live(prev - 1))
        }
    }

    /// Current number of owners (a snapshot; may be stale immediately)
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Whether the last reference has been released
    pub fn is_destroyed(&self) -> bool {
        self.count() == 0
    }
}

impl Default for RefCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_starts_with_creator_reference() {
        let refs = RefCounter::new();
        assert_eq!(refs.count(), 1);
        assert!(!refs.is_destroyed());
    }

    #[test]
    fn test_release_last_runs_destroy() {
        let refs = RefCounter::new();
        let mut destroyed = 0;

        assert!(refs.acquire());
        assert_eq!(refs.release(|| destroyed += 1).unwrap(), Release::Live(1));
        assert_eq!(refs.release(|| destroyed += 1).unwrap(), Release::Destroyed);
        assert_eq!(destroyed, 1);
        assert!(refs.is_destroyed());
    }

    #[test]
    fn test_no_acquire_after_zero() {
        let refs = RefCounter::new();
        refs.release(|| {}).unwrap();

        assert!(!refs.acquire());
        assert_eq!(refs.count(), 0);
    }

    #[test]
    fn test_release_after_zero_is_refused() {
        let refs = RefCounter::new();
        let mut destroyed = 0;
        refs.release(|| destroyed += 1).unwrap();

        assert!(refs.release(|| destroyed += 1).is_err());
        assert_eq!(destroyed, 1);
        assert_eq!(refs.count(), 0);
    }

    #[test]
    fn test_concurrent_release_destroys_once() {
        const OWNERS: usize = 64;

        let refs = Arc::new(RefCounter::new());
        for _ in 1..OWNERS {
            assert!(refs.acquire());
        }
        let destroyed = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..OWNERS)
            .map(|_| {
                let refs = Arc::clone(&refs);
                let destroyed = Arc::clone(&destroyed);
                std::thread::spawn(move || {
                    refs.release(|| {
                        destroyed.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<Release> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcomes.iter().filter(|o| **o == Release::Destroyed).count(),
            1
        );
        assert!(refs.is_destroyed());
    }
}
