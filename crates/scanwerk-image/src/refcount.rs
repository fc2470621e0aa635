// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared count cell with per-handle tokens.
//
// Every live handle owns exactly one `RefToken`. Tokens are created only by
// `RefToken::new`, `acquire` or a successful weak upgrade, so the
// count always equals the number of live tokens. The value is released once,
// by whichever token takes the count to zero.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Cleanup run exactly once when the last token is released.
pub trait Release {
    fn release(self);
}

struct Slot<T> {
    count: usize,
    value: Option<T>,
}

struct Cell<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> Cell<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // The slot holds plain data; a panic elsewhere cannot leave it
        // half-updated.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One unit of ownership over a shared value.
pub struct RefToken<T: Release> {
    cell: Arc<Cell<T>>,
    live: bool,
}

impl<T: Release> RefToken<T> {
    pub fn new(value: T) -> Self {
        Self {
            cell: Arc::new(Cell {
                slot: Mutex::new(Slot {
                    count: 1,
                    value: Some(value),
                }),
            }),
            live: true,
        }
    }

    /// A second token for the same value. `None` once this token is released.
    pub fn acquire(&self) -> Option<Self> {
        if !self.live {
            return None;
        }
        let mut slot = self.cell.lock();
        slot.value.as_ref()?;
        slot.count += 1;
        Some(Self {
            cell: Arc::clone(&self.cell),
            live: true,
        })
    }

    /// Run `f` against the value while holding the cell lock.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        if !self.live {
            return None;
        }
        self.cell.lock().value.as_ref().map(f)
    }

    /// Give up this token. Returns true if it was the last one and the value
    /// was released. Calling it again is a no-op.
    pub fn release(&mut self) -> bool {
        if !self.live {
            return false;
        }
        self.live = false;
        let taken = {
            let mut slot = self.cell.lock();
            slot.count = slot.count.saturating_sub(1);
            if slot.count == 0 {
                slot.value.take()
            } else {
                None
            }
        };
        match taken {
            Some(value) => {
                value.release();
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Whether both tokens point at the same cell.
    pub fn same_cell(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    pub fn downgrade(&self) -> WeakToken<T> {
        WeakToken {
            cell: Arc::downgrade(&self.cell),
        }
    }

    /// Live tokens on the shared cell.
    pub fn count(&self) -> usize {
        self.cell.lock().count
    }
}

impl<T: Release> Drop for RefToken<T> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Reference to a cell that does not keep the value alive.
pub struct WeakToken<T: Release> {
    cell: Weak<Cell<T>>,
}

impl<T: Release> WeakToken<T> {
    /// A new token, provided the value has not been released yet.
    pub fn upgrade(&self) -> Option<RefToken<T>> {
        let cell = self.cell.upgrade()?;
        {
            let mut slot = cell.lock();
            slot.value.as_ref()?;
            slot.count += 1;
        }
        Some(RefToken { cell, live: true })
    }
}

impl<T: Release> Clone for WeakToken<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Weak::clone(&self.cell),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted(Arc<AtomicUsize>);

    impl Release for Counted {
        fn release(self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counted() -> (RefToken<Counted>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        (RefToken::new(Counted(Arc::clone(&releases))), releases)
    }

    #[test]
    fn released_once_after_last_token() {
        let (mut a, releases) = counted();
        let mut b = a.acquire().expect("acquire");
        let mut c = b.acquire().expect("acquire");
        assert_eq!(a.count(), 3);

        assert!(!a.release());
        assert!(!a.release());
        assert!(!c.release());
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        assert!(b.release());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        drop((a, b, c));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn released_token_cannot_acquire() {
        let (mut a, _) = counted();
        a.release();
        assert!(a.acquire().is_none());
        assert!(a.with(|_| ()).is_none());
    }

    #[test]
    fn weak_upgrade_fails_after_release() {
        let (a, releases) = counted();
        let weak = a.downgrade();
        let upgraded = weak.upgrade().expect("still live");
        drop(a);
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        drop(upgraded);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn concurrent_release_is_exactly_once() {
        for _ in 0..50 {
            let (root, releases) = counted();
            let tokens: Vec<_> = (0..8).map(|_| root.acquire().expect("acquire")).collect();
            drop(root);
            let handles: Vec<_> = tokens
                .into_iter()
                .map(|mut t| {
                    std::thread::spawn(move || {
                        t.release();
                        t.release();
                    })
                })
                .collect();
            for h in handles {
                h.join().expect("join");
            }
            assert_eq!(releases.load(Ordering::SeqCst), 1);
        }
    }
}
