//! The runtime access lock.
//!
//! The embedded runtime may be entered by one thread at a time. The lock is
//! reentrant: a thread already inside the runtime can enter again, which
//! happens whenever runtime code triggers a host operation that calls back
//! into the runtime.

use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

/// A reentrant mutual-exclusion lock with no protected data of its own.
///
/// Acquisition blocks until no other thread owns the lock. The owning thread
/// may acquire it any number of times; it is released when the last guard
/// is dropped.
#[derive(Debug, Default)]
pub struct RuntimeLock {
    owner: Mutex<Owner>,
    released: Condvar,
}

impl RuntimeLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn owner(&self) -> MutexGuard<'_, Owner> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the lock, blocking while another thread holds it.
    pub fn acquire(&self) -> LockGuard<'_> {
        let me = thread::current().id();
        let mut owner = self.owner();
        loop {
            match owner.thread {
                None => {
                    owner.thread = Some(me);
                    owner.depth = 1;
                    break;
                }
                Some(thread) if thread == me => {
                    owner.depth += 1;
                    break;
                }
                Some(_) => {
                    owner = self
                        .released
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        LockGuard::new(self)
    }

    /// Acquire the lock only if that does not require waiting.
    pub fn try_acquire(&self) -> Option<LockGuard<'_>> {
        let me = thread::current().id();
        let mut owner = self.owner();
        match owner.thread {
            None => {
                owner.thread = Some(me);
                owner.depth = 1;
            }
            Some(thread) if thread == me => owner.depth += 1,
            Some(_) => return None,
        }
        Some(LockGuard::new(self))
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner().thread == Some(thread::current().id())
    }

    /// How many guards the current thread holds (0 if it is not the owner).
    pub fn depth(&self) -> usize {
        let owner = self.owner();
        if owner.thread == Some(thread::current().id()) {
            owner.depth
        } else {
            0
        }
    }

    fn release(&self) {
        let mut owner = self.owner();
        owner.depth = owner.depth.saturating_sub(1);
        if owner.depth == 0 {
            owner.thread = None;
            drop(owner);
            self.released.notify_one();
        }
    }
}

/// Proof of holding the [`RuntimeLock`]. Not `Send`: it must be released on
/// the thread that acquired it.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a RuntimeLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> LockGuard<'a> {
    fn new(lock: &'a RuntimeLock) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
