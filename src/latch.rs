//! # Page Latch
//!
//! A short-duration read/write lock protecting a single page. One latch is
//! embedded next to every page; traversals hold at most two at a time
//! (parent and child, briefly, while crabbing down or sideways).
//!
//! ## State Encoding
//!
//! A single atomic counter holds the whole state:
//!
//! ```text
//! bit 0      writer present
//! bits 1..   reader count (each reader adds 2)
//! ```
//!
//! ## Protocol
//!
//! - Readers increment the counter when no writer bit is set. The blocking
//!   variant falls back to a mutex used only for writer/waiter coordination;
//!   the mutex never protects page data.
//! - Writers take the mutex, set the writer bit once the previous writer has
//!   left, then spin until the reader count drains to zero. The writer bit
//!   blocks new readers during the drain.
//! - `attempt_upgrade` transitions from "exactly one reader" to "writer" and
//!   succeeds only if the calling thread is that sole reader. It never
//!   waits: on contention the caller abandons its structural change.
//! - `downgrade` converts a write latch back into a read latch atomically,
//!   so a structural change can finish while letting readers back in.
//!
//! Acquire ordering is applied on every acquire/upgrade path and release
//! ordering on every release/downgrade path, so page writes performed under
//! the latch are visible to the next holder.
//!
//! All `attempt_*` variants are non-blocking; `acquire_read` and
//! `acquire_write` are the only suspension points in the crate.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

const WRITER: u32 = 0x1;
const READER: u32 = 0x2;

/// Read/write latch with upgrade and downgrade.
#[derive(Debug, Default)]
pub struct Latch {
    counter: AtomicU32,
    mutex: Mutex<()>,
}

impl Latch {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
            mutex: Mutex::new(()),
        }
    }

    /// Tries to enter as a reader. Fails if a writer is present or the
    /// counter moved under us.
    pub fn attempt_read(&self) -> bool {
        let prev = self.counter.load(Ordering::Relaxed);
        if prev & WRITER != 0 {
            return false;
        }
        self.counter
            .compare_exchange(prev, prev + READER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Enters as a reader, waiting for any writer to leave.
    pub fn acquire_read(&self) {
        if self.attempt_read() {
            return;
        }
        let guard = self.mutex.lock();
        while self.counter.load(Ordering::Relaxed) & WRITER != 0 {
            std::hint::spin_loop();
        }
        self.counter.fetch_add(READER, Ordering::Acquire);
        drop(guard);
    }

    pub fn release_read(&self) {
        debug_assert!(self.has_reader());
        self.counter.fetch_sub(READER, Ordering::Release);
    }

    fn attempt_transition(&self, expected: u32) -> bool {
        if self.counter.load(Ordering::Relaxed) != expected {
            return false;
        }
        let Some(guard) = self.mutex.try_lock() else {
            return false;
        };
        let ok = self
            .counter
            .compare_exchange(expected, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        drop(guard);
        ok
    }

    /// Tries to enter as a writer from the idle state. Never waits.
    pub fn attempt_write(&self) -> bool {
        self.attempt_transition(0)
    }

    /// Enters as a writer: sets the writer bit under the mutex, then spins
    /// until all readers have drained.
    pub fn acquire_write(&self) {
        {
            let _guard = self.mutex.lock();
            while self.counter.load(Ordering::Relaxed) & WRITER != 0 {
                std::hint::spin_loop();
            }
            self.counter.fetch_add(WRITER, Ordering::Acquire);
        }
        while self.counter.load(Ordering::Acquire) & !WRITER != 0 {
            std::hint::spin_loop();
        }
    }

    pub fn release_write(&self) {
        debug_assert_eq!(self.counter.load(Ordering::Relaxed), WRITER);
        self.counter.store(0, Ordering::Release);
    }

    /// Upgrades a read latch to a write latch. Succeeds only if the calling
    /// thread is the sole reader; never waits.
    pub fn attempt_upgrade(&self) -> bool {
        debug_assert!(self.has_reader());
        self.attempt_transition(READER)
    }

    /// Converts a write latch into a read latch without letting a writer in
    /// between.
    pub fn downgrade(&self) {
        debug_assert_eq!(self.counter.load(Ordering::Relaxed), WRITER);
        self.counter.store(READER, Ordering::Release);
    }

    pub fn has_reader(&self) -> bool {
        self.counter.load(Ordering::Relaxed) & !WRITER != 0
    }

    pub fn has_writer(&self) -> bool {
        self.counter.load(Ordering::Relaxed) & WRITER != 0
    }
}
