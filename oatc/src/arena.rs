//! Scratch arenas for backend workers.
//!
//! Each compile unit borrows an arena for the duration of one backend call.
//! Arenas are recycled through a free list, so the pool grows to the number
//! of concurrent workers and no further.

use bumpalo::Bump;
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct ArenaPool {
    free: Mutex<Vec<Bump>>,
    created: AtomicUsize,
}

impl fmt::Debug for ArenaPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaPool")
            .field("created", &self.created())
            .field("free", &self.free.lock().len())
            .finish()
    }
}

impl ArenaPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take an arena, creating one if none is free.
    pub fn acquire(&self) -> ArenaGuard<'_> {
        let arena = self.free.lock().pop().unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            Bump::new()
        });
        ArenaGuard { pool: self, arena }
    }

    /// Arenas allocated so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

/// An arena on loan; it is reset and returned to the pool on drop.
pub struct ArenaGuard<'a> {
    pool: &'a ArenaPool,
    arena: Bump,
}

impl fmt::Debug for ArenaGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaGuard")
            .field("allocated", &self.allocated_bytes())
            .finish()
    }
}

impl ArenaGuard<'_> {
    pub fn allocated_bytes(&self) -> usize {
        self.arena.allocated_bytes()
    }
}

impl Deref for ArenaGuard<'_> {
    type Target = Bump;

    fn deref(&self) -> &Bump {
        &self.arena
    }
}

impl Drop for ArenaGuard<'_> {
    fn drop(&mut self) {
        // An empty `Bump` owns no chunk, so the swap allocates nothing.
        let mut arena = std::mem::take(&mut self.arena);
        arena.reset();
        self.pool.free.lock().push(arena);
    }
}
