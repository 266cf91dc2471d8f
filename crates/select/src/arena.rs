//! Per-frame scratch buffers.
//!
//! Buffers are handed out as RAII guards and return to their pool when
//! dropped, so a failed frame releases everything it borrowed.

use std::cell::{Cell, RefCell};
use std::ops::{Deref, DerefMut};

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Frames opened with [`EvalArena::frame`]
    pub frames: u64,
    /// Buffers created because the pool was empty
    pub allocations: u64,
    /// Buffers served from the pool
    pub reuses: u64,
    /// Buffers currently checked out
    pub outstanding: usize,
}

/// Reusable scratch storage for one collection.
#[derive(Debug, Default)]
pub struct EvalArena {
    coords: RefCell<Vec<Vec<[f64; 3]>>>,
    reals: RefCell<Vec<Vec<f64>>>,
    indices: RefCell<Vec<Vec<usize>>>,
    stats: Cell<ArenaStats>,
}

/// Buffer borrowed from an [`EvalArena`]; returned on drop.
pub struct ArenaBuf<'a, T> {
    buf: Vec<T>,
    pool: &'a RefCell<Vec<Vec<T>>>,
    stats: &'a Cell<ArenaStats>,
}

impl<T> Deref for ArenaBuf<'_, T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Vec<T> {
        &self.buf
    }
}

impl<T> DerefMut for ArenaBuf<'_, T> {
    fn deref_mut(&mut self) -> &mut Vec<T> {
        &mut self.buf
    }
}

impl<T> Drop for ArenaBuf<'_, T> {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        self.pool.borrow_mut().push(buf);
        let mut stats = self.stats.get();
        stats.outstanding -= 1;
        self.stats.set(stats);
    }
}

/// Marks one frame's use of the arena; logs leaked buffers on drop.
pub struct FrameScope<'a> {
    arena: &'a EvalArena,
    outstanding_at_start: usize,
}

impl Drop for FrameScope<'_> {
    fn drop(&mut self) {
        let outstanding = self.arena.stats.get().outstanding;
        if outstanding > self.outstanding_at_start {
            log::warn!(
                "{} scratch buffers still in use at end of frame",
                outstanding - self.outstanding_at_start
            );
        }
    }
}

impl EvalArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn take<'a, T>(
        &'a self,
        pool: &'a RefCell<Vec<Vec<T>>>,
    ) -> ArenaBuf<'a, T> {
        let mut stats = self.stats.get();
        let buf = match pool.borrow_mut().pop() {
            Some(buf) => {
                stats.reuses += 1;
                buf
            }
            None => {
                stats.allocations += 1;
                Vec::new()
            }
        };
        stats.outstanding += 1;
        self.stats.set(stats);
        ArenaBuf {
            buf,
            pool,
            stats: &self.stats,
        }
    }

    /// Empty coordinate buffer.
    pub fn coords(&self) -> ArenaBuf<'_, [f64; 3]> {
        self.take(&self.coords)
    }

    /// Empty real buffer.
    pub fn reals(&self) -> ArenaBuf<'_, f64> {
        self.take(&self.reals)
    }

    /// Empty index buffer.
    pub fn indices(&self) -> ArenaBuf<'_, usize> {
        self.take(&self.indices)
    }

    /// Open a frame scope.
    pub fn frame(&self) -> FrameScope<'_> {
        let mut stats = self.stats.get();
        stats.frames += 1;
        self.stats.set(stats);
        FrameScope {
            arena: self,
            outstanding_at_start: stats.outstanding,
        }
    }

    pub fn stats(&self) -> ArenaStats {
        self.stats.get()
    }

    /// Drop every pooled buffer.
    pub fn reset(&mut self) {
        self.coords.get_mut().clear();
        self.reals.get_mut().clear();
        self.indices.get_mut().clear();
    }
}
