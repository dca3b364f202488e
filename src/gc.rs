// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The mark engine and the sweep phase. `Collector` owns the mark worklist
//! and the cycle state machine; it knows nothing about where roots come
//! from (that's [`crate::roots`]) or about the underlying platform
//! allocator (that's [`crate::alloc`]).

use crate::alloc::{self, HeapIndex};
use crate::header::{self, header_of, WORD_SIZE};
use log::trace;
use parking_lot::Mutex;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum CollectorState {
    Ready,
    RootScanning,
    Marking,
    Sweeping,
}

/// Toggles used by the test suite to isolate a single phase of a collection
/// cycle (e.g. run the preparation/root-scan step without actually
/// reclaiming anything).
#[derive(Debug, Clone, Copy)]
pub struct DebugFlags {
    pub mark_phase: bool,
    pub sweep_phase: bool,
}

impl Default for DebugFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugFlags {
    pub fn new() -> Self {
        Self {
            mark_phase: true,
            sweep_phase: true,
        }
    }

    pub fn mark_phase(mut self, val: bool) -> Self {
        self.mark_phase = val;
        self
    }

    pub fn sweep_phase(mut self, val: bool) -> Self {
        self.sweep_phase = val;
        self
    }
}

/// Statistics reported to the caller/logs after a sweep, used both for
/// `log::debug!` cycle summaries and by tests asserting on exact counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub live_before: usize,
    pub live_after: usize,
    pub bytes_reclaimed: usize,
}

pub(crate) struct Collector {
    worklist: Vec<usize>,
    pub(crate) state: Mutex<CollectorState>,
}

impl Collector {
    pub(crate) fn new() -> Self {
        Self {
            worklist: Vec::new(),
            state: Mutex::new(CollectorState::Ready),
        }
    }

    /// Attempts to begin a cycle. Returns `false` (and does nothing else) if
    /// a cycle is already in progress, i.e. `collect` was invoked
    /// reentrantly (for example from a `Drop` impl running during a
    /// previous cycle's sweep).
    pub(crate) fn try_begin(&self) -> bool {
        let mut cstate = self.state.lock();
        match *cstate {
            CollectorState::Ready => {
                *cstate = CollectorState::RootScanning;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_state(&self, s: CollectorState) {
        *self.state.lock() = s;
    }

    pub(crate) fn finish(&self) {
        *self.state.lock() = CollectorState::Ready;
    }

    /// Marks `payload` reachable and transitively marks everything it
    /// points to. `payload` must already be a known allocation (explicit
    /// roots are passed here directly); candidate words discovered while
    /// conservatively scanning a range must be membership-tested first, see
    /// [`Collector::mark_range`].
    pub(crate) fn mark_from(&mut self, heap: &HeapIndex, payload: usize) {
        if self.try_mark(payload) {
            self.worklist.push(payload);
            self.drain_worklist(heap);
        }
    }

    /// Conservatively scans `[start, end)`, aligning `start` up and `end`
    /// down to word boundaries, and marks any word that happens to equal a
    /// live payload address. Values not present in `heap` are ignored, even
    /// if they point inside a payload (no interior-pointer support).
    pub(crate) fn mark_range(&mut self, heap: &HeapIndex, start: usize, end: usize) {
        let start = header::align_up(start, WORD_SIZE);
        let end = header::align_down(end, WORD_SIZE);
        let mut found = 0usize;
        let mut addr = start;
        while addr < end {
            let word = unsafe { *(addr as *const usize) };
            if heap.contains(word) && self.try_mark(word) {
                found += 1;
                self.worklist.push(word);
                self.drain_worklist(heap);
            }
            addr += WORD_SIZE;
        }
        trace!(
            "mark_range [{:#x}, {:#x}): {} new root(s) found",
            start,
            end,
            found
        );
    }

    /// Sets the mark bit on `payload`'s header if it isn't already set.
    /// Returns whether the bit was actually flipped, i.e. whether the
    /// caller still needs to scan this block's contents.
    fn try_mark(&self, payload: usize) -> bool {
        let hdr = unsafe { header_of(payload as *const u8) };
        unsafe {
            if (*hdr).mark() {
                false
            } else {
                (*hdr).set_mark(true);
                true
            }
        }
    }

    /// Processes every block pushed onto the worklist, checking each word
    /// of its payload for values that look like pointers into the heap.
    /// Equivalent to the recursive description in the mark engine's
    /// contract, but bounded by heap size rather than native stack depth.
    fn drain_worklist(&mut self, heap: &HeapIndex) {
        while let Some(payload) = self.worklist.pop() {
            let hdr = unsafe { header_of(payload as *const u8) };
            let size = unsafe { (*hdr).size() };
            // Trailing bytes short of a whole word cannot form a
            // word-aligned pointer, so truncating here is correct.
            let words = size / WORD_SIZE;
            for i in 0..words {
                let word_addr = payload + i * WORD_SIZE;
                let word = unsafe { *(word_addr as *const usize) };
                if heap.contains(word) && self.try_mark(word) {
                    self.worklist.push(word);
                }
            }
        }
    }

    /// Partitions `heap` into survivors (mark reset to 0) and unmarked
    /// blocks, freeing the latter via [`crate::alloc::free`]. Returns
    /// statistics for the cycle-summary log line.
    pub(crate) fn sweep(&mut self, heap: &mut HeapIndex) -> SweepStats {
        let live_before = heap.len();
        let mut condemned = Vec::new();

        for payload in heap.iter() {
            let hdr = unsafe { header_of(payload as *const u8) };
            unsafe {
                if (*hdr).mark() {
                    (*hdr).set_mark(false);
                } else {
                    condemned.push(payload);
                }
            }
        }

        let mut bytes_reclaimed = 0usize;
        for payload in &condemned {
            let hdr = unsafe { header_of(*payload as *const u8) };
            bytes_reclaimed += unsafe { (*hdr).size() };
            alloc::free(heap, *payload as *mut u8);
        }

        SweepStats {
            live_before,
            live_after: heap.len(),
            bytes_reclaimed,
        }
    }
}
