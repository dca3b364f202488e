// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `convgc` is a conservative, stop-the-world, mark-and-sweep garbage
//! collector for a native heap of opaque, untyped blocks.
//!
//! The host allocates blocks with [`GcState::allocate`] /
//! [`GcState::allocate_zeroed`] and may register additional roots
//! ([`GcState::add_root`]) and modules whose globals may hold live pointers
//! ([`GcState::register_module`]). [`GcState::collect`] then conservatively
//! scans the explicit root set, registered module data segments, the
//! calling thread's stack, and its CPU registers, and reclaims every block
//! no chain of word-sized pointers reaches.
//!
//! There is no type information anywhere in this crate: a payload is just
//! bytes, and any word that happens to equal a live payload address is
//! treated as a pointer to it. This is what "conservative" means, and it is
//! the source of essentially every `unsafe` block below.

mod alloc;
pub mod config;
pub mod error;
mod gc;
mod header;
mod roots;

use alloc::HeapIndex;
use config::GcConfig;
use error::GcError;
use gc::{Collector, CollectorState};
pub use gc::{DebugFlags, SweepStats};
use log::{debug, warn};
use roots::{ModuleRegistry, RootSet};

/// A single collector instance: its own heap, root set, module registry,
/// and configuration. There is no process-wide singleton; a host wanting a
/// de-facto global collector owns one `GcState` and shares it explicitly.
pub struct GcState {
    heap: HeapIndex,
    roots: RootSet,
    modules: ModuleRegistry,
    collector: Collector,
    config: GcConfig,
    allocations_since_collect: usize,
    cycle_count: u64,
}

impl GcState {
    /// Creates a new, empty collector. Attempts to auto-register the main
    /// executable's data segments; failure to do so (e.g. on a platform
    /// with no root-discovery support) is logged rather than fatal, since
    /// the host may register modules itself.
    pub fn create() -> Self {
        let mut state = Self {
            heap: HeapIndex::new(),
            roots: RootSet::new(),
            modules: ModuleRegistry::new(),
            collector: Collector::new(),
            config: GcConfig::default(),
            allocations_since_collect: 0,
            cycle_count: 0,
        };
        if let Err(e) = roots::register_main_module(&mut state.modules) {
            warn!("could not auto-register the main executable's data segments: {e}");
        }
        state
    }

    /// Registers `ptr` (a payload pointer previously returned by this
    /// collector) as an explicit GC root. No duplicate check is performed;
    /// registering the same pointer twice is harmless.
    pub fn add_root(&mut self, ptr: *mut u8) {
        self.roots.add(ptr as usize);
    }

    /// Parses the image at `module_base` and registers any writable data
    /// segments it finds (`.data`/`.bss` on PE, writable `PT_LOAD` segments
    /// on ELF) so they are scanned as roots on every subsequent cycle. A
    /// module with no recognizable segments contributes nothing; this is
    /// not an error, so the host may call this blindly.
    pub fn register_module(&mut self, module_base: *const u8) -> Result<(), GcError> {
        self.modules.register(module_base as usize)
    }

    /// Allocates a block of at least `size` uninitialized payload bytes.
    /// Returns `None` on underlying allocator failure.
    ///
    /// # Panics
    /// Panics if `size` is large enough to encroach on the header's mark
    /// bit; this is a contract violation, not a recoverable condition (see
    /// the crate's error handling design).
    pub fn allocate(&mut self, size: usize) -> Option<*mut u8> {
        let ptr = alloc::allocate(&mut self.heap, size, false)
            .unwrap_or_else(|e| panic!("{e}"));
        self.note_allocation();
        ptr
    }

    /// As [`GcState::allocate`], but the payload is byte-zeroed before
    /// return.
    pub fn allocate_zeroed(&mut self, size: usize) -> Option<*mut u8> {
        let ptr = alloc::allocate(&mut self.heap, size, true).unwrap_or_else(|e| panic!("{e}"));
        self.note_allocation();
        ptr
    }

    /// Frees `ptr` immediately. A no-op if `ptr` is not currently tracked
    /// (including if it was already reclaimed by a prior `collect`), which
    /// makes double-free safe.
    pub fn free(&mut self, ptr: *mut u8) {
        alloc::free(&mut self.heap, ptr);
    }

    /// The number of currently live blocks; exactly the heap index's
    /// cardinality.
    pub fn object_count(&self) -> usize {
        self.heap.len()
    }

    /// Sets the auto-collect allocation threshold: `collect()` runs
    /// automatically once this many allocations have happened since the
    /// last cycle (manual or automatic).
    pub fn set_threshold(&mut self, threshold: usize) {
        self.config.set_threshold(threshold);
    }

    /// Swaps the mark/sweep phase debug flags, letting tests isolate a
    /// single phase of a collection cycle.
    pub fn debug_flags(&mut self, flags: DebugFlags) {
        self.config.set_debug_flags(flags);
    }

    fn note_allocation(&mut self) {
        self.allocations_since_collect += 1;
        if self.allocations_since_collect >= self.config.threshold {
            self.collect();
        }
    }

    /// Performs a full mark-sweep cycle: scans the explicit root set, every
    /// registered module's data segments, the calling thread's stack, and
    /// its CPU registers, then reclaims every block none of those sources
    /// reach (transitively, through other live blocks).
    ///
    /// A no-op if a cycle is already in progress (i.e. this was invoked
    /// reentrantly, e.g. from a `Drop` impl running during a previous
    /// cycle's sweep).
    pub fn collect(&mut self) {
        if !self.collector.try_begin() {
            return;
        }

        self.cycle_count += 1;
        let cycle = self.cycle_count;

        let (stack_limit, stack_base) = roots::current_thread_stack_bounds()
            .unwrap_or_else(|e| panic!("{e}"));

        // Steps 1 (register spill + stack scan), 2 (data segments) and 3
        // (explicit roots) only run when mark_phase is enabled, so tests can
        // isolate the preparation step from marking, as the teacher crate's
        // `multiple_collections` scenario does.
        if self.config.debug_flags.mark_phase {
            self.collector.set_state(CollectorState::Marking);

            // This call must not be inlined and its result must be
            // consumed: the assembly stub it invokes relies on this frame
            // remaining live on the stack for the whole scan.
            roots::scan_stack_and_registers(
                &mut self.collector,
                &self.heap,
                stack_limit,
                stack_base,
            )
            .unwrap_or_else(|e| panic!("{e}"));

            for (start, end) in self.modules.iter() {
                self.collector.mark_range(&self.heap, start, end);
            }

            for root in self.roots.iter() {
                self.collector.mark_from(&self.heap, root);
            }
        }

        let stats = if self.config.debug_flags.sweep_phase {
            self.collector.set_state(CollectorState::Sweeping);
            self.collector.sweep(&mut self.heap)
        } else {
            SweepStats {
                live_before: self.heap.len(),
                live_after: self.heap.len(),
                bytes_reclaimed: 0,
            }
        };

        self.collector.finish();
        self.allocations_since_collect = 0;

        debug!(
            "gc cycle {cycle}: {} live -> {} live, {} bytes reclaimed",
            stats.live_before, stats.live_after, stats.bytes_reclaimed
        );
    }
}

/// Test-only mark-bit introspection, mirroring the teacher crate's `Debug`
/// module. Not part of the collector's stable contract; exists so the
/// integration test suite can observe mark state directly instead of
/// inferring it from object survival alone.
#[doc(hidden)]
pub mod debug {
    /// Returns whether the block at `payload` currently has its mark bit
    /// set.
    ///
    /// # Safety
    /// `payload` must have been returned by [`crate::GcState::allocate`] or
    /// [`crate::GcState::allocate_zeroed`] and not yet freed or reclaimed.
    pub unsafe fn is_marked(payload: *mut u8) -> bool {
        (*crate::header::header_of(payload)).mark()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_word(ptr: *mut u8, value: usize) {
        unsafe { *(ptr as *mut usize) = value };
    }

    #[test]
    fn allocate_and_free_track_object_count() {
        let mut gc = GcState::create();
        assert_eq!(gc.object_count(), 0);

        let a = gc.allocate(16).unwrap();
        let b = gc.allocate_zeroed(16).unwrap();
        assert_eq!(gc.object_count(), 2);

        gc.free(a);
        assert_eq!(gc.object_count(), 1);

        gc.free(b);
        assert_eq!(gc.object_count(), 0);
    }

    #[test]
    fn double_free_is_a_noop() {
        let mut gc = GcState::create();
        let a = gc.allocate(8).unwrap();
        gc.free(a);
        gc.free(a);
        assert_eq!(gc.object_count(), 0);
    }

    #[test]
    fn linear_retention_through_an_explicit_root() {
        let mut gc = GcState::create();
        let d = gc.allocate_zeroed(8).unwrap();
        let c = gc.allocate_zeroed(8).unwrap();
        let b = gc.allocate_zeroed(8).unwrap();
        let a = gc.allocate_zeroed(8).unwrap();

        gc.add_root(a);
        write_word(a, b as usize);
        write_word(b, c as usize);
        write_word(c, d as usize);

        assert_eq!(gc.object_count(), 4);
        gc.collect();
        assert_eq!(gc.object_count(), 4);
    }

    // `dropping_a_sub_reference_reclaims_its_subtree` and
    // `a_cycle_with_no_root_is_fully_reclaimed` used to live here, but both
    // assert that collect() reclaims something while running inside this
    // test harness's own call stack. collect() conservatively scans
    // [sp, stack_base), which includes this very frame; a "dead" local's
    // bit pattern is still sitting in its stack slot and gets found, so the
    // block it names is wrongly retained. They now live as process-isolated
    // scenarios in gc_tests/ (sub_reference_reclaim.rs, cycle_reclaim.rs),
    // where a stack-scrub helper runs before the reclaiming collect.

    #[test]
    fn second_collect_with_no_mutation_reclaims_nothing() {
        let mut gc = GcState::create();
        let a = gc.allocate_zeroed(8).unwrap();
        gc.add_root(a);

        gc.collect();
        let after_first = gc.object_count();
        gc.collect();
        assert_eq!(gc.object_count(), after_first);
    }

    #[test]
    fn free_after_collect_already_reclaimed_is_a_noop() {
        let mut gc = GcState::create();
        let a = gc.allocate_zeroed(8).unwrap();
        // `a` is unrooted and not stack-resident after this point other
        // than through the local it's about to be dropped from.
        drop(a);
        gc.collect();
        gc.free(a); // must not panic or double-free
    }

    // `auto_collect_fires_once_threshold_is_reached` moved for the same
    // reason: the threshold-triggered collect() fires inside this frame's
    // own loop, and a stale `garbage` pointer from a prior iteration would
    // still occupy that loop's reused stack slot. See
    // gc_tests/tests/auto_collection.rs.
}
