// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Tunables for a [`crate::GcState`]: the auto-collect allocation threshold
//! and the mark/sweep phase debug flags.

use crate::gc::DebugFlags;

/// A threshold high enough that tests (and hosts) must opt into
/// auto-collection explicitly, mirroring the teacher crate's
/// `set_threshold`, generalized here from an implicit global counter to a
/// per-[`crate::GcState`] one.
const DEFAULT_THRESHOLD: usize = usize::MAX;

pub struct GcConfig {
    /// `collect()` runs automatically once this many allocations have
    /// happened since the last cycle.
    pub(crate) threshold: usize,
    pub(crate) debug_flags: DebugFlags,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            debug_flags: DebugFlags::new(),
        }
    }
}

impl GcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }

    pub fn set_debug_flags(&mut self, flags: DebugFlags) {
        self.debug_flags = flags;
    }
}
