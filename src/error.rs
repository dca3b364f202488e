// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Typed errors for the fatal, contract-violation paths described in the
//! collector's error handling design. Recoverable conditions (out-of-memory
//! on allocation) are *not* represented here: they are surfaced in-band as a
//! null/absent payload pointer, matching the external interface contract.

use thiserror::Error;

/// A fatal precondition failure. Every variant here indicates that a
/// contract between the host and the collector (or between the collector
/// and the compiler/OS) has been broken; none of these are expected in
/// normal operation.
#[derive(Debug, Error)]
pub enum GcError {
    /// The requested payload size would encroach on the mark bit stored in
    /// the header's most significant bit.
    #[error(
        "allocation of {requested} bytes would overflow the header's size field (max {max})"
    )]
    OversizedAllocation { requested: usize, max: u64 },

    /// The stack pointer captured at the start of a collection cycle did not
    /// lie between the mutator thread's stack limit and stack base. This
    /// means the frame-preservation contract (no inlining, no tail call) was
    /// violated, typically by a misbehaving build configuration.
    #[error(
        "captured stack pointer {sp:#x} is not within the mutator stack range [{limit:#x}, {base:#x})"
    )]
    StackPointerOutOfRange {
        sp: usize,
        limit: usize,
        base: usize,
    },

    /// The OS-specific query for the mutator thread's stack bounds failed.
    /// Without these bounds the collector cannot safely bound the
    /// conservative stack scan, so the cycle cannot proceed.
    #[error("failed to query the mutator thread's stack bounds: {0}")]
    ThreadStackQueryFailed(#[source] std::io::Error),

    /// A registered module's loaded image has no section/segment table the
    /// collector recognizes for this platform.
    #[error("module at base {base:#x} has no recognizable data segments for this platform")]
    UnsupportedModuleImage { base: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn every_variant_has_a_stable_non_empty_display() {
        let variants = vec![
            GcError::OversizedAllocation {
                requested: 1 << 63,
                max: (1u64 << 63) - 1,
            },
            GcError::StackPointerOutOfRange {
                sp: 1,
                limit: 2,
                base: 3,
            },
            GcError::ThreadStackQueryFailed(io::Error::new(io::ErrorKind::Other, "boom")),
            GcError::UnsupportedModuleImage { base: 0x1000 },
        ];
        for v in variants {
            let msg = v.to_string();
            assert!(!msg.is_empty());
        }
    }
}
