// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The allocator and the heap index. The allocator layers a [`Header`] on
//! top of Rust's platform allocator; the heap index tracks every currently
//! live payload address so the mark engine can test candidate pointers for
//! membership in expected constant time.

use crate::error::GcError;
use crate::header::{self, Header, MAX_PAYLOAD_SIZE, PAYLOAD_ALIGN};
use std::alloc::{alloc, alloc_zeroed, dealloc, Layout};
use std::collections::HashSet;

/// The set of currently live payload addresses. The payload address is the
/// canonical identity of a block; the host never sees the header.
#[derive(Default)]
pub(crate) struct HeapIndex {
    live: HashSet<usize>,
}

impl HeapIndex {
    pub(crate) fn new() -> Self {
        Self {
            live: HashSet::new(),
        }
    }

    pub(crate) fn insert(&mut self, payload: usize) {
        self.live.insert(payload);
    }

    pub(crate) fn erase(&mut self, payload: usize) -> bool {
        self.live.remove(&payload)
    }

    pub(crate) fn contains(&self, payload: usize) -> bool {
        self.live.contains(&payload)
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.live.iter().copied()
    }
}

fn block_layout(payload_size: usize) -> Layout {
    let total = Header::payload_offset() + payload_size;
    // `total` need not be a multiple of PAYLOAD_ALIGN (payload_size is only
    // word-rounded); Layout::from_size_align doesn't require that, only that
    // `total` rounds up to a multiple of `align` without overflowing isize.
    Layout::from_size_align(total, PAYLOAD_ALIGN).expect("block layout is always valid")
}

/// Allocates a new block with at least `size` payload bytes, inserting the
/// resulting payload address into `index`. Returns `None` on underlying
/// allocator failure, matching the spec's "null on OOM" contract.
///
/// `zeroed` controls whether the payload is zero-initialized before return.
pub(crate) fn allocate(
    index: &mut HeapIndex,
    size: usize,
    zeroed: bool,
) -> Result<Option<*mut u8>, GcError> {
    if size as u64 > MAX_PAYLOAD_SIZE {
        return Err(GcError::OversizedAllocation {
            requested: size,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let payload_size = header::round_to_word(size);
    let layout = block_layout(payload_size);

    let base = unsafe {
        if zeroed {
            alloc_zeroed(layout)
        } else {
            alloc(layout)
        }
    };
    if base.is_null() {
        return Ok(None);
    }

    unsafe {
        (base as *mut Header).write(Header::new(payload_size));
    }

    let payload = unsafe { base.add(Header::payload_offset()) };
    debug_assert_eq!(payload as usize % PAYLOAD_ALIGN, 0);

    index.insert(payload as usize);
    Ok(Some(payload))
}

/// Frees `payload` if it is tracked by `index`; a no-op otherwise (this
/// makes double-free safe against the collector's own prior sweep).
pub(crate) fn free(index: &mut HeapIndex, payload: *mut u8) {
    if !index.erase(payload as usize) {
        return;
    }
    unsafe {
        let hdr = header::header_of(payload);
        let payload_size = (*hdr).size();
        let layout = block_layout(payload_size);
        dealloc(hdr as *mut u8, layout);
    }
}
