// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Scrubs a large swath of currently-unused stack memory before a collection
//! a test expects to reclaim something. A conservative scan has no way to
//! tell a stale, reusable stack slot from a live local, so a byte pattern
//! left over from an earlier call that happens to equal a just-freed
//! payload address keeps that block alive. Mirrors `clear_stack_above` in
//! the reference implementation this scenario suite is drawn from.

const SCRUB_BYTES: usize = 64 * 1024;

#[inline(never)]
pub fn clear_stack_above() {
    let mut buf = [0xbbu8; SCRUB_BYTES];
    for b in buf.iter_mut() {
        unsafe { std::ptr::write_volatile(b, 0xbb) };
    }
    std::hint::black_box(&buf);
}
