// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Root discovery: the explicit root set, the module data-segment registry,
//! the mutator thread's stack bounds, and the register-spill trampoline
//! that makes callee-saved registers visible to the stack scan.
//!
//! The mark engine in [`crate::gc`] has no idea which OS it runs on; every
//! platform-specific detail lives here, behind the narrow interface of
//! "here are some ranges, here is the stack window, go scan them".

use crate::error::GcError;
use crate::gc::Collector;
use crate::alloc::HeapIndex;
use log::warn;

/// The append-only sequence of explicit root payload pointers registered by
/// the host. Duplicates are allowed and harmless; there is no
/// un-registration API.
#[derive(Default)]
pub(crate) struct RootSet {
    roots: Vec<usize>,
}

impl RootSet {
    pub(crate) fn new() -> Self {
        Self { roots: Vec::new() }
    }

    pub(crate) fn add(&mut self, payload: usize) {
        self.roots.push(payload);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.roots.iter().copied()
    }
}

/// Cached `[start, end)` ranges for every registered module's writable data
/// segments. Discovery happens once, at `register`; cycles just replay the
/// cached ranges.
#[derive(Default)]
pub(crate) struct ModuleRegistry {
    ranges: Vec<(usize, usize)>,
}

impl ModuleRegistry {
    pub(crate) fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Parses `base`'s image header and caches any writable data segments
    /// found. A module with no recognizable sections contributes nothing
    /// and is not an error (the host is allowed to blindly register
    /// modules); this is logged at `warn` so the silence is still visible
    /// in logs.
    pub(crate) fn register(&mut self, base: usize) -> Result<(), GcError> {
        let segments = platform::discover_module_segments(base)?;
        if segments.is_empty() {
            warn!(
                "module at base {:#x} has no recognizable writable data segments",
                base
            );
        }
        self.ranges.extend(segments);
        Ok(())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.ranges.iter().copied()
    }
}

/// Queries the mutator thread's stack bounds and returns `(stack_limit,
/// stack_base)`, the lowest and highest reserved addresses respectively.
pub(crate) fn current_thread_stack_bounds() -> Result<(usize, usize), GcError> {
    platform::current_thread_stack_bounds()
}

/// Registers the main executable's data segments with `modules`, as
/// `GcState::create` optionally does. Unlike [`ModuleRegistry::register`],
/// the caller does not need to know the main executable's load address.
pub(crate) fn register_main_module(modules: &mut ModuleRegistry) -> Result<(), GcError> {
    let base = platform::main_module_base()?;
    modules.register(base)
}

/// Shared context threaded through the register-spill trampoline below. The
/// trampoline runs on the other side of an `extern` ABI boundary, so this
/// carries raw pointers rather than borrows.
struct StackScanCtx {
    collector: *mut Collector,
    heap: *const HeapIndex,
    stack_limit: usize,
    stack_base: usize,
    error: Option<GcError>,
}

fn stack_scan_impl(ctx: *mut u8, rsp: usize) {
    let ctx = unsafe { &mut *(ctx as *mut StackScanCtx) };
    if rsp <= ctx.stack_limit || rsp >= ctx.stack_base {
        ctx.error = Some(GcError::StackPointerOutOfRange {
            sp: rsp,
            limit: ctx.stack_limit,
            base: ctx.stack_base,
        });
        return;
    }
    let collector = unsafe { &mut *ctx.collector };
    let heap = unsafe { &*ctx.heap };
    collector.mark_range(heap, rsp, ctx.stack_base);
}

#[cfg(target_arch = "x86_64")]
mod spill {
    use super::stack_scan_impl;

    pub(super) type Callback = extern "sysv64" fn(*mut u8, usize);

    // The assembly stub (built by build.rs from src/arch/x86_64/spill_registers.S)
    // pushes every callee-saved register onto the current stack frame, computes
    // the resulting stack pointer, and calls `callback(ctx, rsp)` before
    // popping them back off and returning. This is what makes a pointer that
    // only lives in e.g. `r15` visible to a stack scan.
    #[link(name = "spillregisters", kind = "static")]
    extern "sysv64" {
        #[allow(improper_ctypes)]
        pub(super) fn spill_registers(ctx: *mut u8, callback: Callback);
    }

    pub(super) extern "sysv64" fn trampoline(ctx: *mut u8, rsp: usize) {
        stack_scan_impl(ctx, rsp)
    }
}

#[cfg(target_arch = "aarch64")]
mod spill {
    use super::stack_scan_impl;

    pub(super) type Callback = extern "C" fn(*mut u8, usize);

    #[link(name = "spillregisters", kind = "static")]
    extern "C" {
        #[allow(improper_ctypes)]
        pub(super) fn spill_registers(ctx: *mut u8, callback: Callback);
    }

    pub(super) extern "C" fn trampoline(ctx: *mut u8, rsp: usize) {
        stack_scan_impl(ctx, rsp)
    }
}

/// Flushes the callee-saved register file to the stack and conservatively
/// scans `[rsp, stack_base)`, marking any word that looks like a live
/// payload address.
///
/// # Frame-integrity contract
/// This function must never be inlined and must never be tail-called: the
/// assembly stub it calls relies on the current frame remaining on the
/// stack for the duration of the scan, and on the caller consuming the
/// return value (forcing a real `call`/`ret` rather than a jump). Do not
/// remove the `#[inline(never)]` attribute or the `Result` return value.
#[inline(never)]
#[no_mangle]
pub(crate) fn scan_stack_and_registers(
    collector: &mut Collector,
    heap: &HeapIndex,
    stack_limit: usize,
    stack_base: usize,
) -> Result<(), GcError> {
    let mut ctx = StackScanCtx {
        collector: collector as *mut Collector,
        heap: heap as *const HeapIndex,
        stack_limit,
        stack_base,
        error: None,
    };
    unsafe {
        spill::spill_registers(&mut ctx as *mut StackScanCtx as *mut u8, spill::trampoline);
    }
    match ctx.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use super::GcError;
    use libc::{c_int, c_void, dl_phdr_info, PF_W, PT_LOAD};

    pub(super) fn current_thread_stack_bounds() -> Result<(usize, usize), GcError> {
        unsafe {
            let mut attr: libc::pthread_attr_t = std::mem::zeroed();
            if libc::pthread_attr_init(&mut attr) != 0 {
                return Err(GcError::ThreadStackQueryFailed(
                    std::io::Error::last_os_error(),
                ));
            }
            let ptid = libc::pthread_self();
            let e = libc::pthread_getattr_np(ptid, &mut attr);
            if e != 0 {
                libc::pthread_attr_destroy(&mut attr);
                return Err(GcError::ThreadStackQueryFailed(
                    std::io::Error::from_raw_os_error(e),
                ));
            }
            let mut stackaddr = std::ptr::null_mut();
            let mut stacksize: usize = 0;
            let got = libc::pthread_attr_getstack(&attr, &mut stackaddr, &mut stacksize);
            libc::pthread_attr_destroy(&mut attr);
            if got != 0 {
                return Err(GcError::ThreadStackQueryFailed(
                    std::io::Error::from_raw_os_error(got),
                ));
            }
            let limit = stackaddr as usize;
            let base = limit + stacksize;
            Ok((limit, base))
        }
    }

    struct Ctx {
        base: usize,
        found: Vec<(usize, usize)>,
    }

    extern "C" fn phdr_callback(info: *mut dl_phdr_info, _size: usize, data: *mut c_void) -> c_int {
        let ctx = unsafe { &mut *(data as *mut Ctx) };
        let info = unsafe { &*info };
        if info.dlpi_addr as usize != ctx.base {
            return 0; // keep iterating
        }
        let phdrs = unsafe { std::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize) };
        for ph in phdrs {
            if ph.p_type == PT_LOAD && (ph.p_flags & PF_W) != 0 {
                let start = ctx.base + ph.p_vaddr as usize;
                let end = start + ph.p_memsz as usize;
                ctx.found.push((start, end));
            }
        }
        1 // matched the requested module, stop iterating
    }

    pub(super) fn discover_module_segments(base: usize) -> Result<Vec<(usize, usize)>, GcError> {
        let mut ctx = Ctx {
            base,
            found: Vec::new(),
        };
        unsafe {
            libc::dl_iterate_phdr(Some(phdr_callback), &mut ctx as *mut Ctx as *mut c_void);
        }
        Ok(ctx.found)
    }

    struct MainCtx {
        base: Option<usize>,
    }

    extern "C" fn first_module_callback(
        info: *mut dl_phdr_info,
        _size: usize,
        data: *mut c_void,
    ) -> c_int {
        let ctx = unsafe { &mut *(data as *mut MainCtx) };
        // glibc invokes dl_iterate_phdr's callback for the main executable
        // first, so the first invocation's load address is the main
        // module's base.
        let info = unsafe { &*info };
        ctx.base = Some(info.dlpi_addr as usize);
        1 // stop after the first entry
    }

    pub(super) fn main_module_base() -> Result<usize, GcError> {
        let mut ctx = MainCtx { base: None };
        unsafe {
            libc::dl_iterate_phdr(Some(first_module_callback), &mut ctx as *mut MainCtx as *mut c_void);
        }
        ctx.base
            .ok_or(GcError::UnsupportedModuleImage { base: 0 })
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use super::GcError;

    pub(super) fn current_thread_stack_bounds() -> Result<(usize, usize), GcError> {
        unsafe {
            let ptid = libc::pthread_self();
            // On Darwin, pthread_get_stackaddr_np returns the *highest*
            // address of the stack (the base), unlike Linux's stackaddr.
            let base = libc::pthread_get_stackaddr_np(ptid) as usize;
            let size = libc::pthread_get_stacksize_np(ptid) as usize;
            Ok((base - size, base))
        }
    }

    /// Mach-O root discovery has no reference implementation in this
    /// collector's source corpus. Rather than silently contributing no
    /// ranges (which the spec explicitly tolerates for "module has no
    /// recognizable headers"), an unimplemented platform is reported as an
    /// explicit error so the gap is visible instead of implicit.
    pub(super) fn discover_module_segments(base: usize) -> Result<Vec<(usize, usize)>, GcError> {
        Err(GcError::UnsupportedModuleImage { base })
    }

    pub(super) fn main_module_base() -> Result<usize, GcError> {
        Err(GcError::UnsupportedModuleImage { base: 0 })
    }
}

#[cfg(windows)]
mod platform {
    use super::GcError;
    use windows_sys::Win32::System::Diagnostics::Debug::{
        IMAGE_NT_HEADERS64, IMAGE_SECTION_HEADER,
    };
    use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows_sys::Win32::System::SystemServices::IMAGE_DOS_HEADER;
    use windows_sys::Win32::System::Threading::NtCurrentTeb;

    const IMAGE_DOS_SIGNATURE: u16 = 0x5A4D; // "MZ"
    const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"

    pub(super) fn current_thread_stack_bounds() -> Result<(usize, usize), GcError> {
        unsafe {
            let tib = NtCurrentTeb();
            let base = (*tib).StackBase as usize;
            let limit = (*tib).StackLimit as usize;
            Ok((limit, base))
        }
    }

    fn section_name(sec: &IMAGE_SECTION_HEADER) -> String {
        let bytes = &sec.Name;
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..len]).into_owned()
    }

    pub(super) fn discover_module_segments(base: usize) -> Result<Vec<(usize, usize)>, GcError> {
        unsafe {
            let dos = &*(base as *const IMAGE_DOS_HEADER);
            if dos.e_magic != IMAGE_DOS_SIGNATURE {
                return Ok(Vec::new());
            }
            let nt_base = base + dos.e_lfanew as usize;
            let nt = &*(nt_base as *const IMAGE_NT_HEADERS64);
            if nt.Signature != IMAGE_NT_SIGNATURE {
                return Ok(Vec::new());
            }
            let num_sections = nt.FileHeader.NumberOfSections as usize;
            let sec_table = (nt_base + std::mem::size_of::<IMAGE_NT_HEADERS64>())
                as *const IMAGE_SECTION_HEADER;
            let sections = std::slice::from_raw_parts(sec_table, num_sections);

            let mut ranges = Vec::new();
            for sec in sections {
                let name = section_name(sec);
                if name == ".data" || name == ".bss" {
                    let start = base + sec.VirtualAddress as usize;
                    let size = sec.Misc.VirtualSize as usize;
                    ranges.push((start, start + size));
                }
            }
            Ok(ranges)
        }
    }

    pub(super) fn main_module_base() -> Result<usize, GcError> {
        unsafe {
            let h = GetModuleHandleW(std::ptr::null());
            if h.is_null() {
                Err(GcError::UnsupportedModuleImage { base: 0 })
            } else {
                Ok(h as usize)
            }
        }
    }
}
