// Copyright (c) 2019 King's College London created by the Software Development
// Team <http://soft-dev.org/>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, or the UPL-1.0 license
// <http://opensource.org/licenses/UPL> at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Compiles the architecture-specific register-spill assembly stub that
//! lets the root collector see pointers that only live in callee-saved
//! registers.

fn main() {
    rerun_except::rerun_except(&["gc_tests"]).unwrap();

    let target_arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    let asm_path = match target_arch.as_str() {
        "x86_64" => "src/arch/x86_64/spill_registers.S",
        "aarch64" => "src/arch/aarch64/spill_registers.S",
        other => panic!(
            "convgc has no register-spill stub for target_arch = \"{}\"; \
             add one under src/arch/{}/spill_registers.S",
            other, other
        ),
    };

    cc::Build::new()
        .file(asm_path)
        .compile("spillregisters");
}
