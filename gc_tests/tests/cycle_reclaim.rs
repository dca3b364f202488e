// Run-time:
//  status: success

// A two-node cycle (x <-> y) with no root anywhere. A naive refcounting
// scheme would leak this forever; mark-and-sweep must reclaim both. x and y
// are only ever named inside a helper that returns before collect() runs,
// so neither address is a live local in the frame the stack scan sees.

#[path = "../support/clear_stack.rs"]
mod clear_stack;

use clear_stack::clear_stack_above;
use convgc::GcState;

fn write_word(ptr: *mut u8, value: usize) {
    unsafe { *(ptr as *mut usize) = value };
}

#[inline(never)]
fn build_unrooted_cycle(gc: &mut GcState) {
    let x = gc.allocate_zeroed(8).unwrap();
    let y = gc.allocate_zeroed(8).unwrap();
    write_word(x, y as usize);
    write_word(y, x as usize);
    // Neither x nor y is ever passed to add_root.
}

fn main() {
    let _ = env_logger::try_init();

    let mut gc = GcState::create();
    build_unrooted_cycle(&mut gc);
    assert_eq!(gc.object_count(), 2);

    clear_stack_above();
    gc.collect();
    assert_eq!(
        gc.object_count(),
        0,
        "mark-and-sweep must reclaim unreachable cycles"
    );
}
