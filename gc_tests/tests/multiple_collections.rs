// Run-time:
//  status: success

use convgc::{DebugFlags, GcState};

fn main() {
    let _ = env_logger::try_init();

    let mut gc = GcState::create();
    let y = gc.allocate_zeroed(std::mem::size_of::<usize>()).unwrap();

    // Both phases disabled: collect() must be a safe no-op, y is untouched
    // either way.
    gc.debug_flags(DebugFlags::new().mark_phase(false).sweep_phase(false));
    gc.collect();
    assert!(!unsafe { convgc::debug::is_marked(y) });
    assert_eq!(gc.object_count(), 1);

    // Mark phase only: y should come out marked but not reclaimed, since
    // sweep never runs.
    gc.debug_flags(DebugFlags::new().sweep_phase(false));
    gc.collect();
    assert!(unsafe { convgc::debug::is_marked(y) });
    assert_eq!(gc.object_count(), 1);

    // A full collection: y is still reachable off the stack, so it survives
    // the sweep, and a surviving block must have its mark bit reset to 0.
    gc.debug_flags(DebugFlags::new());
    gc.collect();
    assert!(!unsafe { convgc::debug::is_marked(y) });
    assert_eq!(gc.object_count(), 1);
}
