// Run-time:
//   status: success

// A 3-node cycle (a -> b -> c -> a) rooted only through `a`. Each node is a
// raw two-word block: word 0 is the `edge` pointer, word 1 is an id used to
// check the graph was built and traversed correctly.

use convgc::{DebugFlags, GcState};

const WORD: usize = std::mem::size_of::<usize>();
const NODE_SIZE: usize = 2 * WORD;

unsafe fn set_edge(node: *mut u8, edge: *mut u8) {
    *(node as *mut usize) = edge as usize;
}

unsafe fn edge(node: *mut u8) -> *mut u8 {
    *(node as *const usize) as *mut u8
}

unsafe fn set_id(node: *mut u8, id: usize) {
    *((node as *mut usize).add(1)) = id;
}

unsafe fn id(node: *mut u8) -> usize {
    *((node as *const usize).add(1))
}

fn make_objgraph(gc: &mut GcState) -> *mut u8 {
    let a = gc.allocate_zeroed(NODE_SIZE).unwrap();
    let b = gc.allocate_zeroed(NODE_SIZE).unwrap();
    let c = gc.allocate_zeroed(NODE_SIZE).unwrap();

    unsafe {
        set_id(a, 1);
        set_id(b, 2);
        set_id(c, 3);
        set_edge(a, b);
        set_edge(b, c);
        set_edge(c, a);
    }
    a
}

fn main() {
    let _ = env_logger::try_init();

    let mut gc = GcState::create();
    gc.debug_flags(DebugFlags::new().sweep_phase(false));

    let a = make_objgraph(&mut gc);
    gc.add_root(a);
    gc.collect();

    unsafe {
        assert_eq!(id(a), 1);
        assert!(convgc::debug::is_marked(a));

        let b = edge(a);
        assert_eq!(id(b), 2);
        assert!(convgc::debug::is_marked(b));

        let c = edge(b);
        assert_eq!(id(c), 3);
        assert!(convgc::debug::is_marked(c));

        // c -> a closes the cycle.
        assert_eq!(edge(c), a);
    }

    // A full collection must retain the whole cycle: it is reachable in its
    // entirety from the single explicit root.
    gc.debug_flags(DebugFlags::new());
    gc.collect();
    assert_eq!(gc.object_count(), 3);
}
