//! Properties of the guest-address fold.
//!
//! Any range the loader accepts must map injectively: two distinct guest
//! bytes of one range never share a host byte. The fold is modular within
//! each window, so injectivity holds for ranges up to the window size.

use std::collections::HashSet;

use proptest::prelude::*;

use locksim_core::common::constants::STACK_BASE;
use locksim_core::dut::memory::map_guest_addr;

const MEM: usize = 1 << 20;

proptest! {
    /// Low-window ranges (below the stack base) map injectively.
    #[test]
    fn low_window_ranges_map_injectively(
        base in 0u64..(STACK_BASE - 4096),
        size in 1usize..4096,
    ) {
        let mut seen = HashSet::new();
        for i in 0..size {
            let host = map_guest_addr(base + i as u64, MEM);
            prop_assert!(host < MEM);
            prop_assert!(seen.insert(host), "collision at offset {i}");
        }
    }

    /// Stack-window ranges map injectively into the top half.
    #[test]
    fn stack_window_ranges_map_injectively(
        offset in 0u64..u64::from(u32::MAX),
        size in 1usize..4096,
    ) {
        let mut seen = HashSet::new();
        for i in 0..size {
            let host = map_guest_addr(STACK_BASE + offset + i as u64, MEM);
            prop_assert!(host >= MEM / 2, "stack byte landed in the low window");
            prop_assert!(host < MEM);
            prop_assert!(seen.insert(host), "collision at offset {i}");
        }
    }

    /// The fold is deterministic.
    #[test]
    fn mapping_is_pure(addr in any::<u64>()) {
        prop_assert_eq!(map_guest_addr(addr, MEM), map_guest_addr(addr, MEM));
    }
}

/// The two windows intentionally overlap in the top half of backing memory:
/// a low-window guest byte and a stack-window guest byte can share a host
/// byte. That is exactly what load-time alias detection exists to catch.
#[test]
fn windows_can_collide_across_ranges() {
    let low_guest = (MEM / 2 + 0x40) as u64;
    let stack_guest = STACK_BASE + 0x40;
    assert_eq!(
        map_guest_addr(low_guest, MEM),
        map_guest_addr(stack_guest, MEM)
    );
}
