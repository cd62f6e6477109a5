//! Architectural constants of the DUT contract.
//!
//! These values are fixed points of the design under test and the guest
//! memory layout. They are contracts, not tunables: changing any of them
//! changes which commit streams the runner accepts.

/// Guest address at or above which accesses fold into the stack window.
///
/// The stack window occupies the top half of DUT backing memory; guest
/// addresses below this base fold into the low window `[0, M)`.
pub const STACK_BASE: u64 = 0x0000_0000_07FE_0000;

/// Reorder buffer depth of the DUT.
///
/// Same-cycle multi-lane retirement must stay in ROB order modulo this depth.
pub const ROB_DEPTH: u64 = 64;

/// Number of commit lanes sampled every cycle.
pub const COMMIT_LANES: usize = 4;

/// Size in bytes of one I$-L2 refill line.
pub const REFILL_LINE_BYTES: usize = 64;

/// Mask that aligns a fetch address down to its refill line.
pub const REFILL_LINE_MASK: u64 = !(REFILL_LINE_BYTES as u64 - 1);
