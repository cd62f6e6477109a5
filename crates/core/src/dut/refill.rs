//! I$-L2 refill responder.
//!
//! Models the external level-2 instruction cache the DUT fetches lines from:
//! a ready/valid request port answered after a fixed latency with a one-cycle
//! response carrying the 64-byte line. At most one request is outstanding.
//!
//! The RTL evaluates its handshake signals mid-cycle, so a request can become
//! visible either before the tick (on the wires as left by the previous
//! cycle) or only after it. Both sampling points are honored: `drive` records
//! a pre-tick candidate, `update` latches whichever of the two fired.

use crate::common::constants::{REFILL_LINE_BYTES, REFILL_LINE_MASK};
use crate::dut::memory::map_guest_addr;
use crate::dut::{DutSignals, RefillRequest, RefillResponse};

/// Responder state across a request's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RefillState {
    /// No request outstanding; ready is asserted.
    Idle,
    /// A line request is latched and waiting out the latency.
    PendingWait {
        /// Line-aligned request address.
        addr: u64,
        /// Cycles left before the response is driven.
        remain: u64,
    },
    /// The response is driven for exactly this cycle.
    RespondNow {
        /// Line-aligned request address.
        addr: u64,
    },
}

/// The refill responder: drives the response port before each tick and
/// samples the request port around it.
#[derive(Debug)]
pub struct IcL2Refill {
    latency: u64,
    state: RefillState,
    seen_pre: bool,
    addr_pre: u64,
}

impl IcL2Refill {
    /// Creates a responder with the given request-to-response latency.
    pub fn new(latency: u64) -> Self {
        Self {
            latency,
            state: RefillState::Idle,
            seen_pre: false,
            addr_pre: 0,
        }
    }

    /// Clears any outstanding request.
    pub fn clear(&mut self) {
        self.state = RefillState::Idle;
        self.seen_pre = false;
        self.addr_pre = 0;
    }

    /// Drives the port wires for the upcoming tick and records the pre-tick
    /// request sample.
    pub fn drive<D: DutSignals>(&mut self, dut: &mut D) {
        match self.state {
            RefillState::RespondNow { addr } => {
                dut.set_ic_l2_req_ready(false);
                let rsp = RefillResponse {
                    addr,
                    data: build_line(dut, addr),
                    error: false,
                };
                dut.set_ic_l2_rsp(Some(&rsp));
            }
            RefillState::PendingWait { .. } => {
                dut.set_ic_l2_req_ready(false);
                dut.set_ic_l2_rsp(None);
                self.seen_pre = false;
            }
            RefillState::Idle => {
                dut.set_ic_l2_req_ready(true);
                dut.set_ic_l2_rsp(None);
                let RefillRequest { valid, addr } = dut.ic_l2_req();
                self.seen_pre = valid;
                self.addr_pre = addr & REFILL_LINE_MASK;
            }
        }
    }

    /// Advances the responder after the tick, latching any handshake seen at
    /// either sampling point.
    pub fn update<D: DutSignals>(&mut self, dut: &mut D) {
        match self.state {
            RefillState::RespondNow { .. } => {
                // The response was visible for exactly one cycle.
                self.state = RefillState::Idle;
            }
            RefillState::PendingWait { addr, remain } => {
                let remain = remain.saturating_sub(1);
                self.state = if remain == 0 {
                    RefillState::RespondNow { addr }
                } else {
                    RefillState::PendingWait { addr, remain }
                };
            }
            RefillState::Idle => {
                let RefillRequest { valid, addr } = dut.ic_l2_req();
                if self.seen_pre || valid {
                    let line_addr = if self.seen_pre {
                        self.addr_pre
                    } else {
                        addr & REFILL_LINE_MASK
                    };
                    self.state = RefillState::PendingWait {
                        addr: line_addr,
                        remain: self.latency,
                    };
                    self.seen_pre = false;
                    self.addr_pre = 0;
                }
            }
        }
    }
}

/// Materializes one refill line from backing instruction memory.
///
/// Bytes are laid in ascending address order through the guest-address fold.
fn build_line<D: DutSignals>(dut: &D, line_addr: u64) -> [u8; REFILL_LINE_BYTES] {
    let mem_bytes = dut.imem_len();
    let mut out = [0u8; REFILL_LINE_BYTES];
    for (i, byte) in out.iter_mut().enumerate() {
        let guest = line_addr + i as u64;
        *byte = dut.imem_peek_byte(map_guest_addr(guest, mem_bytes));
    }
    out
}
