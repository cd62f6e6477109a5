//! DUT model contract and the cycle-level stepper.
//!
//! This module defines the boundary to the RTL model. It provides:
//! 1. **`DutSignals`:** The black-box signal contract read or driven each
//!    cycle. Required operations are fixed; optional telemetry signals are
//!    exposed as default-`None` accessors so model variants without them
//!    still bind.
//! 2. **Stepper:** The per-cycle driver that models the I$-L2 responder and
//!    extracts commit lanes into an ordered retire queue.
//! 3. **Memory:** The backing byte store and the guest-address fold.
//! 4. **Scripted core:** A deterministic `DutSignals` implementation driven
//!    by a per-cycle script, used by the test suite and for harness bring-up.

use thiserror::Error;

use crate::common::constants::REFILL_LINE_BYTES;
use crate::common::record::OperandMirror;

/// Backing memory buffer and guest-address mapping.
pub mod memory;
/// I$-L2 refill responder state machine.
pub mod refill;
/// Script-driven DUT model.
pub mod scripted;
/// Per-cycle DUT driver and commit extraction.
pub mod stepper;

/// One commit lane's signals, sampled after a tick.
///
/// All fields are raw wire values; normalization (length, payload masking)
/// happens during extraction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaneCommit {
    /// Whether this lane retired an instruction this cycle.
    pub fire: bool,
    /// Program counter.
    pub pc: u64,
    /// Decoded opcode identifier.
    pub op: u64,
    /// ROB slot the instruction retired from.
    pub rob: u64,
    /// Raw instruction payload.
    pub insn_raw: u64,
    /// Raw length field; only the low three bits are significant.
    pub len: u64,
    /// Writeback valid.
    pub wb_valid: bool,
    /// Writeback destination register.
    pub wb_rd: u64,
    /// Writeback data.
    pub wb_data: u64,
    /// Memory access valid.
    pub mem_valid: bool,
    /// Memory access is a store.
    pub mem_is_store: bool,
    /// Memory access address.
    pub mem_addr: u64,
    /// Store data.
    pub mem_wdata: u64,
    /// Load data.
    pub mem_rdata: u64,
    /// Memory access size in bytes.
    pub mem_size: u64,
    /// Trap valid.
    pub trap_valid: bool,
    /// Trap cause.
    pub trap_cause: u64,
    /// Architectural successor PC.
    pub next_pc: u64,
    /// Micro-op unique id (provenance).
    pub uop_uid: u64,
    /// Parent micro-op unique id (provenance).
    pub parent_uid: u64,
    /// Execution-block unique id (provenance).
    pub block_uid: u64,
    /// Execution-block branch id (provenance).
    pub block_bid: u64,
    /// Block-start flag (provenance).
    pub is_bstart: bool,
    /// Block-stop flag (provenance).
    pub is_bstop: bool,
    /// First source operand mirror, when the model exposes one.
    pub src0: Option<OperandMirror>,
    /// Second source operand mirror, when the model exposes one.
    pub src1: Option<OperandMirror>,
    /// Destination operand mirror, when the model exposes one.
    pub dst: Option<OperandMirror>,
}

/// The I$-L2 request port, sampled from the model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefillRequest {
    /// Request valid.
    pub valid: bool,
    /// Requested fetch address (not necessarily line-aligned).
    pub addr: u64,
}

/// The I$-L2 response driven into the model for exactly one cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefillResponse {
    /// Line-aligned address the response answers.
    pub addr: u64,
    /// The 64-byte line, in ascending address order.
    pub data: [u8; REFILL_LINE_BYTES],
    /// Response error flag.
    pub error: bool,
}

/// Head-of-ROB debug view (optional telemetry).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RobDebug {
    /// Number of occupied ROB entries.
    pub count: u64,
    /// Head entry valid.
    pub head_valid: bool,
    /// Head entry finished executing.
    pub head_done: bool,
    /// Head entry program counter.
    pub head_pc: u64,
    /// Head entry raw instruction payload.
    pub head_insn_raw: u64,
    /// Head entry raw length field.
    pub head_len: u64,
    /// Head entry opcode identifier.
    pub head_op: u64,
}

/// One data-memory write-port event (optional telemetry).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DmemWrite {
    /// Write address.
    pub addr: u64,
    /// Write data.
    pub data: u64,
    /// Byte strobe.
    pub strb: u64,
    /// Originating unit identifier, when the model distinguishes sources.
    pub src: u64,
}

/// One dispatch lane's fire/pc pair (optional telemetry).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchLane {
    /// Whether this lane dispatched this cycle.
    pub fire: bool,
    /// Dispatched program counter.
    pub pc: u64,
}

/// Debug snapshot taken when the stepper reports a stall or terminal state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeadlockReport {
    /// Total DUT cycles at the time of the report.
    pub cycles: u64,
    /// Halt signal state.
    pub halted: bool,
    /// Exit signal state.
    pub mmio_exit: bool,
    /// Architectural PC, when exposed.
    pub pc: u64,
    /// Fetch PC, when exposed.
    pub fetch_pc: u64,
    /// Head-of-ROB view, when exposed.
    pub rob: RobDebug,
}

/// Terminal outcomes of `next_commit` other than a commit.
#[derive(Debug, Error)]
pub enum StepError {
    /// The DUT halted or raised its exit signal with an empty retire queue.
    #[error("DUT halted before next commit")]
    Halted,

    /// The session cycle cap was reached without a commit.
    #[error("DUT exceeded max cycles: {0}")]
    MaxCycles(u64),

    /// No retirement within the configured stall threshold.
    #[error("deadlock detected after {stall_cycles} cycles with no retire")]
    Deadlock {
        /// Consecutive cycles with an empty retire queue.
        stall_cycles: u64,
        /// State snapshot at detection time.
        report: Box<DeadlockReport>,
    },

    /// The DUT violated its commit contract.
    #[error("DUT protocol violation: {0}")]
    Protocol(String),
}

/// The RTL black-box contract, read or driven once per cycle.
///
/// Required operations cover the clock, boot wires, the I$-L2 port, the four
/// commit lanes, termination signals, and byte poke/peek on both backing
/// memories. Telemetry accessors default to `None`; a model that exposes the
/// corresponding signals overrides them.
pub trait DutSignals {
    /// Applies the reset sequence and clears the cycle counter.
    fn reset(&mut self);

    /// Advances the model by one clock cycle.
    fn tick(&mut self);

    /// Monotonic cycle counter.
    fn cycles(&self) -> u64;

    /// Drives the boot PC/SP/RA wires.
    fn set_boot(&mut self, pc: u64, sp: u64, ra: u64);

    /// Samples the I$-L2 request port.
    fn ic_l2_req(&self) -> RefillRequest;

    /// Drives the I$-L2 request-ready wire.
    fn set_ic_l2_req_ready(&mut self, ready: bool);

    /// Drives (or deasserts, with `None`) the I$-L2 response port.
    fn set_ic_l2_rsp(&mut self, rsp: Option<&RefillResponse>);

    /// Halt signal.
    fn halted(&self) -> bool;

    /// Exit signal with its code, when asserted.
    fn mmio_exit(&self) -> Option<u64>;

    /// Samples commit lane `lane` (0..4).
    fn commit_lane(&self, lane: usize) -> LaneCommit;

    /// Instruction memory depth in bytes.
    fn imem_len(&self) -> usize;

    /// Data memory depth in bytes.
    fn dmem_len(&self) -> usize;

    /// Reads one instruction-memory byte at a host offset.
    fn imem_peek_byte(&self, offset: usize) -> u8;

    /// Writes one instruction-memory byte at a host offset.
    fn imem_poke_byte(&mut self, offset: usize, val: u8);

    /// Reads one data-memory byte at a host offset.
    fn dmem_peek_byte(&self, offset: usize) -> u8;

    /// Writes one data-memory byte at a host offset.
    fn dmem_poke_byte(&mut self, offset: usize, val: u8);

    /// Architectural PC, when the model exposes it.
    fn arch_pc(&self) -> Option<u64> {
        None
    }

    /// Fetch PC, when the model exposes it.
    fn fetch_pc(&self) -> Option<u64> {
        None
    }

    /// Head-of-ROB debug view, when the model exposes it.
    fn rob_debug(&self) -> Option<RobDebug> {
        None
    }

    /// This cycle's data-memory write-port event, when the model exposes the
    /// port and a write fired.
    fn dmem_write_port(&self) -> Option<DmemWrite> {
        None
    }

    /// This cycle's dispatch lanes, when the model exposes the port.
    fn dispatch_port(&self) -> Option<[DispatchLane; 4]> {
        None
    }
}
