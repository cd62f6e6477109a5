//! Commit records and field comparison primitives.
//!
//! This module defines the data model shared by both sides of the lockstep
//! comparison. It provides:
//! 1. **`CommitRecord`:** One architectural retirement, as reported by the
//!    reference simulator or extracted from a DUT commit lane.
//! 2. **Normalization:** Instruction-length normalization and payload masking
//!    applied identically to both streams.
//! 3. **`Mismatch`:** The first divergent field with both observed values.

use std::fmt;

/// One operand mirror slot (`src0`, `src1`, or `dst`).
///
/// Mirrors are advisory: the reference exposes them for some instruction
/// classes only, and a DUT model may not expose them at all. An all-zero
/// mirror with `valid == false` means "not reported".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperandMirror {
    /// Whether this side reported the mirror.
    pub valid: bool,
    /// Architectural register index.
    pub reg: u64,
    /// Register value at commit.
    pub data: u64,
}

/// A single architectural retirement record.
///
/// The writeback, memory, and trap groups are gated by their `*_valid` flags;
/// gated fields hold zero when the flag is clear. Provenance fields are
/// DUT-only and advisory: they never participate in comparison.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitRecord {
    /// DUT cycle at which the record retired (zero for reference records).
    pub cycle: u64,
    /// Session-wide monotonic sequence number, assigned by the reference.
    pub seq: u64,
    /// Program counter.
    pub pc: u64,
    /// Decoded opcode identifier (advisory, reports only).
    pub op: u64,
    /// Raw instruction payload; only the low `8·len` bits are significant.
    pub insn: u64,
    /// Instruction length in bytes: 2, 4, or 6.
    pub len: u64,

    /// Whether the instruction wrote a register.
    pub wb_valid: bool,
    /// Destination register index.
    pub wb_rd: u64,
    /// Writeback value.
    pub wb_data: u64,

    /// First source operand mirror.
    pub src0: OperandMirror,
    /// Second source operand mirror.
    pub src1: OperandMirror,
    /// Destination operand mirror.
    pub dst: OperandMirror,

    /// Whether the instruction performed a memory access.
    pub mem_valid: bool,
    /// Whether the access was a store (else a load).
    pub mem_is_store: bool,
    /// Guest address of the access.
    pub mem_addr: u64,
    /// Store data (stores only).
    pub mem_wdata: u64,
    /// Load data (loads only).
    pub mem_rdata: u64,
    /// Access size in bytes; zero is invalid when `mem_valid` is set.
    pub mem_size: u64,

    /// Whether the instruction trapped.
    pub trap_valid: bool,
    /// Trap cause code.
    pub trap_cause: u64,
    /// First trap argument.
    pub trap_arg0: u64,

    /// Architectural successor program counter. Always compared.
    pub next_pc: u64,

    /// ROB slot the record retired from (DUT provenance).
    pub rob_index: u64,
    /// Micro-op unique id (DUT provenance).
    pub uop_uid: u64,
    /// Parent micro-op unique id (DUT provenance).
    pub parent_uid: u64,
    /// Execution-block unique id (DUT provenance).
    pub block_uid: u64,
    /// Execution-block branch id (DUT provenance).
    pub block_bid: u64,
    /// Whether the DUT flagged this record as a block start.
    pub is_bstart: bool,
    /// Whether the DUT flagged this record as a block stop.
    pub is_bstop: bool,
}

/// Masks an instruction payload to the low `8·len` bits.
///
/// Lengths outside `{2, 4, 6}` leave the payload untouched; callers are
/// expected to normalize first.
#[inline]
pub fn mask_insn(raw: u64, len: u64) -> u64 {
    match len {
        2 => raw & 0xFFFF,
        4 => raw & 0xFFFF_FFFF,
        6 => raw & 0xFFFF_FFFF_FFFF,
        _ => raw,
    }
}

/// Normalizes a raw lane length field to `{2, 4, 6}`.
///
/// Only the low three bits of the wire value are significant; out-of-band
/// values normalize to 4.
#[inline]
pub fn normalize_len(raw: u64) -> u64 {
    match raw & 0x7 {
        l @ (2 | 4 | 6) => l,
        _ => 4,
    }
}

impl CommitRecord {
    /// Returns the instruction payload masked to this record's length.
    #[inline]
    pub fn masked_insn(&self) -> u64 {
        mask_insn(self.insn, self.len)
    }

    /// Returns true when any architectural side-effect group is valid.
    #[inline]
    pub fn has_side_effect(&self) -> bool {
        self.wb_valid || self.mem_valid || self.trap_valid
    }
}

impl fmt::Display for CommitRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle={} pc={:#x} op={} insn={:#x} len={} \
             wb_valid={} wb_rd={} wb_data={:#x} \
             mem_valid={} mem_is_store={} mem_addr={:#x} mem_wdata={:#x} mem_rdata={:#x} mem_size={} \
             trap_valid={} trap_cause={} trap_arg0={:#x} next_pc={:#x}",
            self.cycle,
            self.pc,
            self.op,
            self.masked_insn(),
            self.len,
            u64::from(self.wb_valid),
            self.wb_rd,
            self.wb_data,
            u64::from(self.mem_valid),
            u64::from(self.mem_is_store),
            self.mem_addr,
            self.mem_wdata,
            self.mem_rdata,
            self.mem_size,
            u64::from(self.trap_valid),
            self.trap_cause,
            self.trap_arg0,
            self.next_pc,
        )
    }
}

/// First divergent field of a commit comparison, with both observed values.
///
/// `field` is the stable wire name reported in the mismatch acknowledgement;
/// boolean fields are reported as 0/1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mismatch {
    /// Wire name of the divergent field.
    pub field: &'static str,
    /// Value observed on the reference side.
    pub ref_val: u64,
    /// Value observed on the DUT side.
    pub dut_val: u64,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: ref={:#x} dut={:#x}",
            self.field, self.ref_val, self.dut_val
        )
    }
}
