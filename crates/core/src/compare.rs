//! Commit record comparison.
//!
//! Field-by-field equivalence between a reference commit and a DUT commit,
//! stopping at the first inequality. The comparison order is fixed so that
//! mismatch field names are stable across runs: `pc`, `len`, masked `insn`,
//! the writeback group, the operand mirrors, the memory group, the trap
//! group, then `next_pc`. Gated fields are only compared when their valid
//! flag matched; a store compares `mem_wdata` where a load compares
//! `mem_rdata`. `next_pc` is always compared, trap or not.

use crate::common::record::{CommitRecord, Mismatch, OperandMirror, mask_insn};

#[inline]
fn diff(field: &'static str, ref_val: u64, dut_val: u64) -> Option<Mismatch> {
    (ref_val != dut_val).then_some(Mismatch {
        field,
        ref_val,
        dut_val,
    })
}

#[inline]
fn diff_flag(field: &'static str, ref_val: bool, dut_val: bool) -> Option<Mismatch> {
    diff(field, u64::from(ref_val), u64::from(dut_val))
}

/// Compares one operand mirror; only consulted when the reference asserts
/// its validity.
fn diff_mirror(
    fields: [&'static str; 3],
    ref_m: OperandMirror,
    dut_m: OperandMirror,
) -> Option<Mismatch> {
    if !ref_m.valid {
        return None;
    }
    if let Some(mm) = diff_flag(fields[0], ref_m.valid, dut_m.valid) {
        return Some(mm);
    }
    if let Some(mm) = diff(fields[1], ref_m.reg, dut_m.reg) {
        return Some(mm);
    }
    diff(fields[2], ref_m.data, dut_m.data)
}

/// Compares a reference commit against a DUT commit.
///
/// Returns `None` on equivalence, or the first divergent field with both
/// values.
pub fn compare(ref_rec: &CommitRecord, dut_rec: &CommitRecord) -> Option<Mismatch> {
    if let Some(mm) = diff("pc", ref_rec.pc, dut_rec.pc) {
        return Some(mm);
    }
    if let Some(mm) = diff("len", ref_rec.len, dut_rec.len) {
        return Some(mm);
    }
    if let Some(mm) = diff(
        "insn",
        mask_insn(ref_rec.insn, ref_rec.len),
        mask_insn(dut_rec.insn, dut_rec.len),
    ) {
        return Some(mm);
    }

    if let Some(mm) = diff_flag("wb_valid", ref_rec.wb_valid, dut_rec.wb_valid) {
        return Some(mm);
    }
    if ref_rec.wb_valid {
        if let Some(mm) = diff("wb_rd", ref_rec.wb_rd, dut_rec.wb_rd) {
            return Some(mm);
        }
        if let Some(mm) = diff("wb_data", ref_rec.wb_data, dut_rec.wb_data) {
            return Some(mm);
        }
    }

    if let Some(mm) = diff_mirror(
        ["src0_valid", "src0_reg", "src0_data"],
        ref_rec.src0,
        dut_rec.src0,
    ) {
        return Some(mm);
    }
    if let Some(mm) = diff_mirror(
        ["src1_valid", "src1_reg", "src1_data"],
        ref_rec.src1,
        dut_rec.src1,
    ) {
        return Some(mm);
    }
    if let Some(mm) = diff_mirror(
        ["dst_valid", "dst_reg", "dst_data"],
        ref_rec.dst,
        dut_rec.dst,
    ) {
        return Some(mm);
    }

    if let Some(mm) = diff_flag("mem_valid", ref_rec.mem_valid, dut_rec.mem_valid) {
        return Some(mm);
    }
    if ref_rec.mem_valid {
        if let Some(mm) = diff_flag("mem_is_store", ref_rec.mem_is_store, dut_rec.mem_is_store) {
            return Some(mm);
        }
        if let Some(mm) = diff("mem_addr", ref_rec.mem_addr, dut_rec.mem_addr) {
            return Some(mm);
        }
        if let Some(mm) = diff("mem_size", ref_rec.mem_size, dut_rec.mem_size) {
            return Some(mm);
        }
        if ref_rec.mem_is_store {
            if let Some(mm) = diff("mem_wdata", ref_rec.mem_wdata, dut_rec.mem_wdata) {
                return Some(mm);
            }
        } else if let Some(mm) = diff("mem_rdata", ref_rec.mem_rdata, dut_rec.mem_rdata) {
            return Some(mm);
        }
    }

    if let Some(mm) = diff_flag("trap_valid", ref_rec.trap_valid, dut_rec.trap_valid) {
        return Some(mm);
    }
    if ref_rec.trap_valid {
        if let Some(mm) = diff("trap_cause", ref_rec.trap_cause, dut_rec.trap_cause) {
            return Some(mm);
        }
        // Mismatch labels are wire keys; the trap argument travels as
        // `traparg0`.
        if let Some(mm) = diff("traparg0", ref_rec.trap_arg0, dut_rec.trap_arg0) {
            return Some(mm);
        }
    }

    diff("next_pc", ref_rec.next_pc, dut_rec.next_pc)
}
