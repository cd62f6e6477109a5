//! Diagnostics: bounded event history and failure reports.
//!
//! This module owns the observability surface of the runner. It provides:
//! 1. **`Ring`:** A bounded sequence with oldest-on-overflow eviction.
//! 2. **Event types:** Recent data-memory writes, dispatch groups, and
//!    matched commit pairs.
//! 3. **Report formatting:** Write-history and dispatch summaries and the
//!    deadlock dump, assembled into the single structured report emitted on
//!    failure.
//! 4. **`ExternalDisasm`:** Optional shell-out to a disassembler tool to
//!    decorate reports with mnemonics.
//!
//! Everything here is side-effect-free with respect to the session state
//! machine: diagnostics observe, they never steer.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Command;

use crate::common::record::{CommitRecord, mask_insn};
use crate::config::DisasmConfig;
use crate::dut::DeadlockReport;

/// Capacity of the recent data-memory write ring.
pub const WRITE_RING_CAP: usize = 4096;
/// Capacity of the recent dispatch ring.
pub const DISPATCH_RING_CAP: usize = 256;
/// Capacity of the recent matched-pair ring.
pub const PAIR_RING_CAP: usize = 64;

/// A bounded ordered sequence that discards its oldest element on overflow.
#[derive(Clone, Debug)]
pub struct Ring<T> {
    buf: VecDeque<T>,
    cap: usize,
}

impl<T> Ring<T> {
    /// Creates an empty ring with the given capacity.
    pub fn new(cap: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Appends an element, evicting the oldest if the ring is full.
    pub fn push(&mut self, item: T) {
        if self.buf.len() == self.cap {
            let _ = self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    /// Number of retained elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing is retained.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Iterates oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }

    /// Iterates newest-first.
    pub fn iter_rev(&self) -> impl Iterator<Item = &T> {
        self.buf.iter().rev()
    }

    /// Drops all retained elements; capacity is kept.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// One sampled data-memory write, tagged with the concurrent commit lanes.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemWriteEvent {
    /// DUT cycle of the write.
    pub cycle: u64,
    /// Write address.
    pub addr: u64,
    /// Write data.
    pub data: u64,
    /// Byte strobe.
    pub strb: u64,
    /// Originating unit identifier.
    pub src: u64,
    /// Commit-lane fire mask in the same cycle.
    pub fire_mask: u64,
    /// Per-lane commit PCs in the same cycle.
    pub pcs: [u64; 4],
}

/// One sampled dispatch group.
#[derive(Clone, Copy, Debug, Default)]
pub struct DispatchEvent {
    /// DUT cycle of the dispatch.
    pub cycle: u64,
    /// Dispatch-lane fire mask.
    pub fire_mask: u64,
    /// Per-lane dispatch PCs.
    pub pcs: [u64; 4],
}

/// One accepted reference/DUT commit pair.
#[derive(Clone, Debug)]
pub struct MatchedPair {
    /// Sequence number of the pair.
    pub seq: u64,
    /// Reference-side record.
    pub ref_rec: CommitRecord,
    /// DUT-side record.
    pub dut_rec: CommitRecord,
}

/// Formats the most recent writes to `guest_addr`, newest first (up to 4).
pub fn format_write_history(writes: &Ring<MemWriteEvent>, guest_addr: u64) -> String {
    let mut out = String::new();
    let mut shown = 0usize;
    for ev in writes.iter_rev() {
        if ev.addr != guest_addr {
            continue;
        }
        if shown == 0 {
            out.push_str("last_writes");
        }
        if shown == 4 {
            break;
        }
        let _ = write!(
            out,
            " [cycle={} data={:#x} strb={:#x} src={} fire_mask={:#x} \
             pc0={:#x} pc1={:#x} pc2={:#x} pc3={:#x}]",
            ev.cycle, ev.data, ev.strb, ev.src, ev.fire_mask, ev.pcs[0], ev.pcs[1], ev.pcs[2],
            ev.pcs[3],
        );
        shown += 1;
    }
    if shown == 0 {
        return "last_writes none".into();
    }
    out
}

/// Formats the most recent dispatch groups, newest first (up to 8).
pub fn format_dispatches(dispatches: &Ring<DispatchEvent>) -> String {
    if dispatches.is_empty() {
        return "recent_dispatch none".into();
    }
    let mut out = String::from("recent_dispatch");
    for ev in dispatches.iter_rev().take(8) {
        let _ = write!(
            out,
            " [cycle={} fire_mask={:#x} pc0={:#x} pc1={:#x} pc2={:#x} pc3={:#x}]",
            ev.cycle, ev.fire_mask, ev.pcs[0], ev.pcs[1], ev.pcs[2], ev.pcs[3],
        );
    }
    out
}

/// Formats the recent matched pairs, oldest first, one line per pair.
pub fn format_recent_pairs(pairs: &Ring<MatchedPair>) -> String {
    let mut out = String::new();
    for pair in pairs.iter() {
        let q = &pair.ref_rec;
        let d = &pair.dut_rec;
        let _ = writeln!(
            out,
            "    seq={} ref_pc={:#x} dut_pc={:#x} dut_cycle={} \
             ref_mem=({},{},{:#x},{:#x},{:#x}) dut_mem=({},{},{:#x},{:#x},{:#x})",
            pair.seq,
            q.pc,
            d.pc,
            d.cycle,
            u64::from(q.mem_valid),
            u64::from(q.mem_is_store),
            q.mem_addr,
            q.mem_wdata,
            q.mem_rdata,
            u64::from(d.mem_valid),
            u64::from(d.mem_is_store),
            d.mem_addr,
            d.mem_wdata,
            d.mem_rdata,
        );
    }
    out
}

/// Formats the deadlock debug dump.
pub fn format_deadlock(stall_cycles: u64, report: &DeadlockReport, disasm: &ExternalDisasm) -> String {
    let len = match report.rob.head_len {
        l @ (2 | 4 | 6) => l,
        _ => 4,
    };
    let mnemonic = disasm
        .disasm(report.rob.head_insn_raw, len)
        .unwrap_or_else(|| "<disasm-unavailable>".into());
    format!(
        "deadlock detected after {} cycles with no retire\n  \
         cycle={} halted={} mmio_exit={}\n  \
         pc={:#x} fpc={:#x} rob_count={}\n  \
         rob_head_valid={} rob_head_done={} rob_head_pc={:#x}\n  \
         rob_head_op={} rob_head_len={} rob_head_insn={:#x}\n  \
         rob_head_disasm={}",
        stall_cycles,
        report.cycles,
        u64::from(report.halted),
        u64::from(report.mmio_exit),
        report.pc,
        report.fetch_pc,
        report.rob.count,
        u64::from(report.rob.head_valid),
        u64::from(report.rob.head_done),
        report.rob.head_pc,
        report.rob.head_op,
        report.rob.head_len,
        mask_insn(report.rob.head_insn_raw, len),
        mnemonic,
    )
}

/// Optional external disassembler used to decorate reports.
///
/// Invokes `python3 <tool> --spec <spec> --hex <token>` and keeps the text
/// after the first tab of the first output line. Any failure degrades to
/// `None`; reports fall back to raw hex.
#[derive(Clone, Debug, Default)]
pub struct ExternalDisasm {
    tool: Option<PathBuf>,
    spec: Option<PathBuf>,
}

impl ExternalDisasm {
    /// Builds the disassembler front-end from configuration.
    pub fn new(config: &DisasmConfig) -> Self {
        Self {
            tool: config.tool.clone(),
            spec: config.spec.clone(),
        }
    }

    /// Disassembles one instruction payload, if the tool is configured and
    /// succeeds.
    pub fn disasm(&self, raw: u64, len: u64) -> Option<String> {
        let (tool, spec) = (self.tool.as_ref()?, self.spec.as_ref()?);
        let token = insn_hex_token(raw, len);
        let output = Command::new("python3")
            .arg(tool)
            .arg("--spec")
            .arg(spec)
            .arg("--hex")
            .arg(&token)
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let line = text.lines().next()?.trim_end();
        if line.is_empty() {
            return None;
        }
        match line.split_once('\t') {
            Some((_, rest)) if !rest.is_empty() => Some(rest.to_string()),
            _ => Some(line.to_string()),
        }
    }
}

/// Fixed-width lowercase hex token for a masked payload (4/8/12 digits by
/// length, 16 otherwise).
fn insn_hex_token(raw: u64, len: u64) -> String {
    let digits = match len {
        2 => 4,
        4 => 8,
        6 => 12,
        _ => 16,
    };
    format!("{:0width$x}", mask_insn(raw, len), width = digits)
}
