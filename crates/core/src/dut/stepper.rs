//! Per-cycle DUT driver and commit extraction.
//!
//! The stepper owns the model, the refill responder, and the ordered retire
//! queue. It provides:
//! 1. **Initialization:** Snapshot load with alias detection, boot wires,
//!    reset.
//! 2. **`next_commit`:** Advances the model one cycle at a time until a
//!    commit is available, surfacing halt, deadlock, and cycle-cap outcomes.
//! 3. **Extraction:** Reads the four commit lanes in order after every tick,
//!    normalizing lengths and masking payloads, and enforcing the DUT-side
//!    commit contract (ROB order, memory size).
//! 4. **Observability:** Samples the data-memory write port and the dispatch
//!    port into bounded diagnostic rings every cycle.

use std::collections::VecDeque;

use tracing::debug;

use crate::common::constants::{COMMIT_LANES, ROB_DEPTH};
use crate::common::error::SnapshotError;
use crate::common::record::{CommitRecord, mask_insn, normalize_len};
use crate::config::RunnerConfig;
use crate::diag::{
    DISPATCH_RING_CAP, DispatchEvent, MemWriteEvent, Ring, WRITE_RING_CAP, format_dispatches,
    format_write_history,
};
use crate::dut::memory::map_guest_addr;
use crate::dut::refill::IcL2Refill;
use crate::dut::{DeadlockReport, DutSignals, LaneCommit, StepError};
use crate::snapshot::SnapshotImage;

/// Drives one DUT model cycle-by-cycle and yields its retirements in order.
#[derive(Debug)]
pub struct DutStepper<D: DutSignals> {
    dut: D,
    refill: IcL2Refill,
    retire_q: VecDeque<CommitRecord>,
    writes: Ring<MemWriteEvent>,
    dispatches: Ring<DispatchEvent>,
    max_cycles: u64,
    deadlock_cycles: u64,
}

impl<D: DutSignals> DutStepper<D> {
    /// Wraps a model with the configured budgets.
    pub fn new(dut: D, config: &RunnerConfig) -> Self {
        Self {
            dut,
            refill: IcL2Refill::new(config.budgets.refill_latency),
            retire_q: VecDeque::new(),
            writes: Ring::new(WRITE_RING_CAP),
            dispatches: Ring::new(DISPATCH_RING_CAP),
            max_cycles: config.budgets.max_dut_cycles,
            deadlock_cycles: config.budgets.deadlock_cycles,
        }
    }

    /// Returns the wrapped model.
    #[inline]
    pub fn dut(&self) -> &D {
        &self.dut
    }

    /// Loads the snapshot into both backing memories, drives the boot wires,
    /// and resets the model.
    ///
    /// # Errors
    ///
    /// Fails fast on a zero-depth memory, a range larger than the memory, or
    /// any two guest bytes folding onto the same host byte.
    pub fn init(
        &mut self,
        snap: &SnapshotImage,
        boot_pc: u64,
        boot_sp: u64,
        boot_ra: u64,
    ) -> Result<(), SnapshotError> {
        self.load_snapshot(snap)?;
        self.dut.set_boot(boot_pc, boot_sp, boot_ra);
        self.dut.reset();
        self.retire_q.clear();
        self.refill.clear();
        self.writes.clear();
        self.dispatches.clear();
        Ok(())
    }

    /// Advances the DUT until a commit is available and dequeues it.
    ///
    /// # Errors
    ///
    /// `Halted` if a terminal signal rises with an empty queue, `MaxCycles`
    /// if the session cycle cap is reached, `Deadlock` after the configured
    /// stall threshold, or `Protocol` on a DUT-side contract violation.
    pub fn next_commit(&mut self) -> Result<CommitRecord, StepError> {
        let mut stall_cycles = 0u64;
        loop {
            if let Some(rec) = self.retire_q.pop_front() {
                return Ok(rec);
            }
            if self.dut.cycles() >= self.max_cycles {
                return Err(StepError::MaxCycles(self.max_cycles));
            }

            self.refill.drive(&mut self.dut);
            self.dut.tick();
            self.refill.update(&mut self.dut);
            self.sample_mem_write();
            self.sample_dispatch();
            self.collect_commits()?;

            if self.retire_q.is_empty() {
                if self.dut.halted() || self.dut.mmio_exit().is_some() {
                    return Err(StepError::Halted);
                }
                stall_cycles += 1;
                if self.deadlock_cycles > 0 && stall_cycles >= self.deadlock_cycles {
                    return Err(StepError::Deadlock {
                        stall_cycles,
                        report: Box::new(self.debug_state()),
                    });
                }
            }
        }
    }

    /// Number of extracted commits not yet dequeued.
    #[inline]
    pub fn pending_commits(&self) -> usize {
        self.retire_q.len()
    }

    /// Reads up to 8 bytes of data memory at a guest address, little-endian.
    ///
    /// A size of zero or above 8 reads 8 bytes.
    pub fn peek_mem(&self, guest_addr: u64, size: u64) -> u64 {
        Self::peek(guest_addr, size, self.dut.dmem_len(), |offset| {
            self.dut.dmem_peek_byte(offset)
        })
    }

    /// Reads up to 8 bytes of instruction memory at a guest address,
    /// little-endian. A size of zero or above 8 reads 8 bytes.
    pub fn peek_imem(&self, guest_addr: u64, size: u64) -> u64 {
        Self::peek(guest_addr, size, self.dut.imem_len(), |offset| {
            self.dut.imem_peek_byte(offset)
        })
    }

    /// Snapshot of the debug state for stall and terminal reports.
    pub fn debug_state(&self) -> DeadlockReport {
        DeadlockReport {
            cycles: self.dut.cycles(),
            halted: self.dut.halted(),
            mmio_exit: self.dut.mmio_exit().is_some(),
            pc: self.dut.arch_pc().unwrap_or(0),
            fetch_pc: self.dut.fetch_pc().unwrap_or(0),
            rob: self.dut.rob_debug().unwrap_or_default(),
        }
    }

    /// Formats the recent writes to one guest address, newest first.
    pub fn recent_write_summary(&self, guest_addr: u64) -> String {
        format_write_history(&self.writes, guest_addr)
    }

    /// Formats the recent dispatch groups, newest first.
    pub fn recent_dispatch_summary(&self) -> String {
        format_dispatches(&self.dispatches)
    }

    /// The base address is folded once; the read then runs over consecutive
    /// host bytes, wrapping at the end of the store.
    fn peek(guest_addr: u64, size: u64, mem_bytes: usize, read: impl Fn(usize) -> u8) -> u64 {
        if mem_bytes == 0 {
            return 0;
        }
        let base = map_guest_addr(guest_addr, mem_bytes);
        let n = if size == 0 || size > 8 { 8 } else { size } as usize;
        let mut value = 0u64;
        for i in 0..n {
            let offset = (base + i) & (mem_bytes - 1);
            value |= u64::from(read(offset)) << (8 * i);
        }
        value
    }

    fn load_snapshot(&mut self, snap: &SnapshotImage) -> Result<(), SnapshotError> {
        let mem_bytes = self.dut.imem_len();
        if mem_bytes == 0 {
            return Err(SnapshotError::NoBackingMemory);
        }

        // One occupancy bitmap across all ranges: a collision anywhere in the
        // image is a load-time error, never an access-time surprise.
        let mut seen = vec![false; mem_bytes];
        for range in &snap.ranges {
            if range.bytes.len() > mem_bytes {
                return Err(SnapshotError::RangeTooLarge {
                    base: range.guest_base,
                    size: range.bytes.len() as u64,
                    mem_bytes: mem_bytes as u64,
                });
            }
            for (i, &byte) in range.bytes.iter().enumerate() {
                let guest_addr = range.guest_base + i as u64;
                let offset = map_guest_addr(guest_addr, mem_bytes);
                if seen[offset] {
                    return Err(SnapshotError::Aliased {
                        base: range.guest_base,
                        size: range.bytes.len() as u64,
                        guest_addr,
                        mapped: offset as u64,
                        mem_bytes: mem_bytes as u64,
                    });
                }
                seen[offset] = true;
                self.dut.imem_poke_byte(offset, byte);
                self.dut.dmem_poke_byte(offset, byte);
            }
        }
        Ok(())
    }

    fn sample_mem_write(&mut self) {
        let Some(port) = self.dut.dmem_write_port() else {
            return;
        };
        let mut ev = MemWriteEvent {
            cycle: self.dut.cycles(),
            addr: port.addr,
            data: port.data,
            strb: port.strb,
            src: port.src,
            ..MemWriteEvent::default()
        };
        for lane in 0..COMMIT_LANES {
            let slot = self.dut.commit_lane(lane);
            if slot.fire {
                ev.fire_mask |= 1 << lane;
                ev.pcs[lane] = slot.pc;
            }
        }
        self.writes.push(ev);
    }

    fn sample_dispatch(&mut self) {
        let Some(lanes) = self.dut.dispatch_port() else {
            return;
        };
        let mut ev = DispatchEvent {
            cycle: self.dut.cycles(),
            ..DispatchEvent::default()
        };
        for (i, lane) in lanes.iter().enumerate() {
            if lane.fire {
                ev.fire_mask |= 1 << i;
                ev.pcs[i] = lane.pc;
            }
        }
        if ev.fire_mask == 0 {
            return;
        }
        self.dispatches.push(ev);
    }

    /// Reads the four commit lanes in lane order, which equals ROB order by
    /// construction, and enqueues each fired record.
    fn collect_commits(&mut self) -> Result<(), StepError> {
        let cycle = self.dut.cycles();
        let mut prev_rob: Option<u64> = None;
        for lane in 0..COMMIT_LANES {
            let slot = self.dut.commit_lane(lane);
            if !slot.fire {
                continue;
            }

            if slot.rob >= ROB_DEPTH {
                return Err(StepError::Protocol(format!(
                    "ROB index out of range on lane {lane}: {}",
                    slot.rob
                )));
            }
            if let Some(prev) = prev_rob {
                let next = (prev + 1) % ROB_DEPTH;
                if slot.rob != prev && slot.rob != next {
                    return Err(StepError::Protocol(format!(
                        "ROB slot-order violation on lane {lane}: \
                         prev={prev} expected_same_or_next={{{prev},{next}}} got={}",
                        slot.rob
                    )));
                }
            }
            prev_rob = Some(slot.rob);

            if slot.mem_valid && slot.mem_size == 0 {
                return Err(StepError::Protocol(format!(
                    "memory commit with size=0 on lane {lane} at rob={}",
                    slot.rob
                )));
            }

            let rec = Self::lane_to_record(cycle, &slot);
            debug!(
                cycle,
                lane,
                pc = format_args!("{:#x}", rec.pc),
                rob = slot.rob,
                "retire"
            );
            self.retire_q.push_back(rec);
        }
        Ok(())
    }

    fn lane_to_record(cycle: u64, slot: &LaneCommit) -> CommitRecord {
        let len = normalize_len(slot.len);
        CommitRecord {
            cycle,
            seq: 0,
            pc: slot.pc,
            op: slot.op,
            insn: mask_insn(slot.insn_raw, len),
            len,
            wb_valid: slot.wb_valid,
            wb_rd: slot.wb_rd,
            wb_data: slot.wb_data,
            src0: slot.src0.unwrap_or_default(),
            src1: slot.src1.unwrap_or_default(),
            dst: slot.dst.unwrap_or_default(),
            mem_valid: slot.mem_valid,
            mem_is_store: slot.mem_is_store,
            mem_addr: slot.mem_addr,
            mem_wdata: slot.mem_wdata,
            mem_rdata: slot.mem_rdata,
            mem_size: slot.mem_size,
            trap_valid: slot.trap_valid,
            trap_cause: slot.trap_cause,
            trap_arg0: 0,
            next_pc: slot.next_pc,
            rob_index: slot.rob,
            uop_uid: slot.uop_uid,
            parent_uid: slot.parent_uid,
            block_uid: slot.block_uid,
            block_bid: slot.block_bid,
            is_bstart: slot.is_bstart,
            is_bstop: slot.is_bstop,
        }
    }
}
