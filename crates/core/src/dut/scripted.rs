//! Script-driven DUT model.
//!
//! `ScriptedCore` implements the full [`DutSignals`] contract from a
//! deterministic per-cycle script instead of an RTL netlist: each scripted
//! cycle can fire commit lanes, raise halt or the exit signal, post
//! data-memory write or dispatch telemetry, and start an I$-L2 fetch. The
//! test suite drives the stepper and the session against it, and the CLI
//! uses it for harness bring-up; production RTL models bind through the same
//! trait.
//!
//! Cycle numbering: `cycles()` counts completed ticks, so a `CycleScript`
//! registered at cycle `n` becomes visible after the `n`-th tick (the
//! earliest observable cycle is 1).

use std::collections::{BTreeMap, VecDeque};

use crate::dut::memory::BackingMemory;
use crate::dut::{
    DispatchLane, DmemWrite, DutSignals, LaneCommit, RefillRequest, RefillResponse, RobDebug,
};

/// Everything one scripted cycle can make visible on the DUT surface.
#[derive(Clone, Debug, Default)]
pub struct CycleScript {
    /// Commit lanes firing this cycle, assigned to lanes 0.. in order.
    pub lanes: Vec<LaneCommit>,
    /// Raise the halt signal (latched).
    pub halt: bool,
    /// Raise the exit signal with this code (latched).
    pub mmio_exit: Option<u64>,
    /// Start asserting an I$-L2 fetch for this address.
    pub fetch: Option<u64>,
    /// Data-memory write-port event for this cycle.
    pub dmem_write: Option<DmemWrite>,
    /// Dispatch-port lanes for this cycle.
    pub dispatch: Option<[DispatchLane; 4]>,
}

/// A deterministic, script-driven implementation of the DUT signal contract.
pub struct ScriptedCore {
    imem: BackingMemory,
    dmem: BackingMemory,
    script: BTreeMap<u64, CycleScript>,

    cycles: u64,
    halted: bool,
    mmio_exit: Option<u64>,
    boot_pc: u64,

    lanes: [LaneCommit; 4],
    cur_dmem_write: Option<DmemWrite>,
    cur_dispatch: Option<[DispatchLane; 4]>,

    fetch_queue: VecDeque<u64>,
    req_ready_in: bool,
    rsp_in: Option<RefillResponse>,

    /// Responses observed on the port, with the cycle they arrived at.
    pub refills: Vec<(u64, RefillResponse)>,

    rob_debug: Option<RobDebug>,
    arch_pc: Option<u64>,
    fetch_pc: Option<u64>,
}

impl std::fmt::Debug for ScriptedCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedCore")
            .field("cycles", &self.cycles)
            .field("halted", &self.halted)
            .field("boot_pc", &self.boot_pc)
            .field("req_ready_in", &self.req_ready_in)
            .field("script_len", &self.script.len())
            .finish_non_exhaustive()
    }
}

impl ScriptedCore {
    /// Creates a core with empty script and zeroed memories of `mem_bytes`
    /// depth (both imem and dmem).
    pub fn new(mem_bytes: usize) -> Self {
        Self {
            imem: BackingMemory::new(mem_bytes),
            dmem: BackingMemory::new(mem_bytes),
            script: BTreeMap::new(),
            cycles: 0,
            halted: false,
            mmio_exit: None,
            boot_pc: 0,
            lanes: [LaneCommit::default(); 4],
            cur_dmem_write: None,
            cur_dispatch: None,
            fetch_queue: VecDeque::new(),
            req_ready_in: false,
            rsp_in: None,
            refills: Vec::new(),
            rob_debug: None,
            arch_pc: None,
            fetch_pc: None,
        }
    }

    /// Returns the script entry for `cycle`, creating it if absent.
    pub fn at(&mut self, cycle: u64) -> &mut CycleScript {
        self.script.entry(cycle).or_default()
    }

    /// Schedules one lane commit at `cycle` (appended after any already
    /// scripted for that cycle).
    pub fn commit_at(&mut self, cycle: u64, lane: LaneCommit) {
        self.at(cycle).lanes.push(lane);
    }

    /// Schedules a halt at `cycle`.
    pub fn halt_at(&mut self, cycle: u64) {
        self.at(cycle).halt = true;
    }

    /// Schedules an I$-L2 fetch for `addr` at `cycle`.
    pub fn fetch_at(&mut self, cycle: u64, addr: u64) {
        self.at(cycle).fetch = Some(addr);
    }

    /// Sets the head-of-ROB debug view reported by telemetry.
    pub fn set_rob_debug(&mut self, rob: RobDebug) {
        self.rob_debug = Some(rob);
    }

    /// Sets the architectural and fetch PCs reported by telemetry.
    pub fn set_pcs(&mut self, arch_pc: u64, fetch_pc: u64) {
        self.arch_pc = Some(arch_pc);
        self.fetch_pc = Some(fetch_pc);
    }
}

impl DutSignals for ScriptedCore {
    fn reset(&mut self) {
        self.cycles = 0;
        self.halted = false;
        self.mmio_exit = None;
        self.lanes = [LaneCommit::default(); 4];
        self.cur_dmem_write = None;
        self.cur_dispatch = None;
        self.fetch_queue.clear();
        self.rsp_in = None;
        self.refills.clear();
    }

    fn tick(&mut self) {
        // A response delivered this cycle satisfies the oldest fetch; the
        // next queued fetch (if any) starts asserting the request port.
        if let Some(rsp) = self.rsp_in.take() {
            self.refills.push((self.cycles, rsp));
            let _ = self.fetch_queue.pop_front();
        }

        self.cycles += 1;

        self.lanes = [LaneCommit::default(); 4];
        self.cur_dmem_write = None;
        self.cur_dispatch = None;
        if let Some(step) = self.script.get(&self.cycles).cloned() {
            for (i, lane) in step.lanes.iter().take(4).enumerate() {
                self.lanes[i] = *lane;
                self.lanes[i].fire = true;
            }
            if step.halt {
                self.halted = true;
            }
            if let Some(code) = step.mmio_exit {
                self.mmio_exit = Some(code);
            }
            if let Some(addr) = step.fetch {
                self.fetch_queue.push_back(addr);
            }
            self.cur_dmem_write = step.dmem_write;
            self.cur_dispatch = step.dispatch;
        }
    }

    fn cycles(&self) -> u64 {
        self.cycles
    }

    fn set_boot(&mut self, pc: u64, _sp: u64, _ra: u64) {
        self.boot_pc = pc;
        if self.arch_pc.is_none() {
            self.arch_pc = Some(pc);
        }
    }

    fn ic_l2_req(&self) -> RefillRequest {
        RefillRequest {
            valid: !self.fetch_queue.is_empty(),
            addr: self.fetch_queue.front().copied().unwrap_or(0),
        }
    }

    fn set_ic_l2_req_ready(&mut self, ready: bool) {
        self.req_ready_in = ready;
    }

    fn set_ic_l2_rsp(&mut self, rsp: Option<&RefillResponse>) {
        self.rsp_in = rsp.copied();
    }

    fn halted(&self) -> bool {
        self.halted
    }

    fn mmio_exit(&self) -> Option<u64> {
        self.mmio_exit
    }

    fn commit_lane(&self, lane: usize) -> LaneCommit {
        self.lanes[lane]
    }

    fn imem_len(&self) -> usize {
        self.imem.len()
    }

    fn dmem_len(&self) -> usize {
        self.dmem.len()
    }

    fn imem_peek_byte(&self, offset: usize) -> u8 {
        self.imem.peek_byte(offset)
    }

    fn imem_poke_byte(&mut self, offset: usize, val: u8) {
        self.imem.poke_byte(offset, val);
    }

    fn dmem_peek_byte(&self, offset: usize) -> u8 {
        self.dmem.peek_byte(offset)
    }

    fn dmem_poke_byte(&mut self, offset: usize, val: u8) {
        self.dmem.poke_byte(offset, val);
    }

    fn arch_pc(&self) -> Option<u64> {
        self.arch_pc
    }

    fn fetch_pc(&self) -> Option<u64> {
        self.fetch_pc
    }

    fn rob_debug(&self) -> Option<RobDebug> {
        self.rob_debug
    }

    fn dmem_write_port(&self) -> Option<DmemWrite> {
        self.cur_dmem_write
    }

    fn dispatch_port(&self) -> Option<[DispatchLane; 4]> {
        self.cur_dispatch
    }
}
