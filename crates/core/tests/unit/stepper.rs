//! Stepper behavior against the scripted core.

use pretty_assertions::assert_eq;

use locksim_core::common::constants::STACK_BASE;
use locksim_core::config::RunnerConfig;
use locksim_core::dut::memory::map_guest_addr;
use locksim_core::dut::scripted::ScriptedCore;
use locksim_core::dut::stepper::DutStepper;
use locksim_core::dut::{DutSignals, RobDebug, StepError};
use locksim_core::snapshot::{SnapshotImage, SnapshotRange};
use locksim_core::common::error::SnapshotError;

use crate::common::builder::CommitSpec;
use crate::common::harness::{init_logging, test_config};

const MEM: usize = 1 << 20;

fn config() -> RunnerConfig {
    init_logging();
    test_config()
}

fn range(guest_base: u64, bytes: Vec<u8>) -> SnapshotRange {
    SnapshotRange {
        guest_base,
        size: bytes.len() as u64,
        file_offset: 0,
        bytes,
    }
}

#[test]
fn extracts_commits_in_lane_order() {
    let config = config();
    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, CommitSpec::new(0x1000, 0x13, 4).rob(5).lane());
    core.commit_at(1, CommitSpec::new(0x1004, 0x17, 4).rob(6).lane());
    let mut stepper = DutStepper::new(core, &config);

    let first = stepper.next_commit().expect("first");
    assert_eq!(first.pc, 0x1000);
    assert_eq!(first.cycle, 1);
    assert_eq!(first.rob_index, 5);
    assert_eq!(stepper.pending_commits(), 1);

    let second = stepper.next_commit().expect("second");
    assert_eq!(second.pc, 0x1004);
    assert_eq!(second.rob_index, 6);
    assert_eq!(stepper.pending_commits(), 0);
}

#[test]
fn normalizes_length_and_masks_insn() {
    let config = config();
    let mut core = ScriptedCore::new(MEM);
    // Out-of-band length: only the low three bits count, and non-{2,4,6}
    // normalizes to 4.
    core.commit_at(1, CommitSpec::new(0x1000, 0xAAAA_BBBB_CCCC_DDDD, 1).lane());
    core.commit_at(2, CommitSpec::new(0x2000, 0xAAAA_BBBB_CCCC_DDDD, 6).rob(1).lane());
    let mut stepper = DutStepper::new(core, &config);

    let rec = stepper.next_commit().expect("commit");
    assert_eq!(rec.len, 4);
    assert_eq!(rec.insn, 0xCCCC_DDDD);

    let rec = stepper.next_commit().expect("commit");
    assert_eq!(rec.len, 6);
    assert_eq!(rec.insn, 0xBBBB_CCCC_DDDD);
}

#[test]
fn rob_order_allows_same_and_successor() {
    let config = config();
    let mut core = ScriptedCore::new(MEM);
    // Same index (micro-op pair), then the modulo successor across the wrap.
    core.commit_at(1, CommitSpec::new(0x1000, 0x13, 4).rob(63).lane());
    core.commit_at(1, CommitSpec::new(0x1000, 0x13, 4).rob(63).lane());
    core.commit_at(1, CommitSpec::new(0x1004, 0x13, 4).rob(0).lane());
    let mut stepper = DutStepper::new(core, &config);

    for _ in 0..3 {
        let _ = stepper.next_commit().expect("in-order commit");
    }
}

#[test]
fn rob_order_violation_is_fatal() {
    let config = config();
    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, CommitSpec::new(0x1000, 0x13, 4).rob(5).lane());
    core.commit_at(1, CommitSpec::new(0x1004, 0x13, 4).rob(9).lane());
    let mut stepper = DutStepper::new(core, &config);

    let err = stepper.next_commit().expect_err("must fail");
    assert!(matches!(err, StepError::Protocol(_)), "got {err:?}");
}

#[test]
fn mem_commit_with_zero_size_is_fatal() {
    let config = config();
    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, CommitSpec::new(0x1000, 0x13, 4).load(0x2000, 0, 0).lane());
    let mut stepper = DutStepper::new(core, &config);

    let err = stepper.next_commit().expect_err("must fail");
    assert!(matches!(err, StepError::Protocol(_)), "got {err:?}");
}

#[test]
fn halt_with_empty_queue_terminates() {
    let config = config();
    let mut core = ScriptedCore::new(MEM);
    core.commit_at(3, CommitSpec::new(0x1000, 0x13, 4).lane());
    core.halt_at(5);
    let mut stepper = DutStepper::new(core, &config);

    // The commit before the halt is still delivered.
    let rec = stepper.next_commit().expect("commit");
    assert_eq!(rec.cycle, 3);

    let err = stepper.next_commit().expect_err("must halt");
    assert!(matches!(err, StepError::Halted), "got {err:?}");
}

#[test]
fn deadlock_reports_rob_head() {
    let mut config = config();
    config.budgets.deadlock_cycles = 200;
    let mut core = ScriptedCore::new(MEM);
    core.set_pcs(0x4000, 0x4040);
    core.set_rob_debug(RobDebug {
        count: 7,
        head_valid: true,
        head_done: false,
        head_pc: 0x4000,
        head_insn_raw: 0x00AB_CDEF,
        head_len: 4,
        head_op: 9,
    });
    let mut stepper = DutStepper::new(core, &config);

    let err = stepper.next_commit().expect_err("must deadlock");
    let StepError::Deadlock {
        stall_cycles,
        report,
    } = err
    else {
        panic!("expected deadlock, got {err:?}");
    };
    assert_eq!(stall_cycles, 200);
    assert_eq!(report.pc, 0x4000);
    assert_eq!(report.fetch_pc, 0x4040);
    assert_eq!(report.rob.count, 7);
    assert_eq!(report.rob.head_pc, 0x4000);
    assert!(!report.halted);
}

#[test]
fn max_cycles_cap_is_fatal() {
    let mut config = config();
    config.budgets.max_dut_cycles = 50;
    config.budgets.deadlock_cycles = 0; // disabled
    let core = ScriptedCore::new(MEM);
    let mut stepper = DutStepper::new(core, &config);

    let err = stepper.next_commit().expect_err("must cap");
    assert!(matches!(err, StepError::MaxCycles(50)), "got {err:?}");
}

#[test]
fn refill_answers_after_fixed_latency() {
    let config = config();
    let mut core = ScriptedCore::new(MEM);
    // Line content comes from backing instruction memory via the fold.
    for i in 0..64usize {
        core.imem_poke_byte(0x100 + i, i as u8 ^ 0x5A);
    }
    core.fetch_at(1, 0x123); // unaligned; line is 0x100
    core.commit_at(40, CommitSpec::new(0x1000, 0x13, 4).lane());
    let mut stepper = DutStepper::new(core, &config);

    let _ = stepper.next_commit().expect("commit");
    let refills = &stepper.dut().refills;
    assert_eq!(refills.len(), 1);
    let (cycle, rsp) = &refills[0];
    // Latched the cycle the request appeared, answered `latency` later.
    assert_eq!(*cycle, 1 + config.budgets.refill_latency);
    assert_eq!(rsp.addr, 0x100);
    assert!(!rsp.error);
    for i in 0..64usize {
        assert_eq!(rsp.data[i], i as u8 ^ 0x5A, "byte {i}");
    }
}

#[test]
fn refill_allows_one_outstanding_line() {
    let config = config();
    let latency = config.budgets.refill_latency;
    let mut core = ScriptedCore::new(MEM);
    core.fetch_at(1, 0x100);
    core.fetch_at(3, 0x1C0); // queued behind the first line
    core.commit_at(60, CommitSpec::new(0x1000, 0x13, 4).lane());
    let mut stepper = DutStepper::new(core, &config);

    let _ = stepper.next_commit().expect("commit");
    let refills = &stepper.dut().refills;
    assert_eq!(refills.len(), 2);
    assert_eq!(refills[0].1.addr, 0x100);
    assert_eq!(refills[1].1.addr, 0x1C0);
    // First answered at 1 + L; the second request only latches once the
    // first response retires the port (two cycles: respond, re-arm).
    assert_eq!(refills[0].0, 1 + latency);
    assert_eq!(refills[1].0, 1 + latency + 2 + latency);
}

#[test]
fn init_loads_snapshot_through_both_windows() {
    let config = config();
    let core = ScriptedCore::new(MEM);
    let mut stepper = DutStepper::new(core, &config);

    let snap = SnapshotImage {
        ranges: vec![
            range(0x1_0000, vec![1, 2, 3, 4, 5, 6, 7, 8]),
            range(STACK_BASE + 8, vec![0xAA, 0xBB]),
        ],
    };
    stepper.init(&snap, 0x1_0000, 0x2_0000, 0).expect("init");

    assert_eq!(stepper.peek_imem(0x1_0000, 8), 0x0807_0605_0403_0201);
    assert_eq!(stepper.peek_mem(0x1_0000, 4), 0x0403_0201);
    // Stack-window bytes land in the top half of the same store.
    assert_eq!(stepper.peek_mem(STACK_BASE + 8, 2), 0xBBAA);
    let host = map_guest_addr(STACK_BASE + 8, MEM);
    assert_eq!(host, MEM / 2 + 8);
    assert_eq!(stepper.dut().dmem_peek_byte(host), 0xAA);
}

#[test]
fn peek_size_clamps_to_eight() {
    let config = config();
    let core = ScriptedCore::new(MEM);
    let mut stepper = DutStepper::new(core, &config);
    let snap = SnapshotImage {
        ranges: vec![range(0x100, (1..=9).collect())],
    };
    stepper.init(&snap, 0x100, 0, 0).expect("init");

    // Size 0 and size > 8 both read 8 bytes.
    assert_eq!(stepper.peek_mem(0x100, 0), 0x0807_0605_0403_0201);
    assert_eq!(stepper.peek_mem(0x100, 16), 0x0807_0605_0403_0201);
}

#[test]
fn init_rejects_oversized_range() {
    let config = config();
    let core = ScriptedCore::new(4096);
    let mut stepper = DutStepper::new(core, &config);
    let snap = SnapshotImage {
        ranges: vec![range(0, vec![0u8; 8192])],
    };
    let err = stepper.init(&snap, 0, 0, 0).expect_err("must fail");
    assert!(matches!(err, SnapshotError::RangeTooLarge { .. }), "got {err:?}");
}

#[test]
fn init_rejects_wraparound_within_a_range() {
    let config = config();
    let core = ScriptedCore::new(4096);
    let mut stepper = DutStepper::new(core, &config);
    // 4096-byte memory, 4097-byte coverage via two ranges is caught by the
    // cross-range bitmap; a single range wrapping onto itself is caught too.
    let snap = SnapshotImage {
        ranges: vec![range(4090, vec![0u8; 10])],
    };
    let err = stepper.init(&snap, 0, 0, 0).expect_err("must fail");
    assert!(matches!(err, SnapshotError::Aliased { .. }), "got {err:?}");
}

#[test]
fn init_rejects_cross_range_collision() {
    let config = config();
    let core = ScriptedCore::new(MEM);
    let mut stepper = DutStepper::new(core, &config);
    // A low-window range in the top half collides with a stack-window range.
    let snap = SnapshotImage {
        ranges: vec![
            range((MEM / 2) as u64, vec![1, 2, 3, 4]),
            range(STACK_BASE, vec![5, 6]),
        ],
    };
    let err = stepper.init(&snap, 0, 0, 0).expect_err("must fail");
    let SnapshotError::Aliased { guest_addr, .. } = err else {
        panic!("expected aliasing, got {err:?}");
    };
    assert_eq!(guest_addr, STACK_BASE);
}

#[test]
fn samples_write_and_dispatch_telemetry() {
    use locksim_core::dut::{DispatchLane, DmemWrite};

    let config = config();
    let mut core = ScriptedCore::new(MEM);
    let spec = CommitSpec::new(0x1000, 0x13, 4).store(0x8000, 0xFEED, 8);
    core.commit_at(1, spec.lane());
    core.at(1).dmem_write = Some(DmemWrite {
        addr: 0x8000,
        data: 0xFEED,
        strb: 0xFF,
        src: 2,
    });
    core.at(1).dispatch = Some([
        DispatchLane {
            fire: true,
            pc: 0x1000,
        },
        DispatchLane::default(),
        DispatchLane::default(),
        DispatchLane::default(),
    ]);
    let mut stepper = DutStepper::new(core, &config);

    let _ = stepper.next_commit().expect("commit");
    let writes = stepper.recent_write_summary(0x8000);
    assert!(writes.contains("cycle=1"), "got {writes}");
    assert!(writes.contains("data=0xfeed"), "got {writes}");
    assert!(writes.contains("fire_mask=0x1"), "got {writes}");
    assert_eq!(stepper.recent_write_summary(0x9000), "last_writes none");

    let dispatches = stepper.recent_dispatch_summary();
    assert!(dispatches.contains("cycle=1"), "got {dispatches}");
    assert!(dispatches.contains("pc0=0x1000"), "got {dispatches}");
}

#[test]
fn peek_folds_the_base_once() {
    let config = config();
    let mut core = ScriptedCore::new(MEM);
    // A peek starting just below the stack base reads consecutive host
    // bytes from the folded base; it does not re-fold per byte into the
    // stack window.
    let base = map_guest_addr(STACK_BASE - 2, MEM);
    for (j, val) in (0x10u8..0x14).enumerate() {
        core.dmem_poke_byte(base + j, val);
    }
    core.dmem_poke_byte(MEM / 2, 0x99); // where a per-byte fold would land
    let stepper = DutStepper::new(core, &config);

    assert_eq!(stepper.peek_mem(STACK_BASE - 2, 4), 0x1312_1110);
}
