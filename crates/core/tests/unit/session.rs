//! Whole-session lockstep scenarios.
//!
//! Each test plays a reference script over a socket pair against the
//! scripted core and checks the outcome, the acknowledgement stream, or
//! both.

use pretty_assertions::assert_eq;

use locksim_core::RunnerError;
use locksim_core::common::error::{ExitCategory, ProtocolError};
use locksim_core::dut::scripted::ScriptedCore;
use locksim_core::protocol::EndReason;

use crate::common::builder::{CommitSpec, block_start_spec, end_line, start_line};
use crate::common::harness::{run_session, test_config, write_snapshot};

const MEM: usize = 1 << 20;
const TRIGGER: u64 = 0x1_0000;

/// A snapshot file with a small code range at the trigger PC.
fn snapshot_path_line(extra: &str) -> (tempfile::NamedTempFile, String) {
    let file = write_snapshot(&[(TRIGGER, vec![0x13, 0x00, 0x10, 0x00])]);
    let line = start_line(&file.path().display().to_string(), TRIGGER, extra);
    (file, line)
}

/// Five matching commits under a terminate-pc end: five oks, success.
#[test]
fn happy_path_five_commits() {
    let specs: Vec<CommitSpec> = (0..5u64)
        .map(|i| {
            CommitSpec::new(TRIGGER + 4 * i, 0x0001_0013 + i, 4)
                .wb(5 + i, 0x1000 + i)
                .rob(i)
        })
        .collect();
    let terminate_pc = specs[4].pc;

    let mut core = ScriptedCore::new(MEM);
    for (i, spec) in specs.iter().enumerate() {
        core.commit_at(i as u64 + 1, spec.lane());
    }

    let (_file, start) =
        snapshot_path_line(&format!(",\"terminate_pc\":\"{terminate_pc:#x}\""));
    let mut lines = vec![start];
    lines.extend(specs.iter().enumerate().map(|(i, s)| s.wire_line(i as u64)));
    lines.push(end_line("terminate_pc"));

    let (result, acks) = run_session(&test_config(), core, lines);
    let summary = result.expect("session succeeds");
    assert_eq!(summary.commits, 5);
    assert_eq!(summary.reason, Some(EndReason::TerminatePc));
    assert_eq!(acks.len(), 5);
    for (i, ack) in acks.iter().enumerate() {
        assert_eq!(ack, &format!("{{\"seq\":{i},\"status\":\"ok\"}}"));
    }
}

/// A reference block-start row is acked without consuming a DUT commit.
#[test]
fn reference_metadata_is_acked_without_dut_dequeue() {
    let a = CommitSpec::new(TRIGGER, 0x0001_0013, 4).wb(1, 7).rob(0);
    let b = CommitSpec::new(TRIGGER + 4, 0x0002_0013, 4).wb(2, 8).rob(1);

    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, a.lane());
    core.commit_at(2, b.lane());

    let (_file, start) = snapshot_path_line("");
    let lines = vec![
        start,
        a.wire_line(0),
        block_start_spec(TRIGGER + 4).wire_line(1),
        b.wire_line(2),
        end_line("terminate_pc"),
    ];

    let (result, acks) = run_session(&test_config(), core, lines);
    let summary = result.expect("session succeeds");
    // Two architectural pairs; the marker was acked but never paired.
    assert_eq!(summary.commits, 2);
    assert_eq!(acks.len(), 3);
    assert!(acks[1].contains("\"seq\":1"));
    assert!(acks[1].contains("\"status\":\"ok\""));
}

/// DUT-side metadata rows are skipped when seeking the next architectural
/// commit.
#[test]
fn dut_metadata_is_skipped() {
    let a = CommitSpec::new(TRIGGER, 0x0001_0013, 4).wb(1, 7).rob(1);

    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, block_start_spec(TRIGGER).rob(0).lane());
    core.commit_at(2, a.lane());

    let (_file, start) = snapshot_path_line("");
    let lines = vec![start, a.wire_line(0), end_line("terminate_pc")];

    let (result, _acks) = run_session(&test_config(), core, lines);
    assert_eq!(result.expect("session succeeds").commits, 1);
}

/// Scenario: writeback data diverges on one bit.
#[test]
fn wb_data_divergence_reports_field_and_values() {
    let ref_spec = CommitSpec::new(0x1_2340, 0x00AB_CDEF, 4)
        .wb(5, 0xDEAD_BEEF)
        .next(0x1_2344);
    let dut_spec = ref_spec.clone().wb(5, 0xDEAD_BEEE);

    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, dut_spec.lane());

    let (_file, start) = snapshot_path_line(",\"seq_base\":17");
    let lines = vec![start, ref_spec.wire_line(17), end_line("terminate_pc")];

    let (result, acks) = run_session(&test_config(), core, lines);
    let err = result.expect_err("must diverge");
    let RunnerError::CompareMismatch {
        seq,
        field,
        ref_val,
        dut_val,
    } = err
    else {
        panic!("expected mismatch, got {err:?}");
    };
    assert_eq!(seq, 17);
    assert_eq!(field, "wb_data");
    assert_eq!(ref_val, 0xDEAD_BEEF);
    assert_eq!(dut_val, 0xDEAD_BEEE);

    assert_eq!(acks.len(), 1);
    assert_eq!(
        acks[0],
        "{\"seq\":17,\"status\":\"mismatch\",\"field\":\"wb_data\",\
         \"qemu\":3735928559,\"dut\":3735928558}"
    );
}

/// Scenario: one extra same-cycle commit at the terminate PC is tolerated.
#[test]
fn terminate_pc_tail_is_tolerated() {
    let matched = CommitSpec::new(TRIGGER, 0x0001_0013, 4).rob(0);
    let tail = CommitSpec::new(TRIGGER + 4, 0x0002_0013, 4).rob(1);

    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, matched.lane());
    core.commit_at(1, tail.lane());

    let (_file, start) = snapshot_path_line(&format!(",\"terminate_pc\":\"{TRIGGER:#x}\""));
    let lines = vec![start, matched.wire_line(0), end_line("terminate_pc")];

    let (result, acks) = run_session(&test_config(), core, lines);
    let summary = result.expect("tail tolerated");
    assert_eq!(summary.commits, 1);
    assert_eq!(acks.len(), 1);
}

/// Scenario: a tail beyond the exception (last match not at the terminate
/// PC) is an extra_dut_commits failure.
#[test]
fn tail_outside_exception_is_rejected() {
    let matched = CommitSpec::new(TRIGGER, 0x0001_0013, 4).rob(0);
    let tail = CommitSpec::new(TRIGGER + 4, 0x0002_0013, 4).rob(1);

    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, matched.lane());
    core.commit_at(1, tail.lane());

    // terminate_pc points somewhere the reference never matched.
    let (_file, start) = snapshot_path_line(",\"terminate_pc\":\"0x9000\"");
    let lines = vec![start, matched.wire_line(0), end_line("terminate_pc")];

    let (result, acks) = run_session(&test_config(), core, lines);
    let err = result.expect_err("must reject tail");
    assert!(matches!(err, RunnerError::ExtraDutCommits { count: 1 }), "got {err:?}");
    assert_eq!(err.category(), ExitCategory::Mismatch);
    // ack_ok for the match, then the extra_dut_commits mismatch ack.
    assert_eq!(acks.len(), 2);
    assert!(acks[1].contains("\"field\":\"extra_dut_commits\""));
    assert!(acks[1].contains("\"dut\":1"));
}

/// A trap-bearing tail stays strict even at the terminate PC.
#[test]
fn trap_tail_is_rejected() {
    let matched = CommitSpec::new(TRIGGER, 0x0001_0013, 4).rob(0);
    let tail = CommitSpec::new(TRIGGER + 4, 0x0002_0013, 4).trap(2).rob(1);

    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, matched.lane());
    core.commit_at(1, tail.lane());

    let (_file, start) = snapshot_path_line(&format!(",\"terminate_pc\":\"{TRIGGER:#x}\""));
    let lines = vec![start, matched.wire_line(0), end_line("terminate_pc")];

    let (result, _acks) = run_session(&test_config(), core, lines);
    let err = result.expect_err("trap tail must be strict");
    assert!(matches!(err, RunnerError::ExtraDutCommits { count: 1 }), "got {err:?}");
}

/// The exception covers at most one tail commit.
#[test]
fn second_tail_commit_is_rejected() {
    let matched = CommitSpec::new(TRIGGER, 0x0001_0013, 4).rob(0);
    let tail_a = CommitSpec::new(TRIGGER + 4, 0x0002_0013, 4).rob(1);
    let tail_b = CommitSpec::new(TRIGGER + 8, 0x0003_0013, 4).rob(2);

    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, matched.lane());
    core.commit_at(1, tail_a.lane());
    core.commit_at(1, tail_b.lane());

    let (_file, start) = snapshot_path_line(&format!(",\"terminate_pc\":\"{TRIGGER:#x}\""));
    let lines = vec![start, matched.wire_line(0), end_line("terminate_pc")];

    let (result, _acks) = run_session(&test_config(), core, lines);
    let err = result.expect_err("second tail must be strict");
    assert!(matches!(err, RunnerError::ExtraDutCommits { count: 1 }), "got {err:?}");
}

/// Trailing DUT metadata is always tolerated at end of window.
#[test]
fn trailing_metadata_is_drained() {
    let matched = CommitSpec::new(TRIGGER, 0x0001_0013, 4).rob(0);

    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, matched.lane());
    core.commit_at(1, block_start_spec(TRIGGER + 4).rob(1).lane());

    let (_file, start) = snapshot_path_line(&format!(",\"terminate_pc\":\"{TRIGGER:#x}\""));
    let lines = vec![start, matched.wire_line(0), end_line("terminate_pc")];

    let (result, _acks) = run_session(&test_config(), core, lines);
    assert_eq!(result.expect("metadata drained").commits, 1);
}

/// Scenario: a deadlocked DUT produces a dut_no_commit mismatch ack.
#[test]
fn deadlock_faults_the_session() {
    let spec = CommitSpec::new(TRIGGER, 0x0001_0013, 4);
    let core = ScriptedCore::new(MEM); // never retires

    let (_file, start) = snapshot_path_line("");
    let lines = vec![start, spec.wire_line(0)];

    let (result, acks) = run_session(&test_config(), core, lines);
    let err = result.expect_err("must deadlock");
    assert!(
        matches!(err, RunnerError::DutDeadlock { stall_cycles: 500 }),
        "got {err:?}"
    );
    assert_eq!(err.category(), ExitCategory::Mismatch);
    assert_eq!(acks.len(), 1);
    assert!(acks[0].contains("\"field\":\"dut_no_commit\""));
}

/// max_commits ends succeed only under the acceptance flag; trailing
/// non-metadata commits are tolerated with a warning.
#[test]
fn max_commits_end_respects_acceptance_flag() {
    let matched = CommitSpec::new(TRIGGER, 0x0001_0013, 4).rob(0);
    let leftover = CommitSpec::new(TRIGGER + 4, 0x0002_0013, 4).rob(1);

    let build_core = || {
        let mut core = ScriptedCore::new(MEM);
        core.commit_at(1, matched.lane());
        core.commit_at(1, leftover.lane());
        core
    };
    let (_file, start) = snapshot_path_line("");
    let lines = vec![start, matched.wire_line(0), end_line("max_commits")];

    let mut config = test_config();
    config.accept_max_commits_end = true;
    let (result, _acks) = run_session(&config, build_core(), lines.clone());
    let summary = result.expect("accepted under the flag");
    assert_eq!(summary.reason, Some(EndReason::MaxCommits));

    let (result, _acks) = run_session(&test_config(), build_core(), lines);
    let err = result.expect_err("rejected without the flag");
    assert!(matches!(err, RunnerError::OtherEnd { .. }), "got {err:?}");
    assert_eq!(err.category(), ExitCategory::OtherEnd);
}

/// guest_exit is strict for reconciliation and exits as an unaccepted end.
#[test]
fn guest_exit_end_is_strict_but_unaccepted() {
    let matched = CommitSpec::new(TRIGGER, 0x0001_0013, 4).rob(0);

    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, matched.lane());

    let (_file, start) = snapshot_path_line("");
    let lines = vec![start, matched.wire_line(0), end_line("guest_exit")];

    let (result, _acks) = run_session(&test_config(), core, lines);
    let err = result.expect_err("guest_exit is not accepted");
    assert!(
        matches!(&err, RunnerError::OtherEnd { reason } if reason == "guest_exit"),
        "got {err:?}"
    );
}

/// Socket close with an empty DUT queue is an implicit guest exit.
#[test]
fn implicit_close_with_empty_queue_succeeds() {
    let matched = CommitSpec::new(TRIGGER, 0x0001_0013, 4).rob(0);

    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, matched.lane());

    let (_file, start) = snapshot_path_line("");
    let lines = vec![start, matched.wire_line(0)]; // no end

    let (result, acks) = run_session(&test_config(), core, lines);
    let summary = result.expect("implicit end");
    assert_eq!(summary.commits, 1);
    assert_eq!(summary.reason, None);
    assert_eq!(acks.len(), 1);
}

/// Socket close with buffered non-metadata commits is a failure.
#[test]
fn implicit_close_with_pending_commits_fails() {
    let matched = CommitSpec::new(TRIGGER, 0x0001_0013, 4).rob(0);
    let leftover = CommitSpec::new(TRIGGER + 4, 0x0002_0013, 4).rob(1);

    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, matched.lane());
    core.commit_at(1, leftover.lane());

    let (_file, start) = snapshot_path_line("");
    let lines = vec![start, matched.wire_line(0)];

    let (result, _acks) = run_session(&test_config(), core, lines);
    let err = result.expect_err("pending commits at close");
    assert!(matches!(err, RunnerError::ExtraDutCommits { count: 1 }), "got {err:?}");
}

/// A commit before any start is a protocol error.
#[test]
fn commit_before_start_is_a_protocol_error() {
    let spec = CommitSpec::new(TRIGGER, 0x0001_0013, 4);
    let core = ScriptedCore::new(MEM);

    let (result, acks) = run_session(&test_config(), core, vec![spec.wire_line(0)]);
    let err = result.expect_err("must fail");
    assert!(
        matches!(
            &err,
            RunnerError::Protocol(ProtocolError::CommitBeforeStart)
        ),
        "got {err:?}"
    );
    assert_eq!(err.category(), ExitCategory::Protocol);
    assert!(acks.is_empty());
}

/// A sequence gap is acked as a `seq` mismatch before any comparison.
#[test]
fn sequence_gap_is_a_seq_mismatch() {
    let spec = CommitSpec::new(TRIGGER, 0x0001_0013, 4);
    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, spec.lane());

    let (_file, start) = snapshot_path_line("");
    let lines = vec![start, spec.wire_line(5)]; // expected 0

    let (result, acks) = run_session(&test_config(), core, lines);
    let err = result.expect_err("must fail");
    let RunnerError::CompareMismatch {
        seq,
        field,
        ref_val,
        dut_val,
    } = err
    else {
        panic!("expected seq mismatch, got {err:?}");
    };
    assert_eq!(seq, 5);
    assert_eq!(field, "seq");
    assert_eq!(ref_val, 5);
    assert_eq!(dut_val, 0);
    assert!(acks[0].contains("\"field\":\"seq\""));
}

/// Malformed lines fault the session in the protocol category.
#[test]
fn malformed_line_is_a_protocol_error() {
    let core = ScriptedCore::new(MEM);
    let (result, _acks) = run_session(
        &test_config(),
        core,
        vec!["{\"no_type\":1}".to_string()],
    );
    let err = result.expect_err("must fail");
    assert!(
        matches!(&err, RunnerError::Protocol(ProtocolError::Malformed { .. })),
        "got {err:?}"
    );
    assert_eq!(err.category(), ExitCategory::Protocol);
}

/// A start whose boot PC disagrees with the trigger PC is rejected.
#[test]
fn start_with_divergent_boot_pc_is_rejected() {
    let core = ScriptedCore::new(MEM);
    let file = write_snapshot(&[(TRIGGER, vec![0x13])]);
    let start = start_line(
        &file.path().display().to_string(),
        TRIGGER,
        ",\"boot_pc\":\"0x20000\"",
    );

    let (result, acks) = run_session(&test_config(), core, vec![start]);
    let err = result.expect_err("must fail");
    assert!(
        matches!(&err, RunnerError::CompareMismatch { field: "trigger_pc_boot_pc", .. }),
        "got {err:?}"
    );
    assert!(acks[0].contains("trigger_pc_boot_pc"));
}

/// An unreadable snapshot path faults in the protocol category.
#[test]
fn missing_snapshot_is_a_protocol_error() {
    let core = ScriptedCore::new(MEM);
    let start = start_line("/nonexistent/snapshot.img", TRIGGER, "");

    let (result, _acks) = run_session(&test_config(), core, vec![start]);
    let err = result.expect_err("must fail");
    assert!(matches!(&err, RunnerError::Snapshot(_)), "got {err:?}");
    assert_eq!(err.category(), ExitCategory::Protocol);
}

/// The force-mismatch knob perturbs exactly the first DUT commit.
#[test]
fn force_mismatch_self_test_trips_on_first_commit() {
    let spec = CommitSpec::new(TRIGGER, 0x0001_0013, 4).rob(0);
    let mut core = ScriptedCore::new(MEM);
    core.commit_at(1, spec.lane());

    let (_file, start) = snapshot_path_line("");
    let lines = vec![start, spec.wire_line(0), end_line("terminate_pc")];

    let mut config = test_config();
    config.force_mismatch = true;
    let (result, acks) = run_session(&config, core, lines);
    let err = result.expect_err("perturbed commit must mismatch");
    assert!(
        matches!(&err, RunnerError::CompareMismatch { field: "pc", .. }),
        "got {err:?}"
    );
    assert!(acks[0].contains("\"field\":\"pc\""));
}
