//! Lockstep co-simulation runner library.
//!
//! This crate validates a cycle-accurate RTL model of an out-of-order
//! multi-issue core (the DUT) against an architectural reference simulator
//! executing the same guest program from the same memory snapshot. It
//! provides:
//! 1. **Snapshot:** Versioned binary image loading and the two-window
//!    guest-address fold into DUT backing memory.
//! 2. **DUT:** The black-box signal contract, the per-cycle stepper with the
//!    I$-L2 refill responder, and a script-driven model for tests and
//!    bring-up.
//! 3. **Comparison:** Metadata classification and field-ordered commit
//!    equivalence.
//! 4. **Protocol:** The newline-delimited reference ⇄ runner wire protocol
//!    over a Unix socket.
//! 5. **Session:** The orchestrating state machine, end-of-window
//!    reconciliation, diagnostics rings, and failure reports.

/// Metadata commit classification (block-start and macro markers).
pub mod classify;
/// Shared vocabulary: constants, records, errors.
pub mod common;
/// Field-ordered commit comparison.
pub mod compare;
/// Runner configuration and defaults.
pub mod config;
/// Diagnostic rings, report formatting, external disassembly.
pub mod diag;
/// DUT contract, stepper, backing memory, scripted model.
pub mod dut;
/// Wire protocol and socket transport.
pub mod protocol;
/// Session orchestration.
pub mod session;
/// Snapshot image loading.
pub mod snapshot;
/// Session statistics.
pub mod stats;

/// Runner exit categories; map errors through `RunnerError::category`.
pub use crate::common::error::{ExitCategory, RunnerError};
/// One architectural retirement record.
pub use crate::common::record::CommitRecord;
/// Top-level configuration; use `RunnerConfig::default()` for the baseline.
pub use crate::config::RunnerConfig;
/// The RTL black-box signal contract.
pub use crate::dut::DutSignals;
/// Per-cycle DUT driver.
pub use crate::dut::stepper::DutStepper;
/// Session orchestrator; owns one connection, one DUT, one window.
pub use crate::session::Session;
/// Parsed snapshot image.
pub use crate::snapshot::SnapshotImage;
