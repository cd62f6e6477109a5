//! Failure taxonomy and process exit categories.
//!
//! This module defines every way a lockstep session can fail. It provides:
//! 1. **Leaf errors:** Snapshot, protocol, and transport failures.
//! 2. **`RunnerError`:** The session-level error with one variant per
//!    taxonomy kind.
//! 3. **`ExitCategory`:** The mapping from outcome to process exit status.
//!
//! Recovery is attempted only for transient read interruptions and for
//! `SIGPIPE`; everything else terminates the session through `RunnerError`.

use std::io;

use thiserror::Error;

/// Snapshot image errors: file format, payload reads, and aliasing.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The file does not start with the `LXCOSIM1` magic.
    #[error("bad snapshot magic")]
    BadMagic,

    /// The header version is not the supported version 1.
    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    /// A header, range-table, or payload read ended early.
    #[error("short read in snapshot {0}")]
    ShortRead(&'static str),

    /// A range payload is larger than the DUT backing memory.
    #[error(
        "snapshot range aliases DUT memory (range too large): \
         base={base:#x} size={size:#x} dut_mem_bytes={mem_bytes:#x}"
    )]
    RangeTooLarge {
        /// Guest base address of the offending range.
        base: u64,
        /// Range size in bytes.
        size: u64,
        /// DUT backing memory depth in bytes.
        mem_bytes: u64,
    },

    /// Two mapped guest bytes collided in DUT backing memory.
    #[error(
        "snapshot range aliases DUT memory (wrap/collision): \
         base={base:#x} size={size:#x} first_collision_guest={guest_addr:#x} \
         mapped_addr={mapped:#x} dut_mem_bytes={mem_bytes:#x}"
    )]
    Aliased {
        /// Guest base address of the range being loaded.
        base: u64,
        /// Range size in bytes.
        size: u64,
        /// First guest address whose mapped byte was already occupied.
        guest_addr: u64,
        /// Host offset both guest bytes mapped to.
        mapped: u64,
        /// DUT backing memory depth in bytes.
        mem_bytes: u64,
    },

    /// The DUT reports a zero-depth backing memory.
    #[error("DUT memory depth is zero")]
    NoBackingMemory,

    /// Underlying I/O failure while reading the image.
    #[error("snapshot i/o: {0}")]
    Io(#[from] io::Error),
}

/// Wire protocol errors: malformed or out-of-order reference messages, and
/// DUT-side contract violations observed during commit extraction.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A line did not parse as a known message.
    #[error("malformed message: {detail}")]
    Malformed {
        /// Parser diagnostic.
        detail: String,
    },

    /// A `commit` arrived before any `start`.
    #[error("commit seen before start")]
    CommitBeforeStart,

    /// An `end` arrived before any `start`.
    #[error("end seen before start")]
    EndBeforeStart,

    /// The DUT violated its commit contract (ROB order, memory size).
    #[error("DUT protocol violation: {detail}")]
    DutViolation {
        /// Description of the violated invariant.
        detail: String,
    },
}

/// Stream transport errors on the reference socket.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Binding the listening socket failed.
    #[error("failed to bind socket {path}: {source}")]
    Bind {
        /// Socket path that could not be bound.
        path: String,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// Accepting the reference connection failed.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Reading a line from the reference failed.
    #[error("socket read failed: {0}")]
    Read(#[source] io::Error),

    /// Writing an acknowledgement failed.
    #[error("socket write failed: {0}")]
    Write(#[source] io::Error),
}

/// Session-level error, one variant per taxonomy kind.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Snapshot format, read, or aliasing failure.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Malformed or out-of-order messages, or a DUT contract violation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Socket read/write failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The commit streams diverged on a field.
    #[error("mismatch at seq={seq}: {field} ref={ref_val:#x} dut={dut_val:#x}")]
    CompareMismatch {
        /// Sequence number of the divergent commit.
        seq: u64,
        /// Wire name of the divergent field.
        field: &'static str,
        /// Reference-side value.
        ref_val: u64,
        /// DUT-side value.
        dut_val: u64,
    },

    /// The DUT held non-metadata commits past the end of the window.
    #[error("DUT has {count} extra non-metadata commit(s) after reference end")]
    ExtraDutCommits {
        /// Number of unmatched trailing commits.
        count: u64,
    },

    /// No retirement within the stall threshold.
    #[error("DUT deadlock after {stall_cycles} cycles with no retire")]
    DutDeadlock {
        /// Consecutive cycles with an empty retire queue.
        stall_cycles: u64,
    },

    /// The simulation cycle cap was exhausted.
    #[error("DUT exceeded max cycles: {limit}")]
    DutMaxCycles {
        /// Configured cycle cap.
        limit: u64,
    },

    /// The DUT halted or raised its exit signal before an expected commit.
    #[error("DUT halted before next commit")]
    DutTerminatedEarly,

    /// The session ended for a reason the runner does not accept.
    #[error("session ended without acceptance: {reason}")]
    OtherEnd {
        /// End reason as reported by the reference (or synthesized).
        reason: String,
    },
}

/// Process exit categories with their conventional status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCategory {
    /// The session completed and the streams agreed.
    Success,
    /// Bad arguments or unusable runtime surface.
    Usage,
    /// Malformed/out-of-order messages, snapshot errors, internal DUT failure.
    Protocol,
    /// Comparator or extra-commit failure.
    Mismatch,
    /// The session ended for an unaccepted reason.
    OtherEnd,
}

impl ExitCategory {
    /// Returns the process exit status for this category.
    #[inline]
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Usage => 2,
            Self::Protocol => 3,
            Self::Mismatch => 4,
            Self::OtherEnd => 5,
        }
    }
}

impl RunnerError {
    /// Maps this error to its process exit category.
    ///
    /// The DUT budget terminations surface on the acknowledgement channel as
    /// a `dut_no_commit` mismatch, so they exit in the mismatch category.
    pub fn category(&self) -> ExitCategory {
        match self {
            Self::Snapshot(_) | Self::Protocol(_) | Self::Transport(_) => ExitCategory::Protocol,
            Self::CompareMismatch { .. }
            | Self::ExtraDutCommits { .. }
            | Self::DutDeadlock { .. }
            | Self::DutMaxCycles { .. }
            | Self::DutTerminatedEarly => ExitCategory::Mismatch,
            Self::OtherEnd { .. } => ExitCategory::OtherEnd,
        }
    }
}
