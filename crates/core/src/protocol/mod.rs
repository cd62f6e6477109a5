//! Reference ⇄ runner wire protocol.
//!
//! Every record is a single newline-terminated JSON object with string and
//! unsigned-64 fields. The contract is the field set, not JSON itself:
//! numeric fields accept plain JSON numbers as well as decimal or
//! `0x`-prefixed hex strings, because reference front-ends disagree on how
//! they print addresses. Three message types arrive (`start`, `commit`,
//! `end`); two acknowledgements leave (`ack_ok`, `ack_mismatch`).
//!
//! Field-name quirks preserved from the trace producer: the first trap
//! argument travels as `traparg0`, and the mismatch value keys are `qemu`
//! (reference side) and `dut`.

use serde::Deserialize;

use crate::common::error::ProtocolError;
use crate::common::record::{CommitRecord, Mismatch, OperandMirror};

/// Line-based socket transport.
pub mod transport;

mod flex {
    //! Deserialization of u64 fields that may arrive as numbers or strings.

    use std::fmt;

    use serde::Deserializer;
    use serde::de::{self, Visitor};

    struct FlexU64;

    impl Visitor<'_> for FlexU64 {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an unsigned integer or a decimal/hex string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| de::Error::custom("negative value for u64 field"))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            let text = v.trim();
            let parsed = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
                .map_or_else(|| text.parse::<u64>().ok(), |hex| u64::from_str_radix(hex, 16).ok());
            parsed.ok_or_else(|| de::Error::custom(format!("invalid u64 literal: {v:?}")))
        }
    }

    /// Deserializes a required flexible u64.
    pub fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        d.deserialize_any(FlexU64)
    }

    /// Deserializes an optional flexible u64 (pair with `#[serde(default)]`).
    pub fn u64_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        u64(d).map(Some)
    }
}

/// A `start` message: opens the session window.
#[derive(Clone, Debug, Deserialize)]
pub struct StartMessage {
    /// Path of the snapshot image to load.
    pub snapshot_path: String,
    /// PC the reference snapshot was taken at.
    #[serde(deserialize_with = "flex::u64")]
    pub trigger_pc: u64,
    /// PC whose retirement ends the window, when the reference knows it.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub terminate_pc: Option<u64>,
    /// Boot PC; defaults to `trigger_pc`.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub boot_pc: Option<u64>,
    /// Boot stack pointer; defaults from configuration.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub boot_sp: Option<u64>,
    /// Boot return address; defaults from configuration.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub boot_ra: Option<u64>,
    /// First expected sequence number; defaults to 0.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub seq_base: Option<u64>,
}

/// A `commit` message: one reference retirement.
#[derive(Clone, Debug, Deserialize)]
pub struct CommitMessage {
    /// Monotonic sequence number.
    #[serde(deserialize_with = "flex::u64")]
    pub seq: u64,
    /// Program counter.
    #[serde(deserialize_with = "flex::u64")]
    pub pc: u64,
    /// Instruction length in bytes.
    #[serde(deserialize_with = "flex::u64")]
    pub len: u64,
    /// Raw instruction payload.
    #[serde(deserialize_with = "flex::u64")]
    pub insn: u64,
    /// Writeback valid (0/1).
    #[serde(deserialize_with = "flex::u64")]
    pub wb_valid: u64,
    /// Writeback destination register.
    #[serde(deserialize_with = "flex::u64")]
    pub wb_rd: u64,
    /// Writeback data.
    #[serde(deserialize_with = "flex::u64")]
    pub wb_data: u64,
    /// Memory access valid (0/1).
    #[serde(deserialize_with = "flex::u64")]
    pub mem_valid: u64,
    /// Memory access is a store (0/1).
    #[serde(deserialize_with = "flex::u64")]
    pub mem_is_store: u64,
    /// Memory access address.
    #[serde(deserialize_with = "flex::u64")]
    pub mem_addr: u64,
    /// Store data.
    #[serde(deserialize_with = "flex::u64")]
    pub mem_wdata: u64,
    /// Load data.
    #[serde(deserialize_with = "flex::u64")]
    pub mem_rdata: u64,
    /// Memory access size in bytes.
    #[serde(deserialize_with = "flex::u64")]
    pub mem_size: u64,
    /// Trap valid (0/1).
    #[serde(deserialize_with = "flex::u64")]
    pub trap_valid: u64,
    /// Trap cause.
    #[serde(deserialize_with = "flex::u64")]
    pub trap_cause: u64,
    /// First trap argument (wire key `traparg0`).
    #[serde(rename = "traparg0", deserialize_with = "flex::u64")]
    pub trap_arg0: u64,
    /// Architectural successor PC.
    #[serde(deserialize_with = "flex::u64")]
    pub next_pc: u64,

    /// First source mirror valid, when exposed.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub src0_valid: Option<u64>,
    /// First source mirror register.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub src0_reg: Option<u64>,
    /// First source mirror data.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub src0_data: Option<u64>,
    /// Second source mirror valid, when exposed.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub src1_valid: Option<u64>,
    /// Second source mirror register.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub src1_reg: Option<u64>,
    /// Second source mirror data.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub src1_data: Option<u64>,
    /// Destination mirror valid, when exposed.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub dst_valid: Option<u64>,
    /// Destination mirror register.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub dst_reg: Option<u64>,
    /// Destination mirror data.
    #[serde(default, deserialize_with = "flex::u64_opt")]
    pub dst_data: Option<u64>,
}

/// An `end` message: closes the session window.
#[derive(Clone, Debug, Deserialize)]
pub struct EndMessage {
    /// Why the reference stopped the window.
    #[serde(default)]
    pub reason: String,
}

/// Why a session window ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// The reference retired the terminate PC.
    TerminatePc,
    /// The guest exited on its own.
    GuestExit,
    /// The reference hit its architectural commit cap.
    MaxCommits,
    /// Any other producer-specific reason.
    Other(String),
}

impl EndReason {
    /// Parses the wire reason string.
    pub fn parse(reason: &str) -> Self {
        match reason {
            "terminate_pc" => Self::TerminatePc,
            "guest_exit" => Self::GuestExit,
            "max_commits" => Self::MaxCommits,
            other => Self::Other(other.to_string()),
        }
    }

    /// Strict reasons require an exact one-to-one end-of-window match.
    #[inline]
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::TerminatePc | Self::GuestExit)
    }

    /// The wire spelling of this reason.
    pub fn as_str(&self) -> &str {
        match self {
            Self::TerminatePc => "terminate_pc",
            Self::GuestExit => "guest_exit",
            Self::MaxCommits => "max_commits",
            Self::Other(s) => s,
        }
    }
}

/// Any reference → runner message.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum RefMessage {
    /// Session open.
    #[serde(rename = "start")]
    Start(StartMessage),
    /// One retirement (boxed: the commit payload dominates the enum size).
    #[serde(rename = "commit")]
    Commit(Box<CommitMessage>),
    /// Session close.
    #[serde(rename = "end")]
    End(EndMessage),
}

/// Parses one wire line into a message.
///
/// # Errors
///
/// `ProtocolError::Malformed` carrying the parser diagnostic (missing
/// `type`, unknown type, missing or malformed fields).
pub fn parse_line(line: &str) -> Result<RefMessage, ProtocolError> {
    serde_json::from_str(line).map_err(|e| ProtocolError::Malformed {
        detail: e.to_string(),
    })
}

/// Serializes an `ack_ok` line for an accepted sequence number.
pub fn ack_ok_line(seq: u64) -> String {
    format!("{{\"seq\":{seq},\"status\":\"ok\"}}")
}

/// Serializes an `ack_mismatch` line for a divergence.
///
/// The reference-side value travels under the producer's historical key
/// `qemu`.
pub fn ack_mismatch_line(seq: u64, mm: &Mismatch) -> String {
    format!(
        "{{\"seq\":{seq},\"status\":\"mismatch\",\"field\":\"{}\",\"qemu\":{},\"dut\":{}}}",
        mm.field, mm.ref_val, mm.dut_val
    )
}

fn mirror_from_wire(valid: Option<u64>, reg: Option<u64>, data: Option<u64>) -> OperandMirror {
    OperandMirror {
        valid: valid.unwrap_or(0) != 0,
        reg: reg.unwrap_or(0),
        data: data.unwrap_or(0),
    }
}

impl CommitMessage {
    /// Converts the wire form into the internal commit record.
    pub fn to_record(&self) -> CommitRecord {
        CommitRecord {
            cycle: 0,
            seq: self.seq,
            pc: self.pc,
            op: 0,
            insn: self.insn,
            len: self.len,
            wb_valid: self.wb_valid != 0,
            wb_rd: self.wb_rd,
            wb_data: self.wb_data,
            src0: mirror_from_wire(self.src0_valid, self.src0_reg, self.src0_data),
            src1: mirror_from_wire(self.src1_valid, self.src1_reg, self.src1_data),
            dst: mirror_from_wire(self.dst_valid, self.dst_reg, self.dst_data),
            mem_valid: self.mem_valid != 0,
            mem_is_store: self.mem_is_store != 0,
            mem_addr: self.mem_addr,
            mem_wdata: self.mem_wdata,
            mem_rdata: self.mem_rdata,
            mem_size: self.mem_size,
            trap_valid: self.trap_valid != 0,
            trap_cause: self.trap_cause,
            trap_arg0: self.trap_arg0,
            next_pc: self.next_pc,
            rob_index: 0,
            uop_uid: 0,
            parent_uid: 0,
            block_uid: 0,
            block_bid: 0,
            is_bstart: false,
            is_bstop: false,
        }
    }
}
