//! Configuration for the lockstep runner.
//!
//! This module defines the configuration structures that parameterize a
//! session. It provides:
//! 1. **Defaults:** Baseline constants (boot registers, cycle budgets, refill
//!    latency, backing memory depth).
//! 2. **Structures:** Hierarchical config for boot state, budgets, and the
//!    diagnostic disassembler.
//!
//! Configuration is supplied by the CLI (flags plus environment fallbacks) or
//! deserialized from JSON; use `RunnerConfig::default()` for the baseline.

use std::path::PathBuf;

use serde::Deserialize;

/// Default configuration constants for the runner.
mod defaults {
    /// Default boot stack pointer (128 KiB).
    ///
    /// Used when neither the CLI nor the `start` message supplies one.
    pub const BOOT_SP: u64 = 0x0000_0000_0002_0000;

    /// Default boot return address.
    ///
    /// Zero means "no return": a guest returning from its entry function
    /// jumps to address zero, which the DUT surfaces as a halt.
    pub const BOOT_RA: u64 = 0;

    /// Hard cap on total DUT cycles per session (200 million).
    ///
    /// Exceeding the cap without producing a commit terminates the session.
    pub const MAX_DUT_CYCLES: u64 = 200_000_000;

    /// Consecutive no-retire cycles before the session is declared
    /// deadlocked (200 thousand). Zero disables the check.
    pub const DEADLOCK_CYCLES: u64 = 200_000;

    /// Fixed latency, in cycles, between an accepted I$-L2 refill request
    /// and its single-cycle response.
    pub const REFILL_LATENCY: u64 = 20;

    /// Backing memory depth for the bundled scripted core (4 MiB).
    ///
    /// Must be a power of two; the top half doubles as the stack window.
    pub const MEM_BYTES: usize = 4 * 1024 * 1024;
}

/// Boot register values driven into the DUT at session start.
///
/// The boot PC comes from the `start` message (`boot_pc`, defaulting to
/// `trigger_pc`); SP and RA default from here unless the message overrides
/// them.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Initial stack pointer.
    pub sp: u64,
    /// Initial return address.
    pub ra: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            sp: defaults::BOOT_SP,
            ra: defaults::BOOT_RA,
        }
    }
}

/// Cycle and latency budgets for the DUT stepper.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Hard cap on total DUT cycles per session.
    pub max_dut_cycles: u64,
    /// No-retire stall threshold; zero disables deadlock detection.
    pub deadlock_cycles: u64,
    /// I$-L2 refill latency in cycles.
    pub refill_latency: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_dut_cycles: defaults::MAX_DUT_CYCLES,
            deadlock_cycles: defaults::DEADLOCK_CYCLES,
            refill_latency: defaults::REFILL_LATENCY,
        }
    }
}

/// External disassembler used to decorate mismatch and deadlock reports.
///
/// Both paths must be present for the tool to be invoked; reports degrade to
/// raw hex otherwise.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DisasmConfig {
    /// Path of the disassembler tool.
    pub tool: Option<PathBuf>,
    /// Path of the ISA spec file passed to the tool.
    pub spec: Option<PathBuf>,
}

/// Top-level runner configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Path of the Unix socket the reference connects to.
    pub socket_path: PathBuf,
    /// Emit per-commit progress at debug level.
    pub verbose: bool,
    /// Boot register defaults.
    pub boot: BootConfig,
    /// Cycle and latency budgets.
    pub budgets: BudgetConfig,
    /// Backing memory depth for the bundled scripted core, in bytes.
    pub mem_bytes: usize,
    /// Treat an `end{reason="max_commits"}` as success.
    pub accept_max_commits_end: bool,
    /// Perturb the first DUT commit to self-test the mismatch path.
    pub force_mismatch: bool,
    /// External disassembler for reports.
    pub disasm: DisasmConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::new(),
            verbose: false,
            boot: BootConfig::default(),
            budgets: BudgetConfig::default(),
            mem_bytes: defaults::MEM_BYTES,
            accept_max_commits_end: false,
            force_mismatch: false,
            disasm: DisasmConfig::default(),
        }
    }
}
