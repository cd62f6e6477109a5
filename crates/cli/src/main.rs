//! Lockstep co-simulation runner CLI.
//!
//! Listens on a Unix socket, accepts one reference connection, and runs a
//! lockstep session against the DUT model. Every option has an environment
//! fallback (`LOCKSIM_*`); command-line values win. Numeric options accept
//! decimal or `0x`-prefixed hex.
//!
//! The bundled scripted core binds the DUT side for harness bring-up and
//! self-tests (`--force-mismatch`); a production RTL model implements
//! `locksim_core::DutSignals` and slots into the same session.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use locksim_core::config::{BootConfig, BudgetConfig, DisasmConfig, RunnerConfig};
use locksim_core::dut::scripted::ScriptedCore;
use locksim_core::dut::stepper::DutStepper;
use locksim_core::protocol::transport::{Listener, ignore_sigpipe};
use locksim_core::session::Session;
use locksim_core::{ExitCategory, RunnerError};

/// Parses a u64 accepting decimal or `0x`-prefixed hex.
fn parse_u64_auto(text: &str) -> Result<u64, String> {
    let text = text.trim();
    text.strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .map_or_else(
            || text.parse::<u64>().map_err(|e| e.to_string()),
            |hex| u64::from_str_radix(hex, 16).map_err(|e| e.to_string()),
        )
}

#[derive(Parser, Debug)]
#[command(
    name = "locksim",
    author,
    version,
    about = "Lockstep co-simulation runner",
    long_about = "Validates a cycle-accurate out-of-order RTL core against an \
                  architectural reference over a Unix-socket commit stream.\n\n\
                  The reference connects, sends start/commit/end records, and \
                  receives an ack per commit; the first divergence terminates \
                  the session with a mismatch report."
)]
struct Cli {
    /// Unix socket path the reference connects to.
    #[arg(long, env = "LOCKSIM_SOCKET")]
    socket: PathBuf,

    /// Default boot stack pointer (overridable per-session by `start`).
    #[arg(long, value_parser = parse_u64_auto, env = "LOCKSIM_BOOT_SP", default_value = "0x20000")]
    boot_sp: u64,

    /// Default boot return address (overridable per-session by `start`).
    #[arg(long, value_parser = parse_u64_auto, env = "LOCKSIM_BOOT_RA", default_value = "0")]
    boot_ra: u64,

    /// Hard cap on total DUT cycles.
    #[arg(long, value_parser = parse_u64_auto, env = "LOCKSIM_MAX_DUT_CYCLES", default_value = "200000000")]
    max_dut_cycles: u64,

    /// No-retire stall threshold before declaring deadlock (0 disables).
    #[arg(long, value_parser = parse_u64_auto, env = "LOCKSIM_DEADLOCK_CYCLES", default_value = "200000")]
    deadlock_cycles: u64,

    /// I$-L2 refill latency in cycles.
    #[arg(long, value_parser = parse_u64_auto, env = "LOCKSIM_REFILL_LATENCY", default_value = "20")]
    refill_latency: u64,

    /// DUT backing memory depth in bytes (power of two).
    #[arg(long, value_parser = parse_u64_auto, env = "LOCKSIM_MEM_BYTES", default_value = "0x400000")]
    mem_bytes: u64,

    /// Treat an `end{reason="max_commits"}` as success.
    #[arg(long, env = "LOCKSIM_ACCEPT_MAX_COMMITS_END")]
    accept_max_commits_end: bool,

    /// Perturb the first DUT commit to self-test the mismatch path.
    #[arg(long, env = "LOCKSIM_FORCE_MISMATCH")]
    force_mismatch: bool,

    /// External disassembler tool for reports.
    #[arg(long, env = "LOCKSIM_DISASM_TOOL")]
    disasm_tool: Option<PathBuf>,

    /// ISA spec file passed to the disassembler.
    #[arg(long, env = "LOCKSIM_DISASM_SPEC")]
    disasm_spec: Option<PathBuf>,

    /// Per-commit progress at debug level.
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn to_config(&self) -> RunnerConfig {
        RunnerConfig {
            socket_path: self.socket.clone(),
            verbose: self.verbose,
            boot: BootConfig {
                sp: self.boot_sp,
                ra: self.boot_ra,
            },
            budgets: BudgetConfig {
                max_dut_cycles: self.max_dut_cycles,
                deadlock_cycles: self.deadlock_cycles,
                refill_latency: self.refill_latency,
            },
            mem_bytes: self.mem_bytes as usize,
            accept_max_commits_end: self.accept_max_commits_end,
            force_mismatch: self.force_mismatch,
            disasm: DisasmConfig {
                tool: self.disasm_tool.clone(),
                spec: self.disasm_spec.clone(),
            },
        }
    }
}

fn main() {
    // Keep fail-fast semantics without getting killed when the reference
    // closes the socket before reading an ack.
    ignore_sigpipe();

    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = cli.to_config();

    let listener = match Listener::bind(&config.socket_path) {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to create server socket: {e}");
            process::exit(ExitCategory::Usage.code());
        }
    };

    let conn = match listener.accept() {
        Ok(conn) => conn,
        Err(e) => {
            error!("accept failed: {e}");
            process::exit(ExitCategory::Usage.code());
        }
    };

    let dut = ScriptedCore::new(config.mem_bytes);
    let stepper = DutStepper::new(dut, &config);
    let mut session = Session::new(&config, conn, stepper);

    match session.run() {
        Ok(summary) => {
            session.stats.print(summary.dut_cycles);
            process::exit(ExitCategory::Success.code());
        }
        Err(err) => {
            report_failure(&err);
            session.stats.print(session.dut_cycles());
            process::exit(err.category().code());
        }
    }
}

fn report_failure(err: &RunnerError) {
    match err {
        RunnerError::CompareMismatch { .. }
        | RunnerError::ExtraDutCommits { .. }
        | RunnerError::DutDeadlock { .. }
        | RunnerError::DutMaxCycles { .. }
        | RunnerError::DutTerminatedEarly => error!("lockstep failure: {err}"),
        RunnerError::OtherEnd { reason } => error!("session ended without acceptance: {reason}"),
        other => error!("runner error: {other}"),
    }
}
