//! Session statistics collection and reporting.
//!
//! Tracks what the lockstep window actually did: how many commits were
//! matched, how many metadata rows were skipped on each side, what was
//! drained or tolerated at the end of the window, and how fast the DUT was
//! driven.

use std::time::Instant;

/// Counters accumulated over one session window.
#[derive(Clone, Debug)]
pub struct SessionStats {
    start_time: Instant,
    /// Reference/DUT commit pairs that compared equal.
    pub commits_matched: u64,
    /// Reference metadata rows acknowledged without pairing.
    pub ref_metadata_skipped: u64,
    /// DUT metadata rows discarded without pairing.
    pub dut_metadata_skipped: u64,
    /// Trailing DUT metadata rows drained at end of window.
    pub trailing_metadata_drained: u64,
    /// Non-metadata tail commits tolerated under the terminate-PC exception.
    pub tail_commits_tolerated: u64,
    /// Trailing non-metadata commits tolerated under a non-strict end.
    pub tail_commits_lenient: u64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStats {
    /// Creates zeroed counters stamped with the current time.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            commits_matched: 0,
            ref_metadata_skipped: 0,
            dut_metadata_skipped: 0,
            trailing_metadata_drained: 0,
            tail_commits_tolerated: 0,
            tail_commits_lenient: 0,
        }
    }

    /// Prints the end-of-session summary.
    pub fn print(&self, dut_cycles: u64) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let khz = if elapsed > 0.0 {
            dut_cycles as f64 / elapsed / 1000.0
        } else {
            0.0
        };

        println!("--- lockstep session summary ---");
        println!("  commits matched      : {}", self.commits_matched);
        println!(
            "  metadata skipped     : ref={} dut={}",
            self.ref_metadata_skipped, self.dut_metadata_skipped
        );
        if self.trailing_metadata_drained != 0 {
            println!(
                "  trailing metadata    : {}",
                self.trailing_metadata_drained
            );
        }
        if self.tail_commits_tolerated != 0 {
            println!(
                "  tolerated tail       : {}",
                self.tail_commits_tolerated
            );
        }
        if self.tail_commits_lenient != 0 {
            println!(
                "  lenient tail         : {}",
                self.tail_commits_lenient
            );
        }
        println!(
            "  dut cycles           : {dut_cycles} ({khz:.1} kHz over {elapsed:.2}s)"
        );
    }
}
