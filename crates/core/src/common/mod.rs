//! Common types shared across the lockstep runner.
//!
//! This module collects the vocabulary of the runner. It provides:
//! 1. **Constants:** Architectural fixed points (stack window base, ROB depth, refill line size).
//! 2. **Records:** The architectural commit record and the mismatch descriptor.
//! 3. **Errors:** The full failure taxonomy and the process exit categories.

/// Architectural constants of the DUT contract.
pub mod constants;
/// Error taxonomy and exit categories.
pub mod error;
/// Commit records, field masking, and mismatch descriptors.
pub mod record;
