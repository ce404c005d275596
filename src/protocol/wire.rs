//! Protocol-level constants and the shared report type, distinct from the
//! lower-level framing primitives in [`crate::channel`].

use serde::{Deserialize, Serialize};

/// Sent by the client in place of the phase-2 entry stream when the source
/// root has no files at all. New relative to the original, which let an
/// empty root silently produce a zero-entry backup directory; the server
/// treats this as "finish the run immediately, directory stays empty" per
/// the design notes' resolution of that ambiguity, rather than proceeding
/// through phases 2-3 with nothing to enumerate.
pub const EMPTY_ROOT_SENTINEL: &str = "##EMPTY_ROOT* ";

/// The four protocol phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Root announcement and empty-root short-circuit.
    Negotiate,
    /// Directory tree enumeration.
    Enumerate,
    /// File body transfer for entries the server doesn't already have.
    Transfer,
    /// Staging-to-final rename and summary report.
    Finalize,
}

/// Summary of a completed (or empty-root-shortcut) run, reported by the
/// server at the end of phase 4.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Total entries seen in phase 2 (files, dirs, symlinks).
    pub entries_seen: u64,
    /// Entries whose bodies were actually requested and transferred.
    pub bodies_transferred: u64,
    /// Entries satisfied by hardlinking to an existing inode instead of a
    /// fresh transfer.
    pub bodies_linked: u64,
    /// Bytes actually moved over the wire in phase 3.
    pub bytes_transferred: u64,
    /// Non-fatal per-file errors encountered (see [`crate::error::ErrorTally`]).
    pub errors: u64,
    /// How long the run took, in seconds.
    pub duration_secs: i64,
    /// True if the run ended via the empty-root short-circuit.
    pub empty_root: bool,
    /// Relative paths actually (re)materialized this run — transferred or
    /// recreated rather than hardlinked from the previous snapshot. Handed
    /// to the caller for the new entry's `.faub_diff` sidecar.
    pub modified_files: Vec<String>,
}
