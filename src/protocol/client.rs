//! Client side of the sync protocol: walks the source tree and streams
//! bodies only for the entries the server asks for.

use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::channel::FramedChannel;
use crate::error::{FaubError, Result};
use crate::walker::Walker;

use super::wire::EMPTY_ROOT_SENTINEL;

/// Decision the server sends back for each probed file/symlink entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferDecision {
    /// The previous snapshot has nothing usable here; client should stream
    /// the body (or, for a symlink, the server will recreate it fresh).
    Needed,
    /// The server found a matching entry in the previous snapshot and will
    /// hardlink from it; client sends no body.
    Unneeded,
}

impl TransferDecision {
    fn from_i64(v: i64) -> Result<Self> {
        match v {
            1 => Ok(TransferDecision::Needed),
            0 => Ok(TransferDecision::Unneeded),
            other => Err(FaubError::Protocol(format!("bad transfer decision {other}"))),
        }
    }
}

/// Drive a full client-side run against `root`, returning entry/byte counts.
///
/// Phase 1 (discovery): every entry's path, mode, mtime and (for files)
/// size is sent as it's walked — no content hashing, since the server's
/// needed/unneeded call is made purely from mtime comparison against its
/// previous snapshot. Phase 2 (request) and phase 3 (transfer) are
/// interleaved per entry: the server replies with its decision as soon as
/// it has read one entry's header, and the client streams a body
/// immediately if asked. Phase 4 (reconstitution) happens entirely
/// server-side; the client's part of it is just reading the final report.
pub fn run_client<S: Read + Write + AsRawFd>(
    channel: &mut FramedChannel<S>,
    root: &Path,
) -> Result<ClientRunStats> {
    channel.write_delimited(&root.display().to_string())?;
    let ack = channel.read_delimited(crate::channel::DELIM)?;
    if ack != "OK" {
        return Err(FaubError::Protocol(format!("server rejected root: {ack}")));
    }

    let entries: Vec<_> = Walker::new(root)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(FaubError::io_bare)?;

    // A source root with nothing under it at all. The server still runs its
    // finalize phase and sends a report even here, so we must read it before
    // returning rather than dropping the channel out from under its write.
    if entries.is_empty() {
        channel.write_delimited(EMPTY_ROOT_SENTINEL)?;
        let mut stats = ClientRunStats::default();
        stats.report = Some(read_report(channel)?);
        return Ok(stats);
    }

    let mut stats = ClientRunStats::default();

    for entry in &entries {
        let meta = std::fs::symlink_metadata(&entry.path).map_err(|e| FaubError::io(&entry.path, e))?;
        channel.write_delimited(&entry.relative.display().to_string())?;
        channel.write_i64(meta.uid() as i64)?;
        channel.write_i64(meta.gid() as i64)?;
        channel.write_i64(meta.mode() as i64)?;
        channel.write_i64(meta.mtime())?;

        if meta.is_dir() {
            // Directories are always needed: the server (re)creates them
            // immediately but defers applying their mtime to phase 4, since
            // writing children into a freshly made directory would bump it
            // right back past whatever we just set.
            channel.write_i64(KIND_DIR)?;
            stats.entries_seen += 1;
            continue;
        }
        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(&entry.path).map_err(|e| FaubError::io(&entry.path, e))?;
            channel.write_i64(KIND_SYMLINK)?;
            channel.write_delimited(&target.display().to_string())?;
            stats.entries_seen += 1;
            let decision = TransferDecision::from_i64(channel.read_i64()?)?;
            match decision {
                TransferDecision::Unneeded => stats.bodies_linked += 1,
                TransferDecision::Needed => {}
            }
            continue;
        }

        channel.write_i64(KIND_REGULAR)?;
        channel.write_i64(meta.size() as i64)?;

        stats.entries_seen += 1;
        let decision = TransferDecision::from_i64(channel.read_i64()?)?;
        match decision {
            TransferDecision::Unneeded => {
                stats.bodies_linked += 1;
            }
            TransferDecision::Needed => {
                channel.send_raw_file(&entry.path, meta.size())?;
                stats.bodies_transferred += 1;
                stats.bytes_transferred += meta.size();
            }
        }
    }

    channel.write_sentinel()?;

    let report = read_report(channel)?;
    stats.report = Some(report);
    Ok(stats)
}

fn read_report<S: Read + Write + AsRawFd>(channel: &mut FramedChannel<S>) -> Result<super::wire::RunReport> {
    let bytes_len = channel.read_i64()? as usize;
    let bytes = channel.read_bytes(bytes_len)?;
    bincode::deserialize(&bytes).map_err(|e| FaubError::Protocol(format!("bad report: {e}")))
}

/// Entry kind tags used on the wire between [`run_client`] and
/// [`super::server::run_server`].
pub const KIND_DIR: i64 = 1;
pub const KIND_SYMLINK: i64 = 2;
pub const KIND_REGULAR: i64 = 3;

/// Outcome of a client run.
#[derive(Debug, Default)]
pub struct ClientRunStats {
    /// Entries probed (files, dirs, symlinks).
    pub entries_seen: u64,
    /// Bodies actually streamed.
    pub bodies_transferred: u64,
    /// Bytes streamed.
    pub bytes_transferred: u64,
    /// Files/symlinks the server already had linked from the previous
    /// snapshot.
    pub bodies_linked: u64,
    /// The server's finalize report, once received.
    pub report: Option<super::wire::RunReport>,
}
