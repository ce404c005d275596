//! Server side of the sync protocol: receives the discovery stream, decides
//! needed-vs-linkable against the previous snapshot directory, and applies
//! results into a staging directory before the caller renames it into place.

use std::io::{Read, Write};
use std::os::unix::fs::{lchown, MetadataExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::channel::FramedChannel;
use crate::error::{ErrorTally, FaubError, Result};

use super::client::{KIND_DIR, KIND_REGULAR, KIND_SYMLINK};
use super::wire::{RunReport, EMPTY_ROOT_SENTINEL};

/// What to do with one file/symlink entry, decided purely from mtime
/// comparison against the previous snapshot — no content hashing.
enum SyncDecision {
    /// Nothing in the previous snapshot matches; the body must be
    /// (re)created fresh.
    Needed,
    /// The previous snapshot has an identical entry at this path; hardlink
    /// from there instead of touching the wire.
    LinkFrom(PathBuf),
}

fn decide(
    relative: &str,
    mtime: i64,
    is_symlink: bool,
    symlink_target: Option<&str>,
    previous_snapshot: Option<&Path>,
) -> SyncDecision {
    let Some(root) = previous_snapshot else {
        return SyncDecision::Needed;
    };
    let candidate = root.join(relative);
    let Ok(meta) = std::fs::symlink_metadata(&candidate) else {
        return SyncDecision::Needed;
    };

    if is_symlink {
        if !meta.file_type().is_symlink() || meta.mtime() != mtime {
            return SyncDecision::Needed;
        }
        if let (Ok(prev_target), Some(target)) = (std::fs::read_link(&candidate), symlink_target) {
            if prev_target.to_string_lossy() == target {
                return SyncDecision::LinkFrom(candidate);
            }
        }
        SyncDecision::Needed
    } else if meta.file_type().is_file() && meta.mtime() == mtime {
        SyncDecision::LinkFrom(candidate)
    } else {
        SyncDecision::Needed
    }
}

/// Run the server side of one sync against `staging_dir`, consulting
/// `previous_snapshot` (the prior Faub backup directory, if one exists) to
/// decide whether an incoming entry can be satisfied by hardlinking instead
/// of a fresh transfer. Returns the finished [`RunReport`], whose
/// `modified_files` lists every relative path actually (re)materialized —
/// the set a caller persists as the `.faub_diff` sidecar.
pub fn run_server<S: Read + Write + AsRawFd>(
    channel: &mut FramedChannel<S>,
    staging_dir: &Path,
    previous_snapshot: Option<&Path>,
) -> Result<RunReport> {
    let started = Instant::now();
    let mut report = RunReport::default();
    let mut modified_files = Vec::new();

    // Phase 1: negotiate.
    let root_announced = channel.read_delimited(crate::channel::DELIM)?;
    std::fs::create_dir_all(staging_dir).map_err(|e| FaubError::io(staging_dir, e))?;
    channel.write_delimited("OK")?;
    log::debug!("server: accepted root {root_announced}");

    let mut tally = ErrorTally::new();
    // Directory mtimes applied only after every entry has been materialized,
    // since creating files inside a directory bumps its mtime right back.
    let mut deferred_dir_mtimes: Vec<(PathBuf, i64)> = Vec::new();

    loop {
        let relative = match channel.read_delimited_or_sentinel()? {
            None => break,
            Some(s) if s == EMPTY_ROOT_SENTINEL => {
                report.empty_root = true;
                break;
            }
            Some(s) => s,
        };

        let uid = channel.read_i64()?;
        let gid = channel.read_i64()?;
        let mode = channel.read_i64()?;
        let mtime = channel.read_i64()?;
        let kind = channel.read_i64()?;
        let dest = staging_dir.join(&relative);

        report.entries_seen += 1;

        let outcome = match kind {
            KIND_DIR => apply_dir(&dest, uid, gid, mode).map(|_| {
                deferred_dir_mtimes.push((dest.clone(), mtime));
            }),
            KIND_SYMLINK => {
                let target = channel.read_delimited(crate::channel::DELIM)?;
                match decide(&relative, mtime, true, Some(&target), previous_snapshot) {
                    SyncDecision::LinkFrom(source) => {
                        channel.write_i64(0)?;
                        let result = link_from_existing(&dest, &source, uid, gid);
                        if result.is_ok() {
                            report.bodies_linked += 1;
                        }
                        result
                    }
                    SyncDecision::Needed => {
                        channel.write_i64(1)?;
                        let result = apply_symlink(&dest, &target, uid, gid);
                        if result.is_ok() {
                            modified_files.push(relative.clone());
                        }
                        result
                    }
                }
            }
            KIND_REGULAR => {
                let size = channel.read_i64()? as u64;
                match decide(&relative, mtime, false, None, previous_snapshot) {
                    SyncDecision::LinkFrom(source) => {
                        channel.write_i64(0)?;
                        let result = link_from_existing(&dest, &source, uid, gid);
                        if result.is_ok() {
                            report.bodies_linked += 1;
                        }
                        result
                    }
                    SyncDecision::Needed => {
                        channel.write_i64(1)?;
                        let result = receive_body(channel, &dest, uid, gid, mode, mtime, size);
                        if result.is_ok() {
                            report.bodies_transferred += 1;
                            report.bytes_transferred += size;
                            modified_files.push(relative.clone());
                        }
                        result
                    }
                }
            }
            other => Err(FaubError::Protocol(format!("unknown entry kind {other}"))),
        };

        if let Err(e) = outcome {
            tally.record(format!("entry '{relative}': {e}"));
        }
    }

    // Phase 4: reconstitution. Every file/symlink body is already on disk;
    // only the deferred directory mtimes remain.
    for (dir, mtime) in deferred_dir_mtimes {
        if let Err(e) = set_mtime(&dir, mtime, false) {
            tally.record(format!("directory '{}': {e}", dir.display()));
        }
    }

    report.errors = tally.count();
    report.duration_secs = started.elapsed().as_secs() as i64;
    report.modified_files = modified_files;

    let bytes = bincode::serialize(&report)
        .map_err(|e| FaubError::Protocol(format!("report encode failed: {e}")))?;
    channel.write_i64(bytes.len() as i64)?;
    channel.write_bytes(&bytes)?;

    Ok(report)
}

fn apply_dir(dest: &Path, uid: i64, gid: i64, mode: i64) -> Result<()> {
    std::fs::create_dir_all(dest).map_err(|e| FaubError::io(dest, e))?;
    chown_chmod(dest, uid, gid, mode, false)
}

fn apply_symlink(dest: &Path, target: &str, uid: i64, gid: i64) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| FaubError::io(parent, e))?;
    }
    let _ = std::fs::remove_file(dest);
    std::os::unix::fs::symlink(target, dest).map_err(|e| FaubError::io(dest, e))?;
    lchown(dest, Some(uid as u32), Some(gid as u32)).map_err(|e| FaubError::io(dest, e))
}

fn link_from_existing(dest: &Path, source: &Path, uid: i64, gid: i64) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| FaubError::io(parent, e))?;
    }
    let _ = std::fs::remove_file(dest);
    std::fs::hard_link(source, dest).map_err(|e| FaubError::io(dest, e))?;
    let _ = lchown(dest, Some(uid as u32), Some(gid as u32));
    Ok(())
}

fn receive_body<S: Read + Write + AsRawFd>(
    channel: &mut FramedChannel<S>,
    dest: &Path,
    uid: i64,
    gid: i64,
    mode: i64,
    mtime: i64,
    size: u64,
) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| FaubError::io(parent, e))?;
    }
    let mut file = std::fs::File::create(dest).map_err(|e| FaubError::io(dest, e))?;
    let mut remaining = size;
    let mut buf = [0u8; crate::channel::BUFSIZE];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let chunk = channel.read_bytes(want)?;
        file.write_all(&chunk).map_err(|e| FaubError::io(dest, e))?;
        remaining -= chunk.len() as u64;
    }
    drop(file);
    chown_chmod(dest, uid, gid, mode, false)?;
    set_mtime(dest, mtime, false)?;
    let _ = buf;
    Ok(())
}

fn chown_chmod(path: &Path, uid: i64, gid: i64, mode: i64, is_symlink: bool) -> Result<()> {
    lchown(path, Some(uid as u32), Some(gid as u32)).map_err(|e| FaubError::io(path, e))?;
    if !is_symlink {
        let perm = std::fs::Permissions::from_mode((mode as u32) & 0o7777);
        std::fs::set_permissions(path, perm).map_err(|e| FaubError::io(path, e))?;
    }
    Ok(())
}

fn set_mtime(path: &Path, mtime: i64, is_symlink: bool) -> Result<()> {
    let ts = nix::sys::time::TimeSpec::new(mtime, 0);
    if is_symlink {
        nix::sys::stat::utimensat(
            None,
            path,
            &ts,
            &ts,
            nix::sys::stat::UtimensatFlags::NoFollowSymlink,
        )
        .map_err(|e| FaubError::io(path, std::io::Error::from(e)))
    } else {
        let file = std::fs::File::open(path).map_err(|e| FaubError::io(path, e))?;
        nix::sys::stat::futimens(&file, &ts, &ts).map_err(|e| FaubError::io(path, std::io::Error::from(e)))
    }
}

/// Rename `staging_dir` into `final_dir`, matching the original's
/// "build under a temp name, rename in one atomic step" finalize.
pub fn finalize(staging_dir: &Path, final_dir: &Path) -> Result<()> {
    std::fs::rename(staging_dir, final_dir).map_err(|e| FaubError::io(final_dir, e))
}

/// Staging directory name for a backup currently in progress, distinct from
/// its final name so a killed run never leaves a half-written directory
/// under the name the retention engine would otherwise treat as complete.
pub fn staging_name(final_name: &str) -> PathBuf {
    PathBuf::from(format!(".{final_name}.inprogress"))
}
