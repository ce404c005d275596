//! The four-phase Faub sync protocol: client drives, server applies.
//!
//! Grounded in `faub.cc`'s main loop and `ipc.cc`'s framing, run over a
//! [`crate::channel::FramedChannel`] carried by a [`crate::pipeline::ProcessPipeline`].
//!
//! Phases, matching the original's `PHASE_*` constants:
//! 1. **Discovery** — client walks the source tree and sends one directory
//!    entry header (`path, mode, mtime`, plus `size` for a regular file) per
//!    file/dir/symlink, terminated by the sentinel string. No content
//!    hashing happens here or anywhere else in this path; a root with
//!    nothing under it sends [`EMPTY_ROOT_SENTINEL`] instead and the run
//!    ends immediately (new relative to the original, which silently
//!    produced a zero-entry backup; this is an explicit signal per the
//!    design notes' resolution of that ambiguity).
//! 2. **Request** — for each file/symlink entry, the server decides
//!    needed-vs-linkable purely from an `lstat` mtime comparison against the
//!    previous snapshot directory (a directory entry is always needed).
//! 3. **Transfer** — the client streams a body immediately after reading a
//!    "needed" decision for the entry it just sent.
//! 4. **Reconstitution** — the server hardlinks unneeded files/symlinks
//!    straight from the previous snapshot, then, once every entry has been
//!    materialized, applies each directory's deferred mtime (deferred since
//!    writing children into it would otherwise bump it right back) and
//!    reports the finished [`RunReport`]; client acks.

pub mod client;
pub mod server;
pub mod wire;

pub use wire::{Phase, RunReport, EMPTY_ROOT_SENTINEL};
