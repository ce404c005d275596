//! A single cataloged file: its fingerprint, link count, and derived
//! calendar fields.
//!
//! Grounded in `BackupEntry.cc`: the Rust struct keeps the same field set
//! (filename, MD5, mtime, size, inode, link count) but derives calendar
//! fields on demand via [`crate::time_util`] instead of caching them on the
//! entry, and serializes with `serde`/`bincode` rather than the original's
//! `class2string`/`string2class` regex-based text format (preserving the
//! same information, losslessly and byte-stably on round-trip).

use serde::{Deserialize, Serialize};

use crate::time_util::{self, CalendarFields};

/// Content fingerprint. 128-bit MD5 digest, matching `MD5file`/`MD5string`'s
/// output width; kept as raw bytes rather than a hex `String` so catalog
/// comparisons are a cheap array compare instead of a string compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 16]);

impl Fingerprint {
    /// Hex-encode, lowercase, matching the original's digest string format.
    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Compute the fingerprint of `data` in memory (used for small files;
    /// [`Fingerprint::of_file`] streams larger ones).
    pub fn of_bytes(data: &[u8]) -> Self {
        Fingerprint(md5::compute(data).0)
    }

    /// Stream a file's contents through MD5 in [`crate::channel::BUFSIZE`]
    /// chunks, matching `MD5file`'s streaming read rather than slurping the
    /// whole file into memory.
    pub fn of_file(path: &std::path::Path) -> std::io::Result<Self> {
        use std::io::Read;
        let mut file = std::fs::File::open(path)?;
        let mut ctx = md5::Context::new();
        let mut buf = [0u8; crate::channel::BUFSIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            ctx.consume(&buf[..n]);
        }
        Ok(Fingerprint(ctx.compute().0))
    }
}

/// One row of the single-file catalog ("rawData" in `BackupCache.cc`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Stable identifier, assigned as `max(existing rowid) + 1` on insert.
    pub rowid: u64,
    /// Path as seen by the catalog, relative to the backup root — for the
    /// single-file backup style this is the dated filename itself (e.g.
    /// `2026/07/mydb-20260727.sql.gz`), which is where the entry's calendar
    /// date actually comes from.
    pub filename: String,
    /// Content fingerprint at last scan.
    pub fingerprint: Fingerprint,
    /// Size in bytes at last scan.
    pub size: u64,
    /// Inode number at last scan (used to detect hardlink aliasing).
    pub inode: u64,
    /// Number of hardlinks to the underlying inode at last scan.
    pub links: u64,
    /// Modification time, unix seconds, at last scan.
    pub mtime: i64,
}

impl BackupEntry {
    /// Derive calendar fields from the date embedded in `filename`, matching
    /// `BackupEntry::updateAges`: entries hardlinked together across many
    /// backups all share one inode and so one `mtime`, which makes `mtime`
    /// useless for dating a specific copy. The filename itself — the
    /// backup's dated name, e.g. `2026/07/mydb-20260727.sql.gz` — is what
    /// actually identifies which day's backup this row is. Falls back to
    /// `mtime` only if no date can be parsed out of the filename at all.
    pub fn calendar_fields(&self) -> CalendarFields {
        time_util::calendar_fields_from_name(&self.filename)
            .unwrap_or_else(|| time_util::calendar_fields(self.mtime))
    }

    /// Days between `reference` and this entry's filename-derived date,
    /// matching `fnameDayAge` in `updateAges`.
    pub fn day_age(&self, reference: i64) -> i64 {
        let fields = self.calendar_fields();
        time_util::day_age_from_date(reference, fields.year, fields.month, fields.day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_hex_roundtrip() {
        let fp = Fingerprint::of_bytes(b"hello world");
        assert_eq!(fp.to_hex().len(), 32);
    }

    #[test]
    fn date_comes_from_filename_not_shared_hardlink_mtime() {
        // Two entries hardlinked together share one inode and mtime, as
        // linking.rs produces, but were captured on different days; their
        // ages must still differ because the date is read from each one's
        // own dated filename, not from the shared mtime.
        let shared_mtime = 1_800_000_000;
        let older = BackupEntry {
            rowid: 0,
            filename: "2026/07/mydb-20260720.sql.gz".to_string(),
            fingerprint: Fingerprint([0; 16]),
            size: 10,
            inode: 1,
            links: 2,
            mtime: shared_mtime,
        };
        let newer = BackupEntry {
            rowid: 1,
            filename: "2026/07/mydb-20260727.sql.gz".to_string(),
            fingerprint: Fingerprint([0; 16]),
            size: 10,
            inode: 1,
            links: 2,
            mtime: shared_mtime,
        };
        let reference = time_util::timestamp_for_date(2026, 7, 27).unwrap();
        assert_eq!(newer.day_age(reference), 0);
        assert_eq!(older.day_age(reference), 7);
    }

    #[test]
    fn calendar_fields_falls_back_to_mtime_without_a_parsable_date() {
        let entry = BackupEntry {
            rowid: 0,
            filename: "current".to_string(),
            fingerprint: Fingerprint([0; 16]),
            size: 0,
            inode: 0,
            links: 1,
            mtime: 0,
        };
        assert_eq!(entry.calendar_fields(), time_util::calendar_fields(0));
    }
}
