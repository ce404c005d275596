//! Profile configuration: parsing, validation, and persistence.
//!
//! Grounded in `Config.cc`'s per-profile key/value settings, rendered with
//! a `FromStr`-per-option parser in the style of
//! `mnt/mount_options.rs`'s `MountOption::from_str` (pattern-matching on a
//! `key=value` string rather than a general-purpose config-file parser
//! crate), since the original's config lines are exactly that shape.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FaubError;
use crate::retention::RetentionPolicy;

/// How a profile produces a backup: a single piped command writing one
/// dated file/archive, or a Faub client/server directory sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupStyle {
    SingleFile,
    Faub,
}

/// A path/checksum pair an operator wants flagged if it ever changes —
/// `tripwire.cc`'s integrity-monitoring list, carried here as profile
/// configuration rather than its own subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tripwire {
    pub path: PathBuf,
    pub expected_md5: String,
}

/// One parsed configuration line, the Rust analog of `mnt::MountOption`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOption {
    Title(String),
    Source(PathBuf),
    Destination(PathBuf),
    BackupCommand(String),
    BackupStyle(BackupStyle),
    KeepDaily(u32),
    KeepWeekly(u32),
    KeepMonthly(u32),
    KeepYearly(u32),
    WeeklyDow(u32),
    FailsafeMinRemaining(u32),
    FailsafeDays(u32),
    FailsafeSlow(u32),
    MaxDeletionsPerRun(u32),
    ConsolidateAge(u32),
    DataOnly(bool),
    MaxLinks(u64),
    LockEnabled(bool),
    RemoteHost(String),
    MinFreeLocal(u64),
    MinFreeRemote(u64),
    MinBackupSize(u64),
    Notify(String),
    Mode(u32),
    Uid(u32),
    Gid(u32),
    Include(String),
    Exclude(String),
    Tripwire(Tripwire),
    /// An option this version doesn't recognize; preserved verbatim so a
    /// config file can carry forward settings for a newer/older binary
    /// without losing them on rewrite, matching the original's tolerance
    /// for unknown lines.
    Unknown(String),
}

impl FromStr for ConfigOption {
    type Err = FaubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let (key, value) = match line.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => return Ok(ConfigOption::Unknown(line.to_string())),
        };

        let parse_u32 = |v: &str| -> Result<u32, FaubError> {
            v.parse().map_err(|_| FaubError::Validation {
                key: key.to_string(),
                reason: format!("expected an integer, got '{v}'"),
            })
        };
        let parse_u64 = |v: &str| -> Result<u64, FaubError> {
            v.parse().map_err(|_| FaubError::Validation {
                key: key.to_string(),
                reason: format!("expected an integer, got '{v}'"),
            })
        };
        let parse_bool = |v: &str| -> Result<bool, FaubError> {
            match v {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                other => Err(FaubError::Validation {
                    key: key.to_string(),
                    reason: format!("expected a boolean, got '{other}'"),
                }),
            }
        };

        Ok(match key {
            "title" => ConfigOption::Title(value.to_string()),
            "source" => ConfigOption::Source(PathBuf::from(value)),
            "destination" => ConfigOption::Destination(PathBuf::from(value)),
            "backup_command" => ConfigOption::BackupCommand(value.to_string()),
            "backup_style" => ConfigOption::BackupStyle(match value {
                "single_file" => BackupStyle::SingleFile,
                "faub" => BackupStyle::Faub,
                other => {
                    return Err(FaubError::Validation {
                        key: key.to_string(),
                        reason: format!("expected 'single_file' or 'faub', got '{other}'"),
                    })
                }
            }),
            "keep_daily" => ConfigOption::KeepDaily(parse_u32(value)?),
            "keep_weekly" => ConfigOption::KeepWeekly(parse_u32(value)?),
            "keep_monthly" => ConfigOption::KeepMonthly(parse_u32(value)?),
            "keep_yearly" => ConfigOption::KeepYearly(parse_u32(value)?),
            "weekly_dow" => ConfigOption::WeeklyDow(parse_u32(value)?),
            "failsafe_min_remaining" => ConfigOption::FailsafeMinRemaining(parse_u32(value)?),
            "failsafe_days" => ConfigOption::FailsafeDays(parse_u32(value)?),
            "failsafe_slow" => ConfigOption::FailsafeSlow(parse_u32(value)?),
            "max_deletions_per_run" => ConfigOption::MaxDeletionsPerRun(parse_u32(value)?),
            "consolidate_age" => ConfigOption::ConsolidateAge(parse_u32(value)?),
            "data_only" => ConfigOption::DataOnly(parse_bool(value)?),
            "max_links" => ConfigOption::MaxLinks(parse_u64(value)?),
            "lock" => ConfigOption::LockEnabled(parse_bool(value)?),
            "remote_host" => ConfigOption::RemoteHost(value.to_string()),
            "min_free_local" => ConfigOption::MinFreeLocal(parse_u64(value)?),
            "min_free_remote" => ConfigOption::MinFreeRemote(parse_u64(value)?),
            "min_backup_size" => ConfigOption::MinBackupSize(parse_u64(value)?),
            "notify" => ConfigOption::Notify(value.to_string()),
            "mode" => ConfigOption::Mode(u32::from_str_radix(value, 8).map_err(|_| FaubError::Validation {
                key: key.to_string(),
                reason: format!("expected an octal mode, got '{value}'"),
            })?),
            "uid" => ConfigOption::Uid(parse_u32(value)?),
            "gid" => ConfigOption::Gid(parse_u32(value)?),
            "include" => ConfigOption::Include(value.to_string()),
            "exclude" => ConfigOption::Exclude(value.to_string()),
            "tripwire" => {
                let (path, md5) = value.split_once(':').ok_or_else(|| FaubError::Validation {
                    key: key.to_string(),
                    reason: format!("expected 'path:md5', got '{value}'"),
                })?;
                ConfigOption::Tripwire(Tripwire {
                    path: PathBuf::from(path),
                    expected_md5: md5.to_string(),
                })
            }
            _ => ConfigOption::Unknown(line.to_string()),
        })
    }
}

/// A fully parsed, validated profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub title: Option<String>,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub backup_command: Option<String>,
    pub backup_style: BackupStyle,
    pub retention: RetentionPolicyConfig,
    pub max_links: u64,
    pub lock_enabled: bool,
    pub remote_host: Option<String>,
    pub min_free_local: u64,
    pub min_free_remote: u64,
    pub min_backup_size: u64,
    pub notify: Vec<String>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub include: Option<String>,
    pub exclude: Option<String>,
    pub tripwires: Vec<Tripwire>,
}

/// Serializable mirror of [`RetentionPolicy`] (which itself carries a
/// `data_only` run-time toggle not meaningful to persist as profile state).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionPolicyConfig {
    pub keep_daily: u32,
    pub keep_weekly: u32,
    pub keep_monthly: u32,
    pub keep_yearly: u32,
    pub weekly_dow: u32,
    pub failsafe_min_remaining: u32,
    pub failsafe_days: u32,
    pub max_deletions_per_run: u32,
    pub consolidate_age: u32,
}

impl RetentionPolicyConfig {
    /// Build a run-time [`RetentionPolicy`], supplying the per-run
    /// `data_only` flag.
    pub fn to_policy(self, data_only: bool) -> RetentionPolicy {
        RetentionPolicy {
            keep_daily: self.keep_daily,
            keep_weekly: self.keep_weekly,
            keep_monthly: self.keep_monthly,
            keep_yearly: self.keep_yearly,
            weekly_dow: self.weekly_dow,
            failsafe_min_remaining: self.failsafe_min_remaining,
            failsafe_days: self.failsafe_days,
            max_deletions_per_run: self.max_deletions_per_run,
            consolidate_age: self.consolidate_age,
            data_only,
        }
    }

    /// The `--fp` ("failsafe paranoid") shorthand: tighten the failsafe gate
    /// to refuse any prune unless effectively everything recent is still
    /// present, and push consolidation out so same-day duplicates linger
    /// longer before being collapsed. Mirrors the original CLI flag that
    /// swaps in a conservative failsafe preset instead of asking an operator
    /// to hand-tune every threshold.
    pub fn apply_failsafe_paranoid(&mut self) {
        self.failsafe_min_remaining = self.failsafe_min_remaining.max(5);
        self.failsafe_days = self.failsafe_days.max(30);
        self.consolidate_age = self.consolidate_age.max(90);
    }
}

impl Profile {
    /// Parse a full config file's lines (comments starting with `#` and
    /// blank lines ignored) into a [`Profile`], failing validation if
    /// `source`/`destination` are missing.
    pub fn parse(name: &str, text: &str) -> Result<Self, FaubError> {
        let mut title = None;
        let mut source = None;
        let mut destination = None;
        let mut backup_command = None;
        let mut backup_style = BackupStyle::SingleFile;
        let mut keep_daily = 7;
        let mut keep_weekly = 4;
        let mut keep_monthly = 12;
        let mut keep_yearly = 5;
        let mut weekly_dow = 0;
        let mut failsafe_min_remaining = 1;
        let mut failsafe_days = 3;
        let mut max_deletions_per_run = 1000;
        let mut consolidate_age = 0;
        let mut max_links = 32_000;
        let mut lock_enabled = false;
        let mut remote_host = None;
        let mut min_free_local = 0;
        let mut min_free_remote = 0;
        let mut min_backup_size = 0;
        let mut notify = Vec::new();
        let mut mode = None;
        let mut uid = None;
        let mut gid = None;
        let mut include = None;
        let mut exclude = None;
        let mut tripwires = Vec::new();

        for raw_line in text.lines() {
            let trimmed = raw_line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match ConfigOption::from_str(trimmed)? {
                ConfigOption::Title(v) => title = Some(v),
                ConfigOption::Source(p) => source = Some(p),
                ConfigOption::Destination(p) => destination = Some(p),
                ConfigOption::BackupCommand(v) => backup_command = Some(v),
                ConfigOption::BackupStyle(v) => backup_style = v,
                ConfigOption::KeepDaily(v) => keep_daily = v,
                ConfigOption::KeepWeekly(v) => keep_weekly = v,
                ConfigOption::KeepMonthly(v) => keep_monthly = v,
                ConfigOption::KeepYearly(v) => keep_yearly = v,
                ConfigOption::WeeklyDow(v) => weekly_dow = v,
                ConfigOption::FailsafeMinRemaining(v) => failsafe_min_remaining = v,
                ConfigOption::FailsafeDays(v) => failsafe_days = v,
                ConfigOption::FailsafeSlow(_) => {}
                ConfigOption::MaxDeletionsPerRun(v) => max_deletions_per_run = v,
                ConfigOption::ConsolidateAge(v) => consolidate_age = v,
                ConfigOption::DataOnly(_) => {}
                ConfigOption::MaxLinks(v) => max_links = v,
                ConfigOption::LockEnabled(v) => lock_enabled = v,
                ConfigOption::RemoteHost(h) => remote_host = Some(h),
                ConfigOption::MinFreeLocal(v) => min_free_local = v,
                ConfigOption::MinFreeRemote(v) => min_free_remote = v,
                ConfigOption::MinBackupSize(v) => min_backup_size = v,
                ConfigOption::Notify(v) => notify.push(v),
                ConfigOption::Mode(v) => mode = Some(v),
                ConfigOption::Uid(v) => uid = Some(v),
                ConfigOption::Gid(v) => gid = Some(v),
                ConfigOption::Include(v) => include = Some(v),
                ConfigOption::Exclude(v) => exclude = Some(v),
                ConfigOption::Tripwire(t) => tripwires.push(t),
                ConfigOption::Unknown(line) => {
                    log::debug!("profile '{name}': ignoring unrecognized config line '{line}'");
                }
            }
        }

        let source = source.ok_or_else(|| FaubError::Validation {
            key: "source".to_string(),
            reason: "missing required 'source' directive".to_string(),
        })?;
        let destination = destination.ok_or_else(|| FaubError::Validation {
            key: "destination".to_string(),
            reason: "missing required 'destination' directive".to_string(),
        })?;

        Ok(Profile {
            name: name.to_string(),
            title,
            source,
            destination,
            backup_command,
            backup_style,
            retention: RetentionPolicyConfig {
                keep_daily,
                keep_weekly,
                keep_monthly,
                keep_yearly,
                weekly_dow,
                failsafe_min_remaining,
                failsafe_days,
                max_deletions_per_run,
                consolidate_age,
            },
            max_links,
            lock_enabled,
            remote_host,
            min_free_local,
            min_free_remote,
            min_backup_size,
            notify,
            mode,
            uid,
            gid,
            include,
            exclude,
            tripwires,
        })
    }

    /// Apply the `--fp` ("failsafe paranoid") preset to this profile's
    /// retention settings in place.
    pub fn apply_failsafe_paranoid(&mut self) {
        self.retention.apply_failsafe_paranoid();
    }

    /// Render back to the same `key=value` line format, for persistence.
    pub fn to_config_text(&self) -> String {
        let mut out = String::new();
        if let Some(title) = &self.title {
            out.push_str(&format!("title={title}\n"));
        }
        out.push_str(&format!("source={}\n", self.source.display()));
        out.push_str(&format!("destination={}\n", self.destination.display()));
        if let Some(cmd) = &self.backup_command {
            out.push_str(&format!("backup_command={cmd}\n"));
        }
        out.push_str(&format!(
            "backup_style={}\n",
            match self.backup_style {
                BackupStyle::SingleFile => "single_file",
                BackupStyle::Faub => "faub",
            }
        ));
        out.push_str(&format!("keep_daily={}\n", self.retention.keep_daily));
        out.push_str(&format!("keep_weekly={}\n", self.retention.keep_weekly));
        out.push_str(&format!("keep_monthly={}\n", self.retention.keep_monthly));
        out.push_str(&format!("keep_yearly={}\n", self.retention.keep_yearly));
        out.push_str(&format!("weekly_dow={}\n", self.retention.weekly_dow));
        out.push_str(&format!(
            "failsafe_min_remaining={}\n",
            self.retention.failsafe_min_remaining
        ));
        out.push_str(&format!("failsafe_days={}\n", self.retention.failsafe_days));
        out.push_str(&format!(
            "max_deletions_per_run={}\n",
            self.retention.max_deletions_per_run
        ));
        out.push_str(&format!("consolidate_age={}\n", self.retention.consolidate_age));
        out.push_str(&format!("max_links={}\n", self.max_links));
        out.push_str(&format!("lock={}\n", self.lock_enabled));
        if let Some(host) = &self.remote_host {
            out.push_str(&format!("remote_host={host}\n"));
        }
        if self.min_free_local > 0 {
            out.push_str(&format!("min_free_local={}\n", self.min_free_local));
        }
        if self.min_free_remote > 0 {
            out.push_str(&format!("min_free_remote={}\n", self.min_free_remote));
        }
        if self.min_backup_size > 0 {
            out.push_str(&format!("min_backup_size={}\n", self.min_backup_size));
        }
        for n in &self.notify {
            out.push_str(&format!("notify={n}\n"));
        }
        if let Some(mode) = self.mode {
            out.push_str(&format!("mode={mode:o}\n"));
        }
        if let Some(uid) = self.uid {
            out.push_str(&format!("uid={uid}\n"));
        }
        if let Some(gid) = self.gid {
            out.push_str(&format!("gid={gid}\n"));
        }
        if let Some(include) = &self.include {
            out.push_str(&format!("include={include}\n"));
        }
        if let Some(exclude) = &self.exclude {
            out.push_str(&format!("exclude={exclude}\n"));
        }
        for tripwire in &self.tripwires {
            out.push_str(&format!(
                "tripwire={}:{}\n",
                tripwire.path.display(),
                tripwire.expected_md5
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_profile() {
        let text = "source=/data\ndestination=/backups/data\nkeep_daily=3\n";
        let profile = Profile::parse("home", text).unwrap();
        assert_eq!(profile.source, PathBuf::from("/data"));
        assert_eq!(profile.retention.keep_daily, 3);
        assert_eq!(profile.retention.keep_weekly, 4);
    }

    #[test]
    fn missing_source_is_validation_error() {
        let result = Profile::parse("home", "destination=/backups\n");
        assert!(matches!(result, Err(FaubError::Validation { .. })));
    }

    #[test]
    fn unknown_lines_are_preserved_not_rejected() {
        let text = "source=/data\ndestination=/d\nfuture_option=wat\n";
        assert!(Profile::parse("home", text).is_ok());
    }

    #[test]
    fn parses_faub_style_profile_with_tripwire_and_notify() {
        let text = "source=/data\ndestination=/backups/data\n\
            backup_style=faub\nweekly_dow=6\nfailsafe_days=14\n\
            notify=ops@example.com\nnotify=oncall@example.com\n\
            tripwire=/etc/passwd:d41d8cd98f00b204e9800998ecf8427e\n\
            include=\\.rs$\nexclude=^target$\n";
        let profile = Profile::parse("home", text).unwrap();
        assert_eq!(profile.backup_style, BackupStyle::Faub);
        assert_eq!(profile.retention.weekly_dow, 6);
        assert_eq!(profile.retention.failsafe_days, 14);
        assert_eq!(profile.notify, vec!["ops@example.com", "oncall@example.com"]);
        assert_eq!(profile.tripwires.len(), 1);
        assert_eq!(profile.tripwires[0].expected_md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(profile.include.as_deref(), Some("\\.rs$"));
        assert_eq!(profile.exclude.as_deref(), Some("^target$"));
    }

    #[test]
    fn failsafe_paranoid_tightens_retention_thresholds() {
        let text = "source=/data\ndestination=/d\n";
        let mut profile = Profile::parse("home", text).unwrap();
        profile.apply_failsafe_paranoid();
        assert!(profile.retention.failsafe_min_remaining >= 5);
        assert!(profile.retention.failsafe_days >= 30);
        assert!(profile.retention.consolidate_age >= 90);
    }

    #[test]
    fn round_trips_through_config_text() {
        let text = "source=/data\ndestination=/backups/data\nbackup_style=faub\n\
            tripwire=/etc/hosts:abc123\n";
        let profile = Profile::parse("home", text).unwrap();
        let rendered = profile.to_config_text();
        let reparsed = Profile::parse("home", &rendered).unwrap();
        assert_eq!(reparsed.source, profile.source);
        assert_eq!(reparsed.backup_style, profile.backup_style);
        assert_eq!(reparsed.tripwires, profile.tripwires);
    }
}
