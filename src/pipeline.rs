//! Process pipeline: spawns the chain of shell stages that carries the
//! framed protocol between a local client and a (possibly remote, via `ssh`)
//! server, capturing each stage's stderr independently.
//!
//! Grounded in the original's `pipe()`/`fork()`/`exec()` plumbing in
//! `faub.cc`'s `spawnPipeline()`, rendered with `std::process::Command`'s
//! piped stdio instead of hand-rolled `pipe(2)`/`dup2(2)` calls — the std
//! library already gives "a `File`-like handle wrapping a raw fd" via
//! `ChildStdin`/`ChildStdout`.

use std::io::Read;
use std::os::unix::io::{AsRawFd, RawFd};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use crate::error::{FaubError, Result};

/// One stage of the pipeline: a spawned child process plus a background
/// thread draining its stderr into a buffer for post-mortem reporting.
struct Stage {
    child: Child,
    label: String,
    stderr_buf: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
    stderr_thread: Option<JoinHandle<()>>,
}

impl Stage {
    fn spawn(label: &str, program: &str, args: &[&str]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(FaubError::io_bare)?;

        let mut stderr = child.stderr.take().expect("stderr piped");
        let buf = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let buf2 = buf.clone();
        let thread = std::thread::spawn(move || {
            let mut data = Vec::new();
            let _ = stderr.read_to_end(&mut data);
            *buf2.lock().unwrap() = data;
        });

        Ok(Stage {
            child,
            label: label.to_string(),
            stderr_buf: buf,
            stderr_thread: Some(thread),
        })
    }

    fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr_buf.lock().unwrap()).into_owned()
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        if let Some(t) = self.stderr_thread.take() {
            let _ = t.join();
        }
        match self.child.wait() {
            Ok(status) if !status.success() => {
                log::warn!(
                    "pipeline stage '{}' exited with {status}: {}",
                    self.label,
                    self.stderr_text()
                );
            }
            Err(e) => log::warn!("pipeline stage '{}' wait failed: {e}", self.label),
            _ => {}
        }
    }
}

/// A chain of one or more stages; the protocol engine reads/writes through
/// the first stage's stdin and the last stage's stdout.
///
/// A local-only pipeline is a single stage (the server binary invoked
/// directly); a remote pipeline prepends an `ssh host` stage per the
/// original's remote-backup support, with the local stage's stdout/stdin
/// piped into ssh's.
pub struct ProcessPipeline {
    stages: Vec<Stage>,
    write_fd: RawFd,
    read_fd: RawFd,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl ProcessPipeline {
    /// Spawn a single local stage: `program args...`.
    pub fn local(program: &str, args: &[&str]) -> Result<Self> {
        Self::chain(&[(program, args)])
    }

    /// Spawn a remote stage over ssh: `ssh host -- program args...`.
    pub fn remote(host: &str, program: &str, args: &[&str]) -> Result<Self> {
        let mut ssh_args: Vec<&str> = vec![host, "--", program];
        ssh_args.extend_from_slice(args);
        Self::chain(&[("ssh", &ssh_args)])
    }

    /// Spawn a chain of stages. Only the first stage's stdin and the last
    /// stage's stdout are exposed to the protocol engine; intermediate
    /// stages' stdio are left for a future multi-hop pipeline (the original
    /// only ever chains at most `ssh` + the remote binary, i.e. one stage
    /// carries the whole remote invocation, so this is not yet exercised but
    /// kept general per the original's `spawnPipeline` taking an argv list).
    fn chain(specs: &[(&str, &[&str])]) -> Result<Self> {
        if specs.is_empty() {
            return Err(FaubError::Protocol("empty pipeline".into()));
        }
        let mut stages = Vec::with_capacity(specs.len());
        for (program, args) in specs {
            stages.push(Stage::spawn(program, program, args)?);
        }

        let first = stages.first_mut().expect("non-empty");
        let stdin = first.child.stdin.take();
        let last = stages.last_mut().expect("non-empty");
        let stdout = last.child.stdout.take();

        let write_fd = stdin.as_ref().map(|s| s.as_raw_fd()).unwrap_or(-1);
        let read_fd = stdout.as_ref().map(|s| s.as_raw_fd()).unwrap_or(-1);

        Ok(ProcessPipeline {
            stages,
            write_fd,
            read_fd,
            stdin,
            stdout,
        })
    }

    /// Raw fd suitable for poll-based readiness checks on the read side.
    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Raw fd suitable for poll-based readiness checks on the write side.
    pub fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    /// Take ownership of the duplex pair backing this pipeline. After this
    /// call the pipeline only supervises child exit status and stderr.
    pub fn into_duplex(mut self) -> (ChildStdin, ChildStdout) {
        (
            self.stdin.take().expect("stdin available"),
            self.stdout.take().expect("stdout available"),
        )
    }

    /// Stage labels and captured stderr, for diagnostics after a failed run.
    pub fn stage_reports(&self) -> Vec<(String, String)> {
        self.stages
            .iter()
            .map(|s| (s.label.clone(), s.stderr_text()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn local_pipeline_roundtrips_through_cat() {
        let pipeline = ProcessPipeline::local("cat", &[]).unwrap();
        let (mut stdin, mut stdout) = pipeline.into_duplex();
        stdin.write_all(b"ping").unwrap();
        drop(stdin);
        let mut out = Vec::new();
        stdout.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"ping");
    }
}
