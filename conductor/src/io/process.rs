//! Child-process execution with a wall-clock limit and bounded output capture.
//!
//! Both suspension points of an agent (the oracle CLI and the test runner) go
//! through here. On Unix the child leads its own process group and the whole
//! group is killed on timeout, so grandchildren holding the output pipes die
//! with it. Draining the pipes after exit is bounded as well.

use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long readers may keep draining once the child has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded past the capture limit (stdout + stderr).
    pub truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Stdout followed by stderr, with notices for truncation and timeout.
    pub fn combined(&self) -> String {
        let mut buf = self.stdout_text();
        if !self.stderr.is_empty() {
            if !buf.is_empty() && !buf.ends_with('\n') {
                buf.push('\n');
            }
            buf.push_str(&self.stderr_text());
        }
        if self.truncated > 0 {
            buf.push_str(&format!("\n[output truncated {} bytes]", self.truncated));
        }
        if self.timed_out {
            buf.push_str("\n[process timed out]");
        }
        buf
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    dropped: usize,
}

type SharedCapture = Arc<Mutex<Captured>>;

/// Run `cmd` to completion or until `timeout` elapses, whichever is first.
///
/// Stdout and stderr are drained on reader threads started before any input
/// is written, and stdin is fed from its own thread, so a child that writes
/// before reading cannot deadlock against us. At most `output_limit_bytes`
/// of each stream is kept. A timed-out child is killed and reported with
/// `timed_out = true` rather than as an error.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.as_secs()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, "failed to spawn command");
        anyhow!(err).context(format!("spawn {:?}", cmd.get_program()))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let (done_tx, done_rx) = mpsc::channel();
    let stdout_capture = spawn_reader(stdout, output_limit_bytes, done_tx.clone());
    let stderr_capture = spawn_reader(stderr, output_limit_bytes, done_tx);

    if let Some(input) = stdin {
        let pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        spawn_writer(pipe, input.to_vec());
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            kill_process_tree(&mut child)?;
            child.wait().context("wait command after kill")?
        }
    };

    if !wait_drained(&done_rx, 2, DRAIN_GRACE) {
        // Something outside the child still holds a pipe open.
        kill_process_group(&child);
        if !wait_drained(&done_rx, 2, DRAIN_GRACE) {
            warn!("output pipes still open after exit, abandoning readers");
        }
    }

    let (stdout, stdout_dropped) = take_capture(&stdout_capture);
    let (stderr, stderr_dropped) = take_capture(&stderr_capture);
    let truncated = stdout_dropped + stderr_dropped;
    if truncated > 0 {
        warn!(truncated, "command output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        truncated,
        timed_out,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    limit: usize,
    done: Sender<()>,
) -> SharedCapture {
    let capture = SharedCapture::default();
    let shared = Arc::clone(&capture);
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(err = %err, "read output");
                    break;
                }
            };
            let mut captured = shared.lock().unwrap_or_else(PoisonError::into_inner);
            let keep = n.min(limit.saturating_sub(captured.bytes.len()));
            captured.bytes.extend_from_slice(&chunk[..keep]);
            captured.dropped += n - keep;
        }
        let _ = done.send(());
    });
    capture
}

/// Feed `input` to the child. A child that exits without draining stdin is
/// not an error here; its exit status tells the caller what happened.
fn spawn_writer(mut pipe: ChildStdin, input: Vec<u8>) {
    thread::spawn(move || {
        if let Err(err) = pipe.write_all(&input)
            && err.kind() != ErrorKind::BrokenPipe
        {
            warn!(err = %err, "write stdin");
        }
    });
}

/// Wait until `expected` readers report EOF or `grace` passes.
fn wait_drained(done: &Receiver<()>, expected: usize, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    let mut remaining = expected;
    while remaining > 0 {
        let Some(left) = deadline.checked_duration_since(Instant::now()) else {
            return false;
        };
        if done.recv_timeout(left).is_err() {
            return false;
        }
        remaining -= 1;
    }
    true
}

fn take_capture(capture: &SharedCapture) -> (Vec<u8>, usize) {
    let mut captured = capture.lock().unwrap_or_else(PoisonError::into_inner);
    let dropped = captured.dropped;
    (std::mem::take(&mut captured.bytes), dropped)
}

fn kill_process_tree(child: &mut Child) -> Result<()> {
    kill_process_group(child);
    match child.kill() {
        Ok(()) => Ok(()),
        // Already reaped by the group kill.
        Err(err) if err.kind() == ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(err).context("kill command"),
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!(err = %err, "kill process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}
