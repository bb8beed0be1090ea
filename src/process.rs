use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::cli::ShutdownController;
use crate::error::{RtError, RtResult};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Resolve a program name or path to an executable, following `PATH` for bare
/// names. Symlinks are left in place; the OS follows them at spawn time.
pub fn resolve_program(program: &Path) -> RtResult<PathBuf> {
    which::which(program).map_err(|_| RtError::CommandMissing {
        command: program.display().to_string(),
    })
}

/// Captured result of a subprocess that ran to completion or was killed at
/// its deadline. Non-zero exits are data here, not errors.
#[derive(Debug)]
pub struct BoundedOutput {
    pub command: String,
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
    pub timed_out: bool,
    pub timeout: Duration,
}

impl BoundedOutput {
    /// Exit code, or `None` when the process was killed (timeout or signal).
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|status| status.code())
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|status| status.success())
    }

    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Turn a failed or timed-out run into the matching error.
    pub fn check(&self) -> RtResult<()> {
        if self.timed_out {
            return Err(RtError::from_command_timeout(
                self.command.clone(),
                saturating_duration_ms(self.timeout),
                self.stderr_lossy(),
            ));
        }
        match self.status {
            Some(status) if status.success() => Ok(()),
            status => Err(RtError::from_command_failure(
                self.command.clone(),
                status.and_then(|s| s.code()).unwrap_or(-1),
                self.stderr_lossy(),
            )),
        }
    }
}

/// Run `program` with a hard wall-clock limit.
///
/// The child runs in its own process group. Once `timeout` elapses the whole
/// group is killed and the child reaped; the output collected so far is
/// returned with `timed_out` set. A Ctrl+C received while waiting does the
/// same and surfaces as [`RtError::Cancelled`].
///
/// Descendants that outlive the child may keep its pipes open. After the
/// child exits, output is drained for a short grace period and whatever
/// arrived is kept.
pub fn run_bounded(
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Duration,
) -> RtResult<BoundedOutput> {
    let resolved = resolve_program(program)?;
    let rendered = render_command(program, args);

    let mut command = Command::new(&resolved);
    command.args(args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    tracing::debug!(command = %rendered, timeout_ms = saturating_duration_ms(timeout), "spawning");
    let mut child = command.spawn()?;
    let started_at = Instant::now();
    let (stdout, stderr) = drain_pipes(&mut child)?;

    loop {
        if let Some(status) = child.try_wait()? {
            let (stdout, stderr) = collect(&rendered, stdout, stderr);
            return Ok(BoundedOutput {
                command: rendered,
                status: Some(status),
                stdout,
                stderr,
                elapsed: started_at.elapsed(),
                timed_out: false,
                timeout,
            });
        }

        if ShutdownController::is_shutting_down() {
            kill_group(&mut child);
            let _ = child.wait();
            tracing::warn!(command = %rendered, "killed on shutdown request");
            return Err(RtError::Cancelled(format!(
                "interrupted while waiting for `{rendered}`"
            )));
        }

        if started_at.elapsed() >= timeout {
            kill_group(&mut child);
            let status = child.wait().ok();
            tracing::warn!(command = %rendered, "killed after timeout");
            let (stdout, stderr) = collect(&rendered, stdout, stderr);
            return Ok(BoundedOutput {
                command: rendered,
                status,
                stdout,
                stderr,
                elapsed: started_at.elapsed(),
                timed_out: true,
                timeout,
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill the child's process group, then the child itself.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let _ = Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    let _ = child.kill();
}

/// Output of one pipe, streamed in chunks by a reader thread.
struct PipeStream {
    rx: Receiver<Vec<u8>>,
    buf: Vec<u8>,
}

impl PipeStream {
    fn spawn(mut pipe: impl Read + Send + 'static) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self {
            rx,
            buf: Vec::new(),
        }
    }

    /// Read until EOF or `deadline`. Returns the bytes and whether EOF was
    /// reached.
    fn finish(mut self, deadline: Instant) -> (Vec<u8>, bool) {
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(left) {
                Ok(chunk) => self.buf.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Disconnected) => return (self.buf, true),
                Err(RecvTimeoutError::Timeout) => return (self.buf, false),
            }
        }
    }
}

fn drain_pipes(child: &mut Child) -> RtResult<(PipeStream, PipeStream)> {
    let stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("child stdout was not piped"))?;
    let stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("child stderr was not piped"))?;
    Ok((PipeStream::spawn(stdout_pipe), PipeStream::spawn(stderr_pipe)))
}

fn collect(rendered: &str, stdout: PipeStream, stderr: PipeStream) -> (Vec<u8>, Vec<u8>) {
    let deadline = Instant::now() + PIPE_DRAIN_GRACE;
    let (stdout, stdout_closed) = stdout.finish(deadline);
    let (stderr, stderr_closed) = stderr.finish(deadline);
    if !(stdout_closed && stderr_closed) {
        tracing::warn!(
            command = %rendered,
            "output pipes still held open by a leftover process; keeping partial output"
        );
    }
    (stdout, stderr)
}

#[must_use]
pub fn render_command(program: &Path, args: &[String]) -> String {
    if args.is_empty() {
        program.display().to_string()
    } else {
        format!("{} {}", program.display(), args.join(" "))
    }
}

pub(crate) fn saturating_duration_ms(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
