// src/exec/process_runner.rs

//! Supervised grading process.
//!
//! The entry point runs as a direct child in its own process group with the
//! snapshot root as working directory. CPU and memory limits are installed
//! as rlimits before `exec`, so the kernel enforces them. The deadline is
//! enforced here: when it passes, the whole process group receives SIGKILL
//! and the child is reaped before returning.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::CancelSignal;
use crate::fetch::Snapshot;
use crate::outcome::CapturedOutput;
use crate::types::{BoxFuture, GradingTask, ResourceLimits};

use super::backend::{ExitState, GradingRunner, InfrastructureError, RunResult};
use super::output::{finish_optional, StreamCapture};

/// Production runner spawning real OS processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Remaining time granted to a running process once the run is cancelled.
    cancel_grace: Duration,
    /// How long to wait for output pipes to close after the child is gone.
    drain_timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            cancel_grace: Duration::from_secs(2),
            drain_timeout: Duration::from_millis(500),
        }
    }
}

impl ProcessRunner {
    pub fn new(cancel_grace: Duration) -> Self {
        Self {
            cancel_grace,
            ..Self::default()
        }
    }

    async fn run_inner(
        &self,
        task: &GradingTask,
        snapshot: &Snapshot,
        cancel: CancelSignal,
    ) -> Result<RunResult, InfrastructureError> {
        let student = snapshot.reference.student_id.as_str();
        let revision = snapshot.revision.as_deref().unwrap_or("");
        let args = task.render_args(snapshot.root(), student, revision);

        let mut cmd = Command::new(&task.entry_point);
        cmd.args(&args)
            .current_dir(snapshot.root())
            .env("PROGRADE_SNAPSHOT", snapshot.root())
            .env("PROGRADE_STUDENT_ID", student)
            .env("PROGRADE_REVISION", revision)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        isolate(&mut cmd, &task.limits);

        info!(
            student,
            entry_point = %task.entry_point,
            timeout_ms = task.timeout().as_millis() as u64,
            "starting grading process"
        );

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| InfrastructureError::Spawn {
            program: task.entry_point.clone(),
            detail: e.to_string(),
        })?;
        let pid = child.id();

        let limit = task.limits.output_bytes;
        let stdout = child
            .stdout
            .take()
            .map(|s| StreamCapture::spawn(s, limit, "stdout"));
        let stderr = child
            .stderr
            .take()
            .map(|s| StreamCapture::spawn(s, limit, "stderr"));

        let mut deadline = started + task.timeout();
        let mut cancelled = false;

        let waited = loop {
            tokio::select! {
                status = child.wait() => {
                    break Some(status.map_err(|e| InfrastructureError::Supervise(e.to_string()))?);
                }
                _ = tokio::time::sleep_until(deadline) => break None,
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    let forced = Instant::now() + self.cancel_grace;
                    if forced < deadline {
                        deadline = forced;
                    }
                    info!(student, grace_ms = self.cancel_grace.as_millis() as u64, "run cancelled; shortening deadline");
                }
            }
        };

        // Whatever the child left behind in its group goes too.
        kill_tree(pid, &mut child);
        let status = match waited {
            Some(status) => Some(status),
            None => {
                let reaped = child
                    .wait()
                    .await
                    .map_err(|e| InfrastructureError::Supervise(e.to_string()))?;
                debug!(student, ?reaped, "timed-out process reaped");
                None
            }
        };
        let elapsed = started.elapsed();

        let (stdout, stdout_truncated) = finish_optional(stdout, self.drain_timeout).await;
        let (stderr, stderr_truncated) = finish_optional(stderr, self.drain_timeout).await;
        let output = CapturedOutput {
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
        };

        match status {
            Some(status) => {
                let state = exit_state(&status);
                info!(student, ?state, elapsed_ms = elapsed.as_millis() as u64, "grading process exited");
                Ok(RunResult::Completed {
                    status: state,
                    output,
                    elapsed,
                })
            }
            None => {
                warn!(student, elapsed_ms = elapsed.as_millis() as u64, cancelled, "grading process timed out; killed");
                Ok(RunResult::TimedOut {
                    output,
                    elapsed,
                    cancelled,
                })
            }
        }
    }
}

impl GradingRunner for ProcessRunner {
    fn run<'a>(
        &'a self,
        task: &'a GradingTask,
        snapshot: &'a Snapshot,
        cancel: CancelSignal,
    ) -> BoxFuture<'a, Result<RunResult, InfrastructureError>> {
        Box::pin(self.run_inner(task, snapshot, cancel))
    }
}

#[cfg(unix)]
fn isolate(cmd: &mut Command, limits: &ResourceLimits) {
    use nix::sys::resource::{setrlimit, Resource};

    cmd.process_group(0);

    let cpu = limits.cpu_seconds;
    let memory = limits.memory_bytes;
    if cpu.is_none() && memory.is_none() {
        return;
    }

    // SAFETY: the closure only issues setrlimit(2), which is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            if let Some(secs) = cpu {
                // Soft limit delivers SIGXCPU, the hard limit one second later SIGKILL.
                setrlimit(Resource::RLIMIT_CPU, secs, secs.saturating_add(1))
                    .map_err(std::io::Error::from)?;
            }
            if let Some(bytes) = memory {
                setrlimit(Resource::RLIMIT_AS, bytes, bytes).map_err(std::io::Error::from)?;
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn isolate(_cmd: &mut Command, limits: &ResourceLimits) {
    if limits.cpu_seconds.is_some() || limits.memory_bytes.is_some() {
        warn!("cpu/memory limits are only enforced on unix");
    }
}

/// SIGKILL the child's process group, falling back to the child alone.
fn kill_tree(pid: Option<u32>, child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = pid {
            match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(pid, error = %e, "failed to kill process group"),
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.start_kill() {
        // Already reaped children report InvalidInput; nothing left to kill.
        debug!(error = %e, "child kill skipped");
    }
}

fn exit_state(status: &std::process::ExitStatus) -> ExitState {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ExitState::Signal(sig);
        }
    }
    ExitState::Code(status.code().unwrap_or(-1))
}
