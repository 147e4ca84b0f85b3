//! Subprocess runner for the external toolchain.
//!
//! [`run`] owns the child for its whole life: it spawns it, drains stdout and
//! stderr into their sinks as data arrives, and only returns once the child
//! has exited and both streams are closed. Timeouts and cancellation kill the
//! child's process group and still go through the same drain-and-wait path.
//! After a normal exit the group is killed too, so background jobs the tool
//! left holding its pipes cannot stall the stage.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::StageError;

const TARGET: &str = "circuit_forge::process";

/// How long the stream readers may run on once the child has been reaped.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// How a subprocess terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code, absent when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal number (Unix only).
    pub signal: Option<i32>,
}

impl ProcessOutcome {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            exit_code: status.code(),
            signal,
        }
    }

    /// Exit code exactly zero. Signals and every other code are failures.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero outcome into [`StageError::ProcessFailed`].
    pub fn check(self, program: &str) -> Result<(), StageError> {
        if self.success() {
            Ok(())
        } else {
            Err(StageError::ProcessFailed {
                program: program.to_string(),
                outcome: self,
            })
        }
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.exit_code, self.signal) {
            (Some(code), _) => write!(f, "exited with code {code}"),
            (None, Some(signal)) => write!(f, "was killed by signal {signal}"),
            (None, None) => write!(f, "terminated without an exit code"),
        }
    }
}

/// Where a child's output stream goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    /// Forwarded line by line as `tracing` events.
    Diagnostics,
    /// Appended verbatim to a file, created if missing.
    AppendFile(PathBuf),
}

/// A fully described subprocess invocation.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    stdout: OutputSink,
    stderr: OutputSink,
    timeout: Option<Duration>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdout: OutputSink::Diagnostics,
            stderr: OutputSink::Diagnostics,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set a variable on top of the inherited environment.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = sink;
        self
    }

    pub fn stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = sink;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

/// Opened destination for one stream.
enum Sink {
    Tracing,
    File(File),
}

impl Sink {
    async fn open(sink: &OutputSink) -> Result<Self, StageError> {
        match sink {
            OutputSink::Diagnostics => Ok(Self::Tracing),
            OutputSink::AppendFile(path) => tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map(Self::File)
                .map_err(|e| StageError::fs("open log", path, e)),
        }
    }
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

/// Run `spec` to completion and report how it terminated.
///
/// A non-zero exit is still `Ok`; use [`ProcessOutcome::check`] to branch on
/// success. `Err` means the process could not be run or was stopped early.
pub async fn run(spec: ProcessSpec, cancel: &CancellationToken) -> Result<ProcessOutcome, StageError> {
    let stdout_sink = Sink::open(&spec.stdout).await?;
    let stderr_sink = Sink::open(&spec.stderr).await?;

    let mut std_command = std::process::Command::new(&spec.program);
    std_command
        .args(&spec.args)
        .envs(spec.envs.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        std_command.process_group(0);
    }
    let mut command = Command::from(std_command);
    command.kill_on_drop(true);

    tracing::debug!(target: TARGET, program = %spec.program, args = ?spec.args, "spawning");

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StageError::MissingTool {
                name: spec.program.clone(),
            }
        } else {
            StageError::Spawn {
                program: spec.program.clone(),
                source: e,
            }
        }
    })?;

    let started = Instant::now();
    let pid = child.id();
    let mut drains = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        drains.push(drain(stdout, stdout_sink, spec.program.clone(), "stdout"));
    }
    if let Some(stderr) = child.stderr.take() {
        drains.push(drain(stderr, stderr_sink, spec.program.clone(), "stderr"));
    }

    let waited = tokio::select! {
        status = child.wait() => Waited::Exited(status),
        after = deadline(spec.timeout) => Waited::TimedOut(after),
        _ = cancel.cancelled() => Waited::Cancelled,
    };

    match &waited {
        Waited::Exited(_) => kill_group(pid, &spec.program),
        _ => terminate(&mut child, pid, &spec.program).await,
    }
    finish_drains(drains, &spec.program).await;

    match waited {
        Waited::Exited(Ok(status)) => {
            let outcome = ProcessOutcome::from_status(status);
            tracing::debug!(
                target: TARGET,
                program = %spec.program,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "{outcome}"
            );
            Ok(outcome)
        }
        Waited::Exited(Err(e)) => Err(StageError::Wait {
            program: spec.program,
            source: e,
        }),
        Waited::TimedOut(after) => Err(StageError::TimedOut {
            program: spec.program,
            after,
        }),
        Waited::Cancelled => Err(StageError::Cancelled {
            program: spec.program,
        }),
    }
}

async fn deadline(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(after) => {
            tokio::time::sleep(after).await;
            after
        }
        None => std::future::pending().await,
    }
}

/// Kill the child and everything it spawned, then reap it.
async fn terminate(child: &mut Child, pid: Option<u32>, program: &str) {
    kill_group(pid, program);
    if let Err(e) = child.start_kill() {
        tracing::debug!(target: TARGET, program, "start_kill: {e}");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!(target: TARGET, program, "failed to reap killed process: {e}");
    }
}

/// SIGKILL the process group led by `pid`. An empty group is not an error.
#[cfg(unix)]
fn kill_group(pid: Option<u32>, program: &str) {
    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid signals the process group the
    // child leads (it was spawned with process_group(0)).
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::debug!(target: TARGET, program, "killpg failed: {err}");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>, _program: &str) {}

fn drain(
    stream: impl AsyncRead + Unpin + Send + 'static,
    sink: Sink,
    program: String,
    tag: &'static str,
) -> JoinHandle<std::io::Result<()>> {
    tokio::spawn(async move {
        match sink {
            Sink::Tracing => {
                let mut reader = BufReader::new(stream);
                let mut line = Vec::new();
                loop {
                    line.clear();
                    if reader.read_until(b'\n', &mut line).await? == 0 {
                        break;
                    }
                    let text = String::from_utf8_lossy(&line);
                    tracing::info!(target: TARGET, tool = %program, stream = tag, "{}", text.trim_end());
                }
            }
            Sink::File(mut file) => {
                let mut stream = stream;
                tokio::io::copy(&mut stream, &mut file).await?;
                file.flush().await?;
            }
        }
        Ok(())
    })
}

async fn finish_drains(drains: Vec<JoinHandle<std::io::Result<()>>>, program: &str) {
    let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
    for mut handle in drains {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!(target: TARGET, program, "output forwarding failed: {e}"),
            Ok(Err(e)) => tracing::warn!(target: TARGET, program, "output task panicked: {e}"),
            Err(_) => {
                handle.abort();
                tracing::warn!(target: TARGET, program, "output still open after exit; dropping the rest");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_zero_exit_is_success() {
        let outcome = run(sh("exit 0"), &CancellationToken::new()).await.unwrap();
        assert!(outcome.success());
        assert!(outcome.check("sh").is_ok());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let outcome = run(sh("exit 7"), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.exit_code, Some(7));
        assert!(!outcome.success());
        assert!(matches!(
            outcome.check("sh"),
            Err(StageError::ProcessFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_signal_is_failure() {
        let outcome = run(sh("kill -9 $$"), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.exit_code, None);
        assert_eq!(outcome.signal, Some(9));
        assert!(!outcome.success());
        assert_eq!(outcome.to_string(), "was killed by signal 9");
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let err = run(
            ProcessSpec::new("circuit-forge-no-such-tool"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StageError::MissingTool { name } if name == "circuit-forge-no-such-tool"));
    }

    #[tokio::test]
    async fn test_env_override_merges_with_ambient() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("env.log");
        let spec = sh("echo \"$FORGE_TEST_VAR:${PATH:+has-path}\"")
            .env("FORGE_TEST_VAR", "overridden")
            .stdout(OutputSink::AppendFile(log.clone()));
        run(spec, &CancellationToken::new()).await.unwrap();
        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents.trim(), "overridden:has-path");
    }

    #[tokio::test]
    async fn test_append_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("zkey.log");
        std::fs::write(&log, "previous\n").unwrap();
        let spec = sh("echo one; echo two").stdout(OutputSink::AppendFile(log.clone()));
        run(spec, &CancellationToken::new()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "previous\none\ntwo\n");
    }

    #[tokio::test]
    async fn test_unopenable_log_fails_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("missing-dir").join("zkey.log");
        let err = run(
            sh("exit 0").stdout(OutputSink::AppendFile(log)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StageError::Filesystem { op: "open log", .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let started = Instant::now();
        let err = run(
            sh("sleep 30").timeout(Some(Duration::from_millis(200))),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StageError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_background_job_does_not_outlive_exit() {
        let started = Instant::now();
        let outcome = run(
            sh("sleep 6 & exit 0").timeout(Some(Duration::from_secs(1))),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(outcome.success());
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "stage waited {:?} on a leftover job",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_cancel_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let script = format!("(sleep 1; touch {}) & wait", marker.display());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = run(sh(&script), &cancel).await.unwrap_err();
        assert!(matches!(err, StageError::Cancelled { .. }));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background job outlived cancellation");
    }
}
