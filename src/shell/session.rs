//! Long-lived shell sessions.
//!
//! A [`Shell`] carries cwd and environment from one invocation to the next.
//! Invocations on one session are serialized by an async lock; separate
//! sessions run independently.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::blocklist::{BlockFunc, Blocklist};
use super::chain::ExecChain;
use super::engine::{self, EngineContext, Job, Outcome};
use super::error::{InterruptKind, ShellError, exit_code};
use super::io::{SharedBuffer, forward};
use crate::sandbox::resolve_in_process;

/// How long output already written may take to reach the sinks once the
/// command has finished.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Observer told about every finished invocation.
pub trait CommandLogger: Send + Sync {
    fn command_finished(&self, command: &str, result: &Result<(), ShellError>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl CommandLogger for NoopLogger {
    fn command_finished(&self, _command: &str, _result: &Result<(), ShellError>) {}
}

/// Logs each finished command at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl CommandLogger for TracingLogger {
    fn command_finished(&self, command: &str, result: &Result<(), ShellError>) {
        match result {
            Ok(()) => info!(command, status = 0, "command finished"),
            Err(e) => info!(command, status = exit_code(result), error = %e, "command finished"),
        }
    }
}

#[derive(Default)]
pub struct ShellOptions {
    /// Starting directory; the process cwd when unset.
    pub working_dir: Option<PathBuf>,
    /// Starting environment as `KEY=VALUE`; the process environment when unset.
    pub env: Option<Vec<String>>,
    pub logger: Option<Arc<dyn CommandLogger>>,
    pub block_funcs: Vec<BlockFunc>,
    /// Run sh, scripts and catalogue utilities in-process. Unset defers to
    /// `WARDEN_CORE_UTILS`, then the platform default.
    pub in_process: Option<bool>,
    /// Limit for each invocation.
    pub timeout: Option<Duration>,
}

/// Captured result of [`Shell::exec`].
#[derive(Debug)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub result: Result<(), ShellError>,
}

impl ExecOutput {
    pub fn exit_code(&self) -> i32 {
        exit_code(&self.result)
    }
}

struct SessionState {
    cwd: PathBuf,
    env: BTreeMap<String, String>,
}

pub struct Shell {
    state: Mutex<SessionState>,
    blocklist: Blocklist,
    chain: Arc<ExecChain>,
    logger: Arc<dyn CommandLogger>,
    in_process: bool,
    timeout: Option<Duration>,
}

fn parse_env<I, S>(entries: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .filter_map(|entry| {
            let (k, v) = entry.as_ref().split_once('=')?;
            (!k.is_empty()).then(|| (k.to_string(), v.to_string()))
        })
        .collect()
}

impl Shell {
    pub fn new(opts: ShellOptions) -> Self {
        let cwd = opts
            .working_dir
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));
        let cwd = std::path::absolute(&cwd).unwrap_or(cwd);
        let env = match opts.env {
            Some(entries) => parse_env(entries),
            None => std::env::vars().collect(),
        };
        let in_process = resolve_in_process(opts.in_process);
        let blocklist = Blocklist::new(opts.block_funcs);
        let chain = Arc::new(ExecChain::new(blocklist.clone(), in_process));
        debug!(
            cwd = %cwd.display(),
            in_process,
            interceptors = ?chain.names(),
            "shell session created"
        );

        Self {
            state: Mutex::new(SessionState { cwd, env }),
            blocklist,
            chain,
            logger: opts.logger.unwrap_or_else(|| Arc::new(NoopLogger)),
            in_process,
            timeout: opts.timeout,
        }
    }

    pub fn in_process(&self) -> bool {
        self.in_process
    }

    /// Run `command` and collect its output.
    pub async fn exec(&self, cancel: &CancellationToken, command: &str) -> ExecOutput {
        let out_buf = SharedBuffer::default();
        let err_buf = SharedBuffer::default();
        let result = self
            .run(cancel, command, out_buf.clone(), err_buf.clone())
            .await;
        ExecOutput {
            stdout: out_buf.to_string_lossy(),
            stderr: err_buf.to_string_lossy(),
            result,
        }
    }

    /// Run `command`, writing output to the given sinks as it is produced.
    pub async fn exec_stream<O, E>(
        &self,
        cancel: &CancellationToken,
        command: &str,
        stdout: O,
        stderr: E,
    ) -> Result<(), ShellError>
    where
        O: AsyncWrite + Send + 'static,
        E: AsyncWrite + Send + 'static,
    {
        self.run(cancel, command, stdout, stderr).await
    }

    async fn run<O, E>(
        &self,
        cancel: &CancellationToken,
        command: &str,
        stdout: O,
        stderr: E,
    ) -> Result<(), ShellError>
    where
        O: AsyncWrite + Send + 'static,
        E: AsyncWrite + Send + 'static,
    {
        let mut state = self.state.lock().await;
        let result = self
            .run_locked(&mut state, cancel, command, stdout, stderr)
            .await;
        self.logger.command_finished(command, &result);
        result
    }

    async fn run_locked<O, E>(
        &self,
        state: &mut SessionState,
        cancel: &CancellationToken,
        command: &str,
        stdout: O,
        stderr: E,
    ) -> Result<(), ShellError>
    where
        O: AsyncWrite + Send + 'static,
        E: AsyncWrite + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(ShellError::Interrupted(InterruptKind::Cancelled));
        }
        debug!(command, cwd = %state.cwd.display(), "executing");

        let ctx = EngineContext::new(self.chain.clone(), cancel.child_token());
        let (out_reader, out_file) = engine::output_pipe()?;
        let (err_reader, err_file) = engine::output_pipe()?;
        let forwarders = [forward(out_reader, stdout), forward(err_reader, stderr)];

        let done = ctx.spawn(Job {
            source: command.to_string(),
            cwd: state.cwd.clone(),
            env: state.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            params: Vec::new(),
            stdin: engine::null_file()?,
            stdout: out_file,
            stderr: err_file,
        })?;
        let timeout = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        // An interrupted engine thread is left to wind down on its own and
        // the session keeps the state it had before the command.
        let result: Result<Outcome, ShellError> = tokio::select! {
            result = done => {
                result.unwrap_or_else(|_| Err(ShellError::Engine("engine exited without a result".into())))
            }
            () = cancel.cancelled() => {
                ctx.cancel.cancel();
                debug!(command, "command cancelled");
                return Err(ShellError::Interrupted(InterruptKind::Cancelled));
            }
            () = timeout => {
                ctx.cancel.cancel();
                debug!(command, limit = ?self.timeout, "command timed out");
                return Err(ShellError::Interrupted(InterruptKind::TimedOut));
            }
        };

        match result {
            Ok(outcome) => {
                drain(command, forwarders).await;
                // State persists even when the command failed.
                state.cwd = outcome.cwd;
                state.env = outcome.env.into_iter().collect();
                if let Some(fault) = ctx.take_fault() {
                    return Err(fault);
                }
                match outcome.status {
                    0 => Ok(()),
                    code => Err(ShellError::ExitStatus(code)),
                }
            }
            Err(err) => {
                let err = ctx.take_fault().unwrap_or(err);
                if !matches!(err, ShellError::Interrupted(_)) {
                    drain(command, forwarders).await;
                }
                Err(err)
            }
        }
    }

    pub async fn working_dir(&self) -> PathBuf {
        self.state.lock().await.cwd.clone()
    }

    /// Change the session directory. It must be an existing directory.
    pub async fn set_working_dir(&self, dir: impl AsRef<Path>) -> Result<(), ShellError> {
        let mut state = self.state.lock().await;
        let dir = state.cwd.join(dir.as_ref());
        let meta = tokio::fs::metadata(&dir).await?;
        if !meta.is_dir() {
            return Err(ShellError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("{} is not a directory", dir.display()),
            )));
        }
        state.cwd = dir;
        Ok(())
    }

    /// Session environment as `KEY=VALUE`, sorted by key.
    pub async fn env(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }

    /// Set one variable, replacing any previous value.
    pub async fn set_env(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.lock().await.env.insert(key.into(), value.into());
    }

    /// Replace the block predicates. Takes effect from the next invocation.
    pub fn set_block_funcs(&self, funcs: Vec<BlockFunc>) {
        self.blocklist.replace(funcs);
    }
}

/// Wait for the forwarders to copy what the command wrote. A background
/// job still holding the pipes only delays this by [`DRAIN_GRACE`].
async fn drain(command: &str, forwarders: [JoinHandle<std::io::Result<()>>; 2]) {
    let all = futures::future::join_all(forwarders);
    match tokio::time::timeout(DRAIN_GRACE, all).await {
        Ok(results) => {
            for result in results {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(command, error = %e, "output sink failed"),
                    Err(e) => warn!(command, error = %e, "output forwarder panicked"),
                }
            }
        }
        Err(_) => debug!(command, "output still open after the command finished"),
    }
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("chain", &self.chain)
            .field("in_process", &self.in_process)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use mockall::mock;

    use super::*;
    use crate::shell::blocklist::{arguments_blocker, commands_blocker};
    use crate::shell::io::SharedBuffer;

    fn shell(dir: &Path, in_process: bool) -> Shell {
        Shell::new(ShellOptions {
            working_dir: Some(dir.to_path_buf()),
            env: Some(vec![
                "PATH=/usr/bin:/bin".into(),
                format!("HOME={}", dir.display()),
            ]),
            in_process: Some(in_process),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_state_persists_between_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let sh = shell(dir.path(), true);
        let cancel = CancellationToken::new();

        let out = sh.exec(&cancel, "cd sub && export X=1").await;
        assert!(out.result.is_ok(), "{:?}", out);
        assert_eq!(sh.working_dir().await, sub);

        let out = sh.exec(&cancel, "echo $X; pwd").await;
        assert_eq!(out.stdout, format!("1\n{}\n", sub.display()));
        assert!(sh.env().await.contains(&"X=1".to_string()));
    }

    #[tokio::test]
    async fn test_state_persists_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell(dir.path(), true);
        let cancel = CancellationToken::new();

        let out = sh.exec(&cancel, "Y=2; false").await;
        assert!(matches!(out.result, Err(ShellError::ExitStatus(1))));
        assert_eq!(out.exit_code(), 1);
        assert!(sh.env().await.contains(&"Y=2".to_string()));
    }

    #[tokio::test]
    async fn test_set_env_round_trip_and_replace() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell(dir.path(), true);
        sh.set_env("GREETING", "hi").await;
        sh.set_env("GREETING", "hello").await;

        let env = sh.env().await;
        assert_eq!(env.iter().filter(|e| e.starts_with("GREETING=")).count(), 1);
        assert!(env.contains(&"GREETING=hello".to_string()));

        let out = sh.exec(&CancellationToken::new(), "echo $GREETING").await;
        assert_eq!(out.stdout, "hello\n");
    }

    #[tokio::test]
    async fn test_set_working_dir_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file"), "").unwrap();
        let sh = shell(dir.path(), true);

        assert!(sh.set_working_dir(dir.path().join("missing")).await.is_err());
        assert!(sh.set_working_dir(dir.path().join("file")).await.is_err());
        assert_eq!(sh.working_dir().await, dir.path());

        std::fs::create_dir(dir.path().join("d")).unwrap();
        sh.set_working_dir("d").await.unwrap();
        assert_eq!(sh.working_dir().await, dir.path().join("d"));
    }

    #[tokio::test]
    async fn test_pre_cancelled_token() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell(dir.path(), true);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let out = sh.exec(&cancel, "touch never").await;
        assert!(matches!(
            out.result,
            Err(ShellError::Interrupted(InterruptKind::Cancelled))
        ));
        assert!(!dir.path().join("never").exists());
    }

    #[tokio::test]
    async fn test_timeout_interrupts() {
        let dir = tempfile::tempdir().unwrap();
        let sh = Shell::new(ShellOptions {
            working_dir: Some(dir.path().to_path_buf()),
            env: Some(vec!["PATH=/usr/bin:/bin".into()]),
            in_process: Some(false),
            timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let out = sh.exec(&CancellationToken::new(), "sleep 5").await;
        assert!(matches!(
            out.result,
            Err(ShellError::Interrupted(InterruptKind::TimedOut))
        ));
    }

    #[tokio::test]
    async fn test_blocked_commands() {
        let dir = tempfile::tempdir().unwrap();
        let sh = Shell::new(ShellOptions {
            working_dir: Some(dir.path().to_path_buf()),
            env: Some(vec![]),
            block_funcs: vec![commands_blocker(["curl", "wget"])],
            in_process: Some(true),
            ..Default::default()
        });
        let cancel = CancellationToken::new();

        let out = sh.exec(&cancel, "curl https://example.com").await;
        assert!(matches!(out.result, Err(ShellError::Blocked(_))));

        sh.set_block_funcs(vec![arguments_blocker(
            "git",
            ["push"],
            ["--force"],
        )]);
        let out = sh.exec(&cancel, "git push --force origin main").await;
        assert!(matches!(out.result, Err(ShellError::Blocked(_))));
    }

    #[tokio::test]
    async fn test_parse_error_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell(dir.path(), true);
        let out = sh.exec(&CancellationToken::new(), "echo 'unterminated").await;
        assert!(matches!(out.result, Err(ShellError::Parse(_))));
    }

    #[tokio::test]
    async fn test_exec_stream_writes_to_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell(dir.path(), true);
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();

        let result = sh
            .exec_stream(
                &CancellationToken::new(),
                "echo out; echo err >&2",
                out.clone(),
                err.clone(),
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(out.to_string_lossy(), "out\n");
        assert_eq!(err.to_string_lossy(), "err\n");
    }

    #[tokio::test]
    async fn test_in_process_utilities_stay_in_process() {
        let dir = tempfile::tempdir().unwrap();
        let sh = Shell::new(ShellOptions {
            working_dir: Some(dir.path().to_path_buf()),
            // No PATH: anything spawned natively would not be found.
            env: Some(vec![]),
            in_process: Some(true),
            ..Default::default()
        });
        let out = sh
            .exec(
                &CancellationToken::new(),
                "mkdir -p a/b && touch a/b/f && ls a/b | wc -l",
            )
            .await;
        assert!(out.result.is_ok(), "{:?}", out);
        assert_eq!(out.stdout.trim(), "1");
        assert!(sh.in_process());
    }

    mock! {
        Logger {}
        impl CommandLogger for Logger {
            fn command_finished(&self, command: &str, result: &Result<(), ShellError>);
        }
    }

    #[tokio::test]
    async fn test_logger_sees_every_command() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let mut logger = MockLogger::new();
        let sink = seen.clone();
        logger
            .expect_command_finished()
            .times(2)
            .returning(move |cmd, result| {
                sink.lock().unwrap().push((cmd.to_string(), exit_code(result)));
            });

        let sh = Shell::new(ShellOptions {
            working_dir: Some(dir.path().to_path_buf()),
            env: Some(vec![]),
            logger: Some(Arc::new(logger)),
            in_process: Some(true),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        sh.exec(&cancel, "true").await;
        sh.exec(&cancel, "exit 3").await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("true".to_string(), 0), ("exit 3".to_string(), 3)]
        );
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let a = shell(dir.path(), true);
        let b = shell(dir.path(), true);
        let cancel = CancellationToken::new();
        a.exec(&cancel, "export ONLY_A=1").await;
        assert!(!b.env().await.iter().any(|e| e.starts_with("ONLY_A=")));
    }

    #[tokio::test]
    async fn test_runaway_recursion_fails_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell(dir.path(), true);
        let cancel = CancellationToken::new();

        let out = sh.exec(&cancel, "f() { f; }; f").await;
        assert!(out.result.is_err(), "{:?}", out);

        let out = sh.exec(&cancel, "echo still here").await;
        assert_eq!(out.stdout, "still here\n");
    }

    #[tokio::test]
    async fn test_nested_shells_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("r.sh"), "#!/bin/sh\nsh r.sh\n").unwrap();
        let sh = shell(dir.path(), true);

        let out = sh.exec(&CancellationToken::new(), "sh r.sh").await;
        assert!(
            matches!(&out.result, Err(ShellError::Unsupported(msg)) if msg.contains("nested")),
            "{:?}",
            out
        );
    }

    #[tokio::test]
    async fn test_blocked_inside_nested_shell() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("get.sh"), "#!/bin/sh\ncurl -s x\n").unwrap();
        let sh = Shell::new(ShellOptions {
            working_dir: Some(dir.path().to_path_buf()),
            env: Some(vec![]),
            block_funcs: vec![commands_blocker(["curl"])],
            in_process: Some(true),
            ..Default::default()
        });
        let cancel = CancellationToken::new();

        for command in ["sh get.sh", "./get.sh", "bash -c 'echo hi; curl x'"] {
            let out = sh.exec(&cancel, command).await;
            assert!(
                matches!(out.result, Err(ShellError::Blocked(_))),
                "{command}: {:?}",
                out
            );
            assert_eq!(out.stdout, "", "{command}");
        }
    }

    #[tokio::test]
    async fn test_pipeline_stops_when_reader_is_done() {
        let dir = tempfile::tempdir().unwrap();
        for in_process in [true, false] {
            let sh = shell(dir.path(), in_process);
            let out = tokio::time::timeout(
                Duration::from_secs(10),
                sh.exec(&CancellationToken::new(), "yes | head -n 1"),
            )
            .await
            .expect("pipeline did not finish");
            assert_eq!(out.stdout, "y\n", "in_process={in_process}");
            assert!(out.result.is_ok(), "{:?}", out);
        }
    }

    #[tokio::test]
    async fn test_exec_stream_delivers_output_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let sh = Arc::new(shell(dir.path(), true));
        let out = SharedBuffer::default();

        let task = {
            let sh = sh.clone();
            let out = out.clone();
            tokio::spawn(async move {
                sh.exec_stream(
                    &CancellationToken::new(),
                    "echo first; sleep 2; echo second",
                    out,
                    SharedBuffer::default(),
                )
                .await
            })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while out.contents().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(out.to_string_lossy(), "first\n");
        assert!(!task.is_finished());

        task.await.unwrap().unwrap();
        assert_eq!(out.to_string_lossy(), "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_timeout_interrupts_busy_loop() {
        let dir = tempfile::tempdir().unwrap();
        let sh = Shell::new(ShellOptions {
            working_dir: Some(dir.path().to_path_buf()),
            env: Some(vec![]),
            in_process: Some(true),
            timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        sh.set_env("KEEP", "before").await;

        let started = std::time::Instant::now();
        let out = sh
            .exec(
                &CancellationToken::new(),
                "KEEP=after; cd /; while true; do :; done",
            )
            .await;
        assert!(matches!(
            out.result,
            Err(ShellError::Interrupted(InterruptKind::TimedOut))
        ));
        assert!(started.elapsed() < Duration::from_secs(5));

        // An interrupted command leaves the session as it was.
        assert_eq!(sh.working_dir().await, dir.path());
        assert!(sh.env().await.contains(&"KEEP=before".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_busy_loop() {
        let dir = tempfile::tempdir().unwrap();
        let sh = shell(dir.path(), true);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let out = sh.exec(&cancel, "while :; do :; done").await;
        assert!(matches!(
            out.result,
            Err(ShellError::Interrupted(InterruptKind::Cancelled))
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
