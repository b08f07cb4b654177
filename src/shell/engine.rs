//! The interpreter: a brush shell per invocation, on its own thread.
//!
//! Every invocation gets a fresh brush shell seeded with the session's cwd
//! and environment, and the session reads both back when it finishes. The
//! shell runs on a dedicated thread with a large stack and its own
//! current-thread runtime, so deep recursion reaches brush's function-depth
//! limit before the stack runs out, and a builtin loop that never yields
//! cannot hold up the caller's timeout or cancellation.
//!
//! All calls into brush state live in this module.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use brush_core::openfiles::{self, OpenFile};
use brush_core::{ExecutionParameters, Shell, ShellExtensions, SourceInfo};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::builtins::register_builtins;
use super::chain::{ExecChain, HandlerContext, delegate};
use super::error::{InterruptKind, ShellError};
use super::scan::{is_name, quote};

/// Nested in-process `sh` levels allowed below the top-level command.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Shell function calls allowed on one engine's call stack.
pub const MAX_FUNCTION_DEPTH: usize = 64;

const STACK_SIZE: usize = 64 * 1024 * 1024;

/// Variables the engine maintains itself. They are neither seeded from nor
/// carried back into the session.
const ENGINE_MANAGED: &[&str] = &[
    "_",
    "BASHOPTS",
    "BASHPID",
    "BASH_COMMAND",
    "BASH_LINENO",
    "BASH_SOURCE",
    "BASH_VERSINFO",
    "EPOCHREALTIME",
    "EPOCHSECONDS",
    "EUID",
    "FUNCNAME",
    "LINENO",
    "PIPESTATUS",
    "PPID",
    "RANDOM",
    "SECONDS",
    "SHELLOPTS",
    "SHLVL",
    "SRANDOM",
    "UID",
];

/// State shared by every engine thread of one invocation.
#[derive(Clone)]
pub(crate) struct EngineContext {
    chain: Arc<ExecChain>,
    pub cancel: CancellationToken,
    depth: usize,
    fault: Arc<Mutex<Option<ShellError>>>,
}

thread_local! {
    static CURRENT: RefCell<Option<EngineContext>> = const { RefCell::new(None) };
}

/// One run of the engine.
pub(crate) struct Job {
    /// Source as the caller wrote it; vetted on the engine thread.
    pub source: String,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    /// `$0` followed by the positional parameters; empty for a plain command.
    pub params: Vec<String>,
    pub stdin: OpenFile,
    pub stdout: OpenFile,
    pub stderr: OpenFile,
}

#[derive(Debug)]
pub(crate) struct Outcome {
    pub status: i32,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl EngineContext {
    pub fn new(chain: Arc<ExecChain>, cancel: CancellationToken) -> Self {
        Self {
            chain,
            cancel,
            depth: 0,
            fault: Arc::new(Mutex::new(None)),
        }
    }

    /// Stop the whole invocation with `err`. The first fault wins.
    pub fn abort(&self, err: ShellError) {
        let mut fault = self.fault.lock().unwrap_or_else(|e| e.into_inner());
        if fault.is_none() {
            debug!(error = %err, depth = self.depth, "invocation aborted");
            *fault = Some(err);
        }
        self.cancel.cancel();
    }

    pub fn take_fault(&self) -> Option<ShellError> {
        self.fault.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Start `job` on a new engine thread.
    pub fn spawn(&self, job: Job) -> Result<oneshot::Receiver<Result<Outcome, ShellError>>, ShellError> {
        let (tx, rx) = oneshot::channel();
        let ctx = self.clone();
        std::thread::Builder::new()
            .name(format!("warden-engine-{}", self.depth))
            .stack_size(STACK_SIZE)
            .spawn(move || {
                let result = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => {
                        CURRENT.with(|current| *current.borrow_mut() = Some(ctx.clone()));
                        rt.block_on(run(&ctx, job))
                    }
                    Err(e) => Err(ShellError::Io(e)),
                };
                // The receiver is gone when the caller stopped waiting.
                let _ = tx.send(result);
            })
            .map_err(|source| ShellError::Spawn {
                command: "engine thread".into(),
                source,
            })?;
        Ok(rx)
    }
}

fn engine_error(err: impl std::fmt::Display) -> ShellError {
    ShellError::Engine(err.to_string())
}

async fn run(ctx: &EngineContext, job: Job) -> Result<Outcome, ShellError> {
    let Job {
        source,
        cwd,
        env,
        params,
        stdin,
        stdout,
        stderr,
    } = job;

    let mut builtins = brush_builtins::default_builtins(brush_builtins::BuiltinSet::BashMode);
    if ctx.chain.in_process() {
        register_builtins(&mut builtins);
    }
    let builtin_names: HashSet<String> = builtins.keys().cloned().collect();

    let handler = HandlerContext {
        cwd: &cwd,
        env: &env,
    };
    let source = ctx
        .chain
        .prepare(&source, &handler, &|name| builtin_names.contains(name))?;

    let mut shell = Shell::builder()
        .builtins(builtins)
        .fds(HashMap::from([(0.into(), stdin), (1.into(), stdout), (2.into(), stderr)]))
        .do_not_inherit_env(true)
        .max_function_call_depth(MAX_FUNCTION_DEPTH)
        .shell_name(params.first().cloned().unwrap_or_else(|| "sh".to_string()))
        .build()
        .await
        .map_err(engine_error)?;

    let exec_params = ExecutionParameters::default();
    shell
        .run_string(&preamble(&cwd, &env, &params), &SourceInfo::default(), &exec_params)
        .await
        .map_err(engine_error)?;
    let seeded = variables(&shell);
    debug!(depth = ctx.depth, cwd = %cwd.display(), "engine started");

    let source_info = SourceInfo::default();
    let result = tokio::select! {
        result = shell.run_string(&source, &source_info, &exec_params) => {
            result.map_err(engine_error)?
        }
        () = ctx.cancel.cancelled() => {
            return Err(ShellError::Interrupted(InterruptKind::Cancelled));
        }
    };

    let status = i32::from(u8::from(result.exit_code));
    Ok(Outcome {
        status,
        cwd: working_dir(&shell),
        env: carried_env(&shell, &seeded),
    })
}

/// Script that seeds a fresh shell with session state.
fn preamble(cwd: &Path, env: &[(String, String)], params: &[String]) -> String {
    let mut script = String::new();
    for (name, value) in env {
        if is_name(name) && !ENGINE_MANAGED.contains(&name.as_str()) {
            script.push_str(&format!("export {}={}\n", name, quote(value)));
        }
    }
    script.push_str(&format!("cd -- {}\n", quote(&cwd.to_string_lossy())));
    if params.len() > 1 {
        let quoted: Vec<String> = params[1..].iter().map(|p| quote(p)).collect();
        script.push_str(&format!("set -- {}\n", quoted.join(" ")));
    }
    script
}

pub(crate) fn working_dir<SE: ShellExtensions>(shell: &Shell<SE>) -> PathBuf {
    shell.working_dir().to_path_buf()
}

/// Exported variables, as a spawned program would receive them.
pub(crate) fn exported_env<SE: ShellExtensions>(shell: &Shell<SE>) -> Vec<(String, String)> {
    shell
        .env()
        .iter()
        .filter(|(_, var)| var.is_exported())
        .map(|(name, var)| (name.clone(), var.value().to_cow_str(shell).into_owned()))
        .collect()
}

/// Every variable with its value and export flag.
fn variables<SE: ShellExtensions>(shell: &Shell<SE>) -> HashMap<String, (String, bool)> {
    shell
        .env()
        .iter()
        .map(|(name, var)| {
            let value = var.value().to_cow_str(shell).into_owned();
            (name.clone(), (value, var.is_exported()))
        })
        .collect()
}

/// Variables the session keeps: everything exported, plus anything the
/// command assigned.
fn carried_env<SE: ShellExtensions>(
    shell: &Shell<SE>,
    seeded: &HashMap<String, (String, bool)>,
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = variables(shell)
        .into_iter()
        .filter(|(name, (value, exported))| {
            is_name(name)
                && !ENGINE_MANAGED.contains(&name.as_str())
                && (*exported || seeded.get(name).is_none_or(|(before, _)| before != value))
        })
        .map(|(name, (value, _))| (name, value))
        .collect();
    env.sort();
    env
}

/// Pipe whose write end the engine uses as an output descriptor.
pub(crate) fn output_pipe() -> io::Result<(io::PipeReader, OpenFile)> {
    let (reader, writer) = io::pipe()?;
    let file = std::fs::File::from(OwnedFd::from(writer));
    Ok((reader, OpenFile::from(file)))
}

pub(crate) fn null_file() -> Result<OpenFile, ShellError> {
    openfiles::null().map_err(engine_error)
}

fn current() -> Result<EngineContext, ShellError> {
    CURRENT
        .with(|current| current.borrow().clone())
        .ok_or_else(|| ShellError::Unsupported("in-process shell outside an engine".into()))
}

/// Stop the invocation running on this thread.
pub(crate) fn abort(err: ShellError) {
    if let Ok(ctx) = current() {
        ctx.abort(err);
    }
}

/// Run `sh`/`bash` arguments on a nested engine and wait for its status.
/// Changes the nested shell makes to its cwd and variables stay with it.
pub(crate) fn run_nested(
    argv: &[String],
    cwd: PathBuf,
    env: Vec<(String, String)>,
    stdin: OpenFile,
    stdout: OpenFile,
    stderr: OpenFile,
) -> Result<i32, ShellError> {
    let parent = current()?;
    if parent.depth >= MAX_NESTING_DEPTH {
        return Err(ShellError::Unsupported(format!(
            "in-process shells nested deeper than {}",
            MAX_NESTING_DEPTH
        )));
    }
    let delegation = delegate(argv, &HandlerContext { cwd: &cwd, env: &env })?;

    let nested = EngineContext {
        depth: parent.depth + 1,
        ..parent
    };
    let done = nested.spawn(Job {
        source: delegation.source,
        cwd,
        env,
        params: delegation.params,
        stdin,
        stdout,
        stderr,
    })?;
    // Blocks this engine thread only; its own runtime has nothing else to do.
    let outcome = futures::executor::block_on(done)
        .map_err(|_| ShellError::Engine("nested engine exited without a result".into()))??;
    Ok(outcome.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::blocklist::Blocklist;

    #[test]
    fn test_preamble_seeds_state() {
        let env = vec![
            ("GREETING".to_string(), "hello world".to_string()),
            ("SHLVL".to_string(), "3".to_string()),
            ("BASH_FUNC_f%%".to_string(), "() { :; }".to_string()),
        ];
        let script = preamble(
            Path::new("/tmp/a dir"),
            &env,
            &["run.sh".to_string(), "x".to_string(), "it's".to_string()],
        );
        assert_eq!(
            script,
            "export GREETING='hello world'\ncd -- '/tmp/a dir'\nset -- x 'it'\\''s'\n"
        );
        assert_eq!(preamble(Path::new("/"), &[], &[]), "cd -- /\n");
    }

    #[test]
    fn test_helpers_need_an_engine_thread() {
        let err = run_nested(
            &["sh".to_string(), "-c".to_string(), "true".to_string()],
            PathBuf::from("/"),
            Vec::new(),
            null_file().unwrap(),
            null_file().unwrap(),
            null_file().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, ShellError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_engine_reports_status_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = EngineContext::new(
            Arc::new(ExecChain::new(Blocklist::default(), true)),
            CancellationToken::new(),
        );
        let (reader, stdout) = output_pipe().unwrap();
        let done = ctx
            .spawn(Job {
                source: "mkdir sub && cd sub && X=1 && export Y=2; echo hi; exit 3".into(),
                cwd: dir.path().to_path_buf(),
                env: vec![("KEEP".into(), "k".into())],
                params: Vec::new(),
                stdin: null_file().unwrap(),
                stdout,
                stderr: null_file().unwrap(),
            })
            .unwrap();
        let outcome = done.await.unwrap().unwrap();
        let out = tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut out = String::new();
            std::io::Read::read_to_string(&mut reader, &mut out).map(|_| out)
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(outcome.status, 3);
        assert_eq!(out, "hi\n");
        assert_eq!(outcome.cwd, dir.path().join("sub"));
        for pair in [("KEEP", "k"), ("X", "1"), ("Y", "2")] {
            assert!(
                outcome.env.contains(&(pair.0.to_string(), pair.1.to_string())),
                "{pair:?} missing from {:?}",
                outcome.env
            );
        }
        assert!(!outcome.env.iter().any(|(k, _)| k == "SHLVL" || k == "_"));
    }
}
