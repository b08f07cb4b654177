//! Interceptors between a command string and the engine.
//!
//! Order is fixed: block, shell delegation, script detection, coreutils. The
//! block check and script detection run on the parsed source before the
//! engine starts; shell delegation and coreutils are builtins registered
//! with the engine. The last three are only installed in in-process mode.

use std::ops::Range;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::blocklist::Blocklist;
use super::error::ShellError;
use super::scan::{self, Analysis, Word, quote};
use super::script::{is_shell_script, look_path};

/// Wrappers that run their operand as a command.
const WRAPPERS: &[&str] = &["command", "exec", "nohup", "env", "sudo"];

/// Limit on eval strings, sourced files and `sh -c` bodies vetted inside
/// one another.
const MAX_VET_DEPTH: usize = 16;

/// What the runner knows about the command being executed.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    pub cwd: &'a Path,
    /// Exported environment the command would receive.
    pub env: &'a [(String, String)],
}

impl<'a> HandlerContext<'a> {
    pub fn var(&self, name: &str) -> Option<&'a str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A `sh`/`bash` invocation to run in-process.
#[derive(Debug, Clone, PartialEq)]
pub struct Delegation {
    pub source: String,
    /// `params[0]` becomes `$0`, the rest `$1`...
    pub params: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExecChain {
    blocklist: Blocklist,
    in_process: bool,
}

impl ExecChain {
    pub fn new(blocklist: Blocklist, in_process: bool) -> Self {
        Self {
            blocklist,
            in_process,
        }
    }

    pub fn in_process(&self) -> bool {
        self.in_process
    }

    pub fn names(&self) -> Vec<&'static str> {
        if self.in_process {
            vec!["block", "shell", "script", "coreutils"]
        } else {
            vec!["block"]
        }
    }

    /// Vet `source` and return what the engine should run.
    ///
    /// Any blocked command aborts the whole invocation before it starts. In
    /// in-process mode, commands that name a sh/bash script are rewritten to
    /// run through the in-process `sh`. `is_builtin` names commands the
    /// engine never resolves on `PATH`.
    pub fn prepare(
        &self,
        source: &str,
        ctx: &HandlerContext<'_>,
        is_builtin: &dyn Fn(&str) -> bool,
    ) -> Result<String, ShellError> {
        let analysis = scan::analyze(source)?;
        self.vet(&analysis, ctx, 0)?;
        if !self.in_process {
            return Ok(source.to_string());
        }
        Ok(route_scripts(source, &analysis, ctx, is_builtin))
    }

    fn vet(&self, analysis: &Analysis, ctx: &HandlerContext<'_>, depth: usize) -> Result<(), ShellError> {
        if self.blocklist.is_empty() {
            return Ok(());
        }
        if depth > MAX_VET_DEPTH {
            return Err(ShellError::Unsupported(
                "commands nested too deeply to vet".into(),
            ));
        }
        analysis
            .commands
            .iter()
            .try_for_each(|site| self.vet_words(&site.words, ctx, depth))
    }

    /// Check one command. Dynamic words are matched by their source text; a
    /// command whose name or body is only known at run time is refused.
    fn vet_words(&self, words: &[Word], ctx: &HandlerContext<'_>, depth: usize) -> Result<(), ShellError> {
        let Some(first) = words.first() else {
            return Ok(());
        };
        let line = || words.iter().map(Word::text).collect::<Vec<_>>().join(" ");
        let argv: Vec<String> = words.iter().map(|w| w.text().to_string()).collect();
        if self.blocklist.is_blocked(&argv) {
            debug!(interceptor = "block", command = %argv[0], "exec intercepted");
            return Err(ShellError::Blocked(line()));
        }
        let Some(name) = first.literal() else {
            return Err(ShellError::Blocked(line()));
        };

        let rest = &words[1..];
        match base_name(name) {
            wrapper if WRAPPERS.contains(&wrapper) => {
                let skip = rest
                    .iter()
                    .take_while(|w| w.literal().is_some_and(|s| s.starts_with('-') || (wrapper == "env" && s.contains('='))))
                    .count();
                self.vet_words(&rest[skip..], ctx, depth)
            }
            "eval" => {
                let body = literal_body(rest).ok_or_else(|| ShellError::Blocked(line()))?;
                self.vet(&scan::analyze(&body)?, ctx, depth + 1)
            }
            "source" | "." => match rest.first() {
                None => Ok(()),
                Some(Word::Literal(file)) => self.vet_file(&ctx.cwd.join(file), ctx, depth),
                Some(Word::Dynamic(_)) => Err(ShellError::Blocked(line())),
            },
            "sh" | "bash" => {
                let Some(argv) = rest.iter().map(Word::literal).collect::<Option<Vec<_>>>() else {
                    return Err(ShellError::Blocked(line()));
                };
                match argv.iter().position(|a| *a == "-c") {
                    Some(i) => match argv.get(i + 1) {
                        Some(body) => self.vet(&scan::analyze(body)?, ctx, depth + 1),
                        None => Ok(()),
                    },
                    None => match argv.iter().find(|a| !a.starts_with('-')) {
                        Some(file) => self.vet_file(&ctx.cwd.join(file), ctx, depth),
                        None => Ok(()),
                    },
                }
            }
            _ => Ok(()),
        }
    }

    /// Vet a script file. Files that cannot be read are left to the engine,
    /// which reports them when it tries.
    fn vet_file(&self, path: &Path, ctx: &HandlerContext<'_>, depth: usize) -> Result<(), ShellError> {
        match std::fs::read_to_string(path) {
            Ok(body) => self.vet(&scan::analyze(&body)?, ctx, depth + 1),
            Err(_) => Ok(()),
        }
    }
}

fn base_name(cmd: &str) -> &str {
    cmd.rsplit('/').next().unwrap_or(cmd)
}

fn literal_body(words: &[Word]) -> Option<String> {
    let parts = words.iter().map(Word::literal).collect::<Option<Vec<_>>>()?;
    Some(parts.join(" "))
}

/// Rewrite literal invocations of sh/bash scripts as `sh <script>`.
fn route_scripts(
    source: &str,
    analysis: &Analysis,
    ctx: &HandlerContext<'_>,
    is_builtin: &dyn Fn(&str) -> bool,
) -> String {
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    for site in &analysis.commands {
        let Some(Word::Literal(name)) = site.words.first() else {
            continue;
        };
        let base = base_name(name);
        if name.is_empty()
            || base == "sh"
            || base == "bash"
            || analysis.functions.contains(name)
            || is_builtin(name)
        {
            continue;
        }
        let (path, spelled): (PathBuf, String) = if name.contains('/') {
            (ctx.cwd.join(name), source[site.name_span.clone()].to_string())
        } else {
            match look_path(name, ctx.var("PATH").unwrap_or(""), ctx.cwd) {
                Some(found) => {
                    let spelled = quote(&found.to_string_lossy());
                    (found, spelled)
                }
                None => continue,
            }
        };
        if is_shell_script(&path) {
            debug!(interceptor = "script", command = %name, path = %path.display(), "exec intercepted");
            edits.push((site.name_span.clone(), format!("sh {}", spelled)));
        }
    }

    edits.sort_by_key(|(span, _)| std::cmp::Reverse(span.start));
    let mut out = source.to_string();
    for (span, text) in edits {
        out.replace_range(span, &text);
    }
    out
}

/// Interpret `sh`/`bash` arguments: `-c SCRIPT [ARG0 ARGS...]` or
/// `FILE [ARGS...]`. Leading options are ignored.
pub fn delegate(argv: &[String], ctx: &HandlerContext<'_>) -> Result<Delegation, ShellError> {
    let cmd = argv.first().map_or("sh", |a| base_name(a));
    for (i, arg) in argv.iter().enumerate().skip(1) {
        if arg == "-c" {
            let Some(source) = argv.get(i + 1) else {
                return Err(ShellError::Usage(format!("{}: -c requires an argument", cmd)));
            };
            return Ok(Delegation {
                source: source.clone(),
                params: argv[i + 2..].to_vec(),
            });
        }
        // First non-flag argument is the script file.
        if !arg.starts_with('-') {
            let path = ctx.cwd.join(arg);
            let source =
                std::fs::read_to_string(&path).map_err(|source| ShellError::Script { path, source })?;
            return Ok(Delegation {
                source,
                params: argv[i..].to_vec(),
            });
        }
    }
    Err(ShellError::Usage(format!("{}: interactive mode not supported", cmd)))
}
