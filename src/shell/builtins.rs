//! brush builtins that keep work inside this process.

use std::collections::HashMap;
use std::io::{self, Write};

use brush_core::{ExecutionContext, ExecutionResult, ShellExtensions, builtins, error};

use super::coreutils::{self, UtilContext};
use super::engine;
use super::error::ShellError;

/// Status of a utility whose reader went away, as if killed by SIGPIPE.
const BROKEN_PIPE_STATUS: u8 = 141;

/// Register `sh`, `bash` and the utility catalogue.
pub fn register_builtins<SE: ShellExtensions>(
    builtins: &mut HashMap<String, builtins::Registration<SE>>,
) {
    builtins.insert("sh".into(), builtins::simple_builtin::<ShellCommand, SE>());
    builtins.insert("bash".into(), builtins::simple_builtin::<ShellCommand, SE>());
    for name in coreutils::UTILITIES {
        builtins.insert((*name).into(), builtins::simple_builtin::<UtilityCommand, SE>());
    }
}

fn exit_byte(status: i32) -> u8 {
    u8::try_from(status).unwrap_or(1)
}

/// One of the in-process utilities, dispatched on the name it was invoked by.
pub struct UtilityCommand;

impl builtins::SimpleCommand for UtilityCommand {
    fn get_content(
        name: &str,
        content_type: builtins::ContentType,
        _options: &builtins::ContentOptions,
    ) -> Result<String, brush_core::Error> {
        match content_type {
            builtins::ContentType::DetailedHelp => Ok(format!(
                "Run {} inside this process, with the sandbox of the current process.",
                name
            )),
            builtins::ContentType::ShortUsage => Ok(format!("{} [OPTION]... [OPERAND]...", name)),
            builtins::ContentType::ShortDescription => Ok(format!("{} - in-process utility", name)),
            builtins::ContentType::ManPage => error::unimp("man page not yet implemented"),
        }
    }

    fn execute<SE: ShellExtensions, I: Iterator<Item = S>, S: AsRef<str>>(
        context: ExecutionContext<'_, SE>,
        args: I,
    ) -> Result<ExecutionResult, brush_core::Error> {
        let argv: Vec<String> = args.map(|s| s.as_ref().to_string()).collect();
        let Some((name, rest)) = argv.split_first() else {
            return Ok(ExecutionResult::new(2));
        };

        let ctx = UtilContext::new(
            engine::working_dir(context.shell),
            engine::exported_env(context.shell),
            context.stdin(),
            context.stdout(),
            context.stderr(),
        );
        match coreutils::run(name, rest, &ctx) {
            Ok(status) => Ok(ExecutionResult::new(exit_byte(status))),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                Ok(ExecutionResult::new(BROKEN_PIPE_STATUS))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// `sh`/`bash` run by a nested engine instead of a child process.
///
/// Failures that are not exit statuses (a blocked command, a missing
/// script, bad arguments) stop the whole invocation.
pub struct ShellCommand;

impl builtins::SimpleCommand for ShellCommand {
    fn get_content(
        name: &str,
        content_type: builtins::ContentType,
        _options: &builtins::ContentOptions,
    ) -> Result<String, brush_core::Error> {
        match content_type {
            builtins::ContentType::DetailedHelp => Ok(format!(
                "Run a {} script or -c string in-process, under the same interceptors.",
                name
            )),
            builtins::ContentType::ShortUsage => {
                Ok(format!("{} [OPTION]... (-c SCRIPT [ARG0 ARG...] | FILE [ARG...])", name))
            }
            builtins::ContentType::ShortDescription => Ok(format!("{} - in-process shell", name)),
            builtins::ContentType::ManPage => error::unimp("man page not yet implemented"),
        }
    }

    fn execute<SE: ShellExtensions, I: Iterator<Item = S>, S: AsRef<str>>(
        context: ExecutionContext<'_, SE>,
        args: I,
    ) -> Result<ExecutionResult, brush_core::Error> {
        let argv: Vec<String> = args.map(|s| s.as_ref().to_string()).collect();
        let cwd = engine::working_dir(context.shell);
        let env = engine::exported_env(context.shell);
        let mut stderr = context.stderr();

        let stdin = match context.params.try_stdin(context.shell) {
            Some(file) => file,
            None => brush_core::openfiles::null()?,
        };
        let stdout = match context.params.try_stdout(context.shell) {
            Some(file) => file,
            None => brush_core::openfiles::null()?,
        };
        let stderr_file = match context.params.try_stderr(context.shell) {
            Some(file) => file,
            None => brush_core::openfiles::null()?,
        };

        match engine::run_nested(&argv, cwd, env, stdin, stdout, stderr_file) {
            Ok(status) => Ok(ExecutionResult::new(exit_byte(status))),
            // The invocation is already stopping.
            Err(ShellError::Interrupted(_)) => Ok(ExecutionResult::new(130)),
            Err(err) => {
                writeln!(stderr, "{}", err)?;
                engine::abort(err);
                Ok(ExecutionResult::new(2))
            }
        }
    }
}
