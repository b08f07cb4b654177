//! In-process file and text utilities.
//!
//! Used instead of spawning when commands must stay inside this process, so
//! filesystem access is governed by the sandbox of the current process. Each
//! utility prints `name: message` to stderr on failure and returns a
//! non-zero status; only I/O failures on the output streams are errors.

mod files;
mod grep;
mod text;

use std::cell::{RefCell, RefMut};
use std::io::{self, Read, Write};
use std::path::PathBuf;

use super::io::describe_io_error;

/// Catalogue of utilities that run in-process.
pub const UTILITIES: &[&str] = &[
    "basename", "cat", "chmod", "cp", "dirname", "grep", "head", "ls", "mkdir", "mktemp", "mv",
    "rm", "rmdir", "sort", "tail", "touch", "uniq", "wc",
];

pub fn is_utility(name: &str) -> bool {
    UTILITIES.contains(&name)
}

/// Everything a utility may touch.
pub struct UtilContext {
    pub cwd: PathBuf,
    /// Exported environment of the invoking shell.
    pub env: Vec<(String, String)>,
    stdin: RefCell<Box<dyn Read>>,
    stdout: RefCell<Box<dyn Write>>,
    stderr: RefCell<Box<dyn Write>>,
}

impl UtilContext {
    pub fn new(
        cwd: PathBuf,
        env: Vec<(String, String)>,
        stdin: impl Read + 'static,
        stdout: impl Write + 'static,
        stderr: impl Write + 'static,
    ) -> Self {
        Self {
            cwd,
            env,
            stdin: RefCell::new(Box::new(stdin)),
            stdout: RefCell::new(Box::new(stdout)),
            stderr: RefCell::new(Box::new(stderr)),
        }
    }

    pub fn path(&self, operand: &str) -> PathBuf {
        self.cwd.join(operand)
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Write to stdout and flush, so pipeline readers see output as it is made.
    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut out = self.stdout.borrow_mut();
        out.write_all(data)?;
        out.flush()
    }

    pub fn out(&self, text: &str) -> io::Result<()> {
        self.write(text.as_bytes())
    }

    /// Report `name: msg` on stderr.
    pub fn warn(&self, name: &str, msg: impl std::fmt::Display) -> io::Result<()> {
        let mut err = self.stderr.borrow_mut();
        writeln!(err, "{}: {}", name, msg)?;
        err.flush()
    }

    pub fn fail(&self, name: &str, msg: impl std::fmt::Display, status: i32) -> io::Result<i32> {
        self.warn(name, msg)?;
        Ok(status)
    }

    /// Report an I/O failure on `operand`.
    pub fn warn_io(&self, name: &str, operand: &str, err: &io::Error) -> io::Result<()> {
        self.warn(name, format!("{}: {}", operand, describe_io_error(err)))
    }

    /// Standard input, for utilities that consume it incrementally.
    pub fn stdin(&self) -> RefMut<'_, Box<dyn Read>> {
        self.stdin.borrow_mut()
    }

    /// Contents of a file operand; `-` is standard input read to the end.
    pub fn read(&self, operand: &str) -> io::Result<Vec<u8>> {
        if operand == "-" {
            let mut data = Vec::new();
            self.stdin().read_to_end(&mut data)?;
            return Ok(data);
        }
        std::fs::read(self.path(operand))
    }
}

/// Run a catalogue utility. Errors are failures of the standard streams
/// themselves; everything else is reported on stderr with a status.
pub fn run(name: &str, args: &[String], ctx: &UtilContext) -> io::Result<i32> {
    match name {
        "basename" => files::basename(ctx, args),
        "cat" => text::cat(ctx, args),
        "chmod" => files::chmod(ctx, args),
        "cp" => files::cp(ctx, args),
        "dirname" => files::dirname(ctx, args),
        "grep" => grep::grep(ctx, args),
        "head" => text::head(ctx, args),
        "ls" => files::ls(ctx, args),
        "mkdir" => files::mkdir(ctx, args),
        "mktemp" => files::mktemp(ctx, args),
        "mv" => files::mv(ctx, args),
        "rm" => files::rm(ctx, args),
        "rmdir" => files::rmdir(ctx, args),
        "sort" => text::sort(ctx, args),
        "tail" => text::tail(ctx, args),
        "touch" => files::touch(ctx, args),
        "uniq" => text::uniq(ctx, args),
        "wc" => text::wc(ctx, args),
        other => ctx.fail(other, "command not found", 127),
    }
}

/// Short-option grammar of one utility.
pub(crate) struct FlagSpec {
    /// Flags without a value.
    pub flags: &'static str,
    /// Flags that take a value (`-n 5` or `-n5`).
    pub valued: &'static str,
    /// Long spellings mapped to their short flag.
    pub long: &'static [(&'static str, char)],
}

#[derive(Debug, Default)]
pub(crate) struct Parsed {
    pub flags: Vec<(char, Option<String>)>,
    pub operands: Vec<String>,
}

impl Parsed {
    pub fn has(&self, flag: char) -> bool {
        self.flags.iter().any(|(c, _)| *c == flag)
    }

    /// Last value given for `flag`.
    pub fn value(&self, flag: char) -> Option<&str> {
        self.flags
            .iter()
            .rev()
            .find(|(c, _)| *c == flag)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn values(&self, flag: char) -> impl Iterator<Item = &str> {
        self.flags
            .iter()
            .filter(move |(c, _)| *c == flag)
            .filter_map(|(_, v)| v.as_deref())
    }
}

/// Parse options anywhere before `--`. A lone `-` is an operand.
pub(crate) fn parse_args(args: &[String], spec: &FlagSpec) -> Result<Parsed, String> {
    let mut parsed = Parsed::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--" {
            parsed.operands.extend(iter.cloned());
            break;
        }
        if let Some(long) = arg.strip_prefix("--") {
            let (name, inline) = match long.split_once('=') {
                Some((n, v)) => (n, Some(v.to_string())),
                None => (long, None),
            };
            let Some((_, flag)) = spec.long.iter().find(|(l, _)| *l == name) else {
                return Err(format!("unrecognized option '--{}'", name));
            };
            let value = if spec.valued.contains(*flag) {
                match inline {
                    Some(v) => Some(v),
                    None => Some(
                        iter.next()
                            .cloned()
                            .ok_or_else(|| format!("option '--{}' requires an argument", name))?,
                    ),
                }
            } else {
                None
            };
            parsed.flags.push((*flag, value));
            continue;
        }
        let Some(cluster) = arg.strip_prefix('-').filter(|c| !c.is_empty()) else {
            parsed.operands.push(arg.clone());
            continue;
        };
        for (i, c) in cluster.char_indices() {
            if spec.valued.contains(c) {
                let rest = &cluster[i + c.len_utf8()..];
                let value = if rest.is_empty() {
                    iter.next()
                        .cloned()
                        .ok_or_else(|| format!("option requires an argument -- '{}'", c))?
                } else {
                    rest.to_string()
                };
                parsed.flags.push((c, Some(value)));
                break;
            }
            if !spec.flags.contains(c) {
                return Err(format!("invalid option -- '{}'", c));
            }
            parsed.flags.push((c, None));
        }
    }
    Ok(parsed)
}

/// Split into lines, each keeping its terminator.
pub(crate) fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    data.split_inclusive(|b| *b == b'\n').collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::shell::io::SharedBuffer;

    /// Endless `y\n` lines, like `yes`.
    pub struct Yes;

    impl Read for Yes {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = if i % 2 == 0 { b'y' } else { b'\n' };
            }
            Ok(buf.len() & !1)
        }
    }

    pub fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    /// Run a utility; returns (status, stdout, stderr).
    pub fn util(
        cwd: &std::path::Path,
        name: &str,
        argv: &str,
        stdin: Option<&str>,
    ) -> (i32, String, String) {
        let stdout = SharedBuffer::default();
        let stderr = SharedBuffer::default();
        let ctx = UtilContext::new(
            cwd.to_path_buf(),
            Vec::new(),
            io::Cursor::new(stdin.unwrap_or_default().as_bytes().to_vec()),
            stdout.clone(),
            stderr.clone(),
        );
        let status = run(name, &args(argv), &ctx).unwrap();
        (status, stdout.to_string_lossy(), stderr.to_string_lossy())
    }
}
