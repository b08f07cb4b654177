//! `grep` over files, trees and standard input.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use regex::bytes::{Regex, RegexBuilder};

use super::{FlagSpec, UtilContext, parse_args, split_lines};

const SPEC: FlagSpec = FlagSpec {
    flags: "ivnclLqEFGrRhHwxso",
    valued: "em",
    long: &[
        ("ignore-case", 'i'),
        ("invert-match", 'v'),
        ("line-number", 'n'),
        ("count", 'c'),
        ("files-with-matches", 'l'),
        ("files-without-match", 'L'),
        ("quiet", 'q'),
        ("silent", 'q'),
        ("extended-regexp", 'E'),
        ("fixed-strings", 'F'),
        ("basic-regexp", 'G'),
        ("recursive", 'r'),
        ("dereference-recursive", 'R'),
        ("no-filename", 'h'),
        ("with-filename", 'H'),
        ("word-regexp", 'w'),
        ("line-regexp", 'x'),
        ("no-messages", 's'),
        ("only-matching", 'o'),
        ("regexp", 'e'),
        ("max-count", 'm'),
    ],
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Syntax {
    Basic,
    Extended,
    Fixed,
}

struct GrepOpts {
    regex: Regex,
    invert: bool,
    line_number: bool,
    count_only: bool,
    files_with_matches: bool,
    files_without_match: bool,
    quiet: bool,
    only_matching: bool,
    no_messages: bool,
    max_count: Option<usize>,
}

/// Rewrite a POSIX basic expression into the extended dialect.
fn basic_to_extended(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    let mut at_start = true;
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(e @ ('(' | ')' | '{' | '}' | '|' | '+' | '?')) => out.push(e),
                Some(e) => {
                    out.push('\\');
                    out.push(e);
                }
                None => out.push_str("\\\\"),
            },
            '(' | ')' | '{' | '}' | '|' | '+' | '?' => {
                out.push('\\');
                out.push(c);
            }
            '*' if at_start => out.push_str("\\*"),
            '[' => copy_bracket(&mut chars, &mut out),
            _ => out.push(c),
        }
        at_start = c == '^' && out.len() == 1;
    }
    out
}

/// Copy a bracket expression; backslash is literal inside one.
fn copy_bracket(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, out: &mut String) {
    out.push('[');
    if chars.peek() == Some(&'^') {
        out.push('^');
        chars.next();
    }
    if chars.peek() == Some(&']') {
        out.push_str("\\]");
        chars.next();
    }
    while let Some(c) = chars.next() {
        match c {
            ']' => {
                out.push(']');
                return;
            }
            '\\' => out.push_str("\\\\"),
            '[' if chars.peek() == Some(&':') => {
                out.push('[');
                for class in chars.by_ref() {
                    out.push(class);
                    if class == ']' {
                        break;
                    }
                }
            }
            '[' => out.push_str("\\["),
            _ => out.push(c),
        }
    }
}

/// `\<` and `\>` become word boundaries.
fn word_anchors(pattern: &str) -> String {
    pattern.replace("\\<", "\\b").replace("\\>", "\\b")
}

fn build_regex(patterns: &[String], syntax: Syntax, opts: &super::Parsed) -> Result<Regex, String> {
    let alternatives: Vec<String> = patterns
        .iter()
        .map(|p| {
            let body = match syntax {
                Syntax::Fixed => regex::escape(p),
                Syntax::Basic => word_anchors(&basic_to_extended(p)),
                Syntax::Extended => word_anchors(p),
            };
            if opts.has('x') {
                format!("^(?:{})$", body)
            } else if opts.has('w') {
                format!("\\b(?:{})\\b", body)
            } else {
                format!("(?:{})", body)
            }
        })
        .collect();
    RegexBuilder::new(&alternatives.join("|"))
        .case_insensitive(opts.has('i'))
        .build()
        .map_err(|e| match e {
            regex::Error::Syntax(msg) => msg.lines().last().unwrap_or("invalid pattern").trim().to_string(),
            other => other.to_string(),
        })
}

/// Per-input result.
struct Scan {
    selected: usize,
    output: Vec<u8>,
}

fn scan(data: &[u8], name: &str, show_name: bool, opts: &GrepOpts) -> Scan {
    let mut scan = Scan {
        selected: 0,
        output: Vec::new(),
    };
    let binary = data.contains(&0);
    let silent = opts.count_only || opts.files_with_matches || opts.files_without_match || opts.quiet;

    for (index, raw) in split_lines(data).into_iter().enumerate() {
        if opts.max_count.is_some_and(|max| scan.selected >= max) {
            break;
        }
        let line = raw.strip_suffix(b"\n").unwrap_or(raw);
        if opts.regex.is_match(line) == opts.invert {
            continue;
        }
        scan.selected += 1;
        if silent || binary {
            if opts.quiet || opts.files_with_matches {
                break;
            }
            continue;
        }

        let prefix = |out: &mut Vec<u8>| {
            if show_name {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
            }
            if opts.line_number {
                out.extend_from_slice(format!("{}:", index + 1).as_bytes());
            }
        };
        if opts.only_matching && !opts.invert {
            for m in opts.regex.find_iter(line).filter(|m| !m.is_empty()) {
                prefix(&mut scan.output);
                scan.output.extend_from_slice(m.as_bytes());
                scan.output.push(b'\n');
            }
        } else {
            prefix(&mut scan.output);
            scan.output.extend_from_slice(line);
            scan.output.push(b'\n');
        }
    }

    if binary && scan.selected > 0 && !silent {
        scan.output = format!("Binary file {} matches\n", name).into_bytes();
    }
    scan
}

/// Standard input, read only as far as an early-exit mode needs it.
fn read_stdin(ctx: &UtilContext, opts: &GrepOpts) -> io::Result<Vec<u8>> {
    let limit = if opts.quiet || opts.files_with_matches {
        Some(1)
    } else {
        opts.max_count
    };
    let Some(limit) = limit else {
        return ctx.read("-");
    };
    let mut stdin = ctx.stdin();
    let mut reader = io::BufReader::new(&mut **stdin);
    let mut data = Vec::new();
    let mut selected = 0;
    while selected < limit {
        let start = data.len();
        if reader.read_until(b'\n', &mut data)? == 0 {
            break;
        }
        let line = &data[start..];
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        if opts.regex.is_match(line) != opts.invert {
            selected += 1;
        }
    }
    Ok(data)
}

/// Regular files below `root`, sorted per directory. Symlinks are followed
/// only when `follow` is set.
fn walk(root: &Path, follow: bool) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = std::fs::read_dir(&dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        let mut subdirs = Vec::new();
        for path in entries {
            let meta = if follow {
                std::fs::metadata(&path)
            } else {
                std::fs::symlink_metadata(&path)
            };
            match meta {
                Ok(m) if m.is_dir() => subdirs.push(path),
                Ok(m) if m.is_file() => files.push(path),
                _ => {}
            }
        }
        // Depth-first in name order.
        pending.extend(subdirs.into_iter().rev());
    }
    Ok(files)
}

pub(super) fn grep(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let parsed = match parse_args(args, &SPEC) {
        Ok(p) => p,
        Err(e) => return ctx.fail("grep", e, 2),
    };

    let mut operands = parsed.operands.clone();
    let mut patterns: Vec<String> = parsed
        .values('e')
        .flat_map(|p| p.split('\n').map(String::from).collect::<Vec<_>>())
        .collect();
    if patterns.is_empty() {
        if operands.is_empty() {
            return ctx
                .fail("grep", "usage: grep [OPTION]... PATTERNS [FILE]...", 2);
        }
        patterns = operands.remove(0).split('\n').map(String::from).collect();
    }

    let syntax = if parsed.has('F') {
        Syntax::Fixed
    } else if parsed.has('E') {
        Syntax::Extended
    } else {
        Syntax::Basic
    };
    let regex = match build_regex(&patterns, syntax, &parsed) {
        Ok(r) => r,
        Err(e) => return ctx.fail("grep", e, 2),
    };
    let max_count = match parsed.value('m').map(str::parse::<usize>) {
        None => None,
        Some(Ok(n)) => Some(n),
        Some(Err(_)) => {
            let raw = parsed.value('m').unwrap_or_default();
            return ctx.fail("grep", format!("invalid max count '{}'", raw), 2);
        }
    };
    let opts = GrepOpts {
        regex,
        invert: parsed.has('v'),
        line_number: parsed.has('n'),
        count_only: parsed.has('c'),
        files_with_matches: parsed.has('l'),
        files_without_match: parsed.has('L'),
        quiet: parsed.has('q'),
        only_matching: parsed.has('o'),
        no_messages: parsed.has('s'),
        max_count,
    };

    let recursive = parsed.has('r') || parsed.has('R');
    let implicit_root = recursive && operands.is_empty();
    if implicit_root {
        operands.push(".".into());
    }

    // (label, path); a `None` path is stdin.
    let mut inputs: Vec<(String, Option<PathBuf>)> = Vec::new();
    let mut errors = false;
    if operands.is_empty() {
        inputs.push(("(standard input)".into(), None));
    }
    for operand in &operands {
        if operand == "-" {
            inputs.push(("(standard input)".into(), None));
            continue;
        }
        let path = ctx.path(operand);
        let is_dir = std::fs::metadata(&path).is_ok_and(|m| m.is_dir());
        if !is_dir {
            inputs.push((operand.clone(), Some(path)));
            continue;
        }
        if !recursive {
            if !opts.no_messages {
                ctx.warn("grep", format!("{}: Is a directory", operand))?;
            }
            errors = true;
            continue;
        }
        match walk(&path, parsed.has('R')) {
            Ok(files) => {
                for file in files {
                    let rel = file.strip_prefix(&path).unwrap_or(&file);
                    let label = if implicit_root {
                        rel.display().to_string()
                    } else {
                        Path::new(operand).join(rel).display().to_string()
                    };
                    inputs.push((label, Some(file)));
                }
            }
            Err(e) => {
                if !opts.no_messages {
                    ctx.warn_io("grep", operand, &e)?;
                }
                errors = true;
            }
        }
    }

    let show_names = if parsed.has('h') {
        false
    } else {
        parsed.has('H') || recursive || inputs.len() > 1
    };

    let mut any_selected = false;
    for (label, path) in &inputs {
        let data = match path {
            None => read_stdin(ctx, &opts)?,
            Some(path) => match std::fs::read(path) {
                Ok(data) => data,
                Err(e) => {
                    if !opts.no_messages {
                        ctx.warn_io("grep", label, &e)?;
                    }
                    errors = true;
                    continue;
                }
            },
        };
        let result = scan(&data, label, show_names, &opts);
        any_selected |= result.selected > 0;

        if opts.quiet {
            if any_selected {
                return Ok(0);
            }
            continue;
        }
        if opts.files_with_matches {
            if result.selected > 0 {
                ctx.out(&format!("{}\n", label))?;
            }
        } else if opts.files_without_match {
            if result.selected == 0 {
                ctx.out(&format!("{}\n", label))?;
            }
        } else if opts.count_only {
            let line = if show_names {
                format!("{}:{}\n", label, result.selected)
            } else {
                format!("{}\n", result.selected)
            };
            ctx.out(&line)?;
        } else {
            ctx.write(&result.output)?;
        }
    }

    Ok(if errors {
        2
    } else if any_selected {
        0
    } else {
        1
    })
}

#[cfg(test)]
mod tests {
    use super::super::run;
    use super::super::testing::{Yes, args, util};
    use super::*;
    use crate::shell::io::SharedBuffer;

    #[test]
    fn test_basic_to_extended() {
        assert_eq!(basic_to_extended(r"a\(b\)\{2\}"), "a(b){2}");
        assert_eq!(basic_to_extended("a+b?(c)"), r"a\+b\?\(c\)");
        assert_eq!(basic_to_extended("*x"), r"\*x");
        assert_eq!(basic_to_extended(r"[\]]"), r"[\\]]");
        assert_eq!(basic_to_extended("[[:digit:]]+"), r"[[:digit:]]\+");
        assert_eq!(basic_to_extended(r"foo\|bar"), "foo|bar");
    }

    #[test]
    fn test_grep_stdin_flags() {
        let dir = tempfile::tempdir().unwrap();
        let input = "alpha\nBeta\ngamma\nalphabet\n";
        assert_eq!(util(dir.path(), "grep", "alpha", Some(input)).1, "alpha\nalphabet\n");
        assert_eq!(util(dir.path(), "grep", "-i beta", Some(input)).1, "Beta\n");
        assert_eq!(util(dir.path(), "grep", "-c a", Some(input)).1, "4\n");
        assert_eq!(util(dir.path(), "grep", "-v a", Some(input)).1, "");
        assert_eq!(util(dir.path(), "grep", "-n gamma", Some(input)).1, "3:gamma\n");
        assert_eq!(util(dir.path(), "grep", "-x alpha", Some(input)).1, "alpha\n");
        assert_eq!(util(dir.path(), "grep", "-w alpha", Some(input)).1, "alpha\n");
        assert_eq!(util(dir.path(), "grep", "-m 1 alpha", Some(input)).1, "alpha\n");
        assert_eq!(util(dir.path(), "grep", "-o -E ph.", Some(input)).1, "pha\npha\n");
        assert_eq!(
            util(dir.path(), "grep", "-e gamma -e Beta", Some(input)).1,
            "Beta\ngamma\n"
        );
    }

    #[test]
    fn test_grep_exit_statuses() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(util(dir.path(), "grep", "-q x", Some("x\n")), (0, String::new(), String::new()));
        assert_eq!(util(dir.path(), "grep", "y", Some("x\n")).0, 1);

        let (status, _, err) = util(dir.path(), "grep", "x missing", None);
        assert_eq!(status, 2);
        assert!(err.starts_with("grep: missing: "));
        assert_eq!(util(dir.path(), "grep", "-s x missing", None), (2, String::new(), String::new()));

        let (status, _, err) = util(dir.path(), "grep", "-E a(", Some("a\n"));
        assert_eq!(status, 2);
        assert!(err.starts_with("grep: "));
    }

    #[test]
    fn test_grep_basic_and_fixed_syntax() {
        let dir = tempfile::tempdir().unwrap();
        let input = "a+b\naab\n(x)\n";
        assert_eq!(util(dir.path(), "grep", "a+b", Some(input)).1, "a+b\n");
        assert_eq!(util(dir.path(), "grep", "-E a+b", Some(input)).1, "aab\n");
        assert_eq!(util(dir.path(), "grep", "-F (x)", Some(input)).1, "(x)\n");
    }

    #[test]
    fn test_grep_files_and_recursion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/sub")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "fn main() {}\n").unwrap();
        std::fs::write(dir.path().join("src/sub/b.rs"), "fn helper() {}\nstruct S;\n").unwrap();
        std::fs::write(dir.path().join("notes"), "nothing\n").unwrap();

        let (status, out, _) = util(dir.path(), "grep", "-r fn src", None);
        assert_eq!(status, 0);
        assert_eq!(out, "src/a.rs:fn main() {}\nsrc/sub/b.rs:fn helper() {}\n");

        assert_eq!(
            util(dir.path(), "grep", "-rl struct", None).1,
            "src/sub/b.rs\n"
        );
        assert_eq!(
            util(dir.path(), "grep", "-c fn src/a.rs notes", None).1,
            "src/a.rs:1\nnotes:0\n"
        );
        assert_eq!(util(dir.path(), "grep", "-L fn src/a.rs notes", None).1, "notes\n");

        let (status, _, err) = util(dir.path(), "grep", "fn src", None);
        assert_eq!(status, 2);
        assert_eq!(err, "grep: src: Is a directory\n");
    }

    #[test]
    fn test_grep_stops_reading_after_decision() {
        let dir = tempfile::tempdir().unwrap();
        for (argv, expected) in [("-m 2 y", "y\ny\n"), ("-q y", ""), ("-l y", "(standard input)\n")] {
            let out = SharedBuffer::default();
            let ctx = UtilContext::new(dir.path().to_path_buf(), Vec::new(), Yes, out.clone(), std::io::sink());
            assert_eq!(run("grep", &args(argv), &ctx).unwrap(), 0);
            assert_eq!(out.to_string_lossy(), expected);
        }
    }

    #[test]
    fn test_grep_binary_input() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bin"), b"abc\0def\n").unwrap();
        assert_eq!(
            util(dir.path(), "grep", "abc bin", None).1,
            "Binary file bin matches\n"
        );
    }
}
