use std::cmp::Ordering;
use std::io::{self, BufRead, Read};

use super::{FlagSpec, UtilContext, parse_args, split_lines};

/// Inputs named by operands, or stdin when there are none. Unreadable files
/// are reported and skipped; the flag records that one failed.
fn gather(
    ctx: &UtilContext,
    name: &str,
    operands: &[String],
) -> io::Result<(Vec<(String, Vec<u8>)>, bool)> {
    if operands.is_empty() {
        return Ok((vec![("-".into(), ctx.read("-")?)], false));
    }
    let mut inputs = Vec::with_capacity(operands.len());
    let mut failed = false;
    for operand in operands {
        match ctx.read(operand) {
            Ok(data) => inputs.push((operand.clone(), data)),
            Err(e) => {
                ctx.warn_io(name, operand, &e)?;
                failed = true;
            }
        }
    }
    Ok((inputs, failed))
}

pub(super) fn cat(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "nu",
        valued: "",
        long: &[("number", 'n')],
    };
    let opts = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("cat", e, 1),
    };

    let operands = if opts.operands.is_empty() {
        vec!["-".to_string()]
    } else {
        opts.operands.clone()
    };
    let mut status = 0;
    let mut line_no = 0;
    for operand in &operands {
        if operand == "-" && !opts.has('n') {
            copy_stdin(ctx)?;
            continue;
        }
        let data = match ctx.read(operand) {
            Ok(data) => data,
            Err(e) => {
                ctx.warn_io("cat", operand, &e)?;
                status = 1;
                continue;
            }
        };
        if opts.has('n') {
            let mut out = Vec::with_capacity(data.len() + 8 * data.len() / 40);
            for line in split_lines(&data) {
                line_no += 1;
                out.extend_from_slice(format!("{:>6}\t", line_no).as_bytes());
                out.extend_from_slice(line);
            }
            ctx.write(&out)?;
        } else {
            ctx.write(&data)?;
        }
    }
    Ok(status)
}

/// Pass stdin through as it arrives.
fn copy_stdin(ctx: &UtilContext) -> io::Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        let n = ctx.stdin().read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        ctx.write(&buf[..n])?;
    }
}

/// Count argument for head/tail: `N`, `-N` (all but the last N for head),
/// or `+N` (starting at N for tail).
#[derive(Debug, Clone, Copy, PartialEq)]
enum Count {
    First(usize),
    AllButLast(usize),
    From(usize),
}

fn parse_count(value: &str) -> Option<Count> {
    if let Some(n) = value.strip_prefix('+') {
        return n.parse().ok().map(Count::From);
    }
    if let Some(n) = value.strip_prefix('-') {
        return n.parse().ok().map(Count::AllButLast);
    }
    value.parse().ok().map(Count::First)
}

/// Rewrite the obsolete `-5` form to `-n 5`.
fn expand_numeric_shorthand(args: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(args.len() + 1);
    for arg in args {
        let after_valued = out.last().is_some_and(|prev| prev == "-n" || prev == "-c");
        match arg.strip_prefix('-') {
            Some(n) if !after_valued && !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => {
                out.push("-n".to_string());
                out.push(n.to_string());
            }
            _ => out.push(arg.clone()),
        }
    }
    out
}

const HEAD_TAIL_SPEC: FlagSpec = FlagSpec {
    flags: "qv",
    valued: "nc",
    long: &[("lines", 'n'), ("bytes", 'c'), ("quiet", 'q'), ("verbose", 'v')],
};

fn head_or_tail(ctx: &UtilContext, name: &str, args: &[String]) -> io::Result<i32> {
    let opts = match parse_args(&expand_numeric_shorthand(args), &HEAD_TAIL_SPEC) {
        Ok(o) => o,
        Err(e) => return ctx.fail(name, e, 1),
    };
    let bytes = opts.value('c').is_some();
    let raw = opts.value('c').or(opts.value('n')).unwrap_or("10");
    let Some(count) = parse_count(raw) else {
        let what = if bytes { "bytes" } else { "lines" };
        return ctx.fail(name, format!("invalid number of {}: '{}'", what, raw), 1);
    };
    let tail = name == "tail";

    let operands = if opts.operands.is_empty() {
        vec!["-".to_string()]
    } else {
        opts.operands.clone()
    };
    let headers = (operands.len() > 1 || opts.has('v')) && !opts.has('q');
    let mut printed = false;
    let mut failed = false;
    for operand in &operands {
        let header = |printed: bool| -> io::Result<()> {
            if !headers {
                return Ok(());
            }
            let sep = if printed { "\n" } else { "" };
            let label = if operand == "-" { "standard input" } else { operand };
            ctx.out(&format!("{}==> {} <==\n", sep, label))
        };
        if let (Count::First(n), false, "-") = (count, tail, operand.as_str()) {
            header(printed)?;
            printed = true;
            head_stdin(ctx, n, bytes)?;
            continue;
        }
        let data = match ctx.read(operand) {
            Ok(data) => data,
            Err(e) => {
                ctx.warn_io(name, operand, &e)?;
                failed = true;
                continue;
            }
        };
        header(printed)?;
        printed = true;
        let selected: Vec<u8> = if bytes {
            select(&data, count, tail)
        } else {
            select(&split_lines(&data), count, tail).concat()
        };
        ctx.write(&selected)?;
    }
    Ok(i32::from(failed))
}

/// First `n` lines or bytes of stdin, without reading further than needed.
fn head_stdin(ctx: &UtilContext, n: usize, bytes: bool) -> io::Result<()> {
    let mut stdin = ctx.stdin();
    if bytes {
        let mut data = Vec::new();
        (&mut **stdin).take(n as u64).read_to_end(&mut data)?;
        return ctx.write(&data);
    }
    let mut reader = io::BufReader::new(&mut **stdin);
    let mut line = Vec::new();
    for _ in 0..n {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        ctx.write(&line)?;
    }
    Ok(())
}

fn select<T: Clone>(items: &[T], count: Count, tail: bool) -> Vec<T> {
    let len = items.len();
    let range = match (count, tail) {
        (Count::First(n), false) => 0..n.min(len),
        (Count::AllButLast(n), false) => 0..len.saturating_sub(n),
        (Count::From(n), false) => 0..n.min(len),
        (Count::First(n) | Count::AllButLast(n), true) => len.saturating_sub(n)..len,
        (Count::From(n), true) => n.saturating_sub(1).min(len)..len,
    };
    items[range].to_vec()
}

pub(super) fn head(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    head_or_tail(ctx, "head", args)
}

pub(super) fn tail(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    head_or_tail(ctx, "tail", args)
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    lines: usize,
    words: usize,
    chars: usize,
    bytes: usize,
}

fn count(data: &[u8]) -> Counts {
    let text = String::from_utf8_lossy(data);
    Counts {
        lines: data.iter().filter(|b| **b == b'\n').count(),
        words: text.split_whitespace().count(),
        chars: text.chars().count(),
        bytes: data.len(),
    }
}

pub(super) fn wc(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "lwcm",
        valued: "",
        long: &[("lines", 'l'), ("words", 'w'), ("bytes", 'c'), ("chars", 'm')],
    };
    let opts = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("wc", e, 1),
    };
    let any = ['l', 'w', 'c', 'm'].into_iter().any(|f| opts.has(f));
    let (lines, words, chars, bytes) = if any {
        (opts.has('l'), opts.has('w'), opts.has('m'), opts.has('c'))
    } else {
        (true, true, false, true)
    };

    let (inputs, failed) = gather(ctx, "wc", &opts.operands)?;
    let mut rows: Vec<(Vec<usize>, Option<String>)> = Vec::new();
    let mut total = Counts::default();
    for (label, data) in &inputs {
        let c = count(data);
        total.lines += c.lines;
        total.words += c.words;
        total.chars += c.chars;
        total.bytes += c.bytes;
        let name = (label != "-" || !opts.operands.is_empty()).then(|| label.clone());
        rows.push((columns(c, lines, words, chars, bytes), name));
    }
    if inputs.len() > 1 {
        rows.push((columns(total, lines, words, chars, bytes), Some("total".into())));
    }

    let single = rows.len() == 1 && rows[0].0.len() == 1;
    let width = if single {
        1
    } else {
        rows.iter()
            .flat_map(|(cols, _)| cols.iter())
            .map(|n| n.to_string().len())
            .max()
            .unwrap_or(1)
    };
    let mut out = String::new();
    for (cols, name) in rows {
        let mut fields: Vec<String> = cols.iter().map(|n| format!("{:>width$}", n)).collect();
        if let Some(name) = name {
            fields.push(name);
        }
        out.push_str(&fields.join(" "));
        out.push('\n');
    }
    ctx.out(&out)?;
    Ok(i32::from(failed))
}

fn columns(c: Counts, lines: bool, words: bool, chars: bool, bytes: bool) -> Vec<usize> {
    let mut cols = Vec::with_capacity(4);
    if lines {
        cols.push(c.lines);
    }
    if words {
        cols.push(c.words);
    }
    if chars {
        cols.push(c.chars);
    }
    if bytes {
        cols.push(c.bytes);
    }
    cols
}

/// Leading number of a line for `sort -n`; lines without one sort as 0.
fn numeric_key(line: &str) -> f64 {
    let s = line.trim_start();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map_or(s.len(), |(i, _)| i);
    s[..end].parse().unwrap_or(0.0)
}

pub(super) fn sort(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "rnuf",
        valued: "o",
        long: &[
            ("reverse", 'r'),
            ("numeric-sort", 'n'),
            ("unique", 'u'),
            ("ignore-case", 'f'),
            ("output", 'o'),
        ],
    };
    let opts = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("sort", e, 2),
    };

    let (inputs, failed) = gather(ctx, "sort", &opts.operands)?;
    if failed {
        return Ok(2);
    }
    let text: String = inputs
        .iter()
        .map(|(_, data)| {
            let mut s = String::from_utf8_lossy(data).into_owned();
            if !s.is_empty() && !s.ends_with('\n') {
                s.push('\n');
            }
            s
        })
        .collect();
    let mut lines: Vec<&str> = text.lines().collect();

    let fold = opts.has('f');
    let numeric = opts.has('n');
    let key_cmp = |a: &&str, b: &&str| -> Ordering {
        if numeric {
            numeric_key(a)
                .partial_cmp(&numeric_key(b))
                .unwrap_or(Ordering::Equal)
        } else if fold {
            a.to_lowercase().cmp(&b.to_lowercase())
        } else {
            a.cmp(b)
        }
    };
    lines.sort_by(|a, b| key_cmp(a, b).then_with(|| a.cmp(b)));
    if opts.has('r') {
        lines.reverse();
    }
    if opts.has('u') {
        lines.dedup_by(|a, b| key_cmp(&&**a, &&**b) == Ordering::Equal);
    }

    let mut out = lines.join("\n");
    if !lines.is_empty() {
        out.push('\n');
    }
    match opts.value('o') {
        Some(path) => {
            if let Err(e) = std::fs::write(ctx.path(path), out) {
                ctx.warn_io("sort", path, &e)?;
                return Ok(2);
            }
        }
        None => ctx.out(&out)?,
    }
    Ok(0)
}

pub(super) fn uniq(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "cdui",
        valued: "",
        long: &[
            ("count", 'c'),
            ("repeated", 'd'),
            ("unique", 'u'),
            ("ignore-case", 'i'),
        ],
    };
    let opts = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("uniq", e, 1),
    };
    if opts.operands.len() > 2 {
        return ctx
            .fail("uniq", format!("extra operand '{}'", opts.operands[2]), 1);
    }

    let input = opts.operands.first().map_or("-", String::as_str);
    let data = match ctx.read(input) {
        Ok(data) => data,
        Err(e) => {
            ctx.warn_io("uniq", input, &e)?;
            return Ok(1);
        }
    };
    let text = String::from_utf8_lossy(&data);

    let same = |a: &str, b: &str| {
        if opts.has('i') {
            a.to_lowercase() == b.to_lowercase()
        } else {
            a == b
        }
    };
    let mut groups: Vec<(&str, usize)> = Vec::new();
    for line in text.lines() {
        match groups.last_mut() {
            Some((first, n)) if same(first, line) => *n += 1,
            _ => groups.push((line, 1)),
        }
    }

    let mut out = String::new();
    for (line, n) in groups {
        if (opts.has('d') && n < 2) || (opts.has('u') && n > 1) {
            continue;
        }
        if opts.has('c') {
            out.push_str(&format!("{:>7} {}\n", n, line));
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }

    match opts.operands.get(1) {
        Some(path) => {
            if let Err(e) = std::fs::write(ctx.path(path), out) {
                ctx.warn_io("uniq", path, &e)?;
                return Ok(1);
            }
        }
        None => ctx.out(&out)?,
    }
    Ok(0)
}
