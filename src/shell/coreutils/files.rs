use std::fs::Metadata;
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};

use super::{FlagSpec, UtilContext, parse_args};
use crate::shell::io::describe_io_error;

/// Final path component per POSIX `basename`.
fn base_of(name: &str) -> &str {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        return if name.is_empty() { "" } else { "/" };
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Parent per POSIX `dirname`.
fn dir_of(name: &str) -> &str {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        return if name.is_empty() { "." } else { "/" };
    }
    match trimmed.rfind('/') {
        None => ".",
        Some(i) => {
            let parent = trimmed[..i].trim_end_matches('/');
            if parent.is_empty() { "/" } else { parent }
        }
    }
}

pub(super) fn basename(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "az",
        valued: "s",
        long: &[("multiple", 'a'), ("suffix", 's'), ("zero", 'z')],
    };
    let opts = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("basename", e, 1),
    };
    if opts.operands.is_empty() {
        return ctx.fail("basename", "missing operand", 1);
    }

    let multiple = opts.has('a') || opts.value('s').is_some();
    let (names, suffix): (Vec<&str>, Option<&str>) = if multiple {
        (
            opts.operands.iter().map(String::as_str).collect(),
            opts.value('s'),
        )
    } else {
        match opts.operands.as_slice() {
            [name] => (vec![name.as_str()], None),
            [name, suffix] => (vec![name.as_str()], Some(suffix.as_str())),
            operands => {
                let extra = operands.get(2).map_or("", String::as_str);
                return ctx
                    .fail("basename", format!("extra operand '{}'", extra), 1);
            }
        }
    };

    let end = if opts.has('z') { '\0' } else { '\n' };
    let mut out = String::new();
    for name in names {
        let mut base = base_of(name);
        if let Some(suffix) = suffix
            && base != suffix
            && let Some(stripped) = base.strip_suffix(suffix)
        {
            base = stripped;
        }
        out.push_str(base);
        out.push(end);
    }
    ctx.out(&out)?;
    Ok(0)
}

pub(super) fn dirname(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "z",
        valued: "",
        long: &[("zero", 'z')],
    };
    let opts = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("dirname", e, 1),
    };
    if opts.operands.is_empty() {
        return ctx.fail("dirname", "missing operand", 1);
    }
    let end = if opts.has('z') { '\0' } else { '\n' };
    let mut out = String::new();
    for name in &opts.operands {
        out.push_str(dir_of(name));
        out.push(end);
    }
    ctx.out(&out)?;
    Ok(0)
}

/// One clause of a symbolic mode such as `u+x` or `go=r`.
#[derive(Debug, PartialEq)]
struct ModeClause {
    who: u32,
    op: char,
    perms: u32,
    /// `X`: execute only for directories or already-executable files.
    cond_exec: bool,
}

#[derive(Debug, PartialEq)]
enum Mode {
    Octal(u32),
    Symbolic(Vec<ModeClause>),
}

fn parse_mode(spec: &str) -> Option<Mode> {
    if !spec.is_empty() && spec.chars().all(|c| c.is_digit(8)) {
        return u32::from_str_radix(spec, 8)
            .ok()
            .filter(|m| *m <= 0o7777)
            .map(Mode::Octal);
    }
    let mut clauses = Vec::new();
    for part in spec.split(',') {
        let mut chars = part.chars().peekable();
        let mut who = 0;
        while let Some(&c) = chars.peek() {
            who |= match c {
                'u' => 0o4700,
                'g' => 0o2070,
                'o' => 0o1007,
                'a' => 0o7777,
                _ => break,
            };
            chars.next();
        }
        if who == 0 {
            who = 0o7777;
        }
        let op = chars.next().filter(|c| matches!(c, '+' | '-' | '='))?;
        let mut perms = 0;
        let mut cond_exec = false;
        for c in chars {
            perms |= match c {
                'r' => 0o444,
                'w' => 0o222,
                'x' => 0o111,
                'X' => {
                    cond_exec = true;
                    0
                }
                's' => 0o6000,
                't' => 0o1000,
                _ => return None,
            };
        }
        clauses.push(ModeClause {
            who,
            op,
            perms,
            cond_exec,
        });
    }
    Some(Mode::Symbolic(clauses))
}

fn apply_mode(mode: &Mode, current: u32, is_dir: bool) -> u32 {
    match mode {
        Mode::Octal(m) => *m,
        Mode::Symbolic(clauses) => {
            let mut bits = current & 0o7777;
            for clause in clauses {
                let mut perms = clause.perms;
                if clause.cond_exec && (is_dir || bits & 0o111 != 0) {
                    perms |= 0o111;
                }
                let mask = perms & clause.who;
                match clause.op {
                    '+' => bits |= mask,
                    '-' => bits &= !mask,
                    _ => bits = (bits & !(clause.who & 0o777)) | mask,
                }
            }
            bits
        }
    }
}

pub(super) fn chmod(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "Rfv",
        valued: "",
        long: &[("recursive", 'R'), ("silent", 'f'), ("quiet", 'f')],
    };
    // Modes like `-w` look like flags; pull the mode out first.
    let mut rest = Vec::with_capacity(args.len());
    let mut mode_arg = None;
    for arg in args {
        if mode_arg.is_none() && !arg.starts_with("--") && parse_mode(arg).is_some() {
            mode_arg = Some(arg.clone());
            continue;
        }
        rest.push(arg.clone());
    }
    let opts = match parse_args(&rest, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("chmod", e, 1),
    };
    let Some(mode_arg) = mode_arg else {
        let msg = match opts.operands.first() {
            Some(m) => format!("invalid mode: '{}'", m),
            None => "missing operand".to_string(),
        };
        return ctx.fail("chmod", msg, 1);
    };
    let Some(mode) = parse_mode(&mode_arg) else {
        return ctx.fail("chmod", format!("invalid mode: '{}'", mode_arg), 1);
    };
    if opts.operands.is_empty() {
        return ctx
            .fail("chmod", format!("missing operand after '{}'", mode_arg), 1);
    }

    let mut status = 0;
    for operand in &opts.operands {
        let mut pending = vec![ctx.path(operand)];
        while let Some(path) = pending.pop() {
            let result = (|| -> io::Result<()> {
                let meta = std::fs::symlink_metadata(&path)?;
                if meta.file_type().is_symlink() {
                    return Ok(());
                }
                let bits = apply_mode(&mode, meta.permissions().mode(), meta.is_dir());
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(bits))?;
                if meta.is_dir() && opts.has('R') {
                    for entry in std::fs::read_dir(&path)? {
                        pending.push(entry?.path());
                    }
                }
                Ok(())
            })();
            if let Err(e) = result {
                if !opts.has('f') {
                    let shown = display_path(ctx, operand, &path);
                    ctx.warn("chmod", format!("cannot access '{}': {}", shown, describe_io_error(&e)))?;
                }
                status = 1;
            }
        }
    }
    Ok(status)
}

/// Operand-relative spelling of a path found while walking `operand`.
fn display_path(ctx: &UtilContext, operand: &str, path: &Path) -> String {
    match path.strip_prefix(ctx.path(operand)) {
        Ok(rel) if rel.as_os_str().is_empty() => operand.to_string(),
        Ok(rel) => Path::new(operand).join(rel).display().to_string(),
        Err(_) => path.display().to_string(),
    }
}

/// Copy a file or a whole tree. Symlinks are recreated, not followed.
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        let meta = std::fs::symlink_metadata(&from)?;
        if meta.is_dir() {
            match std::fs::create_dir(&to) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && to.is_dir() => {}
                Err(e) => return Err(e),
            }
            std::fs::set_permissions(&to, meta.permissions())?;
            for entry in std::fs::read_dir(&from)? {
                let entry = entry?;
                pending.push((entry.path(), to.join(entry.file_name())));
            }
        } else if meta.file_type().is_symlink() {
            let target = std::fs::read_link(&from)?;
            std::os::unix::fs::symlink(target, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

/// Where `src` lands: inside `dest` when it is a directory.
fn landing(src: &str, dest: &Path) -> PathBuf {
    match std::fs::metadata(dest) {
        Ok(meta) if meta.is_dir() => dest.join(base_of(src)),
        _ => dest.to_path_buf(),
    }
}

fn split_dest(operands: &[String]) -> Option<(&[String], &String)> {
    let (dest, sources) = operands.split_last()?;
    (!sources.is_empty()).then_some((sources, dest))
}

pub(super) fn cp(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "rRfapv",
        valued: "",
        long: &[("recursive", 'r'), ("force", 'f'), ("archive", 'a')],
    };
    let opts = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("cp", e, 1),
    };
    let Some((sources, dest)) = split_dest(&opts.operands) else {
        return ctx.fail("cp", "missing file operand", 1);
    };
    let dest_path = ctx.path(dest);
    if sources.len() > 1 && !dest_path.is_dir() {
        return ctx
            .fail("cp", format!("target '{}' is not a directory", dest), 1);
    }
    let recursive = opts.has('r') || opts.has('R') || opts.has('a');

    let mut status = 0;
    for src in sources {
        let src_path = ctx.path(src);
        let meta = match std::fs::metadata(&src_path) {
            Ok(meta) => meta,
            Err(e) => {
                ctx.warn("cp", format!("cannot stat '{}': {}", src, describe_io_error(&e)))?;
                status = 1;
                continue;
            }
        };
        if meta.is_dir() && !recursive {
            ctx.warn("cp", format!("-r not specified; omitting directory '{}'", src))?;
            status = 1;
            continue;
        }
        let target = landing(src, &dest_path);
        if meta.is_dir() && target.starts_with(&src_path) {
            ctx.warn(
                "cp",
                format!("cannot copy a directory, '{}', into itself, '{}'", src, dest),
            )?;
            status = 1;
            continue;
        }

        let mut result = copy_tree(&src_path, &target);
        if result.is_err() && opts.has('f') && !meta.is_dir() {
            let _ = std::fs::remove_file(&target);
            result = copy_tree(&src_path, &target);
        }
        if let Err(e) = result {
            ctx.warn("cp", format!("cannot copy '{}': {}", src, describe_io_error(&e)))?;
            status = 1;
        }
    }
    Ok(status)
}

pub(super) fn mv(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "fnv",
        valued: "",
        long: &[("force", 'f'), ("no-clobber", 'n')],
    };
    let opts = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("mv", e, 1),
    };
    let Some((sources, dest)) = split_dest(&opts.operands) else {
        return ctx.fail("mv", "missing file operand", 1);
    };
    let dest_path = ctx.path(dest);
    if sources.len() > 1 && !dest_path.is_dir() {
        return ctx
            .fail("mv", format!("target '{}' is not a directory", dest), 1);
    }

    let mut status = 0;
    for src in sources {
        let src_path = ctx.path(src);
        let target = landing(src, &dest_path);
        if opts.has('n') && std::fs::symlink_metadata(&target).is_ok() {
            continue;
        }
        let result = match std::fs::rename(&src_path, &target) {
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                match copy_tree(&src_path, &target) {
                    Ok(()) => remove_tree(&src_path),
                    Err(e) => Err(e),
                }
            }
            other => other,
        };
        if let Err(e) = result {
            ctx.warn(
                "mv",
                format!("cannot move '{}' to '{}': {}", src, dest, describe_io_error(&e)),
            )?;
            status = 1;
        }
    }
    Ok(status)
}

fn remove_tree(path: &Path) -> io::Result<()> {
    if std::fs::symlink_metadata(path)?.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

pub(super) fn rm(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "rRfdv",
        valued: "",
        long: &[("recursive", 'r'), ("force", 'f'), ("dir", 'd')],
    };
    let opts = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("rm", e, 1),
    };
    let force = opts.has('f');
    if opts.operands.is_empty() {
        return if force {
            Ok(0)
        } else {
            ctx.fail("rm", "missing operand", 1)
        };
    }
    let recursive = opts.has('r') || opts.has('R');

    let mut status = 0;
    for operand in &opts.operands {
        if matches!(base_of(operand), "." | "..") {
            ctx.warn(
                "rm",
                format!("refusing to remove '.' or '..' directory: skipping '{}'", operand),
            )?;
            status = 1;
            continue;
        }
        let path = ctx.path(operand);
        let meta = match std::fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if force && e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                ctx.warn("rm", format!("cannot remove '{}': {}", operand, describe_io_error(&e)))?;
                status = 1;
                continue;
            }
        };
        let result = if !meta.is_dir() {
            std::fs::remove_file(&path)
        } else if recursive {
            std::fs::remove_dir_all(&path)
        } else if opts.has('d') {
            std::fs::remove_dir(&path)
        } else {
            ctx.warn("rm", format!("cannot remove '{}': Is a directory", operand))?;
            status = 1;
            continue;
        };
        if let Err(e) = result {
            ctx.warn("rm", format!("cannot remove '{}': {}", operand, describe_io_error(&e)))?;
            status = 1;
        }
    }
    Ok(status)
}

pub(super) fn rmdir(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "pv",
        valued: "",
        long: &[("parents", 'p')],
    };
    let opts = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("rmdir", e, 1),
    };
    if opts.operands.is_empty() {
        return ctx.fail("rmdir", "missing operand", 1);
    }

    let mut status = 0;
    for operand in &opts.operands {
        let mut current = operand.trim_end_matches('/').to_string();
        loop {
            if let Err(e) = std::fs::remove_dir(ctx.path(&current)) {
                ctx.warn(
                    "rmdir",
                    format!("failed to remove '{}': {}", current, describe_io_error(&e)),
                )?;
                status = 1;
                break;
            }
            if !opts.has('p') {
                break;
            }
            let parent = dir_of(&current);
            if parent == "." || parent == "/" {
                break;
            }
            current = parent.to_string();
        }
    }
    Ok(status)
}

pub(super) fn mkdir(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "pv",
        valued: "m",
        long: &[("parents", 'p'), ("mode", 'm')],
    };
    let opts = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("mkdir", e, 1),
    };
    if opts.operands.is_empty() {
        return ctx.fail("mkdir", "missing operand", 1);
    }
    let mode = match opts.value('m') {
        None => None,
        Some(m) => match parse_mode(m) {
            Some(mode) => Some(apply_mode(&mode, 0o777, true)),
            None => return ctx.fail("mkdir", format!("invalid mode '{}'", m), 1),
        },
    };

    let mut status = 0;
    for operand in &opts.operands {
        let path = ctx.path(operand);
        let result = if opts.has('p') {
            std::fs::create_dir_all(&path)
        } else {
            std::fs::create_dir(&path)
        };
        let result = match (result, mode) {
            (Ok(()), Some(bits)) => {
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(bits))
            }
            (result, _) => result,
        };
        if let Err(e) = result {
            ctx.warn(
                "mkdir",
                format!("cannot create directory '{}': {}", operand, describe_io_error(&e)),
            )?;
            status = 1;
        }
    }
    Ok(status)
}

const MKTEMP_ATTEMPTS: usize = 16;

/// Replace the trailing run of `X`s with random characters.
fn fill_template(template: &str) -> Option<String> {
    let stem = template.trim_end_matches('X');
    let count = template.len() - stem.len();
    if count < 3 {
        return None;
    }
    let mut random = String::with_capacity(count);
    while random.len() < count {
        random.push_str(&uuid::Uuid::new_v4().simple().to_string());
    }
    random.truncate(count);
    Some(format!("{}{}", stem, random))
}

pub(super) fn mktemp(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "dqtu",
        valued: "p",
        long: &[
            ("directory", 'd'),
            ("quiet", 'q'),
            ("dry-run", 'u'),
            ("tmpdir", 'p'),
        ],
    };
    let opts = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("mktemp", e, 1),
    };
    if opts.operands.len() > 1 {
        return ctx.fail("mktemp", "too many templates", 1);
    }
    let template = opts
        .operands
        .first()
        .cloned()
        .unwrap_or_else(|| "tmp.XXXXXXXXXX".to_string());
    let in_tmpdir = opts.operands.is_empty() || opts.has('t') || opts.value('p').is_some();
    let base = if in_tmpdir {
        let dir = opts
            .value('p')
            .filter(|p| !p.is_empty())
            .or_else(|| ctx.var("TMPDIR").filter(|t| !t.is_empty()))
            .unwrap_or("/tmp");
        ctx.path(dir)
    } else {
        ctx.cwd.clone()
    };

    for _ in 0..MKTEMP_ATTEMPTS {
        let Some(name) = fill_template(&template) else {
            return ctx
                .fail("mktemp", format!("too few X's in template '{}'", template), 1);
        };
        let path = base.join(&name);
        let result = if opts.has('u') {
            Ok(())
        } else if opts.has('d') {
            std::fs::DirBuilder::new().mode(0o700).create(&path)
        } else {
            std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&path)
                .map(drop)
        };
        match result {
            Ok(()) => {
                let shown = if in_tmpdir {
                    path.display().to_string()
                } else {
                    name
                };
                ctx.out(&format!("{}\n", shown))?;
                return Ok(0);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                if !opts.has('q') {
                    let what = if opts.has('d') { "directory" } else { "file" };
                    ctx.warn(
                        "mktemp",
                        format!(
                            "failed to create {} via template '{}': {}",
                            what,
                            template,
                            describe_io_error(&e)
                        ),
                    )?;
                }
                return Ok(1);
            }
        }
    }
    ctx.fail("mktemp", format!("failed to create file via template '{}'", template), 1)
}

pub(super) fn touch(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "cam",
        valued: "",
        long: &[("no-create", 'c')],
    };
    let opts = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("touch", e, 1),
    };
    if opts.operands.is_empty() {
        return ctx.fail("touch", "missing file operand", 1);
    }

    let mut status = 0;
    for operand in &opts.operands {
        let path = ctx.path(operand);
        let result = match std::fs::File::open(&path) {
            Ok(file) => file.set_modified(SystemTime::now()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if opts.has('c') {
                    continue;
                }
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&path)
                    .map(drop)
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            ctx.warn("touch", format!("cannot touch '{}': {}", operand, describe_io_error(&e)))?;
            status = 1;
        }
    }
    Ok(status)
}

struct LsOptions {
    all: bool,
    almost_all: bool,
    long: bool,
    directory: bool,
}

struct Entry {
    name: String,
    path: PathBuf,
    meta: Metadata,
}

/// `drwxr-xr-x` style rendering.
fn mode_string(meta: &Metadata) -> String {
    let ft = meta.file_type();
    let kind = if ft.is_dir() {
        'd'
    } else if ft.is_symlink() {
        'l'
    } else if ft.is_file() {
        '-'
    } else if ft.is_char_device() {
        'c'
    } else if ft.is_block_device() {
        'b'
    } else if ft.is_fifo() {
        'p'
    } else {
        's'
    };
    let mode = meta.mode();
    let mut s = String::with_capacity(10);
    s.push(kind);
    for (shift, special, set, unset) in [(6, 0o4000, 's', 'S'), (3, 0o2000, 's', 'S'), (0, 0o1000, 't', 'T')] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 4 != 0 { 'r' } else { '-' });
        s.push(if bits & 2 != 0 { 'w' } else { '-' });
        s.push(match (bits & 1 != 0, mode & special != 0) {
            (true, true) => set,
            (false, true) => unset,
            (true, false) => 'x',
            (false, false) => '-',
        });
    }
    s
}

fn mtime_string(meta: &Metadata) -> String {
    let Ok(modified) = meta.modified() else {
        return "?".into();
    };
    let when: DateTime<Local> = modified.into();
    let recent = SystemTime::now()
        .duration_since(modified)
        .map_or(true, |age| age < Duration::from_secs(180 * 24 * 3600));
    if recent {
        when.format("%b %e %H:%M").to_string()
    } else {
        when.format("%b %e  %Y").to_string()
    }
}

fn render_entries(entries: &[Entry], opts: &LsOptions) -> String {
    let mut out = String::new();
    if !opts.long {
        for entry in entries {
            out.push_str(&entry.name);
            out.push('\n');
        }
        return out;
    }
    let size_width = entries
        .iter()
        .map(|e| e.meta.len().to_string().len())
        .max()
        .unwrap_or(1);
    let link_width = entries
        .iter()
        .map(|e| e.meta.nlink().to_string().len())
        .max()
        .unwrap_or(1);
    for entry in entries {
        let mut name = entry.name.clone();
        if entry.meta.file_type().is_symlink()
            && let Ok(target) = std::fs::read_link(&entry.path)
        {
            name = format!("{} -> {}", name, target.display());
        }
        out.push_str(&format!(
            "{} {:>lw$} {} {} {:>sw$} {} {}\n",
            mode_string(&entry.meta),
            entry.meta.nlink(),
            entry.meta.uid(),
            entry.meta.gid(),
            entry.meta.len(),
            mtime_string(&entry.meta),
            name,
            lw = link_width,
            sw = size_width,
        ));
    }
    out
}

fn read_listing(dir: &Path, opts: &LsOptions) -> io::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    if opts.all {
        for dot in [".", ".."] {
            let path = dir.join(dot);
            let meta = std::fs::symlink_metadata(&path)?;
            entries.push(Entry {
                name: dot.to_string(),
                path,
                meta,
            });
        }
    }
    for item in std::fs::read_dir(dir)? {
        let item = item?;
        let name = item.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') && !opts.all && !opts.almost_all {
            continue;
        }
        let path = item.path();
        let meta = std::fs::symlink_metadata(&path)?;
        entries.push(Entry { name, path, meta });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

pub(super) fn ls(ctx: &UtilContext, args: &[String]) -> io::Result<i32> {
    let spec = FlagSpec {
        flags: "aAld1",
        valued: "",
        long: &[("all", 'a'), ("almost-all", 'A'), ("directory", 'd')],
    };
    let parsed = match parse_args(args, &spec) {
        Ok(o) => o,
        Err(e) => return ctx.fail("ls", e, 2),
    };
    let opts = LsOptions {
        all: parsed.has('a'),
        almost_all: parsed.has('A'),
        long: parsed.has('l'),
        directory: parsed.has('d'),
    };
    let mut operands = parsed.operands.clone();
    if operands.is_empty() {
        operands.push(".".to_string());
    }
    operands.sort();

    let mut status = 0;
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for operand in &operands {
        let path = ctx.path(operand);
        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) => {
                ctx.warn(
                    "ls",
                    format!("cannot access '{}': {}", operand, describe_io_error(&e)),
                )?;
                status = 2;
                continue;
            }
        };
        if meta.is_dir() && !opts.directory {
            dirs.push((operand.clone(), path));
        } else {
            let meta = std::fs::symlink_metadata(&path).unwrap_or(meta);
            files.push(Entry {
                name: operand.clone(),
                path,
                meta,
            });
        }
    }

    let mut out = render_entries(&files, &opts);
    let headers = dirs.len() + files.len() > 1 || status != 0;
    for (i, (operand, path)) in dirs.iter().enumerate() {
        let entries = match read_listing(path, &opts) {
            Ok(entries) => entries,
            Err(e) => {
                ctx.warn(
                    "ls",
                    format!("cannot open directory '{}': {}", operand, describe_io_error(&e)),
                )?;
                status = 2;
                continue;
            }
        };
        if i > 0 || !files.is_empty() {
            out.push('\n');
        }
        if headers {
            out.push_str(&format!("{}:\n", operand));
        }
        if opts.long {
            let blocks: u64 = entries.iter().map(|e| e.meta.blocks()).sum();
            out.push_str(&format!("total {}\n", blocks / 2));
        }
        out.push_str(&render_entries(&entries, &opts));
    }
    ctx.out(&out)?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::super::testing::util;
    use super::*;

    #[test]
    fn test_base_and_dir_names() {
        assert_eq!(base_of("/usr/lib/"), "lib");
        assert_eq!(base_of("///"), "/");
        assert_eq!(base_of("file"), "file");
        assert_eq!(dir_of("/usr/lib/"), "/usr");
        assert_eq!(dir_of("file"), ".");
        assert_eq!(dir_of("/file"), "/");
        assert_eq!(dir_of("a//b"), "a");
    }

    #[test]
    fn test_basename_suffix() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(util(dir.path(), "basename", "/a/b.txt .txt", None).1, "b\n");
        assert_eq!(util(dir.path(), "basename", "-s .rs a.rs b.rs", None).1, "a\nb\n");
        assert_eq!(util(dir.path(), "basename", ".rs .rs", None).1, ".rs\n");
        assert_eq!(util(dir.path(), "dirname", "a/b /c", None).1, "a\n/\n");
    }

    #[test]
    fn test_symbolic_modes() {
        let mode = parse_mode("u+x,go-w").unwrap();
        assert_eq!(apply_mode(&mode, 0o666, false), 0o744);
        let mode = parse_mode("a=r").unwrap();
        assert_eq!(apply_mode(&mode, 0o755, false), 0o444);
        let mode = parse_mode("+X").unwrap();
        assert_eq!(apply_mode(&mode, 0o644, true), 0o755);
        assert_eq!(apply_mode(&mode, 0o644, false), 0o644);
        assert_eq!(parse_mode("755"), Some(Mode::Octal(0o755)));
        assert!(parse_mode("u+q").is_none());
    }

    #[test]
    fn test_chmod_octal_and_symbolic() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, "").unwrap();

        assert_eq!(util(dir.path(), "chmod", "600 f", None).0, 0);
        assert_eq!(std::fs::metadata(&file).unwrap().permissions().mode() & 0o777, 0o600);
        assert_eq!(util(dir.path(), "chmod", "-w f", None).0, 0);
        assert_eq!(std::fs::metadata(&file).unwrap().permissions().mode() & 0o777, 0o400);

        let (status, _, err) = util(dir.path(), "chmod", "644 missing", None);
        assert_eq!(status, 1);
        assert!(err.starts_with("chmod: cannot access 'missing': "));
    }

    #[test]
    fn test_cp_file_and_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/nested/f"), "data").unwrap();
        std::fs::write(dir.path().join("a"), "A").unwrap();

        assert_eq!(util(dir.path(), "cp", "a b", None).0, 0);
        assert_eq!(std::fs::read_to_string(dir.path().join("b")).unwrap(), "A");

        let (status, _, err) = util(dir.path(), "cp", "src dst", None);
        assert_eq!(status, 1);
        assert_eq!(err, "cp: -r not specified; omitting directory 'src'\n");

        assert_eq!(util(dir.path(), "cp", "-r src dst", None).0, 0);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("dst/nested/f")).unwrap(),
            "data"
        );

        assert_eq!(util(dir.path(), "cp", "a b dst", None).0, 0);
        assert!(dir.path().join("dst/a").exists() && dir.path().join("dst/b").exists());
    }

    #[test]
    fn test_mv_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        std::fs::write(dir.path().join("f"), "x").unwrap();

        assert_eq!(util(dir.path(), "mv", "f d", None).0, 0);
        assert!(!dir.path().join("f").exists());
        assert!(dir.path().join("d/f").exists());

        let (status, _, err) = util(dir.path(), "mv", "nope d", None);
        assert_eq!(status, 1);
        assert!(err.starts_with("mv: cannot move 'nope' to 'd': "));
    }

    #[test]
    fn test_rm_rules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("d/e")).unwrap();
        std::fs::write(dir.path().join("f"), "").unwrap();

        let (status, _, err) = util(dir.path(), "rm", "d", None);
        assert_eq!(status, 1);
        assert_eq!(err, "rm: cannot remove 'd': Is a directory\n");

        assert_eq!(util(dir.path(), "rm", "-f missing", None).0, 0);
        assert_eq!(util(dir.path(), "rm", "missing", None).0, 1);
        assert_eq!(util(dir.path(), "rm", "-r d f", None).0, 0);
        assert!(!dir.path().join("d").exists() && !dir.path().join("f").exists());

        let (status, _, err) = util(dir.path(), "rm", "-rf .", None);
        assert_eq!(status, 1);
        assert!(err.contains("refusing to remove"));
    }

    #[test]
    fn test_mkdir_and_rmdir_parents() {
        let dir = tempfile::tempdir().unwrap();
        let (status, _, err) = util(dir.path(), "mkdir", "a/b", None);
        assert_eq!(status, 1);
        assert!(err.starts_with("mkdir: cannot create directory 'a/b': "));

        assert_eq!(util(dir.path(), "mkdir", "-p -m 700 a/b/c", None).0, 0);
        let mode = std::fs::metadata(dir.path().join("a/b/c")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        assert_eq!(util(dir.path(), "rmdir", "-p a/b/c", None).0, 0);
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn test_mktemp_creates_unique_paths() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().to_string_lossy().to_string();

        let (status, out, _) = util(dir.path(), "mktemp", &format!("-p {}", tmp), None);
        assert_eq!(status, 0);
        let path = PathBuf::from(out.trim());
        assert!(path.is_file());
        assert!(path.starts_with(dir.path()));

        let (status, out, _) = util(dir.path(), "mktemp", "-d work.XXXX", None);
        assert_eq!(status, 0);
        assert!(out.starts_with("work."));
        assert!(dir.path().join(out.trim()).is_dir());

        let (status, _, err) = util(dir.path(), "mktemp", "bad.XX", None);
        assert_eq!(status, 1);
        assert_eq!(err, "mktemp: too few X's in template 'bad.XX'\n");
    }

    #[test]
    fn test_touch_creates_and_updates() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(util(dir.path(), "touch", "new", None).0, 0);
        assert!(dir.path().join("new").is_file());

        assert_eq!(util(dir.path(), "touch", "-c other", None).0, 0);
        assert!(!dir.path().join("other").exists());

        let old = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(dir.path().join("new"))
            .unwrap()
            .set_modified(old)
            .unwrap();
        util(dir.path(), "touch", "new", None);
        let modified = std::fs::metadata(dir.path().join("new")).unwrap().modified().unwrap();
        assert!(modified > old + Duration::from_secs(60));
    }

    #[test]
    fn test_ls_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b"), "12345").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();
        std::fs::write(dir.path().join("sub/inner"), "").unwrap();

        assert_eq!(util(dir.path(), "ls", "", None).1, "b\nsub\n");
        assert_eq!(util(dir.path(), "ls", "-A", None).1, ".hidden\nb\nsub\n");
        assert_eq!(util(dir.path(), "ls", "-a", None).1, ".\n..\n.hidden\nb\nsub\n");
        assert_eq!(util(dir.path(), "ls", "b sub", None).1, "b\n\nsub:\ninner\n");
        assert_eq!(util(dir.path(), "ls", "-d sub", None).1, "sub\n");

        let (_, out, _) = util(dir.path(), "ls", "-l b", None);
        assert!(out.starts_with("-rw"));
        assert!(out.contains(" 5 "));
        assert!(out.trim_end().ends_with(" b"));

        let (status, _, err) = util(dir.path(), "ls", "missing", None);
        assert_eq!(status, 2);
        assert!(err.starts_with("ls: cannot access 'missing': "));
    }
}
