//! Static pass over a command string before it runs.
//!
//! Parses with tree-sitter-bash and lists every simple command together with
//! its words, noting which words are fixed text and which need expansion at
//! run time. The interceptor chain decides on these before the engine sees
//! the source.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::{Mutex, OnceLock};

use tree_sitter::{Node, Parser};

use super::error::ShellError;

/// Lazy-initialized tree-sitter bash parser
static BASH_PARSER: OnceLock<Option<Mutex<Parser>>> = OnceLock::new();

fn bash_parser() -> Result<&'static Mutex<Parser>, ShellError> {
    BASH_PARSER
        .get_or_init(|| {
            let mut parser = Parser::new();
            let lang: tree_sitter::Language = tree_sitter_bash::LANGUAGE.into();
            parser.set_language(&lang).ok()?;
            Some(Mutex::new(parser))
        })
        .as_ref()
        .ok_or_else(|| ShellError::Parse("failed to load bash grammar".into()))
}

/// One word of a command as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Word {
    /// Fixed text; the value after quote removal.
    Literal(String),
    /// Expanded at run time; the source text.
    Dynamic(String),
}

impl Word {
    pub fn literal(&self) -> Option<&str> {
        match self {
            Word::Literal(s) => Some(s),
            Word::Dynamic(_) => None,
        }
    }

    /// The literal value, or the source text of a dynamic word.
    pub fn text(&self) -> &str {
        match self {
            Word::Literal(s) | Word::Dynamic(s) => s,
        }
    }
}

/// A simple command that names a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSite {
    pub words: Vec<Word>,
    /// Source bytes of the command name.
    pub name_span: Range<usize>,
}

#[derive(Debug, Default)]
pub struct Analysis {
    /// In source order, including commands inside substitutions and bodies.
    pub commands: Vec<CommandSite>,
    /// Functions defined anywhere in the source.
    pub functions: HashSet<String>,
}

/// Parse `source` and collect its commands. Syntax errors are reported with
/// the line of the first offending token.
pub fn analyze(source: &str) -> Result<Analysis, ShellError> {
    let tree = {
        let mut parser = bash_parser()?.lock().unwrap_or_else(|e| e.into_inner());
        parser
            .parse(source, None)
            .ok_or_else(|| ShellError::Parse("parser returned no tree".into()))?
    };

    let root = tree.root_node();
    if root.has_error() {
        return Err(ShellError::Parse(describe_error(root, source)));
    }

    let mut analysis = Analysis::default();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "command" => analysis.commands.extend(command_site(node, source)),
            "function_definition" => {
                if let Some(name) = node.child_by_field_name("name") {
                    analysis.functions.insert(source[name.byte_range()].to_string());
                }
            }
            _ => {}
        }
        let mut kids = children(node);
        kids.reverse();
        stack.extend(kids);
    }
    Ok(analysis)
}

fn describe_error(root: Node<'_>, src: &str) -> String {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let line = node.start_position().row + 1;
        if node.is_missing() {
            return format!("line {}: missing `{}`", line, node.kind());
        }
        if node.is_error() {
            let text = src[node.byte_range()].lines().next().unwrap_or("").trim();
            return format!("line {}: unexpected `{}`", line, text);
        }
        let mut kids = children(node);
        kids.reverse();
        stack.extend(kids);
    }
    "syntax error".to_string()
}

fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

fn command_site(node: Node<'_>, src: &str) -> Option<CommandSite> {
    let name = node.child_by_field_name("name")?;
    let name_word = name.named_child(0).unwrap_or(name);
    let mut words = vec![word(name_word, src)];
    let mut cursor = node.walk();
    words.extend(
        node.children_by_field_name("argument", &mut cursor)
            .map(|arg| word(arg, src)),
    );
    Some(CommandSite {
        words,
        name_span: name.byte_range(),
    })
}

fn word(node: Node<'_>, src: &str) -> Word {
    match literal_value(node, src) {
        Some(value) => Word::Literal(value),
        None => Word::Dynamic(src[node.byte_range()].to_string()),
    }
}

/// Value of a word that needs no expansion; `None` if it does.
fn literal_value(node: Node<'_>, src: &str) -> Option<String> {
    let raw = &src[node.byte_range()];
    match node.kind() {
        "number" => Some(raw.to_string()),
        "word" => {
            // Globs, braces, tildes and escapes left for the engine.
            if raw.contains(['*', '?', '[', '{', '~', '$', '`']) {
                return None;
            }
            Some(unescape_bare(raw))
        }
        "raw_string" => raw
            .strip_prefix('\'')
            .and_then(|r| r.strip_suffix('\''))
            .map(str::to_string),
        "string" => {
            let mut cursor = node.walk();
            if node
                .named_children(&mut cursor)
                .any(|c| c.kind() != "string_content")
            {
                return None;
            }
            let inner = raw.strip_prefix('"')?.strip_suffix('"')?;
            Some(unescape_double(inner))
        }
        "concatenation" => {
            let mut value = String::new();
            let mut end = node.start_byte();
            for part in children(node) {
                // Bytes not covered by a part mean an expansion token.
                if part.start_byte() != end || !part.is_named() {
                    return None;
                }
                value.push_str(&literal_value(part, src)?);
                end = part.end_byte();
            }
            (end == node.end_byte()).then_some(value)
        }
        _ => None,
    }
}

/// Quote removal outside quotes: a backslash keeps the next character.
fn unescape_bare(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\n') | None => {}
                Some(next) => out.push(next),
            },
            _ => out.push(c),
        }
    }
    out
}

/// Inside double quotes a backslash only escapes `$`, `` ` ``, `"`, `\` and newline.
fn unescape_double(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\'
            && let Some(&next) = chars.peek()
            && matches!(next, '$' | '`' | '"' | '\\' | '\n')
        {
            chars.next();
            if next != '\n' {
                out.push(next);
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// True for a valid shell variable name.
pub(crate) fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Quote `s` so the shell reads it back as one literal word.
pub(crate) fn quote(s: &str) -> String {
    let plain = |b: u8| b.is_ascii_alphanumeric() || b"-_./=:@%+,".contains(&b);
    if !s.is_empty() && s.bytes().all(plain) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}
