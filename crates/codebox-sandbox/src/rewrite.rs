//! Source rewriter.
//!
//! Normalises a script into something the execution host can run as a plain
//! script: module syntax is erased, a default-exported function becomes a
//! self-invoking expression, and (when the profile says so) TypeScript syntax
//! is stripped on a best-effort basis.
//!
//! Every rule re-masks the current text, finds its constructs on the masked
//! copy and edits the original by byte range, so string, regex, template and
//! comment content is never touched. Erased statements leave their line
//! breaks behind to keep runtime line numbers aligned with the submission.

use std::fmt;
use std::ops::{Deref, Range};
use std::sync::LazyLock;

use regex::Regex;

use crate::classify::{matching_bracket, type_continues, type_syntax_sites, SyntaxProfile};
use crate::mask::{mask, MaskedSource};

/// A script ready for the execution host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedScript(String);

impl TransformedScript {
    /// Wrap script text that is already runnable as-is.
    pub fn new(script: impl Into<String>) -> Self {
        Self(script.into())
    }

    /// The script text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the wrapper and return the script text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for TransformedScript {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransformedScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A byte-range replacement on the current text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    range: Range<usize>,
    replacement: String,
}

impl Edit {
    fn replace(range: Range<usize>, replacement: &str) -> Self {
        Self {
            range,
            replacement: replacement.to_string(),
        }
    }

    fn insert(at: usize, text: &str) -> Self {
        Self::replace(at..at, text)
    }

    /// Remove `range`, keeping only its line breaks.
    fn erase(text: &str, range: Range<usize>) -> Self {
        let replacement = text
            .get(range.clone())
            .unwrap_or("")
            .chars()
            .filter(|c| matches!(c, '\n' | '\r'))
            .collect();
        Self { range, replacement }
    }
}

type Rule = fn(&str, &MaskedSource) -> Vec<Edit>;

/// Module normalisation, applied to every script.
const MODULE_RULES: &[(&str, Rule)] = &[
    ("imports", erase_imports),
    ("default-export", normalize_default_export),
    ("named-exports", strip_named_exports),
];

/// TypeScript stripping, applied when the profile reports TypeScript.
const TYPE_RULES: &[(&str, Rule)] = &[
    ("type-declarations", erase_type_declarations),
    ("type-syntax", strip_type_syntax),
];

static IMPORT_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"(?m)^[ \t]*(import(?:\s+type)?\s*(?:[\w$*{][^;'"]*?\s*from\s*)?['"][^'"\r\n]*['"][ \t]*;?)"#,
    )
});

static DEFAULT_EXPORT_HEAD: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\bexport\s+default\s+"));

static FUNCTION_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^(?:async\s+)?function\b\s*\*?\s*(?:[A-Za-z_$][\w$]*)?\s*(?:<[^(]*>)?\s*\(")
});

static SELF_INVOKING_HEAD: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^\s*\(\s*(?:async\s+)?function\b"));

static SELF_INVOKING_TAIL: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\)\s*\(\s*\)\s*;?\s*$"));

static EXPORT_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"\b(export\s+)(?:declare\s+|abstract\s+)?(?:const|let|var|function|async|class|interface|enum|namespace)\b|\b(export\s+)type\s+[A-Za-z_$]",
    )
});

static EXPORT_LIST: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"\bexport\s*(?:type\s*)?\{[^}]*\}(?:\s*from\s*['"][^'"\r\n]*['"])?[ \t]*;?"#,
    )
});

static EXPORT_STAR: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"\bexport\s*\*\s*(?:as\s+[A-Za-z_$][\w$]*\s*)?from\s*['"][^'"\r\n]*['"][ \t]*;?"#,
    )
});

static INTERFACE_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"\b(?:declare\s+)?interface\s+[A-Za-z_$][\w$]*\s*(?:<[^{]*?>\s*)?(?:extends\s+[^{;]+?)?\{",
    )
});

static TYPE_ALIAS_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"\b(?:declare\s+)?type\s+[A-Za-z_$][\w$]*\s*(?:<[^=;{}]*>\s*)?=")
});

static AMBIENT_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"\bdeclare\s+(?:const|let|var|function|class|module|namespace|global|enum|abstract)\b",
    )
});

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => panic!("invalid rewrite pattern {pattern:?}: {e}"),
    }
}

/// Rewrite `source` into a runnable script. Total: constructs no rule
/// recognises are left in place.
pub fn rewrite(source: &str, profile: &SyntaxProfile) -> TransformedScript {
    let mut text = source.to_string();
    text = apply_rules(text, MODULE_RULES);
    if profile.has_type_script {
        text = apply_rules(text, TYPE_RULES);
    }
    TransformedScript(text)
}

fn apply_rules(mut text: String, rules: &[(&str, Rule)]) -> String {
    for (name, rule) in rules {
        let masked = mask(&text);
        let edits = rule(&text, &masked);
        if edits.is_empty() {
            continue;
        }
        tracing::debug!(rule = *name, edits = edits.len(), "applied rewrite rule");
        text = apply_edits(&text, edits);
    }
    text
}

/// Apply non-overlapping edits. An edit that overlaps an earlier one is
/// dropped.
fn apply_edits(text: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| (e.range.start, e.range.end));
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for edit in edits {
        let start = floor_char_boundary(text, edit.range.start);
        let end = ceil_char_boundary(text, edit.range.end.max(start));
        if start < cursor {
            continue;
        }
        out.push_str(&text[cursor..start]);
        out.push_str(&edit.replacement);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

fn floor_char_boundary(text: &str, mut i: usize) -> usize {
    i = i.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(text: &str, mut i: usize) -> usize {
    i = i.min(text.len());
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// `true` when the match at `start` is a member access such as `obj.export`.
fn is_member(bytes: &[u8], start: usize) -> bool {
    start > 0 && matches!(bytes[start - 1], b'.' | b'$')
}

fn erase_imports(text: &str, masked: &MaskedSource) -> Vec<Edit> {
    IMPORT_DECLARATION
        .captures_iter(masked)
        .filter_map(|caps| caps.get(1))
        .map(|statement| Edit::erase(text, statement.range()))
        .collect()
}

/// Whether the whole script is already a self-invoking function expression.
fn is_self_invoking(masked: &str) -> bool {
    SELF_INVOKING_HEAD.is_match(masked) && SELF_INVOKING_TAIL.is_match(masked)
}

fn normalize_default_export(text: &str, masked: &MaskedSource) -> Vec<Edit> {
    let bytes = masked.as_bytes();
    let guarded = is_self_invoking(masked);
    let mut edits = Vec::new();

    for head in DEFAULT_EXPORT_HEAD.find_iter(masked) {
        if is_member(bytes, head.start()) {
            continue;
        }
        let rest_start = head.end();
        let rest = &masked[rest_start..];

        if let Some(function) = FUNCTION_HEAD.find(rest) {
            if let Some(end) = function_end(bytes, rest_start + function.end() - 1) {
                edits.push(Edit::replace(head.range(), "("));
                edits.push(Edit::insert(end, if guarded { ")" } else { ")()" }));
                continue;
            }
        } else if rest.starts_with('{') {
            // An object literal would otherwise parse as a block statement.
            if let Some(close) = matching_bracket(bytes, rest_start) {
                edits.push(Edit::replace(head.range(), "("));
                edits.push(Edit::insert(close + 1, ")"));
                continue;
            }
        }

        // Classes and plain expressions only lose the keywords.
        edits.push(Edit::erase(text, head.range()));
    }
    edits
}

/// Byte index just past the body of the function whose parameter list opens
/// at `open_paren`.
fn function_end(bytes: &[u8], open_paren: usize) -> Option<usize> {
    let close_paren = matching_bracket(bytes, open_paren)?;
    let body_open = bytes
        .iter()
        .enumerate()
        .skip(close_paren + 1)
        .find(|(_, &b)| matches!(b, b'{' | b';' | b'}'))
        .and_then(|(i, &b)| (b == b'{').then_some(i))?;
    let body_close = matching_bracket(bytes, body_open)?;
    Some(body_close + 1)
}

fn strip_named_exports(text: &str, masked: &MaskedSource) -> Vec<Edit> {
    let bytes = masked.as_bytes();
    let mut edits = Vec::new();

    for caps in EXPORT_DECLARATION.captures_iter(masked) {
        let Some(keyword) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        if !is_member(bytes, keyword.start()) {
            edits.push(Edit::erase(text, keyword.range()));
        }
    }
    for statement in EXPORT_LIST
        .find_iter(masked)
        .chain(EXPORT_STAR.find_iter(masked))
    {
        if !is_member(bytes, statement.start()) {
            edits.push(Edit::erase(text, statement.range()));
        }
    }
    edits
}

fn erase_type_declarations(text: &str, masked: &MaskedSource) -> Vec<Edit> {
    let bytes = masked.as_bytes();
    let mut edits = Vec::new();

    for m in INTERFACE_DECLARATION.find_iter(masked) {
        if is_member(bytes, m.start()) {
            continue;
        }
        if let Some(close) = matching_bracket(bytes, m.end() - 1) {
            let mut end = close + 1;
            if bytes.get(end) == Some(&b';') {
                end += 1;
            }
            edits.push(Edit::erase(text, m.start()..end));
        }
    }

    for m in TYPE_ALIAS_DECLARATION.find_iter(masked) {
        // `type X == y` / `type X => y` are not aliases.
        if is_member(bytes, m.start()) || matches!(bytes.get(m.end()), Some(b'=' | b'>')) {
            continue;
        }
        edits.push(Edit::erase(text, m.start()..statement_end(bytes, m.end())));
    }

    for m in AMBIENT_DECLARATION.find_iter(masked) {
        if !is_member(bytes, m.start()) {
            edits.push(Edit::erase(text, m.start()..statement_end(bytes, m.end())));
        }
    }
    edits
}

/// End of the declaration statement whose body starts at `from`: past a
/// top-level `;`, or at a line break that does not continue the statement.
fn statement_end(bytes: &[u8], from: usize) -> usize {
    let mut depth: usize = 0;
    let mut seen = false;
    let mut i = from;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'=' if bytes.get(i + 1) == Some(&b'>') => {
                i += 2;
                seen = true;
                continue;
            }
            b'(' | b'[' | b'{' | b'<' => depth += 1,
            b')' | b']' | b'}' | b'>' => {
                if depth == 0 {
                    return i;
                }
                depth -= 1;
            }
            b';' if depth == 0 => return i + 1,
            b'\n' | b'\r' if depth == 0 && seen && !type_continues(bytes, i) => return i,
            _ => {}
        }
        if !b.is_ascii_whitespace() {
            seen = true;
        }
        i += 1;
    }
    i
}

fn strip_type_syntax(text: &str, masked: &MaskedSource) -> Vec<Edit> {
    let sites = type_syntax_sites(masked);
    sites
        .annotations
        .into_iter()
        .chain(sites.casts)
        .chain(sites.non_null)
        .chain(sites.modifiers)
        .chain(sites.generics)
        .chain(sites.implements)
        .map(|range| Edit::erase(text, range))
        .collect()
}
