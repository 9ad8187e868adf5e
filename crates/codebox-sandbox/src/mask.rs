//! Masking tokenizer.
//!
//! Produces a copy of the script in which the interiors of string, regex and
//! template literals and all comments are blanked out, so structural pattern
//! matching downstream cannot be fooled by literal content.
//!
//! The masked text has exactly the same byte length as the source and every
//! line break stays where it was. Every byte offset in the masked text
//! therefore addresses the same construct in the original source, which is
//! what lets the rewriter locate constructs on the masked copy and edit the
//! original.
//!
//! This is a single forward pass with an explicit, heap-allocated mode stack
//! for template literals. It never recurses and never fails: unterminated
//! literals are closed at the end of their line (strings, regexes) or at the
//! end of input (comments, templates).

use std::fmt;
use std::ops::Deref;

/// Byte written in place of every masked byte.
const PLACEHOLDER: u8 = b' ';

/// Keywords after which a `/` starts a regex literal rather than a division.
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return",
    "typeof",
    "instanceof",
    "in",
    "of",
    "new",
    "delete",
    "void",
    "throw",
    "case",
    "do",
    "else",
    "yield",
    "await",
];

/// Punctuation after which a `/` starts a regex literal.
const REGEX_PRECEDING_PUNCT: &[u8] = b"([,;:!&|?+-*%={<>~^";

/// Script text with literal and comment interiors blanked.
///
/// Invariant: `masked.len() == source.len()` and line breaks are preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedSource(String);

impl MaskedSource {
    /// The masked text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the wrapper and return the masked text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for MaskedSource {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MaskedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the last significant token was, for regex-vs-division decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    Start,
    Punct(u8),
    Keyword,
    Value,
}

impl Prev {
    fn allows_regex(self) -> bool {
        match self {
            Prev::Start | Prev::Keyword => true,
            Prev::Punct(p) => REGEX_PRECEDING_PUNCT.contains(&p),
            Prev::Value => false,
        }
    }
}

/// Lexical mode frames. The bottom of the (implicit) stack is plain code.
#[derive(Debug, Clone, Copy)]
enum Frame {
    /// Inside the literal text of a template.
    Template,
    /// Inside a `${ ... }` hole; `depth` counts unclosed `{` within it.
    Hole { depth: usize },
}

/// Mask the literals and comments of `source`.
pub fn mask(source: &str) -> MaskedSource {
    let bytes = source.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut stack: Vec<Frame> = Vec::new();
    let mut prev = Prev::Start;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(Frame::Template) = stack.last() {
            i = scan_template_text(bytes, i, &mut out, &mut stack, &mut prev);
            continue;
        }

        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match b {
            b'/' if next == Some(b'/') => {
                i = scan_line_comment(bytes, i, &mut out);
            }
            b'/' if next == Some(b'*') => {
                i = scan_block_comment(bytes, i, &mut out);
            }
            b'/' if prev.allows_regex() => {
                i = scan_regex(bytes, i, &mut out);
                prev = Prev::Value;
            }
            b'"' | b'\'' => {
                i = scan_string(bytes, i, b, &mut out);
                prev = Prev::Value;
            }
            b'`' => {
                out.push(b'`');
                stack.push(Frame::Template);
                i += 1;
            }
            b'{' => {
                if let Some(Frame::Hole { depth }) = stack.last_mut() {
                    *depth += 1;
                }
                out.push(b);
                prev = Prev::Punct(b);
                i += 1;
            }
            b'}' => {
                match stack.last_mut() {
                    Some(Frame::Hole { depth: 0 }) => {
                        // Closes the interpolation; back to template text.
                        stack.pop();
                        out.push(b);
                        i += 1;
                        continue;
                    }
                    Some(Frame::Hole { depth }) => *depth -= 1,
                    _ => {}
                }
                out.push(b);
                prev = Prev::Punct(b);
                i += 1;
            }
            _ if b.is_ascii_whitespace() => {
                out.push(b);
                i += 1;
            }
            _ if is_word_byte(b) => {
                let start = i;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                let word = &source[start..i];
                out.extend_from_slice(word.as_bytes());
                prev = if REGEX_PRECEDING_KEYWORDS.contains(&word) {
                    Prev::Keyword
                } else {
                    Prev::Value
                };
            }
            _ => {
                out.push(b);
                prev = Prev::Punct(b);
                i += 1;
            }
        }
    }

    debug_assert_eq!(out.len(), bytes.len());
    // Mode switches only happen on ASCII bytes, so a multi-byte sequence is
    // always either copied whole or masked whole.
    let masked = String::from_utf8(out)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
    MaskedSource(masked)
}

/// Net bracket counts (opens minus closes) of a masked script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BracketBalance {
    /// `{` minus `}`.
    pub braces: isize,
    /// `(` minus `)`.
    pub parens: isize,
    /// `[` minus `]`.
    pub brackets: isize,
}

/// Count structural brackets. Only meaningful on masked text.
pub fn brace_balance(masked: &str) -> BracketBalance {
    let mut balance = BracketBalance::default();
    for b in masked.bytes() {
        match b {
            b'{' => balance.braces += 1,
            b'}' => balance.braces -= 1,
            b'(' => balance.parens += 1,
            b')' => balance.parens -= 1,
            b'[' => balance.brackets += 1,
            b']' => balance.brackets -= 1,
            _ => {}
        }
    }
    balance
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_line_break(b: u8) -> bool {
    b == b'\n' || b == b'\r'
}

fn push_masked(out: &mut Vec<u8>, b: u8) {
    out.push(if is_line_break(b) { b } else { PLACEHOLDER });
}

/// Mask a backslash escape starting at `i`. Returns the index after it.
fn scan_escape(bytes: &[u8], i: usize, out: &mut Vec<u8>) -> usize {
    push_masked(out, bytes[i]);
    let mut j = i + 1;
    if j < bytes.len() {
        let escaped = bytes[j];
        push_masked(out, escaped);
        j += 1;
        // Line continuation written with CRLF.
        if escaped == b'\r' && bytes.get(j) == Some(&b'\n') {
            out.push(b'\n');
            j += 1;
        }
    }
    j
}

fn scan_line_comment(bytes: &[u8], start: usize, out: &mut Vec<u8>) -> usize {
    let mut i = start;
    while i < bytes.len() && !is_line_break(bytes[i]) {
        out.push(PLACEHOLDER);
        i += 1;
    }
    i
}

fn scan_block_comment(bytes: &[u8], start: usize, out: &mut Vec<u8>) -> usize {
    // `/*`
    out.push(PLACEHOLDER);
    out.push(PLACEHOLDER);
    let mut i = start + 2;
    while i < bytes.len() {
        if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
            out.push(PLACEHOLDER);
            out.push(PLACEHOLDER);
            return i + 2;
        }
        push_masked(out, bytes[i]);
        i += 1;
    }
    i
}

fn scan_string(bytes: &[u8], start: usize, quote: u8, out: &mut Vec<u8>) -> usize {
    out.push(quote);
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            i = scan_escape(bytes, i, out);
            continue;
        }
        if b == quote {
            out.push(quote);
            return i + 1;
        }
        if is_line_break(b) {
            // Unterminated: the line break goes back to the code scanner.
            return i;
        }
        out.push(PLACEHOLDER);
        i += 1;
    }
    i
}

fn scan_regex(bytes: &[u8], start: usize, out: &mut Vec<u8>) -> usize {
    out.push(b'/');
    let mut i = start + 1;
    let mut in_class = false;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\\' => {
                if bytes.get(i + 1).is_some_and(|&n| is_line_break(n)) {
                    out.push(PLACEHOLDER);
                    return i + 1;
                }
                i = scan_escape(bytes, i, out);
                continue;
            }
            _ if is_line_break(b) => return i,
            b'[' => in_class = true,
            b']' => in_class = false,
            b'/' if !in_class => {
                out.push(b'/');
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    out.push(bytes[i]);
                    i += 1;
                }
                return i;
            }
            _ => {}
        }
        out.push(PLACEHOLDER);
        i += 1;
    }
    i
}

/// Scan template literal text until the closing backtick or a `${` hole.
fn scan_template_text(
    bytes: &[u8],
    start: usize,
    out: &mut Vec<u8>,
    stack: &mut Vec<Frame>,
    prev: &mut Prev,
) -> usize {
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'`' => {
                out.push(b'`');
                stack.pop();
                *prev = Prev::Value;
                return i + 1;
            }
            b'\\' => {
                i = scan_escape(bytes, i, out);
            }
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                out.extend_from_slice(b"${");
                stack.push(Frame::Hole { depth: 0 });
                *prev = Prev::Punct(b'{');
                return i + 2;
            }
            b => {
                push_masked(out, b);
                i += 1;
            }
        }
    }
    i
}
