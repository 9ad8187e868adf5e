//! Syntax classifier.
//!
//! Decides, by pattern matching over masked text, whether a script uses ES
//! module syntax, a default export, and TypeScript-only constructs. No parsing
//! happens here: every detector is a regex or a single bracket-tracking pass,
//! and every detector is total.
//!
//! The hard part is the colon. JavaScript uses `:` for ternaries, `case`
//! labels, statement labels, and object keys; TypeScript additionally uses it
//! for annotations. [`type_syntax_sites`] tracks bracket context and pending
//! ternaries to tell them apart, and the rewriter reuses the same sites to
//! strip what was detected.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::mask::MaskedSource;

/// Families of TypeScript-only syntax the classifier recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TsConstruct {
    /// `interface Name { ... }`
    Interface,
    /// `type Name = ...`
    TypeAlias,
    /// `name: Type` in a parameter, declaration, class field or return position.
    TypeAnnotation,
    /// `name?:` optional member or parameter.
    OptionalMarker,
    /// `expr as Type` or `expr satisfies Type`.
    AsCast,
    /// `expr!` non-null assertion.
    NonNullAssertion,
    /// `enum Name { ... }`
    Enum,
    /// `namespace Name { ... }`
    Namespace,
    /// `declare ...` ambient declaration.
    Declare,
    /// `public` / `private` / `protected` / `readonly` / `abstract`.
    AccessModifier,
    /// `ident<T>(` or `function ident<T>(` / `class Name<T>`.
    GenericArguments,
    /// `class Name implements Iface`.
    Implements,
}

/// Which non-plain-JavaScript constructs a script appears to contain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntaxProfile {
    /// At least one TypeScript construct was found.
    pub has_type_script: bool,
    /// `import ... from`, bare `import '...'`, or any `export` form was found.
    #[serde(rename = "hasESModule")]
    pub has_es_module: bool,
    /// An `export default` was found.
    pub has_default_export: bool,
    /// The TypeScript families that matched.
    pub ts_constructs: BTreeSet<TsConstruct>,
}

const IDENT: &str = r"[A-Za-z_$][\w$]*";

/// Words that never start a type and never precede a cast or `!`.
const JS_KEYWORDS: &[&str] = &[
    "await",
    "break",
    "case",
    "catch",
    "class",
    "const",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "export",
    "extends",
    "finally",
    "for",
    "function",
    "if",
    "import",
    "in",
    "instanceof",
    "let",
    "new",
    "return",
    "super",
    "switch",
    "throw",
    "try",
    "typeof",
    "var",
    "while",
    "with",
    "yield",
];

pub(crate) fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => panic!("invalid classifier pattern {pattern:?}: {e}"),
    }
}

/// One type term: dotted name, optional (one level nested) generic
/// arguments, optional array suffixes.
fn type_term() -> String {
    format!(
        r"{IDENT}(?:\.{IDENT})*(?:\s*<[^;=(){{}}<>]*(?:<[^;=(){{}}<>]*>[^;=(){{}}<>]*)*>)?(?:\s*\[\s*\])*"
    )
}

static IMPORT_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(?m)^[ \t]*import(?:\s+type)?\s*(?:[\w$*{][^;]*?\bfrom\s*['"]|['"])"#)
});

static EXPORT_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?:^|[^\w$.])export(?:\s+(?:default|const|let|var|function|async|class|interface|type|enum|abstract|declare|namespace)\b|\s*[{*])",
    )
});

static DEFAULT_EXPORT: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?:^|[^\w$.])export\s+default\b"));

static INTERFACE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?:^|[^\w$.])interface\s+{IDENT}\s*(?:<[^{{]*?>\s*)?(?:extends\s+[^{{;]+?)?\{{"
    ))
});

static TYPE_ALIAS: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?:^|[^\w$.])type\s+{IDENT}\s*(?:<[^=;{{}}]*>\s*)?=[^=>]"
    ))
});

static ENUM: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(r"(?:^|[^\w$.])(?:const\s+)?enum\s+{IDENT}\s*\{{"))
});

static NAMESPACE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?:^|[^\w$.])(?:namespace|module)\s+{IDENT}(?:\.{IDENT})*\s*\{{"
    ))
});

static DECLARE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?:^|[^\w$.])declare\s+(?:const|let|var|function|class|module|namespace|global|type|interface|enum|abstract)\b",
    )
});

/// A run of member modifiers holding at least one TypeScript-only keyword.
static ACCESS_MODIFIER: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?:^|[^\w$.])((?:(?:public|private|protected|readonly|override|static|async|get|set)\s+)*(?:public|private|protected|readonly|override)\s+(?:(?:public|private|protected|readonly|override|static|async|get|set)\s+)*)(?:[A-Za-z_$#]|\[)",
    )
});

/// TypeScript-only keywords inside a modifier run; `static`, `async`, `get`
/// and `set` are JavaScript and stay.
static TS_ONLY_MODIFIER: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b(?:public|private|protected|readonly|override)\s+"));

static ABSTRACT_CLASS: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?:^|[^\w$.])(abstract\s+)class\b"));

static IMPLEMENTS: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?:^|[^\w$.])class\s+{IDENT}(?:\s*<[^{{]*?>)?(?:\s+extends\s+[^{{]+?)?(\s+implements\s+[^{{]*?)\s*\{{"
    ))
});

static GENERIC_CALL: LazyLock<Regex> = LazyLock::new(|| {
    let term = type_term();
    compile(&format!(
        r"{IDENT}(<\s*{term}(?:\s*[,|]\s*{term})*\s*>)\s*\("
    ))
});

static GENERIC_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?:^|[^\w$.])(?:function\s*\*?\s*{IDENT}|class\s+{IDENT}|class(?:\s+{IDENT})?\s+extends\s+{IDENT}(?:\.{IDENT})*)\s*<"
    ))
});

/// A leading `this` parameter, up to its colon.
static THIS_PARAMETER: LazyLock<Regex> = LazyLock::new(|| compile(r"\(\s*(this)\s*:"));

static AS_CAST: LazyLock<Regex> = LazyLock::new(|| {
    let term = type_term();
    compile(&format!(
        r"({IDENT}|[)\]])((?:\s+(?:as|satisfies)\s+(?:const\b|{term}(?:\s*[|&]\s*{term})*))+)"
    ))
});

static NON_NULL: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(r"({IDENT}|[)\]])!(?:[.\[(),;:}}\]\r\n]|$)"))
});

static STRICT_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    let term = type_term();
    compile(&format!(r"^\s*{term}(?:\s*[|&]\s*{term})*\s*"))
});

static DECLARATION_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?:^|[^\w$.])(?:let|const|var)\s+(?:{IDENT}|\{{[^{{}}]*\}}|\[[^\[\]]*\])$"
    ))
});

/// `class [Name][<T>] [extends X] [implements Y]` right before a `{`. An
/// object key or method named `class` never matches.
static CLASS_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?:^|[^\w$.])class(?:\s+{IDENT}(?:\s*<[^{{}};]*>)?)?(?:\s+extends\s+[^{{}};]+?)?(?:\s+implements\s+[^{{}};]+?)?\s*$"
    ))
});

static MODULE_LIST_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?:^|[^\w$.])(?:import|export)(?:\s+type)?(?:\s+{IDENT}\s*,)?\s*$"
    ))
});

/// Classify a masked script.
pub fn classify(masked: &MaskedSource) -> SyntaxProfile {
    let text = masked.as_str();
    let mut ts_constructs = BTreeSet::new();

    let declaration_detectors: [(&LazyLock<Regex>, TsConstruct); 7] = [
        (&INTERFACE, TsConstruct::Interface),
        (&TYPE_ALIAS, TsConstruct::TypeAlias),
        (&ENUM, TsConstruct::Enum),
        (&NAMESPACE, TsConstruct::Namespace),
        (&DECLARE, TsConstruct::Declare),
        (&ABSTRACT_CLASS, TsConstruct::AccessModifier),
        (&GENERIC_DECLARATION, TsConstruct::GenericArguments),
    ];
    for (detector, construct) in declaration_detectors {
        if detector.is_match(text) {
            ts_constructs.insert(construct);
        }
    }

    let sites = type_syntax_sites(masked);
    if !sites.annotations.is_empty() {
        ts_constructs.insert(TsConstruct::TypeAnnotation);
    }
    if !sites.optional_markers.is_empty() {
        ts_constructs.insert(TsConstruct::OptionalMarker);
    }
    if !sites.casts.is_empty() {
        ts_constructs.insert(TsConstruct::AsCast);
    }
    if !sites.non_null.is_empty() {
        ts_constructs.insert(TsConstruct::NonNullAssertion);
    }
    if !sites.modifiers.is_empty() {
        ts_constructs.insert(TsConstruct::AccessModifier);
    }
    if !sites.generics.is_empty() {
        ts_constructs.insert(TsConstruct::GenericArguments);
    }
    if !sites.implements.is_empty() {
        ts_constructs.insert(TsConstruct::Implements);
    }

    SyntaxProfile {
        has_type_script: !ts_constructs.is_empty(),
        has_es_module: has_module_syntax(text),
        has_default_export: DEFAULT_EXPORT.is_match(text),
        ts_constructs,
    }
}

/// Whether masked text contains any `import`/`export` statement form.
pub(crate) fn has_module_syntax(masked: &str) -> bool {
    IMPORT_STATEMENT.is_match(masked) || EXPORT_KEYWORD.is_match(masked)
}

/// Bracket context a colon appears in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AnnotationContext {
    /// Inside `( ... )`.
    Parameter,
    /// After `let/const/var NAME`.
    Declaration,
    /// Directly inside a class body.
    ClassBody,
    /// Inside any other braces, or at top level.
    Block,
    /// Right after a `)`.
    ReturnType,
}

/// Byte ranges (in masked and original text alike) of stripable TypeScript
/// syntax.
#[derive(Debug, Default)]
pub(crate) struct TypeSyntaxSites {
    /// Annotation including its leading `?`/`!` marker and the type text.
    pub annotations: Vec<Range<usize>>,
    /// Positions of `?` in `name?:`.
    pub optional_markers: Vec<usize>,
    /// ` as Type` / ` satisfies Type`.
    pub casts: Vec<Range<usize>>,
    /// The `!` byte of a non-null assertion.
    pub non_null: Vec<Range<usize>>,
    /// Modifier keyword plus trailing whitespace.
    pub modifiers: Vec<Range<usize>>,
    /// `<...>` generic argument or parameter lists.
    pub generics: Vec<Range<usize>>,
    /// ` implements A, B` clauses.
    pub implements: Vec<Range<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupKind {
    Top,
    Paren,
    Bracket,
    Brace,
    ClassBody,
}

#[derive(Debug)]
struct Group {
    kind: GroupKind,
    open: usize,
    segment_start: usize,
    pending_ternaries: usize,
    module_list: bool,
}

impl Group {
    fn new(kind: GroupKind, open: usize, segment_start: usize) -> Self {
        Self {
            kind,
            open,
            segment_start,
            pending_ternaries: 0,
            module_list: false,
        }
    }
}

/// Locate every TypeScript-only construct that the rewriter knows how to
/// remove.
pub(crate) fn type_syntax_sites(masked: &MaskedSource) -> TypeSyntaxSites {
    let text = masked.as_str();
    let bytes = text.as_bytes();
    let mut sites = TypeSyntaxSites::default();
    let mut module_lists: Vec<Range<usize>> = Vec::new();
    let mut stack = vec![Group::new(GroupKind::Top, 0, 0)];

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'(' | b'[' | b'{' => {
                let kind = match b {
                    b'(' => GroupKind::Paren,
                    b'[' => GroupKind::Bracket,
                    _ if CLASS_HEAD.is_match(window_before(text, i)) => GroupKind::ClassBody,
                    _ => GroupKind::Brace,
                };
                let mut group = Group::new(kind, i, i + 1);
                group.module_list = b == b'{' && MODULE_LIST_HEAD.is_match(window_before(text, i));
                stack.push(group);
            }
            b')' | b']' | b'}' => {
                if stack.len() > 1 {
                    if let Some(group) = stack.pop() {
                        if group.module_list {
                            module_lists.push(group.open..i);
                        }
                    }
                }
            }
            b';' | b',' => {
                if let Some(top) = stack.last_mut() {
                    top.segment_start = i + 1;
                    top.pending_ternaries = 0;
                }
            }
            b'?' => {
                match bytes.get(i + 1) {
                    // `??` and `??=`
                    Some(b'?') => {
                        i += 2;
                        continue;
                    }
                    // `?.` unless it is `? .5`
                    Some(b'.') if !bytes.get(i + 2).is_some_and(u8::is_ascii_digit) => {
                        i += 2;
                        continue;
                    }
                    _ => {}
                }
                let next = next_significant(bytes, i + 1).map(|j| bytes[j]);
                let after_name = prev_significant(bytes, i)
                    .is_some_and(|p| is_word_byte(bytes[p]) || bytes[p] == b']');
                if next == Some(b':') && after_name {
                    sites.optional_markers.push(i);
                } else if let Some(top) = stack.last_mut() {
                    top.pending_ternaries += 1;
                }
            }
            b':' => {
                if let Some(top) = stack.last_mut() {
                    if top.pending_ternaries > 0 {
                        top.pending_ternaries -= 1;
                    } else if let Some(range) = annotation_at(text, i, top) {
                        sites.annotations.push(range);
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    // `this: T` declares the receiver type and is not a real parameter, so
    // the name and a trailing comma go with the annotation.
    for caps in THIS_PARAMETER.captures_iter(text) {
        let (Some(name), Some(whole)) = (caps.get(1), caps.get(0)) else {
            continue;
        };
        let colon = whole.end() - 1;
        let Some(annotation) = sites.annotations.iter_mut().find(|r| r.start == colon) else {
            continue;
        };
        let mut end = annotation.end;
        if let Some(next) = next_significant(bytes, end) {
            if bytes[next] == b',' {
                end = next_significant(bytes, next + 1).unwrap_or(next + 1);
            }
        }
        *annotation = name.start()..end;
    }

    for caps in AS_CAST.captures_iter(text) {
        let (Some(subject), Some(cast)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if is_keyword(subject.as_str()) || module_lists.iter().any(|r| r.contains(&cast.start())) {
            continue;
        }
        sites.casts.push(trim_end_range(text, cast.range()));
    }

    for caps in NON_NULL.captures_iter(text) {
        let Some(subject) = caps.get(1) else { continue };
        if is_keyword(subject.as_str()) {
            continue;
        }
        sites.non_null.push(subject.end()..subject.end() + 1);
    }

    for caps in ACCESS_MODIFIER.captures_iter(text) {
        if let Some(run) = caps.get(1) {
            for word in TS_ONLY_MODIFIER.find_iter(run.as_str()) {
                sites
                    .modifiers
                    .push(run.start() + word.start()..run.start() + word.end());
            }
        }
    }
    for caps in ABSTRACT_CLASS.captures_iter(text) {
        if let Some(modifier) = caps.get(1) {
            sites.modifiers.push(modifier.range());
        }
    }

    for caps in GENERIC_CALL.captures_iter(text) {
        if let Some(args) = caps.get(1) {
            sites.generics.push(args.range());
        }
    }
    for m in GENERIC_DECLARATION.find_iter(text) {
        let open = m.end() - 1;
        if let Some(close) = matching_angle(bytes, open) {
            sites.generics.push(open..close + 1);
        }
    }

    for caps in IMPLEMENTS.captures_iter(text) {
        if let Some(clause) = caps.get(1) {
            sites.implements.push(clause.range());
        }
    }

    sites
}

/// Decide whether the colon at `colon` is a type annotation, returning the
/// range to remove.
fn annotation_at(text: &str, colon: usize, group: &Group) -> Option<Range<usize>> {
    let bytes = text.as_bytes();
    let before = prev_significant(bytes, colon)?;
    let (start, name_end) = match bytes[before] {
        b'?' | b'!' => (before, prev_significant(bytes, before)?),
        _ => (colon, before),
    };
    let prev = bytes[name_end];

    let segment = text
        .get(group.segment_start.min(colon)..colon)
        .unwrap_or("")
        .trim_start();
    if starts_with_word(segment, "case") || starts_with_word(segment, "default") {
        return None;
    }

    let window_start = group.segment_start.max(name_end.saturating_sub(128));
    let declaration = text
        .get(window_start..name_end + 1)
        .is_some_and(|head| DECLARATION_TAIL.is_match(head));

    let context = if declaration {
        AnnotationContext::Declaration
    } else if prev == b')' {
        AnnotationContext::ReturnType
    } else {
        match group.kind {
            GroupKind::Paren => AnnotationContext::Parameter,
            GroupKind::ClassBody => AnnotationContext::ClassBody,
            GroupKind::Top | GroupKind::Brace => AnnotationContext::Block,
            GroupKind::Bracket => return None,
        }
    };

    let after = &text[colon + 1..];
    let accepted = match context {
        // JavaScript never puts a non-ternary colon in these positions.
        AnnotationContext::Parameter | AnnotationContext::ClassBody => {
            (is_word_byte(prev) || matches!(prev, b'}' | b']')) && looks_like_type_start(after)
        }
        AnnotationContext::Declaration => looks_like_type_start(after),
        AnnotationContext::ReturnType => {
            strict_type_followed_by(after, |rest| rest.starts_with('{') || rest.starts_with("=>"))
        }
        AnnotationContext::Block => {
            is_word_byte(prev) && strict_type_followed_by(after, |rest| rest.starts_with(';'))
        }
    };
    if !accepted {
        return None;
    }

    let end = annotation_end(bytes, colon, context);
    Some(trim_end_range(text, start..end))
}

fn strict_type_followed_by(after: &str, terminator: impl Fn(&str) -> bool) -> bool {
    if !looks_like_type_start(after) {
        return false;
    }
    match STRICT_TYPE.find(after) {
        Some(m) => terminator(&after[m.end()..]),
        None => false,
    }
}

fn looks_like_type_start(after: &str) -> bool {
    let trimmed = after.trim_start();
    let Some(first) = trimmed.bytes().next() else {
        return false;
    };
    if first.is_ascii_alphabetic() || first == b'_' || first == b'$' {
        let word_len = trimmed
            .bytes()
            .take_while(|&b| is_word_byte(b))
            .count();
        return !is_keyword(&trimmed[..word_len]);
    }
    matches!(first, b'(' | b'{' | b'[' | b'\'' | b'"' | b'`') || first.is_ascii_digit()
}

/// Find where the type text starting after `colon` ends.
fn annotation_end(bytes: &[u8], colon: usize, context: AnnotationContext) -> usize {
    let mut depth: usize = 0;
    let mut seen_type = false;
    let mut i = colon + 1;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'=' if bytes.get(i + 1) == Some(&b'>') => {
                if depth == 0 && context == AnnotationContext::ReturnType && seen_type {
                    return i;
                }
                i += 2;
                seen_type = true;
                continue;
            }
            b'{' if depth == 0 && context == AnnotationContext::ReturnType && seen_type => {
                return i;
            }
            b'(' | b'[' | b'{' | b'<' => depth += 1,
            b')' | b']' | b'}' | b'>' => {
                if depth == 0 {
                    return i;
                }
                depth -= 1;
            }
            b'=' | b';' | b',' if depth == 0 => return i,
            b'\n' | b'\r'
                if depth == 0
                    && seen_type
                    && matches!(
                        context,
                        AnnotationContext::Declaration | AnnotationContext::ClassBody
                    )
                    && !type_continues(bytes, i) =>
            {
                return i;
            }
            _ => {}
        }
        if !b.is_ascii_whitespace() {
            seen_type = true;
        }
        i += 1;
    }
    i
}

/// Whether the type text spans the line break at `i` (`A |\n B`).
pub(crate) fn type_continues(bytes: &[u8], i: usize) -> bool {
    let before = prev_significant(bytes, i).map(|p| bytes[p]);
    let after = next_significant(bytes, i).map(|p| bytes[p]);
    matches!(before, Some(b'|' | b'&' | b':' | b','))
        || matches!(after, Some(b'|' | b'&'))
}

/// Index of the `>` closing the `<` at `open`.
pub(crate) fn matching_angle(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'=' if bytes.get(i + 1) == Some(&b'>') => {
                i += 2;
                continue;
            }
            b'<' => depth += 1,
            b'>' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            b'{' | b';' | b'}' => return None,
            _ => {}
        }
        i += 1;
    }
    None
}

/// Index of the bracket closing the one at `open` (`(`, `[`, or `{`).
pub(crate) fn matching_bracket(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn trim_end_range(text: &str, range: Range<usize>) -> Range<usize> {
    let trimmed = text[range.clone()].trim_end().len();
    range.start..range.start + trimmed
}

fn window_before(text: &str, end: usize) -> &str {
    let mut start = end.saturating_sub(200);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..end]
}

fn prev_significant(bytes: &[u8], before: usize) -> Option<usize> {
    bytes[..before].iter().rposition(|b| !b.is_ascii_whitespace())
}

fn next_significant(bytes: &[u8], from: usize) -> Option<usize> {
    bytes
        .iter()
        .skip(from)
        .position(|b| !b.is_ascii_whitespace())
        .map(|p| p + from)
}

fn starts_with_word(text: &str, word: &str) -> bool {
    text.strip_prefix(word)
        .is_some_and(|rest| !rest.bytes().next().is_some_and(is_word_byte))
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_keyword(word: &str) -> bool {
    JS_KEYWORDS.contains(&word)
}
