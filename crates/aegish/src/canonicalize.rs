//! Rewrite a raw command line into the form the shell will interpret
//!
//! Works word by word on the token stream: `$'...'` escapes are decoded by
//! the lexer, quoting is normalized on output, brace expressions and
//! wildcards are expanded with a cap, and exported variables are substituted.
//! Operators and the text between tokens (whitespace, comments,
//! here-document bodies) are copied through unchanged.
//!
//! The rendering is a fixed point: canonicalizing canonical text returns it
//! unchanged.

use crate::command::{CanonFlag, Command};
use crate::config::CanonicalizerConfig;
use crate::session::{is_sensitive_var, SessionState};
use crate::shell::lexer::{lex, Op, Token, TokenKind};
use crate::shell::{split_assignment, ParseError, Word, WordPart};
use glob::{MatchOptions, Pattern};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Maximum words a single brace expression may produce
pub const MAX_BRACE_VARIANTS: usize = 64;
/// Maximum paths a single wildcard may expand to
pub const MAX_GLOB_MATCHES: usize = 64;
/// Substitutions nested deeper than this are copied verbatim
const MAX_NESTING: usize = 8;

/// Canonicalize `raw` against the current session.
///
/// Never fails: a tokenization error keeps the raw text and sets
/// [`CanonFlag::ParseFailed`].
pub fn canonicalize(raw: &str, session: &SessionState, opts: &CanonicalizerConfig) -> Command {
    let mut canon = Canonicalizer {
        session,
        opts,
        flags: BTreeSet::new(),
    };
    match canon.rewrite(raw, 0) {
        Ok((pre, post)) => {
            debug!(raw, canonical = %post, flags = ?canon.flags, "canonicalized");
            Command::new(raw.to_string(), pre, post, canon.flags)
        }
        Err(e) => {
            debug!(raw, error = %e, "canonicalization failed, keeping raw text");
            canon.flags.insert(CanonFlag::ParseFailed);
            Command::new(raw.to_string(), raw.to_string(), raw.to_string(), canon.flags)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seg {
    Char { c: char, quoted: bool },
    Param { name: String, quoted: bool },
    /// Text already in canonical form, before and after variable expansion
    Opaque { pre: String, post: String },
    /// `''` or `""`
    EmptyQuoted,
}

/// Expansion context of one word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WordCtx {
    /// Ordinary command word: brace, glob, expansion with field splitting
    Full,
    /// Assignment value, `[[ ]]` operand, case pattern, redirect target:
    /// variables only, no splitting
    NoSplit,
    /// Here-document delimiter: copied verbatim
    Verbatim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseState {
    Subject,
    ExpectIn,
    Pattern,
    Body,
}

/// Keywords after which the next word is again in command position
const COMMAND_PREFIX_KEYWORDS: &[&str] = &[
    "then", "do", "else", "elif", "if", "while", "until", "{", "!", "time",
];

struct Canonicalizer<'a> {
    session: &'a SessionState,
    opts: &'a CanonicalizerConfig,
    flags: BTreeSet<CanonFlag>,
}

impl<'a> Canonicalizer<'a> {
    /// Returns (pre-expansion text, canonical text)
    fn rewrite(&mut self, src: &str, depth: usize) -> Result<(String, String), ParseError> {
        let lexed = lex(src)?;
        if lexed.decoded_escapes {
            self.flags.insert(CanonFlag::EscapesDecoded);
        }
        let mut pre = String::with_capacity(src.len());
        let mut post = String::with_capacity(src.len());
        let mut last = 0;
        let mut cmd_start = true;
        let mut in_dbracket = false;
        let mut redirect_target = false;
        let mut cases: Vec<CaseState> = Vec::new();
        let mut prev_op: Option<Op> = None;

        for tok in &lexed.tokens {
            let gap = src.get(last..tok.span.start).unwrap_or("");
            pre.push_str(gap);
            post.push_str(gap);
            last = tok.span.end;
            let raw = tok.span.slice(src);

            let TokenKind::Word(word) = &tok.kind else {
                pre.push_str(raw);
                post.push_str(raw);
                self.track_non_word(tok, &mut cmd_start, &mut redirect_target, &mut cases);
                prev_op = tok.op();
                continue;
            };

            let bare = word.literal_text().filter(|_| !word.parts.iter().any(WordPart::is_quoted));
            let bare = bare.as_deref();
            let is_assignment = cmd_start && split_assignment(word).is_some();
            let in_pattern = matches!(cases.last(), Some(CaseState::Pattern | CaseState::Subject));

            let ctx = if matches!(prev_op, Some(Op::DLess | Op::DLessDash)) {
                WordCtx::Verbatim
            } else if is_assignment || in_dbracket || in_pattern || redirect_target {
                WordCtx::NoSplit
            } else {
                WordCtx::Full
            };

            if ctx == WordCtx::Verbatim {
                pre.push_str(raw);
                post.push_str(raw);
            } else {
                let segs = self.segments(word, depth);
                let expanded = if ctx == WordCtx::Full {
                    self.expand_braces_and_globs(segs)
                } else {
                    vec![segs]
                };
                pre.push_str(&render_words(&expanded, true));
                let substituted: Vec<Vec<Seg>> = expanded
                    .into_iter()
                    .flat_map(|w| self.expand_vars(w, ctx == WordCtx::Full))
                    .collect();
                post.push_str(&render_words(&substituted, false));
            }

            // Context tracking for the next word
            match (cases.last().copied(), bare) {
                (Some(CaseState::Subject), _) => {
                    if let Some(top) = cases.last_mut() {
                        *top = CaseState::ExpectIn;
                    }
                }
                (Some(CaseState::ExpectIn), Some("in")) => {
                    if let Some(top) = cases.last_mut() {
                        *top = CaseState::Pattern;
                    }
                }
                (Some(CaseState::Pattern), Some("esac")) => {
                    cases.pop();
                }
                (Some(CaseState::Body), Some("esac")) if cmd_start => {
                    cases.pop();
                }
                _ => {}
            }
            if cmd_start && bare == Some("case") {
                cases.push(CaseState::Subject);
            }
            if cmd_start && bare == Some("[[") {
                in_dbracket = true;
            } else if in_dbracket && bare == Some("]]") {
                in_dbracket = false;
            }
            if redirect_target {
                redirect_target = false;
            } else {
                cmd_start = is_assignment
                    || bare.is_some_and(|b| COMMAND_PREFIX_KEYWORDS.contains(&b));
            }
            prev_op = None;
        }
        let tail = src.get(last..).unwrap_or("");
        pre.push_str(tail);
        post.push_str(tail);
        Ok((pre, post))
    }

    fn track_non_word(
        &self,
        tok: &Token,
        cmd_start: &mut bool,
        redirect_target: &mut bool,
        cases: &mut [CaseState],
    ) {
        match &tok.kind {
            TokenKind::Op(op) if op.is_redirect() => *redirect_target = true,
            TokenKind::Op(Op::RParen) if cases.last() == Some(&CaseState::Pattern) => {
                if let Some(top) = cases.last_mut() {
                    *top = CaseState::Body;
                }
                *cmd_start = true;
            }
            TokenKind::Op(Op::DSemi | Op::SemiAnd | Op::DSemiAnd) => {
                if let Some(top) = cases.last_mut() {
                    if *top == CaseState::Body {
                        *top = CaseState::Pattern;
                    }
                }
            }
            TokenKind::Op(Op::Pipe) if cases.last() == Some(&CaseState::Pattern) => {}
            TokenKind::Op(_) | TokenKind::Newline => *cmd_start = true,
            TokenKind::IoNumber(_) | TokenKind::ArithCommand(_) | TokenKind::Word(_) => {}
        }
    }

    fn segments(&mut self, word: &Word, depth: usize) -> Vec<Seg> {
        let mut segs = Vec::new();
        for part in &word.parts {
            match part {
                WordPart::Literal { text, quoted } => {
                    if text.is_empty() && *quoted {
                        segs.push(Seg::EmptyQuoted);
                    }
                    segs.extend(text.chars().map(|c| Seg::Char { c, quoted: *quoted }));
                }
                WordPart::Param { name, quoted } => {
                    if name == "IFS" {
                        self.flags.insert(CanonFlag::IfsReference);
                    }
                    segs.push(Seg::Param {
                        name: name.clone(),
                        quoted: *quoted,
                    });
                }
                WordPart::ParamExpr { name, body, quoted } => {
                    if name == "IFS" {
                        self.flags.insert(CanonFlag::IfsReference);
                    }
                    let text = dq_wrap(&format!("${{{body}}}"), *quoted);
                    segs.push(Seg::Opaque {
                        pre: text.clone(),
                        post: text,
                    });
                }
                WordPart::Arith { expr, quoted } => {
                    let text = dq_wrap(&format!("$(({expr}))"), *quoted);
                    segs.push(Seg::Opaque {
                        pre: text.clone(),
                        post: text,
                    });
                }
                WordPart::CommandSub {
                    inner,
                    quoted,
                    backtick,
                } => {
                    if *backtick {
                        self.flags.insert(CanonFlag::BackticksNormalized);
                    }
                    let (pre, post) = self.rewrite_inner(inner, depth);
                    segs.push(Seg::Opaque {
                        pre: dq_wrap(&format!("$({pre})"), *quoted),
                        post: dq_wrap(&format!("$({post})"), *quoted),
                    });
                }
                WordPart::ProcessSub { inner, output } => {
                    let (pre, post) = self.rewrite_inner(inner, depth);
                    let dir = if *output { '>' } else { '<' };
                    segs.push(Seg::Opaque {
                        pre: format!("{dir}({pre})"),
                        post: format!("{dir}({post})"),
                    });
                }
            }
        }
        segs
    }

    fn rewrite_inner(&mut self, inner: &str, depth: usize) -> (String, String) {
        if depth >= MAX_NESTING {
            return (inner.to_string(), inner.to_string());
        }
        match self.rewrite(inner, depth + 1) {
            Ok(pair) => pair,
            Err(_) => {
                self.flags.insert(CanonFlag::ParseFailed);
                (inner.to_string(), inner.to_string())
            }
        }
    }

    fn expand_braces_and_globs(&mut self, segs: Vec<Seg>) -> Vec<Vec<Seg>> {
        let words = match expand_braces(&segs, MAX_BRACE_VARIANTS) {
            Ok(words) => {
                if words.len() > 1 || words.first() != Some(&segs) {
                    self.flags.insert(CanonFlag::BraceExpanded);
                }
                words
            }
            Err(BraceOverflow) => {
                self.flags.insert(CanonFlag::BraceOverflow);
                vec![segs]
            }
        };
        words
            .into_iter()
            .flat_map(|w| self.expand_glob(w))
            .collect()
    }

    fn expand_glob(&mut self, segs: Vec<Seg>) -> Vec<Vec<Seg>> {
        let has_wildcard = segs
            .iter()
            .any(|s| matches!(s, Seg::Char { c: '*' | '?' | '[', quoted: false }));
        let all_chars = segs.iter().all(|s| matches!(s, Seg::Char { .. }));
        if !has_wildcard || !all_chars {
            return vec![segs];
        }
        let mut pattern = String::new();
        for s in &segs {
            if let Seg::Char { c, quoted } = s {
                if *quoted {
                    pattern.push_str(&Pattern::escape(&c.to_string()));
                } else {
                    pattern.push(*c);
                }
            }
        }
        let cwd = self.session.working_directory();
        let (full, strip): (String, Option<&Path>) = if pattern.starts_with('/') {
            (pattern.clone(), None)
        } else {
            let base = Pattern::escape(&cwd.to_string_lossy());
            (format!("{}/{}", base.trim_end_matches('/'), pattern), Some(cwd))
        };
        let opts = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };
        let Ok(paths) = glob::glob_with(&full, opts) else {
            return vec![segs];
        };
        let mut matches: Vec<String> = Vec::new();
        for path in paths.flatten() {
            if matches.len() == MAX_GLOB_MATCHES {
                self.flags.insert(CanonFlag::GlobTruncated);
                break;
            }
            let shown = match strip {
                Some(base) => path.strip_prefix(base).unwrap_or(&path).to_path_buf(),
                None => path,
            };
            matches.push(shown.to_string_lossy().into_owned());
        }
        if matches.is_empty() {
            return vec![segs];
        }
        self.flags.insert(CanonFlag::GlobExpanded);
        matches
            .into_iter()
            .map(|m| m.chars().map(|c| Seg::Char { c, quoted: true }).collect())
            .collect()
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        if self.opts.filter_sensitive_vars && is_sensitive_var(name) {
            return None;
        }
        self.session.get_var(name)
    }

    /// Substitute exported variables. Unquoted values are split on
    /// whitespace when `split` is set; unset variables stay as references.
    fn expand_vars(&mut self, segs: Vec<Seg>, split: bool) -> Vec<Vec<Seg>> {
        let mut words: Vec<Vec<Seg>> = Vec::new();
        let mut current: Vec<Seg> = Vec::new();
        let mut expanded_any = false;
        for seg in segs {
            let value = match &seg {
                Seg::Param { name, .. } => self.lookup(name).map(str::to_string),
                _ => None,
            };
            let Some(value) = value else {
                current.push(seg);
                continue;
            };
            expanded_any = true;
            if matches!(seg, Seg::Param { quoted: true, .. }) {
                if value.is_empty() {
                    current.push(Seg::EmptyQuoted);
                }
                current.extend(value.chars().map(|c| Seg::Char { c, quoted: true }));
                continue;
            }
            for c in value.chars() {
                if split && matches!(c, ' ' | '\t' | '\n') {
                    if !current.is_empty() {
                        words.push(std::mem::take(&mut current));
                    }
                } else {
                    current.push(Seg::Char { c, quoted: true });
                }
            }
        }
        if !current.is_empty() {
            words.push(current);
        }
        if expanded_any {
            self.flags.insert(CanonFlag::VariablesExpanded);
        }
        words
    }
}

fn dq_wrap(text: &str, quoted: bool) -> String {
    if quoted {
        format!("\"{text}\"")
    } else {
        text.to_string()
    }
}

#[derive(Debug)]
struct BraceOverflow;

/// Find the first unquoted `{` with a matching `}` whose body is a comma
/// list or a sequence. Returns (open, close, comma positions).
fn find_brace(segs: &[Seg]) -> Option<(usize, usize, Vec<usize>)> {
    let is = |i: usize, ch: char| matches!(segs.get(i), Some(Seg::Char { c, quoted: false }) if *c == ch);
    for open in 0..segs.len() {
        if !is(open, '{') {
            continue;
        }
        let mut depth = 0usize;
        let mut commas = Vec::new();
        for i in open + 1..segs.len() {
            if is(i, '{') {
                depth += 1;
            } else if is(i, '}') {
                if depth == 0 {
                    if !commas.is_empty() || sequence(&segs[open + 1..i]).is_some() {
                        return Some((open, i, commas));
                    }
                    break;
                }
                depth -= 1;
            } else if depth == 0 && is(i, ',') {
                commas.push(i);
            }
        }
    }
    None
}

/// Parse `a..b` or `a..b..step` over unquoted chars
fn sequence(body: &[Seg]) -> Option<Vec<String>> {
    let text: String = body
        .iter()
        .map(|s| match s {
            Seg::Char { c, quoted: false } => Some(*c),
            _ => None,
        })
        .collect::<Option<String>>()?;
    let pieces: Vec<&str> = text.split("..").collect();
    if !(2..=3).contains(&pieces.len()) {
        return None;
    }
    let step: i64 = match pieces.get(2) {
        Some(s) => s.parse::<i64>().ok()?.checked_abs()?.max(1),
        None => 1,
    };
    if let (Ok(a), Ok(b)) = (pieces[0].parse::<i64>(), pieces[1].parse::<i64>()) {
        let count = a.abs_diff(b) / step as u64 + 1;
        if count > MAX_BRACE_VARIANTS as u64 {
            // Caller treats an oversized sequence as overflow.
            return Some(vec![String::new(); MAX_BRACE_VARIANTS + 1]);
        }
        let width = if pieces[0].starts_with('0') || pieces[1].starts_with('0') {
            pieces[0].len().max(pieces[1].len())
        } else {
            0
        };
        let out = (0..count as i64)
            .map(|k| {
                let v = if a <= b { a + k * step } else { a - k * step };
                format!("{v:0width$}")
            })
            .collect();
        return Some(out);
    }
    let (mut ca, mut cb) = (pieces[0].chars(), pieces[1].chars());
    match (ca.next(), ca.next(), cb.next(), cb.next()) {
        (Some(a), None, Some(b), None) if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => {
            let (a, b) = (a as u8, b as u8);
            let step = step as usize;
            let out: Vec<String> = if a <= b {
                (a..=b).step_by(step).map(|c| char::from(c).to_string()).collect()
            } else {
                (b..=a).rev().step_by(step).map(|c| char::from(c).to_string()).collect()
            };
            Some(out)
        }
        _ => None,
    }
}

fn expand_braces(segs: &[Seg], limit: usize) -> Result<Vec<Vec<Seg>>, BraceOverflow> {
    let Some((open, close, commas)) = find_brace(segs) else {
        return Ok(vec![segs.to_vec()]);
    };
    let prefix = &segs[..open];
    let suffix = &segs[close + 1..];
    let alternatives: Vec<Vec<Seg>> = if commas.is_empty() {
        sequence(&segs[open + 1..close])
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.chars().map(|c| Seg::Char { c, quoted: true }).collect())
            .collect()
    } else {
        let mut bounds = vec![open];
        bounds.extend(commas.iter().copied());
        bounds.push(close);
        bounds
            .windows(2)
            .map(|w| segs[w[0] + 1..w[1]].to_vec())
            .collect()
    };
    if alternatives.len() > limit {
        return Err(BraceOverflow);
    }
    let mut out = Vec::new();
    for alt in alternatives {
        let mut candidate = prefix.to_vec();
        candidate.extend(alt);
        candidate.extend_from_slice(suffix);
        for word in expand_braces(&candidate, limit)? {
            out.push(word);
            if out.len() > limit {
                return Err(BraceOverflow);
            }
        }
    }
    Ok(out)
}

fn is_safe_bare(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-./:@%+".contains(c)
}

fn single_quote(run: &str) -> String {
    match shell_words::quote(run) {
        Cow::Owned(quoted) => quoted,
        // shell-words leaves brace and history characters bare
        Cow::Borrowed(_) => format!("'{run}'"),
    }
}

fn render_words(words: &[Vec<Seg>], pre: bool) -> String {
    words
        .iter()
        .map(|w| render_word(w, pre))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_word(segs: &[Seg], pre: bool) -> String {
    if segs.iter().all(|s| *s == Seg::EmptyQuoted) {
        return if segs.is_empty() {
            String::new()
        } else {
            "''".to_string()
        };
    }
    let mut out = String::new();
    let mut i = 0;
    while i < segs.len() {
        match &segs[i] {
            Seg::Char { c, quoted: false } => {
                if *c == '#' && out.is_empty() {
                    out.push('\\');
                }
                out.push(*c);
                i += 1;
            }
            Seg::Char { quoted: true, .. } => {
                let mut run = String::new();
                while let Some(Seg::Char { c, quoted: true }) = segs.get(i) {
                    run.push(*c);
                    i += 1;
                }
                if run.chars().all(is_safe_bare) {
                    out.push_str(&run);
                } else {
                    out.push_str(&single_quote(&run));
                }
            }
            Seg::Param { name, quoted } => {
                let simple = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                let needs_brace = (!simple && name.len() > 1)
                    || matches!(segs.get(i + 1), Some(Seg::Char { c, .. }) if c.is_ascii_alphanumeric() || *c == '_');
                let text = if needs_brace {
                    format!("${{{name}}}")
                } else {
                    format!("${name}")
                };
                out.push_str(&dq_wrap(&text, *quoted));
                i += 1;
            }
            Seg::Opaque { pre: before, post } => {
                out.push_str(if pre { before } else { post });
                i += 1;
            }
            Seg::EmptyQuoted => i += 1,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnforcementMode, Role};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn session_with(vars: &[(&str, &str)], cwd: PathBuf) -> SessionState {
        SessionState::new(
            cwd,
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())),
            Role::Default,
            EnforcementMode::Permissive,
        )
    }

    fn canon(raw: &str) -> Command {
        let session = session_with(&[], PathBuf::from("/nonexistent-aegish-test"));
        canonicalize(raw, &session, &CanonicalizerConfig::default())
    }

    #[test]
    fn test_quote_normalization() {
        assert_eq!(canon("'r'\"m\" -rf /").canonical_text(), "rm -rf /");
        assert_eq!(canon("echo 'hello world'").canonical_text(), "echo 'hello world'");
        assert_eq!(canon("echo \"it's\"").canonical_text(), r"echo 'it'\''s'");
        assert_eq!(canon("echo ''").canonical_text(), "echo ''");
        assert_eq!(canon("echo \"{a,b}\" \"x!y\"").canonical_text(), "echo '{a,b}' 'x!y'");
    }

    #[test]
    fn test_ansi_c_decoding() {
        let cmd = canon(r"$'\x72\x6d' -rf $'\057'");
        assert_eq!(cmd.canonical_text(), "rm -rf /");
        assert!(cmd.has_flag(CanonFlag::EscapesDecoded));
    }

    #[test]
    fn test_brace_expansion() {
        let cmd = canon("{r,}m -{r,}f x{1..3}");
        assert_eq!(cmd.canonical_text(), "rm m -rf -f x1 x2 x3");
        assert!(cmd.has_flag(CanonFlag::BraceExpanded));
        assert_eq!(canon("find . -exec ls {} +").canonical_text(), "find . -exec ls {} +");
        assert_eq!(canon("echo {a..c}").canonical_text(), "echo a b c");
    }

    #[test]
    fn test_brace_overflow_is_flagged() {
        let cmd = canon("echo {a,b,c,d}{a,b,c,d}{a,b,c,d}{a,b}");
        assert!(cmd.has_flag(CanonFlag::BraceOverflow));
        assert!(canon("echo {1..1000}").has_flag(CanonFlag::BraceOverflow));
    }

    #[test]
    fn test_backticks_become_dollar_paren() {
        let cmd = canon("echo `whoami`");
        assert_eq!(cmd.canonical_text(), "echo $(whoami)");
        assert!(cmd.has_flag(CanonFlag::BackticksNormalized));
    }

    #[test]
    fn test_inner_substitution_canonicalized() {
        assert_eq!(canon("echo $('i'd)").canonical_text(), "echo $(id)");
    }

    #[test]
    fn test_variable_expansion_keeps_pre_text() {
        let session = session_with(&[("TARGET", "/"), ("GREETING", "a b")], PathBuf::from("/"));
        let cmd = canonicalize(
            "rm -rf $TARGET; echo $GREETING \"$GREETING\" $UNSET",
            &session,
            &CanonicalizerConfig::default(),
        );
        assert_eq!(cmd.pre_expansion_text(), "rm -rf $TARGET; echo $GREETING \"$GREETING\" $UNSET");
        assert_eq!(cmd.canonical_text(), "rm -rf /; echo a b 'a b' $UNSET");
        assert!(cmd.has_flag(CanonFlag::VariablesExpanded));
    }

    #[test]
    fn test_sensitive_vars_filtered() {
        let session = session_with(&[("OPENAI_API_KEY", "sk-1")], PathBuf::from("/"));
        let opts = CanonicalizerConfig {
            filter_sensitive_vars: true,
        };
        let cmd = canonicalize("echo $OPENAI_API_KEY", &session, &opts);
        assert_eq!(cmd.canonical_text(), "echo $OPENAI_API_KEY");
    }

    #[test]
    fn test_glob_expansion_relative_to_session_cwd() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        fs::write(dir.path().join("b.txt"), "").unwrap();
        fs::write(dir.path().join(".hidden.txt"), "").unwrap();
        let session = session_with(&[], dir.path().to_path_buf());
        let opts = CanonicalizerConfig::default();
        let cmd = canonicalize("cat *.txt '*.txt' nomatch*", &session, &opts);
        assert_eq!(cmd.canonical_text(), "cat a.txt b.txt '*.txt' nomatch*");
        assert!(cmd.has_flag(CanonFlag::GlobExpanded));
    }

    #[test]
    fn test_glob_not_applied_to_case_patterns() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        let session = session_with(&[], dir.path().to_path_buf());
        let cmd = canonicalize(
            "case $f in *.txt) echo t;; esac; [[ $f == *.txt ]]",
            &session,
            &CanonicalizerConfig::default(),
        );
        assert_eq!(cmd.canonical_text(), "case $f in *.txt) echo t;; esac; [[ $f == *.txt ]]");
    }

    #[test]
    fn test_ifs_reference_flagged() {
        assert!(canon("cat${IFS}/etc/passwd").has_flag(CanonFlag::IfsReference));
    }

    #[test]
    fn test_lex_failure_keeps_raw() {
        let cmd = canon("echo 'unterminated");
        assert!(cmd.parse_failed());
        assert_eq!(cmd.canonical_text(), "echo 'unterminated");
    }

    #[test]
    fn test_idempotent() {
        for raw in [
            "ls -la /tmp",
            "'r'\"m\" -rf /",
            "echo \"a $x b\" 'c d' e\\ f",
            "echo `id` $(whoami) \"$(date)\" ${HOME:-/} $((1+2))",
            "a=ba; b=sh; $a$b",
            "cat <<'EOF'\n$(id)\nEOF\n",
            "echo {a,b}{c,d} {1..100} x{}y",
            "echo \"it's\" $'\\x41\\n'",
            "diff <(ls) >(cat) 2>&1 | tee out",
            "for i in 1 2; do echo \"$i\"; done",
        ] {
            let once = canon(raw);
            let twice = canon(once.canonical_text());
            assert_eq!(once.canonical_text(), twice.canonical_text(), "input {raw:?}");
        }
    }
}
