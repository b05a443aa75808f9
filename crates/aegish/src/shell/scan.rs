//! Grammar-free scanners that still work when parsing fails
//!
//! Both scanners are quote-aware and balanced over nested parentheses, so
//! they find the same top-level structure a parser would on well-formed
//! input and a conservative approximation on malformed input.

use super::ast::Span;
use super::lexer::{
    find_arith_close, find_closing_paren, skip_backtick, skip_double_quote, skip_single_quote,
    unescape_backtick, Cursor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedKind {
    CommandSub,
    Backtick,
    ProcessSub,
}

/// An outermost embedded command found in a command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embedded {
    pub kind: EmbedKind,
    /// Covers the whole construct, delimiters included
    pub span: Span,
    pub inner: String,
    /// Inside double quotes
    pub quoted: bool,
}

/// Find every outermost `$(...)`, backtick and `<(...)`/`>(...)` in `src`.
///
/// Arithmetic `$((...))` is skipped. Single-quoted text is inert, and so is
/// the body of a here-document whose delimiter is quoted. An unquoted body
/// is searched for `$(...)` and backticks only. An unterminated construct
/// ends the scan.
pub fn find_embedded(src: &str) -> Vec<Embedded> {
    let cur = Cursor::new(src);
    let n = cur.chars.len();
    let mut found = Vec::new();
    let mut pending: Vec<PendingBody> = Vec::new();
    let mut in_dq = false;
    let mut i = 0;
    while i < n {
        let Some(c) = cur.at(i) else { break };
        let next = cur.at(i + 1);
        match c {
            '\\' => {
                i += 2;
                continue;
            }
            '\'' if !in_dq => {
                i = skip_single_quote(&cur, i).unwrap_or(n);
                continue;
            }
            '"' => in_dq = !in_dq,
            '#' if !in_dq && (i == 0 || cur.at(i - 1).is_some_and(char::is_whitespace)) => {
                while cur.at(i).is_some_and(|ch| ch != '\n') {
                    i += 1;
                }
                continue;
            }
            '\n' if !in_dq && !pending.is_empty() => {
                i += 1;
                for body in std::mem::take(&mut pending) {
                    // Without a terminator the line is scanned as ordinary text
                    let Some((end, resume)) = body.terminator(&cur, i) else {
                        break;
                    };
                    if !body.quoted {
                        scan_body(&cur, i, end, &mut found);
                    }
                    i = resume;
                }
                continue;
            }
            '<' if !in_dq && next == Some('<') => {
                if cur.at(i + 2) == Some('<') {
                    // Here-string
                    i += 3;
                    continue;
                }
                let (body, after) = read_heredoc_operator(&cur, i + 2);
                pending.extend(body);
                i = after;
                continue;
            }
            '$' | '`' if c == '`' || next == Some('(') => {
                match substitution_at(&cur, i, in_dq) {
                    Some((sub, after)) => {
                        found.extend(sub);
                        i = after;
                    }
                    None => break,
                }
                continue;
            }
            '<' | '>' if !in_dq && next == Some('(') => match find_closing_paren(&cur, i + 2) {
                Some(close) => {
                    found.push(embedded(&cur, EmbedKind::ProcessSub, i, close + 1, i + 2, close, false));
                    i = close + 1;
                    continue;
                }
                None => break,
            },
            _ => {}
        }
        i += 1;
    }
    found
}

/// A here-document whose body starts after the next newline
#[derive(Debug)]
struct PendingBody {
    delimiter: String,
    strip_tabs: bool,
    quoted: bool,
}

impl PendingBody {
    /// End of the body starting at `from`, and where the text after the
    /// terminating line resumes
    fn terminator(&self, cur: &Cursor, from: usize) -> Option<(usize, usize)> {
        let n = cur.chars.len();
        let mut i = from;
        while i < n {
            let mut end = i;
            while cur.at(end).is_some_and(|ch| ch != '\n') {
                end += 1;
            }
            let line = cur.text(i, end);
            let line = if self.strip_tabs {
                line.trim_start_matches('\t')
            } else {
                line.as_str()
            };
            if line == self.delimiter {
                return Some((i, (end + 1).min(n)));
            }
            i = end + 1;
        }
        None
    }
}

/// Read the word after `<<` or `<<-`; `at` is just past the `<<`.
fn read_heredoc_operator(cur: &Cursor, at: usize) -> (Option<PendingBody>, usize) {
    let mut i = at;
    let strip_tabs = cur.at(i) == Some('-');
    if strip_tabs {
        i += 1;
    }
    while cur.at(i).is_some_and(|ch| ch == ' ' || ch == '\t') {
        i += 1;
    }
    let mut delimiter = String::new();
    let mut quoted = false;
    while let Some(ch) = cur.at(i) {
        match ch {
            '\'' | '"' => {
                quoted = true;
                i += 1;
                while let Some(q) = cur.at(i) {
                    i += 1;
                    if q == ch {
                        break;
                    }
                    delimiter.push(q);
                }
            }
            '\\' => {
                quoted = true;
                if let Some(escaped) = cur.at(i + 1) {
                    delimiter.push(escaped);
                }
                i += 2;
            }
            c if c.is_whitespace() || ";&|<>()".contains(c) => break,
            c => {
                delimiter.push(c);
                i += 1;
            }
        }
    }
    let body = (quoted || !delimiter.is_empty()).then_some(PendingBody {
        delimiter,
        strip_tabs,
        quoted,
    });
    (body, i)
}

/// Substitutions in an unquoted here-document body. Quotes are literal
/// there; only backslash escapes.
fn scan_body(cur: &Cursor, from: usize, to: usize, found: &mut Vec<Embedded>) {
    let mut i = from;
    while i < to {
        match (cur.at(i), cur.at(i + 1)) {
            (Some('\\'), _) => i += 2,
            (Some('$'), Some('(')) | (Some('`'), _) => match substitution_at(cur, i, true) {
                Some((sub, after)) => {
                    found.extend(sub);
                    i = after;
                }
                None => return,
            },
            _ => i += 1,
        }
    }
}

/// The `$(...)` or backtick substitution at `i`, if any, and where scanning
/// resumes. Arithmetic yields no substitution. `None` when unterminated.
fn substitution_at(cur: &Cursor, i: usize, quoted: bool) -> Option<(Option<Embedded>, usize)> {
    if cur.at(i) == Some('`') {
        let end = skip_backtick(cur, i)?;
        let mut e = embedded(cur, EmbedKind::Backtick, i, end, i + 1, end - 1, quoted);
        e.inner = unescape_backtick(&e.inner);
        return Some((Some(e), end));
    }
    if cur.at(i + 2) == Some('(') {
        if let Some(close) = find_arith_close(cur, i + 3) {
            return Some((None, close + 2));
        }
    }
    let close = find_closing_paren(cur, i + 2)?;
    let e = embedded(cur, EmbedKind::CommandSub, i, close + 1, i + 2, close, quoted);
    Some((Some(e), close + 1))
}

fn embedded(
    cur: &Cursor,
    kind: EmbedKind,
    start: usize,
    end: usize,
    inner_start: usize,
    inner_end: usize,
    quoted: bool,
) -> Embedded {
    Embedded {
        kind,
        span: Span::new(cur.offset(start), cur.offset(end)),
        inner: cur.text(inner_start, inner_end),
        quoted,
    }
}

/// Split `src` at top-level `;`, `&`, `&&`, `||`, `|`, `|&` and newlines.
///
/// Quotes, substitutions and subshell parentheses are kept intact. Empty
/// pieces are dropped; returned spans are trimmed of surrounding whitespace.
pub fn split_top_level(src: &str) -> Vec<Span> {
    let cur = Cursor::new(src);
    let n = cur.chars.len();
    let mut spans = Vec::new();
    let mut seg_start = 0;
    let mut i = 0;
    let push = |from: usize, to: usize, spans: &mut Vec<Span>| {
        let (a, b) = (cur.offset(from), cur.offset(to));
        let text = &src[a..b];
        let lead = text.len() - text.trim_start().len();
        let trail = text.len() - text.trim_end().len();
        if lead + trail < text.len() {
            spans.push(Span::new(a + lead, b - trail));
        }
    };
    while i < n {
        let Some(c) = cur.at(i) else { break };
        let prev = i.checked_sub(1).and_then(|p| cur.at(p));
        let next = cur.at(i + 1);
        let skip_to = match c {
            '\\' => Some(i + 2),
            '\'' => Some(skip_single_quote(&cur, i).unwrap_or(n)),
            '"' => Some(skip_double_quote(&cur, i).unwrap_or(n)),
            '`' => Some(skip_backtick(&cur, i).unwrap_or(n)),
            '(' => Some(find_closing_paren(&cur, i + 1).map_or(n, |p| p + 1)),
            '#' if prev.map_or(true, char::is_whitespace) => {
                let mut j = i;
                while cur.at(j).is_some_and(|ch| ch != '\n') {
                    j += 1;
                }
                Some(j)
            }
            _ => None,
        };
        if let Some(to) = skip_to {
            i = to.min(n);
            continue;
        }
        let sep_len = match (c, next) {
            (';', Some(';')) => 2,
            ('&', Some('&')) | ('|', Some('|')) | ('|', Some('&')) => 2,
            ('&', Some('>')) => 0,
            ('&', _) if matches!(prev, Some('>') | Some('<')) => 0,
            ('|', _) if prev == Some('>') => 0,
            (';', _) | ('&', _) | ('|', _) | ('\n', _) => 1,
            _ => 0,
        };
        if sep_len > 0 {
            push(seg_start, i, &mut spans);
            i += sep_len;
            seg_start = i;
        } else {
            i += 1;
        }
    }
    push(seg_start, n, &mut spans);
    spans
}
