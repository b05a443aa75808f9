//! Tokenizer for shell command lines
//!
//! Produces words (with quoting preserved per part), operators, IO numbers,
//! arithmetic commands and newlines. Here-document bodies are read when the
//! newline following their operator is reached and attached to the
//! delimiter token.

use super::ast::{HereDoc, Span, Word, WordPart};
use super::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    AndIf,
    OrIf,
    DSemi,
    SemiAnd,
    DSemiAnd,
    Semi,
    Amp,
    Pipe,
    PipeAmp,
    LParen,
    RParen,
    Less,
    Great,
    DGreat,
    Clobber,
    DLess,
    DLessDash,
    TLess,
    LessAnd,
    GreatAnd,
    LessGreat,
    AndGreat,
    AndDGreat,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::AndIf => "&&",
            Op::OrIf => "||",
            Op::DSemi => ";;",
            Op::SemiAnd => ";&",
            Op::DSemiAnd => ";;&",
            Op::Semi => ";",
            Op::Amp => "&",
            Op::Pipe => "|",
            Op::PipeAmp => "|&",
            Op::LParen => "(",
            Op::RParen => ")",
            Op::Less => "<",
            Op::Great => ">",
            Op::DGreat => ">>",
            Op::Clobber => ">|",
            Op::DLess => "<<",
            Op::DLessDash => "<<-",
            Op::TLess => "<<<",
            Op::LessAnd => "<&",
            Op::GreatAnd => ">&",
            Op::LessGreat => "<>",
            Op::AndGreat => "&>",
            Op::AndDGreat => "&>>",
        }
    }

    pub fn is_redirect(self) -> bool {
        matches!(
            self,
            Op::Less
                | Op::Great
                | Op::DGreat
                | Op::Clobber
                | Op::DLess
                | Op::DLessDash
                | Op::TLess
                | Op::LessAnd
                | Op::GreatAnd
                | Op::LessGreat
                | Op::AndGreat
                | Op::AndDGreat
        )
    }

    /// Operators that end one command and start another
    pub fn is_separator(self) -> bool {
        matches!(
            self,
            Op::AndIf | Op::OrIf | Op::Semi | Op::Amp | Op::Pipe | Op::PipeAmp
        )
    }
}

// Longest match first within each leading character.
const OPERATORS: &[(&str, Op)] = &[
    ("&>>", Op::AndDGreat),
    ("&&", Op::AndIf),
    ("&>", Op::AndGreat),
    ("&", Op::Amp),
    ("||", Op::OrIf),
    ("|&", Op::PipeAmp),
    ("|", Op::Pipe),
    (";;&", Op::DSemiAnd),
    (";;", Op::DSemi),
    (";&", Op::SemiAnd),
    (";", Op::Semi),
    ("<<<", Op::TLess),
    ("<<-", Op::DLessDash),
    ("<<", Op::DLess),
    ("<&", Op::LessAnd),
    ("<>", Op::LessGreat),
    ("<", Op::Less),
    (">>", Op::DGreat),
    (">|", Op::Clobber),
    (">&", Op::GreatAnd),
    (">", Op::Great),
    ("(", Op::LParen),
    (")", Op::RParen),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Word(Word),
    IoNumber(u32),
    Op(Op),
    /// `(( ... ))`, inner expression text
    ArithCommand(String),
    Newline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Set on the delimiter word of a here-document
    pub heredoc: Option<HereDoc>,
}

impl Token {
    pub fn word(&self) -> Option<&Word> {
        match &self.kind {
            TokenKind::Word(w) => Some(w),
            _ => None,
        }
    }

    pub fn op(&self) -> Option<Op> {
        match self.kind {
            TokenKind::Op(op) => Some(op),
            _ => None,
        }
    }
}

/// Output of [`lex`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    /// At least one `$'...'` string had escapes decoded
    pub decoded_escapes: bool,
}

struct PendingHeredoc {
    token: usize,
    delimiter: String,
    strip_tabs: bool,
    quoted: bool,
}

pub(crate) struct Cursor {
    pub(crate) chars: Vec<char>,
    offsets: Vec<usize>,
}

impl Cursor {
    pub(crate) fn new(src: &str) -> Self {
        let mut chars = Vec::with_capacity(src.len());
        let mut offsets = Vec::with_capacity(src.len() + 1);
        for (i, c) in src.char_indices() {
            chars.push(c);
            offsets.push(i);
        }
        offsets.push(src.len());
        Self { chars, offsets }
    }

    pub(crate) fn offset(&self, idx: usize) -> usize {
        self.offsets
            .get(idx)
            .copied()
            .unwrap_or_else(|| self.offsets.last().copied().unwrap_or(0))
    }

    pub(crate) fn at(&self, idx: usize) -> Option<char> {
        self.chars.get(idx).copied()
    }

    pub(crate) fn text(&self, from: usize, to: usize) -> String {
        self.chars[from.min(self.chars.len())..to.min(self.chars.len())]
            .iter()
            .collect()
    }

    pub(crate) fn starts_with(&self, idx: usize, s: &str) -> bool {
        let mut i = idx;
        for c in s.chars() {
            if self.at(i) != Some(c) {
                return false;
            }
            i += 1;
        }
        true
    }
}

/// Index just past a single-quoted section starting at `start` (the quote)
pub(crate) fn skip_single_quote(cur: &Cursor, start: usize) -> Option<usize> {
    let mut i = start + 1;
    while let Some(c) = cur.at(i) {
        if c == '\'' {
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

/// Index just past a double-quoted section starting at `start` (the quote)
pub(crate) fn skip_double_quote(cur: &Cursor, start: usize) -> Option<usize> {
    let mut i = start + 1;
    while let Some(c) = cur.at(i) {
        match c {
            '\\' => i += 2,
            '"' => return Some(i + 1),
            '`' => i = skip_backtick(cur, i)?,
            '$' if cur.at(i + 1) == Some('(') => {
                i = find_closing_paren(cur, i + 2)? + 1;
            }
            '$' if cur.at(i + 1) == Some('{') => {
                i = find_closing_brace(cur, i + 2)? + 1;
            }
            _ => i += 1,
        }
    }
    None
}

/// Index just past a backtick section starting at `start` (the backtick)
pub(crate) fn skip_backtick(cur: &Cursor, start: usize) -> Option<usize> {
    let mut i = start + 1;
    while let Some(c) = cur.at(i) {
        match c {
            '\\' => i += 2,
            '`' => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// Find the `)` matching an already consumed `(`; `start` is the first
/// character after it.
///
/// Balanced over nested parentheses, skipping quotes, escapes, backticks and
/// comments.
pub(crate) fn find_closing_paren(cur: &Cursor, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while let Some(c) = cur.at(i) {
        match c {
            '\\' => {
                i += 2;
                continue;
            }
            '\'' => {
                i = skip_single_quote(cur, i)?;
                continue;
            }
            '"' => {
                i = skip_double_quote(cur, i)?;
                continue;
            }
            '`' => {
                i = skip_backtick(cur, i)?;
                continue;
            }
            '#' if i == start || cur.at(i - 1).is_some_and(|p| p.is_whitespace() || p == ';') => {
                while let Some(n) = cur.at(i) {
                    if n == '\n' {
                        break;
                    }
                    i += 1;
                }
                continue;
            }
            '(' => depth += 1,
            ')' => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Find the `}` closing a `${`; `start` is the first character after `{`
pub(crate) fn find_closing_brace(cur: &Cursor, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while let Some(c) = cur.at(i) {
        match c {
            '\\' => {
                i += 2;
                continue;
            }
            '\'' => {
                i = skip_single_quote(cur, i)?;
                continue;
            }
            '"' => {
                i = skip_double_quote(cur, i)?;
                continue;
            }
            '`' => {
                i = skip_backtick(cur, i)?;
                continue;
            }
            '$' if cur.at(i + 1) == Some('(') => {
                i = find_closing_paren(cur, i + 2)? + 1;
                continue;
            }
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Find the `))` closing an arithmetic expansion; `start` follows `((`.
/// Returns the index of the first `)`.
pub(crate) fn find_arith_close(cur: &Cursor, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while let Some(c) = cur.at(i) {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => {
                return (cur.at(i + 1) == Some(')')).then_some(i);
            }
            ')' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    None
}

/// Undo the backslash escaping bash applies inside backticks
pub(crate) fn unescape_backtick(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&n) if n == '\\' || n == '`' || n == '$' => {
                    out.push(n);
                    chars.next();
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_word_break(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | ';' | '&' | '|' | '(' | ')' | '<' | '>')
}

/// Classify the inside of `${...}` into a plain parameter or an expression
fn classify_brace_param(body: &str, quoted: bool) -> WordPart {
    let trimmed = body.trim_start_matches(['#', '!']);
    let name: String = if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        trimmed.chars().take_while(|c| c.is_ascii_digit()).collect()
    } else if trimmed.starts_with(|c: char| "?@*#$!-".contains(c)) {
        trimmed.chars().take(1).collect()
    } else {
        trimmed.chars().take_while(|c| is_name_char(*c)).collect()
    };
    if name == body && !name.is_empty() {
        WordPart::Param { name, quoted }
    } else {
        WordPart::ParamExpr {
            name,
            body: body.to_string(),
            quoted,
        }
    }
}

/// Decode a `$'...'` string; `start` is the index after the opening quote.
/// Returns the decoded text and the index past the closing quote.
fn decode_ansi_c(cur: &Cursor, start: usize) -> Option<(String, usize)> {
    let mut out = String::new();
    let mut i = start;
    loop {
        let c = cur.at(i)?;
        match c {
            '\'' => return Some((out, i + 1)),
            '\\' => {
                let n = cur.at(i + 1)?;
                i += 2;
                match n {
                    'a' => out.push('\u{07}'),
                    'b' => out.push('\u{08}'),
                    'e' | 'E' => out.push('\u{1b}'),
                    'f' => out.push('\u{0c}'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    'v' => out.push('\u{0b}'),
                    '\\' | '\'' | '"' | '?' => out.push(n),
                    'x' => {
                        let (v, used) = read_radix(cur, i, 16, 2);
                        if used == 0 {
                            out.push_str("\\x");
                        } else {
                            out.push(char::from(v as u8));
                            i += used;
                        }
                    }
                    'u' | 'U' => {
                        let max = if n == 'u' { 4 } else { 8 };
                        let (v, used) = read_radix(cur, i, 16, max);
                        if used == 0 {
                            out.push('\\');
                            out.push(n);
                        } else {
                            out.push(char::from_u32(v).unwrap_or('\u{fffd}'));
                            i += used;
                        }
                    }
                    'c' => {
                        let ctl = cur.at(i)?;
                        out.push(char::from((ctl as u8) & 0x1f));
                        i += 1;
                    }
                    '0'..='7' => {
                        let (v, used) = read_radix(cur, i - 1, 8, 3);
                        out.push(char::from((v & 0xff) as u8));
                        i += used - 1;
                    }
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
}

fn read_radix(cur: &Cursor, start: usize, radix: u32, max: usize) -> (u32, usize) {
    let mut value = 0u32;
    let mut used = 0;
    while used < max {
        match cur.at(start + used).and_then(|c| c.to_digit(radix)) {
            Some(d) => {
                value = value.saturating_mul(radix).saturating_add(d);
                used += 1;
            }
            None => break,
        }
    }
    (value, used)
}

struct Lexer<'a> {
    src: &'a str,
    cur: Cursor,
    pos: usize,
    tokens: Vec<Token>,
    pending: Vec<PendingHeredoc>,
    decoded_escapes: bool,
}

/// Tokenize `src`.
pub fn lex(src: &str) -> Result<Lexed, ParseError> {
    let mut lexer = Lexer {
        src,
        cur: Cursor::new(src),
        pos: 0,
        tokens: Vec::new(),
        pending: Vec::new(),
        decoded_escapes: false,
    };
    lexer.run()?;
    Ok(Lexed {
        tokens: lexer.tokens,
        decoded_escapes: lexer.decoded_escapes,
    })
}

impl<'a> Lexer<'a> {
    fn err(&self, at: usize, message: impl Into<String>) -> ParseError {
        ParseError {
            offset: self.cur.offset(at),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.cur.at(self.pos)
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let span = Span::new(self.cur.offset(start), self.cur.offset(self.pos));
        self.tokens.push(Token {
            kind,
            span,
            heredoc: None,
        });
    }

    fn run(&mut self) -> Result<(), ParseError> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => self.pos += 1,
                '\\' if self.cur.at(self.pos + 1) == Some('\n') => self.pos += 2,
                '\n' => {
                    let start = self.pos;
                    self.pos += 1;
                    self.push(TokenKind::Newline, start);
                    self.read_heredoc_bodies();
                }
                '#' => {
                    while let Some(n) = self.peek() {
                        if n == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '(' if self.cur.at(self.pos + 1) == Some('(') => self.lex_arith_command()?,
                '<' | '>' if self.cur.at(self.pos + 1) == Some('(') => self.lex_word()?,
                _ if is_word_break(c) => self.lex_operator(),
                _ if c.is_ascii_digit() => {
                    if !self.try_io_number() {
                        self.lex_word()?;
                    }
                }
                _ => self.lex_word()?,
            }
        }
        // An unterminated here-document reads to end of input: nothing left.
        let pending = std::mem::take(&mut self.pending);
        for p in pending {
            self.attach_heredoc(p, String::new());
        }
        Ok(())
    }

    fn lex_operator(&mut self) {
        let start = self.pos;
        for (text, op) in OPERATORS {
            if self.cur.starts_with(self.pos, text) {
                self.pos += text.chars().count();
                self.push(TokenKind::Op(*op), start);
                return;
            }
        }
        // Unreachable after is_word_break; skip the character
        self.pos += 1;
    }

    fn lex_arith_command(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        match find_arith_close(&self.cur, self.pos + 2) {
            Some(close) => {
                let expr = self.cur.text(self.pos + 2, close);
                self.pos = close + 2;
                self.push(TokenKind::ArithCommand(expr), start);
                Ok(())
            }
            None => {
                // `( (cmd) )` style nesting rather than arithmetic.
                self.pos += 1;
                self.push(TokenKind::Op(Op::LParen), start);
                Ok(())
            }
        }
    }

    fn try_io_number(&mut self) -> bool {
        let mut i = self.pos;
        while self.cur.at(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if !matches!(self.cur.at(i), Some('<') | Some('>')) || self.cur.at(i + 1) == Some('(') {
            return false;
        }
        let digits = self.cur.text(self.pos, i);
        let Ok(fd) = digits.parse::<u32>() else {
            return false;
        };
        let start = self.pos;
        self.pos = i;
        self.push(TokenKind::IoNumber(fd), start);
        true
    }

    fn lex_word(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let mut parts: Vec<WordPart> = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                '<' | '>' if self.cur.at(self.pos + 1) == Some('(') => {
                    let close = find_closing_paren(&self.cur, self.pos + 2)
                        .ok_or_else(|| self.err(self.pos, "unterminated process substitution"))?;
                    parts.push(WordPart::ProcessSub {
                        inner: self.cur.text(self.pos + 2, close),
                        output: c == '>',
                    });
                    self.pos = close + 1;
                }
                _ if is_word_break(c) => break,
                '\\' => match self.cur.at(self.pos + 1) {
                    Some('\n') => self.pos += 2,
                    Some(n) => {
                        push_literal(&mut parts, n, true);
                        self.pos += 2;
                    }
                    None => {
                        push_literal(&mut parts, '\\', false);
                        self.pos += 1;
                    }
                },
                '\'' => {
                    let end = skip_single_quote(&self.cur, self.pos)
                        .ok_or_else(|| self.err(self.pos, "unterminated single quote"))?;
                    push_literal_str(&mut parts, &self.cur.text(self.pos + 1, end - 1), true);
                    self.pos = end;
                }
                '"' => self.lex_double_quoted(&mut parts)?,
                '`' => {
                    let part = self.lex_backtick(false)?;
                    parts.push(part);
                }
                '$' => self.lex_dollar(&mut parts, false)?,
                _ => {
                    push_literal(&mut parts, c, false);
                    self.pos += 1;
                }
            }
        }
        let word = Word {
            parts,
            span: Span::new(self.cur.offset(start), self.cur.offset(self.pos)),
        };
        let heredoc_op = self
            .tokens
            .last()
            .and_then(Token::op)
            .filter(|op| matches!(op, Op::DLess | Op::DLessDash));
        if let Some(op) = heredoc_op {
            let quoted = word.parts.iter().any(WordPart::is_quoted);
            let delimiter = word
                .literal_text()
                .unwrap_or_else(|| word.span.slice(self.src).to_string());
            self.pending.push(PendingHeredoc {
                token: self.tokens.len(),
                delimiter,
                strip_tabs: op == Op::DLessDash,
                quoted,
            });
        }
        self.push(TokenKind::Word(word), start);
        Ok(())
    }

    fn lex_double_quoted(&mut self, parts: &mut Vec<WordPart>) -> Result<(), ParseError> {
        let open = self.pos;
        self.pos += 1;
        let before = parts.len();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.err(open, "unterminated double quote"));
            };
            match c {
                '"' => {
                    self.pos += 1;
                    break;
                }
                '\\' => match self.cur.at(self.pos + 1) {
                    Some('\n') => self.pos += 2,
                    Some(n) if matches!(n, '$' | '`' | '"' | '\\') => {
                        push_literal(parts, n, true);
                        self.pos += 2;
                    }
                    _ => {
                        push_literal(parts, '\\', true);
                        self.pos += 1;
                    }
                },
                '`' => {
                    let part = self.lex_backtick(true)?;
                    parts.push(part);
                }
                '$' => self.lex_dollar(parts, true)?,
                _ => {
                    push_literal(parts, c, true);
                    self.pos += 1;
                }
            }
        }
        if parts.len() == before {
            push_literal_str(parts, "", true);
        }
        Ok(())
    }

    fn lex_backtick(&mut self, quoted: bool) -> Result<WordPart, ParseError> {
        let end = skip_backtick(&self.cur, self.pos)
            .ok_or_else(|| self.err(self.pos, "unterminated backtick"))?;
        let inner = unescape_backtick(&self.cur.text(self.pos + 1, end - 1));
        self.pos = end;
        Ok(WordPart::CommandSub {
            inner,
            quoted,
            backtick: true,
        })
    }

    fn lex_dollar(&mut self, parts: &mut Vec<WordPart>, quoted: bool) -> Result<(), ParseError> {
        let at = self.pos;
        match self.cur.at(at + 1) {
            Some('\'') if !quoted => {
                let (text, end) = decode_ansi_c(&self.cur, at + 2)
                    .ok_or_else(|| self.err(at, "unterminated $'...' string"))?;
                if self.cur.text(at + 2, end - 1).contains('\\') {
                    self.decoded_escapes = true;
                }
                push_literal_str(parts, &text, true);
                self.pos = end;
            }
            Some('"') if !quoted => {
                // Locale translation is a no-op here.
                self.pos += 1;
                self.lex_double_quoted(parts)?;
            }
            Some('(') if self.cur.at(at + 2) == Some('(') => {
                match find_arith_close(&self.cur, at + 3) {
                    Some(close) => {
                        parts.push(WordPart::Arith {
                            expr: self.cur.text(at + 3, close),
                            quoted,
                        });
                        self.pos = close + 2;
                    }
                    None => self.lex_command_sub(parts, quoted)?,
                }
            }
            Some('(') => self.lex_command_sub(parts, quoted)?,
            Some('{') => {
                let close = find_closing_brace(&self.cur, at + 2)
                    .ok_or_else(|| self.err(at, "unterminated ${...}"))?;
                let body = self.cur.text(at + 2, close);
                if body.is_empty() {
                    return Err(self.err(at, "bad substitution"));
                }
                parts.push(classify_brace_param(&body, quoted));
                self.pos = close + 1;
            }
            Some(c) if is_name_start(c) => {
                let mut end = at + 1;
                while self.cur.at(end).is_some_and(is_name_char) {
                    end += 1;
                }
                parts.push(WordPart::Param {
                    name: self.cur.text(at + 1, end),
                    quoted,
                });
                self.pos = end;
            }
            Some(c) if c.is_ascii_digit() || "?@*#$!-".contains(c) => {
                parts.push(WordPart::Param {
                    name: c.to_string(),
                    quoted,
                });
                self.pos = at + 2;
            }
            _ => {
                push_literal(parts, '$', quoted);
                self.pos += 1;
            }
        }
        Ok(())
    }

    fn lex_command_sub(&mut self, parts: &mut Vec<WordPart>, quoted: bool) -> Result<(), ParseError> {
        let at = self.pos;
        let close = find_closing_paren(&self.cur, at + 2)
            .ok_or_else(|| self.err(at, "unterminated command substitution"))?;
        parts.push(WordPart::CommandSub {
            inner: self.cur.text(at + 2, close),
            quoted,
            backtick: false,
        });
        self.pos = close + 1;
        Ok(())
    }

    fn read_heredoc_bodies(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for p in pending {
            let mut body = String::new();
            loop {
                if self.pos >= self.cur.chars.len() {
                    break;
                }
                let line_start = self.pos;
                while self.peek().is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
                let line = self.cur.text(line_start, self.pos);
                if self.peek() == Some('\n') {
                    self.pos += 1;
                }
                let compare = if p.strip_tabs {
                    line.trim_start_matches('\t')
                } else {
                    line.as_str()
                };
                if compare == p.delimiter {
                    break;
                }
                body.push_str(&line);
                body.push('\n');
            }
            self.attach_heredoc(p, body);
        }
    }

    fn attach_heredoc(&mut self, p: PendingHeredoc, body: String) {
        if let Some(tok) = self.tokens.get_mut(p.token) {
            tok.heredoc = Some(HereDoc {
                delimiter: p.delimiter,
                body,
                quoted: p.quoted,
            });
        }
    }
}

fn push_literal(parts: &mut Vec<WordPart>, c: char, quoted: bool) {
    if let Some(WordPart::Literal { text, quoted: q }) = parts.last_mut() {
        if *q == quoted {
            text.push(c);
            return;
        }
    }
    parts.push(WordPart::Literal {
        text: c.to_string(),
        quoted,
    });
}

fn push_literal_str(parts: &mut Vec<WordPart>, s: &str, quoted: bool) {
    if let Some(WordPart::Literal { text, quoted: q }) = parts.last_mut() {
        if *q == quoted {
            text.push_str(s);
            return;
        }
    }
    parts.push(WordPart::Literal {
        text: s.to_string(),
        quoted,
    });
}
