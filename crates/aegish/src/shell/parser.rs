//! Recursive-descent parser over [`super::lexer`] tokens

use super::ast::*;
use super::lexer::{Op, Token, TokenKind};
use super::ParseError;

/// Nesting limit for compound commands and lists
const MAX_DEPTH: usize = 64;

const RESERVED: &[&str] = &[
    "if", "then", "elif", "else", "fi", "do", "done", "case", "esac", "while", "until", "for",
    "in", "function", "select", "{", "}", "!", "[[", "]]",
];

pub(crate) struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
    src_len: usize,
}

type PResult<T> = Result<T, ParseError>;

impl<'t> Parser<'t> {
    pub(crate) fn new(tokens: &'t [Token], src_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            src_len,
        }
    }

    pub(crate) fn parse_script(&mut self) -> PResult<Script> {
        let script = self.parse_list(&|_| false)?;
        if let Some(tok) = self.peek() {
            return Err(self.unexpected(tok));
        }
        Ok(script)
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, n: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + n)
    }

    fn bump(&mut self) -> Option<&'t Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.span.start).unwrap_or(self.src_len)
    }

    fn last_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span.end)
            .unwrap_or(0)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn unexpected(&self, tok: &Token) -> ParseError {
        let what = match &tok.kind {
            TokenKind::Word(w) => format!("'{}'", w),
            TokenKind::Op(op) => format!("'{}'", op.as_str()),
            TokenKind::IoNumber(n) => format!("'{n}'"),
            TokenKind::ArithCommand(_) => "'(('".to_string(),
            TokenKind::Newline => "newline".to_string(),
        };
        ParseError {
            offset: tok.span.start,
            message: format!("syntax error near unexpected token {what}"),
        }
    }

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Keyword text if the token is an unquoted reserved word
    fn keyword(tok: &Token) -> Option<&str> {
        match &tok.kind {
            TokenKind::Word(w) => match w.parts.as_slice() {
                [WordPart::Literal {
                    text,
                    quoted: false,
                }] if RESERVED.contains(&text.as_str()) => Some(text.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        self.peek().and_then(Self::keyword) == Some(kw)
    }

    fn at_op(&self, op: Op) -> bool {
        self.peek().and_then(Token::op) == Some(op)
    }

    fn expect_keyword(&mut self, kw: &str) -> PResult<()> {
        if self.at_keyword(kw) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{kw}'")))
        }
    }

    fn expect_op(&mut self, op: Op) -> PResult<()> {
        if self.at_op(op) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op.as_str())))
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Newline)) {
            self.pos += 1;
        }
    }

    /// Parse and-or lists until end of input, a token accepted by `stop`,
    /// or a token that cannot start a command.
    fn parse_list(&mut self, stop: &dyn Fn(&Token) -> bool) -> PResult<Script> {
        self.enter()?;
        let start = self.offset();
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            let Some(tok) = self.peek() else { break };
            if stop(tok) || matches!(tok.op(), Some(Op::RParen | Op::DSemi | Op::SemiAnd | Op::DSemiAnd)) {
                break;
            }
            let and_or = self.parse_and_or()?;
            let terminator = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Op(Op::Semi)) => Some(Terminator::Semi),
                Some(TokenKind::Op(Op::Amp)) => Some(Terminator::Amp),
                Some(TokenKind::Newline) => Some(Terminator::Newline),
                _ => None,
            };
            if terminator.is_some() {
                self.pos += 1;
            }
            items.push(ListItem {
                and_or,
                terminator,
            });
            if terminator.is_none() {
                break;
            }
        }
        self.leave();
        Ok(Script {
            items,
            span: Span::new(start, self.last_end().max(start)),
        })
    }

    /// A list that must contain at least one command
    fn parse_body(&mut self, stop: &dyn Fn(&Token) -> bool) -> PResult<Script> {
        let body = self.parse_list(stop)?;
        if body.is_empty() {
            return Err(match self.peek() {
                Some(tok) => self.unexpected(tok),
                None => self.error("unexpected end of input"),
            });
        }
        Ok(body)
    }

    fn parse_and_or(&mut self) -> PResult<AndOr> {
        let first = self.parse_pipeline()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek().and_then(Token::op) {
                Some(Op::AndIf) => AndOrOp::And,
                Some(Op::OrIf) => AndOrOp::Or,
                _ => break,
            };
            self.pos += 1;
            self.skip_newlines();
            rest.push((op, self.parse_pipeline()?));
        }
        let end = rest.last().map(|(_, p)| p.span.end).unwrap_or(first.span.end);
        let span = Span::new(first.span.start, end);
        Ok(AndOr { first, rest, span })
    }

    fn parse_pipeline(&mut self) -> PResult<Pipeline> {
        let start = self.offset();
        let mut negated = false;
        while self.at_keyword("!") {
            negated = !negated;
            self.pos += 1;
        }
        let mut commands = vec![self.parse_command()?];
        while matches!(self.peek().and_then(Token::op), Some(Op::Pipe | Op::PipeAmp)) {
            self.pos += 1;
            self.skip_newlines();
            commands.push(self.parse_command()?);
        }
        Ok(Pipeline {
            negated,
            commands,
            span: Span::new(start, self.last_end()),
        })
    }

    fn parse_command(&mut self) -> PResult<Command> {
        self.enter()?;
        let result = self.parse_command_inner();
        self.leave();
        result
    }

    fn parse_command_inner(&mut self) -> PResult<Command> {
        let Some(tok) = self.peek() else {
            return Err(self.error("unexpected end of input"));
        };
        let start = tok.span.start;

        if let TokenKind::ArithCommand(expr) = &tok.kind {
            self.pos += 1;
            return self.finish_compound(CompoundCommand::Arith(expr.clone()), start);
        }

        if tok.op() == Some(Op::LParen) {
            self.pos += 1;
            let body = self.parse_body(&|_| false)?;
            self.expect_op(Op::RParen)?;
            return self.finish_compound(CompoundCommand::Subshell(body), start);
        }

        // `in` and `]]` are only special inside for/case and [[ ]].
        if let Some(kw) = Self::keyword(tok).filter(|k| !matches!(*k, "in" | "]]")) {
            return match kw {
                "{" => {
                    self.pos += 1;
                    let body = self.parse_body(&|t| Self::keyword(t) == Some("}"))?;
                    self.expect_keyword("}")?;
                    self.finish_compound(CompoundCommand::BraceGroup(body), start)
                }
                "if" => self.parse_if(start),
                "while" | "until" => self.parse_while(start, kw == "until"),
                "for" | "select" => self.parse_for(start),
                "case" => self.parse_case(start),
                "function" => self.parse_function_keyword(start),
                "[[" => self.parse_conditional(start),
                _ => Err(self.unexpected(tok)),
            };
        }

        if let TokenKind::Word(w) = &tok.kind {
            let is_funcdef = self.peek_at(1).and_then(Token::op) == Some(Op::LParen)
                && self.peek_at(2).and_then(Token::op) == Some(Op::RParen);
            if is_funcdef {
                let name = w
                    .literal_text()
                    .ok_or_else(|| self.error("invalid function name"))?;
                self.pos += 3;
                self.skip_newlines();
                let body = self.parse_command()?;
                return Ok(Command::FunctionDef {
                    name,
                    span: Span::new(start, self.last_end()),
                    body: Box::new(body),
                });
            }
        }

        self.parse_simple(start).map(Command::Simple)
    }

    fn finish_compound(&mut self, body: CompoundCommand, start: usize) -> PResult<Command> {
        let mut redirects = Vec::new();
        while let Some(r) = self.try_redirect()? {
            redirects.push(r);
        }
        Ok(Command::Compound {
            body,
            redirects,
            span: Span::new(start, self.last_end()),
        })
    }

    fn parse_if(&mut self, start: usize) -> PResult<Command> {
        self.expect_keyword("if")?;
        let mut branches = Vec::new();
        let mut else_body = None;
        loop {
            let cond = self.parse_body(&|t| Self::keyword(t) == Some("then"))?;
            self.expect_keyword("then")?;
            let body = self.parse_body(&|t| {
                matches!(Self::keyword(t), Some("elif" | "else" | "fi"))
            })?;
            branches.push((cond, body));
            if self.at_keyword("elif") {
                self.pos += 1;
                continue;
            }
            if self.at_keyword("else") {
                self.pos += 1;
                else_body = Some(self.parse_body(&|t| Self::keyword(t) == Some("fi"))?);
            }
            self.expect_keyword("fi")?;
            break;
        }
        self.finish_compound(CompoundCommand::If { branches, else_body }, start)
    }

    fn parse_do_group(&mut self) -> PResult<Script> {
        self.skip_newlines();
        self.expect_keyword("do")?;
        let body = self.parse_body(&|t| Self::keyword(t) == Some("done"))?;
        self.expect_keyword("done")?;
        Ok(body)
    }

    fn parse_while(&mut self, start: usize, until: bool) -> PResult<Command> {
        self.pos += 1;
        let condition = self.parse_body(&|t| Self::keyword(t) == Some("do"))?;
        let body = self.parse_do_group()?;
        self.finish_compound(
            CompoundCommand::While {
                condition,
                body,
                until,
            },
            start,
        )
    }

    fn parse_for(&mut self, start: usize) -> PResult<Command> {
        self.pos += 1;
        if let Some(TokenKind::ArithCommand(header)) = self.peek().map(|t| &t.kind) {
            self.pos += 1;
            if self.at_op(Op::Semi) {
                self.pos += 1;
            }
            let body = self.parse_do_group()?;
            return self.finish_compound(
                CompoundCommand::ArithFor {
                    header: header.clone(),
                    body,
                },
                start,
            );
        }
        let var = self
            .bump()
            .and_then(Token::word)
            .and_then(Word::literal_text)
            .ok_or_else(|| self.error("expected loop variable name"))?;
        self.skip_newlines();
        let mut items = None;
        if self.at_keyword("in") {
            self.pos += 1;
            let mut list = Vec::new();
            while let Some(w) = self.peek().and_then(Token::word) {
                list.push(w.clone());
                self.pos += 1;
            }
            items = Some(list);
        }
        if self.at_op(Op::Semi) {
            self.pos += 1;
        }
        let body = self.parse_do_group()?;
        self.finish_compound(CompoundCommand::For { var, items, body }, start)
    }

    fn parse_case(&mut self, start: usize) -> PResult<Command> {
        self.pos += 1;
        let subject = self
            .bump()
            .and_then(Token::word)
            .cloned()
            .ok_or_else(|| self.error("expected case subject"))?;
        self.skip_newlines();
        self.expect_keyword("in")?;
        let mut arms = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_keyword("esac") {
                self.pos += 1;
                break;
            }
            if self.at_op(Op::LParen) {
                self.pos += 1;
            }
            let mut patterns = Vec::new();
            loop {
                let word = self
                    .bump()
                    .and_then(Token::word)
                    .cloned()
                    .ok_or_else(|| self.error("expected case pattern"))?;
                patterns.push(word);
                if self.at_op(Op::Pipe) {
                    self.pos += 1;
                    continue;
                }
                break;
            }
            self.expect_op(Op::RParen)?;
            let body = self.parse_list(&|t| Self::keyword(t) == Some("esac"))?;
            arms.push(CaseArm { patterns, body });
            match self.peek().and_then(Token::op) {
                Some(Op::DSemi | Op::SemiAnd | Op::DSemiAnd) => self.pos += 1,
                _ => {
                    self.skip_newlines();
                    self.expect_keyword("esac")?;
                    break;
                }
            }
        }
        self.finish_compound(CompoundCommand::Case { subject, arms }, start)
    }

    fn parse_function_keyword(&mut self, start: usize) -> PResult<Command> {
        self.pos += 1;
        let name = self
            .bump()
            .and_then(Token::word)
            .and_then(Word::literal_text)
            .ok_or_else(|| self.error("expected function name"))?;
        if self.at_op(Op::LParen) && self.peek_at(1).and_then(Token::op) == Some(Op::RParen) {
            self.pos += 2;
        }
        self.skip_newlines();
        let body = self.parse_command()?;
        Ok(Command::FunctionDef {
            name,
            body: Box::new(body),
            span: Span::new(start, self.last_end()),
        })
    }

    fn parse_conditional(&mut self, start: usize) -> PResult<Command> {
        self.pos += 1;
        let mut words = Vec::new();
        loop {
            let Some(tok) = self.bump() else {
                return Err(self.error("expected ']]'"));
            };
            if Self::keyword(tok) == Some("]]") {
                break;
            }
            match &tok.kind {
                TokenKind::Word(w) => words.push(w.clone()),
                // `&&`, `||`, `<`, `>` and parentheses are operators inside [[ ]].
                TokenKind::Op(_) => {}
                TokenKind::Newline => {}
                _ => return Err(self.unexpected(tok)),
            }
        }
        self.finish_compound(CompoundCommand::Conditional(words), start)
    }

    fn try_redirect(&mut self) -> PResult<Option<Redirect>> {
        let Some(tok) = self.peek() else {
            return Ok(None);
        };
        let start = tok.span.start;
        let (fd, op_tok) = match tok.kind {
            TokenKind::IoNumber(n) => (Some(n), self.peek_at(1)),
            _ => (None, Some(tok)),
        };
        let Some(op) = op_tok.and_then(Token::op).filter(|op| op.is_redirect()) else {
            return Ok(None);
        };
        self.pos += if fd.is_some() { 2 } else { 1 };
        let target_tok = self
            .bump()
            .filter(|t| t.word().is_some())
            .ok_or_else(|| self.error(format!("expected word after '{}'", op.as_str())))?;
        let target = target_tok.word().cloned().unwrap_or_else(|| Word {
            parts: Vec::new(),
            span: target_tok.span,
        });
        let op = match op {
            Op::Less => RedirectOp::In,
            Op::Great => RedirectOp::Out,
            Op::DGreat => RedirectOp::Append,
            Op::Clobber => RedirectOp::Clobber,
            Op::DLess => RedirectOp::HereDoc { strip_tabs: false },
            Op::DLessDash => RedirectOp::HereDoc { strip_tabs: true },
            Op::TLess => RedirectOp::HereString,
            Op::LessAnd => RedirectOp::DupIn,
            Op::GreatAnd => RedirectOp::DupOut,
            Op::LessGreat => RedirectOp::ReadWrite,
            Op::AndGreat => RedirectOp::OutErr,
            _ => RedirectOp::AppendErr,
        };
        Ok(Some(Redirect {
            fd,
            op,
            target,
            heredoc: target_tok.heredoc.clone(),
            span: Span::new(start, self.last_end()),
        }))
    }

    fn parse_simple(&mut self, start: usize) -> PResult<SimpleCommand> {
        let mut assignments = Vec::new();
        let mut words: Vec<Word> = Vec::new();
        let mut redirects = Vec::new();
        loop {
            if let Some(r) = self.try_redirect()? {
                redirects.push(r);
                continue;
            }
            let Some(tok) = self.peek() else { break };
            let TokenKind::Word(w) = &tok.kind else { break };
            if words.is_empty() {
                if let Some((name, value)) = split_assignment(w) {
                    self.pos += 1;
                    let array = self.try_array_literal(w)?;
                    assignments.push(Assignment {
                        name,
                        value,
                        array,
                        span: Span::new(w.span.start, self.last_end()),
                    });
                    continue;
                }
            }
            words.push(w.clone());
            self.pos += 1;
        }
        if assignments.is_empty() && words.is_empty() && redirects.is_empty() {
            return match self.peek() {
                Some(tok) => Err(self.unexpected(tok)),
                None => Err(self.error("unexpected end of input")),
            };
        }
        Ok(SimpleCommand {
            assignments,
            words,
            redirects,
            span: Span::new(start, self.last_end()),
        })
    }

    /// `name=( ... )` directly after an assignment word ending in `=`
    fn try_array_literal(&mut self, assign: &Word) -> PResult<Option<Vec<Word>>> {
        let Some(open) = self.peek() else {
            return Ok(None);
        };
        let adjacent = open.op() == Some(Op::LParen) && open.span.start == assign.span.end;
        let ends_with_eq = matches!(
            assign.parts.last(),
            Some(WordPart::Literal { text, quoted: false }) if text.ends_with('=')
        );
        if !adjacent || !ends_with_eq {
            return Ok(None);
        }
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            let Some(tok) = self.bump() else {
                return Err(self.error("unterminated array assignment"));
            };
            match &tok.kind {
                TokenKind::Op(Op::RParen) => break,
                TokenKind::Word(w) => items.push(w.clone()),
                TokenKind::Newline => {}
                _ => return Err(self.unexpected(tok)),
            }
        }
        Ok(Some(items))
    }
}

/// Split `NAME=value` / `NAME+=value` where the name part is unquoted
pub(crate) fn split_assignment(word: &Word) -> Option<(String, Word)> {
    let Some(WordPart::Literal {
        text,
        quoted: false,
    }) = word.parts.first()
    else {
        return None;
    };
    let eq = text.find('=')?;
    let name = text[..eq].strip_suffix('+').unwrap_or(&text[..eq]);
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    let mut parts = Vec::with_capacity(word.parts.len());
    let rest = &text[eq + 1..];
    if !rest.is_empty() {
        parts.push(WordPart::Literal {
            text: rest.to_string(),
            quoted: false,
        });
    }
    parts.extend(word.parts.iter().skip(1).cloned());
    Some((
        name.to_string(),
        Word {
            parts,
            span: word.span,
        },
    ))
}
