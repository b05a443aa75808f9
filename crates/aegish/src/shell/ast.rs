//! Syntax tree for the subset of shell grammar the validator reasons about

use std::fmt;

/// Byte range into the text a node was parsed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn slice<'a>(&self, src: &'a str) -> &'a str {
        src.get(self.start..self.end).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn cover(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordPart {
    /// Plain characters. `quoted` covers single/double quotes, `$'..'` and
    /// backslash escapes.
    Literal { text: String, quoted: bool },
    /// `$name`, `${name}`, `$1`, `$?` ...
    Param { name: String, quoted: bool },
    /// `${...}` with an operator (`${x:-y}`, `${#x}`, `${x/a/b}`)
    ParamExpr {
        name: String,
        body: String,
        quoted: bool,
    },
    /// `$(...)` or a backtick substitution, inner text unparsed
    CommandSub {
        inner: String,
        quoted: bool,
        backtick: bool,
    },
    /// `$((...))`
    Arith { expr: String, quoted: bool },
    /// `<(...)` or `>(...)`
    ProcessSub { inner: String, output: bool },
}

impl WordPart {
    pub fn is_quoted(&self) -> bool {
        match self {
            WordPart::Literal { quoted, .. }
            | WordPart::Param { quoted, .. }
            | WordPart::ParamExpr { quoted, .. }
            | WordPart::CommandSub { quoted, .. }
            | WordPart::Arith { quoted, .. } => *quoted,
            WordPart::ProcessSub { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub parts: Vec<WordPart>,
    pub span: Span,
}

impl Word {
    /// Concatenated text when the word contains no expansions
    pub fn literal_text(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                WordPart::Literal { text, .. } => out.push_str(text),
                _ => return None,
            }
        }
        Some(out)
    }

    /// True when this word is exactly the unquoted text `s`
    pub fn is_bare(&self, s: &str) -> bool {
        matches!(self.parts.as_slice(), [WordPart::Literal { text, quoted: false }] if text == s)
    }

    pub fn has_expansion(&self) -> bool {
        self.parts
            .iter()
            .any(|p| !matches!(p, WordPart::Literal { .. }))
    }

    /// Names of every variable this word references directly
    pub fn param_names(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                WordPart::Param { name, .. } | WordPart::ParamExpr { name, .. } => {
                    Some(name.as_str())
                }
                _ => None,
            })
            .collect()
    }

    pub fn has_command_sub(&self) -> bool {
        self.parts.iter().any(|p| {
            matches!(
                p,
                WordPart::CommandSub { .. } | WordPart::ProcessSub { .. }
            )
        })
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                WordPart::Literal { text, .. } => write!(f, "{text}")?,
                WordPart::Param { name, .. } => write!(f, "${{{name}}}")?,
                WordPart::ParamExpr { body, .. } => write!(f, "${{{body}}}")?,
                WordPart::CommandSub { inner, .. } => write!(f, "$({inner})")?,
                WordPart::Arith { expr, .. } => write!(f, "$(({expr}))")?,
                WordPart::ProcessSub { inner, output } => {
                    write!(f, "{}({inner})", if *output { '>' } else { '<' })?
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    In,
    Out,
    Append,
    Clobber,
    HereDoc { strip_tabs: bool },
    HereString,
    DupIn,
    DupOut,
    ReadWrite,
    OutErr,
    AppendErr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HereDoc {
    pub delimiter: String,
    /// Body text as written, without the terminating delimiter line
    pub body: String,
    /// A quoted delimiter disables expansion inside the body
    pub quoted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub fd: Option<u32>,
    pub op: RedirectOp,
    pub target: Word,
    pub heredoc: Option<HereDoc>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub name: String,
    pub value: Word,
    /// Elements of `name=(a b c)`
    pub array: Option<Vec<Word>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleCommand {
    pub assignments: Vec<Assignment>,
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
    pub span: Span,
}

impl SimpleCommand {
    pub fn name(&self) -> Option<&Word> {
        self.words.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseArm {
    pub patterns: Vec<Word>,
    pub body: Script,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompoundCommand {
    BraceGroup(Script),
    Subshell(Script),
    If {
        branches: Vec<(Script, Script)>,
        else_body: Option<Script>,
    },
    While {
        condition: Script,
        body: Script,
        until: bool,
    },
    For {
        var: String,
        items: Option<Vec<Word>>,
        body: Script,
    },
    ArithFor {
        header: String,
        body: Script,
    },
    Case {
        subject: Word,
        arms: Vec<CaseArm>,
    },
    /// `(( expr ))`
    Arith(String),
    /// `[[ ... ]]`
    Conditional(Vec<Word>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Simple(SimpleCommand),
    Compound {
        body: CompoundCommand,
        redirects: Vec<Redirect>,
        span: Span,
    },
    FunctionDef {
        name: String,
        body: Box<Command>,
        span: Span,
    },
}

impl Command {
    pub fn span(&self) -> Span {
        match self {
            Command::Simple(s) => s.span,
            Command::Compound { span, .. } | Command::FunctionDef { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub negated: bool,
    pub commands: Vec<Command>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AndOrOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndOr {
    pub first: Pipeline,
    pub rest: Vec<(AndOrOp, Pipeline)>,
    pub span: Span,
}

impl AndOr {
    pub fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
        std::iter::once(&self.first).chain(self.rest.iter().map(|(_, p)| p))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Semi,
    Amp,
    Newline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub and_or: AndOr,
    pub terminator: Option<Terminator>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    pub items: Vec<ListItem>,
    pub span: Span,
}

impl Script {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Spans of every pipeline stage at the top level of this script
    pub fn top_level_spans(&self) -> Vec<Span> {
        self.items
            .iter()
            .flat_map(|item| item.and_or.pipelines())
            .flat_map(|p| p.commands.iter().map(Command::span))
            .collect()
    }
}
