//! Split compound commands into top-level pieces
//!
//! Each piece is checked on its own so a harmless leading command cannot
//! hide a dangerous trailing one. With a syntax tree the pieces are the
//! top-level pipeline stages; without one the grammar-free splitter in
//! [`crate::shell::scan`] is used instead.

use crate::command::Command;
use crate::shell::{self, scan, AndOr, ListItem, Pipeline, Script};
use std::collections::BTreeSet;

/// One top-level subcommand
#[derive(Debug, Clone)]
pub struct Piece {
    pub text: String,
    /// Single-command tree, present when the whole command parsed
    pub syntax: Option<Script>,
    pub parse_failed: bool,
}

/// Top-level pieces of `command`, empty when it is a single command.
pub fn decompose(command: &Command) -> Vec<Piece> {
    let text = command.canonical_text();
    let pieces: Vec<Piece> = match command.syntax() {
        Some(script) => script
            .items
            .iter()
            .flat_map(|item| item.and_or.pipelines())
            .flat_map(|p| p.commands.iter())
            .map(|cmd| {
                let span = cmd.span();
                Piece {
                    text: span.slice(text).to_string(),
                    syntax: Some(single(cmd.clone(), span)),
                    parse_failed: false,
                }
            })
            .collect(),
        None => scan::split_top_level(text)
            .into_iter()
            .map(|span| {
                let piece = span.slice(text).to_string();
                // Same parse entry point as every other stage
                let parsed = Command::new(piece.clone(), piece.clone(), piece, BTreeSet::new());
                Piece {
                    text: parsed.canonical_text().to_string(),
                    syntax: parsed.syntax().cloned(),
                    parse_failed: parsed.parse_failed(),
                }
            })
            .collect(),
    };
    if pieces.len() > 1 {
        pieces
    } else {
        Vec::new()
    }
}

fn single(cmd: shell::Command, span: shell::Span) -> Script {
    Script {
        items: vec![ListItem {
            and_or: AndOr {
                first: Pipeline {
                    negated: false,
                    commands: vec![cmd],
                    span,
                },
                rest: Vec::new(),
                span,
            },
            terminator: None,
        }],
        span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(text: &str) -> Command {
        Command::new(text.into(), text.into(), text.into(), BTreeSet::new())
    }

    #[test]
    fn test_single_command_not_split() {
        assert!(decompose(&cmd("ls -la /tmp")).is_empty());
        assert!(decompose(&cmd("if true; then a; b; fi")).is_empty());
    }

    #[test]
    fn test_split_on_operators() {
        let pieces = decompose(&cmd("echo hi; curl x | sh && rm -f y"));
        let texts: Vec<&str> = pieces.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["echo hi", "curl x", "sh", "rm -f y"]);
        assert!(pieces.iter().all(|p| p.syntax.is_some()));
    }

    #[test]
    fn test_quoted_operators_not_split() {
        assert!(decompose(&cmd("echo 'a; b' \"c | d\"")).is_empty());
    }

    #[test]
    fn test_fallback_split_after_parse_failure() {
        let command = cmd("echo ok; if then; rm -rf /");
        assert!(command.parse_failed());
        let pieces = decompose(&command);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[2].text, "rm -rf /");
        assert!(!pieces[2].parse_failed);
    }
}
