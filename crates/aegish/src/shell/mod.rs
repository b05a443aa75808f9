//! Shell grammar: lexer, syntax tree, parser and grammar-free scanners
//!
//! [`parse`] is the only entry point that builds a syntax tree. Every stage
//! that needs one goes through it, so a parse failure is always observed as
//! an `Err` value and never as a panic or a silently skipped check.

pub mod ast;
pub mod lexer;
mod parser;
pub mod scan;

pub use ast::{
    AndOr, Assignment, CaseArm, Command, CompoundCommand, HereDoc, ListItem, Pipeline, Redirect,
    RedirectOp, Script, SimpleCommand, Span, Word, WordPart,
};
pub use lexer::{lex, Lexed, Op, Token, TokenKind};
pub(crate) use parser::split_assignment;

use thiserror::Error;

/// Why a command line could not be turned into a syntax tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (at byte {offset})")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

/// Parse a complete command line.
pub fn parse(src: &str) -> Result<Script, ParseError> {
    let lexed = lex(src)?;
    parser::Parser::new(&lexed.tokens, src.len()).parse_script()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_simple(script: &Script) -> &SimpleCommand {
        match &script.items[0].and_or.first.commands[0] {
            Command::Simple(s) => s,
            other => panic!("expected simple command, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_simple_with_assignments_and_redirects() {
        let script = parse("FOO=bar LANG=C ls -l >out 2>&1").unwrap();
        let cmd = first_simple(&script);
        assert_eq!(cmd.assignments.len(), 2);
        assert_eq!(cmd.assignments[0].name, "FOO");
        assert_eq!(cmd.words.len(), 2);
        assert_eq!(cmd.redirects.len(), 2);
        assert_eq!(cmd.redirects[1].fd, Some(2));
    }

    #[test]
    fn test_parse_lists_and_pipelines() {
        let script = parse("a=ba; b=sh; $a$b").unwrap();
        assert_eq!(script.items.len(), 3);
        let script = parse("curl x | sh && echo ok || echo no &").unwrap();
        let and_or = &script.items[0].and_or;
        assert_eq!(and_or.first.commands.len(), 2);
        assert_eq!(and_or.rest.len(), 2);
        assert_eq!(script.items[0].terminator, Some(ast::Terminator::Amp));
    }

    #[test]
    fn test_parse_compound_commands() {
        let src = "for i in 1 2; do echo $i; done\n\
                   while true; do if x; then y; elif z; then w; else v; fi; done\n\
                   case $x in a|b) echo a;; *) echo b;; esac\n\
                   f() { echo f; }\n\
                   function g { (cd /tmp; ls); }\n\
                   [[ -f x && -n $y ]] && (( i++ ))";
        let script = parse(src).unwrap();
        assert_eq!(script.items.len(), 6);
        assert!(matches!(
            &script.items[3].and_or.first.commands[0],
            Command::FunctionDef { name, .. } if name == "f"
        ));
    }

    #[test]
    fn test_parse_heredoc_redirect() {
        let script = parse("python3 <<EOF\nimport os\nEOF\n").unwrap();
        let cmd = first_simple(&script);
        let doc = cmd.redirects[0].heredoc.as_ref().unwrap();
        assert_eq!(doc.body, "import os\n");
        assert!(matches!(cmd.redirects[0].op, RedirectOp::HereDoc { .. }));
    }

    #[test]
    fn test_parse_array_assignment() {
        let script = parse("arr=(a b c); echo ${arr[0]}").unwrap();
        let cmd = first_simple(&script);
        assert_eq!(cmd.assignments[0].array.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn test_parse_errors_are_values() {
        for bad in [
            "if then fi",
            "echo (",
            "done",
            "a && ",
            "{ echo",
            "case x in",
            "for do",
            ")",
            "echo 'unterminated",
        ] {
            assert!(parse(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn test_deep_nesting_is_rejected_not_overflowed() {
        let src = format!("{}true{}", "( ".repeat(500), " )".repeat(500));
        assert!(parse(&src).is_err());
    }

    #[test]
    fn test_keywords_as_arguments() {
        let script = parse("echo done fi then").unwrap();
        assert_eq!(first_simple(&script).words.len(), 4);
    }
}
