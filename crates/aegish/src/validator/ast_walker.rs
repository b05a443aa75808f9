//! Structural checks over the syntax tree
//!
//! The walker visits every simple command in source order, descending into
//! groups, subshells, conditionals, loops, case arms and function bodies, and
//! keeps the set of variable names assigned so far. Checks that need to know
//! "was this name assigned earlier in the same command line" build on
//! [`for_each_simple`].

use crate::shell::{split_assignment, Command, CompoundCommand, Script, SimpleCommand, Word, WordPart};
use crate::verdict::{Action, Verdict, VerdictSource};
use std::collections::BTreeSet;

/// Commands that run their arguments as another command
const WRAPPERS: &[&str] = &["command", "builtin", "exec", "nohup", "time", "env", "nice"];

/// Builtins that assign every `NAME` or `NAME=value` argument
const DECLARATIONS: &[&str] = &["export", "declare", "local", "readonly", "typeset"];

/// Variable names assigned so far while walking a script
#[derive(Debug, Default, Clone)]
pub(crate) struct Assigned {
    names: BTreeSet<String>,
}

impl Assigned {
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn insert(&mut self, name: &str) {
        if is_name(name) {
            self.names.insert(name.to_string());
        }
    }

    /// Record everything `cmd` assigns: prefix assignments, declaration
    /// builtins, `read`, `mapfile` and `printf -v`.
    fn record(&mut self, cmd: &SimpleCommand) {
        for assignment in &cmd.assignments {
            self.insert(&assignment.name);
        }
        let Some(name) = cmd.words.first().and_then(Word::literal_text) else {
            return;
        };
        let args = &cmd.words[1..];
        match name.as_str() {
            n if DECLARATIONS.contains(&n) => {
                for arg in args {
                    if let Some((var, _)) = split_assignment(arg) {
                        self.insert(&var);
                    } else if let Some(text) = arg.literal_text() {
                        self.insert(&text);
                    }
                }
            }
            "read" => self.record_read(args),
            "mapfile" | "readarray" => {
                if let Some(text) = args.iter().rev().find_map(Word::literal_text) {
                    self.insert(&text);
                }
            }
            "printf" => {
                if let [flag, var, ..] = args {
                    if flag.is_bare("-v") {
                        if let Some(text) = var.literal_text() {
                            self.insert(&text);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn record_read(&mut self, args: &[Word]) {
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let Some(text) = arg.literal_text() else {
                continue;
            };
            if let Some(flags) = text.strip_prefix('-') {
                // Options that take a value consume the next word; `-a`
                // names an array.
                if let Some(last) = flags.chars().last() {
                    if "adinNptu".contains(last) {
                        let value = iter.next().and_then(Word::literal_text);
                        if last == 'a' {
                            if let Some(v) = value {
                                self.insert(&v);
                            }
                        }
                    }
                }
                continue;
            }
            self.insert(&text);
        }
    }
}

fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Call `f` for every simple command in `script` in source order.
///
/// `f` sees the names assigned before the command runs, including the
/// command's own prefix assignments.
pub(crate) fn for_each_simple<F>(script: &Script, f: &mut F)
where
    F: FnMut(&SimpleCommand, &Assigned),
{
    let mut assigned = Assigned::default();
    walk_script(script, &mut assigned, f);
}

fn walk_script<F>(script: &Script, assigned: &mut Assigned, f: &mut F)
where
    F: FnMut(&SimpleCommand, &Assigned),
{
    for item in &script.items {
        for pipeline in item.and_or.pipelines() {
            for command in &pipeline.commands {
                walk_command(command, assigned, f);
            }
        }
    }
}

fn walk_command<F>(command: &Command, assigned: &mut Assigned, f: &mut F)
where
    F: FnMut(&SimpleCommand, &Assigned),
{
    match command {
        Command::Simple(simple) => {
            for assignment in &simple.assignments {
                assigned.insert(&assignment.name);
            }
            f(simple, assigned);
            assigned.record(simple);
        }
        Command::FunctionDef { body, .. } => walk_command(body, assigned, f),
        Command::Compound { body, .. } => match body {
            CompoundCommand::BraceGroup(script) | CompoundCommand::Subshell(script) => {
                walk_script(script, assigned, f)
            }
            CompoundCommand::If {
                branches,
                else_body,
            } => {
                for (condition, body) in branches {
                    walk_script(condition, assigned, f);
                    walk_script(body, assigned, f);
                }
                if let Some(body) = else_body {
                    walk_script(body, assigned, f);
                }
            }
            CompoundCommand::While {
                condition, body, ..
            } => {
                walk_script(condition, assigned, f);
                walk_script(body, assigned, f);
            }
            CompoundCommand::For { var, body, .. } => {
                assigned.insert(var);
                walk_script(body, assigned, f);
            }
            CompoundCommand::ArithFor { header, body } => {
                for name in arith_assignments(header) {
                    assigned.insert(name);
                }
                walk_script(body, assigned, f);
            }
            CompoundCommand::Case { arms, .. } => {
                for arm in arms {
                    walk_script(&arm.body, assigned, f);
                }
            }
            CompoundCommand::Arith(expr) => {
                for name in arith_assignments(expr) {
                    assigned.insert(name);
                }
            }
            CompoundCommand::Conditional(_) => {}
        },
    }
}

/// Names on the left of `=` (but not `==`) in an arithmetic expression
fn arith_assignments(expr: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let bytes = expr.as_bytes();
    for (i, _) in expr.match_indices('=') {
        let prev = i.checked_sub(1).map(|p| bytes[p]);
        let next = bytes.get(i + 1).copied();
        if matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) || next == Some(b'=') {
            continue;
        }
        let head = expr[..i].trim_end_matches(|c: char| "+-*/%&|^ ".contains(c));
        let start = head
            .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .map_or(0, |p| p + 1);
        if is_name(&head[start..]) {
            out.push(&head[start..]);
        }
    }
    out
}

/// The word that names the program `cmd` runs, looking through wrappers
/// such as `command`, `exec` and `env`.
pub(crate) fn effective_name(cmd: &SimpleCommand) -> Option<(usize, &Word)> {
    let mut idx = 0;
    while let Some(word) = cmd.words.get(idx) {
        let Some(text) = word.literal_text() else {
            return Some((idx, word));
        };
        if !WRAPPERS.contains(&text.as_str()) {
            return Some((idx, word));
        }
        idx += 1;
        // Wrapper flags and, for env, NAME=value pairs
        while let Some(next) = cmd.words.get(idx) {
            let skip = match next.literal_text() {
                Some(t) => {
                    (t.starts_with('-') && t.len() > 1)
                        || (text == "env" && split_assignment(next).is_some())
                        || (text == "nice" && t.parse::<i32>().is_ok())
                }
                None => false,
            };
            if !skip {
                break;
            }
            idx += 1;
        }
    }
    None
}

fn has_param(word: &Word) -> bool {
    word.parts
        .iter()
        .any(|p| matches!(p, WordPart::Param { .. } | WordPart::ParamExpr { .. }))
}

/// Variables in command-name position after an assignment, and command
/// substitutions whose output becomes the command name.
pub fn check(script: &Script, var_cmd_action: Action) -> Vec<Verdict> {
    let mut verdicts = Vec::new();
    for_each_simple(script, &mut |cmd, assigned| {
        let Some((_, name)) = effective_name(cmd) else {
            return;
        };
        if name.has_command_sub() {
            verdicts.push(Verdict::block(
                "Command substitution in execution position",
                VerdictSource::AstWalker,
            ));
        } else if has_param(name) {
            let names = name.param_names();
            if let Some(var) = names.iter().find(|n| assigned.contains(n)) {
                verdicts.push(Verdict::new(
                    var_cmd_action,
                    format!(
                        "Variable expansion in command position with preceding assignment (${var})"
                    ),
                    1.0,
                    VerdictSource::AstWalker,
                ));
            }
        }
    });
    verdicts
}
