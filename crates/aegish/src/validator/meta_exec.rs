//! Builtins that evaluate a second string as code
//!
//! `eval "$x"`, `source "$f"` and `. "$f"` hide their real payload until
//! runtime. Any argument that still carries a variable reference or a
//! substitution after canonicalization is treated as unknown code.

use super::ast_walker::{effective_name, for_each_simple, Assigned};
use crate::config::Role;
use crate::shell::{Script, SimpleCommand, Word, WordPart};
use crate::verdict::{Action, Verdict, VerdictSource};

const META_EXEC_BUILTINS: &[&str] = &["eval", "source", "."];

/// True when `word` refers to something only known at runtime.
///
/// A literal `$` counts too: `eval '$x'` expands `$x` on its second pass.
fn has_variable_reference(word: &Word) -> bool {
    word.parts.iter().any(|part| match part {
        WordPart::Literal { text, .. } => text.contains('$') || text.contains('`'),
        _ => true,
    })
}

fn referenced_assigned<'a>(args: &'a [Word], assigned: &Assigned) -> Option<&'a str> {
    args.iter()
        .flat_map(Word::param_names)
        .find(|name| assigned.contains(name))
}

fn check_command(
    cmd: &SimpleCommand,
    assigned: &Assigned,
    var_cmd_action: Action,
    role: Role,
) -> Option<Verdict> {
    let (idx, name) = effective_name(cmd)?;
    let builtin = name.literal_text()?;
    if !META_EXEC_BUILTINS.contains(&builtin.as_str()) {
        return None;
    }
    let args = &cmd.words[idx + 1..];
    if !args.iter().any(has_variable_reference) {
        return None;
    }

    let (mut action, reason) = match referenced_assigned(args, assigned) {
        Some(var) => (
            var_cmd_action,
            format!("Meta-execution builtin '{builtin}' with variable ${var} assigned earlier"),
        ),
        None => (
            Action::Warn,
            format!("Meta-execution builtin '{builtin}' with a runtime-only argument"),
        ),
    };
    if role == Role::Restricted {
        action = action.escalate(Action::Block);
    }
    Some(Verdict::new(action, reason, 1.0, VerdictSource::MetaExec))
}

pub fn check(script: &Script, var_cmd_action: Action, role: Role) -> Vec<Verdict> {
    let mut verdicts = Vec::new();
    for_each_simple(script, &mut |cmd, assigned| {
        if let Some(v) = check_command(cmd, assigned, var_cmd_action, role) {
            verdicts.push(v);
        }
    });
    verdicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::parse;

    fn run(src: &str, role: Role) -> Vec<Verdict> {
        check(&parse(src).unwrap(), Action::Block, role)
    }

    #[test]
    fn test_eval_with_variable_warns() {
        let v = run("eval \"$PAYLOAD\"", Role::Default);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].action, Action::Warn);
        assert_eq!(v[0].source, VerdictSource::MetaExec);
    }

    #[test]
    fn test_assignment_escalates() {
        let v = run("p='rm -rf /'; eval $p", Role::Default);
        assert_eq!(v[0].action, Action::Block);
        let v = run("f=/tmp/x.sh; . \"$f\"", Role::Default);
        assert_eq!(v[0].action, Action::Block);
    }

    #[test]
    fn test_restricted_role_blocks() {
        let v = run("source $CONF", Role::Restricted);
        assert_eq!(v[0].action, Action::Block);
    }

    #[test]
    fn test_single_quoted_dollar_counts() {
        assert_eq!(run("eval 'echo $HOME'", Role::Default).len(), 1);
    }

    #[test]
    fn test_substitution_argument_counts() {
        assert_eq!(run("eval \"$(curl -s x)\"", Role::Default).len(), 1);
        assert_eq!(run("builtin eval `cat f`", Role::Default).len(), 1);
    }

    #[test]
    fn test_literal_arguments_pass() {
        assert!(run("eval echo hi", Role::Default).is_empty());
        assert!(run("source ~/.bashrc", Role::Default).is_empty());
        assert!(run("echo eval $x", Role::Default).is_empty());
    }
}
