//! Reduce every verdict for a command to one decision
//!
//! Precedence is BLOCK > WARN > ALLOW. Within the winning tier the verdict
//! with the highest confidence names the source, and the reasons of the
//! whole tier are joined. A classifier ALLOW below the confidence threshold
//! counts as WARN. Parse failure and brace overflow put a WARN floor under
//! the result. Classifier failures go through the fail mode.
//!
//! The only way to obtain an [`ApprovedCommand`], the executor's input, is
//! [`approve`], which refuses BLOCK and requires confirmation for WARN.

use crate::command::{CanonFlag, Command};
use crate::config::{FailMode, PolicyConfig};
use crate::error::{AegishError, ClassifierError};
use crate::verdict::{Action, Verdict, VerdictSource};
use std::fmt;
use tracing::debug;

/// Where a command is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Received,
    Canonicalized,
    StaticallyChecked,
    SubstitutionsResolved,
    Classified,
    Decided(Action),
    Blocked,
    /// Waiting for the user to confirm
    Warned,
    Executing,
}

impl CommandState {
    fn rank(self) -> u8 {
        match self {
            CommandState::Received => 0,
            CommandState::Canonicalized => 1,
            CommandState::StaticallyChecked => 2,
            CommandState::SubstitutionsResolved => 3,
            CommandState::Classified => 4,
            CommandState::Decided(_) => 5,
            CommandState::Blocked | CommandState::Warned | CommandState::Executing => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandState::Blocked | CommandState::Warned | CommandState::Executing
        )
    }

    /// Whether `next` is a legal successor.
    ///
    /// Stages may be skipped (a blocklist hit goes straight to DECIDED) but
    /// never revisited. A decided command can only move to the terminal
    /// state its action allows.
    pub fn can_advance_to(self, next: CommandState) -> bool {
        match (self, next) {
            (CommandState::Decided(Action::Block), CommandState::Blocked) => true,
            (CommandState::Decided(Action::Warn), CommandState::Warned) => true,
            (CommandState::Decided(Action::Allow), CommandState::Executing) => true,
            (CommandState::Warned, CommandState::Executing) => true,
            (CommandState::Decided(_), _) => false,
            (from, to) => !from.is_terminal() && to.rank() > from.rank() && to.rank() <= 5,
        }
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandState::Received => write!(f, "RECEIVED"),
            CommandState::Canonicalized => write!(f, "CANONICALIZED"),
            CommandState::StaticallyChecked => write!(f, "STATICALLY_CHECKED"),
            CommandState::SubstitutionsResolved => write!(f, "SUBSTITUTIONS_RESOLVED"),
            CommandState::Classified => write!(f, "CLASSIFIED"),
            CommandState::Decided(a) => write!(f, "DECIDED({a})"),
            CommandState::Blocked => write!(f, "BLOCKED"),
            CommandState::Warned => write!(f, "WARNED"),
            CommandState::Executing => write!(f, "EXECUTING"),
        }
    }
}

/// Forward-only tracker over [`CommandState`]
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: CommandState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: CommandState::Received,
        }
    }
}

impl Lifecycle {
    pub fn state(&self) -> CommandState {
        self.state
    }

    /// Move to `next`, returning false (and staying put) if not allowed.
    pub fn advance(&mut self, next: CommandState) -> bool {
        if self.state.can_advance_to(next) {
            debug!("command state {} -> {}", self.state, next);
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// What the classifier stage produced
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierOutcome {
    Verdict(Verdict),
    Failed(ClassifierError),
    /// Not consulted because the command was already blocked
    Skipped,
}

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    fail_mode: FailMode,
    threshold: f64,
    max_command_length: usize,
}

impl PolicyEngine {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            fail_mode: config.fail_mode,
            threshold: config.effective_threshold(),
            max_command_length: config.max_command_length,
        }
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    /// Action an internal failure turns into
    pub fn failure_action(&self) -> Action {
        match self.fail_mode {
            FailMode::Safe => Action::Block,
            FailMode::Open => Action::Warn,
        }
    }

    /// BLOCK verdict when the command is too long to analyze
    pub fn length_verdict(&self, command: &Command) -> Option<Verdict> {
        let len = command.raw_text().chars().count();
        (len > self.max_command_length).then(|| {
            let err = AegishError::CommandTooLong {
                len,
                max: self.max_command_length,
            };
            Verdict::block(err.to_string(), VerdictSource::LengthLimit)
        })
    }

    /// Verdict for a failed classifier call under the configured fail mode
    pub fn classifier_failure(&self, err: &ClassifierError) -> Verdict {
        Verdict::new(
            self.failure_action(),
            format!("Could not validate command ({}): {err}", err.kind()),
            0.0,
            VerdictSource::FailMode,
        )
    }

    /// Apply the confidence threshold to a classifier verdict.
    fn gate(&self, verdict: &Verdict) -> Verdict {
        if verdict.action == Action::Allow && verdict.confidence < self.threshold {
            Verdict::new(
                Action::Warn,
                format!(
                    "Classifier allowed with low confidence ({:.2} < {:.2}): {}",
                    verdict.confidence, self.threshold, verdict.reason
                ),
                verdict.confidence,
                verdict.source,
            )
        } else {
            verdict.clone()
        }
    }

    pub fn decide(
        &self,
        command: &Command,
        verdicts: &[Verdict],
        classifier: &ClassifierOutcome,
    ) -> Verdict {
        let mut all: Vec<Verdict> = verdicts.to_vec();
        all.extend(self.length_verdict(command));

        match classifier {
            ClassifierOutcome::Verdict(v) => all.push(self.gate(v)),
            ClassifierOutcome::Failed(err) => all.push(self.classifier_failure(err)),
            ClassifierOutcome::Skipped => {
                if !all.iter().any(Verdict::is_block) {
                    all.push(self.classifier_failure(&ClassifierError::Unavailable(
                        "classifier was not consulted".to_string(),
                    )));
                }
            }
        }

        if command.parse_failed()
            && !all
                .iter()
                .any(|v| v.source == VerdictSource::ParseFailureFloor)
        {
            all.push(Verdict::warn(
                "Command could not be fully parsed",
                VerdictSource::ParseFailureFloor,
            ));
        }
        if command.has_flag(CanonFlag::BraceOverflow)
            && !all
                .iter()
                .any(|v| v.source == VerdictSource::CanonicalizerFloor)
        {
            all.push(Verdict::warn(
                "Brace expansion could not be fully analyzed",
                VerdictSource::CanonicalizerFloor,
            ));
        }

        let decision = reduce(&all);
        debug!(
            action = %decision.action,
            source = %decision.source,
            confidence = decision.confidence,
            "policy decision"
        );
        decision
    }
}

/// Most severe action wins; confidence breaks ties.
pub fn reduce(verdicts: &[Verdict]) -> Verdict {
    let Some(top) = verdicts.iter().map(|v| v.action).max() else {
        return Verdict::allow("No issues found", VerdictSource::Classifier);
    };
    let tier: Vec<&Verdict> = verdicts.iter().filter(|v| v.action == top).collect();
    let mut lead = tier[0];
    for &v in &tier[1..] {
        if v.confidence > lead.confidence {
            lead = v;
        }
    }
    let mut reasons: Vec<&str> = Vec::new();
    reasons.push(&lead.reason);
    for v in &tier {
        if !reasons.contains(&v.reason.as_str()) {
            reasons.push(&v.reason);
        }
    }
    Verdict::new(top, reasons.join("; "), lead.confidence, lead.source)
}

/// A command the policy allowed, or the user confirmed.
///
/// Only [`approve`] creates one.
#[derive(Debug, Clone)]
pub struct ApprovedCommand {
    command: Command,
    verdict: Verdict,
}

impl ApprovedCommand {
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn verdict(&self) -> &Verdict {
        &self.verdict
    }

    /// Text handed to the shell: what the user typed. The canonical form
    /// is for analysis only, since quoting and glob rewrites do not preserve
    /// sequential semantics such as `FOO=bar; echo $FOO`.
    pub fn text(&self) -> &str {
        self.command.raw_text()
    }
}

/// Turn a decision into something executable.
///
/// BLOCK never approves. WARN approves only with `user_confirmed`.
pub fn approve(command: Command, verdict: &Verdict, user_confirmed: bool) -> Option<ApprovedCommand> {
    let ok = match verdict.action {
        Action::Allow => true,
        Action::Warn => user_confirmed,
        Action::Block => false,
    };
    ok.then(|| ApprovedCommand {
        command,
        verdict: verdict.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn cmd(text: &str) -> Command {
        Command::new(text.into(), text.into(), text.into(), BTreeSet::new())
    }

    fn classifier(action: Action, confidence: f64) -> ClassifierOutcome {
        ClassifierOutcome::Verdict(Verdict::new(
            action,
            "classifier says so",
            confidence,
            VerdictSource::Classifier,
        ))
    }

    fn engine() -> PolicyEngine {
        PolicyEngine::new(&PolicyConfig::default())
    }

    #[test]
    fn test_block_beats_classifier_allow() {
        let v = engine().decide(
            &cmd("curl x | sh"),
            &[Verdict::block("pipe to shell", VerdictSource::StaticBlocklist)],
            &classifier(Action::Allow, 1.0),
        );
        assert_eq!(v.action, Action::Block);
        assert_eq!(v.source, VerdictSource::StaticBlocklist);
    }

    #[test]
    fn test_tie_prefers_confidence_and_joins_reasons() {
        let verdicts = vec![
            Verdict::new(Action::Warn, "first", 0.5, VerdictSource::MetaExec),
            Verdict::new(Action::Warn, "second", 0.9, VerdictSource::AstWalker),
        ];
        let v = engine().decide(&cmd("x"), &verdicts, &classifier(Action::Allow, 1.0));
        assert_eq!(v.action, Action::Warn);
        assert_eq!(v.source, VerdictSource::AstWalker);
        assert_eq!(v.confidence, 0.9);
        assert_eq!(v.reason, "second; first");
    }

    #[test]
    fn test_low_confidence_allow_becomes_warn() {
        let v = engine().decide(&cmd("ls"), &[], &classifier(Action::Allow, 0.6));
        assert_eq!(v.action, Action::Warn);
        let v = engine().decide(&cmd("ls"), &[], &classifier(Action::Allow, 0.7));
        assert_eq!(v.action, Action::Allow);
    }

    #[test]
    fn test_restricted_threshold() {
        let engine = PolicyEngine::new(&PolicyConfig {
            role: Role::Restricted,
            ..PolicyConfig::default()
        });
        let v = engine.decide(&cmd("ls"), &[], &classifier(Action::Allow, 0.85));
        assert_eq!(v.action, Action::Warn);
    }

    #[test]
    fn test_parse_failure_floor() {
        let c = cmd("echo 'unterminated");
        assert!(c.parse_failed());
        let v = engine().decide(&c, &[], &classifier(Action::Allow, 1.0));
        assert_eq!(v.action, Action::Warn);
        assert_eq!(v.source, VerdictSource::ParseFailureFloor);
    }

    #[test]
    fn test_brace_overflow_floor() {
        let c = Command::new(
            "echo x".into(),
            "echo x".into(),
            "echo x".into(),
            BTreeSet::from([CanonFlag::BraceOverflow]),
        );
        let v = engine().decide(&c, &[], &classifier(Action::Allow, 1.0));
        assert_eq!(v.action, Action::Warn);
    }

    #[test]
    fn test_fail_modes() {
        let err = ClassifierOutcome::Failed(ClassifierError::Timeout(Duration::from_secs(30)));
        let v = engine().decide(&cmd("ls"), &[], &err);
        assert_eq!(v.action, Action::Block);
        assert!(v.reason.contains("timeout"));

        let open = PolicyEngine::new(&PolicyConfig {
            fail_mode: FailMode::Open,
            ..PolicyConfig::default()
        });
        let v = open.decide(
            &cmd("ls"),
            &[],
            &ClassifierOutcome::Failed(ClassifierError::Malformed("empty".into())),
        );
        assert_eq!(v.action, Action::Warn);
    }

    #[test]
    fn test_skipped_classifier_without_block_fails_safe() {
        let v = engine().decide(&cmd("ls"), &[], &ClassifierOutcome::Skipped);
        assert_eq!(v.action, Action::Block);
    }

    #[test]
    fn test_length_limit() {
        let long = format!("echo {}", "a".repeat(5000));
        let v = engine().decide(&cmd(&long), &[], &classifier(Action::Allow, 1.0));
        assert_eq!(v.action, Action::Block);
        assert_eq!(v.source, VerdictSource::LengthLimit);
    }

    #[test]
    fn test_approve() {
        let allow = Verdict::allow("ok", VerdictSource::Classifier);
        let warn = Verdict::warn("hmm", VerdictSource::Classifier);
        let block = Verdict::block("no", VerdictSource::Classifier);
        assert!(approve(cmd("ls"), &allow, false).is_some());
        assert!(approve(cmd("ls"), &warn, false).is_none());
        assert!(approve(cmd("ls"), &warn, true).is_some());
        assert!(approve(cmd("ls"), &block, true).is_none());
    }

    #[test]
    fn test_approved_text_is_what_was_typed() {
        let c = Command::new(
            "FOO=bar; echo $FOO".into(),
            "FOO=bar; echo $FOO".into(),
            "FOO=bar; echo old".into(),
            BTreeSet::new(),
        );
        let allow = Verdict::allow("ok", VerdictSource::Classifier);
        let approved = approve(c, &allow, false).unwrap();
        assert_eq!(approved.text(), "FOO=bar; echo $FOO");
    }

    #[test]
    fn test_lifecycle_forward_only() {
        let mut life = Lifecycle::default();
        assert!(life.advance(CommandState::Canonicalized));
        assert!(life.advance(CommandState::StaticallyChecked));
        assert!(!life.advance(CommandState::Canonicalized));
        assert!(life.advance(CommandState::Decided(Action::Block)));
        assert!(!life.advance(CommandState::Executing));
        assert!(life.advance(CommandState::Blocked));
        assert!(life.state().is_terminal());
        assert!(!life.advance(CommandState::Executing));
    }

    #[test]
    fn test_warned_may_execute_after_confirmation() {
        let mut life = Lifecycle::default();
        assert!(life.advance(CommandState::Decided(Action::Warn)));
        assert!(life.advance(CommandState::Warned));
        assert!(life.advance(CommandState::Executing));
    }
}
