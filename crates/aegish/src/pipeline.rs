//! End-to-end command cycle: evaluate, confirm, execute
//!
//! [`Pipeline::check`] creates the one [`ExecutionBudget`] a top-level
//! command gets and runs every analysis stage. [`Pipeline::run`] turns the
//! decision into an outcome: BLOCK is refused, WARN asks the caller for
//! confirmation, ALLOW (or a confirmed WARN) runs in the sandbox.

use crate::budget::ExecutionBudget;
use crate::classifier::{Classifier, FallbackChain};
use crate::config::Config;
use crate::error::Result;
use crate::executor::{self, ExecConfig, SandboxRunner};
use crate::policy::{approve, CommandState};
use crate::resolver::{Evaluation, InnerRunner, Resolver};
use crate::session::SessionState;
use crate::verdict::{Action, Verdict};
use tracing::{debug, info};

/// Exit status reported when a command was blocked
pub const EXIT_BLOCKED: i32 = 1;
/// Exit status reported when the user declined a warned command
pub const EXIT_CANCELLED: i32 = 2;
/// Exit status reported when input was interrupted
pub const EXIT_INTERRUPTED: i32 = 130;

/// What happened to a command
#[derive(Debug, Clone)]
pub enum Outcome {
    Executed { exit_code: i32, captured: bool },
    Blocked(Verdict),
    Declined(Verdict),
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Executed { exit_code, .. } => *exit_code,
            Outcome::Blocked(_) => EXIT_BLOCKED,
            Outcome::Declined(_) => EXIT_CANCELLED,
        }
    }
}

/// Result of [`Pipeline::run`]
#[derive(Debug, Clone)]
pub struct CommandRun {
    pub evaluation: Evaluation,
    pub outcome: Outcome,
    /// The session to use for the next command
    pub session: SessionState,
}

pub struct Pipeline {
    resolver: Resolver,
    exec: ExecConfig,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        classifier: Box<dyn Classifier>,
        runner: Box<dyn InnerRunner>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            resolver: Resolver::new(config, classifier, runner)?,
            exec: ExecConfig::from_config(config),
        })
    }

    /// Pipeline with the configured classifier chain and the sandboxed
    /// executor for inner commands.
    pub fn from_config(config: &Config) -> Result<Self> {
        let exec = ExecConfig::from_config(config);
        let classifier = FallbackChain::from_config(&config.classifier);
        if classifier.is_empty() {
            info!("No classifier configured; every command falls back to the fail mode");
        }
        Self::new(
            config,
            Box::new(classifier),
            Box::new(SandboxRunner::new(exec)),
        )
    }

    /// Replace the execution settings for top-level commands.
    pub fn with_exec_config(mut self, exec: ExecConfig) -> Self {
        self.exec = exec;
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn exec_config(&self) -> &ExecConfig {
        &self.exec
    }

    /// Analyze `raw` without running it (inner substitutions may run).
    pub fn check(&self, raw: &str, session: &SessionState) -> Evaluation {
        let mut budget: ExecutionBudget = self.resolver.new_budget();
        let evaluation = self.resolver.evaluate(raw, session, &mut budget);
        debug!(
            action = %evaluation.verdict.action,
            substitutions_left = budget.remaining_substitutions(),
            elapsed_ms = budget.elapsed().as_millis() as u64,
            "command evaluated"
        );
        evaluation
    }

    /// Act on an evaluation. `confirm` is asked only for WARN.
    pub fn run(
        &self,
        mut evaluation: Evaluation,
        session: &SessionState,
        confirm: impl FnOnce(&Verdict) -> bool,
    ) -> Result<CommandRun> {
        let verdict = evaluation.verdict.clone();
        let confirmed = match verdict.action {
            Action::Block => {
                evaluation.lifecycle.advance(CommandState::Blocked);
                info!("Blocked: {}", verdict.reason);
                return Ok(CommandRun {
                    evaluation,
                    outcome: Outcome::Blocked(verdict),
                    session: session.with_exit_code(EXIT_BLOCKED),
                });
            }
            Action::Warn => {
                evaluation.lifecycle.advance(CommandState::Warned);
                confirm(&verdict)
            }
            Action::Allow => false,
        };

        let Some(approved) = approve(evaluation.command.clone(), &verdict, confirmed) else {
            return Ok(CommandRun {
                evaluation,
                outcome: Outcome::Declined(verdict),
                session: session.with_exit_code(EXIT_CANCELLED),
            });
        };
        evaluation.lifecycle.advance(CommandState::Executing);
        let execution = executor::execute(&approved, session, &self.exec)?;
        Ok(CommandRun {
            evaluation,
            outcome: Outcome::Executed {
                exit_code: execution.exit_code,
                captured: execution.captured,
            },
            session: execution.session,
        })
    }

    /// [`Pipeline::check`] followed by [`Pipeline::run`]
    pub fn submit(
        &self,
        raw: &str,
        session: &SessionState,
        confirm: impl FnOnce(&Verdict) -> bool,
    ) -> Result<CommandRun> {
        let evaluation = self.check(raw, session);
        self.run(evaluation, session, confirm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierRequest, ClassifierResponse};
    use crate::config::{EnforcementMode, Role};
    use crate::error::{AegishError, ClassifierError};
    use crate::policy::ApprovedCommand;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::tempdir;

    struct Fixed(Action, f64);

    impl Classifier for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn classify(
            &self,
            _: &ClassifierRequest,
        ) -> std::result::Result<ClassifierResponse, ClassifierError> {
            Ok(ClassifierResponse {
                action: self.0,
                reason: "fixed".into(),
                confidence: self.1,
            })
        }
    }

    struct NoRun;

    impl InnerRunner for NoRun {
        fn capture(&self, _: &ApprovedCommand, _: &SessionState, t: Duration) -> Result<Vec<u8>> {
            Err(AegishError::ExecTimeout(t))
        }
    }

    fn pipeline(action: Action) -> Pipeline {
        let config = Config::default();
        Pipeline::new(&config, Box::new(Fixed(action, 0.95)), Box::new(NoRun))
            .unwrap()
            .with_exec_config(ExecConfig {
                runner: PathBuf::from("/bin/bash"),
                runner_sha256: None,
                enforcement: EnforcementMode::Permissive,
                library_dirs: Vec::new(),
                timeout: Some(Duration::from_secs(10)),
                trampoline: None,
                preload: PathBuf::from("/nonexistent/libaegish_sandbox.so"),
            })
    }

    fn session(dir: &Path) -> SessionState {
        SessionState::new(
            dir.to_path_buf(),
            vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
            Role::Default,
            EnforcementMode::Permissive,
        )
    }

    #[test]
    fn test_blocked_command_not_run() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("ran");
        let p = pipeline(Action::Block);
        let run = p
            .submit(&format!("touch {}", marker.display()), &session(dir.path()), |_| true)
            .unwrap();
        assert!(matches!(run.outcome, Outcome::Blocked(_)));
        assert_eq!(run.session.last_exit_code(), EXIT_BLOCKED);
        assert_eq!(run.evaluation.lifecycle.state(), CommandState::Blocked);
        assert!(!marker.exists());
    }

    #[test]
    fn test_declined_warning() {
        let dir = tempdir().unwrap();
        let p = pipeline(Action::Warn);
        let mut asked = false;
        let run = p
            .submit("true", &session(dir.path()), |_| {
                asked = true;
                false
            })
            .unwrap();
        assert!(asked);
        assert!(matches!(run.outcome, Outcome::Declined(_)));
        assert_eq!(run.outcome.exit_code(), EXIT_CANCELLED);
        assert_eq!(run.evaluation.lifecycle.state(), CommandState::Warned);
    }

    #[test]
    fn test_allowed_command_runs() {
        if !Path::new("/bin/bash").is_file() {
            return;
        }
        let dir = tempdir().unwrap();
        let p = pipeline(Action::Allow);
        let run = p
            .submit("export GREETING=hi; exit 3", &session(dir.path()), |_| {
                panic!("no confirmation for ALLOW")
            })
            .unwrap();
        assert_eq!(run.outcome.exit_code(), 3);
        assert_eq!(run.evaluation.lifecycle.state(), CommandState::Executing);
    }

    #[test]
    fn test_confirmed_warning_runs() {
        if !Path::new("/bin/bash").is_file() {
            return;
        }
        let dir = tempdir().unwrap();
        let p = pipeline(Action::Warn);
        let run = p
            .submit("export GREETING=hi", &session(dir.path()), |_| true)
            .unwrap();
        assert_eq!(run.outcome.exit_code(), 0);
        assert_eq!(run.session.get_var("GREETING"), Some("hi"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.resolver.max_time_secs = 0;
        assert!(Pipeline::new(&config, Box::new(Fixed(Action::Allow, 1.0)), Box::new(NoRun)).is_err());
    }
}
