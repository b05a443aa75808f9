//! CLI output styling for aegish

use aegish::resolver::{ResolutionState, Substitution};
use aegish::{Action, Evaluation, Verdict};
use colored::Colorize;
use serde::Serialize;
use std::io::{BufRead, IsTerminal, Write};

/// Print the aegish banner
pub fn print_banner(silent: bool) {
    if silent {
        return;
    }
    let title = "aegish".truecolor(0, 153, 153).bold();
    let ver = format!("v{}", env!("CARGO_PKG_VERSION")).white();
    eprintln!();
    eprintln!("  {} {} {}", title, ver, "- commands are checked before they run".truecolor(150, 150, 150));
    eprintln!();
}

fn action_label(action: Action) -> colored::ColoredString {
    match action {
        Action::Allow => "ALLOW".green().bold(),
        Action::Warn => "WARN".yellow().bold(),
        Action::Block => "BLOCK".red().bold(),
    }
}

fn state_label(state: &ResolutionState) -> String {
    match state {
        ResolutionState::Unresolved => "unresolved".to_string(),
        ResolutionState::Resolved => "resolved".to_string(),
        ResolutionState::Blocked => "blocked".to_string(),
        ResolutionState::Warned => "warned".to_string(),
        ResolutionState::BudgetExceeded(limit) => format!("budget-exceeded ({limit})"),
    }
}

/// Human-readable decision for `aegish check`
pub fn print_evaluation(evaluation: &Evaluation) {
    let verdict = &evaluation.verdict;
    println!(
        "{} {}",
        action_label(verdict.action),
        format!("({}, confidence {:.2})", verdict.source, verdict.confidence).truecolor(150, 150, 150)
    );
    println!("  {}", verdict.reason);
    if evaluation.command.canonical_text() != evaluation.command.raw_text() {
        println!("  {} {}", "canonical:".white(), evaluation.command.canonical_text());
    }
    if evaluation.resolved.canonical_text() != evaluation.command.canonical_text() {
        println!("  {} {}", "resolved:".white(), evaluation.resolved.canonical_text());
    }
    for sub in evaluation.all_substitutions() {
        println!(
            "  {} {} [{}]",
            format!("{}:", sub.kind).white(),
            sub.inner_text.lines().next().unwrap_or(""),
            state_label(&sub.state)
        );
    }
}

#[derive(Serialize)]
struct SubstitutionReport<'a> {
    kind: String,
    inner: &'a str,
    state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

#[derive(Serialize)]
struct EvaluationReport<'a> {
    verdict: &'a Verdict,
    raw: &'a str,
    canonical: &'a str,
    resolved: &'a str,
    flags: Vec<String>,
    substitutions: Vec<SubstitutionReport<'a>>,
}

/// JSON decision for `aegish check --json`
pub fn evaluation_json(evaluation: &Evaluation) -> serde_json::Result<String> {
    let report = EvaluationReport {
        verdict: &evaluation.verdict,
        raw: evaluation.command.raw_text(),
        canonical: evaluation.command.canonical_text(),
        resolved: evaluation.resolved.canonical_text(),
        flags: evaluation
            .command
            .flags()
            .iter()
            .map(ToString::to_string)
            .collect(),
        substitutions: evaluation
            .all_substitutions()
            .into_iter()
            .map(|s: &Substitution| SubstitutionReport {
                kind: s.kind.to_string(),
                inner: &s.inner_text,
                state: state_label(&s.state),
                reason: s.reason.as_deref(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&report)
}

pub fn print_blocked(verdict: &Verdict) {
    eprintln!("{} {}", "aegish: blocked:".red().bold(), verdict.reason);
}

pub fn print_declined() {
    eprintln!("{}", "aegish: cancelled".yellow());
}

/// Show a WARN and ask whether to run anyway. Defaults to no, and to no
/// without a terminal.
pub fn confirm_warning(verdict: &Verdict) -> bool {
    eprintln!("{} {}", "aegish: warning:".yellow().bold(), verdict.reason);
    if !std::io::stdin().is_terminal() {
        eprintln!("{}", "aegish: not a terminal, refusing without confirmation".yellow());
        return false;
    }
    eprint!("Run anyway? [y/N] ");
    let _ = std::io::stderr().flush();
    let mut input = String::new();
    if std::io::stdin().lock().read_line(&mut input).is_err() {
        return false;
    }
    let input = input.trim().to_lowercase();
    input == "y" || input == "yes"
}

pub fn print_health(name: &str, result: &Result<(), aegish::ClassifierError>) {
    match result {
        Ok(()) => println!("{} classifier '{}' answered and allowed a harmless command", "OK".green().bold(), name),
        Err(e) => println!("{} classifier '{}': {} ({})", "FAILED".red().bold(), name, e, e.kind()),
    }
}
