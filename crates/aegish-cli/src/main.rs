//! aegish CLI - a shell front end that validates commands before running them
//!
//! This is the CLI binary that uses the aegish library for analysis and
//! sandboxed execution.

mod cli;
mod config;
mod output;
mod shell;

use aegish::classifier::health_check;
use aegish::{executor, Action, Config, Pipeline, Result, SessionState};
use clap::Parser;
use cli::{CheckArgs, Cli, Commands, RunArgs, SandboxExecArgs};
use colored::Colorize;
use std::ffi::OsString;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            eprintln!("aegish: {}", e);
            std::process::exit(1);
        }
    }
}

/// A leading `-` in argv[0] is how login(1) starts a login shell
fn invoked_as_login_shell() -> bool {
    std::env::args_os()
        .next()
        .map(|a: OsString| a.to_string_lossy().starts_with('-'))
        .unwrap_or(false)
}

fn run() -> Result<i32> {
    let login_argv0 = invoked_as_login_shell();
    let cli = Cli::parse();

    // The trampoline runs inside the sandboxed child: no config, no pipeline
    let command = match cli.command {
        Some(Commands::SandboxExec(args)) => return run_sandbox_exec(args),
        other => other,
    };

    let config = config::load(cli.config.as_deref())?;
    let pipeline = Pipeline::from_config(&config)?;
    let session = initial_session(&config)?;

    match command {
        Some(Commands::Check(args)) => run_check(&pipeline, &session, args),
        Some(Commands::Run(args)) => run_command(&pipeline, &session, args),
        Some(Commands::CheckClassifier) => run_check_classifier(&pipeline),
        Some(Commands::Shell(args)) => {
            output::print_banner(cli.silent);
            report_enforcement(&config, cli.silent);
            let exit = shell::run_shell(&pipeline, session, args.login || login_argv0);
            Ok(exit.code())
        }
        Some(Commands::SandboxExec(args)) => run_sandbox_exec(args),
        None => {
            output::print_banner(cli.silent);
            report_enforcement(&config, cli.silent);
            Ok(shell::run_shell(&pipeline, session, login_argv0).code())
        }
    }
}

fn initial_session(config: &Config) -> Result<SessionState> {
    Ok(SessionState::from_parent_env(
        std::env::current_dir()?,
        std::env::vars(),
        config.policy.role,
        config.enforcement_mode(),
    ))
}

fn report_enforcement(config: &Config, silent: bool) {
    if config.enforcement_mode() == aegish::EnforcementMode::Permissive {
        if !silent {
            eprintln!(
                "{}",
                "Permissive mode: commands run without kernel exec denial.".yellow()
            );
        }
        return;
    }
    let support = aegish::sandbox::support_info();
    if !support.is_supported {
        eprintln!(
            "{} {}",
            "WARNING: sandbox unavailable, running unenforced:".yellow().bold(),
            support.details
        );
    } else {
        info!("{}", support.details);
    }
    let preload = &config.sandbox.preload_library;
    if !preload.is_file() {
        eprintln!(
            "{} {}",
            "WARNING: preload library missing, commands will be refused:".yellow().bold(),
            preload.display()
        );
    }
}

/// Print the decision; the exit status encodes the action
fn run_check(pipeline: &Pipeline, session: &SessionState, args: CheckArgs) -> Result<i32> {
    let evaluation = pipeline.check(&args.command_line(), session);
    if args.json {
        let json = output::evaluation_json(&evaluation).map_err(std::io::Error::from)?;
        println!("{json}");
    } else {
        output::print_evaluation(&evaluation);
    }
    Ok(match evaluation.verdict.action {
        Action::Allow => 0,
        Action::Block => aegish::pipeline::EXIT_BLOCKED,
        Action::Warn => 2,
    })
}

fn run_command(pipeline: &Pipeline, session: &SessionState, args: RunArgs) -> Result<i32> {
    let run = pipeline.submit(&args.command_line(), session, output::confirm_warning)?;
    match &run.outcome {
        aegish::Outcome::Blocked(verdict) => output::print_blocked(verdict),
        aegish::Outcome::Declined(_) => output::print_declined(),
        aegish::Outcome::Executed { .. } => {}
    }
    Ok(run.outcome.exit_code())
}

fn run_check_classifier(pipeline: &Pipeline) -> Result<i32> {
    let classifier = pipeline.resolver().classifier();
    let result = health_check(classifier);
    output::print_health(classifier.name(), &result);
    Ok(if result.is_ok() { 0 } else { 1 })
}

fn run_sandbox_exec(args: SandboxExecArgs) -> Result<i32> {
    match executor::sandbox_exec(&args.runner, &args.library_dirs, &args.preload, &args.args)? {}
}
