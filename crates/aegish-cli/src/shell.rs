//! Minimal read-validate-execute loop

use crate::output;
use aegish::pipeline::EXIT_INTERRUPTED;
use aegish::{Outcome, Pipeline, SessionState};
use colored::Colorize;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: nix::libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExit {
    /// Login shell: the session is over
    Terminated(i32),
    /// Embedded: control goes back to whoever started aegish
    Returned(i32),
}

impl ShellExit {
    pub fn code(self) -> i32 {
        match self {
            ShellExit::Terminated(c) | ShellExit::Returned(c) => c,
        }
    }
}

/// Parse a line that asks the shell itself to exit.
///
/// Returns `Some(code)` for `exit`, `exit N` and `logout`; a bare `exit`
/// uses `last`.
pub fn exit_request(line: &str, last: i32) -> Option<i32> {
    let mut words = line.split_whitespace();
    match words.next()? {
        "exit" | "logout" => {}
        _ => return None,
    }
    match (words.next(), words.next()) {
        (None, _) => Some(last),
        (Some(n), None) => Some(n.parse::<i32>().map(|c| c & 0xff).unwrap_or(2)),
        _ => None,
    }
}

fn install_sigint_handler() {
    // Child processes get the default disposition back on exec
    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to an atomic
    if let Err(e) = unsafe { sigaction(Signal::SIGINT, &action) } {
        debug!("SIGINT handler not installed: {e}");
    }
}

pub fn run_shell(
    pipeline: &Pipeline,
    mut session: SessionState,
    login: bool,
) -> ShellExit {
    install_sigint_handler();
    let interactive = io::stdin().is_terminal();
    let stdin = io::stdin();
    let mut input = stdin.lock();

    loop {
        if interactive {
            let cwd = session.working_directory().display().to_string();
            eprint!("{} {} ", cwd.truecolor(150, 150, 150), "aegish$".bold());
            let _ = io::stderr().flush();
        }

        let mut line = String::new();
        match read_command(&mut input, &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!("Failed to read input: {e}");
                break;
            }
        }
        // Ctrl-C while typing discards the line
        if INTERRUPTED.swap(false, Ordering::SeqCst) {
            session = session.with_exit_code(EXIT_INTERRUPTED);
            continue;
        }

        let command = line.trim();
        if command.is_empty() || command.starts_with('#') {
            continue;
        }
        if let Some(code) = exit_request(command, session.last_exit_code()) {
            return finish(login, code, interactive);
        }

        match pipeline.submit(command, &session, output::confirm_warning) {
            Ok(run) => {
                match &run.outcome {
                    Outcome::Blocked(verdict) => output::print_blocked(verdict),
                    Outcome::Declined(_) => output::print_declined(),
                    Outcome::Executed { exit_code, .. } => {
                        debug!(exit_code, "command finished")
                    }
                }
                session = run.session;
            }
            Err(e) => {
                error!("{e}");
                eprintln!("aegish: {e}");
                session = session.with_exit_code(1);
            }
        }
    }
    finish(login, session.last_exit_code(), interactive)
}

fn finish(login: bool, code: i32, interactive: bool) -> ShellExit {
    if login {
        if interactive {
            eprintln!("logout");
        }
        ShellExit::Terminated(code)
    } else {
        ShellExit::Returned(code)
    }
}

/// Read one logical line, joining backslash continuations.
fn read_command(input: &mut impl BufRead, line: &mut String) -> io::Result<usize> {
    let mut total = 0;
    loop {
        let n = input.read_line(line)?;
        total += n;
        if n == 0 {
            return Ok(total);
        }
        let trimmed = line.trim_end_matches('\n');
        if trimmed.ends_with('\\') && !trimmed.ends_with("\\\\") {
            line.truncate(trimmed.len() - 1);
            continue;
        }
        return Ok(total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_exit_request() {
        assert_eq!(exit_request("exit", 7), Some(7));
        assert_eq!(exit_request("exit 3", 7), Some(3));
        assert_eq!(exit_request("  logout ", 0), Some(0));
        assert_eq!(exit_request("exit 256", 0), Some(0));
        assert_eq!(exit_request("exit nope", 0), Some(2));
        assert_eq!(exit_request("exit 1 2", 0), None);
        assert_eq!(exit_request("exitcode", 0), None);
        assert_eq!(exit_request("echo exit", 0), None);
    }

    #[test]
    fn test_continuation_lines_joined() {
        let mut input = Cursor::new("echo a \\\nb\nls\n");
        let mut line = String::new();
        read_command(&mut input, &mut line).unwrap();
        assert_eq!(line, "echo a b\n");
        let mut line = String::new();
        read_command(&mut input, &mut line).unwrap();
        assert_eq!(line, "ls\n");
    }

    #[test]
    fn test_eof() {
        let mut input = Cursor::new("");
        let mut line = String::new();
        assert_eq!(read_command(&mut input, &mut line).unwrap(), 0);
    }

    #[test]
    fn test_shell_exit_codes() {
        assert_eq!(finish(true, 4, false), ShellExit::Terminated(4));
        assert_eq!(finish(false, 4, false), ShellExit::Returned(4));
        assert_eq!(ShellExit::Terminated(9).code(), 9);
    }
}
