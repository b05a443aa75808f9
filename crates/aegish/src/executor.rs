//! Sandboxed execution of approved commands
//!
//! An approved command runs as `runner --norc --noprofile -c WRAPPER` in its
//! own process group, with the session's sanitized variables as its whole
//! environment and the session directory as its working directory. The
//! wrapper restores `$?`, runs the command with the state descriptor
//! closed, then writes `env -0` to an inherited pipe. Nothing touches the
//! filesystem.
//!
//! In enforcing mode the runner is not started directly: a trampoline
//! (`aegish sandbox-exec`) applies the Landlock exec allowlist to itself and
//! then execs the runner with the preload library, whose constructor stacks
//! a second allowlist without the runner. Both are in place before any user
//! code runs and are inherited by everything it starts. The wrapper refuses
//! to run the command unless the second layer reported in.

use crate::config::{Config, EnforcementMode};
use crate::error::{AegishError, Result};
use crate::policy::ApprovedCommand;
use crate::resolver::InnerRunner;
use crate::sandbox::{
    self, ExecAllowlist, SandboxStatus, LAYER_MARKER, LAYER_MARKER_VAR, LIBRARY_DIRS_VAR,
};
use crate::session::{parse_nul_env, CapturedState, SessionState};
use nix::fcntl::OFlag;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cap on the captured environment
pub const MAX_STATE_BYTES: u64 = 1024 * 1024;
/// Cap on the captured output of an inner command
pub const MAX_CAPTURE_BYTES: u64 = 1024 * 1024;
/// Name of the hidden CLI subcommand that applies the sandbox
pub const TRAMPOLINE_SUBCOMMAND: &str = "sandbox-exec";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How approved commands are started
#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub runner: PathBuf,
    pub runner_sha256: Option<String>,
    pub enforcement: EnforcementMode,
    pub library_dirs: Vec<PathBuf>,
    /// Wall-clock limit for top-level commands; `None` means unlimited
    pub timeout: Option<Duration>,
    /// Program that understands [`TRAMPOLINE_SUBCOMMAND`]; required when
    /// enforcing
    pub trampoline: Option<PathBuf>,
    /// Preload library for the runner when enforcing
    pub preload: PathBuf,
}

impl ExecConfig {
    /// Derive the execution settings from the configuration. The current
    /// executable serves as trampoline.
    pub fn from_config(config: &Config) -> Self {
        Self {
            runner: config.runner_path(),
            runner_sha256: config.sandbox.runner_sha256.clone(),
            enforcement: config.enforcement_mode(),
            library_dirs: config.sandbox.library_dirs.clone(),
            timeout: config.sandbox.exec_timeout_secs.map(Duration::from_secs),
            trampoline: std::env::current_exe().ok(),
            preload: config.sandbox.preload_library.clone(),
        }
    }
}

/// Result of running one command
#[derive(Debug, Clone)]
pub struct Execution {
    pub exit_code: i32,
    /// The next session version
    pub session: SessionState,
    /// False when the command ended before its state could be read back
    pub captured: bool,
}

/// Run an approved command with the terminal attached and read back the
/// resulting session state.
pub fn execute(
    command: &ApprovedCommand,
    session: &SessionState,
    config: &ExecConfig,
) -> Result<Execution> {
    info!("Executing: {}", command.text());
    let foreground = is_terminal(libc::STDIN_FILENO);
    let mut running = spawn(command, session, config, Attach::Terminal { foreground })?;
    let waited = wait_with_timeout(&mut running.child, config.timeout);
    if foreground {
        reclaim_terminal();
    }
    let status = waited?;
    let exit_code = exit_code(status);
    let raw = running.state.join().unwrap_or_default();

    let env = (!raw.is_empty()).then(|| parse_nul_env(&raw));
    let captured = env.is_some();
    if !captured {
        debug!("No state captured; keeping previous environment");
    }
    Ok(Execution {
        exit_code,
        session: session.advance(CapturedState { exit_code, env }),
        captured,
    })
}

/// Run an approved inner command and return its standard output.
///
/// The session is not advanced: inner commands cannot change it.
pub fn capture(
    command: &ApprovedCommand,
    session: &SessionState,
    config: &ExecConfig,
    timeout: Duration,
) -> Result<Vec<u8>> {
    debug!("Capturing output of: {}", command.text());
    let mut running = spawn(command, session, config, Attach::Captured)?;
    let stdout = running
        .child
        .stdout
        .take()
        .ok_or_else(|| AegishError::SandboxInit("stdout pipe missing".to_string()))?;
    let output = read_in_background(stdout, MAX_CAPTURE_BYTES);
    wait_with_timeout(&mut running.child, Some(timeout))?;
    let _ = running.state.join();
    Ok(output.join().unwrap_or_default())
}

/// [`InnerRunner`] backed by the sandboxed executor
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    config: ExecConfig,
}

impl SandboxRunner {
    pub fn new(config: ExecConfig) -> Self {
        Self { config }
    }
}

impl InnerRunner for SandboxRunner {
    fn capture(
        &self,
        command: &ApprovedCommand,
        session: &SessionState,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        capture(command, session, &self.config, timeout)
    }
}

/// How the child's standard streams are connected
#[derive(Debug, Clone, Copy)]
enum Attach {
    /// Inherited; `foreground` hands it the controlling terminal
    Terminal { foreground: bool },
    /// No input, stdout piped back, stderr discarded
    Captured,
}

struct Running {
    child: Child,
    state: JoinHandle<Vec<u8>>,
}

fn spawn(
    command: &ApprovedCommand,
    session: &SessionState,
    config: &ExecConfig,
    attach: Attach,
) -> Result<Running> {
    if !config.runner.is_file() {
        return Err(AegishError::RunnerMissing(config.runner.clone()));
    }
    if let Some(ref expected) = config.runner_sha256 {
        verify_runner(&config.runner, expected)?;
    }

    let (state_read, state_write): (OwnedFd, OwnedFd) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;
    let state_fd = state_write.as_raw_fd();
    let enforcing = config.enforcement == EnforcementMode::Enforcing;
    let script = wrapper_script(command.text(), session.last_exit_code(), state_fd, enforcing);
    let runner_args: Vec<OsString> = vec![
        "--norc".into(),
        "--noprofile".into(),
        "-c".into(),
        script.into(),
    ];

    let mut cmd = match config.enforcement {
        EnforcementMode::Permissive => {
            let mut cmd = std::process::Command::new(&config.runner);
            cmd.args(&runner_args);
            cmd
        }
        EnforcementMode::Enforcing => {
            let trampoline = config.trampoline.as_ref().ok_or_else(|| {
                AegishError::SandboxInit("no sandbox trampoline available".to_string())
            })?;
            let mut cmd = std::process::Command::new(trampoline);
            cmd.args(trampoline_args(
                &config.runner,
                &config.library_dirs,
                &config.preload,
                &runner_args,
            ));
            cmd
        }
    };
    cmd.env_clear()
        .envs(session.exported_variables())
        .current_dir(session.working_directory());
    let foreground = match attach {
        Attach::Terminal { foreground } => foreground,
        Attach::Captured => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null());
            false
        }
    };

    // SAFETY: only async-signal-safe libc calls between fork and exec
    unsafe {
        cmd.pre_exec(move || {
            #[cfg(target_os = "linux")]
            {
                if libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            if libc::fcntl(state_fd, libc::F_SETFD, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            if libc::setpgid(0, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            if foreground {
                libc::signal(libc::SIGTTOU, libc::SIG_IGN);
                libc::tcsetpgrp(libc::STDIN_FILENO, libc::getpid());
                libc::signal(libc::SIGTTOU, libc::SIG_DFL);
            }
            Ok(())
        });
    }

    let program = cmd.get_program().to_string_lossy().into_owned();
    let child = cmd.spawn().map_err(|source| AegishError::Spawn { program, source })?;
    // The child holds the only write end now
    drop(state_write);
    let state = read_in_background(File::from(state_read), MAX_STATE_BYTES);
    Ok(Running { child, state })
}

/// Shell text that runs `command` and reports the resulting environment on
/// `state_fd`.
///
/// With `require_layer` the script exits 126 before the command unless the
/// preload layer set its marker.
pub fn wrapper_script(
    command: &str,
    last_exit_code: i32,
    state_fd: i32,
    require_layer: bool,
) -> String {
    let guard = if require_layer {
        format!(
            "[ \"${{{LAYER_MARKER_VAR}:-}}\" = {LAYER_MARKER} ] || exit 126\nunset {LAYER_MARKER_VAR}\n"
        )
    } else {
        String::new()
    };
    format!(
        "{guard}(exit {last_exit_code})\n{{ {command}\n}} {state_fd}>&-\n\
         __aegish_rc=$?\n\
         command -p env -0 >&{state_fd}\n\
         exit $__aegish_rc\n"
    )
}

/// Arguments for the trampoline:
/// `sandbox-exec --runner R --preload P [--library-dir D]... -- ARGS`
pub fn trampoline_args(
    runner: &Path,
    library_dirs: &[PathBuf],
    preload: &Path,
    args: &[OsString],
) -> Vec<OsString> {
    let mut out: Vec<OsString> = vec![
        TRAMPOLINE_SUBCOMMAND.into(),
        "--runner".into(),
        runner.into(),
        "--preload".into(),
        preload.into(),
    ];
    for dir in library_dirs {
        out.push("--library-dir".into());
        out.push(dir.into());
    }
    out.push("--".into());
    out.extend(args.iter().cloned());
    out
}

/// Apply the exec allowlist to this process, then replace it with the runner
/// with `preload` in `LD_PRELOAD`.
///
/// Entry point of the trampoline. The allowlist is built from this
/// process's `PATH`, which is the session's. The library directories are
/// passed on for the second layer.
pub fn sandbox_exec(
    runner: &Path,
    library_dirs: &[PathBuf],
    preload: &Path,
    args: &[OsString],
) -> Result<Infallible> {
    let preload = preload
        .canonicalize()
        .ok()
        .filter(|p| p.is_file())
        .ok_or_else(|| {
            AegishError::SandboxInit(format!("preload library {} not found", preload.display()))
        })?;
    let handoff = std::env::join_paths(library_dirs)
        .map_err(|e| AegishError::SandboxInit(format!("library directories: {e}")))?;

    let path_var = std::env::var("PATH").unwrap_or_default();
    let allowlist = ExecAllowlist::build(&path_var, library_dirs, runner);
    match sandbox::apply(&allowlist)? {
        SandboxStatus::Enforced => debug!("exec allowlist applied ({} rules)", allowlist.len()),
        SandboxStatus::Unavailable(details) => {
            warn!("Running without kernel exec denial: {details}")
        }
    }
    let err = std::process::Command::new(runner)
        .args(args)
        .env("LD_PRELOAD", &preload)
        .env(LIBRARY_DIRS_VAR, handoff)
        .env_remove(LAYER_MARKER_VAR)
        .exec();
    Err(AegishError::Spawn {
        program: runner.display().to_string(),
        source: err,
    })
}

/// Check the runner binary against a lowercase hex SHA-256.
pub fn verify_runner(path: &Path, expected: &str) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let actual: String = Sha256::digest(&bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(AegishError::RunnerHashMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Read `source` to EOF on a thread, keeping at most `cap` bytes.
///
/// Everything past the cap is drained so the writer never blocks.
fn read_in_background<R: Read + Send + 'static>(source: R, cap: u64) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let mut limited = source.take(cap);
        if let Err(e) = limited.read_to_end(&mut buf) {
            debug!("pipe read failed: {e}");
        }
        let mut rest = limited.into_inner();
        match io::copy(&mut rest, &mut io::sink()) {
            Ok(0) | Err(_) => {}
            Ok(n) => warn!("Discarded {n} bytes past the {cap}-byte capture limit"),
        }
        buf
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus> {
    let Some(timeout) = timeout else {
        return Ok(child.wait()?);
    };
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if started.elapsed() >= timeout {
            let pgid = Pid::from_raw(child.id() as i32);
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                debug!("killpg failed: {e}");
                let _ = child.kill();
            }
            let _ = child.wait();
            warn!("Command timed out after {timeout:?}; process group killed");
            return Err(AegishError::ExecTimeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}

fn is_terminal(fd: i32) -> bool {
    // SAFETY: isatty only inspects the descriptor
    unsafe { libc::isatty(fd) == 1 }
}

/// Take the terminal's foreground group back after a child exits.
fn reclaim_terminal() {
    // SAFETY: plain libc calls on the controlling terminal; SIGTTOU is
    // ignored so a background caller is not stopped
    unsafe {
        let previous = libc::signal(libc::SIGTTOU, libc::SIG_IGN);
        libc::tcsetpgrp(libc::STDIN_FILENO, libc::getpgrp());
        libc::signal(libc::SIGTTOU, previous);
    }
}
