//! Per-session state threaded through each command cycle
//!
//! A `SessionState` is created once when the shell starts. Only the executor
//! produces the next version (see [`crate::executor`]); every other stage
//! reads it.

use crate::config::{EnforcementMode, Role};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Inherited variables passed to the first command of a session
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "SHELL",
    "PWD",
    "OLDPWD",
    "SHLVL",
    "TERM",
    "COLORTERM",
    "TERM_PROGRAM",
    "LANG",
    "LANGUAGE",
    "TZ",
    "TMPDIR",
    "DISPLAY",
    "WAYLAND_DISPLAY",
    "SSH_AUTH_SOCK",
    "SSH_AGENT_PID",
    "GPG_AGENT_INFO",
    "DBUS_SESSION_BUS_ADDRESS",
    "HOSTNAME",
];

pub const ALLOWED_ENV_PREFIXES: &[&str] = &["LC_", "XDG_", "AEGISH_"];

/// Name fragments that mark a variable as a secret
const SENSITIVE_VAR_PATTERNS: &[&str] = &[
    "_API_KEY",
    "_SECRET",
    "_PASSWORD",
    "_TOKEN",
    "_CREDENTIAL",
    "_PRIVATE_KEY",
    "API_KEY",
    "SECRET_KEY",
    "ACCESS_KEY",
];

/// Returns true if a variable can hijack the behavior of the next shell or
/// the programs it starts.
///
/// Covers linker injection, shell startup and field-splitting hooks,
/// pager/editor hooks, and interpreter module injection.
pub fn is_dangerous_env_var(key: &str) -> bool {
    // Linker injection
    key.starts_with("LD_")
        || key.starts_with("DYLD_")
        // Shell injection
        || key == "BASH_ENV"
        || key == "ENV"
        || key == "CDPATH"
        || key == "GLOBIGNORE"
        || key.starts_with("BASH_FUNC_")
        || key == "PROMPT_COMMAND"
        || key == "PS4"
        || key == "SHELLOPTS"
        || key == "BASHOPTS"
        || key == "IFS"
        // Pager / editor hooks
        || key == "PAGER"
        || key == "MANPAGER"
        || key == "GIT_PAGER"
        || key == "LESSOPEN"
        || key == "LESSCLOSE"
        || key == "EDITOR"
        || key == "VISUAL"
        // Python
        || key == "PYTHONSTARTUP"
        || key == "PYTHONPATH"
        // Node.js
        || key == "NODE_OPTIONS"
        || key == "NODE_PATH"
        // Perl
        || key == "PERL5OPT"
        || key == "PERL5LIB"
        // Ruby
        || key == "RUBYOPT"
        || key == "RUBYLIB"
        || key == "GEM_PATH"
        || key == "GEM_HOME"
        // JVM
        || key == "JAVA_TOOL_OPTIONS"
        || key == "_JAVA_OPTIONS"
        // .NET
        || key == "DOTNET_STARTUP_HOOKS"
        // Go
        || key == "GOFLAGS"
        // Sandbox handoff
        || key.starts_with(crate::sandbox::INTERNAL_VAR_PREFIX)
}

fn is_allowed_inherited(key: &str) -> bool {
    ALLOWED_ENV_VARS.contains(&key) || ALLOWED_ENV_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Whether a variable name looks like it holds a credential
pub fn is_sensitive_var(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SENSITIVE_VAR_PATTERNS.iter().any(|p| upper.contains(p))
}

/// Drop every denylisted variable. Applied on every update of the session map.
pub fn sanitize_env<I>(vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter(|(k, _)| !k.is_empty() && !is_dangerous_env_var(k))
        .collect()
}

/// Parse NUL-delimited `KEY=VALUE` records as written by `env -0`.
///
/// Values may contain newlines. Records without `=` or with an empty name are
/// skipped; invalid UTF-8 is replaced.
pub fn parse_nul_env(raw: &[u8]) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for entry in raw.split(|b| *b == 0) {
        if entry.is_empty() {
            continue;
        }
        let text = String::from_utf8_lossy(entry);
        if let Some(eq) = text.find('=') {
            if eq > 0 {
                env.insert(text[..eq].to_string(), text[eq + 1..].to_string());
            }
        }
    }
    env
}

/// State read back from a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedState {
    pub exit_code: i32,
    /// `None` when the command produced no capture (killed, exec'd away)
    pub env: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    working_directory: PathBuf,
    exported: BTreeMap<String, String>,
    last_exit_code: i32,
    role: Role,
    mode: EnforcementMode,
}

impl SessionState {
    /// Build a session from explicitly chosen variables.
    ///
    /// Denylisted names are dropped.
    pub fn new<I>(working_directory: PathBuf, vars: I, role: Role, mode: EnforcementMode) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            working_directory,
            exported: sanitize_env(vars),
            last_exit_code: 0,
            role,
            mode,
        }
    }

    /// Build a session from the parent process environment.
    ///
    /// Only allowlisted variables are inherited.
    pub fn from_parent_env<I>(
        working_directory: PathBuf,
        parent: I,
        role: Role,
        mode: EnforcementMode,
    ) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let inherited = parent.into_iter().filter(|(k, _)| is_allowed_inherited(k));
        Self::new(working_directory, inherited, role, mode)
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn exported_variables(&self) -> &BTreeMap<String, String> {
        &self.exported
    }

    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.exported.get(name).map(String::as_str)
    }

    pub fn last_exit_code(&self) -> i32 {
        self.last_exit_code
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn mode(&self) -> EnforcementMode {
        self.mode
    }

    /// Produce the next session version from a finished command.
    ///
    /// The captured variables are re-sanitized here on every cycle. The
    /// working directory follows the captured `PWD` when it still exists.
    pub(crate) fn advance(&self, captured: CapturedState) -> SessionState {
        let mut next = self.clone();
        next.last_exit_code = captured.exit_code;
        if let Some(env) = captured.env {
            next.exported = sanitize_env(env);
            if let Some(pwd) = next.exported.get("PWD") {
                let candidate = PathBuf::from(pwd);
                if candidate.is_absolute() && candidate.is_dir() {
                    next.working_directory = candidate;
                }
            }
        }
        next
    }

    /// Record an exit code for a command that never ran (blocked, cancelled)
    pub fn with_exit_code(&self, exit_code: i32) -> SessionState {
        let mut next = self.clone();
        next.last_exit_code = exit_code;
        next
    }
}
