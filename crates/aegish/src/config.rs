//! Read-only configuration consumed by the pipeline
//!
//! Loading (file locations, ownership checks, environment overrides) lives in
//! the CLI. This module only defines the typed surface and its defaults.

use crate::error::{AegishError, Result};
use crate::verdict::Action;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Runner used when enforcing: a private copy of bash that Landlock allows
pub const DEFAULT_RUNNER_PATH: &str = "/opt/aegish/bin/runner";
/// Runner used in permissive mode
pub const PERMISSIVE_RUNNER_PATH: &str = "/bin/bash";
/// Library the trampoline preloads into the runner when enforcing
pub const DEFAULT_PRELOAD_PATH: &str = "/opt/aegish/lib/libaegish_sandbox.so";

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;
pub const RESTRICTED_CONFIDENCE_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Production,
    #[default]
    Development,
}

/// What internal failures (classifier errors, failed inner executions) become
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Block
    #[default]
    Safe,
    /// Warn and let the user confirm
    Open,
}

/// Trust level of the person at the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Default,
    Sysadmin,
    Restricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarCmdAction {
    #[default]
    Block,
    Warn,
}

impl VarCmdAction {
    pub fn action(self) -> Action {
        match self {
            VarCmdAction::Block => Action::Block,
            VarCmdAction::Warn => Action::Warn,
        }
    }
}

/// Whether the kernel exec-denial layer is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    Enforcing,
    Permissive,
}

/// Handling of `$IFS` used as a token separator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfsPolicy {
    /// Rewrite `$IFS` / `${IFS}` forms to a space before blocklist matching
    #[default]
    Normalize,
    /// Leave the text alone and annotate it for the classifier
    Delegate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub mode: Mode,
    pub policy: PolicyConfig,
    pub resolver: ResolverConfig,
    pub sandbox: SandboxConfig,
    pub classifier: ClassifierConfig,
    pub canonicalizer: CanonicalizerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub fail_mode: FailMode,
    pub role: Role,
    pub var_cmd_action: VarCmdAction,
    /// Classifier ALLOW below this becomes WARN
    pub confidence_threshold: f64,
    pub ifs_policy: IfsPolicy,
    /// Additional regexes, each producing a BLOCK on match
    pub extra_block_patterns: Vec<String>,
    pub max_command_length: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            fail_mode: FailMode::Safe,
            role: Role::Default,
            var_cmd_action: VarCmdAction::Block,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            ifs_policy: IfsPolicy::Normalize,
            extra_block_patterns: Vec::new(),
            max_command_length: 4096,
        }
    }
}

impl PolicyConfig {
    /// Threshold after applying the role adjustment
    pub fn effective_threshold(&self) -> f64 {
        match self.role {
            Role::Restricted => self.confidence_threshold.max(RESTRICTED_CONFIDENCE_THRESHOLD),
            Role::Default | Role::Sysadmin => self.confidence_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    pub max_depth: u32,
    pub max_substitutions: u32,
    pub max_time_secs: u64,
    /// Wall-clock limit for each inner command executed to learn its output
    pub inner_timeout_secs: u64,
    pub max_script_size: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_substitutions: 8,
            max_time_secs: 10,
            inner_timeout_secs: 3,
            max_script_size: 8192,
        }
    }
}

impl ResolverConfig {
    pub fn max_time(&self) -> Duration {
        Duration::from_secs(self.max_time_secs)
    }

    pub fn inner_timeout(&self) -> Duration {
        Duration::from_secs(self.inner_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Overrides the mode-derived default
    pub enforcement: Option<EnforcementMode>,
    pub runner_path: Option<PathBuf>,
    /// Lowercase hex SHA-256 the runner must match
    pub runner_sha256: Option<String>,
    pub exec_timeout_secs: Option<u64>,
    /// Directories whose files stay executable (loaders, shared libraries)
    pub library_dirs: Vec<PathBuf>,
    /// Applies the second exec layer inside the runner
    pub preload_library: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enforcement: None,
            runner_path: None,
            runner_sha256: None,
            exec_timeout_secs: None,
            library_dirs: ["/lib", "/lib64", "/usr/lib", "/usr/lib64", "/usr/libexec"]
                .iter()
                .map(PathBuf::from)
                .collect(),
            preload_library: PathBuf::from(DEFAULT_PRELOAD_PATH),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    /// External program speaking the JSON protocol; none means unavailable
    pub command: Option<PathBuf>,
    pub args: Vec<String>,
    /// Tried in order after `command` fails
    pub fallbacks: Vec<ClassifierEndpoint>,
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            fallbacks: Vec::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierEndpoint {
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanonicalizerConfig {
    /// Leave secrets (`*_API_KEY`, `*_TOKEN`, ...) unexpanded
    pub filter_sensitive_vars: bool,
}

impl Config {
    pub fn enforcement_mode(&self) -> EnforcementMode {
        self.sandbox.enforcement.unwrap_or(match self.mode {
            Mode::Production => EnforcementMode::Enforcing,
            Mode::Development => EnforcementMode::Permissive,
        })
    }

    pub fn runner_path(&self) -> PathBuf {
        if let Some(ref path) = self.sandbox.runner_path {
            return path.clone();
        }
        match self.enforcement_mode() {
            EnforcementMode::Enforcing => PathBuf::from(DEFAULT_RUNNER_PATH),
            EnforcementMode::Permissive => PathBuf::from(PERMISSIVE_RUNNER_PATH),
        }
    }

    /// Reject values that would silently disable a limit
    pub fn validate(&self) -> Result<()> {
        let t = self.policy.confidence_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(AegishError::ConfigParse(format!(
                "policy.confidence_threshold must be within 0.0..=1.0, got {t}"
            )));
        }
        if self.resolver.max_time_secs == 0 || self.resolver.inner_timeout_secs == 0 {
            return Err(AegishError::ConfigParse(
                "resolver time limits must be greater than zero".to_string(),
            ));
        }
        if self.classifier.timeout_secs == 0 {
            return Err(AegishError::ConfigParse(
                "classifier.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.policy.max_command_length == 0 {
            return Err(AegishError::ConfigParse(
                "policy.max_command_length must be greater than zero".to_string(),
            ));
        }
        if let Some(ref hash) = self.sandbox.runner_sha256 {
            if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(AegishError::ConfigParse(
                    "sandbox.runner_sha256 must be 64 hex characters".to_string(),
                ));
            }
        }
        Ok(())
    }
}
