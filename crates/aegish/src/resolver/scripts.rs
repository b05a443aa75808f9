//! Scripts a command runs without spelling them out
//!
//! Finds `source f`, `. f`, `<interpreter> f`, `awk -f f`, `<interpreter> < f`
//! and direct execution of `./f`, plus here-document and here-string bodies
//! fed to an interpreter. Contents are read with a size cap; binary files
//! and credential paths are refused.

use crate::error::{AegishError, Result};
use crate::session::SessionState;
use crate::shell::{RedirectOp, Script, SimpleCommand, Span, Word};
use crate::validator::ast_walker::for_each_simple;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

const SHELL_INTERPRETERS: &[&str] = &["bash", "sh", "zsh", "dash", "ksh", "fish"];

const SCRIPT_INTERPRETERS: &[&str] = &[
    "python", "python2", "python3", "ruby", "perl", "node", "nodejs", "lua", "php", "Rscript",
];

/// Interpreters that take their program with `-f`
const F_FLAG_INTERPRETERS: &[&str] = &["awk", "gawk", "mawk", "nawk", "sed", "gsed"];

/// Flags whose argument is inline code or a module, not a file
const INLINE_CODE_FLAGS: &[&str] = &["-c", "-m", "-e", "-E", "-W", "-X"];

/// Prefix commands skipped when looking for the interpreter
const COMMAND_PREFIXES: &[&str] = &[
    "env", "nohup", "nice", "ionice", "time", "timeout", "strace", "ltrace", "watch", "setsid",
    "taskset", "numactl", "chrt", "command", "exec", "builtin",
];

const SENSITIVE_PATHS: &[&str] = &["/etc/shadow", "/etc/gshadow", "/etc/sudoers", "/etc/master.passwd"];

const SENSITIVE_GLOBS: &[&str] = &[
    "/etc/ssh/*key*",
    "/etc/ssl/private/*",
    "*/.ssh/id_*",
    "*/.ssh/authorized_keys",
    "*/.aws/credentials",
    "*/.pgpass",
    "*/.my.cnf",
];

/// How a script reached the command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    /// A file path
    File(String),
    /// A here-document or here-string body
    Inline { body: String, here_string: bool },
}

/// One script the command would run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRef {
    pub source: ScriptSource,
    /// `source`, `.`, or the interpreter's file name
    pub interpreter: String,
    /// Contents are shell code and can be analyzed like a command
    pub shell: bool,
    /// Run as a program (`./f`), so it may just as well be a binary
    pub direct: bool,
    /// The referencing simple command
    pub span: Span,
}

fn base_name(text: &str) -> &str {
    text.rsplit('/').next().unwrap_or(text)
}

fn is_versioned_python(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("python") else {
        return false;
    };
    let rest = rest.strip_prefix('3').unwrap_or(rest);
    match rest.strip_prefix('.') {
        Some(minor) => !minor.is_empty() && minor.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

fn is_interpreter(name: &str) -> bool {
    SHELL_INTERPRETERS.contains(&name)
        || SCRIPT_INTERPRETERS.contains(&name)
        || F_FLAG_INTERPRETERS.contains(&name)
        || is_versioned_python(name)
}

/// Literal text of every word, or `None` if any word needs runtime expansion
fn literal_words(words: &[Word]) -> Vec<Option<String>> {
    words.iter().map(Word::literal_text).collect()
}

/// Index of the first word after prefix commands and their options
fn skip_prefixes(words: &[Option<String>]) -> usize {
    let mut idx = 0;
    while let Some(Some(word)) = words.get(idx) {
        let name = base_name(word);
        if !COMMAND_PREFIXES.contains(&name) {
            break;
        }
        idx += 1;
        while let Some(Some(next)) = words.get(idx) {
            if next.starts_with('-') {
                idx += 1;
                // An option's value, e.g. `nice -n 10`
                if let Some(Some(value)) = words.get(idx) {
                    if !value.starts_with('-') && !is_interpreter(base_name(value)) {
                        idx += 1;
                    }
                }
            } else if (name == "env" && next.contains('='))
                || (name == "timeout" && next.starts_with(|c: char| c.is_ascii_digit()))
            {
                idx += 1;
            } else {
                break;
            }
        }
    }
    idx
}

fn script_argument(interpreter: &str, args: &[Option<String>]) -> Option<String> {
    if F_FLAG_INTERPRETERS.contains(&interpreter) {
        let pos = args.iter().position(|a| a.as_deref() == Some("-f"))?;
        return args.get(pos + 1).cloned().flatten();
    }
    for arg in args {
        let arg = arg.as_deref()?;
        if INLINE_CODE_FLAGS.contains(&arg) {
            return None;
        }
        if arg.starts_with('-') {
            continue;
        }
        return Some(arg.to_string());
    }
    None
}

fn refs_for(cmd: &SimpleCommand) -> Vec<ScriptRef> {
    let words = literal_words(&cmd.words);
    let idx = skip_prefixes(&words);
    let Some(Some(first)) = words.get(idx) else {
        return Vec::new();
    };
    let name = base_name(first).to_string();
    let args = &words[idx + 1..];
    let mut refs = Vec::new();

    let file = |path: String, interpreter: &str, shell: bool| ScriptRef {
        source: ScriptSource::File(path),
        interpreter: interpreter.to_string(),
        shell,
        direct: false,
        span: cmd.span,
    };

    if first == "source" || first == "." {
        if let Some(Some(path)) = args.first() {
            refs.push(file(path.clone(), first.as_str(), true));
        }
        return refs;
    }

    if is_interpreter(&name) {
        let shell = SHELL_INTERPRETERS.contains(&name.as_str());
        if let Some(path) = script_argument(&name, args) {
            refs.push(file(path, name.as_str(), shell));
        }
        for redirect in &cmd.redirects {
            match redirect.op {
                RedirectOp::In if redirect.fd.map_or(true, |fd| fd == 0) => {
                    if let Some(path) = redirect.target.literal_text() {
                        refs.push(file(path, name.as_str(), shell));
                    }
                }
                RedirectOp::HereDoc { .. } => {
                    if let Some(ref doc) = redirect.heredoc {
                        refs.push(ScriptRef {
                            source: ScriptSource::Inline {
                                body: doc.body.clone(),
                                here_string: false,
                            },
                            interpreter: name.clone(),
                            shell,
                            direct: false,
                            span: cmd.span,
                        });
                    }
                }
                RedirectOp::HereString => refs.push(ScriptRef {
                    source: ScriptSource::Inline {
                        body: redirect
                            .target
                            .literal_text()
                            .unwrap_or_else(|| redirect.target.to_string()),
                        here_string: true,
                    },
                    interpreter: name.clone(),
                    shell,
                    direct: false,
                    span: cmd.span,
                }),
                _ => {}
            }
        }
        return refs;
    }

    if first.starts_with("./") || first.starts_with('/') {
        refs.push(ScriptRef {
            direct: true,
            ..file(first.clone(), name.as_str(), false)
        });
    }
    refs
}

/// Every script reference in `script`, in source order
pub fn find_script_refs(script: &Script) -> Vec<ScriptRef> {
    let mut refs = Vec::new();
    for_each_simple(script, &mut |cmd, _| refs.extend(refs_for(cmd)));
    refs
}

/// Refuses reads of credential files
#[derive(Debug)]
pub struct SensitivePaths {
    globs: GlobSet,
}

impl SensitivePaths {
    pub fn new() -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in SENSITIVE_GLOBS {
            let glob = Glob::new(pattern).map_err(|e| AegishError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        let globs = builder.build().map_err(|e| AegishError::InvalidPattern {
            pattern: SENSITIVE_GLOBS.join(","),
            reason: e.to_string(),
        })?;
        Ok(Self { globs })
    }

    pub fn is_sensitive(&self, path: &Path) -> bool {
        path.to_str().is_some_and(|p| SENSITIVE_PATHS.contains(&p)) || self.globs.is_match(path)
    }
}

/// Expand `~` and make `path` absolute against the session directory.
pub fn resolve_path(path: &str, session: &SessionState) -> PathBuf {
    let expanded = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match session.get_var("HOME") {
            Some(home) => PathBuf::from(format!("{home}{rest}")),
            None => PathBuf::from(path),
        },
        _ => PathBuf::from(path),
    };
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        session.working_directory().join(expanded)
    };
    fs::canonicalize(&absolute).unwrap_or(absolute)
}

/// Why a script's contents could not be attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReadError {
    Missing,
    Sensitive,
    TooLarge(u64),
    Binary,
    Unreadable(String),
}

impl std::fmt::Display for ScriptReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptReadError::Missing => write!(f, "file not found"),
            ScriptReadError::Sensitive => write!(f, "sensitive path refused"),
            ScriptReadError::TooLarge(size) => write!(f, "file too large ({size} bytes)"),
            ScriptReadError::Binary => write!(f, "binary file"),
            ScriptReadError::Unreadable(e) => write!(f, "could not read file: {e}"),
        }
    }
}

/// Read at most `max_size` bytes of a text script.
pub fn read_script(
    path: &Path,
    sensitive: &SensitivePaths,
    max_size: u64,
) -> std::result::Result<String, ScriptReadError> {
    if sensitive.is_sensitive(path) {
        return Err(ScriptReadError::Sensitive);
    }
    let meta = fs::metadata(path).map_err(|_| ScriptReadError::Missing)?;
    if !meta.is_file() {
        return Err(ScriptReadError::Missing);
    }
    if meta.len() > max_size {
        return Err(ScriptReadError::TooLarge(meta.len()));
    }
    let mut buf = Vec::new();
    fs::File::open(path)
        .and_then(|f| f.take(max_size).read_to_end(&mut buf))
        .map_err(|e| ScriptReadError::Unreadable(e.to_string()))?;
    if buf.iter().take(512).any(|&b| b == 0) {
        return Err(ScriptReadError::Binary);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnforcementMode, Role};
    use crate::shell::parse;
    use tempfile::tempdir;

    fn refs(src: &str) -> Vec<ScriptRef> {
        find_script_refs(&parse(src).unwrap())
    }

    fn file_of(r: &ScriptRef) -> &str {
        match &r.source {
            ScriptSource::File(p) => p,
            ScriptSource::Inline { .. } => panic!("expected file"),
        }
    }

    #[test]
    fn test_source_and_dot() {
        let r = refs("source ./env.sh; . /etc/profile");
        assert_eq!(r.len(), 2);
        assert_eq!(file_of(&r[0]), "./env.sh");
        assert!(r[0].shell);
        assert_eq!(r[1].interpreter, ".");
    }

    #[test]
    fn test_interpreters_and_prefixes() {
        let r = refs("nohup python3 -u job.py --flag");
        assert_eq!(file_of(&r[0]), "job.py");
        assert!(!r[0].shell);
        let r = refs("timeout 30 env A=1 bash run.sh");
        assert_eq!(file_of(&r[0]), "run.sh");
        assert!(r[0].shell);
        let r = refs("nice -n 10 python3.11 x.py");
        assert_eq!(file_of(&r[0]), "x.py");
        assert!(refs("python3 -c 'print(1)'").is_empty());
        assert!(refs("python -m http.server").is_empty());
    }

    #[test]
    fn test_awk_file_flag() {
        let r = refs("awk -F: -f prog.awk /etc/passwd");
        assert_eq!(file_of(&r[0]), "prog.awk");
        assert!(refs("awk '{print $1}' file").is_empty());
    }

    #[test]
    fn test_direct_execution_and_redirect() {
        let r = refs("./deploy.sh prod");
        assert_eq!(file_of(&r[0]), "./deploy.sh");
        assert!(r[0].direct);
        assert_eq!(file_of(&refs("bash < setup.sh")[0]), "setup.sh");
        assert!(refs("ls -la").is_empty());
    }

    #[test]
    fn test_inline_bodies() {
        let r = refs("python3 <<EOF\nimport os\nEOF\n");
        assert!(matches!(&r[0].source, ScriptSource::Inline { body, here_string: false } if body == "import os\n"));
        let r = refs("bash <<< 'rm -rf /'");
        assert!(matches!(&r[0].source, ScriptSource::Inline { body, here_string: true } if body == "rm -rf /"));
        assert!(r[0].shell);
        assert!(refs("cat <<EOF\nhi\nEOF\n").is_empty());
    }

    #[test]
    fn test_sensitive_paths() {
        let s = SensitivePaths::new().unwrap();
        assert!(s.is_sensitive(Path::new("/etc/shadow")));
        assert!(s.is_sensitive(Path::new("/home/u/.ssh/id_ed25519")));
        assert!(s.is_sensitive(Path::new("/root/.aws/credentials")));
        assert!(!s.is_sensitive(Path::new("/home/u/script.sh")));
    }

    #[test]
    fn test_read_script() {
        let dir = tempdir().unwrap();
        let s = SensitivePaths::new().unwrap();
        let text = dir.path().join("a.sh");
        fs::write(&text, "echo hi\n").unwrap();
        assert_eq!(read_script(&text, &s, 8192).unwrap(), "echo hi\n");

        let bin = dir.path().join("b");
        fs::write(&bin, b"\x7fELF\x00\x01").unwrap();
        assert_eq!(read_script(&bin, &s, 8192), Err(ScriptReadError::Binary));

        let big = dir.path().join("big.sh");
        fs::write(&big, "x".repeat(9000)).unwrap();
        assert_eq!(read_script(&big, &s, 8192), Err(ScriptReadError::TooLarge(9000)));

        assert_eq!(
            read_script(&dir.path().join("none"), &s, 8192),
            Err(ScriptReadError::Missing)
        );
    }

    #[test]
    fn test_resolve_path() {
        let dir = tempdir().unwrap();
        let session = SessionState::new(
            dir.path().to_path_buf(),
            vec![("HOME".to_string(), "/home/u".to_string())],
            Role::Default,
            EnforcementMode::Permissive,
        );
        assert_eq!(resolve_path("~/x.sh", &session), PathBuf::from("/home/u/x.sh"));
        fs::write(dir.path().join("y.sh"), "").unwrap();
        assert_eq!(
            resolve_path("y.sh", &session),
            fs::canonicalize(dir.path().join("y.sh")).unwrap()
        );
    }
}
