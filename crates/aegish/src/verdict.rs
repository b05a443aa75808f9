//! Verdicts: one stage's proposed action for a command

use serde::{Deserialize, Serialize};
use std::fmt;

/// Proposed action. Ordered by severity: `Allow < Warn < Block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Warn,
    Block,
}

impl Action {
    /// Numeric severity, higher is stricter
    pub fn severity(self) -> u8 {
        match self {
            Action::Allow => 0,
            Action::Warn => 1,
            Action::Block => 2,
        }
    }

    /// Return the stricter of two actions
    pub fn escalate(self, floor: Action) -> Action {
        self.max(floor)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Allow => write!(f, "allow"),
            Action::Warn => write!(f, "warn"),
            Action::Block => write!(f, "block"),
        }
    }
}

/// Which stage produced a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerdictSource {
    StaticBlocklist,
    AstWalker,
    MetaExec,
    ParseFailureFloor,
    CanonicalizerFloor,
    SubstitutionResolver,
    LengthLimit,
    Classifier,
    FailMode,
}

impl fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerdictSource::StaticBlocklist => "static-blocklist",
            VerdictSource::AstWalker => "ast-walker",
            VerdictSource::MetaExec => "meta-exec",
            VerdictSource::ParseFailureFloor => "parse-failure-floor",
            VerdictSource::CanonicalizerFloor => "canonicalizer-floor",
            VerdictSource::SubstitutionResolver => "substitution-resolver",
            VerdictSource::LengthLimit => "length-limit",
            VerdictSource::Classifier => "classifier",
            VerdictSource::FailMode => "fail-mode",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub action: Action,
    pub reason: String,
    /// Always within `0.0..=1.0`
    pub confidence: f64,
    pub source: VerdictSource,
}

impl Verdict {
    pub fn new(
        action: Action,
        reason: impl Into<String>,
        confidence: f64,
        source: VerdictSource,
    ) -> Self {
        Self {
            action,
            reason: reason.into(),
            confidence: clamp_confidence(confidence),
            source,
        }
    }

    pub fn allow(reason: impl Into<String>, source: VerdictSource) -> Self {
        Self::new(Action::Allow, reason, 1.0, source)
    }

    pub fn warn(reason: impl Into<String>, source: VerdictSource) -> Self {
        Self::new(Action::Warn, reason, 1.0, source)
    }

    pub fn block(reason: impl Into<String>, source: VerdictSource) -> Self {
        Self::new(Action::Block, reason, 1.0, source)
    }

    pub fn is_block(&self) -> bool {
        self.action == Action::Block
    }
}

/// Clamp a confidence value into `0.0..=1.0`, mapping NaN to zero.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// The most severe action among `verdicts`, `Allow` when empty
pub fn max_action<'a>(verdicts: impl IntoIterator<Item = &'a Verdict>) -> Action {
    verdicts
        .into_iter()
        .map(|v| v.action)
        .max()
        .unwrap_or(Action::Allow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_ordering() {
        assert!(Action::Block > Action::Warn);
        assert!(Action::Warn > Action::Allow);
        assert_eq!(Action::Allow.escalate(Action::Warn), Action::Warn);
        assert_eq!(Action::Block.escalate(Action::Warn), Action::Block);
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(Verdict::new(Action::Allow, "", 3.0, VerdictSource::Classifier).confidence, 1.0);
        assert_eq!(clamp_confidence(-1.0), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
    }

    #[test]
    fn test_max_action() {
        let vs = vec![
            Verdict::allow("ok", VerdictSource::Classifier),
            Verdict::warn("hmm", VerdictSource::MetaExec),
        ];
        assert_eq!(max_action(&vs), Action::Warn);
        assert_eq!(max_action(&[]), Action::Allow);
    }

    #[test]
    fn test_action_serde_lowercase() {
        let json = serde_json::to_string(&Action::Block).unwrap();
        assert_eq!(json, "\"block\"");
        let src = serde_json::to_string(&VerdictSource::ParseFailureFloor).unwrap();
        assert_eq!(src, "\"parse-failure-floor\"");
    }
}
