//! The immutable command value every stage consumes

use crate::shell::{self, ParseError, Script};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Events recorded while canonicalizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CanonFlag {
    /// `$'...'` escapes were decoded
    EscapesDecoded,
    /// Backtick substitutions were rewritten as `$(...)`
    BackticksNormalized,
    BraceExpanded,
    /// A brace expression had more alternatives than allowed and was left
    /// unexpanded
    BraceOverflow,
    GlobExpanded,
    /// A wildcard matched more paths than allowed; only the first were kept
    GlobTruncated,
    VariablesExpanded,
    /// `$IFS` appears in the command
    IfsReference,
    /// The text (or a sub-step) could not be tokenized or parsed
    ParseFailed,
}

impl CanonFlag {
    /// Flags that mean the canonical text may not be what the shell runs
    pub fn imposes_warn_floor(self) -> bool {
        matches!(self, CanonFlag::BraceOverflow | CanonFlag::ParseFailed)
    }
}

impl fmt::Display for CanonFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CanonFlag::EscapesDecoded => "escapes-decoded",
            CanonFlag::BackticksNormalized => "backticks-normalized",
            CanonFlag::BraceExpanded => "brace-expanded",
            CanonFlag::BraceOverflow => "brace-overflow",
            CanonFlag::GlobExpanded => "glob-expanded",
            CanonFlag::GlobTruncated => "glob-truncated",
            CanonFlag::VariablesExpanded => "variables-expanded",
            CanonFlag::IfsReference => "ifs-reference",
            CanonFlag::ParseFailed => "parse-failed",
        };
        f.write_str(s)
    }
}

/// A command line after canonicalization.
///
/// Built once by [`crate::canonicalize::canonicalize`] (or by the resolver
/// when splicing substitution output) and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Command {
    raw_text: String,
    pre_expansion_text: String,
    canonical_text: String,
    parse_result: Result<Script, ParseError>,
    flags: BTreeSet<CanonFlag>,
}

impl Command {
    /// Parses `canonical_text`; a failure adds [`CanonFlag::ParseFailed`].
    pub(crate) fn new(
        raw_text: String,
        pre_expansion_text: String,
        canonical_text: String,
        mut flags: BTreeSet<CanonFlag>,
    ) -> Self {
        let parse_result = shell::parse(&canonical_text);
        if parse_result.is_err() {
            flags.insert(CanonFlag::ParseFailed);
        }
        Self {
            raw_text,
            pre_expansion_text,
            canonical_text,
            parse_result,
            flags,
        }
    }

    /// A new command with substitution output spliced into the text.
    ///
    /// Flags carry over, so a parse failure anywhere in the history stays
    /// visible.
    pub(crate) fn with_resolved_text(&self, text: String) -> Self {
        Self::new(
            self.raw_text.clone(),
            self.pre_expansion_text.clone(),
            text,
            self.flags.clone(),
        )
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    /// Canonical text before exported variables were substituted
    pub fn pre_expansion_text(&self) -> &str {
        &self.pre_expansion_text
    }

    pub fn canonical_text(&self) -> &str {
        &self.canonical_text
    }

    pub fn syntax(&self) -> Option<&Script> {
        self.parse_result.as_ref().ok()
    }

    pub fn parse_error(&self) -> Option<&ParseError> {
        self.parse_result.as_ref().err()
    }

    pub fn flags(&self) -> &BTreeSet<CanonFlag> {
        &self.flags
    }

    pub fn has_flag(&self, flag: CanonFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn parse_failed(&self) -> bool {
        self.has_flag(CanonFlag::ParseFailed)
    }
}
