//! Incoming-call detection on single log lines
//!
//! MicroSIP writes incoming calls in a few different phrasings depending on
//! version and log level. Each phrasing is one pattern; patterns are tried in
//! order and the first one that yields a usable number wins.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Built-in phrasings, highest priority first
const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    // [2025-02-05 14:30:15] INCOMING CALL from: +491234567890
    ("incoming_call_from", r"INCOMING\s+CALL\s+from:\s*([+\d\s\-()]+)"),
    // [2025-02-05 14:30:15] Call from +491234567890 to +4915127585179
    ("call_from_to", r"Call\s+from\s+([+\d\s\-()]+)\s+to"),
    // Incoming call (ringing): +491234567890
    ("incoming_any", r"Incoming.*?:\s*([+\d\s\-()]+)"),
];

/// Normalized caller number: optional leading `+`, then digits only
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerId(String);

impl CallerId {
    /// Normalize a raw captured number.
    ///
    /// Whitespace, parentheses and hyphens are stripped. Returns `None` when
    /// nothing but the separators was captured, or when anything other than a
    /// single leading `+` and digits remains.
    pub fn normalize(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && !matches!(c, '(' | ')' | '-'))
            .collect();

        let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        Some(Self(cleaned))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits without the leading `+`
    pub fn digits(&self) -> &str {
        self.0.trim_start_matches('+')
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One named phrasing
#[derive(Debug, Clone)]
pub struct CallPattern {
    name: String,
    regex: Regex,
}

impl CallPattern {
    /// Compile a case-insensitive pattern. The first capture group must hold the number.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let name = name.into();
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid call pattern '{}': {}", name, pattern))?;

        if regex.captures_len() < 2 {
            anyhow::bail!(
                "Call pattern '{}' has no capture group; wrap the phone number part in (...)",
                name
            );
        }

        Ok(Self { name, regex })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw number text if this phrasing applies to the line
    pub fn capture<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.regex.captures(line)?.get(1).map(|m| m.as_str())
    }

    /// Extract a caller from the line if this phrasing applies
    pub fn extract(&self, line: &str) -> Option<CallerId> {
        self.capture(line).and_then(CallerId::normalize)
    }
}

/// Ordered list of phrasings, first match wins
///
/// The first phrasing that applies decides the line. If its capture does not
/// normalize, the line is not a call; later phrasings are not consulted.
#[derive(Debug, Clone)]
pub struct CallMatcher {
    patterns: Vec<CallPattern>,
}

impl CallMatcher {
    /// Built-in phrasings only
    pub fn builtin() -> Result<Self> {
        Self::with_extra_patterns(&[])
    }

    /// Built-in phrasings followed by user supplied ones
    pub fn with_extra_patterns(extra: &[String]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(BUILTIN_PATTERNS.len() + extra.len());

        for (name, pattern) in BUILTIN_PATTERNS {
            patterns.push(CallPattern::new(*name, pattern)?);
        }
        for (i, pattern) in extra.iter().enumerate() {
            patterns.push(CallPattern::new(format!("extra_{}", i + 1), pattern)?);
        }

        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> &[CallPattern] {
        &self.patterns
    }

    /// Find the caller on a log line. Non-call lines return `None`.
    pub fn match_line(&self, line: &str) -> Option<CallerId> {
        self.patterns
            .iter()
            .find_map(|p| p.capture(line))
            .and_then(CallerId::normalize)
    }
}
