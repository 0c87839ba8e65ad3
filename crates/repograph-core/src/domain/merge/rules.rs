//! Data-driven exclusion rules for merge candidacy
//!
//! Rules are evaluated in order against normalized names; the first match
//! wins and is reported. [`ExclusionRule::UrlOrPath`] looks at the raw name,
//! since normalization strips the separators that identify a URL or path.
//! Excluded entities are stored but never merged.

use std::collections::BTreeSet;
use std::fmt;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::MergeConfig;
use crate::error::{Error, Result};

use super::normalize_name;

/// Prefixes and suffixes that mark test helpers
const TEST_PREFIXES: &[&str] = &["test_", "test "];
const TEST_SUFFIXES: &[&str] = &["_test", " test"];

const PATH_PREFIXES: &[&str] = &["/", "\\", "./", "../", "~/", "www."];

#[derive(Debug, Clone)]
pub enum ExclusionRule {
    MinLength(usize),
    MaxLength(usize),
    /// Language magic names such as `__init__`
    MagicName(BTreeSet<String>),
    GenericTerm(BTreeSet<String>),
    TestTerm(BTreeSet<String>),
    /// Leading underscore privacy convention
    PrivatePrefix,
    NumericOnly,
    /// URLs and filesystem paths extracted as entity names
    UrlOrPath,
    CustomPattern { patterns: Vec<String>, set: GlobSet },
}

impl ExclusionRule {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MinLength(_) => "min_length",
            Self::MaxLength(_) => "max_length",
            Self::MagicName(_) => "magic_name",
            Self::GenericTerm(_) => "generic_term",
            Self::TestTerm(_) => "test_term",
            Self::PrivatePrefix => "private_prefix",
            Self::NumericOnly => "numeric_only",
            Self::UrlOrPath => "url_or_path",
            Self::CustomPattern { .. } => "custom_pattern",
        }
    }

    /// Whether an entity named `raw` (normalized to `name`) is excluded by this rule
    pub fn matches(&self, name: &str, raw: &str) -> bool {
        match self {
            Self::MinLength(min) => name.chars().count() < *min,
            Self::MaxLength(max) => name.chars().count() > *max,
            Self::MagicName(names) => {
                names.contains(name) || (name.len() > 4 && name.starts_with("__") && name.ends_with("__"))
            }
            Self::GenericTerm(terms) => terms.contains(name),
            Self::TestTerm(terms) => {
                terms.contains(name)
                    || TEST_PREFIXES.iter().any(|p| name.starts_with(p))
                    || TEST_SUFFIXES.iter().any(|s| name.ends_with(s))
            }
            Self::PrivatePrefix => name.starts_with('_'),
            Self::NumericOnly => !name.is_empty() && name.chars().all(|c| c.is_ascii_digit() || c == ' '),
            Self::UrlOrPath => looks_like_url_or_path(raw),
            Self::CustomPattern { set, .. } => set.is_match(name),
        }
    }
}

impl fmt::Display for ExclusionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinLength(n) => write!(f, "shorter than {} characters", n),
            Self::MaxLength(n) => write!(f, "longer than {} characters", n),
            Self::CustomPattern { patterns, .. } => {
                write!(f, "matches custom pattern ({})", patterns.join(", "))
            }
            other => write!(f, "{}", other.name().replace('_', " ")),
        }
    }
}

/// Ordered list of exclusion rules, loaded once per pass
#[derive(Debug, Clone, Default)]
pub struct ExclusionRuleSet {
    rules: Vec<ExclusionRule>,
}

impl ExclusionRuleSet {
    pub fn new(rules: Vec<ExclusionRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(config: &MergeConfig) -> Result<Self> {
        let lowered = |items: &[String]| -> BTreeSet<String> {
            items.iter().map(|s| s.trim().to_lowercase()).collect()
        };

        let mut rules = vec![
            ExclusionRule::MinLength(config.min_name_length),
            ExclusionRule::MaxLength(config.max_name_length),
            ExclusionRule::MagicName(lowered(&config.magic_methods)),
            ExclusionRule::GenericTerm(lowered(&config.generic_terms)),
            ExclusionRule::TestTerm(lowered(&config.test_terms)),
        ];
        if config.exclude_private {
            rules.push(ExclusionRule::PrivatePrefix);
        }
        rules.push(ExclusionRule::NumericOnly);
        rules.push(ExclusionRule::UrlOrPath);

        if !config.custom_patterns.is_empty() {
            let mut builder = GlobSetBuilder::new();
            for pattern in &config.custom_patterns {
                let glob = Glob::new(&pattern.to_lowercase()).map_err(|e| {
                    Error::ConfigError(format!("invalid merge pattern '{}': {}", pattern, e))
                })?;
                builder.add(glob);
            }
            let set = builder
                .build()
                .map_err(|e| Error::ConfigError(format!("invalid merge patterns: {}", e)))?;
            rules.push(ExclusionRule::CustomPattern {
                patterns: config.custom_patterns.clone(),
                set,
            });
        }

        Ok(Self { rules })
    }

    /// First rule excluding an entity named `raw_name`
    pub fn matching(&self, raw_name: &str) -> Option<&ExclusionRule> {
        let name = normalize_name(raw_name);
        self.rules.iter().find(|rule| rule.matches(&name, raw_name))
    }

    pub fn is_excluded(&self, raw_name: &str) -> bool {
        self.matching(raw_name).is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn looks_like_url_or_path(raw: &str) -> bool {
    let raw = raw.trim().to_lowercase();
    let scheme = raw.split_once("://").is_some_and(|(scheme, rest)| {
        !scheme.is_empty()
            && !rest.is_empty()
            && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    });
    let drive = matches!(raw.as_bytes(), [letter, b':', b'\\' | b'/', ..] if letter.is_ascii_alphabetic());
    scheme || drive || PATH_PREFIXES.iter().any(|p| raw.starts_with(p))
}
