// src/target.rs
//! Tracked targets and the rules that turn marker text into a seat count.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extract::ExtractionError;

/// Stable numeric identifier of a tracked target (`/seats{id}`).
pub type TargetId = u32;

fn default_delimiter() -> String {
    ":".to_string()
}

/// How marker text becomes an integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionRule {
    /// Take the segment after the last `delimiter` and parse its leading integer.
    SplitTrailing {
        #[serde(default = "default_delimiter")]
        delimiter: String,
    },
    /// First capture group (or whole match) of a regex.
    Pattern { pattern: String },
}

impl Default for ExtractionRule {
    fn default() -> Self {
        ExtractionRule::SplitTrailing {
            delimiter: default_delimiter(),
        }
    }
}

impl ExtractionRule {
    /// Apply the rule to the raw `textContent` of the marker element.
    pub fn apply(&self, text: &str) -> Result<i64, ExtractionError> {
        match self {
            ExtractionRule::SplitTrailing { delimiter } => {
                let (_, tail) = text.rsplit_once(delimiter.as_str()).ok_or_else(|| {
                    ExtractionError::parse(text, format!("no '{delimiter}' in marker text"))
                })?;
                parse_leading_int(tail.trim())
                    .ok_or_else(|| ExtractionError::parse(text, "trailing segment is not an integer"))
            }
            ExtractionRule::Pattern { pattern } => {
                let re = compiled_pattern(pattern)
                    .map_err(|e| ExtractionError::parse(text, format!("bad pattern: {e}")))?;
                let caps = re
                    .captures(text)
                    .ok_or_else(|| ExtractionError::parse(text, "pattern did not match"))?;
                let m = caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().trim())
                    .unwrap_or_default();
                parse_leading_int(m)
                    .ok_or_else(|| ExtractionError::parse(text, "matched text is not an integer"))
            }
        }
    }

    /// Reject rules that can never succeed (empty delimiter, invalid regex).
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            ExtractionRule::SplitTrailing { delimiter } if delimiter.is_empty() => {
                anyhow::bail!("split_trailing delimiter must not be empty")
            }
            ExtractionRule::SplitTrailing { .. } => Ok(()),
            ExtractionRule::Pattern { pattern } => {
                compiled_pattern(pattern).map_err(|e| anyhow::anyhow!("invalid pattern {pattern:?}: {e}"))?;
                Ok(())
            }
        }
    }
}

type PatternCache = Mutex<HashMap<String, Regex>>;

fn pattern_cache() -> &'static PatternCache {
    static CACHE: OnceCell<PatternCache> = OnceCell::new();
    CACHE.get_or_init(PatternCache::default)
}

/// Compile `pattern` once per process; later calls share the cached `Regex`.
fn compiled_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let mut cache = match pattern_cache().lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    };
    if let Some(re) = cache.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    cache.insert(pattern.to_string(), re.clone());
    Ok(re)
}

/// Leading `[+-]?\d+` of `s`, like a lenient integer parse of page text.
fn parse_leading_int(s: &str) -> Option<i64> {
    static RE_INT: OnceCell<Regex> = OnceCell::new();
    let re = RE_INT.get_or_init(|| Regex::new(r"^[+-]?\d+").unwrap());
    re.find(s).and_then(|m| m.as_str().parse::<i64>().ok())
}

/// One tracked page plus its parsing rule. Immutable after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    #[serde(alias = "url")]
    pub source_url: String,
    #[serde(alias = "selector")]
    pub content_selector: String,
    #[serde(default, alias = "rule")]
    pub extraction_rule: ExtractionRule,
}

impl Target {
    pub fn new(id: TargetId, source_url: impl Into<String>, content_selector: impl Into<String>) -> Self {
        Self {
            id,
            source_url: source_url.into(),
            content_selector: content_selector.into(),
            extraction_rule: ExtractionRule::default(),
        }
    }

    pub fn with_rule(mut self, rule: ExtractionRule) -> Self {
        self.extraction_rule = rule;
        self
    }
}
