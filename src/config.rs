// src/config.rs
//! Target list and timing, from TOML/JSON with env overrides.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::extract::ExtractorConfig;
use crate::target::{Target, TargetId};

pub const ENV_CONFIG_PATH: &str = "SEATS_CONFIG_PATH";
pub const ENV_REFRESH_INTERVAL_MS: &str = "SEATS_REFRESH_INTERVAL_MS";
pub const ENV_STATIC_DIR: &str = "SEATS_STATIC_DIR";

pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_SELECTOR_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_SELECTOR: &str = r"p.text-xs.md\:text-sm";

const REFERENCE_EVENTS: [(TargetId, &str); 2] = [
    (1, "https://gravitas.vit.ac.in/events/ea3eb2e8-7036-4265-9c9d-ecb8866d176b"),
    (2, "https://gravitas.vit.ac.in/events/c78879df-65f1-4eb2-a9fd-c80fb122369f"),
];

fn default_refresh_interval_ms() -> u64 {
    DEFAULT_REFRESH_INTERVAL_MS
}
fn default_selector_timeout_ms() -> u64 {
    DEFAULT_SELECTOR_TIMEOUT_MS
}
fn default_navigation_timeout_ms() -> u64 {
    DEFAULT_NAVIGATION_TIMEOUT_MS
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(flatten)]
    pub target: Target,
    /// Overrides the global refresh interval for this target.
    #[serde(default)]
    pub refresh_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatsConfig {
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    #[serde(default = "default_selector_timeout_ms")]
    pub selector_timeout_ms: u64,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    pub targets: Vec<TargetConfig>,
}

impl Default for SeatsConfig {
    /// The two reference events, refreshed every 15s.
    fn default() -> Self {
        Self {
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            selector_timeout_ms: DEFAULT_SELECTOR_TIMEOUT_MS,
            navigation_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            chrome_path: None,
            static_dir: default_static_dir(),
            targets: REFERENCE_EVENTS
                .iter()
                .map(|(id, url)| TargetConfig {
                    target: Target::new(*id, *url, DEFAULT_SELECTOR),
                    refresh_interval_ms: None,
                })
                .collect(),
        }
    }
}

impl SeatsConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading seats config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $SEATS_CONFIG_PATH
    /// 2) config/seats.toml
    /// 3) config/seats.json
    /// 4) built-in reference events
    pub fn load_default() -> Result<Self> {
        let mut cfg = Self::locate()?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn locate() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
        }
        let toml_p = PathBuf::from("config/seats.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/seats.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        tracing::info!("no seats config file found; using reference events");
        Ok(Self::default())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var(ENV_REFRESH_INTERVAL_MS) {
            self.refresh_interval_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_REFRESH_INTERVAL_MS}={raw:?} is not a number"))?;
        }
        if let Ok(dir) = std::env::var(ENV_STATIC_DIR) {
            if !dir.trim().is_empty() {
                self.static_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            bail!("at least one target must be configured");
        }
        for (name, v) in [
            ("refresh_interval_ms", self.refresh_interval_ms),
            ("selector_timeout_ms", self.selector_timeout_ms),
            ("navigation_timeout_ms", self.navigation_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
        ] {
            if v == 0 {
                bail!("{name} must be positive");
            }
        }

        let mut seen = BTreeSet::new();
        for tc in &self.targets {
            let t = &tc.target;
            if !seen.insert(t.id) {
                bail!("duplicate target id {}", t.id);
            }
            if t.source_url.trim().is_empty() {
                bail!("target {} has an empty url", t.id);
            }
            if t.content_selector.trim().is_empty() {
                bail!("target {} has an empty selector", t.id);
            }
            if tc.refresh_interval_ms == Some(0) {
                bail!("target {} refresh_interval_ms must be positive", t.id);
            }
            t.extraction_rule
                .validate()
                .with_context(|| format!("target {}", t.id))?;
        }
        Ok(())
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            navigation_timeout: Duration::from_millis(self.navigation_timeout_ms),
            selector_timeout: Duration::from_millis(self.selector_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..ExtractorConfig::default()
        }
    }

    /// `(id, interval)` per target, per-target override first.
    pub fn schedule(&self) -> Vec<(TargetId, Duration)> {
        self.targets
            .iter()
            .map(|tc| {
                let ms = tc.refresh_interval_ms.unwrap_or(self.refresh_interval_ms);
                (tc.target.id, Duration::from_millis(ms))
            })
            .collect()
    }

    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().map(|tc| &tc.target)
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<SeatsConfig> {
    match hint_ext {
        "toml" => Ok(toml::from_str(s)?),
        "json" => Ok(serde_json::from_str(s)?),
        _ => {
            if let Ok(v) = serde_json::from_str(s) {
                return Ok(v);
            }
            toml::from_str(s).map_err(|e| anyhow!("unsupported seats config format: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::ExtractionRule;

    #[test]
    fn reference_config_is_valid() {
        let cfg = SeatsConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.targets.len(), 2);
        assert_eq!(
            cfg.schedule(),
            vec![
                (1, Duration::from_millis(15_000)),
                (2, Duration::from_millis(15_000))
            ]
        );
        assert_eq!(cfg.targets[0].target.content_selector, r"p.text-xs.md\:text-sm");
    }

    #[test]
    fn toml_with_per_target_interval_and_pattern_rule() {
        let cfg = parse_config(
            r#"
refresh_interval_ms = 20000

[[targets]]
id = 1
url = "https://e/1"
selector = "p.seats"

[[targets]]
id = 2
url = "https://e/2"
selector = "span.left"
refresh_interval_ms = 5000
rule = { kind = "pattern", pattern = '(\d+) left' }
"#,
            "toml",
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(
            cfg.schedule(),
            vec![
                (1, Duration::from_millis(20_000)),
                (2, Duration::from_millis(5_000))
            ]
        );
        assert_eq!(
            cfg.targets[1].target.extraction_rule,
            ExtractionRule::Pattern {
                pattern: r"(\d+) left".into()
            }
        );
        assert_eq!(cfg.selector_timeout_ms, DEFAULT_SELECTOR_TIMEOUT_MS);
    }

    #[test]
    fn json_is_sniffed_without_extension() {
        let cfg = parse_config(
            r#"{"targets":[{"id":7,"source_url":"https://e/7","content_selector":"p"}]}"#,
            "",
        )
        .unwrap();
        assert_eq!(cfg.targets[0].target.id, 7);
        assert_eq!(cfg.refresh_interval_ms, DEFAULT_REFRESH_INTERVAL_MS);
    }

    #[test]
    fn validation_rejects_bad_configs() {
        let mut dup = SeatsConfig::default();
        dup.targets[1].target.id = 1;
        assert!(dup.validate().is_err());

        let mut zero = SeatsConfig::default();
        zero.refresh_interval_ms = 0;
        assert!(zero.validate().is_err());

        let mut empty = SeatsConfig::default();
        empty.targets.clear();
        assert!(empty.validate().is_err());

        let mut bad_rule = SeatsConfig::default();
        bad_rule.targets[0].target.extraction_rule = ExtractionRule::Pattern {
            pattern: "([".into(),
        };
        assert!(bad_rule.validate().is_err());
    }
}
