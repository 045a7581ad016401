//! Loading and validation of the sidecar configuration.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;

use crate::helpers::parse_duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub upstream_lapi_url: String,
    pub upstream_lapi_key: String,
    pub max_decisions: i64,
    #[serde(with = "go_duration")]
    pub cache_ttl: Duration,
    #[serde(with = "go_duration")]
    pub upstream_timeout: Duration,
    pub log_level: String,
    pub scoring: ScoringConfig,
    pub health: HealthConfig,
    pub metrics: MetricsConfig,
    pub effectiveness: EffectivenessConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8081".to_string(),
            upstream_lapi_url: String::new(),
            upstream_lapi_key: String::new(),
            max_decisions: 15_000,
            cache_ttl: Duration::from_secs(60),
            upstream_timeout: Duration::from_secs(120),
            log_level: "info".to_string(),
            scoring: ScoringConfig::default(),
            health: HealthConfig::default(),
            metrics: MetricsConfig::default(),
            effectiveness: EffectivenessConfig::default(),
        }
    }
}

/// Awards extra points for recently created decisions.
#[derive(Debug, Clone, Deserialize)]
pub struct FreshnessBonus {
    pub max_age: String,
    pub bonus: i64,
}

/// Awards extra points based on CIDR prefix length.
#[derive(Debug, Clone, Deserialize)]
pub struct CidrBonus {
    pub min_prefix: u32,
    pub max_prefix: u32,
    pub bonus: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub scenarios: IndexMap<String, i64>,
    pub origins: HashMap<String, i64>,
    pub decision_types: HashMap<String, i64>,
    pub scenario_multiplier: f64,
    pub recidivism_bonus: i64,
    pub ttl_scoring: TtlScoringConfig,
    pub freshness_bonuses: Vec<FreshnessBonus>,
    pub cidr_bonuses: Vec<CidrBonus>,

    // Built after deserialization, never from the document.
    #[serde(skip)]
    compiled_scenarios: Vec<ScenarioPattern>,
    #[serde(skip)]
    compiled_freshness: Vec<(Duration, i64)>,
}

#[derive(Debug, Clone)]
struct ScenarioPattern {
    pattern: Regex,
    score: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            scenarios: IndexMap::new(),
            origins: HashMap::new(),
            decision_types: HashMap::from([("ban".to_string(), 5), ("captcha".to_string(), 0)]),
            scenario_multiplier: 2.0,
            recidivism_bonus: 15,
            ttl_scoring: TtlScoringConfig::default(),
            freshness_bonuses: vec![
                FreshnessBonus { max_age: "1h".to_string(), bonus: 15 },
                FreshnessBonus { max_age: "24h".to_string(), bonus: 10 },
                FreshnessBonus { max_age: "168h".to_string(), bonus: 5 },
            ],
            cidr_bonuses: vec![
                CidrBonus { min_prefix: 0, max_prefix: 16, bonus: 20 },
                CidrBonus { min_prefix: 17, max_prefix: 24, bonus: 10 },
                CidrBonus { min_prefix: 25, max_prefix: 32, bonus: 0 },
            ],
            compiled_scenarios: Vec::new(),
            compiled_freshness: Vec::new(),
        }
    }
}

/// Controls how remaining ban duration affects score.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtlScoringConfig {
    pub enabled: bool,
    pub max_bonus: i64,
    #[serde(with = "go_duration")]
    pub max_ttl: Duration,
}

impl Default for TtlScoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bonus: 10,
            max_ttl: Duration::from_secs(168 * 3600),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { enabled: true, path: "/health".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true, path: "/metrics".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EffectivenessConfig {
    pub top_scenarios: i64,
    pub false_negative_check: FalseNegativeConfig,
}

impl Default for EffectivenessConfig {
    fn default() -> Self {
        Self {
            top_scenarios: 20,
            false_negative_check: FalseNegativeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FalseNegativeConfig {
    pub enabled: bool,
    #[serde(with = "go_duration")]
    pub interval: Duration,
    #[serde(with = "go_duration")]
    pub lookback: Duration,
}

impl Default for FalseNegativeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            lookback: Duration::from_secs(900),
        }
    }
}

impl Config {
    /// Reads and parses the configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config file {}", path.as_ref().display()))?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self> {
        let mut cfg: Config = serde_yaml::from_str(data).context("parsing config file")?;
        cfg.validate().context("validating config")?;
        cfg.scoring
            .compile()
            .context("compiling scenario patterns")?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.is_empty() {
            bail!("listen_addr is required");
        }
        if self.upstream_lapi_url.is_empty() {
            bail!("upstream_lapi_url is required");
        }
        if self.upstream_lapi_key.is_empty() {
            bail!("upstream_lapi_key is required");
        }
        if self.max_decisions <= 0 {
            bail!("max_decisions must be positive");
        }
        Ok(())
    }
}

impl ScoringConfig {
    /// Compiles scenario name patterns into anchored regexes and pre-parses
    /// freshness tiers. Tier order follows the document.
    pub fn compile(&mut self) -> Result<()> {
        self.compiled_scenarios = Vec::with_capacity(self.scenarios.len());
        for (pattern, &score) in &self.scenarios {
            if pattern == "default" {
                continue;
            }
            let re = Regex::new(&format!("^{pattern}$"))
                .with_context(|| format!("invalid scenario pattern {pattern:?}"))?;
            self.compiled_scenarios.push(ScenarioPattern { pattern: re, score });
        }

        // Unparseable tiers are skipped rather than rejected.
        self.compiled_freshness = self
            .freshness_bonuses
            .iter()
            .filter_map(|fb| parse_duration(&fb.max_age).ok().map(|d| (d, fb.bonus)))
            .collect();

        Ok(())
    }

    /// Score for a scenario name: exact match, then first matching pattern
    /// in document order, then the `"default"` entry, then 0.
    pub fn scenario_score(&self, scenario: &str) -> i64 {
        if let Some(&score) = self.scenarios.get(scenario) {
            return score;
        }
        for sp in &self.compiled_scenarios {
            if sp.pattern.is_match(scenario) {
                return sp.score;
            }
        }
        self.scenarios.get("default").copied().unwrap_or(0)
    }

    pub fn origin_score(&self, origin: &str) -> i64 {
        self.origins.get(origin).copied().unwrap_or(0)
    }

    pub fn decision_type_score(&self, decision_type: &str) -> i64 {
        self.decision_types.get(decision_type).copied().unwrap_or(0)
    }

    /// Bonus for a decision of the given age: first tier whose max age
    /// covers it, evaluated in document order.
    pub fn freshness_bonus(&self, age: Duration) -> i64 {
        for &(max_age, bonus) in &self.compiled_freshness {
            if age <= max_age {
                return bonus;
            }
        }
        0
    }

    /// Bonus based on CIDR prefix length. Broader ranges block more
    /// addresses and sort earlier in the bonus table.
    pub fn cidr_bonus(&self, prefix_len: u32) -> i64 {
        for cb in &self.cidr_bonuses {
            if prefix_len >= cb.min_prefix && prefix_len <= cb.max_prefix {
                return cb.bonus;
            }
        }
        0
    }

    pub fn scenario_multiplier(&self) -> f64 {
        if self.scenario_multiplier <= 0.0 {
            2.0
        } else {
            self.scenario_multiplier
        }
    }
}

impl EffectivenessConfig {
    pub fn top_scenarios(&self) -> usize {
        if self.top_scenarios <= 0 {
            20
        } else {
            self.top_scenarios as usize
        }
    }
}

mod go_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    use crate::helpers::parse_duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
