//! Decision scoring and prioritization.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::lapi::Decision;

/// Histogram bucket boundaries for the score distribution.
pub const SCORE_BUCKET_THRESHOLDS: [i64; 6] = [25, 50, 75, 100, 150, 200];

/// Calculates priority scores for CrowdSec decisions. Higher scores survive
/// truncation.
pub struct Scorer {
    cfg: Arc<Config>,
}

impl Scorer {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self { cfg }
    }

    /// Score of a single decision, summing six of the seven factors:
    /// scenario × multiplier, origin, TTL, decision type, freshness, CIDR.
    /// The recidivism factor needs the whole dataset and is applied in
    /// [`score_and_sort`](Self::score_and_sort).
    pub fn score(&self, d: &Decision) -> i64 {
        let s = &self.cfg.scoring;
        let mut score = 0i64;

        let scenario_base = s.scenario_score(&d.scenario);
        score += (scenario_base as f64 * s.scenario_multiplier()) as i64;

        score += s.origin_score(&d.origin);

        if s.ttl_scoring.enabled {
            if let Some(duration) = d.parsed_duration {
                if !duration.is_zero() {
                    score += self.ttl_bonus(duration);
                }
            }
        }

        score += s.decision_type_score(&d.decision_type);

        if let Some(created) = d.parsed_created {
            let age = (Utc::now() - created).to_std().unwrap_or_default();
            score += s.freshness_bonus(age);
        }

        if d.scope == "range" || d.value.contains('/') {
            score += s.cidr_bonus(parse_prefix_len(&d.value));
        } else if d.scope == "ip" || d.scope == "Ip" || d.scope.is_empty() {
            // Single IP = /32
            score += s.cidr_bonus(32);
        }

        score
    }

    /// Bonus for remaining TTL: `max_bonus` at or beyond `max_ttl`, linear
    /// below it.
    fn ttl_bonus(&self, duration: std::time::Duration) -> i64 {
        let ttl = &self.cfg.scoring.ttl_scoring;
        if duration >= ttl.max_ttl {
            return ttl.max_bonus;
        }
        let ratio = duration.as_secs_f64() / ttl.max_ttl.as_secs_f64();
        (ratio * ttl.max_bonus as f64) as i64
    }

    /// Scores every decision (including the recidivism bonus) and sorts by
    /// score descending, ties broken by ascending id.
    pub fn score_and_sort(&self, mut decisions: Vec<Decision>) -> Vec<Decision> {
        let bonus = self.cfg.scoring.recidivism_bonus;

        let mut ip_counts: HashMap<String, i64> = HashMap::new();
        if bonus > 0 {
            for d in &decisions {
                *ip_counts.entry(d.value.clone()).or_insert(0) += 1;
            }
        }

        for d in &mut decisions {
            d.score = self.score(d);
            if bonus > 0 {
                if let Some(&count) = ip_counts.get(&d.value) {
                    if count > 1 {
                        d.score += bonus * (count - 1);
                    }
                }
            }
        }

        decisions.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        decisions
    }

    /// Scores, sorts, and returns the top `max_decisions`.
    pub fn score_and_truncate(
        &self,
        decisions: Vec<Decision>,
        max_decisions: usize,
    ) -> Vec<Decision> {
        let mut sorted = self.score_and_sort(decisions);
        sorted.truncate(max_decisions);
        sorted
    }

    /// Like [`score_and_truncate`](Self::score_and_truncate) but also
    /// produces the statistics for the pass.
    pub fn score_and_truncate_with_stats(
        &self,
        decisions: Vec<Decision>,
        max_decisions: usize,
    ) -> (Vec<Decision>, Stats) {
        let mut stats = Stats {
            total: decisions.len(),
            ..Stats::default()
        };

        if decisions.is_empty() {
            return (decisions, stats);
        }

        let mut sorted = self.score_and_sort(decisions);

        let bonus = self.cfg.scoring.recidivism_bonus;
        if bonus > 0 {
            let mut ip_counts: HashMap<&str, i64> = HashMap::new();
            for d in &sorted {
                *ip_counts.entry(d.value.as_str()).or_insert(0) += 1;
            }
            for &count in ip_counts.values() {
                if count > 1 {
                    stats.recidivism_ips += 1;
                    // Each of the `count` decisions carries bonus*(count-1).
                    stats.recidivism_boosts += bonus * (count - 1) * count;
                }
            }
        }

        let mut total_score = 0i64;
        stats.max_score = sorted[0].score;
        stats.min_score = sorted[sorted.len() - 1].score;

        for d in &sorted {
            total_score += d.score;
            *stats
                .score_distribution
                .entry(d.scenario.clone())
                .or_insert(0) += 1;

            // Cumulative: le=T counts every decision with score <= T.
            for threshold in SCORE_BUCKET_THRESHOLDS {
                if d.score <= threshold {
                    *stats.score_buckets.entry(threshold).or_insert(0) += 1;
                }
            }
        }
        stats.avg_score = total_score as f64 / sorted.len() as f64;

        let mid = sorted.len() / 2;
        stats.median_score = if sorted.len() % 2 == 0 {
            (sorted[mid - 1].score + sorted[mid].score) / 2
        } else {
            sorted[mid].score
        };

        if sorted.len() > max_decisions {
            for d in &sorted[max_decisions..] {
                *stats.origin_dropped.entry(d.origin.clone()).or_insert(0) += 1;
                *stats
                    .scenario_dropped
                    .entry(d.scenario.clone())
                    .or_insert(0) += 1;
                stats.dropped_ips.insert(d.value.clone());
            }
            sorted.truncate(max_decisions);
        }

        stats.returned = sorted.len();
        stats.dropped = stats.total - stats.returned;

        if let Some(last) = sorted.last() {
            stats.score_cutoff = last.score;
        }

        for d in &sorted {
            *stats.origin_kept.entry(d.origin.clone()).or_insert(0) += 1;
            *stats.scenario_kept.entry(d.scenario.clone()).or_insert(0) += 1;
        }

        (sorted, stats)
    }
}

/// Prefix length of a CIDR value; 32 for single IPs and unparseable input.
pub fn parse_prefix_len(value: &str) -> u32 {
    if value.contains('/') {
        if let Ok(net) = value.parse::<ipnet::IpNet>() {
            return u32::from(net.prefix_len());
        }
    }
    32
}

/// Result of a single scoring pass. Produced fresh per pass and never
/// mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub total: usize,
    pub returned: usize,
    pub dropped: usize,

    pub min_score: i64,
    pub max_score: i64,
    pub avg_score: f64,
    pub median_score: i64,
    /// Lowest score that survived truncation, 0 for an empty result.
    pub score_cutoff: i64,

    /// scenario -> count across all decisions.
    pub score_distribution: HashMap<String, usize>,
    /// threshold -> cumulative count of decisions with score <= threshold.
    pub score_buckets: HashMap<i64, usize>,

    pub origin_kept: HashMap<String, usize>,
    pub origin_dropped: HashMap<String, usize>,
    pub scenario_kept: HashMap<String, usize>,
    pub scenario_dropped: HashMap<String, usize>,

    /// Unique IPs that received a recidivism bonus.
    pub recidivism_ips: usize,
    /// Total recidivism bonus points applied across all decisions.
    pub recidivism_boosts: i64,

    /// Values that fell past the truncation boundary, kept for
    /// false-negative auditing.
    pub dropped_ips: HashSet<String>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::Config;

    fn base_config() -> Config {
        Config::parse(
            r#"
upstream_lapi_url: "http://localhost:8080"
upstream_lapi_key: "test-key"
scoring:
  scenario_multiplier: 2.0
  recidivism_bonus: 0
  scenarios:
    ssh-bf: 50
    http-probing: 30
    http-bad-user-agent: 20
    default: 10
  origins:
    CAPI: 10
    cscli: 20
    crowdsec: 25
  decision_types:
    ban: 5
    captcha: 0
  freshness_bonuses: []
  cidr_bonuses: []
  ttl_scoring:
    enabled: true
    max_bonus: 10
    max_ttl: 168h
"#,
        )
        .unwrap()
    }

    fn scorer(cfg: Config) -> Scorer {
        Scorer::new(Arc::new(cfg))
    }

    fn decision(id: i64, scenario: &str, origin: &str, value: &str) -> Decision {
        Decision {
            id,
            scenario: scenario.to_string(),
            origin: origin.to_string(),
            value: value.to_string(),
            scope: "ip".to_string(),
            ..Decision::default()
        }
    }

    #[test]
    fn score_sums_factors() {
        let s = scorer(base_config());

        // scenario(50*2.0) + origin(10) + TTL(10) + type(5)
        let d = Decision {
            scenario: "ssh-bf".to_string(),
            origin: "CAPI".to_string(),
            decision_type: "ban".to_string(),
            scope: "ip".to_string(),
            parsed_duration: Some(Duration::from_secs(168 * 3600)),
            ..Decision::default()
        };
        assert_eq!(s.score(&d), 125);

        // scenario(30*2.0) + origin(25) + TTL(~0) + type(5)
        let d = Decision {
            scenario: "http-probing".to_string(),
            origin: "crowdsec".to_string(),
            decision_type: "ban".to_string(),
            scope: "ip".to_string(),
            parsed_duration: Some(Duration::from_secs(4 * 3600)),
            ..Decision::default()
        };
        assert_eq!(s.score(&d), 90);

        // scenario(10*2.0) + origin(20) + TTL(~1) + type(5)
        let d = Decision {
            scenario: "custom/my-scenario".to_string(),
            origin: "cscli".to_string(),
            decision_type: "ban".to_string(),
            scope: "ip".to_string(),
            parsed_duration: Some(Duration::from_secs(24 * 3600)),
            ..Decision::default()
        };
        assert_eq!(s.score(&d), 46);

        // scenario(50*2.0) only: unknown origin, no TTL, no type
        let d = Decision {
            scenario: "ssh-bf".to_string(),
            origin: "unknown".to_string(),
            scope: "ip".to_string(),
            ..Decision::default()
        };
        assert_eq!(s.score(&d), 100);
    }

    #[test]
    fn sort_is_score_descending_then_id() {
        let mut cfg = base_config();
        cfg.scoring.ttl_scoring.enabled = false;
        let s = scorer(cfg);

        let decisions = vec![
            decision(1, "http-probing", "crowdsec", "1.1.1.1"), // 85
            decision(2, "ssh-bf", "CAPI", "2.2.2.2"),           // 110
            decision(3, "unknown", "CAPI", "3.3.3.3"),          // 30
            decision(4, "ssh-bf", "crowdsec", "4.4.4.4"),       // 125
        ];

        let sorted = s.score_and_sort(decisions);
        let order: Vec<i64> = sorted.iter().map(|d| d.id).collect();
        assert_eq!(order, vec![4, 2, 1, 3]);
    }

    #[test]
    fn identical_scores_order_by_id() {
        let mut cfg = base_config();
        cfg.scoring.ttl_scoring.enabled = false;
        let s = scorer(cfg);

        let decisions = vec![
            decision(9, "ssh-bf", "", "1.1.1.1"),
            decision(3, "ssh-bf", "", "2.2.2.2"),
            decision(7, "ssh-bf", "", "3.3.3.3"),
        ];
        let sorted = s.score_and_sort(decisions);
        let order: Vec<i64> = sorted.iter().map(|d| d.id).collect();
        assert_eq!(order, vec![3, 7, 9]);
    }

    #[test]
    fn truncate_keeps_highest_scoring() {
        let mut cfg = base_config();
        cfg.scoring.ttl_scoring.enabled = false;
        let s = scorer(cfg);

        let decisions = vec![
            decision(1, "default", "", "1.1.1.1"),
            decision(2, "ssh-bf", "", "2.2.2.2"),
            decision(3, "default", "", "3.3.3.3"),
            decision(4, "ssh-bf", "", "4.4.4.4"),
            decision(5, "default", "", "5.5.5.5"),
        ];

        let truncated = s.score_and_truncate(decisions, 2);
        assert_eq!(truncated.len(), 2);
        let ids: Vec<i64> = truncated.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![2, 4]);
        for d in &truncated {
            assert_eq!(d.scenario, "ssh-bf");
            assert_eq!(d.score, 100);
        }
    }

    #[test]
    fn stats_counts_and_extremes() {
        let mut cfg = base_config();
        cfg.scoring.ttl_scoring.enabled = false;
        let s = scorer(cfg);

        let decisions = vec![
            decision(1, "default", "", "1.1.1.1"),
            decision(2, "ssh-bf", "", "2.2.2.2"),
            decision(3, "default", "", "3.3.3.3"),
            decision(4, "ssh-bf", "", "4.4.4.4"),
            decision(5, "default", "", "5.5.5.5"),
        ];

        let (truncated, stats) = s.score_and_truncate_with_stats(decisions, 3);
        assert_eq!(truncated.len(), 3);
        assert_eq!(stats.total, 5);
        assert_eq!(stats.returned, 3);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.max_score, 100);
        assert_eq!(stats.min_score, 20);
        assert_eq!(stats.score_cutoff, 20);
        assert_eq!(stats.dropped_ips.len(), 2);
    }

    #[test]
    fn stats_effectiveness_maps_sum_to_counts() {
        let mut cfg = base_config();
        cfg.scoring.ttl_scoring.enabled = false;
        cfg.scoring.recidivism_bonus = 15;
        let s = scorer(cfg);

        let mut decisions = vec![
            decision(1, "ssh-bf", "crowdsec", "1.1.1.1"),     // 130
            decision(2, "ssh-bf", "CAPI", "2.2.2.2"),         // 115 + recidivism 15
            decision(3, "http-probing", "CAPI", "3.3.3.3"),   // 75
            decision(4, "default", "CAPI", "4.4.4.4"),        // 35
            decision(5, "default", "CAPI", "5.5.5.5"),        // 35
            decision(6, "default", "CAPI", "2.2.2.2"),        // 35 + recidivism 15
        ];
        for d in &mut decisions {
            d.decision_type = "ban".to_string();
        }

        let (truncated, stats) = s.score_and_truncate_with_stats(decisions, 4);

        assert_eq!(stats.total, 6);
        assert_eq!(stats.returned, 4);
        assert_eq!(stats.dropped, 2);
        assert_eq!(truncated.len(), 4);

        // crowdsec origin fully preserved.
        assert_eq!(stats.origin_kept.get("crowdsec"), Some(&1));
        assert_eq!(stats.origin_dropped.get("crowdsec"), None);

        let kept_sum: usize = stats.origin_kept.values().sum();
        let dropped_sum: usize = stats.origin_dropped.values().sum();
        assert_eq!(kept_sum, stats.returned);
        assert_eq!(dropped_sum, stats.dropped);
        let kept_sum: usize = stats.scenario_kept.values().sum();
        let dropped_sum: usize = stats.scenario_dropped.values().sum();
        assert_eq!(kept_sum, stats.returned);
        assert_eq!(dropped_sum, stats.dropped);

        assert!(stats.score_cutoff > 0);
        assert!(stats.median_score >= stats.min_score);
        assert!(stats.median_score <= stats.max_score);

        // 2.2.2.2 appears twice: one recidivist group.
        assert_eq!(stats.recidivism_ips, 1);
        assert_eq!(stats.recidivism_boosts, 30);

        assert_eq!(stats.dropped_ips.len(), 2);

        // Buckets are cumulative and monotonically non-decreasing; the top
        // threshold covers every decision here.
        let mut prev = 0;
        for t in SCORE_BUCKET_THRESHOLDS {
            let count = stats.score_buckets.get(&t).copied().unwrap_or(0);
            assert!(count >= prev, "bucket le={t} regressed");
            prev = count;
        }
        assert_eq!(stats.score_buckets.get(&200), Some(&stats.total));
    }

    #[test]
    fn local_origin_outranks_community_feed() {
        let mut cfg = base_config();
        cfg.scoring.ttl_scoring.enabled = false;
        let s = scorer(cfg);

        let decisions = vec![
            decision(1, "default", "crowdsec", "1.1.1.1"),
            decision(2, "default", "CAPI", "2.2.2.2"),
            decision(3, "default", "CAPI", "3.3.3.3"),
            decision(4, "default", "CAPI", "4.4.4.4"),
            decision(5, "default", "CAPI", "5.5.5.5"),
        ];

        let (kept, stats) = s.score_and_truncate_with_stats(decisions, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].origin, "crowdsec");
        assert_eq!(stats.origin_kept.get("crowdsec"), Some(&1));
        assert_eq!(stats.origin_dropped.get("CAPI"), Some(&4));
    }

    #[test]
    fn no_truncation_leaves_nothing_dropped() {
        let mut cfg = base_config();
        cfg.scoring.ttl_scoring.enabled = false;
        let s = scorer(cfg);

        let decisions = vec![
            decision(1, "ssh-bf", "", "1.1.1.1"),
            decision(2, "ssh-bf", "", "2.2.2.2"),
        ];

        let (result, stats) = s.score_and_truncate_with_stats(decisions, 100);
        assert_eq!(result.len(), 2);
        assert_eq!(stats.returned, 2);
        assert_eq!(stats.dropped, 0);
        assert!(stats.dropped_ips.is_empty());
        assert!(stats.origin_dropped.is_empty());
        assert!(stats.scenario_dropped.is_empty());
        assert_eq!(stats.score_cutoff, 100);
    }

    #[test]
    fn empty_input_yields_zeroed_stats() {
        let s = scorer(base_config());
        let (result, stats) = s.score_and_truncate_with_stats(Vec::new(), 100);
        assert!(result.is_empty());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.returned, 0);
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.score_cutoff, 0);
        assert!(stats.score_buckets.is_empty());
    }

    #[test]
    fn max_zero_drops_everything() {
        let mut cfg = base_config();
        cfg.scoring.ttl_scoring.enabled = false;
        let s = scorer(cfg);

        let decisions = vec![
            decision(1, "ssh-bf", "", "1.1.1.1"),
            decision(2, "default", "", "2.2.2.2"),
        ];
        let (result, stats) = s.score_and_truncate_with_stats(decisions, 0);
        assert!(result.is_empty());
        assert_eq!(stats.total, 2);
        assert_eq!(stats.returned, 0);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.score_cutoff, 0);
        assert_eq!(stats.dropped_ips.len(), 2);
    }

    #[test]
    fn ttl_bonus_scales_linearly() {
        let mut cfg = base_config();
        cfg.scoring.scenarios = [("default".to_string(), 0)].into_iter().collect();
        cfg.scoring.compile().unwrap();
        let s = scorer(cfg);

        let cases = [
            (0u64, 0i64),
            (24 * 3600, 1),   // 1 day
            (84 * 3600, 5),   // 3.5 days
            (168 * 3600, 10), // 7 days = max
            (336 * 3600, 10), // capped
        ];
        for (secs, want) in cases {
            let d = Decision {
                scenario: "default".to_string(),
                scope: "ip".to_string(),
                parsed_duration: (secs > 0).then(|| Duration::from_secs(secs)),
                ..Decision::default()
            };
            assert_eq!(s.score(&d), want, "ttl {secs}s");
        }
    }

    #[test]
    fn recidivism_scales_with_group_size() {
        let mut cfg = base_config();
        cfg.scoring.ttl_scoring.enabled = false;
        cfg.scoring.recidivism_bonus = 15;
        let s = scorer(cfg);

        let decisions = vec![
            decision(1, "ssh-bf", "", "1.2.3.4"),  // 2x group: 100 + 15
            decision(2, "default", "", "1.2.3.4"), // 2x group: 20 + 15
            decision(3, "default", "", "5.6.7.8"), // unique: 20
            decision(4, "ssh-bf", "", "9.8.7.6"),  // 3x group: 100 + 30
            decision(5, "default", "", "9.8.7.6"), // 3x group: 20 + 30
            decision(6, "default", "", "9.8.7.6"), // 3x group: 20 + 30
        ];

        let sorted = s.score_and_sort(decisions);
        assert_eq!((sorted[0].id, sorted[0].score), (4, 130));
        assert_eq!((sorted[1].id, sorted[1].score), (1, 115));
        assert_eq!(sorted[2].score, 50);
        assert_eq!((sorted[4].id, sorted[4].score), (2, 35));
        assert_eq!((sorted[5].id, sorted[5].score), (3, 20));
    }

    #[test]
    fn freshness_bonus_uses_first_matching_tier() {
        let mut cfg = base_config();
        cfg.scoring.scenarios = [("default".to_string(), 0)].into_iter().collect();
        cfg.scoring.ttl_scoring.enabled = false;
        cfg.scoring.freshness_bonuses = vec![
            crate::config::FreshnessBonus { max_age: "1h".to_string(), bonus: 15 },
            crate::config::FreshnessBonus { max_age: "24h".to_string(), bonus: 10 },
            crate::config::FreshnessBonus { max_age: "168h".to_string(), bonus: 5 },
        ];
        cfg.scoring.compile().unwrap();
        let s = scorer(cfg);

        let cases = [
            (30 * 60, 15),       // 30 minutes
            (2 * 3600, 10),      // 2 hours
            (12 * 3600, 10),     // 12 hours
            (72 * 3600, 5),      // 3 days
            (240 * 3600, 0),     // 10 days
        ];
        for (age_secs, want) in cases {
            let d = Decision {
                scenario: "default".to_string(),
                scope: "ip".to_string(),
                parsed_created: Some(Utc::now() - chrono::Duration::seconds(age_secs)),
                ..Decision::default()
            };
            assert_eq!(s.score(&d), want, "age {age_secs}s");
        }
    }

    #[test]
    fn cidr_bonus_by_prefix_width() {
        let mut cfg = base_config();
        cfg.scoring.scenarios = [("default".to_string(), 0)].into_iter().collect();
        cfg.scoring.ttl_scoring.enabled = false;
        cfg.scoring.cidr_bonuses = vec![
            crate::config::CidrBonus { min_prefix: 0, max_prefix: 16, bonus: 20 },
            crate::config::CidrBonus { min_prefix: 17, max_prefix: 24, bonus: 10 },
            crate::config::CidrBonus { min_prefix: 25, max_prefix: 32, bonus: 0 },
        ];
        cfg.scoring.compile().unwrap();
        let s = scorer(cfg);

        let cases = [
            ("1.2.3.4", "ip", 0),
            ("1.2.3.0/24", "range", 10),
            ("1.2.0.0/16", "range", 20),
            ("1.0.0.0/8", "range", 20),
            ("1.2.3.0/28", "range", 0),
        ];
        for (value, scope, want) in cases {
            let d = Decision {
                scenario: "default".to_string(),
                value: value.to_string(),
                scope: scope.to_string(),
                ..Decision::default()
            };
            assert_eq!(s.score(&d), want, "value {value}");
        }
    }

    #[test]
    fn non_ip_scope_skips_cidr_factor() {
        let mut cfg = base_config();
        cfg.scoring.scenarios = [("default".to_string(), 0)].into_iter().collect();
        cfg.scoring.ttl_scoring.enabled = false;
        cfg.scoring.cidr_bonuses = vec![crate::config::CidrBonus {
            min_prefix: 0,
            max_prefix: 32,
            bonus: 7,
        }];
        cfg.scoring.compile().unwrap();
        let s = scorer(cfg);

        let d = Decision {
            scenario: "default".to_string(),
            value: "FR".to_string(),
            scope: "country".to_string(),
            ..Decision::default()
        };
        assert_eq!(s.score(&d), 0);
    }

    #[test]
    fn decision_type_bonus() {
        let mut cfg = base_config();
        cfg.scoring.scenarios = [("default".to_string(), 0)].into_iter().collect();
        cfg.scoring.ttl_scoring.enabled = false;
        cfg.scoring.compile().unwrap();
        let s = scorer(cfg);

        let mut d = Decision {
            scenario: "default".to_string(),
            scope: "ip".to_string(),
            decision_type: "ban".to_string(),
            ..Decision::default()
        };
        assert_eq!(s.score(&d), 5);
        d.decision_type = "captcha".to_string();
        assert_eq!(s.score(&d), 0);
        d.decision_type = "throttle".to_string();
        assert_eq!(s.score(&d), 0);
    }

    #[test]
    fn prefix_len_parsing() {
        let cases = [
            ("1.2.3.4/32", 32),
            ("1.2.3.0/24", 24),
            ("1.2.0.0/16", 16),
            ("1.0.0.0/8", 8),
            ("1.2.3.4", 32),
            ("invalid", 32),
        ];
        for (input, want) in cases {
            assert_eq!(parse_prefix_len(input), want, "input {input}");
        }
    }

    #[test]
    fn scoring_is_idempotent_on_kept_set() {
        let mut cfg = base_config();
        cfg.scoring.ttl_scoring.enabled = false;
        let s = scorer(cfg);

        let decisions = vec![
            decision(1, "default", "", "1.1.1.1"),
            decision(2, "ssh-bf", "", "2.2.2.2"),
            decision(3, "default", "", "3.3.3.3"),
            decision(4, "ssh-bf", "", "4.4.4.4"),
        ];

        let first = s.score_and_truncate(decisions, 3);
        let again = s.score_and_truncate(first.clone(), 3);
        let ids: Vec<i64> = first.iter().map(|d| d.id).collect();
        let ids_again: Vec<i64> = again.iter().map(|d| d.id).collect();
        assert_eq!(ids, ids_again);
    }
}
