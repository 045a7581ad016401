//! Prometheus text rendering for the metrics endpoint.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::scorer::{Stats, SCORE_BUCKET_THRESHOLDS};

/// Point-in-time view of the handler counters, collected under the
/// handler's locks before rendering.
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cached_decisions: usize,
    pub upstream_latency: Duration,
    pub max_decisions: i64,
    pub uptime: Duration,
    pub stats: Arc<Stats>,
    pub false_negatives_total: i64,
    pub false_negative_check_time: i64,
    pub top_scenarios: usize,
}

pub fn render(snap: &MetricsSnapshot) -> String {
    let mut out = String::with_capacity(4096);
    let stats = snap.stats.as_ref();

    // Operational metrics.

    family(
        &mut out,
        "crowdsec_sidecar_requests_total",
        "Total number of requests",
        "counter",
    );
    let _ = writeln!(out, "crowdsec_sidecar_requests_total {}", snap.total_requests);

    family(
        &mut out,
        "crowdsec_sidecar_requests_failed_total",
        "Total number of failed requests",
        "counter",
    );
    let _ = writeln!(
        out,
        "crowdsec_sidecar_requests_failed_total {}",
        snap.failed_requests
    );

    family(
        &mut out,
        "crowdsec_sidecar_cache_hits_total",
        "Total number of cache hits",
        "counter",
    );
    let _ = writeln!(out, "crowdsec_sidecar_cache_hits_total {}", snap.cache_hits);

    family(
        &mut out,
        "crowdsec_sidecar_cache_misses_total",
        "Total number of cache misses",
        "counter",
    );
    let _ = writeln!(
        out,
        "crowdsec_sidecar_cache_misses_total {}",
        snap.cache_misses
    );

    family(
        &mut out,
        "crowdsec_sidecar_cached_decisions",
        "Current number of cached decisions",
        "gauge",
    );
    let _ = writeln!(
        out,
        "crowdsec_sidecar_cached_decisions {}",
        snap.cached_decisions
    );

    family(
        &mut out,
        "crowdsec_sidecar_upstream_latency_seconds",
        "Last upstream request latency",
        "gauge",
    );
    let _ = writeln!(
        out,
        "crowdsec_sidecar_upstream_latency_seconds {:.3}",
        snap.upstream_latency.as_secs_f64()
    );

    family(
        &mut out,
        "crowdsec_sidecar_max_decisions",
        "Configured max decisions limit",
        "gauge",
    );
    let _ = writeln!(out, "crowdsec_sidecar_max_decisions {}", snap.max_decisions);

    family(
        &mut out,
        "crowdsec_sidecar_decisions_total",
        "Total decisions from upstream",
        "gauge",
    );
    let _ = writeln!(out, "crowdsec_sidecar_decisions_total {}", stats.total);

    family(
        &mut out,
        "crowdsec_sidecar_decisions_dropped",
        "Decisions dropped due to limit",
        "gauge",
    );
    let _ = writeln!(out, "crowdsec_sidecar_decisions_dropped {}", stats.dropped);

    family(
        &mut out,
        "crowdsec_sidecar_uptime_seconds",
        "Time since sidecar started",
        "gauge",
    );
    let _ = writeln!(
        out,
        "crowdsec_sidecar_uptime_seconds {:.0}",
        snap.uptime.as_secs_f64()
    );

    // Effectiveness metrics.

    family(
        &mut out,
        "crowdsec_sidecar_decisions_kept",
        "Decisions kept per origin",
        "gauge",
    );
    for (origin, count) in sorted_entries(&stats.origin_kept) {
        let _ = writeln!(
            out,
            "crowdsec_sidecar_decisions_kept{{origin={origin:?}}} {count}"
        );
    }

    family(
        &mut out,
        "crowdsec_sidecar_decisions_dropped_by_origin",
        "Decisions dropped per origin",
        "gauge",
    );
    for (origin, count) in sorted_entries(&stats.origin_dropped) {
        let _ = writeln!(
            out,
            "crowdsec_sidecar_decisions_dropped_by_origin{{origin={origin:?}}} {count}"
        );
    }

    write_top_n(
        &mut out,
        "crowdsec_sidecar_scenario_kept",
        "Decisions kept per scenario (top N)",
        &stats.scenario_kept,
        snap.top_scenarios,
    );
    write_top_n(
        &mut out,
        "crowdsec_sidecar_scenario_dropped",
        "Decisions dropped per scenario (top N)",
        &stats.scenario_dropped,
        snap.top_scenarios,
    );

    family(
        &mut out,
        "crowdsec_sidecar_score_cutoff",
        "Lowest score that survived truncation",
        "gauge",
    );
    let _ = writeln!(out, "crowdsec_sidecar_score_cutoff {}", stats.score_cutoff);

    family(
        &mut out,
        "crowdsec_sidecar_score_max",
        "Highest decision score",
        "gauge",
    );
    let _ = writeln!(out, "crowdsec_sidecar_score_max {}", stats.max_score);

    family(
        &mut out,
        "crowdsec_sidecar_score_median",
        "Median decision score",
        "gauge",
    );
    let _ = writeln!(out, "crowdsec_sidecar_score_median {}", stats.median_score);

    family(
        &mut out,
        "crowdsec_sidecar_score_bucket",
        "Cumulative score distribution",
        "gauge",
    );
    for threshold in SCORE_BUCKET_THRESHOLDS {
        let count = stats.score_buckets.get(&threshold).copied().unwrap_or(0);
        let _ = writeln!(
            out,
            "crowdsec_sidecar_score_bucket{{le=\"{threshold}\"}} {count}"
        );
    }

    family(
        &mut out,
        "crowdsec_sidecar_recidivism_ips",
        "Unique IPs with recidivism bonus",
        "gauge",
    );
    let _ = writeln!(
        out,
        "crowdsec_sidecar_recidivism_ips {}",
        stats.recidivism_ips
    );

    family(
        &mut out,
        "crowdsec_sidecar_recidivism_boosts",
        "Total recidivism bonus points applied",
        "gauge",
    );
    let _ = writeln!(
        out,
        "crowdsec_sidecar_recidivism_boosts {}",
        stats.recidivism_boosts
    );

    family(
        &mut out,
        "crowdsec_sidecar_false_negatives_total",
        "IPs that were dropped but later attacked locally",
        "counter",
    );
    let _ = writeln!(
        out,
        "crowdsec_sidecar_false_negatives_total {}",
        snap.false_negatives_total
    );

    family(
        &mut out,
        "crowdsec_sidecar_false_negative_check_time",
        "Unix timestamp of last false-negative check",
        "gauge",
    );
    let _ = writeln!(
        out,
        "crowdsec_sidecar_false_negative_check_time {}",
        snap.false_negative_check_time
    );

    out
}

fn family(out: &mut String, name: &str, help: &str, metric_type: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {metric_type}");
}

fn sorted_entries(data: &HashMap<String, usize>) -> Vec<(&str, usize)> {
    let mut entries: Vec<(&str, usize)> =
        data.iter().map(|(k, &v)| (k.as_str(), v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    entries
}

/// Emits the top N entries of a scenario map, aggregating the remainder
/// under `scenario="other"` to bound label cardinality.
fn write_top_n(out: &mut String, name: &str, help: &str, data: &HashMap<String, usize>, n: usize) {
    family(out, name, help, "gauge");

    if data.is_empty() {
        return;
    }

    let mut other = 0usize;
    for (i, (scenario, count)) in sorted_entries(data).into_iter().enumerate() {
        if i < n {
            let _ = writeln!(out, "{name}{{scenario={scenario:?}}} {count}");
        } else {
            other += count;
        }
    }

    if other > 0 {
        let _ = writeln!(out, "{name}{{scenario=\"other\"}} {other}");
    }
}
