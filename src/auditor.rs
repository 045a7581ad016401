//! Background false-negative auditor.
//!
//! Periodically cross-checks the IPs the scorer truncated out against fresh
//! local alerts. A nonzero counter means the scoring function shed signal.

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handler::AppState;
use crate::helpers::format_duration;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Auditor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Starts the auditor task, or returns `None` when the check is disabled.
pub fn spawn(state: AppState) -> Option<Auditor> {
    let check = &state.cfg.effectiveness.false_negative_check;
    if !check.enabled {
        info!("false-negative checker disabled");
        return None;
    }

    let interval = if check.interval.is_zero() {
        Duration::from_secs(300)
    } else {
        check.interval
    };

    info!(
        interval = %format_duration(interval),
        lookback = %format_duration(check.lookback),
        "false-negative checker started"
    );

    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick: the dropped-IP set is still empty then.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    info!("false-negative checker stopped");
                    return;
                }
                _ = ticker.tick() => {
                    run_check(&state).await;
                }
            }
        }
    });

    Some(Auditor { cancel, handle })
}

impl Auditor {
    /// Signals the task and waits for it within a bounded window.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = tokio::time::timeout(STOP_TIMEOUT, self.handle).await;
    }
}

/// One audit pass: snapshot the dropped-IP set, fetch recent alerts, and
/// count alerts whose source IP the scorer truncated out.
pub async fn run_check(state: &AppState) {
    let dropped = state.dropped_ips_snapshot();
    if dropped.is_empty() {
        state
            .false_negative_last_check
            .store(Utc::now().timestamp(), Ordering::Relaxed);
        debug!("false-negative check: no dropped IPs to check");
        return;
    }

    let lookback = {
        let configured = state.cfg.effectiveness.false_negative_check.lookback;
        if configured.is_zero() {
            Duration::from_secs(900)
        } else {
            configured
        }
    };
    let query = format!("since={}", format_duration(lookback));

    let alerts = match state.client.get_alerts(Some(&query)).await {
        Ok(alerts) => alerts,
        Err(err) => {
            warn!(error = %err, "false-negative check: failed to fetch alerts");
            // Counters and the dropped-IP snapshot stay untouched, but the
            // check time still moves so a stuck clock is observable.
            state
                .false_negative_last_check
                .store(Utc::now().timestamp(), Ordering::Relaxed);
            return;
        }
    };

    let mut found = 0i64;
    for alert in &alerts {
        let ip = if alert.source.value.is_empty() {
            alert.source.ip.as_str()
        } else {
            alert.source.value.as_str()
        };
        if ip.is_empty() {
            continue;
        }
        if dropped.contains(ip) {
            found += 1;
            warn!(
                ip,
                scenario = %alert.scenario,
                alert_id = alert.id,
                "false-negative detected"
            );
        }
    }

    if found > 0 {
        let total = state
            .false_negatives_total
            .fetch_add(found, Ordering::Relaxed)
            + found;
        warn!(count = found, total, "false-negative check: found false negatives");
    } else {
        debug!(
            alerts_checked = alerts.len(),
            dropped_ips = dropped.len(),
            "false-negative check clean"
        );
    }

    state
        .false_negative_last_check
        .store(Utc::now().timestamp(), Ordering::Relaxed);
}
