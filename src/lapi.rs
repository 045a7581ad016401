//! HTTP client for the upstream CrowdSec LAPI.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::helpers::parse_duration;

const API_KEY_HEADER: &str = "X-Api-Key";
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const BODY_EXCERPT_LEN: usize = 512;

/// A CrowdSec ban decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Decision {
    pub id: i64,
    pub origin: String,
    #[serde(rename = "type")]
    pub decision_type: String,
    pub scope: String,
    pub value: String,
    pub duration: String,
    pub scenario: String,
    pub simulated: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub created_at: String,

    // Derived for scoring, never on the wire.
    #[serde(skip)]
    pub parsed_duration: Option<Duration>,
    #[serde(skip)]
    pub parsed_created: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub score: i64,
}

impl Decision {
    /// Fills the derived fields from their string forms. Unparseable values
    /// stay `None`; the decision itself is always kept.
    pub fn derive_parsed(&mut self) {
        if !self.duration.is_empty() {
            self.parsed_duration = parse_duration(&self.duration).ok();
        }
        if !self.created_at.is_empty() {
            self.parsed_created = parse_created_at(&self.created_at);
        }
    }
}

/// Delta response from the streaming endpoint. `None` round-trips the
/// upstream's literal `null` for an absent slice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionStream {
    pub new: Option<Vec<Decision>>,
    pub deleted: Option<Vec<Decision>>,
}

/// A locally generated detection, used for false-negative auditing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Alert {
    pub id: i64,
    pub scenario: String,
    pub source: AlertSource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSource {
    pub ip: String,
    pub scope: String,
    pub value: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("executing request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("LAPI returned status {status}: {body}")]
    UpstreamStatus { status: StatusCode, body: String },
    #[error("parsing upstream response: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Client for the upstream LAPI. Every call carries the configured API key
/// and accepts JSON.
pub struct Client {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, Error> {
        // Cold startup=true fetches over a large decision set need most of
        // the default 120s budget.
        let timeout = if timeout.is_zero() {
            Duration::from_secs(120)
        } else {
            timeout
        };
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }

    /// Fetches all active decisions, passing the raw query string through
    /// verbatim.
    pub async fn get_decisions(&self, raw_query: Option<&str>) -> Result<Vec<Decision>, Error> {
        let mut url = format!("{}/v1/decisions", self.base_url);
        if let Some(q) = raw_query {
            if !q.is_empty() {
                url.push('?');
                url.push_str(q);
            }
        }

        let body = self.get_checked(&url).await?;

        // The LAPI returns a literal null body for an empty decision set.
        if body.as_ref() == b"null" {
            return Ok(Vec::new());
        }

        let mut decisions: Vec<Decision> =
            serde_json::from_slice(&body).map_err(Error::Decode)?;
        for d in &mut decisions {
            d.derive_parsed();
        }
        Ok(decisions)
    }

    /// Fetches the decision delta stream.
    pub async fn get_stream(&self, startup: bool) -> Result<DecisionStream, Error> {
        let mut url = format!("{}/v1/decisions/stream", self.base_url);
        if startup {
            url.push_str("?startup=true");
        }

        let body = self.get_checked(&url).await?;
        if body.as_ref() == b"null" {
            return Ok(DecisionStream::default());
        }

        let mut stream: DecisionStream =
            serde_json::from_slice(&body).map_err(Error::Decode)?;
        if let Some(new) = stream.new.as_mut() {
            for d in new {
                d.derive_parsed();
            }
        }
        Ok(stream)
    }

    /// Fetches recent alerts, e.g. with `since=15m0s`.
    pub async fn get_alerts(&self, raw_query: Option<&str>) -> Result<Vec<Alert>, Error> {
        let mut url = format!("{}/v1/alerts", self.base_url);
        if let Some(q) = raw_query {
            if !q.is_empty() {
                url.push('?');
                url.push_str(q);
            }
        }

        let body = self.get_checked(&url).await?;
        if body.as_ref() == b"null" {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&body).map_err(Error::Decode)
    }

    /// Probes upstream liveness with an independent 5-second ceiling.
    pub async fn health(&self) -> Result<(), Error> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .header(API_KEY_HEADER, &self.api_key)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                status,
                body: excerpt(&resp.bytes().await.unwrap_or_default()),
            });
        }
        Ok(())
    }

    async fn get_checked(&self, url: &str) -> Result<bytes::Bytes, Error> {
        let resp = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                status,
                body: excerpt(&body),
            });
        }
        Ok(body)
    }
}

fn excerpt(body: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(body).into_owned();
    if text.len() > BODY_EXCERPT_LEN {
        let mut cut = BODY_EXCERPT_LEN;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push('…');
    }
    text
}

/// Parses a `created_at` timestamp: RFC3339 first, then the fixed fallback
/// formats the LAPI has been seen emitting.
pub fn parse_created_at(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%dT%H:%M:%S%.3fZ"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(t.and_utc());
        }
    }
    if let Ok(t) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z UTC") {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(t.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn decision_deserializes_with_missing_fields() {
        let d: Decision = serde_json::from_str(r#"{"id": 7, "value": "1.2.3.4"}"#).unwrap();
        assert_eq!(d.id, 7);
        assert_eq!(d.value, "1.2.3.4");
        assert_eq!(d.origin, "");
        assert_eq!(d.decision_type, "");
        assert!(!d.simulated);
        assert!(d.parsed_duration.is_none());
        assert!(d.parsed_created.is_none());
    }

    #[test]
    fn decision_serializes_wire_shape() {
        let d = Decision {
            id: 1,
            origin: "crowdsec".to_string(),
            decision_type: "ban".to_string(),
            scope: "ip".to_string(),
            value: "1.2.3.4".to_string(),
            duration: "4h".to_string(),
            scenario: "crowdsecurity/ssh-bf".to_string(),
            score: 120,
            ..Decision::default()
        };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["type"], "ban");
        assert_eq!(json["id"], 1);
        // Derived fields and empty optionals stay off the wire.
        assert!(json.get("score").is_none());
        assert!(json.get("parsed_duration").is_none());
        assert!(json.get("uuid").is_none());
        assert!(json.get("created_at").is_none());
    }

    #[test]
    fn derive_parsed_fills_duration_and_created() {
        let mut d = Decision {
            duration: "24h30m".to_string(),
            created_at: "2024-03-01T12:00:00Z".to_string(),
            ..Decision::default()
        };
        d.derive_parsed();
        assert_eq!(
            d.parsed_duration,
            Some(Duration::from_secs(24 * 3600 + 30 * 60))
        );
        let created = d.parsed_created.unwrap();
        assert_eq!(created.year(), 2024);
        assert_eq!(created.hour(), 12);
    }

    #[test]
    fn derive_parsed_keeps_decision_on_garbage() {
        let mut d = Decision {
            duration: "eternal".to_string(),
            created_at: "yesterday".to_string(),
            ..Decision::default()
        };
        d.derive_parsed();
        assert!(d.parsed_duration.is_none());
        assert!(d.parsed_created.is_none());
    }

    #[test]
    fn created_at_fallback_formats() {
        let cases = [
            "2024-03-01T12:00:00Z",
            "2024-03-01T12:00:00.123Z",
            "2024-03-01T12:00:00+02:00",
            "2024-03-01 12:00:00 +0000 UTC",
            "2024-03-01 12:00:00",
        ];
        for s in cases {
            assert!(parse_created_at(s).is_some(), "failed to parse {s:?}");
        }
        assert!(parse_created_at("01/03/2024").is_none());
    }

    #[test]
    fn stream_round_trips_null_slices() {
        let stream: DecisionStream =
            serde_json::from_str(r#"{"new": null, "deleted": null}"#).unwrap();
        assert!(stream.new.is_none());
        assert!(stream.deleted.is_none());

        let out = serde_json::to_string(&stream).unwrap();
        assert_eq!(out, r#"{"new":null,"deleted":null}"#);
    }

    #[test]
    fn alert_source_defaults() {
        let a: Alert =
            serde_json::from_str(r#"{"id": 100, "scenario": "crowdsecurity/ssh-bf"}"#).unwrap();
        assert_eq!(a.id, 100);
        assert_eq!(a.source.ip, "");
        assert_eq!(a.source.value, "");
    }
}
