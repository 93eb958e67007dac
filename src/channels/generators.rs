//! Payload generators for the built-in feeds
//!
//! Generators synthesize a fresh value on every call and never see which
//! connection they are serving.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator failed: {0}")]
    Failed(String),

    #[error("generator panicked: {0}")]
    Panicked(String),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Produces one payload per tick
pub trait PayloadGenerator: Send + Sync {
    fn generate(&self, now: DateTime<Utc>) -> Result<Value, GeneratorError>;
}

impl<F> PayloadGenerator for F
where
    F: Fn(DateTime<Utc>) -> Result<Value, GeneratorError> + Send + Sync,
{
    fn generate(&self, now: DateTime<Utc>) -> Result<Value, GeneratorError> {
        self(now)
    }
}

fn iso8601(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `{"vulnerabilityScore": 0..100, "timestamp": ...}`
pub struct VulnerabilityScore;

impl PayloadGenerator for VulnerabilityScore {
    fn generate(&self, now: DateTime<Utc>) -> Result<Value, GeneratorError> {
        let raw: f64 = rand::rng().random_range(0.0..=100.0);
        let score = (raw * 10.0).round() / 10.0;

        Ok(json!({
            "vulnerabilityScore": score,
            "timestamp": iso8601(now),
        }))
    }
}

/// Severity labels, most severe first
pub const SEVERITIES: [&str; 4] = ["Critical", "High", "Medium", "Low"];

const WATCHLIST: [(&str, &str); 5] = [
    ("CVE-2024-3094", "XZ Utils backdoor"),
    ("CVE-2021-44228", "Log4Shell remote code execution"),
    ("CVE-2023-4966", "Citrix Bleed session hijack"),
    ("CVE-2024-21762", "FortiOS out-of-bounds write"),
    ("CVE-2023-34362", "MOVEit Transfer SQL injection"),
];

#[derive(Debug, Serialize)]
struct RankedVulnerability {
    id: &'static str,
    name: &'static str,
    severity: &'static str,
}

/// `{"topVulnerabilities": [{id, name, severity}; 5]}`, ranked most severe first
pub struct TopVulnerabilities;

impl PayloadGenerator for TopVulnerabilities {
    fn generate(&self, _now: DateTime<Utc>) -> Result<Value, GeneratorError> {
        let mut rng = rand::rng();

        let mut ranked: Vec<RankedVulnerability> = WATCHLIST
            .iter()
            .map(|&(id, name)| RankedVulnerability {
                id,
                name,
                severity: SEVERITIES.choose(&mut rng).copied().unwrap_or("Low"),
            })
            .collect();
        // Stable sort keeps watchlist order within a severity
        ranked.sort_by_key(|v| SEVERITIES.iter().position(|s| *s == v.severity));

        Ok(json!({ "topVulnerabilities": serde_json::to_value(ranked)? }))
    }
}

/// `{"activeThreats": n, "blockedAttempts": n, "timestamp": ...}`
pub struct ThreatActivity;

impl PayloadGenerator for ThreatActivity {
    fn generate(&self, now: DateTime<Utc>) -> Result<Value, GeneratorError> {
        let mut rng = rand::rng();
        let active_threats: u32 = rng.random_range(0..=50);
        let blocked_attempts: u32 = rng.random_range(0..=500);

        Ok(json!({
            "activeThreats": active_threats,
            "blockedAttempts": blocked_attempts,
            "timestamp": iso8601(now),
        }))
    }
}

/// Generic feed for unrecognized paths: `{"value": 0..100, "timestamp": ...}`
pub struct Pulse;

impl PayloadGenerator for Pulse {
    fn generate(&self, now: DateTime<Utc>) -> Result<Value, GeneratorError> {
        let value: f64 = rand::rng().random_range(0.0..100.0);

        Ok(json!({
            "value": value,
            "timestamp": iso8601(now),
        }))
    }
}
