//! # Prometheus Metrics — Exposition for Container Orchestration
//!
//! Exposes beamline operational metrics in the Prometheus text exposition
//! format for scraping by Prometheus, Grafana Agent, or any
//! OpenMetrics-compatible collector.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `beamline_grants_total` | Counter | `source` | Point grants processed |
//! | `beamline_beams_awarded_total` | Counter | `source` | Beams credited |
//! | `beamline_level_ups_total` | Counter | — | Level transitions |
//! | `beamline_windows_finalized_total` | Counter | — | Leaderboard windows announced |
//! | `beamline_achievements_completed_total` | Counter | `achievement` | First-time completions |
//! | `beamline_rewards_claimed_total` | Counter | — | Achievement rewards paid out |
//! | `beamline_http_request_duration_seconds` | Histogram | `method`, `path` | API latency |
//!
//! The `/metrics` endpoint renders the current registry state on each scrape.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Label set for per-source metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct SourceLabel {
    pub source: String,
}

/// Label set for per-achievement metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct AchievementLabel {
    pub achievement: String,
}

/// Label set for HTTP latency histograms.
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub path: String,
}

/// Thread-safe metrics registry for the beamline engine.
///
/// All fields use atomic types and are safe to update from any thread or
/// async task. The `Family` type automatically creates per-label-set metric
/// instances on first use.
pub struct Metrics {
    pub registry: Registry,
    pub grants_total: Family<SourceLabel, Counter>,
    pub beams_awarded: Family<SourceLabel, Counter>,
    pub level_ups_total: Counter,
    pub windows_finalized_total: Counter,
    pub achievements_completed: Family<AchievementLabel, Counter>,
    pub rewards_claimed_total: Counter,
    pub http_request_duration: Family<HttpLabel, Histogram>,
}

impl Metrics {
    /// Create a new metrics registry with all beamline metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let grants_total = Family::<SourceLabel, Counter>::default();
        registry.register(
            "beamline_grants",
            "Point grants processed by source",
            grants_total.clone(),
        );

        let beams_awarded = Family::<SourceLabel, Counter>::default();
        registry.register(
            "beamline_beams_awarded",
            "Beams credited by source",
            beams_awarded.clone(),
        );

        let level_ups_total = Counter::default();
        registry.register(
            "beamline_level_ups",
            "Level transitions applied",
            level_ups_total.clone(),
        );

        let windows_finalized_total = Counter::default();
        registry.register(
            "beamline_windows_finalized",
            "Leaderboard windows announced",
            windows_finalized_total.clone(),
        );

        let achievements_completed = Family::<AchievementLabel, Counter>::default();
        registry.register(
            "beamline_achievements_completed",
            "First-time achievement completions",
            achievements_completed.clone(),
        );

        let rewards_claimed_total = Counter::default();
        registry.register(
            "beamline_rewards_claimed",
            "Achievement rewards paid out",
            rewards_claimed_total.clone(),
        );

        let http_request_duration = Family::<HttpLabel, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 12))
        });
        registry.register(
            "beamline_http_request_duration_seconds",
            "API request latency",
            http_request_duration.clone(),
        );

        Self {
            registry,
            grants_total,
            beams_awarded,
            level_ups_total,
            windows_finalized_total,
            achievements_completed,
            rewards_claimed_total,
            http_request_duration,
        }
    }

    /// Record one processed grant.
    pub fn observe_grant(&self, source: &str, beams: i64, leveled_up: bool) {
        let label = SourceLabel {
            source: source.to_string(),
        };
        self.grants_total.get_or_create(&label).inc();
        self.beams_awarded
            .get_or_create(&label)
            .inc_by(beams.max(0) as u64);
        if leveled_up {
            self.level_ups_total.inc();
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).expect("encoding metrics should not fail");
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_encode_returns_valid_text() {
        let m = Metrics::new();
        m.observe_grant("poll-participation", 10, true);
        m.windows_finalized_total.inc();

        let output = m.encode();
        assert!(output.contains("beamline_grants"));
        assert!(output.contains("poll-participation"));
        assert!(output.contains("beamline_level_ups"));
        assert!(output.contains("beamline_windows_finalized"));
    }

    #[test]
    fn per_source_counters_independent() {
        let m = Metrics::new();
        m.observe_grant("content-completion", 50, false);
        m.observe_grant("game-completion", 75, false);

        let output = m.encode();
        assert!(output.contains("content-completion"));
        assert!(output.contains("game-completion"));
    }

    #[test]
    fn negative_beams_do_not_underflow_counter() {
        let m = Metrics::new();
        m.observe_grant("content-completion", -5, false);
        let output = m.encode();
        assert!(output.contains("beamline_beams_awarded"));
    }
}
