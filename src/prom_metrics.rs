//! # Prometheus Metrics
//!
//! Marketplace metrics in the OpenMetrics text format, rendered at `/metrics`.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `taskmarket_claims_total` | Counter | `result` | Claim attempts by outcome |
//! | `taskmarket_payouts_total` | Counter | `kind` | Fresh ledger credits |
//! | `taskmarket_payout_cents_total` | Counter | `kind` | Cents credited |
//! | `taskmarket_withdrawals_total` | Counter | `state` | Withdrawals opened and settled |
//! | `taskmarket_tasks_active` | Gauge | | Tasks currently accepting claims |
//! | `taskmarket_withdrawals_pending` | Gauge | | Withdrawals awaiting settlement |
//! | `taskmarket_http_request_duration_seconds` | Histogram | `method`, `path` | Request latency |
//!
//! Gauges are refreshed by the background sweep loop and on every scrape.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResultLabel {
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabel {
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StateLabel {
    pub state: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub path: String,
}

fn latency_histogram() -> Histogram {
    Histogram::new(exponential_buckets(0.001, 2.0, 14))
}

pub struct Metrics {
    pub registry: Registry,
    pub claims: Family<ResultLabel, Counter>,
    pub payouts: Family<KindLabel, Counter>,
    pub payout_cents: Family<KindLabel, Counter>,
    pub withdrawals: Family<StateLabel, Counter>,
    pub tasks_active: Gauge,
    pub withdrawals_pending: Gauge,
    pub http_request_duration: Family<HttpLabel, Histogram, fn() -> Histogram>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("taskmarket");

        let claims = Family::<ResultLabel, Counter>::default();
        registry.register("claims", "Claim attempts by outcome", claims.clone());

        let payouts = Family::<KindLabel, Counter>::default();
        registry.register("payouts", "Fresh ledger credits by kind", payouts.clone());

        let payout_cents = Family::<KindLabel, Counter>::default();
        registry.register(
            "payout_cents",
            "Cents credited to balances by kind",
            payout_cents.clone(),
        );

        let withdrawals = Family::<StateLabel, Counter>::default();
        registry.register(
            "withdrawals",
            "Withdrawal requests by state",
            withdrawals.clone(),
        );

        let tasks_active = Gauge::default();
        registry.register(
            "tasks_active",
            "Tasks currently accepting claims",
            tasks_active.clone(),
        );

        let withdrawals_pending = Gauge::default();
        registry.register(
            "withdrawals_pending",
            "Withdrawal requests awaiting settlement",
            withdrawals_pending.clone(),
        );

        let http_request_duration =
            Family::<HttpLabel, Histogram, fn() -> Histogram>::new_with_constructor(
                latency_histogram,
            );
        registry.register(
            "http_request_duration_seconds",
            "HTTP request latency by method and normalized path",
            http_request_duration.clone(),
        );

        Self {
            registry,
            claims,
            payouts,
            payout_cents,
            withdrawals,
            tasks_active,
            withdrawals_pending,
            http_request_duration,
        }
    }

    pub fn record_claim(&self, result: &str) {
        self.claims
            .get_or_create(&ResultLabel {
                result: result.to_string(),
            })
            .inc();
    }

    pub fn record_payout(&self, kind: &str, cents: i64) {
        let label = KindLabel {
            kind: kind.to_string(),
        };
        self.payouts.get_or_create(&label).inc();
        self.payout_cents
            .get_or_create(&label)
            .inc_by(u64::try_from(cents).unwrap_or(0));
    }

    pub fn record_withdrawal(&self, state: &str) {
        self.withdrawals
            .get_or_create(&StateLabel {
                state: state.to_string(),
            })
            .inc();
    }

    /// Render the registry in OpenMetrics text format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        if let Err(e) = encode(&mut buf, &self.registry) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
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
    fn encode_includes_registered_families() {
        let m = Metrics::new();
        m.tasks_active.set(3);
        m.record_claim("created");
        let output = m.encode();
        assert!(output.contains("taskmarket_tasks_active 3"));
        assert!(output.contains("taskmarket_claims_total{result=\"created\"} 1"));
        assert!(output.contains("taskmarket_withdrawals_pending"));
    }

    #[test]
    fn payout_cents_accumulate_per_kind() {
        let m = Metrics::new();
        m.record_payout("earning", 500);
        m.record_payout("earning", 250);
        m.record_payout("adjustment", 100);
        let output = m.encode();
        assert!(output.contains("taskmarket_payout_cents_total{kind=\"earning\"} 750"));
        assert!(output.contains("taskmarket_payouts_total{kind=\"earning\"} 2"));
        assert!(output.contains("taskmarket_payout_cents_total{kind=\"adjustment\"} 100"));
    }

    #[test]
    fn http_histogram_observes() {
        let m = Metrics::new();
        m.http_request_duration
            .get_or_create(&HttpLabel {
                method: "GET".into(),
                path: "/api/tasks".into(),
            })
            .observe(0.004);
        assert!(m
            .encode()
            .contains("taskmarket_http_request_duration_seconds_count{method=\"GET\",path=\"/api/tasks\"} 1"));
    }
}
