//! Metering counters for webhook processing and token grants.
//!
//! The sink is a collaborator boundary; production deployments plug a real
//! metrics registry in, the shipped implementations cover logging and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use tokenledger_core::CreditSource;

/// Counter sink for event processing and credit metrics.
pub trait MetricsSink: Send + Sync {
    /// A webhook delivery arrived, before any handling.
    fn webhook_received(&self, event_type: &str);

    /// A webhook delivery was fully handled.
    fn webhook_ok(&self, event_type: &str);

    /// A webhook delivery was deduplicated.
    fn webhook_duplicate(&self, event_type: &str);

    /// A webhook delivery failed and will be redelivered by the provider.
    fn webhook_failed(&self, event_type: &str);

    /// Tokens were credited to an account.
    fn tokens_credited(&self, source: CreditSource, amount_tokens: i64);
}

/// Sink that emits counters as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn webhook_received(&self, event_type: &str) {
        tracing::debug!(metric = "webhook_received", event_type, "counter");
    }

    fn webhook_ok(&self, event_type: &str) {
        tracing::debug!(metric = "webhook_ok", event_type, "counter");
    }

    fn webhook_duplicate(&self, event_type: &str) {
        tracing::debug!(metric = "webhook_duplicate", event_type, "counter");
    }

    fn webhook_failed(&self, event_type: &str) {
        tracing::warn!(metric = "webhook_failed", event_type, "counter");
    }

    fn tokens_credited(&self, source: CreditSource, amount_tokens: i64) {
        tracing::info!(
            metric = "tokens_credited",
            source = source.as_str(),
            amount_tokens,
            "counter"
        );
    }
}

/// In-memory counting sink for tests and local inspection.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    counters: Mutex<HashMap<String, i64>>,
}

impl CountingMetrics {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, key: String, by: i64) {
        let mut counters = self.counters.lock().expect("metrics mutex poisoned");
        *counters.entry(key).or_insert(0) += by;
    }

    /// Read a counter, zero when never incremented.
    ///
    /// Keys follow `"{metric}:{tag}"`, e.g. `"webhook_ok:checkout.session.completed"`
    /// or `"tokens_credited:purchase"`.
    #[must_use]
    pub fn get(&self, key: &str) -> i64 {
        self.counters
            .lock()
            .expect("metrics mutex poisoned")
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

impl MetricsSink for CountingMetrics {
    fn webhook_received(&self, event_type: &str) {
        self.bump(format!("webhook_received:{event_type}"), 1);
    }

    fn webhook_ok(&self, event_type: &str) {
        self.bump(format!("webhook_ok:{event_type}"), 1);
    }

    fn webhook_duplicate(&self, event_type: &str) {
        self.bump(format!("webhook_duplicate:{event_type}"), 1);
    }

    fn webhook_failed(&self, event_type: &str) {
        self.bump(format!("webhook_failed:{event_type}"), 1);
    }

    fn tokens_credited(&self, source: CreditSource, amount_tokens: i64) {
        self.bump(format!("tokens_credited:{}", source.as_str()), amount_tokens);
    }
}
