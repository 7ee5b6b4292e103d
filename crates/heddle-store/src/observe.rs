//! Per-operation tracing and metrics
//!
//! Every public operation runs under a tracing span and, on completion,
//! bumps a per-operation counter and a duration histogram. `NotFound` is a
//! non-exceptional outcome and gets its own status label.

use crate::error::StoreError;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Instant;

/// Engine metrics, registered against a caller-supplied registry
#[derive(Clone)]
pub struct Metrics {
    ops: IntCounterVec,
    duration: HistogramVec,
}

impl Metrics {
    /// Create and register the engine's metric families.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let ops = IntCounterVec::new(
            Opts::new("heddle_store_ops_total", "Engine operations by outcome"),
            &["op", "status"],
        )?;
        registry.register(Box::new(ops.clone()))?;

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "heddle_store_op_duration_seconds",
                "Engine operation duration",
            )
            .buckets(vec![
                0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["op"],
        )?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self { ops, duration })
    }

    /// Start observing one operation.
    pub(crate) fn observe(&self, op: &'static str) -> OpObservation<'_> {
        OpObservation {
            metrics: self,
            op,
            start: Instant::now(),
        }
    }
}

pub(crate) struct OpObservation<'m> {
    metrics: &'m Metrics,
    op: &'static str,
    start: Instant,
}

impl OpObservation<'_> {
    /// Record the outcome and duration.
    pub(crate) fn finish<T>(self, result: &Result<T, StoreError>) {
        let status = match result {
            Ok(_) => "ok",
            Err(e) if e.is_not_found() => "not_found",
            Err(_) => "error",
        };
        if let Err(e) = result {
            if !e.is_not_found() {
                tracing::warn!(op = self.op, error = %e, "operation failed");
            }
        }
        self.metrics
            .ops
            .with_label_values(&[self.op, status])
            .inc();
        self.metrics
            .duration
            .with_label_values(&[self.op])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_labeled() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).unwrap();

        metrics.observe("get_actor").finish(&Ok(()));
        metrics
            .observe("get_actor")
            .finish::<()>(&Err(StoreError::not_found("actor")));
        metrics
            .observe("get_actor")
            .finish::<()>(&Err(StoreError::ConcurrentModification));

        let families = registry.gather();
        let ops = families
            .iter()
            .find(|f| f.get_name() == "heddle_store_ops_total")
            .unwrap();
        let mut statuses: Vec<String> = ops
            .get_metric()
            .iter()
            .flat_map(|m| {
                m.get_label()
                    .iter()
                    .filter(|l| l.get_name() == "status")
                    .map(|l| l.get_value().to_string())
            })
            .collect();
        statuses.sort();
        assert_eq!(statuses, vec!["error", "not_found", "ok"]);
    }

    #[test]
    fn double_registration_fails_cleanly() {
        let registry = Registry::new();
        Metrics::new(&registry).unwrap();
        assert!(Metrics::new(&registry).is_err());
    }
}
