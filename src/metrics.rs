use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
///
/// Only one global recorder can exist per process. Later calls (several
/// routers in one test binary) get a detached handle instead of failing.
pub fn init_metrics() -> PrometheusHandle {
    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::debug!(error = %e, "Prometheus recorder already installed");
            return PrometheusBuilder::new().build_recorder().handle();
        }
    };

    // Pre-register counters so they appear even before the first increment.
    counter!("decisions_parsed_total").absolute(0);
    counter!("decision_fallbacks_total").absolute(0);
    counter!("decisions_rejected_total").absolute(0);
    counter!("decisions_leverage_clamped_total").absolute(0);
    counter!("fills_reconciled_total").absolute(0);

    gauge!("open_positions").set(0.0);

    // Histogram is lazily created on first record; force creation.
    histogram!("decision_parse_seconds").record(0.0);

    handle
}
