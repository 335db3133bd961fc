use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub booking_transitions_total: IntCounterVec,
    pub tracking_sessions_active: IntGauge,
    pub tracking_refreshes_total: IntCounterVec,
    pub cluster_render_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let booking_transitions_total = IntCounterVec::new(
            Opts::new(
                "booking_transitions_total",
                "Booking status transitions by outcome",
            ),
            &["outcome"],
        )
        .expect("valid booking_transitions_total metric");

        let tracking_sessions_active = IntGauge::new(
            "tracking_sessions_active",
            "Tracking sessions with a running refresh loop",
        )
        .expect("valid tracking_sessions_active metric");

        let tracking_refreshes_total = IntCounterVec::new(
            Opts::new(
                "tracking_refreshes_total",
                "Tracking refresh cycles by outcome",
            ),
            &["outcome"],
        )
        .expect("valid tracking_refreshes_total metric");

        let cluster_render_seconds = Histogram::with_opts(HistogramOpts::new(
            "cluster_render_seconds",
            "Time spent clustering provider markers",
        ))
        .expect("valid cluster_render_seconds metric");

        registry
            .register(Box::new(booking_transitions_total.clone()))
            .expect("register booking_transitions_total");
        registry
            .register(Box::new(tracking_sessions_active.clone()))
            .expect("register tracking_sessions_active");
        registry
            .register(Box::new(tracking_refreshes_total.clone()))
            .expect("register tracking_refreshes_total");
        registry
            .register(Box::new(cluster_render_seconds.clone()))
            .expect("register cluster_render_seconds");

        Self {
            registry,
            booking_transitions_total,
            tracking_sessions_active,
            tracking_refreshes_total,
            cluster_render_seconds,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
