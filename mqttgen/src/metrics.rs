use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref PUBLISHED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "mqttgen_published_total",
        "Total messages published to the broker"
    ))
    .unwrap();
    pub static ref SUPPRESSED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "mqttgen_suppressed_total",
        "Total evaluations not published because sync is false"
    ))
    .unwrap();
    pub static ref SET_COMMANDS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "mqttgen_set_commands_total",
        "Total SET commands applied"
    ))
    .unwrap();
    pub static ref GET_COMMANDS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "mqttgen_get_commands_total",
        "Total GET commands served"
    ))
    .unwrap();
    pub static ref REJECTED_COMMANDS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "mqttgen_rejected_commands_total",
        "Total inbound commands dropped because they could not be applied"
    ))
    .unwrap();
    pub static ref EVALUATION_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "mqttgen_evaluation_failures_total",
        "Total message evaluations that failed"
    ))
    .unwrap();
    pub static ref PUBLISH_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "mqttgen_publish_failures_total",
        "Total publish calls rejected by the MQTT client"
    ))
    .unwrap();
    pub static ref TICK_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "mqttgen_tick_seconds",
            "Time spent generating, publishing and servicing the network per tick"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(PUBLISHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SUPPRESSED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SET_COMMANDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GET_COMMANDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REJECTED_COMMANDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EVALUATION_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PUBLISH_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TICK_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
