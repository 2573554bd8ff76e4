use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use std::sync::LazyLock;
use tracing::trace;

static SET_APPLIED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    global::meter("portico_core")
        .u64_counter("signal_set_applied")
        .with_description("Number of times a signal value was changed")
        .build()
});

static SET_SKIPPED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    global::meter("portico_core")
        .u64_counter("signal_set_skipped")
        .with_description("Number of times a signal set was skipped because the value was equal")
        .build()
});

#[inline]
pub fn record_set_applied(name: &'static str) {
    trace!("Set value in signal; signal.name={name}");
    SET_APPLIED.add(1, &[KeyValue::new("signal", name)]);
}

#[inline]
pub fn record_set_skipped(name: &'static str) {
    trace!("Skipped setting value in signal; signal.name={name}");
    SET_SKIPPED.add(1, &[KeyValue::new("signal", name)]);
}
