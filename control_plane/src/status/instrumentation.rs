use crate::kubernetes::objects::WatchedKind;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use std::sync::LazyLock;

static WRITES_ISSUED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    global::meter("portico_control_plane")
        .u64_counter("status_write_issued")
        .with_description("Number of status or finalizer writes sent to the API server")
        .build()
});

static WRITES_SKIPPED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    global::meter("portico_control_plane")
        .u64_counter("status_write_skipped")
        .with_description("Number of status or finalizer writes skipped because nothing changed")
        .build()
});

#[inline]
pub fn record_write_issued(kind: WatchedKind, field: &'static str) {
    let kind: &'static str = kind.into();
    WRITES_ISSUED.add(
        1,
        &[KeyValue::new("kind", kind), KeyValue::new("field", field)],
    );
}

#[inline]
pub fn record_write_skipped(kind: WatchedKind, field: &'static str) {
    let kind: &'static str = kind.into();
    WRITES_SKIPPED.add(
        1,
        &[KeyValue::new("kind", kind), KeyValue::new("field", field)],
    );
}
