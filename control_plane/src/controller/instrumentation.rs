use crate::kubernetes::objects::WatchedKind;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use std::sync::LazyLock;

static RECONCILE_SUCCEEDED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    global::meter("portico_control_plane")
        .u64_counter("reconcile_succeeded")
        .with_description("Number of reconciles that completed")
        .build()
});

static RECONCILE_FAILED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    global::meter("portico_control_plane")
        .u64_counter("reconcile_failed")
        .with_description("Number of reconciles that returned an error, by error class")
        .build()
});

static RECONCILE_DROPPED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    global::meter("portico_control_plane")
        .u64_counter("reconcile_dropped")
        .with_description("Number of keys given up on after repeated invariant violations")
        .build()
});

fn kind_label(kind: WatchedKind) -> KeyValue {
    let kind: &'static str = kind.into();
    KeyValue::new("kind", kind)
}

#[inline]
pub fn record_reconcile_succeeded(kind: WatchedKind) {
    RECONCILE_SUCCEEDED.add(1, &[kind_label(kind)]);
}

#[inline]
pub fn record_reconcile_failed(kind: WatchedKind, class: &'static str) {
    RECONCILE_FAILED.add(1, &[kind_label(kind), KeyValue::new("error", class)]);
}

#[inline]
pub fn record_reconcile_dropped(kind: WatchedKind) {
    RECONCILE_DROPPED.add(1, &[kind_label(kind)]);
}
