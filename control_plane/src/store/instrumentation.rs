use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use std::sync::LazyLock;
use tracing::trace;

static WRITE_APPLIED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    global::meter("portico_control_plane")
        .u64_counter("snapshot_write_applied")
        .with_description("Number of snapshot writes delivered to subscribers")
        .build()
});

static WRITE_SKIPPED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    global::meter("portico_control_plane")
        .u64_counter("snapshot_write_skipped")
        .with_description("Number of snapshot writes dropped because the value was equal")
        .build()
});

static WRITE_CONFLICTS: LazyLock<Counter<u64>> = LazyLock::new(|| {
    global::meter("portico_control_plane")
        .u64_counter("snapshot_write_conflicts")
        .with_description("Number of compare-and-store attempts rejected by a concurrent write")
        .build()
});

#[inline]
pub fn record_write_applied(key: &str, deleted: bool) {
    trace!("Applied snapshot write; snapshot.key={key} snapshot.deleted={deleted}");
    WRITE_APPLIED.add(
        1,
        &[
            KeyValue::new("gateway_class", key.to_string()),
            KeyValue::new("deleted", deleted),
        ],
    );
}

#[inline]
pub fn record_write_skipped(key: &str) {
    trace!("Skipped unchanged snapshot write; snapshot.key={key}");
    WRITE_SKIPPED.add(1, &[KeyValue::new("gateway_class", key.to_string())]);
}

#[inline]
pub fn record_write_conflict(key: &str) {
    trace!("Snapshot write conflicted; snapshot.key={key}");
    WRITE_CONFLICTS.add(1, &[KeyValue::new("gateway_class", key.to_string())]);
}
