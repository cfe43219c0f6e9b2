//! Mount telemetry counters.
//!
//! Counters are incremented as side effects on the publish path and never
//! consulted by the driver itself; scraping and exposition belong to the
//! process hosting the driver.

use std::sync::OnceLock;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static MOUNT_ATTEMPTS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static MOUNT_FAILURES_TOTAL: OnceLock<IntCounter> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        Registry::new_custom(Some("sharedresource_csi".to_string()), None)
            .expect("failed to initialise metrics registry")
    })
}

fn register_collector<C>(collector: C) -> C
where
    C: Clone + Collector + Send + Sync + 'static,
{
    registry()
        .register(Box::new(collector.clone()))
        .expect("failed to register metric collector");
    collector
}

fn mount_attempts_total() -> &'static IntCounter {
    MOUNT_ATTEMPTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounter::new(
                "mount_attempts_total",
                "Number of share volume mount attempts.",
            )
            .expect("mount_attempts_total"),
        )
    })
}

fn mount_failures_total() -> &'static IntCounter {
    MOUNT_FAILURES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounter::new(
                "mount_failures_total",
                "Number of share volume mounts that failed after setup began.",
            )
            .expect("mount_failures_total"),
        )
    })
}

/// Record that a mount was attempted.
pub fn inc_mount_attempts() {
    mount_attempts_total().inc();
}

/// Record that a mount failed after filesystem setup began.
pub fn inc_mount_failures() {
    mount_failures_total().inc();
}

/// Current value of the attempt counter.
pub fn mount_attempts() -> u64 {
    mount_attempts_total().get()
}

/// Current value of the failure counter.
pub fn mount_failures() -> u64 {
    mount_failures_total().get()
}

/// Encode all driver metrics in the Prometheus text format.
pub fn gather() -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    encoder
        .encode(&registry().gather(), &mut buf)
        .expect("failed to encode metrics");
    String::from_utf8(buf).expect("metrics are valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let attempts = mount_attempts();
        let failures = mount_failures();
        inc_mount_attempts();
        inc_mount_failures();
        assert!(mount_attempts() >= attempts + 1);
        assert!(mount_failures() >= failures + 1);
    }

    #[test]
    fn gather_exposes_counters() {
        inc_mount_attempts();
        inc_mount_failures();
        let text = gather();
        assert!(text.contains("sharedresource_csi_mount_attempts_total"));
        assert!(text.contains("sharedresource_csi_mount_failures_total"));
    }
}
