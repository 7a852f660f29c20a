use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Gate
pub static CHALLENGES_ISSUED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("paylink_challenges_total", "402 challenges returned"),
        &["route"],
    )
    .unwrap()
});

pub static PAYMENTS_SETTLED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("paylink_payments_settled_total", "Payments settled per route"),
        &["route"],
    )
    .unwrap()
});

pub static PAYMENTS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "paylink_payments_rejected_total",
            "Payment proofs rejected before or during settlement",
        ),
        &["reason"],
    )
    .unwrap()
});

pub static REVENUE_UNITS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("paylink_revenue_units_total", "Settled token units per route"),
        &["route"],
    )
    .unwrap()
});

pub static FACILITATOR_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "paylink_facilitator_latency_seconds",
            "Facilitator verify+settle latency",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .unwrap()
});

// Policy and grants
pub static POLICY_DENIALS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("paylink_policy_denials_total", "Resource policy denials"),
        &["reason"],
    )
    .unwrap()
});

pub static GRANTS_ISSUED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("paylink_grants_issued_total", "Access grants issued"),
        &["scope"],
    )
    .unwrap()
});

// Ledger
pub static SETTLEMENTS_RECORDED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "paylink_settlements_recorded_total",
            "Settlements closed on the ledger, by final status",
        ),
        &["status"],
    )
    .unwrap()
});

static REGISTER: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(CHALLENGES_ISSUED.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(PAYMENTS_SETTLED.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(PAYMENTS_REJECTED.clone()))
            .unwrap();
        REGISTRY.register(Box::new(REVENUE_UNITS.clone())).unwrap();
        REGISTRY
            .register(Box::new(FACILITATOR_LATENCY.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(POLICY_DENIALS.clone()))
            .unwrap();
        REGISTRY.register(Box::new(GRANTS_ISSUED.clone())).unwrap();
        REGISTRY
            .register(Box::new(SETTLEMENTS_RECORDED.clone()))
            .unwrap();
    });
}
