//! Process-wide generation metrics.
//!
//! Collectors are registered by [`init_metrics`]; until then every recording
//! helper is a no-op, so library users who never initialize pay nothing.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::OnceLock;

use crate::error::ErrorKind;
use crate::types::Side;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static GENERATIONS: OnceLock<IntCounterVec> = OnceLock::new();
static PIVOTS: OnceLock<IntCounterVec> = OnceLock::new();
static DUPLICATE_UNLOADS: OnceLock<IntCounter> = OnceLock::new();
static RECONCILE_LOOPS_ACTIVE: OnceLock<IntGauge> = OnceLock::new();

pub fn init_metrics() {
    let generations = GENERATIONS.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("generations_total", "Finished generations per side and outcome"),
            &["side", "outcome"],
        )
        .expect("valid generations_total metric")
    });

    let pivots = PIVOTS.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("pivots_total", "Fast-path failures that entered recovery"),
            &["side"],
        )
        .expect("valid pivots_total metric")
    });

    let duplicate_unloads = DUPLICATE_UNLOADS.get_or_init(|| {
        IntCounter::new("duplicate_unloads_total", "Redundant instances the server confirmed unloading")
            .expect("valid duplicate_unloads_total metric")
    });

    let loops_active = RECONCILE_LOOPS_ACTIVE.get_or_init(|| {
        IntGauge::new("reconcile_loops_active", "Background reconciliation loops currently running")
            .expect("valid reconcile_loops_active metric")
    });

    REGISTRY.register(Box::new(generations.clone())).ok();
    REGISTRY.register(Box::new(pivots.clone())).ok();
    REGISTRY.register(Box::new(duplicate_unloads.clone())).ok();
    REGISTRY.register(Box::new(loops_active.clone())).ok();
}

pub fn record_generation(side: Side, outcome: Option<ErrorKind>) {
    if let Some(counter) = GENERATIONS.get() {
        let label = outcome.map(|k| k.as_label()).unwrap_or("success");
        counter.with_label_values(&[side.as_str(), label]).inc();
    }
}

pub fn inc_pivot(side: Side) {
    if let Some(counter) = PIVOTS.get() {
        counter.with_label_values(&[side.as_str()]).inc();
    }
}

pub fn inc_duplicate_unloads(count: usize) {
    if let Some(counter) = DUPLICATE_UNLOADS.get() {
        counter.inc_by(count as u64);
    }
}

pub fn inc_reconcile_loops() {
    if let Some(gauge) = RECONCILE_LOOPS_ACTIVE.get() {
        gauge.inc();
    }
}

pub fn dec_reconcile_loops() {
    if let Some(gauge) = RECONCILE_LOOPS_ACTIVE.get() {
        gauge.dec();
    }
}

/// Text exposition of every registered collector.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
