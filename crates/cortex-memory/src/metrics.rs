// cortex-memory/src/metrics.rs

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Registry, TextEncoder};
use std::sync::OnceLock;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static EVENTS_INGESTED: OnceLock<IntCounterVec> = OnceLock::new();
static SUMMARY_WRITES: OnceLock<IntCounterVec> = OnceLock::new();
static MASTER_UPSERTS: OnceLock<IntCounterVec> = OnceLock::new();
static SIDE_EFFECTS: OnceLock<IntCounterVec> = OnceLock::new();

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> Option<IntCounterVec> {
    let counter = IntCounterVec::new(prometheus::opts!(name, help), labels).ok()?;
    REGISTRY.register(Box::new(counter.clone())).ok();
    Some(counter)
}

/// Registers all counters. Safe to call more than once.
pub fn init_metrics() {
    if EVENTS_INGESTED.get().is_none() {
        if let Some(c) = counter_vec("events_ingested_total", "Events persisted per actor", &["actor"]) {
            let _ = EVENTS_INGESTED.set(c);
        }
    }
    if SUMMARY_WRITES.get().is_none() {
        if let Some(c) = counter_vec("summary_writes_total", "Thread summary writes per reason", &["reason"]) {
            let _ = SUMMARY_WRITES.set(c);
        }
    }
    if MASTER_UPSERTS.get().is_none() {
        if let Some(c) = counter_vec("master_upserts_total", "Master item upserts per outcome", &["outcome"]) {
            let _ = MASTER_UPSERTS.set(c);
        }
    }
    if SIDE_EFFECTS.get().is_none() {
        if let Some(c) = counter_vec(
            "side_effects_total",
            "Side-effect tasks per kind and outcome",
            &["kind", "outcome"],
        ) {
            let _ = SIDE_EFFECTS.set(c);
        }
    }
}

pub fn inc_event(actor: &str) {
    if let Some(counter) = EVENTS_INGESTED.get() {
        counter.with_label_values(&[actor]).inc();
    }
}

pub fn inc_summary_write(reason: &str) {
    if let Some(counter) = SUMMARY_WRITES.get() {
        counter.with_label_values(&[reason]).inc();
    }
}

pub fn inc_master_upsert(outcome: &str) {
    if let Some(counter) = MASTER_UPSERTS.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn inc_side_effect(kind: &str, outcome: &str) {
    if let Some(counter) = SIDE_EFFECTS.get() {
        counter.with_label_values(&[kind, outcome]).inc();
    }
}

/// Renders the registry in the Prometheus text exposition format.
pub fn gather_text() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
