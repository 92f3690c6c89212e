//! Benchmark suite for the per-request gate.
//!
//! Measures:
//! - The synchronous prechecks (enablement, allow-list, input size)
//! - The full gate including the in-memory quota step
//! - Plan resolution from stored role and tier
//! - Prompt rendering from the embedded catalog
//!
//! Run with: `cargo bench --bench gate_overhead`

#![allow(clippy::let_underscore_must_use, reason = "Criterion benchmarks ignore results")]
#![allow(missing_docs, reason = "Benchmark functions are self-documenting")]
#![allow(clippy::expect_used, reason = "Benchmark setup fails loudly")]

use std::{hint::black_box, sync::Arc};

use chrono::NaiveDate;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use textval_gate::{
    catalog::TemplateCatalog,
    entitlement::{Role, UserEntitlementState, UserId},
    gate::{FeatureGate, FeatureRequest, precheck},
    ledger::{FixedClock, QuotaLedger},
    plan::{PlanRegistry, Tier, Workflow},
    store::InMemoryStore,
};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 10).expect("valid date")
}

fn bench_precheck(c: &mut Criterion) {
    let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::ERROR).try_init();

    let registry = PlanRegistry::builtin();
    let mut group = c.benchmark_group("precheck");

    for len in [100usize, 2_000, 15_000] {
        let request = FeatureRequest::new(Workflow::Validator, "Generico", "è".repeat(len));
        group.bench_with_input(BenchmarkId::new("input_chars", len), &request, |b, request| {
            b.iter(|| black_box(precheck(black_box(request), registry.get(Tier::Pro))));
        });
    }

    let unlisted = FeatureRequest::new(Workflow::Validator, "Copywriter Persuasivo", "testo");
    group.bench_function("profile_denied", |b| {
        b.iter(|| black_box(precheck(black_box(&unlisted), registry.get(Tier::Free))));
    });

    group.finish();
}

fn bench_full_gate(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
    let registry = PlanRegistry::builtin();

    let mut state = UserEntitlementState::provisioned(UserId::new("user_bench"), None);
    state.last_used_date = Some(today());
    let store = Arc::new(InMemoryStore::with_users([state.clone()]));
    let gate = FeatureGate::new(QuotaLedger::new(store, Arc::new(FixedClock::new(today()))));
    let request = FeatureRequest::new(Workflow::Validator, "Generico", "Un testo di prova.");

    c.bench_function("authorize_with_quota", |b| {
        b.to_async(&runtime).iter(|| {
            let mut state = state.clone();
            let gate = &gate;
            let request = &request;
            let plan = registry.get(Tier::Free);
            async move { black_box(gate.authorize(request, &mut state, plan).await) }
        });
    });
}

fn bench_plan_resolution(c: &mut Criterion) {
    let registry = PlanRegistry::builtin();
    let mut group = c.benchmark_group("plan_resolution");

    for (label, role, tier) in [
        ("found", Role::User, Some("business")),
        ("fallback", Role::User, Some("enterprise")),
        ("admin_override", Role::Admin, Some("free")),
    ] {
        group.bench_function(label, |b| {
            b.iter(|| black_box(registry.resolve(black_box(role), black_box(tier))));
        });
    }

    group.finish();
}

fn bench_prompt_rendering(c: &mut Criterion) {
    let catalog = TemplateCatalog::embedded().expect("embedded catalog parses");
    let text = "Gentile cliente, la informiamo che il suo ordine è stato spedito. ".repeat(30);

    c.bench_function("render_primary_validator", |b| {
        b.iter(|| black_box(catalog.render_primary(Workflow::Validator, "Generico", black_box(&text))));
    });
}

criterion_group!(benches, bench_precheck, bench_full_gate, bench_plan_resolution, bench_prompt_rendering);
criterion_main!(benches);
