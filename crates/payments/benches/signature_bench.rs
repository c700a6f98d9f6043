use std::sync::Arc;

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use domain::{Money, NewReservation, PaymentId, Reservation};
use payments::{
    DispatcherConfig, InMemoryNotifier, ReconciliationEngine, SideEffectDispatcher,
    SignatureVerifier, StoreVoucherIssuer,
};
use store::{InMemoryLedger, InMemoryReservationStore, InMemoryVoucherStore, ReservationStore};

fn payload(size: usize) -> Vec<u8> {
    let padding = "x".repeat(size.saturating_sub(120));
    serde_json::to_vec(&serde_json::json!({
        "id": "evt_bench",
        "event": "PAYMENT_CONFIRMED",
        "payment": { "id": "pay_bench", "status": "CONFIRMED", "description": padding }
    }))
    .unwrap()
}

fn bench_verify(c: &mut Criterion) {
    let verifier = SignatureVerifier::new("bench-secret").unwrap();
    let mut group = c.benchmark_group("signature/verify");

    for size in [256usize, 4 * 1024, 64 * 1024] {
        let body = payload(size);
        let signature = verifier.sign(&body);
        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &body, |b, body| {
            b.iter(|| assert!(verifier.verify(body, &signature)));
        });
    }
    group.finish();
}

fn bench_replayed_delivery(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let verifier = SignatureVerifier::new("bench-secret").unwrap();

    let engine = rt.block_on(async {
        let store = InMemoryReservationStore::new();
        let mut reservation = Reservation::new(
            NewReservation {
                external_reference: "ref-bench".to_string(),
                customer_name: "Bench".to_string(),
                customer_email: "bench@example.com".to_string(),
                party_size: 2,
                amount: Money::from_cents(10000),
            },
            Utc::now(),
        )
        .unwrap();
        reservation
            .attach_payment(PaymentId::from("pay_bench"), Utc::now())
            .unwrap();
        store.insert(&reservation).await.unwrap();

        let dispatcher = SideEffectDispatcher::start(
            DispatcherConfig::default(),
            Arc::new(StoreVoucherIssuer::new(Arc::new(InMemoryVoucherStore::new()))),
            Arc::new(InMemoryNotifier::new()),
        );
        ReconciliationEngine::new(
            verifier.clone(),
            Arc::new(store),
            Arc::new(InMemoryLedger::new()),
            dispatcher,
        )
    });

    let body = payload(512);
    let signature = verifier.sign(&body);
    rt.block_on(engine.handle(&body, Some(&signature))).unwrap();

    c.bench_function("engine/replayed_delivery", |b| {
        b.iter(|| {
            rt.block_on(engine.handle(&body, Some(&signature))).unwrap();
        });
    });
}

criterion_group!(benches, bench_verify, bench_replayed_delivery);
criterion_main!(benches);
