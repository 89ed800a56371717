use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use std::sync::Arc;

use wardlock_core::client::WardClient;
use wardlock_core::clock::ManualClock;
use wardlock_core::config::CoreConfig;
use wardlock_core::infrastructure_in_memory::InMemoryStore;
use wardlock_core::lock_manager::AcquireRequest;
use wardlock_core::queue_coordinator::EnqueueRequest;
use wardlock_core::types::*;

fn client_with_clock() -> (WardClient, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let client = WardClient::with_store(
        Arc::new(InMemoryStore::new()),
        CoreConfig::default(),
        clock.clone(),
    );
    (client, clock)
}

fn record(id: &str) -> AcquireRequest {
    AcquireRequest::new(
        ResourceRef::new("t1", ResourceType::MedicalRecord, id),
        LeaseType::MedicalRecordEdit,
    )
}

fn bench_lease_acquire_release(c: &mut Criterion) {
    let client = WardClient::new();
    let actor = Actor::new("dr-1", ActorRole::Physician);

    c.bench_function("lease_acquire_release_cycle", |b| {
        b.iter(|| {
            let outcome = client.locks().acquire(&actor, record("mr-1"));
            if let Ok(AcquireOutcome::Granted { lease }) = &outcome {
                let _ = client.locks().release(&actor, "t1", &lease.id, None);
            }
        })
    });
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("lease_throughput");

    for holder_count in [10, 50, 100] {
        group.bench_with_input(
            BenchmarkId::new("holders", holder_count),
            &holder_count,
            |b, &count| {
                b.iter(|| {
                    let client = WardClient::new();

                    // Each holder leases a different record
                    for i in 0..count {
                        let actor = Actor::new(format!("dr-{}", i), ActorRole::Physician);
                        let _ = client.locks().acquire(&actor, record(&format!("mr-{}", i)));
                    }

                    black_box(client.locks().list_active("t1", None).map(|l| l.len()))
                })
            },
        );
    }

    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    c.bench_function("sweep_1000_expired", |b| {
        b.iter(|| {
            let (client, clock) = client_with_clock();
            let actor = Actor::new("sync", ActorRole::System);

            for i in 0..1000 {
                let _ = client.locks().acquire(&actor, record(&format!("mr{}", i)).ttl_minutes(1));
            }

            clock.advance(2 * MINUTE_MS);
            black_box(client.locks().sweep_expired(None))
        })
    });
}

fn bench_queue_day(c: &mut Criterion) {
    c.bench_function("queue_enqueue_serve_50", |b| {
        b.iter(|| {
            let (client, clock) = client_with_clock();
            let desk = Actor::new("desk", ActorRole::Reception);
            let doctor = Actor::new("doc1", ActorRole::Physician);

            for i in 0..50 {
                let _ = client.queue().enqueue(
                    &desk,
                    EnqueueRequest {
                        tenant_id: "t1".to_string(),
                        appointment_id: format!("appt{}", i),
                        patient_id: format!("pat{}", i),
                        clinician_id: "doc1".to_string(),
                        priority: if i % 10 == 0 { Priority::Urgent } else { Priority::Normal },
                        notes: None,
                    },
                );
            }

            let mut current = client.queue().call_next(&doctor, "t1", "doc1").ok().flatten();
            while let Some(entry) = current {
                clock.advance(MINUTE_MS);
                let _ = client.queue().start_service(&doctor, "t1", &entry.id);
                current = client
                    .queue()
                    .finalize_and_advance(&doctor, "t1", &entry.appointment_id, None)
                    .ok()
                    .and_then(|o| o.next_patient);
            }

            black_box(client.queue().statistics("t1", Some("doc1")).map(|s| s.done))
        })
    });
}

criterion_group!(
    benches,
    bench_lease_acquire_release,
    bench_throughput,
    bench_sweep,
    bench_queue_day
);
criterion_main!(benches);
