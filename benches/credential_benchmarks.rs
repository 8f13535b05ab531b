use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use gatemesh::auther::{GatewayAuther, RequestHeader};
use gatemesh::credential::checksum::checksum;
use gatemesh::credential::{derive_access_key, CredentialStore};
use gatemesh::settings::InternalCredential;
use gatemesh::storage::MemoryStore;

fn store() -> CredentialStore {
    CredentialStore::new(
        "gw-bench",
        Arc::new(MemoryStore::new("master_key")),
        Arc::new(MemoryStore::new("service_access")),
        100_000,
        Duration::from_secs(30),
    )
}

fn benchmark_checksum(c: &mut Criterion) {
    let key = [7u8; 32];
    c.bench_function("checksum", |b| {
        b.iter(|| black_box(checksum(black_box("318273645012345678"), &key)))
    });
}

fn benchmark_derive_access_key(c: &mut Criterion) {
    let key = [7u8; 32];
    c.bench_function("derive_access_key", |b| {
        b.iter(|| black_box(derive_access_key(black_box("ak.mk1.0a1f318273645"), &key)))
    });
}

fn benchmark_get_access_cached(c: &mut Criterion) {
    let store = store();
    let ids: Vec<String> = (0..100)
        .map(|i| store.create_access(&format!("group-{}", i % 10)).unwrap().id().to_string())
        .collect();

    c.bench_function("get_access_cached", |b| {
        let mut counter = 0;
        b.iter(|| {
            counter += 1;
            black_box(store.get_access(&ids[counter % ids.len()]).unwrap())
        })
    });
}

fn benchmark_get_access_forged(c: &mut Criterion) {
    let store = store();
    let access = store.create_access("group-forged").unwrap();
    let forged = format!("{}0", access.id());

    c.bench_function("get_access_forged", |b| {
        b.iter(|| black_box(store.get_access(&forged).unwrap()))
    });
}

fn benchmark_sign_and_verify(c: &mut Criterion) {
    let store = store();
    let access = store.create_access("internal").unwrap();
    let internal = InternalCredential {
        access_id: access.id().to_string(),
        access_key: store.access_key(&access).unwrap().to_vec(),
    };
    let auther = GatewayAuther::new(store, Some(internal));

    c.bench_function("gateway_sign_and_verify", |b| {
        b.iter(|| {
            let mut header = RequestHeader::for_service("orders");
            auther.generate("GW", &mut header).unwrap();
            black_box(auther.verify(&header).is_ok())
        })
    });
}

criterion_group!(
    benches,
    benchmark_checksum,
    benchmark_derive_access_key,
    benchmark_get_access_cached,
    benchmark_get_access_forged,
    benchmark_sign_and_verify
);
criterion_main!(benches);
