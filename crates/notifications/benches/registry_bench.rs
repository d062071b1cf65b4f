use std::sync::Arc;

use common::SellerId;
use criterion::{Criterion, criterion_group, criterion_main};
use notifications::SubscriberRegistry;

fn bench_push(c: &mut Criterion) {
    let registry = Arc::new(SubscriberRegistry::new());
    let seller = SellerId::new("bench");
    let mut subscriptions: Vec<_> = (0..16).map(|_| registry.open(&seller, 1024)).collect();
    let message = r#"{"type":"LowStockWarning","sellerId":"bench","payload":{"id":1,"quantity":1,"threshold":5}}"#;

    c.bench_function("registry/push_16_subscribers", |b| {
        b.iter(|| {
            registry.push(&seller, message);
            for subscription in &mut subscriptions {
                let _ = subscription.try_recv();
            }
        });
    });
}

fn bench_push_to_other_seller(c: &mut Criterion) {
    let registry = Arc::new(SubscriberRegistry::new());
    let _subscriptions: Vec<_> = (0..16)
        .map(|i| registry.open(&SellerId::new(format!("s{i}")), 16))
        .collect();
    let seller = SellerId::new("nobody");

    c.bench_function("registry/push_no_subscribers", |b| {
        b.iter(|| registry.push(&seller, "{}"));
    });
}

fn bench_subscribe_unsubscribe(c: &mut Criterion) {
    let registry = Arc::new(SubscriberRegistry::new());
    let seller = SellerId::new("bench");

    c.bench_function("registry/open_and_drop", |b| {
        b.iter(|| drop(registry.open(&seller, 8)));
    });
}

criterion_group!(
    benches,
    bench_push,
    bench_push_to_other_seller,
    bench_subscribe_unsubscribe
);
criterion_main!(benches);
