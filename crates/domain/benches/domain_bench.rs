use std::sync::Arc;

use common::{CustomerId, Money, StoreId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{CartItem, CreateOrder, Dispatcher, InMemoryNotifier, InventoryLedger, OrderService};
use rust_decimal_macros::dec;
use storage::{InMemoryStore, Product, Store};

fn quiet_dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(InMemoryNotifier::new()), Dispatcher::DEFAULT_TIMEOUT)
}

fn bench_create_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let store_id = StoreId::new();
    let products: Vec<Product> = (0..3)
        .map(|_| Product::new(store_id, "Bench", Money::new(dec!(9.99)), u32::MAX / 2))
        .collect();
    rt.block_on(async {
        for p in &products {
            store.upsert_product(p).await.unwrap();
        }
    });
    let service = OrderService::new(store, quiet_dispatcher());

    c.bench_function("domain/create_order_three_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                let items = products.iter().map(|p| CartItem::new(p.id, 1)).collect();
                service
                    .create_order(CreateOrder::new(store_id, CustomerId::new(), items))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_contended_reserve(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    let store = InMemoryStore::new();
    let product = Product::new(StoreId::new(), "Hot", Money::new(dec!(1)), u32::MAX / 2);
    rt.block_on(store.upsert_product(&product)).unwrap();
    let ledger = Arc::new(InventoryLedger::new(store));

    c.bench_function("domain/contended_reserve_x16", |b| {
        b.iter(|| {
            rt.block_on(async {
                let tasks: Vec<_> = (0..16)
                    .map(|_| {
                        let ledger = ledger.clone();
                        tokio::spawn(async move { ledger.reserve(product.id, 1).await.unwrap() })
                    })
                    .collect();
                for task in tasks {
                    task.await.unwrap();
                }
            });
        });
    });
}

criterion_group!(benches, bench_create_order, bench_contended_reserve);
criterion_main!(benches);
