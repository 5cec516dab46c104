//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p storage --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{
    CustomerId, DeliveryMethod, Money, OrderId, OrderStatus, PaymentMethod, PaymentStatus,
    StoreId,
};
use rust_decimal_macros::dec;
use serial_test::serial;
use sqlx::PgPool;
use storage::{
    CasOutcome, CustomerInfo, Order, OrderChange, OrderItem, OrderPaymentUpdate, OrderQuery,
    Payment, PaymentTransition, PostgresStore, Product, ProviderData, StockChange, StorageError,
    Store,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_storefront_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE payments, order_items, orders, products")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

async fn seed_order(store: &PostgresStore, store_id: StoreId, product: &Product) -> Order {
    let now = Utc::now();
    let id = OrderId::new();
    let order = Order {
        id,
        store_id,
        customer_id: CustomerId::new(),
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        total_amount: product.price.times(2),
        customer_info: CustomerInfo {
            name: "Aziz".into(),
            phone: "+998901234567".into(),
            email: None,
        },
        delivery_address: Some("Tashkent".into()),
        delivery_method: DeliveryMethod::Delivery,
        notes: None,
        items: vec![OrderItem {
            order_id: id,
            product_id: product.id,
            quantity: 2,
            price: product.price,
        }],
        created_at: now,
        updated_at: now,
    };
    store.insert_order(&order).await.unwrap();
    store.insert_order_items(order.id, &order.items).await.unwrap();
    order
}

#[tokio::test]
#[serial]
async fn test_product_roundtrip_and_scoping() {
    let store = get_test_store().await;
    let store_id = StoreId::new();
    let product = Product::new(store_id, "Tea", Money::new(dec!(12.50)), 7);
    store.upsert_product(&product).await.unwrap();

    let loaded = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "Tea");
    assert_eq!(loaded.price, Money::new(dec!(12.50)));
    assert_eq!(loaded.stock_quantity, 7);

    let other = store
        .get_products(StoreId::new(), &[product.id])
        .await
        .unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
#[serial]
async fn test_conditional_decrement() {
    let store = get_test_store().await;
    let product = Product::new(StoreId::new(), "Tea", Money::new(dec!(1)), 5);
    store.upsert_product(&product).await.unwrap();

    assert_eq!(
        store.decrement_stock(product.id, 3).await.unwrap(),
        StockChange::Decremented { remaining: 2 }
    );
    assert_eq!(
        store.decrement_stock(product.id, 4).await.unwrap(),
        StockChange::Insufficient { available: 2 }
    );
    assert_eq!(store.increment_stock(product.id, 3).await.unwrap(), Some(5));
}

#[tokio::test]
#[serial]
async fn test_concurrent_decrements_never_oversell() {
    let store = get_test_store().await;
    let product = Product::new(StoreId::new(), "Tea", Money::new(dec!(1)), 5);
    store.upsert_product(&product).await.unwrap();

    let a = {
        let store = store.clone();
        tokio::spawn(async move { store.decrement_stock(product.id, 3).await.unwrap() })
    };
    let b = {
        let store = store.clone();
        tokio::spawn(async move { store.decrement_stock(product.id, 4).await.unwrap() })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    let succeeded = results
        .iter()
        .filter(|r| matches!(r, StockChange::Decremented { .. }))
        .count();
    assert_eq!(succeeded, 1);

    let stock = store.get_product(product.id).await.unwrap().unwrap().stock_quantity;
    assert!(stock == 2 || stock == 1);
}

#[tokio::test]
#[serial]
async fn test_order_items_and_listing() {
    let store = get_test_store().await;
    let store_id = StoreId::new();
    let product = Product::new(store_id, "Tea", Money::new(dec!(10)), 10);
    store.upsert_product(&product).await.unwrap();

    let order = seed_order(&store, store_id, &product).await;
    let loaded = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.items, order.items);
    assert_eq!(loaded.customer_info, order.customer_info);

    seed_order(&store, store_id, &product).await;
    let (page, total) = store
        .list_orders(
            store_id,
            &OrderQuery {
                limit: 1,
                ..OrderQuery::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].items.len(), 1);

    let (_, filtered) = store
        .list_orders(
            store_id,
            &OrderQuery {
                status: Some(OrderStatus::Shipped),
                ..OrderQuery::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(filtered, 0);
}

#[tokio::test]
#[serial]
async fn test_order_cas() {
    let store = get_test_store().await;
    let store_id = StoreId::new();
    let product = Product::new(store_id, "Tea", Money::new(dec!(10)), 10);
    store.upsert_product(&product).await.unwrap();
    let order = seed_order(&store, store_id, &product).await;

    let change = OrderChange {
        status: OrderStatus::Cancelled,
        payment_status: Some(PaymentStatus::Cancelled),
        notes: Some("changed my mind".into()),
    };
    let applied = store
        .transition_order(order.id, OrderStatus::Pending, change.clone())
        .await
        .unwrap();
    let CasOutcome::Applied(cancelled) = applied else {
        panic!("expected applied");
    };
    assert_eq!(cancelled.payment_status, PaymentStatus::Cancelled);
    assert_eq!(cancelled.notes.as_deref(), Some("changed my mind"));

    let stale = store
        .transition_order(order.id, OrderStatus::Pending, change)
        .await
        .unwrap();
    assert!(matches!(stale, CasOutcome::Stale(o) if o.status == OrderStatus::Cancelled));
}

#[tokio::test]
#[serial]
async fn test_payment_settlement_and_duplicate_transaction() {
    let store = get_test_store().await;
    let store_id = StoreId::new();
    let product = Product::new(store_id, "Tea", Money::new(dec!(10)), 10);
    store.upsert_product(&product).await.unwrap();
    let order = seed_order(&store, store_id, &product).await;

    let payment = Payment::pending(order.id, order.total_amount, PaymentMethod::Click, "TXN_1_a");
    store.insert_payment(&payment).await.unwrap();
    let dup = Payment::pending(order.id, order.total_amount, PaymentMethod::Click, "TXN_1_a");
    assert!(matches!(
        store.insert_payment(&dup).await,
        Err(StorageError::DuplicateTransaction(_))
    ));

    let attached = store
        .attach_provider(
            payment.id,
            None,
            ProviderData::Click {
                service_id: "1".into(),
                merchant_id: "2".into(),
                payment_url: "https://my.click.uz/services/pay?x=1".into(),
                click_trans_id: None,
                click_paydoc_id: None,
                sign_time: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(attached.provider_data, Some(ProviderData::Click { .. })));

    let transition = PaymentTransition {
        payment_id: payment.id,
        expected: PaymentStatus::Pending,
        next: PaymentStatus::Paid,
        provider_payment_id: Some("998877".into()),
        provider_data: None,
        notes: None,
        order: Some(OrderPaymentUpdate {
            payment_status: PaymentStatus::Paid,
            promote_pending_to: Some(OrderStatus::Processing),
        }),
    };
    let CasOutcome::Applied(settlement) =
        store.transition_payment(transition.clone()).await.unwrap()
    else {
        panic!("expected applied");
    };
    assert_eq!(settlement.payment.status, PaymentStatus::Paid);
    assert!(matches!(settlement.payment.provider_data, Some(ProviderData::Click { .. })));
    let settled_order = settlement.order.unwrap();
    assert_eq!(settled_order.status, OrderStatus::Processing);
    assert_eq!(settled_order.payment_status, PaymentStatus::Paid);

    assert!(matches!(
        store.transition_payment(transition).await.unwrap(),
        CasOutcome::Stale(p) if p.status == PaymentStatus::Paid
    ));

    let by_provider = store
        .find_payment_by_provider_id(PaymentMethod::Click, "998877")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_provider.id, payment.id);
}

#[tokio::test]
#[serial]
async fn test_refund_records_negative_row() {
    let store = get_test_store().await;
    let store_id = StoreId::new();
    let product = Product::new(store_id, "Tea", Money::new(dec!(10)), 10);
    store.upsert_product(&product).await.unwrap();
    let order = seed_order(&store, store_id, &product).await;

    let mut payment = Payment::pending(order.id, order.total_amount, PaymentMethod::Cash, "TXN_2_b");
    payment.status = PaymentStatus::Paid;
    store.insert_payment(&payment).await.unwrap();

    let mut refund = Payment::pending(
        order.id,
        -Money::new(dec!(5)),
        PaymentMethod::Cash,
        "TXN_3_c",
    );
    refund.status = PaymentStatus::Refunded;
    refund.parent_payment_id = Some(payment.id);

    let CasOutcome::Applied(record) = store
        .record_refund(&refund, PaymentStatus::PartiallyRefunded)
        .await
        .unwrap()
    else {
        panic!("expected applied");
    };
    assert_eq!(record.parent.status, PaymentStatus::PartiallyRefunded);
    assert_eq!(record.order.payment_status, PaymentStatus::PartiallyRefunded);

    let mut again = refund.clone();
    again.id = common::PaymentId::new();
    again.transaction_id = "TXN_4_d".into();
    assert!(matches!(
        store.record_refund(&again, PaymentStatus::Refunded).await.unwrap(),
        CasOutcome::Stale(_)
    ));

    let rows = store.payments_for_order(order.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|p| p.amount.is_negative()));
}
