use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use common::{
    CustomerId, Money, OrderId, OrderStatus, PaymentId, PaymentMethod, PaymentStatus, ProductId,
    StoreId,
};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CustomerInfo, Order, OrderItem, Payment, Product, ProviderData, Result, StorageError,
    store::{
        CasOutcome, OrderChange, OrderQuery, PaymentTransition, RefundRecord, Settlement,
        SortOrder, StockChange, Store,
    },
};

macro_rules! product_columns {
    () => {
        "id, store_id, name, price, stock_quantity, is_active, created_at, updated_at"
    };
}

macro_rules! order_columns {
    () => {
        "id, store_id, customer_id, status, payment_status, total_amount, customer_info, \
         delivery_address, delivery_method, notes, created_at, updated_at"
    };
}

macro_rules! payment_columns {
    () => {
        "id, order_id, amount, payment_method, status, transaction_id, provider_payment_id, \
         provider_data, parent_payment_id, notes, created_at, updated_at"
    };
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            store_id: StoreId::from_uuid(row.try_get::<Uuid, _>("store_id")?),
            name: row.try_get("name")?,
            price: Money::new(row.try_get::<Decimal, _>("price")?),
            stock_quantity: to_u32("stock_quantity", row.try_get("stock_quantity")?)?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Decodes an order row. Items are loaded separately.
    fn row_to_order(row: PgRow) -> Result<Order> {
        let customer_info: CustomerInfo =
            serde_json::from_value(row.try_get::<serde_json::Value, _>("customer_info")?)?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            store_id: StoreId::from_uuid(row.try_get::<Uuid, _>("store_id")?),
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            status: parse("status", row.try_get("status")?)?,
            payment_status: parse("payment_status", row.try_get("payment_status")?)?,
            total_amount: Money::new(row.try_get::<Decimal, _>("total_amount")?),
            customer_info,
            delivery_address: row.try_get("delivery_address")?,
            delivery_method: parse("delivery_method", row.try_get("delivery_method")?)?,
            notes: row.try_get("notes")?,
            items: Vec::new(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<OrderItem> {
        Ok(OrderItem {
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            quantity: to_u32("quantity", row.try_get("quantity")?)?,
            price: Money::new(row.try_get::<Decimal, _>("price")?),
        })
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let provider_data = row
            .try_get::<Option<serde_json::Value>, _>("provider_data")?
            .map(serde_json::from_value::<ProviderData>)
            .transpose()?;

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            amount: Money::new(row.try_get::<Decimal, _>("amount")?),
            payment_method: parse("payment_method", row.try_get("payment_method")?)?,
            status: parse("status", row.try_get("status")?)?,
            transaction_id: row.try_get("transaction_id")?,
            provider_payment_id: row.try_get("provider_payment_id")?,
            provider_data,
            parent_payment_id: row
                .try_get::<Option<Uuid>, _>("parent_payment_id")?
                .map(PaymentId::from_uuid),
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn items_for(&self, order_ids: &[Uuid]) -> Result<HashMap<OrderId, Vec<OrderItem>>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, price
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            let item = Self::row_to_item(row)?;
            items.entry(item.order_id).or_default().push(item);
        }
        Ok(items)
    }

    async fn with_items(&self, mut order: Order) -> Result<Order> {
        let mut items = self.items_for(&[order.id.as_uuid()]).await?;
        order.items = items.remove(&order.id).unwrap_or_default();
        Ok(order)
    }

    async fn fetch_payment<'e, E>(executor: E, id: PaymentId) -> Result<Option<Payment>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(executor)
        .await?
        .map(Self::row_to_payment)
        .transpose()
    }

    fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, store_id: StoreId, query: &OrderQuery) {
        qb.push(" WHERE store_id = ").push_bind(store_id.as_uuid());
        if let Some(status) = query.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(payment_status) = query.payment_status {
            qb.push(" AND payment_status = ")
                .push_bind(payment_status.as_str());
        }
        if let Some(from) = query.date_from {
            qb.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = query.date_to {
            qb.push(" AND created_at <= ").push_bind(to);
        }
    }
}

fn parse<T: FromStr>(column: &'static str, value: String) -> Result<T> {
    value
        .parse()
        .map_err(|_| StorageError::Corrupt { column, value })
}

fn to_u32(column: &'static str, value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| StorageError::Corrupt {
        column,
        value: value.to_string(),
    })
}

/// Maps a unique violation on `transaction_id` to `DuplicateTransaction`.
fn map_insert_error(err: sqlx::Error, transaction_id: &str) -> StorageError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.constraint() == Some("unique_transaction_id")
    {
        return StorageError::DuplicateTransaction(transaction_id.to_string());
    }
    StorageError::Database(err)
}

fn provider_json(data: Option<&ProviderData>) -> Result<Option<serde_json::Value>> {
    Ok(data.map(serde_json::to_value).transpose()?)
}

#[async_trait]
impl Store for PostgresStore {
    async fn upsert_product(&self, product: &Product) -> Result<()> {
        let stock = i32::try_from(product.stock_quantity).map_err(|_| StorageError::Corrupt {
            column: "stock_quantity",
            value: product.stock_quantity.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO products (id, store_id, name, price, stock_quantity, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                stock_quantity = EXCLUDED.stock_quantity,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(product.store_id.as_uuid())
        .bind(&product.name)
        .bind(product.price.amount())
        .bind(stock)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        sqlx::query(concat!(
            "SELECT ",
            product_columns!(),
            " FROM products WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_product)
        .transpose()
    }

    async fn get_products(&self, store_id: StoreId, ids: &[ProductId]) -> Result<Vec<Product>> {
        let ids: Vec<Uuid> = ids.iter().map(ProductId::as_uuid).collect();
        let rows = sqlx::query(concat!(
            "SELECT ",
            product_columns!(),
            " FROM products WHERE store_id = $1 AND id = ANY($2)"
        ))
        .bind(store_id.as_uuid())
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_product).collect()
    }

    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<StockChange> {
        let Ok(requested) = i32::try_from(quantity) else {
            return Ok(match self.get_product(id).await? {
                None => StockChange::Missing,
                Some(p) if !p.is_active => StockChange::Inactive,
                Some(p) => StockChange::Insufficient {
                    available: p.stock_quantity,
                },
            });
        };

        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $2, updated_at = NOW()
            WHERE id = $1 AND is_active AND stock_quantity >= $2
            RETURNING stock_quantity
            "#,
        )
        .bind(id.as_uuid())
        .bind(requested)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(remaining) = remaining {
            return Ok(StockChange::Decremented {
                remaining: to_u32("stock_quantity", remaining)?,
            });
        }

        // Nothing matched; classify from the current row.
        Ok(match self.get_product(id).await? {
            None => StockChange::Missing,
            Some(p) if !p.is_active => StockChange::Inactive,
            Some(p) => StockChange::Insufficient {
                available: p.stock_quantity,
            },
        })
    }

    async fn increment_stock(&self, id: ProductId, quantity: u32) -> Result<Option<u32>> {
        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING stock_quantity
            "#,
        )
        .bind(id.as_uuid())
        .bind(i64::from(quantity))
        .fetch_optional(&self.pool)
        .await?;

        remaining.map(|r| to_u32("stock_quantity", r)).transpose()
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, store_id, customer_id, status, payment_status, total_amount,
                                customer_info, delivery_address, delivery_method, notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.store_id.as_uuid())
        .bind(order.customer_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.total_amount.amount())
        .bind(serde_json::to_value(&order.customer_info)?)
        .bind(&order.delivery_address)
        .bind(order.delivery_method.as_str())
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_order_items(&self, order_id: OrderId, items: &[OrderItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, position, quantity, price)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(position as i32)
            .bind(i64::from(item.quantity))
            .bind(item.price.amount())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_order(&self, id: OrderId) -> Result<()> {
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let order = sqlx::query(concat!(
            "SELECT ",
            order_columns!(),
            " FROM orders WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_order)
        .transpose()?;

        match order {
            Some(order) => Ok(Some(self.with_items(order).await?)),
            None => Ok(None),
        }
    }

    async fn list_orders(
        &self,
        store_id: StoreId,
        query: &OrderQuery,
    ) -> Result<(Vec<Order>, u64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders");
        Self::push_filters(&mut count, store_id, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(concat!(
            "SELECT ",
            order_columns!(),
            " FROM orders"
        ));
        Self::push_filters(&mut select, store_id, query);
        select.push(match query.sort_order {
            SortOrder::Asc => " ORDER BY created_at ASC, id ASC",
            SortOrder::Desc => " ORDER BY created_at DESC, id DESC",
        });
        select
            .push(" LIMIT ")
            .push_bind(i64::from(query.limit))
            .push(" OFFSET ")
            .push_bind(i64::try_from(query.offset()).unwrap_or(i64::MAX));

        let mut orders = select
            .build()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Self::row_to_order)
            .collect::<Result<Vec<_>>>()?;

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let mut items = self.items_for(&ids).await?;
        for order in &mut orders {
            order.items = items.remove(&order.id).unwrap_or_default();
        }

        Ok((orders, u64::try_from(total).unwrap_or_default()))
    }

    async fn transition_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        change: OrderChange,
    ) -> Result<CasOutcome<Order, Order>> {
        let updated = sqlx::query(concat!(
            "UPDATE orders SET status = $3, ",
            "payment_status = COALESCE($4, payment_status), ",
            "notes = COALESCE($5, notes), updated_at = NOW() ",
            "WHERE id = $1 AND status = $2 RETURNING ",
            order_columns!()
        ))
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(change.status.as_str())
        .bind(change.payment_status.map(|s| s.as_str()))
        .bind(&change.notes)
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_order)
        .transpose()?;

        if let Some(order) = updated {
            return Ok(CasOutcome::Applied(self.with_items(order).await?));
        }

        match self.get_order(id).await? {
            Some(current) => Ok(CasOutcome::Stale(current)),
            None => Err(StorageError::not_found("order", id)),
        }
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, amount, payment_method, status, transaction_id,
                                  provider_payment_id, provider_data, parent_payment_id, notes,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.amount.amount())
        .bind(payment.payment_method.as_str())
        .bind(payment.status.as_str())
        .bind(&payment.transaction_id)
        .bind(&payment.provider_payment_id)
        .bind(provider_json(payment.provider_data.as_ref())?)
        .bind(payment.parent_payment_id.map(|id| id.as_uuid()))
        .bind(&payment.notes)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &payment.transaction_id))?;

        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        Self::fetch_payment(&self.pool, id).await
    }

    async fn find_payment_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>> {
        sqlx::query(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE transaction_id = $1"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_payment)
        .transpose()
    }

    async fn find_payment_by_provider_id(
        &self,
        method: PaymentMethod,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>> {
        sqlx::query(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE payment_method = $1 AND provider_payment_id = $2 ",
            "AND parent_payment_id IS NULL LIMIT 1"
        ))
        .bind(method.as_str())
        .bind(provider_payment_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_payment)
        .transpose()
    }

    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE order_id = $1 ORDER BY created_at ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }

    async fn attach_provider(
        &self,
        id: PaymentId,
        provider_payment_id: Option<String>,
        provider_data: ProviderData,
    ) -> Result<Payment> {
        sqlx::query(concat!(
            "UPDATE payments SET provider_payment_id = COALESCE($2, provider_payment_id), ",
            "provider_data = $3, updated_at = NOW() WHERE id = $1 RETURNING ",
            payment_columns!()
        ))
        .bind(id.as_uuid())
        .bind(provider_payment_id)
        .bind(serde_json::to_value(&provider_data)?)
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_payment)
        .transpose()?
        .ok_or_else(|| StorageError::not_found("payment", id))
    }

    async fn transition_payment(
        &self,
        transition: PaymentTransition,
    ) -> Result<CasOutcome<Settlement, Payment>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(concat!(
            "UPDATE payments SET status = $3, ",
            "provider_payment_id = COALESCE($4, provider_payment_id), ",
            "provider_data = COALESCE($5, provider_data), ",
            "notes = COALESCE($6, notes), updated_at = NOW() ",
            "WHERE id = $1 AND status = $2 RETURNING ",
            payment_columns!()
        ))
        .bind(transition.payment_id.as_uuid())
        .bind(transition.expected.as_str())
        .bind(transition.next.as_str())
        .bind(&transition.provider_payment_id)
        .bind(provider_json(transition.provider_data.as_ref())?)
        .bind(&transition.notes)
        .fetch_optional(&mut *tx)
        .await?
        .map(Self::row_to_payment)
        .transpose()?;

        let Some(payment) = updated else {
            let current = Self::fetch_payment(&mut *tx, transition.payment_id).await?;
            tx.rollback().await?;
            return match current {
                Some(current) => Ok(CasOutcome::Stale(current)),
                None => Err(StorageError::not_found("payment", transition.payment_id)),
            };
        };

        let order = match transition.order {
            Some(update) => {
                let order = sqlx::query(concat!(
                    "UPDATE orders SET payment_status = $2, ",
                    "status = CASE WHEN $3::TEXT IS NOT NULL AND status = 'pending' ",
                    "THEN $3::TEXT ELSE status END, updated_at = NOW() ",
                    "WHERE id = $1 RETURNING ",
                    order_columns!()
                ))
                .bind(payment.order_id.as_uuid())
                .bind(update.payment_status.as_str())
                .bind(update.promote_pending_to.map(|s| s.as_str()))
                .fetch_optional(&mut *tx)
                .await?
                .map(Self::row_to_order)
                .transpose()?
                .ok_or_else(|| StorageError::not_found("order", payment.order_id))?;
                Some(order)
            }
            None => None,
        };

        tx.commit().await?;

        let order = match order {
            Some(order) => Some(self.with_items(order).await?),
            None => None,
        };
        Ok(CasOutcome::Applied(Settlement { payment, order }))
    }

    async fn record_refund(
        &self,
        refund: &Payment,
        parent_next: PaymentStatus,
    ) -> Result<CasOutcome<RefundRecord, Payment>> {
        let parent_id = refund
            .parent_payment_id
            .ok_or_else(|| StorageError::not_found("parent payment", refund.id))?;

        let mut tx = self.pool.begin().await?;

        let parent = sqlx::query(concat!(
            "UPDATE payments SET status = $2, updated_at = NOW() ",
            "WHERE id = $1 AND status = $3 RETURNING ",
            payment_columns!()
        ))
        .bind(parent_id.as_uuid())
        .bind(parent_next.as_str())
        .bind(PaymentStatus::Paid.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .map(Self::row_to_payment)
        .transpose()?;

        let Some(parent) = parent else {
            let current = Self::fetch_payment(&mut *tx, parent_id).await?;
            tx.rollback().await?;
            return match current {
                Some(current) => Ok(CasOutcome::Stale(current)),
                None => Err(StorageError::not_found("payment", parent_id)),
            };
        };

        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, amount, payment_method, status, transaction_id,
                                  provider_payment_id, provider_data, parent_payment_id, notes,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(refund.id.as_uuid())
        .bind(refund.order_id.as_uuid())
        .bind(refund.amount.amount())
        .bind(refund.payment_method.as_str())
        .bind(refund.status.as_str())
        .bind(&refund.transaction_id)
        .bind(&refund.provider_payment_id)
        .bind(provider_json(refund.provider_data.as_ref())?)
        .bind(parent_id.as_uuid())
        .bind(&refund.notes)
        .bind(refund.created_at)
        .bind(refund.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, &refund.transaction_id))?;

        let order = sqlx::query(concat!(
            "UPDATE orders SET payment_status = $2, updated_at = NOW() ",
            "WHERE id = $1 RETURNING ",
            order_columns!()
        ))
        .bind(parent.order_id.as_uuid())
        .bind(parent_next.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .map(Self::row_to_order)
        .transpose()?
        .ok_or_else(|| StorageError::not_found("order", parent.order_id))?;

        tx.commit().await?;

        Ok(CasOutcome::Applied(RefundRecord {
            parent,
            refund: refund.clone(),
            order: self.with_items(order).await?,
        }))
    }
}
