use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, Selectable, SelectableHelper,
    prelude::{AsChangeset, Identifiable, Insertable, Queryable},
};
use diesel_async::{
    AsyncConnection, AsyncPgConnection, RunQueryDsl, pooled_connection::bb8::PooledConnection,
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    db::DbPool,
    models::{
        Order, OrderAggregate, OrderFilter, OrderItem, Payment, PaymentSettlement, SettleOutcome,
    },
    outbox::OutboxMessage,
    repository::{OrderAmendment, OrderRepository, RepositoryError},
    schema::{order_items, orders, outbox, payments},
    status::PaymentStatus,
};

#[derive(Queryable, Selectable, Identifiable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
struct OrderEntity {
    id: Uuid,
    order_number: String,
    email: String,
    phone: Option<String>,
    other_contact: Option<String>,
    shipping_address: Value,
    notes: Option<String>,
    status: String,
    payment_status: String,
    currency: String,
    total_amount: i64,
    shipping_cost: i64,
    tax_amount: i64,
    discount_amount: i64,
    tracking_number: Option<String>,
    estimated_delivery_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct OrderItemEntity {
    id: Uuid,
    order_id: Uuid,
    product_id: String,
    product_name: String,
    quantity: i32,
    price_each: i64,
    discount_per_item: i64,
    subtotal: i64,
    is_refunded: bool,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct PaymentEntity {
    id: Uuid,
    order_id: Uuid,
    method: String,
    amount: i64,
    payment_status: String,
    transaction_ref: Option<String>,
    receipt_url: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::outbox)]
struct CreateOutboxEntity {
    event_type: String,
    payload: String,
    status: String,
}

impl TryFrom<&Order> for OrderEntity {
    type Error = RepositoryError;

    fn try_from(order: &Order) -> Result<Self, Self::Error> {
        let shipping_address = serde_json::to_value(&order.shipping_address)
            .map_err(|err| RepositoryError::Corrupt(err.to_string()))?;
        Ok(Self {
            id: order.id,
            order_number: order.order_number.clone(),
            email: order.email.clone(),
            phone: order.phone.clone(),
            other_contact: order.other_contact.clone(),
            shipping_address,
            notes: order.notes.clone(),
            status: order.status.as_str().to_string(),
            payment_status: order.payment_status.as_str().to_string(),
            currency: order.currency.clone(),
            total_amount: order.total_amount,
            shipping_cost: order.shipping_cost,
            tax_amount: order.tax_amount,
            discount_amount: order.discount_amount,
            tracking_number: order.tracking_number.clone(),
            estimated_delivery_at: order.estimated_delivery_at,
            shipped_at: order.shipped_at,
            delivered_at: order.delivered_at,
            version: order.version,
            created_at: order.created_at,
            updated_at: order.updated_at,
        })
    }
}

impl TryFrom<OrderEntity> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderEntity) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt =
            |err: &dyn std::fmt::Display| RepositoryError::Corrupt(format!("order {id}: {err}"));
        Ok(Self {
            id,
            shipping_address: serde_json::from_value(row.shipping_address)
                .map_err(|err| corrupt(&err))?,
            status: row.status.parse().map_err(|err| corrupt(&err))?,
            payment_status: row.payment_status.parse().map_err(|err| corrupt(&err))?,
            order_number: row.order_number,
            email: row.email,
            phone: row.phone,
            other_contact: row.other_contact,
            notes: row.notes,
            currency: row.currency,
            total_amount: row.total_amount,
            shipping_cost: row.shipping_cost,
            tax_amount: row.tax_amount,
            discount_amount: row.discount_amount,
            tracking_number: row.tracking_number,
            estimated_delivery_at: row.estimated_delivery_at,
            shipped_at: row.shipped_at,
            delivered_at: row.delivered_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&OrderItem> for OrderItemEntity {
    fn from(item: &OrderItem) -> Self {
        Self {
            id: item.id,
            order_id: item.order_id,
            product_id: item.product_id.clone(),
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            price_each: item.price_each,
            discount_per_item: item.discount_per_item,
            subtotal: item.subtotal,
            is_refunded: item.is_refunded,
        }
    }
}

impl From<OrderItemEntity> for OrderItem {
    fn from(row: OrderItemEntity) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            product_name: row.product_name,
            quantity: row.quantity,
            price_each: row.price_each,
            discount_per_item: row.discount_per_item,
            subtotal: row.subtotal,
            is_refunded: row.is_refunded,
        }
    }
}

impl From<&Payment> for PaymentEntity {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            order_id: payment.order_id,
            method: payment.method.clone(),
            amount: payment.amount,
            payment_status: payment.payment_status.as_str().to_string(),
            transaction_ref: payment.transaction_ref.clone(),
            receipt_url: payment.receipt_url.clone(),
            created_at: payment.created_at,
            completed_at: payment.completed_at,
        }
    }
}

impl TryFrom<PaymentEntity> for Payment {
    type Error = RepositoryError;

    fn try_from(row: PaymentEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            payment_status: row.payment_status.parse().map_err(|err| {
                RepositoryError::Corrupt(format!("payment {}: {}", row.id, err))
            })?,
            id: row.id,
            order_id: row.order_id,
            method: row.method,
            amount: row.amount,
            transaction_ref: row.transaction_ref,
            receipt_url: row.receipt_url,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

fn outbox_rows(messages: Vec<OutboxMessage>) -> Vec<CreateOutboxEntity> {
    messages
        .into_iter()
        .map(|message| CreateOutboxEntity {
            event_type: message.event_type,
            payload: message.payload,
            status: "PENDING".into(),
        })
        .collect()
}

async fn publish(
    conn: &mut AsyncPgConnection,
    rows: &[CreateOutboxEntity],
) -> Result<(), RepositoryError> {
    if rows.is_empty() {
        return Ok(());
    }
    diesel::insert_into(outbox::table)
        .values(rows)
        .execute(conn)
        .await?;
    Ok(())
}

/// Order storage on Postgres.
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: DbPool,
}

impl PgOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, RepositoryError> {
        self.pool
            .get()
            .await
            .map_err(|err| RepositoryError::Pool(err.to_string()))
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(
        &self,
        aggregate: &OrderAggregate,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), RepositoryError> {
        let conn = &mut self.conn().await?;
        let order = OrderEntity::try_from(&aggregate.order)?;
        let items: Vec<OrderItemEntity> = aggregate.items.iter().map(Into::into).collect();
        let payment = PaymentEntity::from(&aggregate.payment);
        let outbox = outbox_rows(outbox);

        conn.transaction(move |conn| {
            Box::pin(async move {
                diesel::insert_into(orders::table)
                    .values(&order)
                    .execute(conn)
                    .await?;

                diesel::insert_into(order_items::table)
                    .values(&items)
                    .execute(conn)
                    .await?;

                diesel::insert_into(payments::table)
                    .values(&payment)
                    .execute(conn)
                    .await?;

                publish(conn, &outbox).await?;

                Ok::<(), RepositoryError>(())
            })
        })
        .await
    }

    async fn find(&self, order_id: Uuid) -> Result<Option<OrderAggregate>, RepositoryError> {
        let conn = &mut self.conn().await?;

        // Order, items and payment come from one snapshot.
        let rows = conn
            .build_transaction()
            .read_only()
            .repeatable_read()
            .run(move |conn| {
                Box::pin(async move {
                    let Some(order) = orders::table
                        .find(order_id)
                        .select(OrderEntity::as_select())
                        .first(conn)
                        .await
                        .optional()?
                    else {
                        return Ok::<_, RepositoryError>(None);
                    };

                    let items: Vec<OrderItemEntity> = order_items::table
                        .filter(order_items::order_id.eq(order_id))
                        .select(OrderItemEntity::as_select())
                        .load(conn)
                        .await?;

                    let payment: Option<PaymentEntity> = payments::table
                        .filter(payments::order_id.eq(order_id))
                        .select(PaymentEntity::as_select())
                        .first(conn)
                        .await
                        .optional()?;

                    Ok(Some((order, items, payment)))
                })
            })
            .await?;

        let Some((order, items, payment)) = rows else {
            return Ok(None);
        };
        let payment = payment.ok_or_else(|| {
            RepositoryError::Corrupt(format!("order {order_id} has no payment row"))
        })?;

        Ok(Some(OrderAggregate {
            order: order.try_into()?,
            items: items.into_iter().map(Into::into).collect(),
            payment: payment.try_into()?,
        }))
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let conn = &mut self.conn().await?;

        let mut query = orders::table.select(OrderEntity::as_select()).into_boxed();
        if let Some(status) = filter.status {
            query = query.filter(orders::status.eq(status.as_str()));
        }
        if let Some(payment_status) = filter.payment_status {
            query = query.filter(orders::payment_status.eq(payment_status.as_str()));
        }

        let rows: Vec<OrderEntity> = query
            .order_by(orders::created_at.desc())
            .load(conn)
            .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    async fn update_order(
        &self,
        order: &Order,
        expected_version: i32,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), RepositoryError> {
        let conn = &mut self.conn().await?;
        let order_id = order.id;
        let row = OrderEntity::try_from(order)?;
        let outbox = outbox_rows(outbox);

        conn.transaction(move |conn| {
            Box::pin(async move {
                let updated = diesel::update(
                    orders::table
                        .find(order_id)
                        .filter(orders::version.eq(expected_version)),
                )
                .set(&row)
                .execute(conn)
                .await?;

                if updated == 0 {
                    return Err(RepositoryError::Conflict {
                        order_id,
                        expected: expected_version,
                    });
                }

                publish(conn, &outbox).await?;

                Ok(())
            })
        })
        .await
    }

    async fn amend(
        &self,
        amendment: &OrderAmendment,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), RepositoryError> {
        let conn = &mut self.conn().await?;
        let order_id = amendment.order.id;
        let expected_version = amendment.expected_version;
        let row = OrderEntity::try_from(&amendment.order)?;
        let items: Vec<OrderItemEntity> = amendment.items.iter().map(Into::into).collect();
        let payment_amount = amendment.payment_amount;
        let payment_method = amendment.payment_method.clone();
        let outbox = outbox_rows(outbox);

        conn.transaction(move |conn| {
            Box::pin(async move {
                let updated = diesel::update(
                    orders::table
                        .find(order_id)
                        .filter(orders::version.eq(expected_version)),
                )
                .set(&row)
                .execute(conn)
                .await?;

                if updated == 0 {
                    return Err(RepositoryError::Conflict {
                        order_id,
                        expected: expected_version,
                    });
                }

                diesel::delete(order_items::table.filter(order_items::order_id.eq(order_id)))
                    .execute(conn)
                    .await?;

                diesel::insert_into(order_items::table)
                    .values(&items)
                    .execute(conn)
                    .await?;

                diesel::update(
                    payments::table
                        .filter(payments::order_id.eq(order_id))
                        .filter(payments::transaction_ref.is_null()),
                )
                .set((
                    payments::amount.eq(payment_amount),
                    payments::method.eq(payment_method),
                ))
                .execute(conn)
                .await?;

                publish(conn, &outbox).await?;

                Ok(())
            })
        })
        .await
    }

    async fn settle_payment(
        &self,
        settlement: &PaymentSettlement,
        outbox: Vec<OutboxMessage>,
    ) -> Result<SettleOutcome, RepositoryError> {
        let conn = &mut self.conn().await?;
        let order_id = settlement.order.id;
        let expected_version = settlement.expected_version;
        let row = OrderEntity::try_from(&settlement.order)?;
        let settlement = settlement.clone();
        let outbox = outbox_rows(outbox);

        conn.transaction(move |conn| {
            Box::pin(async move {
                // Row lock on the payment serializes concurrent verifiers; the loser re-checks
                // the predicate after the winner commits and claims nothing.
                let claimed: Option<PaymentEntity> = diesel::update(
                    payments::table
                        .filter(payments::order_id.eq(order_id))
                        .filter(payments::transaction_ref.is_null()),
                )
                .set((
                    payments::payment_status.eq(PaymentStatus::Paid.as_str()),
                    payments::transaction_ref.eq(Some(settlement.transaction_ref.clone())),
                    payments::method.eq(settlement.method.clone()),
                    payments::amount.eq(settlement.amount),
                    payments::receipt_url.eq(settlement.receipt_url.clone()),
                    payments::completed_at.eq(Some(settlement.completed_at)),
                ))
                .returning(PaymentEntity::as_returning())
                .get_result(conn)
                .await
                .optional()?;

                let Some(claimed) = claimed else {
                    let existing: PaymentEntity = payments::table
                        .filter(payments::order_id.eq(order_id))
                        .select(PaymentEntity::as_select())
                        .first(conn)
                        .await
                        .optional()?
                        .ok_or(RepositoryError::NotFound(order_id))?;
                    return Ok(SettleOutcome::AlreadySettled(existing.try_into()?));
                };

                let updated = diesel::update(
                    orders::table
                        .find(order_id)
                        .filter(orders::version.eq(expected_version)),
                )
                .set(&row)
                .execute(conn)
                .await?;

                if updated == 0 {
                    return Err(RepositoryError::Conflict {
                        order_id,
                        expected: expected_version,
                    });
                }

                publish(conn, &outbox).await?;

                Ok(SettleOutcome::Applied(claimed.try_into()?))
            })
        })
        .await
    }
}
