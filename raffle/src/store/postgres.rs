//! PostgreSQL-backed data store.
//!
//! Each [`DataStore`] method issues one statement, except
//! [`DataStore::reserve_tickets`], which wraps its update in a transaction so
//! a short pool or a lost race rolls the whole reservation back.

use super::{DataStore, OrderFilter, OrderPatch, ReservationRequest, Selection, StoreError, StoreResult};
use crate::config::PostgresConfig;
use crate::types::{
    AuditEntry, Client, ClientId, Money, Order, OrderId, OrderStatus, Payment, PaymentId,
    PaymentMethod, PaymentProvider, PaymentStatus, Raffle, RaffleId, RaffleProgress, SoldOrder,
    TicketNumber, TicketStatus,
};
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, raffle_id, client_id, numbers, total_cents, payment_method, \
     status, rejection_reason, transfer_proof_path, created_at";

const PAYMENT_COLUMNS: &str =
    "id, order_id, provider, provider_reference, amount_cents, status, proof_url, created_at";

/// PostgreSQL implementation of [`DataStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the database is unreachable.
    pub async fn connect(config: &PostgresConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(backend)?;
        Ok(Self { pool })
    }

    /// Apply the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if a migration fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

fn decode<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Decode(err.to_string())
}

fn cents(value: i64) -> StoreResult<Money> {
    u64::try_from(value)
        .map(Money::from_cents)
        .map_err(|_| StoreError::Decode(format!("negative amount {value}")))
}

fn to_db_cents(money: Money) -> StoreResult<i64> {
    i64::try_from(money.cents()).map_err(decode)
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn number_strings(numbers: &[TicketNumber]) -> Vec<String> {
    numbers.iter().map(|n| n.as_str().to_string()).collect()
}

fn parse_numbers(raw: Vec<String>) -> StoreResult<Vec<TicketNumber>> {
    raw.iter()
        .map(|n| TicketNumber::parse(n).map_err(decode))
        .collect()
}

fn order_from_row(row: &PgRow) -> StoreResult<Order> {
    let method: String = row.try_get("payment_method").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id").map_err(decode)?),
        raffle_id: RaffleId::from_uuid(row.try_get("raffle_id").map_err(decode)?),
        client_id: ClientId::from_uuid(row.try_get("client_id").map_err(decode)?),
        numbers: parse_numbers(row.try_get("numbers").map_err(decode)?)?,
        total: cents(row.try_get("total_cents").map_err(decode)?)?,
        payment_method: method.parse().map_err(decode)?,
        status: status.parse().map_err(decode)?,
        rejection_reason: row.try_get("rejection_reason").map_err(decode)?,
        transfer_proof_path: row.try_get("transfer_proof_path").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn payment_from_row(row: &PgRow) -> StoreResult<Payment> {
    let provider: Option<String> = row.try_get("provider").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get("id").map_err(decode)?),
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(decode)?),
        provider: PaymentProvider::from_db(provider.as_deref()),
        provider_reference: row.try_get("provider_reference").map_err(decode)?,
        amount: cents(row.try_get("amount_cents").map_err(decode)?)?,
        status: PaymentStatus::from_db(&status),
        proof_url: row.try_get("proof_url").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn sold_from_row(row: &PgRow) -> StoreResult<SoldOrder> {
    Ok(SoldOrder {
        order_id: OrderId::from_uuid(row.try_get("id").map_err(decode)?),
        raffle_id: RaffleId::from_uuid(row.try_get("raffle_id").map_err(decode)?),
        number_count: count(row.try_get("number_count").map_err(decode)?),
    })
}

fn raffle_uuids(raffle_ids: &[RaffleId]) -> Vec<Uuid> {
    raffle_ids.iter().map(|id| *id.as_uuid()).collect()
}

#[async_trait]
impl DataStore for PgStore {
    async fn find_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<Vec<Order>> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {ORDER_COLUMNS} FROM orders WHERE TRUE"));
        if let Some(method) = filter.payment_method {
            qb.push(" AND payment_method = ").push_bind(method.as_str());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(filter.limit));

        let rows = qb.build().fetch_all(&self.pool).await.map_err(backend)?;
        rows.iter().map(order_from_row).collect()
    }

    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO orders (id, raffle_id, client_id, numbers, total_cents, payment_method,
                                 status, rejection_reason, transfer_proof_path, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(order.id.as_uuid())
        .bind(order.raffle_id.as_uuid())
        .bind(order.client_id.as_uuid())
        .bind(number_strings(&order.numbers))
        .bind(to_db_cents(order.total)?)
        .bind(order.payment_method.as_str())
        .bind(order.status.as_str())
        .bind(order.rejection_reason.as_deref())
        .bind(order.transfer_proof_path.as_deref())
        .bind(order.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn update_order(&self, id: OrderId, patch: &OrderPatch) -> StoreResult<u64> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("UPDATE orders SET ");
        let mut columns = qb.separated(", ");
        let mut touched = false;
        if let Some(status) = patch.status {
            columns.push("status = ").push_bind_unseparated(status.as_str());
            touched = true;
        }
        if let Some(method) = patch.payment_method {
            columns.push("payment_method = ").push_bind_unseparated(method.as_str());
            touched = true;
        }
        if let Some(reason) = &patch.rejection_reason {
            columns.push("rejection_reason = ").push_bind_unseparated(reason.clone());
            touched = true;
        }
        if let Some(path) = &patch.transfer_proof_path {
            columns.push("transfer_proof_path = ").push_bind_unseparated(path.clone());
            touched = true;
        }
        if !touched {
            return Ok(0);
        }

        qb.push(" WHERE id = ").push_bind(*id.as_uuid());
        if !patch.only_from.is_empty() {
            let statuses: Vec<String> = patch.only_from.iter().map(|s| s.as_str().to_string()).collect();
            qb.push(" AND status = ANY(").push_bind(statuses).push(")");
        }

        let result = qb.build().execute(&self.pool).await.map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn find_client(&self, id: ClientId) -> StoreResult<Option<Client>> {
        let row = sqlx::query("SELECT id, name, email, phone FROM clients WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|row| {
            Ok(Client {
                id: ClientId::from_uuid(row.try_get("id").map_err(decode)?),
                name: row.try_get("name").map_err(decode)?,
                email: row.try_get("email").map_err(decode)?,
                phone: row.try_get("phone").map_err(decode)?,
            })
        })
        .transpose()
    }

    async fn find_raffle(&self, id: RaffleId) -> StoreResult<Option<Raffle>> {
        let row = sqlx::query("SELECT id, title, ticket_price_cents, active FROM raffles WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|row| {
            Ok(Raffle {
                id: RaffleId::from_uuid(row.try_get("id").map_err(decode)?),
                title: row.try_get("title").map_err(decode)?,
                ticket_price: cents(row.try_get("ticket_price_cents").map_err(decode)?)?,
                active: row.try_get("active").map_err(decode)?,
            })
        })
        .transpose()
    }

    async fn reserve_tickets(&self, request: &ReservationRequest) -> StoreResult<Vec<TicketNumber>> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let reserved: Vec<String> = match &request.selection {
            Selection::Numbers(numbers) => sqlx::query_scalar(
                "UPDATE tickets
                 SET status = 'reserved', client_id = $3, reserved_until = $4
                 WHERE raffle_id = $1 AND number = ANY($2) AND status = 'available'
                 RETURNING number",
            )
            .bind(request.raffle_id.as_uuid())
            .bind(number_strings(numbers))
            .bind(request.client_id.as_uuid())
            .bind(request.reserved_until)
            .fetch_all(&mut *tx)
            .await
            .map_err(backend)?,
            Selection::Count(count) => sqlx::query_scalar(
                "WITH picked AS (
                     SELECT number FROM tickets
                     WHERE raffle_id = $1 AND status = 'available'
                     ORDER BY random()
                     LIMIT $2
                     FOR UPDATE SKIP LOCKED
                 )
                 UPDATE tickets t
                 SET status = 'reserved', client_id = $3, reserved_until = $4
                 FROM picked
                 WHERE t.raffle_id = $1 AND t.number = picked.number
                 RETURNING t.number",
            )
            .bind(request.raffle_id.as_uuid())
            .bind(i64::from(*count))
            .bind(request.client_id.as_uuid())
            .bind(request.reserved_until)
            .fetch_all(&mut *tx)
            .await
            .map_err(backend)?,
        };

        if reserved.len() != request.selection.len() {
            tx.rollback().await.map_err(backend)?;
            return Err(StoreError::Conflict(format!(
                "reserved {} of {} requested tickets",
                reserved.len(),
                request.selection.len()
            )));
        }

        tx.commit().await.map_err(backend)?;

        let mut numbers = parse_numbers(reserved)?;
        numbers.sort();
        Ok(numbers)
    }

    async fn release_reservation(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE tickets
             SET status = 'available', client_id = NULL, reserved_until = NULL
             WHERE raffle_id = $1 AND client_id = $2 AND number = ANY($3) AND status = 'reserved'",
        )
        .bind(raffle_id.as_uuid())
        .bind(client_id.as_uuid())
        .bind(number_strings(numbers))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn count_owned_tickets(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
        status: Option<TicketStatus>,
    ) -> StoreResult<u64> {
        let owned: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tickets
             WHERE raffle_id = $1 AND client_id = $2 AND number = ANY($3)
               AND ($4::TEXT IS NULL OR status = $4)",
        )
        .bind(raffle_id.as_uuid())
        .bind(client_id.as_uuid())
        .bind(number_strings(numbers))
        .bind(status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(count(owned))
    }

    async fn mark_tickets_paid(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE tickets
             SET status = 'paid', reserved_until = NULL
             WHERE raffle_id = $1 AND client_id = $2 AND number = ANY($3)",
        )
        .bind(raffle_id.as_uuid())
        .bind(client_id.as_uuid())
        .bind(number_strings(numbers))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn release_tickets(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE tickets
             SET status = 'available', client_id = NULL, reserved_until = NULL
             WHERE raffle_id = $1 AND client_id = $2 AND number = ANY($3)",
        )
        .bind(raffle_id.as_uuid())
        .bind(client_id.as_uuid())
        .bind(number_strings(numbers))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO payments (id, order_id, provider, provider_reference, amount_cents,
                                   status, proof_url, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.provider.as_db())
        .bind(payment.provider_reference.as_deref())
        .bind(to_db_cents(payment.amount)?)
        .bind(payment.status.as_str())
        .bind(payment.proof_url.as_deref())
        .bind(payment.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn payments_for_order(&self, order_id: OrderId) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 ORDER BY created_at"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO audit_logs (admin_id, action, resource_type, resource_id, details, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.admin_id.as_uuid())
        .bind(entry.action.as_str())
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn is_admin(&self, user_id: Uuid) -> StoreResult<bool> {
        let flag: Option<bool> = sqlx::query_scalar("SELECT is_admin FROM profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(flag.unwrap_or(false))
    }

    async fn raffle_progress(&self) -> StoreResult<Vec<RaffleProgress>> {
        let rows = sqlx::query("SELECT raffle_id, sold, total FROM raffle_progress")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter()
            .map(|row| {
                Ok(RaffleProgress {
                    raffle_id: RaffleId::from_uuid(row.try_get("raffle_id").map_err(decode)?),
                    sold: count(row.try_get("sold").map_err(decode)?),
                    total: count(row.try_get("total").map_err(decode)?),
                })
            })
            .collect()
    }

    async fn count_tickets(&self, status: TicketStatus) -> StoreResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(count(total))
    }

    async fn approved_payment_amounts(&self) -> StoreResult<Vec<(PaymentProvider, Money)>> {
        let rows = sqlx::query("SELECT provider, amount_cents FROM payments WHERE status = 'approved'")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter()
            .map(|row| {
                let provider: Option<String> = row.try_get("provider").map_err(decode)?;
                Ok((
                    PaymentProvider::from_db(provider.as_deref()),
                    cents(row.try_get("amount_cents").map_err(decode)?)?,
                ))
            })
            .collect()
    }

    async fn count_orders(&self, method: PaymentMethod, status: OrderStatus) -> StoreResult<u64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE payment_method = $1 AND status = $2",
        )
        .bind(method.as_str())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(count(total))
    }

    async fn sold_orders_joined(&self, raffle_ids: &[RaffleId]) -> StoreResult<Vec<SoldOrder>> {
        let rows = sqlx::query(
            "SELECT o.id, o.raffle_id, cardinality(o.numbers)::BIGINT AS number_count
             FROM orders o
             JOIN payments p ON p.order_id = o.id
             WHERE o.status = 'completed' AND p.status = 'approved' AND o.raffle_id = ANY($1)",
        )
        .bind(raffle_uuids(raffle_ids))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(sold_from_row).collect()
    }

    async fn completed_orders(&self, raffle_ids: &[RaffleId]) -> StoreResult<Vec<SoldOrder>> {
        let rows = sqlx::query(
            "SELECT id, raffle_id, cardinality(numbers)::BIGINT AS number_count
             FROM orders
             WHERE status = 'completed' AND raffle_id = ANY($1)",
        )
        .bind(raffle_uuids(raffle_ids))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(sold_from_row).collect()
    }

    async fn approved_payment_order_ids(&self, order_ids: &[OrderId]) -> StoreResult<HashSet<OrderId>> {
        let ids: Vec<Uuid> = order_ids.iter().map(|id| *id.as_uuid()).collect();
        let rows: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT order_id FROM payments WHERE status = 'approved' AND order_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(OrderId::from_uuid).collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}
