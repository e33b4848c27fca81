//! Fault injection for the data store.
//!
//! [`FailingStore`] forwards to a [`MemoryStore`] until a fail point is
//! armed; the armed call then errors or reports zero affected rows without
//! touching the inner store. [`FailingStore::interleave`] instead lets
//! another writer run right before a call, to replay races between
//! transitions.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use raffle::store::{
    DataStore, MemoryStore, OrderFilter, OrderPatch, ReservationRequest, StoreError, StoreResult,
};
use raffle::types::{
    AuditEntry, Client, ClientId, Money, Order, OrderId, OrderStatus, Payment, PaymentMethod,
    PaymentProvider, Raffle, RaffleId, RaffleProgress, SoldOrder, TicketNumber, TicketStatus,
};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Store call that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `find_order`
    FindOrder,
    /// `insert_order`
    InsertOrder,
    /// `update_order`
    UpdateOrder,
    /// `reserve_tickets`
    ReserveTickets,
    /// `release_reservation`
    ReleaseReservation,
    /// `mark_tickets_paid`
    MarkTicketsPaid,
    /// `release_tickets`
    ReleaseTickets,
    /// `insert_payment`
    InsertPayment,
    /// `append_audit`
    AppendAudit,
    /// `sold_orders_joined`
    SoldOrdersJoined,
    /// `ping`
    Ping,
}

/// How an armed call fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailMode {
    /// Backend error
    Error,
    /// Success with zero affected rows, as when another writer got there
    /// first. Calls without a row count fail with an error instead.
    ZeroRows,
    /// The same call another writer would see after a concurrent insert:
    /// a uniqueness conflict.
    Conflict,
}

type Interleaved = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// [`DataStore`] wrapper with armed fail points.
pub struct FailingStore {
    inner: Arc<MemoryStore>,
    armed: Mutex<HashMap<FailPoint, FailMode>>,
    interleaved: Mutex<HashMap<FailPoint, Interleaved>>,
}

impl FailingStore {
    /// Forward everything to `inner`.
    #[must_use]
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            armed: Mutex::new(HashMap::new()),
            interleaved: Mutex::new(HashMap::new()),
        }
    }

    /// Run `write` once, right before the next call at `point` reaches the
    /// inner store. Calls made by `write` itself are not intercepted.
    pub fn interleave<F, Fut>(&self, point: FailPoint, write: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.interleaved
            .lock()
            .unwrap()
            .insert(point, Box::new(move || write().boxed()));
    }

    async fn run_interleaved(&self, point: FailPoint) {
        let write = self.interleaved.lock().unwrap().remove(&point);
        if let Some(write) = write {
            write().await;
        }
    }

    /// Arm a fail point.
    pub fn fail(&self, point: FailPoint, mode: FailMode) {
        self.armed.lock().unwrap().insert(point, mode);
    }

    /// Disarm a fail point.
    pub fn heal(&self, point: FailPoint) {
        self.armed.lock().unwrap().remove(&point);
    }

    /// Disarm every fail point.
    pub fn heal_all(&self) {
        self.armed.lock().unwrap().clear();
    }

    fn armed(&self, point: FailPoint) -> Option<FailMode> {
        self.armed.lock().unwrap().get(&point).copied()
    }

    fn check(&self, point: FailPoint) -> StoreResult<()> {
        match self.armed(point) {
            None => Ok(()),
            Some(FailMode::Conflict) => Err(StoreError::Conflict(format!("injected conflict at {point:?}"))),
            Some(FailMode::Error | FailMode::ZeroRows) => {
                Err(StoreError::Backend(format!("injected failure at {point:?}")))
            }
        }
    }

    /// `Some(0)` when armed with `ZeroRows`, an error for other modes.
    fn rows(&self, point: FailPoint) -> StoreResult<Option<u64>> {
        match self.armed(point) {
            Some(FailMode::ZeroRows) => Ok(Some(0)),
            _ => self.check(point).map(|()| None),
        }
    }
}

#[async_trait]
impl DataStore for FailingStore {
    async fn find_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        self.check(FailPoint::FindOrder)?;
        self.inner.find_order(id).await
    }

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<Vec<Order>> {
        self.inner.list_orders(filter).await
    }

    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        self.check(FailPoint::InsertOrder)?;
        self.inner.insert_order(order).await
    }

    async fn update_order(&self, id: OrderId, patch: &OrderPatch) -> StoreResult<u64> {
        self.run_interleaved(FailPoint::UpdateOrder).await;
        match self.rows(FailPoint::UpdateOrder)? {
            Some(rows) => Ok(rows),
            None => self.inner.update_order(id, patch).await,
        }
    }

    async fn find_client(&self, id: ClientId) -> StoreResult<Option<Client>> {
        self.inner.find_client(id).await
    }

    async fn find_raffle(&self, id: RaffleId) -> StoreResult<Option<Raffle>> {
        self.inner.find_raffle(id).await
    }

    async fn reserve_tickets(&self, request: &ReservationRequest) -> StoreResult<Vec<TicketNumber>> {
        self.check(FailPoint::ReserveTickets)?;
        self.inner.reserve_tickets(request).await
    }

    async fn release_reservation(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
    ) -> StoreResult<u64> {
        match self.rows(FailPoint::ReleaseReservation)? {
            Some(rows) => Ok(rows),
            None => self.inner.release_reservation(raffle_id, client_id, numbers).await,
        }
    }

    async fn count_owned_tickets(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
        status: Option<TicketStatus>,
    ) -> StoreResult<u64> {
        self.inner
            .count_owned_tickets(raffle_id, client_id, numbers, status)
            .await
    }

    async fn mark_tickets_paid(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
    ) -> StoreResult<u64> {
        self.run_interleaved(FailPoint::MarkTicketsPaid).await;
        match self.rows(FailPoint::MarkTicketsPaid)? {
            Some(rows) => Ok(rows),
            None => self.inner.mark_tickets_paid(raffle_id, client_id, numbers).await,
        }
    }

    async fn release_tickets(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
    ) -> StoreResult<u64> {
        self.run_interleaved(FailPoint::ReleaseTickets).await;
        match self.rows(FailPoint::ReleaseTickets)? {
            Some(rows) => Ok(rows),
            None => self.inner.release_tickets(raffle_id, client_id, numbers).await,
        }
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.run_interleaved(FailPoint::InsertPayment).await;
        self.check(FailPoint::InsertPayment)?;
        self.inner.insert_payment(payment).await
    }

    async fn payments_for_order(&self, order_id: OrderId) -> StoreResult<Vec<Payment>> {
        self.inner.payments_for_order(order_id).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.check(FailPoint::AppendAudit)?;
        self.inner.append_audit(entry).await
    }

    async fn is_admin(&self, user_id: Uuid) -> StoreResult<bool> {
        self.inner.is_admin(user_id).await
    }

    async fn raffle_progress(&self) -> StoreResult<Vec<RaffleProgress>> {
        self.inner.raffle_progress().await
    }

    async fn count_tickets(&self, status: TicketStatus) -> StoreResult<u64> {
        self.inner.count_tickets(status).await
    }

    async fn approved_payment_amounts(&self) -> StoreResult<Vec<(PaymentProvider, Money)>> {
        self.inner.approved_payment_amounts().await
    }

    async fn count_orders(&self, method: PaymentMethod, status: OrderStatus) -> StoreResult<u64> {
        self.inner.count_orders(method, status).await
    }

    async fn sold_orders_joined(&self, raffle_ids: &[RaffleId]) -> StoreResult<Vec<SoldOrder>> {
        self.check(FailPoint::SoldOrdersJoined)?;
        self.inner.sold_orders_joined(raffle_ids).await
    }

    async fn completed_orders(&self, raffle_ids: &[RaffleId]) -> StoreResult<Vec<SoldOrder>> {
        self.inner.completed_orders(raffle_ids).await
    }

    async fn approved_payment_order_ids(&self, order_ids: &[OrderId]) -> StoreResult<HashSet<OrderId>> {
        self.inner.approved_payment_order_ids(order_ids).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check(FailPoint::Ping)?;
        self.inner.ping().await
    }
}
