//! In-memory data store.
//!
//! Serves local development (`STORE_BACKEND=memory`) and the test suites.
//! Each trait method takes the lock once, so every call is atomic just like
//! a single statement against the remote store, and nothing more.

use super::{DataStore, OrderFilter, OrderPatch, ReservationRequest, Selection, StoreError, StoreResult};
use crate::types::{
    AuditEntry, Client, ClientId, Money, Order, OrderId, OrderStatus, Payment, PaymentMethod,
    PaymentProvider, PaymentStatus, Raffle, RaffleId, RaffleProgress, SoldOrder, Ticket,
    TicketNumber, TicketStatus,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    raffles: HashMap<RaffleId, Raffle>,
    clients: HashMap<ClientId, Client>,
    orders: HashMap<OrderId, Order>,
    tickets: BTreeMap<(RaffleId, TicketNumber), Ticket>,
    payments: Vec<Payment>,
    audit_log: Vec<AuditEntry>,
    admins: HashSet<Uuid>,
    joins_supported: bool,
}

/// Mutex-guarded tables implementing [`DataStore`].
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with join queries enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                joins_supported: true,
                ..Tables::default()
            }),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    /// Toggle support for [`DataStore::sold_orders_joined`].
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn set_joins_supported(&self, supported: bool) -> StoreResult<()> {
        self.lock()?.joins_supported = supported;
        Ok(())
    }

    /// Add or replace a raffle.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn put_raffle(&self, raffle: Raffle) -> StoreResult<()> {
        self.lock()?.raffles.insert(raffle.id, raffle);
        Ok(())
    }

    /// Add or replace a buyer.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn put_client(&self, client: Client) -> StoreResult<()> {
        self.lock()?.clients.insert(client.id, client);
        Ok(())
    }

    /// Add or replace an order, bypassing intake.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn put_order(&self, order: Order) -> StoreResult<()> {
        self.lock()?.orders.insert(order.id, order);
        Ok(())
    }

    /// Add or replace a ticket.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn put_ticket(&self, ticket: Ticket) -> StoreResult<()> {
        self.lock()?
            .tickets
            .insert((ticket.raffle_id, ticket.number.clone()), ticket);
        Ok(())
    }

    /// Append a payment record without the one-approved-payment check,
    /// for seeding legacy rows.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn put_payment(&self, payment: Payment) -> StoreResult<()> {
        self.lock()?.payments.push(payment);
        Ok(())
    }

    /// Grant the admin flag to a user.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn grant_admin(&self, user_id: Uuid) -> StoreResult<()> {
        self.lock()?.admins.insert(user_id);
        Ok(())
    }

    /// Look at one ticket.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn ticket(&self, raffle_id: RaffleId, number: &TicketNumber) -> StoreResult<Option<Ticket>> {
        Ok(self.lock()?.tickets.get(&(raffle_id, number.clone())).cloned())
    }

    /// Every payment record, in insertion order.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn payments(&self) -> StoreResult<Vec<Payment>> {
        Ok(self.lock()?.payments.clone())
    }

    /// Every audit entry, in insertion order.
    ///
    /// # Errors
    ///
    /// Fails only if the lock is poisoned.
    pub fn audit_log(&self) -> StoreResult<Vec<AuditEntry>> {
        Ok(self.lock()?.audit_log.clone())
    }
}

fn matching_tickets<'a>(
    tables: &'a mut Tables,
    raffle_id: RaffleId,
    client_id: ClientId,
    numbers: &'a [TicketNumber],
) -> impl Iterator<Item = &'a mut Ticket> + 'a {
    let wanted: HashSet<&TicketNumber> = numbers.iter().collect();
    tables.tickets.values_mut().filter(move |ticket| {
        ticket.raffle_id == raffle_id
            && ticket.client_id == Some(client_id)
            && wanted.contains(&ticket.number)
    })
}

fn has_approved_payment(payments: &[Payment], order_id: OrderId) -> bool {
    payments
        .iter()
        .any(|p| p.order_id == order_id && p.status == PaymentStatus::Approved)
}

fn completed_in(tables: &Tables, raffle_ids: &[RaffleId]) -> Vec<SoldOrder> {
    tables
        .orders
        .values()
        .filter(|o| o.status == OrderStatus::Completed && raffle_ids.contains(&o.raffle_id))
        .map(|o| SoldOrder {
            order_id: o.id,
            raffle_id: o.raffle_id,
            number_count: o.numbers.len() as u64,
        })
        .collect()
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn find_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.lock()?.orders.get(&id).cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<Vec<Order>> {
        let tables = self.lock()?;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| filter.payment_method.is_none_or(|m| o.payment_method == m))
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders.truncate(usize::try_from(filter.limit).unwrap_or(usize::MAX));
        Ok(orders)
    }

    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if tables.orders.contains_key(&order.id) {
            return Err(StoreError::Conflict(format!("order {} already exists", order.id)));
        }
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_order(&self, id: OrderId, patch: &OrderPatch) -> StoreResult<u64> {
        let mut tables = self.lock()?;
        match tables.orders.get_mut(&id) {
            Some(order) if !patch.admits(order.status) => Ok(0),
            Some(order) => {
                patch.apply_to(order);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find_client(&self, id: ClientId) -> StoreResult<Option<Client>> {
        Ok(self.lock()?.clients.get(&id).cloned())
    }

    async fn find_raffle(&self, id: RaffleId) -> StoreResult<Option<Raffle>> {
        Ok(self.lock()?.raffles.get(&id).cloned())
    }

    async fn reserve_tickets(&self, request: &ReservationRequest) -> StoreResult<Vec<TicketNumber>> {
        let mut tables = self.lock()?;

        let picked: Vec<TicketNumber> = match &request.selection {
            Selection::Numbers(numbers) => {
                let all_available = numbers.iter().all(|number| {
                    tables
                        .tickets
                        .get(&(request.raffle_id, number.clone()))
                        .is_some_and(|t| t.status == TicketStatus::Available)
                });
                if !all_available {
                    return Err(StoreError::Conflict(
                        "one or more requested numbers are not available".to_string(),
                    ));
                }
                numbers.clone()
            }
            Selection::Count(count) => {
                let wanted = usize::try_from(*count).unwrap_or(usize::MAX);
                let available: Vec<TicketNumber> = tables
                    .tickets
                    .values()
                    .filter(|t| t.raffle_id == request.raffle_id && t.status == TicketStatus::Available)
                    .map(|t| t.number.clone())
                    .take(wanted)
                    .collect();
                if available.len() < wanted {
                    return Err(StoreError::Conflict(format!(
                        "only {} tickets available, {wanted} requested",
                        available.len()
                    )));
                }
                available
            }
        };

        for number in &picked {
            if let Some(ticket) = tables.tickets.get_mut(&(request.raffle_id, number.clone())) {
                ticket.status = TicketStatus::Reserved;
                ticket.client_id = Some(request.client_id);
                ticket.reserved_until = Some(request.reserved_until);
            }
        }

        Ok(picked)
    }

    async fn release_reservation(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
    ) -> StoreResult<u64> {
        let mut tables = self.lock()?;
        let mut rows = 0;
        for ticket in matching_tickets(&mut tables, raffle_id, client_id, numbers)
            .filter(|t| t.status == TicketStatus::Reserved)
        {
            ticket.status = TicketStatus::Available;
            ticket.client_id = None;
            ticket.reserved_until = None;
            rows += 1;
        }
        Ok(rows)
    }

    async fn count_owned_tickets(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
        status: Option<TicketStatus>,
    ) -> StoreResult<u64> {
        let mut tables = self.lock()?;
        Ok(matching_tickets(&mut tables, raffle_id, client_id, numbers)
            .filter(|t| status.is_none_or(|s| t.status == s))
            .count() as u64)
    }

    async fn mark_tickets_paid(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
    ) -> StoreResult<u64> {
        let mut tables = self.lock()?;
        let mut rows = 0;
        for ticket in matching_tickets(&mut tables, raffle_id, client_id, numbers) {
            ticket.status = TicketStatus::Paid;
            ticket.reserved_until = None;
            rows += 1;
        }
        Ok(rows)
    }

    async fn release_tickets(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
    ) -> StoreResult<u64> {
        let mut tables = self.lock()?;
        let mut rows = 0;
        for ticket in matching_tickets(&mut tables, raffle_id, client_id, numbers) {
            ticket.status = TicketStatus::Available;
            ticket.client_id = None;
            ticket.reserved_until = None;
            rows += 1;
        }
        Ok(rows)
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if payment.status == PaymentStatus::Approved
            && has_approved_payment(&tables.payments, payment.order_id)
        {
            return Err(StoreError::Conflict(format!(
                "order {} already has an approved payment",
                payment.order_id
            )));
        }
        tables.payments.push(payment.clone());
        Ok(())
    }

    async fn payments_for_order(&self, order_id: OrderId) -> StoreResult<Vec<Payment>> {
        Ok(self
            .lock()?
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.lock()?.audit_log.push(entry.clone());
        Ok(())
    }

    async fn is_admin(&self, user_id: Uuid) -> StoreResult<bool> {
        Ok(self.lock()?.admins.contains(&user_id))
    }

    async fn raffle_progress(&self) -> StoreResult<Vec<RaffleProgress>> {
        let tables = self.lock()?;
        let mut progress: BTreeMap<RaffleId, RaffleProgress> = BTreeMap::new();
        for ticket in tables.tickets.values() {
            let entry = progress.entry(ticket.raffle_id).or_insert(RaffleProgress {
                raffle_id: ticket.raffle_id,
                sold: 0,
                total: 0,
            });
            entry.total += 1;
            if ticket.status == TicketStatus::Paid {
                entry.sold += 1;
            }
        }
        Ok(progress.into_values().collect())
    }

    async fn count_tickets(&self, status: TicketStatus) -> StoreResult<u64> {
        Ok(self
            .lock()?
            .tickets
            .values()
            .filter(|t| t.status == status)
            .count() as u64)
    }

    async fn approved_payment_amounts(&self) -> StoreResult<Vec<(PaymentProvider, Money)>> {
        Ok(self
            .lock()?
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Approved)
            .map(|p| (p.provider.clone(), p.amount))
            .collect())
    }

    async fn count_orders(&self, method: PaymentMethod, status: OrderStatus) -> StoreResult<u64> {
        Ok(self
            .lock()?
            .orders
            .values()
            .filter(|o| o.payment_method == method && o.status == status)
            .count() as u64)
    }

    async fn sold_orders_joined(&self, raffle_ids: &[RaffleId]) -> StoreResult<Vec<SoldOrder>> {
        let tables = self.lock()?;
        if !tables.joins_supported {
            return Err(StoreError::Unsupported("orders joined with payments"));
        }
        // One row per (order, approved payment), like the SQL join.
        Ok(completed_in(&tables, raffle_ids)
            .into_iter()
            .flat_map(|sold| {
                let approved = tables
                    .payments
                    .iter()
                    .filter(|p| p.order_id == sold.order_id && p.status == PaymentStatus::Approved)
                    .count();
                std::iter::repeat_n(sold, approved)
            })
            .collect())
    }

    async fn completed_orders(&self, raffle_ids: &[RaffleId]) -> StoreResult<Vec<SoldOrder>> {
        Ok(completed_in(&*self.lock()?, raffle_ids))
    }

    async fn approved_payment_order_ids(&self, order_ids: &[OrderId]) -> StoreResult<HashSet<OrderId>> {
        let tables = self.lock()?;
        Ok(order_ids
            .iter()
            .copied()
            .filter(|id| has_approved_payment(&tables.payments, *id))
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn seeded(count: u32) -> (MemoryStore, RaffleId) {
        let store = MemoryStore::new();
        let raffle_id = RaffleId::new();
        for i in 1..=count {
            store
                .put_ticket(Ticket {
                    raffle_id,
                    number: TicketNumber::from_index(i).unwrap(),
                    status: TicketStatus::Available,
                    client_id: None,
                    reserved_until: None,
                })
                .unwrap();
        }
        (store, raffle_id)
    }

    fn request(raffle_id: RaffleId, client_id: ClientId, selection: Selection) -> ReservationRequest {
        ReservationRequest {
            raffle_id,
            client_id,
            selection,
            reserved_until: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_reserve_numbers_is_all_or_nothing() {
        let (store, raffle_id) = seeded(3);
        let first = ClientId::new();
        let second = ClientId::new();
        let one = TicketNumber::parse("1").unwrap();
        let two = TicketNumber::parse("2").unwrap();

        store
            .reserve_tickets(&request(raffle_id, first, Selection::Numbers(vec![one.clone()])))
            .await
            .unwrap();

        let err = store
            .reserve_tickets(&request(raffle_id, second, Selection::Numbers(vec![two.clone(), one])))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let untouched = store.ticket(raffle_id, &two).unwrap().unwrap();
        assert_eq!(untouched.status, TicketStatus::Available);
        assert_eq!(untouched.client_id, None);
    }

    #[tokio::test]
    async fn test_reserve_count_fails_when_pool_is_short() {
        let (store, raffle_id) = seeded(2);
        let err = store
            .reserve_tickets(&request(raffle_id, ClientId::new(), Selection::Count(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.count_tickets(TicketStatus::Available).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ticket_updates_match_owner_only() {
        let (store, raffle_id) = seeded(2);
        let owner = ClientId::new();
        let numbers = store
            .reserve_tickets(&request(raffle_id, owner, Selection::Count(2)))
            .await
            .unwrap();

        assert_eq!(store.mark_tickets_paid(raffle_id, ClientId::new(), &numbers).await.unwrap(), 0);
        assert_eq!(
            store.count_owned_tickets(raffle_id, owner, &numbers, Some(TicketStatus::Paid)).await.unwrap(),
            0
        );
        assert_eq!(store.mark_tickets_paid(raffle_id, owner, &numbers).await.unwrap(), 2);
        assert_eq!(store.count_tickets(TicketStatus::Paid).await.unwrap(), 2);
        assert_eq!(
            store.count_owned_tickets(raffle_id, owner, &numbers, Some(TicketStatus::Paid)).await.unwrap(),
            2
        );
        assert_eq!(store.count_owned_tickets(raffle_id, owner, &numbers, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_second_approved_payment_is_rejected() {
        let store = MemoryStore::new();
        let payment = Payment {
            id: crate::types::PaymentId::new(),
            order_id: OrderId::new(),
            provider: PaymentProvider::Transfer,
            provider_reference: None,
            amount: Money::from_cents(200),
            status: PaymentStatus::Approved,
            proof_url: None,
            created_at: Utc::now(),
        };
        store.insert_payment(&payment).await.unwrap();
        let again = Payment {
            id: crate::types::PaymentId::new(),
            ..payment
        };
        assert!(matches!(
            store.insert_payment(&again).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_open_guard_skips_settled_orders() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for status in [OrderStatus::Pending, OrderStatus::PendingApproval, OrderStatus::Rejected, OrderStatus::Completed] {
            let order = Order {
                id: OrderId::new(),
                raffle_id: RaffleId::new(),
                client_id: ClientId::new(),
                numbers: vec![TicketNumber::parse("1").unwrap()],
                total: Money::from_cents(100),
                payment_method: PaymentMethod::Transfer,
                status,
                rejection_reason: None,
                transfer_proof_path: None,
                created_at: Utc::now(),
            };
            store.put_order(order.clone()).unwrap();
            ids.push((order.id, status));
        }

        let patch = OrderPatch::default().status(OrderStatus::Completed).only_open();
        for (id, status) in ids {
            let expected = u64::from(status == OrderStatus::Pending || status == OrderStatus::PendingApproval);
            assert_eq!(store.update_order(id, &patch).await.unwrap(), expected, "{status}");
        }
    }

    #[tokio::test]
    async fn test_joined_query_can_be_disabled() {
        let store = MemoryStore::new();
        store.set_joins_supported(false).unwrap();
        assert!(matches!(
            store.sold_orders_joined(&[RaffleId::new()]).await,
            Err(StoreError::Unsupported(_))
        ));
    }
}
