//! Read-only sales and revenue aggregation.
//!
//! Nothing here writes or caches: every call reads current table state.

use crate::store::{DataStore, StoreError, StoreResult};
use crate::types::{
    Money, OrderId, OrderStatus, PaymentMethod, PaymentProvider, RaffleId, SoldOrder, TicketStatus,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Revenue from approved payments, by provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RevenueBreakdown {
    /// Card payments
    pub payphone: Money,
    /// Bank transfers
    pub transfer: Money,
    /// Anything else, including unknown providers
    pub other: Money,
    /// Sum of the buckets above
    pub total: Money,
}

/// Admin dashboard figures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Dashboard {
    /// Tickets sold across raffles
    pub sold: u64,
    /// Tickets across raffles
    pub total: u64,
    /// Tickets held by open orders
    pub reserved: u64,
    /// Tickets on sale
    pub available: u64,
    /// Approved revenue
    pub revenue: RevenueBreakdown,
    /// Transfer orders waiting for review
    pub pending_transfers: u64,
}

/// Bucket approved payment amounts by provider.
#[must_use]
pub fn bucket_revenue(payments: &[(PaymentProvider, Money)]) -> RevenueBreakdown {
    let mut revenue = RevenueBreakdown::default();
    for (provider, amount) in payments {
        let bucket = match provider {
            PaymentProvider::PayPhone => &mut revenue.payphone,
            PaymentProvider::Transfer => &mut revenue.transfer,
            PaymentProvider::Other(_) => &mut revenue.other,
        };
        *bucket = bucket.saturating_add(*amount);
    }
    revenue.total = revenue
        .payphone
        .saturating_add(revenue.transfer)
        .saturating_add(revenue.other);
    revenue
}

/// Compute the dashboard. The independent reads run concurrently.
///
/// # Errors
///
/// Returns the first store error.
pub async fn dashboard(store: &dyn DataStore) -> StoreResult<Dashboard> {
    let (progress, reserved, available, payments, pending_transfers) = tokio::try_join!(
        store.raffle_progress(),
        store.count_tickets(TicketStatus::Reserved),
        store.count_tickets(TicketStatus::Available),
        store.approved_payment_amounts(),
        store.count_orders(PaymentMethod::Transfer, OrderStatus::PendingApproval),
    )?;

    let (sold, total) = progress
        .iter()
        .fold((0u64, 0u64), |(sold, total), p| (sold + p.sold, total + p.total));

    Ok(Dashboard {
        sold,
        total,
        reserved,
        available,
        revenue: bucket_revenue(&payments),
        pending_transfers,
    })
}

/// Sold tickets per raffle, counting completed orders with an approved
/// payment. Every requested raffle appears in the result.
///
/// Uses the joined query and falls back to two queries when the store
/// cannot join.
///
/// # Errors
///
/// Returns store errors other than [`StoreError::Unsupported`] on the
/// joined path.
pub async fn sold_counts(store: &dyn DataStore, raffle_ids: &[RaffleId]) -> StoreResult<BTreeMap<RaffleId, u64>> {
    match store.sold_orders_joined(raffle_ids).await {
        Ok(rows) => Ok(sum_joined(raffle_ids, &rows)),
        Err(StoreError::Unsupported(what)) => {
            tracing::debug!(what, "Joined sold-ticket query unavailable, using fallback");
            let orders = store.completed_orders(raffle_ids).await?;
            let order_ids: Vec<OrderId> = orders.iter().map(|o| o.order_id).collect();
            let paid = store.approved_payment_order_ids(&order_ids).await?;
            Ok(sum_fallback(raffle_ids, &orders, &paid))
        }
        Err(err) => Err(err),
    }
}

/// Sum joined rows. The join yields one row per approved payment, so
/// orders are counted once.
#[must_use]
pub fn sum_joined(raffle_ids: &[RaffleId], rows: &[SoldOrder]) -> BTreeMap<RaffleId, u64> {
    let mut counts = zeroed(raffle_ids);
    let mut seen = HashSet::new();
    for row in rows {
        if seen.insert(row.order_id) {
            if let Some(count) = counts.get_mut(&row.raffle_id) {
                *count += row.number_count;
            }
        }
    }
    counts
}

/// Sum completed orders whose id is in `paid`.
#[must_use]
pub fn sum_fallback(
    raffle_ids: &[RaffleId],
    completed: &[SoldOrder],
    paid: &HashSet<OrderId>,
) -> BTreeMap<RaffleId, u64> {
    let mut counts = zeroed(raffle_ids);
    let mut seen = HashSet::new();
    for order in completed.iter().filter(|o| paid.contains(&o.order_id)) {
        if seen.insert(order.order_id) {
            if let Some(count) = counts.get_mut(&order.raffle_id) {
                *count += order.number_count;
            }
        }
    }
    counts
}

fn zeroed(raffle_ids: &[RaffleId]) -> BTreeMap<RaffleId, u64> {
    raffle_ids.iter().map(|id| (*id, 0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sold(raffle_id: RaffleId, number_count: u64) -> SoldOrder {
        SoldOrder {
            order_id: OrderId::new(),
            raffle_id,
            number_count,
        }
    }

    #[test]
    fn test_unknown_provider_goes_to_other() {
        let revenue = bucket_revenue(&[
            (PaymentProvider::PayPhone, Money::from_cents(500)),
            (PaymentProvider::Transfer, Money::from_cents(200)),
            (PaymentProvider::Other("cash".to_string()), Money::from_cents(100)),
            (PaymentProvider::Other(String::new()), Money::from_cents(50)),
        ]);

        assert_eq!(revenue.payphone, Money::from_cents(500));
        assert_eq!(revenue.transfer, Money::from_cents(200));
        assert_eq!(revenue.other, Money::from_cents(150));
        assert_eq!(revenue.total, Money::from_cents(850));
    }

    #[test]
    fn test_joined_rows_count_each_order_once() {
        let raffle = RaffleId::new();
        let order = sold(raffle, 3);

        let counts = sum_joined(&[raffle], &[order, order]);

        assert_eq!(counts.get(&raffle), Some(&3));
    }

    #[test]
    fn test_fallback_skips_unpaid_and_keeps_zeros() {
        let (r1, r2) = (RaffleId::new(), RaffleId::new());
        let paid_order = sold(r1, 2);
        let unpaid_order = sold(r1, 5);
        let paid: HashSet<_> = [paid_order.order_id].into_iter().collect();

        let counts = sum_fallback(&[r1, r2], &[paid_order, unpaid_order], &paid);

        assert_eq!(counts.get(&r1), Some(&2));
        assert_eq!(counts.get(&r2), Some(&0));
    }
}
