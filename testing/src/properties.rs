//! Proptest strategies for domain data.

use proptest::prelude::*;
use raffle::environment::Clock;
use raffle::store::MemoryStore;
use raffle::types::{
    ClientId, Money, Order, OrderId, OrderStatus, Payment, PaymentId, PaymentMethod, PaymentProvider,
    PaymentStatus, RaffleId, TicketNumber,
};

/// Any provider, unknown and missing ones included.
pub fn provider() -> impl Strategy<Value = PaymentProvider> {
    prop_oneof![
        Just(PaymentProvider::PayPhone),
        Just(PaymentProvider::Transfer),
        Just(PaymentProvider::Other(String::new())),
        "[a-z]{1,10}".prop_map(PaymentProvider::Other),
    ]
}

/// Approved payment amounts as read for the revenue buckets.
pub fn approved_amounts() -> impl Strategy<Value = Vec<(PaymentProvider, Money)>> {
    prop::collection::vec((provider(), (0u64..10_000_000).prop_map(Money::from_cents)), 0..40)
}

/// Shape of one order in a sold-ticket dataset.
#[derive(Clone, Debug)]
pub struct OrderSeed {
    /// Index of the raffle (0..3)
    pub raffle: usize,
    /// Ticket count
    pub tickets: u32,
    /// Final status
    pub status: OrderStatus,
    /// Approved payments recorded for it
    pub approved_payments: usize,
    /// Non-approved payments recorded for it
    pub other_payments: usize,
}

/// Orders spread over three raffles, in every status, with zero or more
/// payments each.
pub fn order_seeds() -> impl Strategy<Value = Vec<OrderSeed>> {
    let status = prop_oneof![
        Just(OrderStatus::Pending),
        Just(OrderStatus::PendingApproval),
        Just(OrderStatus::Completed),
        Just(OrderStatus::Rejected),
    ];
    let seed = (0usize..3, 1u32..6, status, 0usize..3, 0usize..2).prop_map(
        |(raffle, tickets, status, approved_payments, other_payments)| OrderSeed {
            raffle,
            tickets,
            status,
            approved_payments,
            other_payments,
        },
    );
    prop::collection::vec(seed, 0..25)
}

/// Write `seeds` into a fresh store. Returns the store and the three raffle
/// ids.
///
/// Orders are written directly, so a seed may hold more than one approved
/// payment, the way rows look in a store without a uniqueness constraint.
pub fn seed_store(seeds: &[OrderSeed]) -> (MemoryStore, [RaffleId; 3]) {
    let store = MemoryStore::new();
    let raffles = [RaffleId::new(), RaffleId::new(), RaffleId::new()];
    let client = ClientId::new();
    let created_at = crate::test_clock().now();

    for seed in seeds {
        let order = Order {
            id: OrderId::new(),
            raffle_id: raffles[seed.raffle],
            client_id: client,
            numbers: (0..seed.tickets)
                .map(|i| TicketNumber::from_index(i).unwrap())
                .collect(),
            total: Money::from_cents(u64::from(seed.tickets) * 100),
            payment_method: PaymentMethod::Transfer,
            status: seed.status,
            rejection_reason: None,
            transfer_proof_path: None,
            created_at,
        };
        let statuses = std::iter::repeat_n(PaymentStatus::Approved, seed.approved_payments).chain(
            std::iter::repeat_n(PaymentStatus::Other("pending".to_string()), seed.other_payments),
        );
        for status in statuses {
            store
                .put_payment(Payment {
                    id: PaymentId::new(),
                    order_id: order.id,
                    provider: PaymentProvider::Transfer,
                    provider_reference: None,
                    amount: order.total,
                    status,
                    proof_url: None,
                    created_at,
                })
                .unwrap();
        }
        store.put_order(order).unwrap();
    }

    (store, raffles)
}
