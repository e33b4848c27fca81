//! Seeded scenarios over the in-memory store.

use crate::doubles::{RecordingNotifier, ScriptedPaymentGateway, StaticProofStorage};
use crate::faults::FailingStore;
use crate::mocks::{FixedClock, test_clock};
use raffle::auth::{AdminIdentity, StaticTokenAuthorizer};
use raffle::environment::Clock;
use raffle::reconcile::{ReconcileEnvironment, Reconciler, ReconcilerSettings};
use raffle::server::AppState;
use raffle::store::{DataStore, MemoryStore};
use raffle::types::{
    AdminId, Client, ClientId, Money, Order, OrderId, OrderStatus, PaymentMethod, Raffle, RaffleId,
    Ticket, TicketNumber, TicketStatus,
};
use std::sync::Arc;
use uuid::Uuid;

/// Bearer token accepted for [`Scenario::admin`].
pub const ADMIN_TOKEN: &str = "admin-test-token";

/// Tickets seeded per raffle: `00000` to `00099`.
const SEEDED_TICKETS: u32 = 100;

/// One active raffle at 1.00 per ticket, one buyer, one admin, and
/// recording doubles for every gateway.
///
/// The reconciler talks to [`Self::faults`], which forwards to
/// [`Self::store`] until a fail point is armed.
pub struct Scenario {
    /// Seeded tables
    pub store: Arc<MemoryStore>,
    /// Fault-injecting view of `store`, used by the reconciler
    pub faults: Arc<FailingStore>,
    /// Card provider double
    pub payments: Arc<ScriptedPaymentGateway>,
    /// Confirmation double
    pub notifier: Arc<RecordingNotifier>,
    /// Proof storage double
    pub storage: Arc<StaticProofStorage>,
    /// Time source
    pub clock: FixedClock,
    /// The raffle
    pub raffle_id: RaffleId,
    /// The buyer
    pub client: Client,
    /// The admin
    pub admin: AdminIdentity,
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario {
    /// Seed the store.
    #[must_use]
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let raffle_id = RaffleId::new();
        store
            .put_raffle(Raffle {
                id: raffle_id,
                title: "Rifa de prueba".to_string(),
                ticket_price: Money::from_cents(100),
                active: true,
            })
            .unwrap();
        for index in 0..SEEDED_TICKETS {
            store
                .put_ticket(Ticket {
                    raffle_id,
                    number: TicketNumber::from_index(index).unwrap(),
                    status: TicketStatus::Available,
                    client_id: None,
                    reserved_until: None,
                })
                .unwrap();
        }

        let client = Client {
            id: ClientId::new(),
            name: "Ana Pérez".to_string(),
            email: Some("Ana.Perez@Example.com".to_string()),
            phone: Some("0991234567".to_string()),
        };
        store.put_client(client.clone()).unwrap();

        let admin_id = Uuid::new_v4();
        store.grant_admin(admin_id).unwrap();

        Self {
            faults: Arc::new(FailingStore::new(Arc::clone(&store))),
            store,
            payments: Arc::new(ScriptedPaymentGateway::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            storage: Arc::new(StaticProofStorage::new()),
            clock: test_clock(),
            raffle_id,
            client,
            admin: AdminIdentity {
                admin_id: AdminId::from_uuid(admin_id),
                email: Some("admin@example.com".to_string()),
            },
        }
    }

    /// Reconciler wired to the doubles.
    #[must_use]
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.environment(), ReconcilerSettings::default())
    }

    /// Reconciler with custom settings.
    #[must_use]
    pub fn reconciler_with(&self, settings: ReconcilerSettings) -> Reconciler {
        Reconciler::new(self.environment(), settings)
    }

    fn environment(&self) -> ReconcileEnvironment {
        ReconcileEnvironment {
            store: Arc::clone(&self.faults) as Arc<dyn DataStore>,
            payments: Arc::clone(&self.payments) as _,
            storage: Arc::clone(&self.storage) as _,
            notifier: Arc::clone(&self.notifier) as _,
            clock: Arc::new(self.clock),
        }
    }

    /// HTTP state whose authorizer accepts [`ADMIN_TOKEN`].
    #[must_use]
    pub fn app_state(&self) -> AppState {
        let authorizer = StaticTokenAuthorizer::new([(
            ADMIN_TOKEN.to_string(),
            *self.admin.admin_id.as_uuid(),
        )]);
        AppState::new(Arc::new(self.reconciler()), Arc::new(authorizer))
    }

    /// Ticket number from a literal.
    #[must_use]
    pub fn number(raw: &str) -> TicketNumber {
        TicketNumber::parse(raw).unwrap()
    }

    /// Another registered buyer.
    #[must_use]
    pub fn add_client(&self, email: &str, phone: &str) -> Client {
        let client = Client {
            id: ClientId::new(),
            name: "Otro Cliente".to_string(),
            email: Some(email.to_string()),
            phone: Some(phone.to_string()),
        };
        self.store.put_client(client.clone()).unwrap();
        client
    }

    /// Place an order directly in the store: its tickets reserved by the
    /// buyer, total priced at 1.00 per ticket.
    #[must_use]
    pub fn place_order(
        &self,
        numbers: &[&str],
        method: PaymentMethod,
        status: OrderStatus,
        proof_path: Option<&str>,
    ) -> Order {
        let numbers: Vec<TicketNumber> = numbers.iter().map(|n| Self::number(n)).collect();
        for number in &numbers {
            self.store
                .put_ticket(Ticket {
                    raffle_id: self.raffle_id,
                    number: number.clone(),
                    status: TicketStatus::Reserved,
                    client_id: Some(self.client.id),
                    reserved_until: Some(self.clock.now() + chrono::TimeDelta::minutes(30)),
                })
                .unwrap();
        }

        let order = Order {
            id: OrderId::new(),
            raffle_id: self.raffle_id,
            client_id: self.client.id,
            total: Money::from_cents(100 * numbers.len() as u64),
            numbers,
            payment_method: method,
            status,
            rejection_reason: None,
            transfer_proof_path: proof_path.map(str::to_string),
            created_at: self.clock.now(),
        };
        self.store.put_order(order.clone()).unwrap();
        order
    }

    /// Transfer order for tickets `00012` and `00013`, total 2.00.
    #[must_use]
    pub fn transfer_order(&self, status: OrderStatus) -> Order {
        let proof = (status == OrderStatus::PendingApproval).then_some("proofs/o1.jpg");
        self.place_order(&["00012", "00013"], PaymentMethod::Transfer, status, proof)
    }

    /// Card order for tickets `00020` and `00021`, pending.
    #[must_use]
    pub fn card_order(&self) -> Order {
        self.place_order(&["00020", "00021"], PaymentMethod::Card, OrderStatus::Pending, None)
    }

    /// Current order row.
    pub async fn order(&self, id: OrderId) -> Order {
        self.store.find_order(id).await.unwrap().unwrap()
    }

    /// Current ticket row.
    #[must_use]
    pub fn ticket(&self, number: &str) -> Ticket {
        self.store
            .ticket(self.raffle_id, &Self::number(number))
            .unwrap()
            .unwrap()
    }
}
