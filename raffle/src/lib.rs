//! Raffle order service.
//!
//! Back end of a raffle-ticket storefront. Buyers reserve numbered tickets
//! and pay by card (hosted payment page) or bank transfer; admins review
//! transfers. The service owns the order lifecycle and keeps tickets,
//! orders and payment records consistent with each other.
//!
//! # Architecture
//!
//! ```text
//!   HTTP (api, server)
//!         │
//!         ▼
//!   reconcile::Reconciler ──plans──▶ lifecycle (pure decisions)
//!         │
//!         ├── store::DataStore            PgStore | MemoryStore
//!         ├── payment_gateway::PaymentGateway   PayPhone
//!         ├── storage::ProofStorage       signed proof links
//!         ├── notify::Notifier            order confirmations
//!         └── environment::Clock
//! ```
//!
//! ```text
//! ticket:  available ──reserve──▶ reserved ──approve/confirm──▶ paid
//!               ▲                     │
//!               └──────reject─────────┘
//!
//! order:   pending ──proof/notify──▶ pending_approval
//!             │                        │
//!             ├──approve / card ok─────┴──▶ completed  (terminal)
//!             └──reject / card canceled────▶ rejected
//! ```
//!
//! The store has no transaction spanning several calls. Transitions are
//! sequences of single-statement writes, each verified as it runs; a failure
//! midway is reported with the failed step so an operator can finish it, and
//! approvals resume where an earlier attempt stopped.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod api;
pub mod auth;
pub mod config;
pub mod contact;
pub mod environment;
pub mod error;
pub mod lifecycle;
pub mod messages;
pub mod metrics;
pub mod notify;
pub mod payment_gateway;
pub mod reconcile;
pub mod server;
pub mod storage;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{ReconcileError, ReconcileResult, Step};
pub use reconcile::{ReconcileEnvironment, Reconciler, ReconcilerSettings};
pub use types::*;
