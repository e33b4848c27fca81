//! # Raffle Testing
//!
//! Test doubles and fixtures for the raffle order service.
//!
//! This crate provides:
//! - [`FixedClock`]: deterministic time
//! - [`Scenario`]: a seeded in-memory store plus a reconciler wired to
//!   recording doubles
//! - [`FailingStore`]: a store wrapper that fails chosen calls, for
//!   partial-failure tests
//! - [`ScriptedPaymentGateway`], [`RecordingNotifier`],
//!   [`StaticProofStorage`]: gateway doubles
//! - [`properties`]: proptest strategies for domain data
//!
//! ## Example
//!
//! ```ignore
//! use raffle_testing::Scenario;
//!
//! #[tokio::test]
//! async fn test_approve() {
//!     let scenario = Scenario::new();
//!     let order = scenario.transfer_order(OrderStatus::PendingApproval);
//!
//!     let outcome = scenario
//!         .reconciler()
//!         .approve_transfer(order.id, &scenario.admin)
//!         .await
//!         .unwrap();
//!     assert_eq!(outcome.status, OrderStatus::Completed);
//! }
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

pub mod doubles;
pub mod faults;
pub mod fixtures;
pub mod properties;

pub use doubles::{RecordingNotifier, ScriptedPaymentGateway, StaticProofStorage};
pub use faults::{FailMode, FailPoint, FailingStore};
pub use fixtures::{ADMIN_TOKEN, Scenario};
pub use mocks::{FixedClock, test_clock};

/// Mock implementations of environment traits.
pub mod mocks {
    use chrono::{DateTime, Utc};
    use raffle::environment::Clock;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use raffle_testing::mocks::FixedClock;
    /// use raffle::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone, Copy)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Fixed clock at 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        )
    }
}

/// Install a test-friendly `tracing` subscriber; repeated calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "raffle=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
