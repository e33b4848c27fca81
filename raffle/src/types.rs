//! Domain types for the raffle order service.
//!
//! Identifiers, value objects (money, ticket numbers), lifecycle enums and
//! the row-shaped entities the reconciliation core reads and writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an order
    OrderId
);
uuid_id!(
    /// Unique identifier for a raffle
    RaffleId
);
uuid_id!(
    /// Unique identifier for a buyer
    ClientId
);
uuid_id!(
    /// Unique identifier for a payment record
    PaymentId
);
uuid_id!(
    /// Identity of a back-office user with the admin flag
    AdminId
);

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Currency amount in cents.
///
/// Parsed from and rendered as a two-decimal string (`"2.00"`), which is
/// also its JSON form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(u64);

/// Error parsing a decimal amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount '{0}': expected a non-negative decimal with at most two fraction digits")]
pub struct InvalidMoney(pub String);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Adds two amounts, saturating at the numeric bound
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Multiplies by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u64) -> Option<Self> {
        match self.0.checked_mul(quantity) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl FromStr for Money {
    type Err = InvalidMoney;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidMoney(s.to_string());
        let trimmed = s.trim();
        let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));

        if whole.is_empty()
            || fraction.len() > 2
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !fraction.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let fraction: u64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<u64>().map_err(|_| invalid())? * 10,
            _ => fraction.parse().map_err(|_| invalid())?,
        };

        whole
            .checked_mul(100)
            .and_then(|cents| cents.checked_add(fraction))
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Whole(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Raw::Whole(units) => units
                .checked_mul(100)
                .map(Self)
                .ok_or_else(|| serde::de::Error::custom("amount overflow")),
        }
    }
}

// ============================================================================
// Ticket numbers
// ============================================================================

/// A raffle ticket number: a fixed-width, zero-padded digit string.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TicketNumber(String);

/// Error parsing a ticket number.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ticket number '{0}': expected 1 to 5 digits")]
pub struct InvalidTicketNumber(pub String);

impl TicketNumber {
    /// Number of digits every ticket number is padded to
    pub const WIDTH: usize = 5;

    /// Parse and zero-pad a ticket number (`"12"` becomes `"00012"`).
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTicketNumber`] when the input is empty, longer than
    /// [`Self::WIDTH`] or contains anything but ASCII digits.
    pub fn parse(raw: &str) -> Result<Self, InvalidTicketNumber> {
        let digits = raw.trim();
        if digits.is_empty()
            || digits.len() > Self::WIDTH
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(InvalidTicketNumber(raw.to_string()));
        }
        Ok(Self(format!("{digits:0>width$}", width = Self::WIDTH)))
    }

    /// Build the ticket number for a numeric position.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTicketNumber`] when the value needs more than
    /// [`Self::WIDTH`] digits.
    pub fn from_index(index: u32) -> Result<Self, InvalidTicketNumber> {
        Self::parse(&index.to_string())
    }

    /// The padded digits
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TicketNumber {
    type Error = InvalidTicketNumber;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TicketNumber> for String {
    fn from(number: TicketNumber) -> Self {
        number.0
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Lifecycle enums
// ============================================================================

/// Error converting a stored string into one of the lifecycle enums.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    /// Enum being parsed
    pub kind: &'static str,
    /// Offending value
    pub value: String,
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Stored/wire representation
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// How the buyer pays for an order.
    PaymentMethod, "payment method" {
        /// Hosted card payment page
        Card => "card",
        /// Bank transfer, approved manually by an admin
        Transfer => "transfer",
    }
);

string_enum!(
    /// Order lifecycle status.
    OrderStatus, "order status" {
        /// Created, waiting for payment or transfer proof
        Pending => "pending",
        /// Transfer proof attached, waiting for an admin
        PendingApproval => "pending_approval",
        /// Paid; terminal
        Completed => "completed",
        /// Payment rejected; tickets released
        Rejected => "rejected",
    }
);

string_enum!(
    /// Ticket lifecycle status.
    TicketStatus, "ticket status" {
        /// In the sellable pool
        Available => "available",
        /// Held for a pending order
        Reserved => "reserved",
        /// Sold
        Paid => "paid",
    }
);

string_enum!(
    /// Audit-log actions written by admin transitions.
    AuditAction, "audit action" {
        /// Transfer order approved
        TransferApprove => "transfer_approve",
        /// Transfer order rejected
        TransferReject => "transfer_reject",
        /// Confirmation email sent again
        InvoiceResend => "invoice_resend",
    }
);

impl OrderStatus {
    /// Statuses an order can still be settled from.
    pub const OPEN: [Self; 2] = [Self::Pending, Self::PendingApproval];

    /// Whether no further transition may leave this status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Who processed a payment. Unrecognized or missing providers are kept as
/// `Other` so revenue can still be bucketed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PaymentProvider {
    /// PayPhone hosted payment page
    PayPhone,
    /// Manually approved bank transfer
    Transfer,
    /// Anything else, including a missing provider (empty string)
    Other(String),
}

impl PaymentProvider {
    /// Interpret a stored provider column.
    #[must_use]
    pub fn from_db(value: Option<&str>) -> Self {
        match value {
            Some("payphone") => Self::PayPhone,
            Some("transfer") => Self::Transfer,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other(String::new()),
        }
    }

    /// Stored representation; `None` for a missing provider.
    #[must_use]
    pub fn as_db(&self) -> Option<&str> {
        match self {
            Self::PayPhone => Some("payphone"),
            Self::Transfer => Some("transfer"),
            Self::Other(name) if name.is_empty() => None,
            Self::Other(name) => Some(name),
        }
    }
}

impl Serialize for PaymentProvider {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_db().unwrap_or("other"))
    }
}

/// Payment record status. The core only ever writes `Approved`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    /// Money received
    Approved,
    /// Any other stored status, preserved verbatim
    Other(String),
}

impl PaymentStatus {
    /// Interpret a stored status column.
    #[must_use]
    pub fn from_db(value: &str) -> Self {
        if value == "approved" {
            Self::Approved
        } else {
            Self::Other(value.to_string())
        }
    }

    /// Stored representation
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Approved => "approved",
            Self::Other(status) => status,
        }
    }
}

impl Serialize for PaymentStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// One buyer's claim on a set of ticket numbers of one raffle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Order {
    /// Order ID
    pub id: OrderId,
    /// Raffle the numbers belong to
    pub raffle_id: RaffleId,
    /// Buyer
    pub client_id: ClientId,
    /// Claimed ticket numbers, never empty
    pub numbers: Vec<TicketNumber>,
    /// Amount due
    pub total: Money,
    /// Chosen payment method
    pub payment_method: PaymentMethod,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Why the payment was rejected, if it was
    pub rejection_reason: Option<String>,
    /// Object path of the uploaded transfer proof
    pub transfer_proof_path: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// One sellable numbered unit of a raffle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Ticket {
    /// Raffle
    pub raffle_id: RaffleId,
    /// Ticket number
    pub number: TicketNumber,
    /// Lifecycle status
    pub status: TicketStatus,
    /// Current owner; `None` while available
    pub client_id: Option<ClientId>,
    /// End of the reservation hold
    pub reserved_until: Option<DateTime<Utc>>,
}

/// Append-only record of a received payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Payment {
    /// Payment ID
    pub id: PaymentId,
    /// Order paid for
    pub order_id: OrderId,
    /// Processor
    pub provider: PaymentProvider,
    /// Processor-side transaction reference
    pub provider_reference: Option<String>,
    /// Amount received
    pub amount: Money,
    /// Status
    pub status: PaymentStatus,
    /// Transfer proof reference
    pub proof_url: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Buyer contact record (read-only here).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Client {
    /// Client ID
    pub id: ClientId,
    /// Display name
    pub name: String,
    /// Email as registered
    pub email: Option<String>,
    /// Phone as registered
    pub phone: Option<String>,
}

/// Raffle summary needed to price an order (read-only here).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Raffle {
    /// Raffle ID
    pub id: RaffleId,
    /// Title
    pub title: String,
    /// Price of one ticket
    pub ticket_price: Money,
    /// Whether tickets are on sale
    pub active: bool,
}

/// Admin action recorded for later review.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    /// Acting admin
    pub admin_id: AdminId,
    /// What was done
    pub action: AuditAction,
    /// Kind of resource touched
    pub resource_type: String,
    /// Resource identifier
    pub resource_id: String,
    /// Free-form details
    pub details: serde_json::Value,
    /// When
    pub created_at: DateTime<Utc>,
}

/// Sold/total ticket counts of one raffle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RaffleProgress {
    /// Raffle
    pub raffle_id: RaffleId,
    /// Tickets sold
    pub sold: u64,
    /// Tickets in the raffle
    pub total: u64,
}

/// A completed order as seen by the sold-ticket aggregation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SoldOrder {
    /// Order
    pub order_id: OrderId,
    /// Raffle
    pub raffle_id: RaffleId,
    /// Length of the order's number list
    pub number_count: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_money_parse_and_display() {
        assert_eq!("2.00".parse::<Money>().unwrap(), Money::from_cents(200));
        assert_eq!("2".parse::<Money>().unwrap(), Money::from_cents(200));
        assert_eq!("2.5".parse::<Money>().unwrap(), Money::from_cents(250));
        assert_eq!(" 10.05 ".parse::<Money>().unwrap(), Money::from_cents(1005));
        assert_eq!(Money::from_cents(200).to_string(), "2.00");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
    }

    #[test]
    fn test_money_rejects_bad_input() {
        for bad in ["", "-1", "1.234", "abc", ".5", "1,00"] {
            assert!(bad.parse::<Money>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_money_json_is_decimal_string() {
        let json = serde_json::to_string(&Money::from_cents(200)).unwrap();
        assert_eq!(json, "\"2.00\"");
        let back: Money = serde_json::from_str("\"2.00\"").unwrap();
        assert_eq!(back, Money::from_cents(200));
        let whole: Money = serde_json::from_str("3").unwrap();
        assert_eq!(whole, Money::from_cents(300));
    }

    #[test]
    fn test_money_sum() {
        let total: Money = [100, 250, 5].into_iter().map(Money::from_cents).sum();
        assert_eq!(total, Money::from_cents(355));
    }

    #[test]
    fn test_ticket_number_pads() {
        assert_eq!(TicketNumber::parse("12").unwrap().as_str(), "00012");
        assert_eq!(TicketNumber::parse("00013").unwrap().as_str(), "00013");
        assert_eq!(TicketNumber::from_index(7).unwrap().as_str(), "00007");
    }

    #[test]
    fn test_ticket_number_rejects_bad_input() {
        for bad in ["", "123456", "12a", "-1", "1.0"] {
            assert!(TicketNumber::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_ticket_number_json() {
        let number: TicketNumber = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(serde_json::to_string(&number).unwrap(), "\"00042\"");
    }

    #[test]
    fn test_status_round_trip_through_strings() {
        assert_eq!("pending_approval".parse::<OrderStatus>().unwrap(), OrderStatus::PendingApproval);
        assert_eq!(OrderStatus::Completed.as_str(), "completed");
        assert!("shipped".parse::<OrderStatus>().is_err());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(!OrderStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_provider_from_db() {
        assert_eq!(PaymentProvider::from_db(Some("payphone")), PaymentProvider::PayPhone);
        assert_eq!(PaymentProvider::from_db(Some("transfer")), PaymentProvider::Transfer);
        assert_eq!(
            PaymentProvider::from_db(Some("stripe")),
            PaymentProvider::Other("stripe".to_string())
        );
        assert_eq!(PaymentProvider::from_db(None).as_db(), None);
    }
}
