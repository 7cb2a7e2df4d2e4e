//! Payment-processor collaborator interfaces.
//!
//! The processor SDK is a black box to the ledger core: resource lookups go
//! through [`PaymentGateway`], checkout business validation through
//! [`CheckoutValidator`]. Provider objects deserialize leniently; fields the
//! provider adds over time must not break parsing.

use async_trait::async_trait;
use serde::Deserialize;

/// Errors from payment-processor resource lookups.
///
/// These are upstream failures: the core propagates them without internal
/// retries so the provider's redelivery mechanism drives recovery.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The referenced resource does not exist at the provider.
    #[error("provider resource not found: {resource}")]
    NotFound {
        /// Resource id that was looked up.
        resource: String,
    },

    /// Transport or provider-side failure.
    #[error("provider request failed: {0}")]
    Request(String),
}

/// Provider checkout session object.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Session ID.
    pub id: String,
    /// Payment status ("paid", "unpaid", ...).
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Provider customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Total amount in cents.
    #[serde(default)]
    pub amount_total: Option<i64>,
    /// ISO currency code.
    #[serde(default)]
    pub currency: Option<String>,
    /// Client reference ID (our account id).
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Payment intent ID.
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Provider subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSubscription {
    /// Subscription ID.
    pub id: String,
    /// Provider customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Status ("active", "past_due", ...).
    #[serde(default)]
    pub status: Option<String>,
    /// Start of the current billing period (Unix seconds).
    #[serde(default)]
    pub current_period_start: i64,
    /// Price id of the subscribed plan.
    #[serde(default)]
    pub price_id: Option<String>,
    /// Metadata; carries our `account_id`.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ProviderSubscription {
    /// Our account id from subscription metadata, if present.
    #[must_use]
    pub fn account_reference(&self) -> Option<&str> {
        self.metadata.get("account_id").and_then(|v| v.as_str())
    }
}

/// Provider charge object.
#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    /// Charge ID.
    pub id: String,
    /// Payment intent the charge settles.
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Charged amount in cents.
    #[serde(default)]
    pub amount: i64,
    /// Refunded amount in cents.
    #[serde(default)]
    pub amount_refunded: i64,
}

/// Provider customer object.
#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    /// Customer ID.
    pub id: String,
    /// Customer email.
    #[serde(default)]
    pub email: Option<String>,
    /// Metadata; may carry our `account_id`.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Payment-processor resource lookups.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Retrieve a checkout session, expanding the given sub-resources.
    async fn checkout_session(
        &self,
        session_id: &str,
        expand: &[&str],
    ) -> Result<CheckoutSession, GatewayError>;

    /// Retrieve a subscription.
    async fn subscription(&self, subscription_id: &str)
        -> Result<ProviderSubscription, GatewayError>;

    /// Retrieve a charge.
    async fn charge(&self, charge_id: &str) -> Result<Charge, GatewayError>;

    /// Retrieve a customer.
    async fn customer(&self, customer_id: &str) -> Result<Customer, GatewayError>;
}

/// One purchasable token pack resolved from a checkout line item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPack {
    /// Pack identifier (price or product id).
    pub pack_id: String,
    /// Tokens granted by the pack.
    pub tokens: i64,
    /// Pack price in cents.
    pub amount_cents: i64,
}

/// A validated checkout: packs, aggregate tokens, amount, currency.
#[derive(Debug, Clone)]
pub struct ResolvedCheckout {
    /// The purchased packs.
    pub packs: Vec<TokenPack>,
    /// Aggregate tokens across packs.
    pub total_tokens: i64,
    /// Aggregate amount in cents.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
}

/// Errors from checkout business validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// A line item references a pack with no known token mapping.
    #[error("unknown pack: {pack_id}")]
    UnknownPack {
        /// The unmapped price/product id.
        pack_id: String,
    },

    /// The session's amount does not match the resolved packs.
    #[error("amount mismatch: session={session_cents}, resolved={resolved_cents}")]
    AmountMismatch {
        /// Amount reported by the session.
        session_cents: i64,
        /// Amount computed from the resolved packs.
        resolved_cents: i64,
    },

    /// The session is missing data required for resolution.
    #[error("missing checkout field: {0}")]
    MissingField(String),
}

/// Resolves the business content of a checkout session.
#[async_trait]
pub trait CheckoutValidator: Send + Sync {
    /// Resolve the purchased packs and totals for a session.
    async fn resolve(&self, session: &CheckoutSession) -> Result<ResolvedCheckout, ValidationError>;
}
