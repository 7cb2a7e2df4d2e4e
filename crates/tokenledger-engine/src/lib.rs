//! Tokenledger reservation engine and payment-event reconciliation.
//!
//! This crate implements the ledger core on top of `tokenledger-store`:
//!
//! - **Reservation engine** - the reserve -> commit/release/expire hold
//!   lifecycle and its balance invariants
//! - **Refund policy** - proportional token clawback/restoration math
//! - **Event processor** - idempotent, signature-verified reconciliation of
//!   payment-provider webhook events
//! - **Subscription lifecycle** - per-account blocked/active bookkeeping
//!   driven by recurring payment outcomes
//! - **Sweeper** - background expiry of stale reservations
//!
//! # Collaborators
//!
//! The payment processor itself is consumed through the [`PaymentGateway`]
//! and [`CheckoutValidator`] traits; metering counters go through
//! [`MetricsSink`]. Production implementations live outside this crate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod crypto;
pub mod engine;
pub mod events;
pub mod gateway;
pub mod metrics;
pub mod refund;
pub mod subscription;
pub mod sweeper;

pub use config::{EngineConfig, WebhookConfig};
pub use engine::{CommitResult, ExpireOutcome, ReservationEngine};
pub use events::{EventError, EventOutcome, EventProcessor};
pub use gateway::{
    Charge, CheckoutSession, CheckoutValidator, Customer, GatewayError, PaymentGateway,
    ProviderSubscription, ResolvedCheckout, TokenPack, ValidationError,
};
pub use metrics::{CountingMetrics, LogMetrics, MetricsSink};
pub use refund::{calculate_refund, RefundCalculation, RefundPolicy};
pub use subscription::{PlanCatalog, SubscriptionManager};
pub use sweeper::{ReservationSweeper, SweepStats};
