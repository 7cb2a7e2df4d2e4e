//! Core types and utilities for tokenledger.
//!
//! This crate provides the foundational types used throughout the tokenledger
//! platform:
//!
//! - **Identifiers**: `AccountId`, `ReservationId`, `PaymentId`, `TransactionId`
//! - **Accounts**: `Account`
//! - **Reservations**: `Reservation`, `ReservationState`
//! - **Ledger**: `TokenTransaction`, `TransactionType`, `CreditSource`
//! - **Payments**: `Payment`, `PaymentStatus`
//! - **Subscriptions**: `SubscriptionStanding`
//! - **Units**: ceiling conversions between raw usage units and billing tokens
//!
//! # Billing Token Unit
//!
//! A billing token is the indivisible unit of metered spend. Raw usage
//! (LLM tokens, pages, API calls) converts to billing tokens by ceiling
//! division, so fractional tokens never persist. Amounts are stored as
//! `i64`; ledger rows are append-only and signed (credits positive,
//! clawbacks negative).

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod error;
pub mod ids;
pub mod payment;
pub mod reservation;
pub mod subscription;
pub mod transaction;
pub mod units;

pub use account::Account;
pub use error::{LedgerError, Result};
pub use ids::{AccountId, IdError, PaymentId, ReservationId, TransactionId};
pub use payment::{Payment, PaymentStatus};
pub use reservation::{Reservation, ReservationState, Transition};
pub use subscription::SubscriptionStanding;
pub use transaction::{CreditSource, TokenTransaction, TransactionType};
pub use units::{billing_tokens, estimate_with_safety, proportional_tokens};
