//! Core types for the tally credit-ledger engine.
//!
//! This crate provides the foundational types used throughout tally:
//!
//! - **Identifiers**: `UserId`, `TransactionId`, `AuditLogId`
//! - **Users**: `User`, `ExpirationUpdate`
//! - **Ledger records**: `Transaction`, `AuditLog`, `IdempotencyRecord`
//! - **Configuration**: `EngineConfig` and its sections
//! - **Errors**: `LedgerError` and its machine-readable codes
//!
//! # Credit Unit
//!
//! Balances are plain `i64` credits. The engine enforces no floor: a
//! balance may go negative if a storage backend or tier change puts it
//! there. Integer credits avoid floating point precision issues.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod user;

pub use config::{
    ActionCost, AuditConfig, EngineConfig, IdempotencyConfig, MembershipConfig, RetryConfig,
};
pub use error::{LedgerError, Result};
pub use ids::{AuditLogId, IdError, TransactionId, UserId};
pub use ledger::{
    AuditLog, AuditStatus, IdempotencyRecord, Metadata, NewAuditLog, NewTransaction, Transaction,
    TransactionQuery,
};
pub use user::{ExpirationUpdate, User};
