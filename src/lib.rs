//! # taskmarket
//!
//! Coordination engine for a task marketplace. Operators publish tasks with a
//! fixed number of paid slots; users claim a slot, submit proof of work and
//! are credited on approval. Every balance change is mirrored by a ledger
//! transaction so an account can always be reconciled against its history.
//!
//! ## Layout
//!
//! - [`model`]: tasks, claims, accounts, transactions and [`model::Money`].
//! - Pure rules: [`claims`], [`verifier`], [`payout`], [`withdrawals`],
//!   [`quiz`], [`sweeper`] and [`ledger`]. Each exposes functions over
//!   locked rows plus a thin async wrapper over [`store::MarketStore`].
//! - Storage: [`store::memory::MemoryStore`] for tests and demos,
//!   [`db::Database`] for PostgreSQL.
//! - [`market::Marketplace`]: the operation surface, with logging,
//!   metrics and the activity log.
//! - [`api`]: the axum router.

pub mod api;
pub mod claims;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod ledger;
pub mod market;
pub mod model;
pub mod payout;
pub mod prom_metrics;
pub mod quiz;
pub mod store;
pub mod sweeper;
pub mod verifier;
pub mod withdrawals;

pub use error::{MarketError, Result};
pub use market::Marketplace;
pub use model::{Account, Claim, Money, NewTask, Task, Transaction};
pub use store::MarketStore;
