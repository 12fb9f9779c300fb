//! Inventory ledger
//!
//! Records stock movements against purchase, sell and adjustment documents
//! and keeps two derived values current inside the same transaction as every
//! write: on-hand quantity per product and store, and the weighted average
//! cost of each product.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod repositories;
pub mod services;

pub use errors::ServiceError;
pub use services::factory::{LedgerServices, ServiceFactory};
