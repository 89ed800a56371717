//! # wardlock-core
//!
//! Concurrency core for multi-tenant clinic operations: lease-based
//! resource locks with at-most-one-writer semantics, a stateless clinical
//! collision detector, and per-clinician waiting queues with an atomic
//! finish-current / call-next transition.

pub mod client;
pub mod clock;
pub mod collision;
pub mod collision_service;
pub mod config;
pub mod error;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod keyed;
pub mod lock_manager;
pub mod monitor;
pub mod notify;
pub mod policy;
pub mod queue_coordinator;
pub mod scheduler;
pub mod types;

pub use client::WardClient;
pub use error::{CoreError, CoreResult, StoreError};

#[cfg(test)]
mod collision_test;
#[cfg(test)]
mod scheduler_test;
#[cfg(test)]
mod policy_test;
#[cfg(test)]
mod keyed_test;
#[cfg(test)]
mod notify_test;
#[cfg(test)]
mod monitor_test;
#[cfg(test)]
mod queue_test;
