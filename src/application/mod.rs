//! Application services orchestrating the domain over the ports.
//!
//! Every service owns a [`StoreRef`](crate::domain::ports::StoreRef) and runs
//! each operation as one or more store transactions. Provider calls are made
//! between transactions, never inside one.

pub mod carts;
pub mod engine;
pub mod inventory;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod reconciliation;
pub mod reminders;
pub mod shipments;
pub mod templates;
