//! Order fulfilment and payment reconciliation engine.
//!
//! Turns carts into durable orders against an inventory ledger, reconciles
//! asynchronous payment notifications with order state, drives the carrier's
//! shipment status machine and sends at most one reminder per abandoned cart
//! or stalled payment.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
pub mod telemetry;
