//! Domain layer: entities, value objects, state machines and the port traits
//! the application layer drives.

pub mod actor;
pub mod cart;
pub mod ids;
pub mod money;
pub mod order;
pub mod payment;
pub mod ports;
pub mod product;
pub mod shipment;
