use super::cart::CartSnapshot;
use super::ids::{OrderId, PaymentId, ProductId, ShipmentId, UserId};
use super::order::Order;
use super::payment::Payment;
use super::product::Product;
use super::shipment::{LabelFormat, Label, ShipmentRecord, ShipmentWebhookEvent};
use crate::error::{GatewayError, MailError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Durable storage for every entity the engine owns.
///
/// All reads and writes happen inside a [`StoreTx`]. Implementations must
/// make a committed transaction visible atomically and serialize conflicting
/// transactions, so that a unit of work never observes another one half-applied.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}

/// A unit of work against the [`Store`].
///
/// Dropping a transaction without calling [`StoreTx::commit`] discards every
/// write made through it.
#[async_trait]
pub trait StoreTx: Send {
    async fn product(&mut self, id: &ProductId) -> Result<Option<Product>>;
    async fn products(&mut self) -> Result<Vec<Product>>;
    async fn put_product(&mut self, product: Product) -> Result<()>;

    async fn order(&mut self, id: &OrderId) -> Result<Option<Order>>;
    async fn orders(&mut self) -> Result<Vec<Order>>;
    async fn put_order(&mut self, order: Order) -> Result<()>;
    /// Hands out the next order number, starting at 1. The number is only
    /// consumed if the transaction commits.
    async fn next_order_number(&mut self) -> Result<u64>;

    async fn payment(&mut self, id: &PaymentId) -> Result<Option<Payment>>;
    async fn payments(&mut self) -> Result<Vec<Payment>>;
    async fn payment_by_external_id(
        &mut self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<Payment>>;
    /// Payments of one order, newest first.
    async fn payments_for_order(&mut self, order_id: &OrderId) -> Result<Vec<Payment>>;
    /// Inserts or replaces a payment.
    ///
    /// Fails with a conflict if another payment already holds the same
    /// (provider, external id) key.
    async fn put_payment(&mut self, payment: Payment) -> Result<()>;

    async fn cart(&mut self, user_id: &UserId) -> Result<Option<CartSnapshot>>;
    async fn carts(&mut self) -> Result<Vec<CartSnapshot>>;
    async fn put_cart(&mut self, cart: CartSnapshot) -> Result<()>;
    async fn delete_cart(&mut self, user_id: &UserId) -> Result<()>;

    async fn shipment_for_order(&mut self, order_id: &OrderId) -> Result<Option<ShipmentRecord>>;
    async fn shipment_by_external_id(&mut self, external_id: &str)
    -> Result<Option<ShipmentRecord>>;
    /// Reserves the per-order shipment slot. Returns `false` if it is taken.
    async fn insert_shipment(&mut self, shipment: ShipmentRecord) -> Result<bool>;
    async fn put_shipment(&mut self, shipment: ShipmentRecord) -> Result<()>;
    async fn delete_shipment(&mut self, order_id: &OrderId) -> Result<()>;
    async fn append_shipment_event(&mut self, event: ShipmentWebhookEvent) -> Result<()>;
    async fn shipment_events(&mut self, shipment_id: &ShipmentId)
    -> Result<Vec<ShipmentWebhookEvent>>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

pub type StoreRef = Arc<dyn Store>;

/// A line sent to the payment provider when opening a checkout.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PreferenceItem {
    pub title: String,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: rust_decimal::Decimal,
    pub currency_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub items: Vec<PreferenceItem>,
    pub site_url: String,
}

/// A checkout session created by the payment provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Preference {
    pub id: String,
    pub init_point: String,
}

/// Outbound calls to the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider tag stored on payment rows.
    fn provider(&self) -> &'static str;

    async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> std::result::Result<Preference, GatewayError>;

    /// Fetches the raw payment object for a notification id.
    async fn fetch_payment(&self, payment_id: &str) -> std::result::Result<Value, GatewayError>;

    /// Fetches a merchant order, which batches one or more payments.
    async fn fetch_merchant_order(
        &self,
        merchant_order_id: &str,
    ) -> std::result::Result<Value, GatewayError>;
}

/// Package dimensions (cm) and weight (kg) declared to the carrier.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PackageSpec {
    #[serde(with = "rust_decimal::serde::float")]
    pub long: rust_decimal::Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub width: rust_decimal::Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub height: rust_decimal::Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub weight: rust_decimal::Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: rust_decimal::Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct AddressBlock {
    pub postal_code: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub street: String,
    pub number: String,
    pub city: String,
    pub province: String,
    pub extra: String,
    pub info: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShipmentInfo {
    pub webhook: String,
}

/// Create-shipment request in the carrier's wire shape.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShipmentRequest {
    pub info: ShipmentInfo,
    pub package: PackageSpec,
    pub sender: AddressBlock,
    pub addressee: AddressBlock,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PostalCode {
    pub postal_code: String,
}

/// Shipping price request: the default package between two postal codes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct QuoteRequest {
    pub package: PackageSpec,
    pub sender: PostalCode,
    pub addressee: PostalCode,
}

/// Outbound calls to the shipment carrier.
#[async_trait]
pub trait ShippingCarrier: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> std::result::Result<Value, GatewayError>;

    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> std::result::Result<Value, GatewayError>;

    async fn tracking(&self, external_id: &str) -> std::result::Result<Value, GatewayError>;

    async fn confirm_pickup(
        &self,
        external_id: &str,
        sender_code: &str,
    ) -> std::result::Result<Value, GatewayError>;

    async fn labels(
        &self,
        external_ids: &[String],
        format: LabelFormat,
    ) -> std::result::Result<Label, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> std::result::Result<(), MailError>;
}

/// Contact details of a customer, as known to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub email: String,
    pub name: Option<String>,
}

impl Contact {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.email)
    }
}

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn contact(&self, user_id: &UserId) -> Result<Option<Contact>>;
}
