use crate::domain::cart::CartSnapshot;
use crate::domain::ids::{OrderId, PaymentId, ProductId, ShipmentId, UserId};
use crate::domain::order::Order;
use crate::domain::payment::Payment;
use crate::domain::ports::{Contact, CustomerDirectory, Mailer, OutgoingMail, Store, StoreTx};
use crate::domain::product::Product;
use crate::domain::shipment::{ShipmentRecord, ShipmentWebhookEvent};
use crate::error::{EngineError, MailError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Debug, Clone, Default)]
struct Tables {
    products: BTreeMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
    last_order_number: u64,
    payments: HashMap<PaymentId, Payment>,
    carts: HashMap<UserId, CartSnapshot>,
    shipments: HashMap<OrderId, ShipmentRecord>,
    shipment_events: Vec<ShipmentWebhookEvent>,
}

/// A thread-safe in-memory store.
///
/// Transactions are serialized by a single `tokio` mutex. Each transaction
/// works on a private copy of the tables that replaces the shared state on
/// commit, so an abandoned transaction leaves nothing behind.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx { guard, working }))
    }
}

pub struct InMemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn product(&mut self, id: &ProductId) -> Result<Option<Product>> {
        Ok(self.working.products.get(id).cloned())
    }

    async fn products(&mut self) -> Result<Vec<Product>> {
        Ok(self.working.products.values().cloned().collect())
    }

    async fn put_product(&mut self, product: Product) -> Result<()> {
        self.working.products.insert(product.id.clone(), product);
        Ok(())
    }

    async fn order(&mut self, id: &OrderId) -> Result<Option<Order>> {
        Ok(self.working.orders.get(id).cloned())
    }

    async fn orders(&mut self) -> Result<Vec<Order>> {
        Ok(self.working.orders.values().cloned().collect())
    }

    async fn put_order(&mut self, order: Order) -> Result<()> {
        self.working.orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn next_order_number(&mut self) -> Result<u64> {
        self.working.last_order_number += 1;
        Ok(self.working.last_order_number)
    }

    async fn payment(&mut self, id: &PaymentId) -> Result<Option<Payment>> {
        Ok(self.working.payments.get(id).cloned())
    }

    async fn payments(&mut self) -> Result<Vec<Payment>> {
        Ok(self.working.payments.values().cloned().collect())
    }

    async fn payment_by_external_id(
        &mut self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<Payment>> {
        Ok(self
            .working
            .payments
            .values()
            .find(|p| p.has_key(provider, external_id))
            .cloned())
    }

    async fn payments_for_order(&mut self, order_id: &OrderId) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .working
            .payments
            .values()
            .filter(|p| p.order_id.as_ref() == Some(order_id))
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn put_payment(&mut self, payment: Payment) -> Result<()> {
        if let Some(external_id) = payment.external_id.as_deref()
            && self
                .working
                .payments
                .values()
                .any(|p| p.id != payment.id && p.has_key(&payment.provider, external_id))
        {
            return Err(EngineError::Conflict(format!(
                "payment {}/{} already recorded",
                payment.provider, external_id
            )));
        }
        self.working.payments.insert(payment.id.clone(), payment);
        Ok(())
    }

    async fn cart(&mut self, user_id: &UserId) -> Result<Option<CartSnapshot>> {
        Ok(self.working.carts.get(user_id).cloned())
    }

    async fn carts(&mut self) -> Result<Vec<CartSnapshot>> {
        Ok(self.working.carts.values().cloned().collect())
    }

    async fn put_cart(&mut self, cart: CartSnapshot) -> Result<()> {
        self.working.carts.insert(cart.user_id.clone(), cart);
        Ok(())
    }

    async fn delete_cart(&mut self, user_id: &UserId) -> Result<()> {
        self.working.carts.remove(user_id);
        Ok(())
    }

    async fn shipment_for_order(&mut self, order_id: &OrderId) -> Result<Option<ShipmentRecord>> {
        Ok(self.working.shipments.get(order_id).cloned())
    }

    async fn shipment_by_external_id(
        &mut self,
        external_id: &str,
    ) -> Result<Option<ShipmentRecord>> {
        Ok(self
            .working
            .shipments
            .values()
            .find(|s| s.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn insert_shipment(&mut self, shipment: ShipmentRecord) -> Result<bool> {
        if self.working.shipments.contains_key(&shipment.order_id) {
            return Ok(false);
        }
        self.working
            .shipments
            .insert(shipment.order_id.clone(), shipment);
        Ok(true)
    }

    async fn put_shipment(&mut self, shipment: ShipmentRecord) -> Result<()> {
        self.working
            .shipments
            .insert(shipment.order_id.clone(), shipment);
        Ok(())
    }

    async fn delete_shipment(&mut self, order_id: &OrderId) -> Result<()> {
        self.working.shipments.remove(order_id);
        Ok(())
    }

    async fn append_shipment_event(&mut self, event: ShipmentWebhookEvent) -> Result<()> {
        self.working.shipment_events.push(event);
        Ok(())
    }

    async fn shipment_events(
        &mut self,
        shipment_id: &ShipmentId,
    ) -> Result<Vec<ShipmentWebhookEvent>> {
        Ok(self
            .working
            .shipment_events
            .iter()
            .filter(|e| &e.shipment_id == shipment_id)
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

/// Customer contacts kept in memory, keyed by user id.
#[derive(Default, Clone)]
pub struct InMemoryDirectory {
    contacts: Arc<RwLock<HashMap<UserId, Contact>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user_id: UserId, contact: Contact) {
        self.contacts.write().await.insert(user_id, contact);
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryDirectory {
    async fn contact(&self, user_id: &UserId) -> Result<Option<Contact>> {
        Ok(self.contacts.read().await.get(user_id).cloned())
    }
}

/// A mailer that keeps every delivered message in memory.
///
/// It can be switched into a failing mode to exercise best-effort delivery.
#[derive(Default, Clone)]
pub struct RecordingMailer {
    sent: Arc<RwLock<Vec<OutgoingMail>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: OutgoingMail) -> std::result::Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Rejected(format!("delivery to {} failed", mail.to)));
        }
        self.sent.write().await.push(mail);
        Ok(())
    }
}
