#![allow(dead_code)]

use async_trait::async_trait;
use orderflow::application::engine::{Dependencies, FulfillmentEngine};
use orderflow::config::Config;
use orderflow::domain::ids::{OrderId, UserId};
use orderflow::domain::money::Money;
use orderflow::domain::order::{CheckoutLine, Order, ShippingInfo};
use orderflow::domain::payment::{MERCADOPAGO, Payment};
use orderflow::domain::ports::{
    Contact, PaymentGateway, Preference, PreferenceRequest, QuoteRequest, ShipmentRequest,
    ShippingCarrier, Store,
};
use orderflow::domain::product::Product;
use orderflow::domain::shipment::{Label, LabelFormat, ShipmentRecord};
use orderflow::error::GatewayError;
use orderflow::infrastructure::in_memory::{InMemoryDirectory, InMemoryStore, RecordingMailer};
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Payment provider double serving canned payments and merchant orders.
///
/// With `hold_preferences` set, preference creation signals
/// `preference_entered` and then waits for `preference_release`.
#[derive(Default)]
pub struct FakeGateway {
    payments: Mutex<HashMap<String, Value>>,
    merchant_orders: Mutex<HashMap<String, Value>>,
    pub preference_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub hold_preferences: AtomicBool,
    pub preference_entered: Notify,
    pub preference_release: Notify,
}

impl FakeGateway {
    pub fn add_payment(&self, payment: Value) {
        let id = match &payment["id"] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.payments.lock().unwrap().insert(id, payment);
    }

    pub fn add_merchant_order(&self, id: &str, merchant_order: Value) {
        self.merchant_orders
            .lock()
            .unwrap()
            .insert(id.to_string(), merchant_order);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn provider(&self) -> &'static str {
        MERCADOPAGO
    }

    async fn create_preference(&self, request: &PreferenceRequest) -> Result<Preference, GatewayError> {
        self.preference_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_preferences.load(Ordering::SeqCst) {
            self.preference_entered.notify_one();
            self.preference_release.notified().await;
        }
        Ok(Preference {
            id: format!("pref-{}", request.order_id),
            init_point: format!("https://mp.example/checkout/{}", request.order_id),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<Value, GatewayError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .ok_or_else(|| GatewayError::Status {
                status: 404,
                body: "payment not found".to_string(),
            })
    }

    async fn fetch_merchant_order(&self, merchant_order_id: &str) -> Result<Value, GatewayError> {
        self.merchant_orders
            .lock()
            .unwrap()
            .get(merchant_order_id)
            .cloned()
            .ok_or_else(|| GatewayError::Status {
                status: 404,
                body: "merchant order not found".to_string(),
            })
    }
}

/// Shipment carrier double. Creation is slow enough for concurrent callers
/// to overlap.
pub struct FakeCarrier {
    pub create_calls: AtomicUsize,
    pub fail_create: AtomicBool,
    pub tracking_response: Mutex<Value>,
    pub last_request: Mutex<Option<ShipmentRequest>>,
    pub last_label_ids: Mutex<Vec<String>>,
    pub last_quote: Mutex<Option<QuoteRequest>>,
}

impl Default for FakeCarrier {
    fn default() -> Self {
        Self {
            create_calls: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            tracking_response: Mutex::new(json!({ "status_name": "COLLECTED" })),
            last_request: Mutex::new(None),
            last_label_ids: Mutex::new(Vec::new()),
            last_quote: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ShippingCarrier for FakeCarrier {
    async fn quote(&self, request: &QuoteRequest) -> Result<Value, GatewayError> {
        *self.last_quote.lock().unwrap() = Some(request.clone());
        Ok(json!({ "price": 1500 }))
    }

    async fn create_shipment(&self, request: &ShipmentRequest) -> Result<Value, GatewayError> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_request.lock().unwrap() = Some(request.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 500,
                body: "carrier unavailable".to_string(),
            });
        }
        Ok(json!({
            "id": 9000 + call,
            "sender_code": "SND-1",
            "status_name": "PAYED",
            "mp_url": "https://carrier.example/pay",
        }))
    }

    async fn tracking(&self, _external_id: &str) -> Result<Value, GatewayError> {
        Ok(self.tracking_response.lock().unwrap().clone())
    }

    async fn confirm_pickup(&self, external_id: &str, _sender_code: &str) -> Result<Value, GatewayError> {
        Ok(json!({ "id": external_id }))
    }

    async fn labels(&self, external_ids: &[String], format: LabelFormat) -> Result<Label, GatewayError> {
        *self.last_label_ids.lock().unwrap() = external_ids.to_vec();
        Ok(Label {
            content_type: "application/pdf".to_string(),
            bytes: format!("{}:{}", format.as_str(), external_ids.join(",")).into_bytes(),
        })
    }
}

pub fn test_config() -> Config {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("SITE_URL", "https://shop.example/"),
        ("EPICK_WEBHOOK_URL", "https://shop.example/api/epick/webhook"),
        ("EPICK_SENDER_POSTAL_CODE", "2000"),
        ("EPICK_SENDER_NAME", "Mate Shop"),
        ("EPICK_SENDER_PHONE", "3410000000"),
        ("EPICK_SENDER_EMAIL", "shop@example.com"),
        ("EPICK_SENDER_STREET", "Cordoba"),
        ("EPICK_SENDER_NUMBER", "1000"),
        ("EPICK_SENDER_CITY", "Rosario"),
        ("EPICK_SENDER_PROVINCE", "Santa Fe"),
    ]);
    Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
}

/// An engine over the in-memory store with fakes for every collaborator.
///
/// The catalog holds `A` (Mate, 100, stock 5) and `B` (Bombilla, 25, stock
/// 10). Users `u1` and `u2` have contacts; `u3` does not.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub carrier: Arc<FakeCarrier>,
    pub mailer: Arc<RecordingMailer>,
    pub directory: Arc<InMemoryDirectory>,
    pub engine: FulfillmentEngine,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let carrier = Arc::new(FakeCarrier::default());
        let mailer = Arc::new(RecordingMailer::new());
        let directory = Arc::new(InMemoryDirectory::new());

        directory
            .register(
                UserId::new("u1"),
                Contact {
                    email: "ana@example.com".into(),
                    name: Some("Ana".into()),
                },
            )
            .await;
        directory
            .register(
                UserId::new("u2"),
                Contact {
                    email: "bruno@example.com".into(),
                    name: None,
                },
            )
            .await;

        let deps = Dependencies {
            store: store.clone(),
            gateway: gateway.clone(),
            carrier: carrier.clone(),
            mailer: mailer.clone(),
            directory: directory.clone(),
        };
        let engine = FulfillmentEngine::new(deps, &test_config());
        engine
            .inventory
            .import(vec![
                Product::new("A", "Mate", Money::new(dec!(100)), 5),
                Product::new("B", "Bombilla", Money::new(dec!(25)), 10),
            ])
            .await
            .unwrap();

        Self {
            store,
            gateway,
            carrier,
            mailer,
            directory,
            engine,
        }
    }

    pub async fn stock(&self, product_id: &str) -> u32 {
        let mut tx = self.store.begin().await.unwrap();
        tx.product(&product_id.into()).await.unwrap().unwrap().stock
    }

    pub async fn order(&self, order_id: &OrderId) -> Order {
        let mut tx = self.store.begin().await.unwrap();
        tx.order(order_id).await.unwrap().unwrap()
    }

    pub async fn payments(&self, order_id: &OrderId) -> Vec<Payment> {
        let mut tx = self.store.begin().await.unwrap();
        tx.payments_for_order(order_id).await.unwrap()
    }

    pub async fn all_payments(&self) -> Vec<Payment> {
        let mut tx = self.store.begin().await.unwrap();
        tx.payments().await.unwrap()
    }

    pub async fn shipment(&self, order_id: &OrderId) -> Option<ShipmentRecord> {
        let mut tx = self.store.begin().await.unwrap();
        tx.shipment_for_order(order_id).await.unwrap()
    }

    /// Places an order for `quantity` units of `product_id`.
    pub async fn place_order(&self, user: &str, product_id: &str, quantity: u32) -> Order {
        self.engine
            .orders
            .create_order(UserId::new(user), vec![line(product_id, quantity)], shipping())
            .await
            .unwrap()
    }

    /// Places an order and reconciles an approved payment for it.
    pub async fn paid_order(&self, user: &str) -> Order {
        let order = self.place_order(user, "A", 1).await;
        self.engine
            .reconciler
            .reconcile(&payment(&format!("mp-{}", order.id), "approved", &order.id))
            .await
            .unwrap();
        self.order(&order.id).await
    }
}

pub fn line(product_id: &str, quantity: u32) -> CheckoutLine {
    CheckoutLine {
        product_id: product_id.into(),
        quantity,
    }
}

pub fn shipping() -> ShippingInfo {
    ShippingInfo {
        name: "Ana Perez".into(),
        phone: "1155550000".into(),
        address_line: "Av. Siempreviva 742".into(),
        city: "Rosario".into(),
        zip: "2000".into(),
    }
}

/// A provider payment object referencing `order_id`.
pub fn payment(external_id: &str, status: &str, order_id: &OrderId) -> Value {
    json!({
        "id": external_id,
        "status": status,
        "external_reference": order_id.as_str(),
    })
}
