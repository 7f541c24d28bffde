use crate::domain::cart::CartSnapshot;
use crate::domain::ids::{OrderId, PaymentId, ProductId, ShipmentId, UserId};
use crate::domain::order::Order;
use crate::domain::payment::Payment;
use crate::domain::ports::{Store, StoreTx};
use crate::domain::product::Product;
use crate::domain::shipment::{ShipmentRecord, ShipmentWebhookEvent};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Column Family for catalog products and their stock.
pub const CF_PRODUCTS: &str = "products";
/// Column Family for orders (items are embedded).
pub const CF_ORDERS: &str = "orders";
/// Column Family for payment attempts.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for cart snapshots, keyed by user.
pub const CF_CARTS: &str = "carts";
/// Column Family for shipment records, keyed by order.
pub const CF_SHIPMENTS: &str = "shipments";
/// Column Family for the append-only shipment webhook log.
pub const CF_SHIPMENT_EVENTS: &str = "shipment_events";
/// Column Family for counters.
pub const CF_META: &str = "meta";

const LAST_ORDER_NUMBER_KEY: &str = "last_order_number";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_PRODUCTS,
    CF_ORDERS,
    CF_PAYMENTS,
    CF_CARTS,
    CF_SHIPMENTS,
    CF_SHIPMENT_EVENTS,
    CF_META,
];

/// A persistent store implementation using RocksDB.
///
/// Each entity lives in its own Column Family, serialized as JSON. A
/// transaction stages its writes in memory and applies them with a single
/// `WriteBatch` on commit; transactions are serialized by a process-wide
/// mutex, so reads inside a transaction see a stable view.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that every required column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }
}

#[async_trait]
impl Store for RocksDBStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let guard = self.writer.clone().lock_owned().await;
        Ok(Box::new(RocksDBTx {
            db: self.db.clone(),
            _guard: guard,
            staged: BTreeMap::new(),
        }))
    }
}

type StagedKey = (&'static str, Vec<u8>);

pub struct RocksDBTx {
    db: Arc<DB>,
    _guard: OwnedMutexGuard<()>,
    /// `None` marks a staged delete.
    staged: BTreeMap<StagedKey, Option<Vec<u8>>>,
}

fn handle<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| EngineError::StorageError(format!("{name} column family not found")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

impl RocksDBTx {
    fn get<T: DeserializeOwned>(&self, cf: &'static str, key: &[u8]) -> Result<Option<T>> {
        if let Some(staged) = self.staged.get(&(cf, key.to_vec())) {
            return staged.as_deref().map(decode).transpose();
        }
        let handle = handle(&self.db, cf)?;
        self.db
            .get_cf(handle, key)?
            .as_deref()
            .map(decode)
            .transpose()
    }

    /// Reads a whole column family with this transaction's writes applied.
    fn scan<T: DeserializeOwned>(&self, cf: &'static str) -> Result<Vec<T>> {
        let handle = handle(&self.db, cf)?;
        let mut rows: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (key, value) = item?;
            rows.insert(key.to_vec(), value.to_vec());
        }
        for ((staged_cf, key), value) in &self.staged {
            if *staged_cf != cf {
                continue;
            }
            match value {
                Some(bytes) => {
                    rows.insert(key.clone(), bytes.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        rows.values().map(|bytes| decode(bytes)).collect()
    }

    fn put<T: Serialize>(&mut self, cf: &'static str, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.staged.insert((cf, key.as_bytes().to_vec()), Some(bytes));
        Ok(())
    }

    fn delete(&mut self, cf: &'static str, key: &str) {
        self.staged.insert((cf, key.as_bytes().to_vec()), None);
    }
}

#[async_trait]
impl StoreTx for RocksDBTx {
    async fn product(&mut self, id: &ProductId) -> Result<Option<Product>> {
        self.get(CF_PRODUCTS, id.as_str().as_bytes())
    }

    async fn products(&mut self) -> Result<Vec<Product>> {
        self.scan(CF_PRODUCTS)
    }

    async fn put_product(&mut self, product: Product) -> Result<()> {
        self.put(CF_PRODUCTS, product.id.as_str(), &product)
    }

    async fn order(&mut self, id: &OrderId) -> Result<Option<Order>> {
        self.get(CF_ORDERS, id.as_str().as_bytes())
    }

    async fn orders(&mut self) -> Result<Vec<Order>> {
        self.scan(CF_ORDERS)
    }

    async fn put_order(&mut self, order: Order) -> Result<()> {
        self.put(CF_ORDERS, order.id.as_str(), &order)
    }

    async fn next_order_number(&mut self) -> Result<u64> {
        let last: u64 = self
            .get(CF_META, LAST_ORDER_NUMBER_KEY.as_bytes())?
            .unwrap_or(0);
        let next = last + 1;
        self.put(CF_META, LAST_ORDER_NUMBER_KEY, &next)?;
        Ok(next)
    }

    async fn payment(&mut self, id: &PaymentId) -> Result<Option<Payment>> {
        self.get(CF_PAYMENTS, id.as_str().as_bytes())
    }

    async fn payments(&mut self) -> Result<Vec<Payment>> {
        self.scan(CF_PAYMENTS)
    }

    async fn payment_by_external_id(
        &mut self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<Payment>> {
        Ok(self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .find(|p| p.has_key(provider, external_id)))
    }

    async fn payments_for_order(&mut self, order_id: &OrderId) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| p.order_id.as_ref() == Some(order_id))
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn put_payment(&mut self, payment: Payment) -> Result<()> {
        if let Some(external_id) = payment.external_id.as_deref()
            && self
                .scan::<Payment>(CF_PAYMENTS)?
                .iter()
                .any(|p| p.id != payment.id && p.has_key(&payment.provider, external_id))
        {
            return Err(EngineError::Conflict(format!(
                "payment {}/{} already recorded",
                payment.provider, external_id
            )));
        }
        self.put(CF_PAYMENTS, payment.id.as_str(), &payment)
    }

    async fn cart(&mut self, user_id: &UserId) -> Result<Option<CartSnapshot>> {
        self.get(CF_CARTS, user_id.as_str().as_bytes())
    }

    async fn carts(&mut self) -> Result<Vec<CartSnapshot>> {
        self.scan(CF_CARTS)
    }

    async fn put_cart(&mut self, cart: CartSnapshot) -> Result<()> {
        self.put(CF_CARTS, cart.user_id.as_str(), &cart)
    }

    async fn delete_cart(&mut self, user_id: &UserId) -> Result<()> {
        self.delete(CF_CARTS, user_id.as_str());
        Ok(())
    }

    async fn shipment_for_order(&mut self, order_id: &OrderId) -> Result<Option<ShipmentRecord>> {
        self.get(CF_SHIPMENTS, order_id.as_str().as_bytes())
    }

    async fn shipment_by_external_id(
        &mut self,
        external_id: &str,
    ) -> Result<Option<ShipmentRecord>> {
        Ok(self
            .scan::<ShipmentRecord>(CF_SHIPMENTS)?
            .into_iter()
            .find(|s| s.external_id.as_deref() == Some(external_id)))
    }

    async fn insert_shipment(&mut self, shipment: ShipmentRecord) -> Result<bool> {
        if self
            .get::<ShipmentRecord>(CF_SHIPMENTS, shipment.order_id.as_str().as_bytes())?
            .is_some()
        {
            return Ok(false);
        }
        self.put(CF_SHIPMENTS, shipment.order_id.as_str(), &shipment)?;
        Ok(true)
    }

    async fn put_shipment(&mut self, shipment: ShipmentRecord) -> Result<()> {
        self.put(CF_SHIPMENTS, shipment.order_id.as_str(), &shipment)
    }

    async fn delete_shipment(&mut self, order_id: &OrderId) -> Result<()> {
        self.delete(CF_SHIPMENTS, order_id.as_str());
        Ok(())
    }

    async fn append_shipment_event(&mut self, event: ShipmentWebhookEvent) -> Result<()> {
        // Time-prefixed keys keep the log in arrival order.
        let key = format!("{:020}-{}", event.received_at.timestamp_micros(), event.id);
        self.put(CF_SHIPMENT_EVENTS, &key, &event)
    }

    async fn shipment_events(
        &mut self,
        shipment_id: &ShipmentId,
    ) -> Result<Vec<ShipmentWebhookEvent>> {
        Ok(self
            .scan::<ShipmentWebhookEvent>(CF_SHIPMENT_EVENTS)?
            .into_iter()
            .filter(|e| &e.shipment_id == shipment_id)
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for ((cf, key), value) in &self.staged {
            let handle = handle(&self.db, cf)?;
            match value {
                Some(bytes) => batch.put_cf(handle, key, bytes),
                None => batch.delete_cf(handle, key),
            }
        }
        self.db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use crate::domain::payment::MERCADOPAGO;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some(), "{name}");
        }
    }

    #[tokio::test]
    async fn test_rocksdb_commit_and_rollback() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.put_product(Product::new("A", "Mate", Money::new(dec!(100)), 5))
            .await
            .unwrap();
        // Reads see the transaction's own writes.
        assert_eq!(tx.products().await.unwrap().len(), 1);
        tx.commit().await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.put_product(Product::new("B", "Bombilla", Money::new(dec!(10)), 1))
                .await
                .unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let products = tx.products().await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].id, ProductId::new("A"));
    }

    #[tokio::test]
    async fn test_rocksdb_order_numbers_persist() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            let mut tx = store.begin().await.unwrap();
            assert_eq!(tx.next_order_number().await.unwrap(), 1);
            assert_eq!(tx.next_order_number().await.unwrap(), 2);
            tx.commit().await.unwrap();
        }
        let store = RocksDBStore::open(dir.path()).unwrap();
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_order_number().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rocksdb_payment_lookup_and_delete() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let now = Utc::now();

        let mut payment = Payment::pending(OrderId::new("o1"), MERCADOPAGO, now);
        payment.external_id = Some("77".into());

        let mut tx = store.begin().await.unwrap();
        tx.put_payment(payment.clone()).await.unwrap();
        tx.put_shipment(ShipmentRecord::placeholder(OrderId::new("o1"), now))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let found = tx
            .payment_by_external_id(MERCADOPAGO, "77")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, payment);
        tx.delete_shipment(&OrderId::new("o1")).await.unwrap();
        assert!(
            tx.shipment_for_order(&OrderId::new("o1"))
                .await
                .unwrap()
                .is_none()
        );
        tx.commit().await.unwrap();
    }
}
