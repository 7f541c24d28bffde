//! Inventory ledger: stock accounting per product.
//!
//! Stock only moves inside a store transaction, together with the order
//! status change that requires it.

use crate::domain::order::{CheckoutLine, OrderItem};
use crate::domain::ports::{StoreRef, StoreTx};
use crate::domain::product::Product;
use crate::error::{EngineError, Result};
use tracing::{info, instrument, warn};

/// Takes stock for every line and returns the priced item snapshots.
///
/// Fails on the first missing, inactive or short product; the caller's
/// transaction is then dropped and nothing is applied.
pub async fn reserve(tx: &mut dyn StoreTx, lines: &[CheckoutLine]) -> Result<Vec<OrderItem>> {
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let mut product = tx
            .product(&line.product_id)
            .await?
            .filter(|product| product.active)
            .ok_or_else(|| {
                EngineError::ValidationError(format!(
                    "Product {} is not available",
                    line.product_id
                ))
            })?;
        product.reserve(line.quantity)?;
        items.push(OrderItem::snapshot(&product, line.quantity)?);
        tx.put_product(product).await?;
    }
    Ok(items)
}

/// Returns the stock held by `items`.
pub async fn release(tx: &mut dyn StoreTx, items: &[OrderItem]) -> Result<()> {
    for item in items {
        match tx.product(&item.product_id).await? {
            Some(mut product) => {
                product.release(item.quantity);
                tx.put_product(product).await?;
            }
            None => warn!(product_id = %item.product_id, "Cannot return stock of a deleted product"),
        }
    }
    Ok(())
}

/// Catalog maintenance and stock reporting.
#[derive(Clone)]
pub struct Inventory {
    store: StoreRef,
}

impl Inventory {
    pub fn new(store: StoreRef) -> Self {
        Self { store }
    }

    /// Inserts or replaces catalog products in one transaction.
    #[instrument(skip(self, products), fields(count = products.len()))]
    pub async fn import(&self, products: Vec<Product>) -> Result<()> {
        let mut tx = self.store.begin().await?;
        for product in products {
            tx.put_product(product).await?;
        }
        tx.commit().await?;
        info!("Catalog imported");
        Ok(())
    }

    pub async fn products(&self) -> Result<Vec<Product>> {
        let mut tx = self.store.begin().await?;
        let products = tx.products().await?;
        Ok(products)
    }
}
