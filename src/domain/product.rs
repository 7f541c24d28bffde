use super::ids::ProductId;
use super::money::Money;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// A catalog product together with its stock ledger entry.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    /// Units available for new orders. Never negative.
    pub stock: u32,
    pub active: bool,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            stock,
            active: true,
        }
    }

    /// Takes `quantity` units out of stock, failing if not enough are available.
    pub fn reserve(&mut self, quantity: u32) -> Result<()> {
        if self.stock >= quantity {
            self.stock -= quantity;
            Ok(())
        } else {
            Err(EngineError::OutOfStock(self.name.clone()))
        }
    }

    /// Puts `quantity` units back into stock.
    pub fn release(&mut self, quantity: u32) {
        self.stock = self.stock.saturating_add(quantity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn mate() -> Product {
        Product::new("A", "Mate", Money::new(dec!(100)), 5)
    }

    #[test]
    fn test_reserve_success() {
        let mut product = mate();
        product.reserve(2).unwrap();
        assert_eq!(product.stock, 3);
    }

    #[test]
    fn test_reserve_insufficient_names_product() {
        let mut product = mate();
        let err = product.reserve(6).unwrap_err();
        assert!(matches!(err, EngineError::OutOfStock(ref name) if name == "Mate"));
        assert_eq!(product.stock, 5);
    }

    #[test]
    fn test_reserve_exact_stock() {
        let mut product = mate();
        product.reserve(5).unwrap();
        assert_eq!(product.stock, 0);
    }

    #[test]
    fn test_release() {
        let mut product = mate();
        product.reserve(4).unwrap();
        product.release(4);
        assert_eq!(product.stock, 5);
    }
}
