use crate::domain::money::Money;
use crate::domain::product::Product;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct ProductRecord {
    id: String,
    name: String,
    price: Decimal,
    stock: u32,
    #[serde(default)]
    active: Option<bool>,
}

impl TryFrom<ProductRecord> for Product {
    type Error = EngineError;

    fn try_from(record: ProductRecord) -> Result<Self> {
        if record.id.is_empty() || record.name.is_empty() {
            return Err(EngineError::ValidationError(
                "product id and name are required".to_string(),
            ));
        }
        let mut product = Product::new(record.id, record.name, Money::price(record.price)?, record.stock);
        product.active = record.active.unwrap_or(true);
        Ok(product)
    }
}

/// Reads catalog products from a CSV source with the header
/// `id,name,price,stock,active`. `active` may be left empty and defaults to `true`.
pub struct ProductReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ProductReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and validates products. A bad row yields an error and
    /// does not stop the rows after it.
    pub fn products(self) -> impl Iterator<Item = Result<Product>> {
        self.reader.into_deserialize().map(|result| {
            let record: ProductRecord = result.map_err(EngineError::from)?;
            Product::try_from(record)
        })
    }
}
